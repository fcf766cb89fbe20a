//! Credential store persisted as a JSON document
//!
//! The file holds one object per namespace:
//!
//! ```json
//! { "wifi": { "ssid": "campsite", "password": "hunter2" } }
//! ```
//!
//! The whole document is rewritten on every change, and the in-memory copy
//! only moves once that write has succeeded.

use async_trait::async_trait;
use busrelay_bridge::{CredentialStore, GatewayError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// Key-value store backed by a JSON file, or memory only
#[derive(Debug, Default)]
pub struct JsonFileStore {
    path: Option<PathBuf>,
    data: Namespaces,
}

impl JsonFileStore {
    /// A store that forgets everything on exit
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the store at `path`; a missing file starts empty
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| GatewayError::StoreRead {
                namespace: "*".to_string(),
                key: "*".to_string(),
                reason: format!("{}: {}", path.display(), e),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Credential store not found, starting empty");
                Namespaces::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            data,
        })
    }

    /// Write `data` out, then adopt it as the current contents
    async fn commit(&mut self, data: Namespaces, namespace: &str, key: &str) -> Result<()> {
        self.persist(&data, namespace, key).await?;
        self.data = data;
        Ok(())
    }

    async fn persist(&self, data: &Namespaces, namespace: &str, key: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let write_error = |reason: String| GatewayError::StoreWrite {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason,
        };

        let bytes = serde_json::to_vec_pretty(data).map_err(|e| write_error(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| write_error(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Credential store written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .data
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.clone();
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.commit(data, namespace, key).await
    }

    async fn remove(&mut self, namespace: &str, key: &str) -> Result<()> {
        let mut data = self.data.clone();
        let Some(entries) = data.get_mut(namespace) else {
            return Ok(());
        };
        if entries.remove(key).is_none() {
            return Ok(());
        }
        if entries.is_empty() {
            data.remove(namespace);
        }
        self.commit(data, namespace, key).await
    }
}
