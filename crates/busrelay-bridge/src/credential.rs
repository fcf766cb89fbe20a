//! Wireless network credentials and their place in the persistent store

use std::fmt;
use tracing::{debug, error, warn};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::interface::CredentialStore;

/// Network name and secret pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Network name (SSID)
    pub name: String,
    /// Network secret (passphrase)
    pub secret: String,
}

impl Credential {
    /// Create a credential pair
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }

    /// A credential without a network name cannot be used to join anything
    pub fn is_usable(&self) -> bool {
        !self.name.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Read the stored credential, if both halves are present
pub async fn load_credential<S>(store: &S, layout: &StoreConfig) -> Result<Option<Credential>>
where
    S: CredentialStore + ?Sized,
{
    let name = store.get(&layout.namespace, &layout.name_key).await?;
    let secret = store.get(&layout.namespace, &layout.secret_key).await?;

    match (name, secret) {
        (Some(name), Some(secret)) => Ok(Some(Credential { name, secret })),
        (Some(_), None) => {
            warn!(
                namespace = %layout.namespace,
                key = %layout.secret_key,
                "Stored credential has a name but no secret"
            );
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Persist a credential, name first
///
/// If the secret cannot be written the name is put back to its previous
/// value (or removed when there was none) before the write error is
/// returned, so a failed save never pairs a new name with an old secret.
pub async fn save_credential<S>(store: &mut S, layout: &StoreConfig, credential: &Credential) -> Result<()>
where
    S: CredentialStore + ?Sized,
{
    let previous_name = store.get(&layout.namespace, &layout.name_key).await?;

    store
        .put(&layout.namespace, &layout.name_key, &credential.name)
        .await?;

    if let Err(e) = store
        .put(&layout.namespace, &layout.secret_key, &credential.secret)
        .await
    {
        let restored = match &previous_name {
            Some(name) => store.put(&layout.namespace, &layout.name_key, name).await,
            None => store.remove(&layout.namespace, &layout.name_key).await,
        };
        if let Err(restore_error) = restored {
            error!(
                namespace = %layout.namespace,
                key = %layout.name_key,
                error = %restore_error,
                "Could not restore network name after failed secret write"
            );
        }
        return Err(e);
    }

    debug!(
        namespace = %layout.namespace,
        name_len = credential.name.len(),
        secret_len = credential.secret.len(),
        "Credential written to store"
    );
    Ok(())
}
