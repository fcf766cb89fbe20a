//! Wireless relay stand-in that broadcasts records as UDP datagrams
//!
//! Each record goes out as one 16-byte datagram in the relay wire layout, so
//! a receiver can decode it with `RelayRecord::decode`.

use async_trait::async_trait;
use busrelay_bridge::{
    GatewayError, RelayConfig, RelayInterface, Result, SendResultCallback, SendStatus,
};
use busrelay_core::{MacAddress, RelayRecord};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{info, trace};

/// Relay sending every record to one UDP target
pub struct UdpRelay {
    socket: UdpSocket,
    target: SocketAddr,
    peer: MacAddress,
    callback: SendResultCallback,
}

impl UdpRelay {
    /// Bind an ephemeral socket and register the target as the single peer
    pub async fn bind(target: SocketAddr, config: &RelayConfig, callback: SendResultCallback) -> Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local).await.map_err(|e| GatewayError::PeerRegistrationFailed {
            peer: target.to_string(),
            reason: e.to_string(),
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| GatewayError::PeerRegistrationFailed {
                peer: target.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            %target,
            peer = %config.peer_address,
            channel = config.channel,
            "UDP relay ready"
        );

        Ok(Self {
            socket,
            target,
            peer: config.peer_address,
            callback,
        })
    }
}

#[async_trait]
impl RelayInterface for UdpRelay {
    async fn broadcast(&mut self, record: &RelayRecord) -> Result<()> {
        let datagram = record.encode();
        match self.socket.send_to(&datagram, self.target).await {
            Ok(sent) => {
                trace!(bytes = sent, target = %self.target, "Datagram sent");
                (self.callback)(self.peer, SendStatus::Delivered);
                Ok(())
            }
            Err(e) => {
                (self.callback)(self.peer, SendStatus::Failed);
                Err(GatewayError::SendFailed(e.to_string()))
            }
        }
    }

    fn peer(&self) -> MacAddress {
        self.peer
    }

    fn name(&self) -> &str {
        "udp"
    }
}
