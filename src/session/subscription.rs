//! Registry subscription guard
//!
//! A [`Subscription`] removes its client from the registry exactly once:
//! either through [`Subscription::release`], or, if the owning task is
//! dropped before it gets there, from `Drop` via a spawned task.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::media::Packet;
use crate::registry::{ClientId, RegistryError, SourceId, SourceRegistry};

/// Live subscription to one source
pub struct Subscription<R: SourceRegistry> {
    registry: Arc<R>,
    source: SourceId,
    client: Option<ClientId>,
    packets: mpsc::Receiver<Packet>,
}

impl<R: SourceRegistry> Subscription<R> {
    /// Register a new client on `source`
    pub async fn acquire(registry: Arc<R>, source: SourceId) -> Result<Self, RegistryError> {
        let (client, packets) = registry.add_client(&source).await?;
        Ok(Self {
            registry,
            source,
            client: Some(client),
            packets,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Client handle; `None` once released
    pub fn client(&self) -> Option<ClientId> {
        self.client
    }

    /// Next packet from the source; `None` when the source is gone
    pub async fn recv(&mut self) -> Option<Packet> {
        self.packets.recv().await
    }

    /// Deregister now
    pub async fn release(mut self) {
        if let Some(client) = self.client.take() {
            self.registry.remove_client(&self.source, client).await;
        }
    }
}

impl<R: SourceRegistry> Drop for Subscription<R> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(&self.registry);
                let source = self.source;
                handle.spawn(async move {
                    registry.remove_client(&source, client).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    source = %self.source,
                    client = %client,
                    "Subscription dropped outside runtime, client not removed"
                );
            }
        }
    }
}
