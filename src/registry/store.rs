//! Source registry implementation
//!
//! The central registry that tracks live sources and fans their packets out
//! to subscribed client sessions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::config::RegistryConfig;
use super::entry::{SourceEntry, SourceStats};
use super::error::RegistryError;
use super::source::{ClientId, DeliveryMode, SourceId};
use super::SourceRegistry;
use crate::media::{CodecData, Packet};

/// Central registry for all live sources
///
/// Thread-safe via `RwLock`. The map lock is only taken for writing when
/// sources come and go; per-packet work locks a single entry.
pub struct StreamRegistry {
    /// Map of source id to source entry
    sources: RwLock<HashMap<SourceId, Arc<RwLock<SourceEntry>>>>,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a source deliverable in the given modes
    pub async fn add_source(
        &self,
        id: SourceId,
        modes: impl IntoIterator<Item = DeliveryMode>,
    ) -> Result<(), RegistryError> {
        let mut sources = self.sources.write().await;

        if sources.contains_key(&id) {
            return Err(RegistryError::SourceAlreadyExists(id));
        }

        let modes: HashSet<DeliveryMode> = modes.into_iter().collect();
        tracing::info!(source = %id, modes = ?modes, "Source registered");
        sources.insert(id, Arc::new(RwLock::new(SourceEntry::new(modes))));

        Ok(())
    }

    /// Remove a source
    ///
    /// Dropping the entry drops every subscriber's sender, so their
    /// forward loops observe a closed channel and end.
    pub async fn remove_source(&self, id: &SourceId) -> bool {
        let removed = self.sources.write().await.remove(id).is_some();
        if removed {
            tracing::info!(source = %id, "Source removed");
        }
        removed
    }

    /// Publish the track descriptions of a source
    pub async fn set_codecs(
        &self,
        id: &SourceId,
        codecs: Vec<CodecData>,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(id).await?;
        let mut entry = entry.write().await;

        tracing::debug!(
            source = %id,
            tracks = codecs.len(),
            "Codecs updated"
        );
        entry.codecs = Some(codecs);

        Ok(())
    }

    /// Broadcast a packet to all subscribers of a source
    ///
    /// Never waits on a subscriber. Returns the number of subscribers the
    /// packet was delivered to.
    pub async fn broadcast(&self, id: &SourceId, packet: Packet) -> usize {
        let entry = match self.entry(id).await {
            Ok(entry) => entry,
            Err(_) => return 0,
        };

        let mut entry = entry.write().await;
        let before = entry.dropped_packets;
        let delivered = entry.fan_out(&packet);

        if entry.dropped_packets > before {
            tracing::warn!(
                source = %id,
                dropped = entry.dropped_packets - before,
                "Subscriber channel full, packet dropped"
            );
        }

        delivered
    }

    /// Number of subscribers of a source
    pub async fn client_count(&self, id: &SourceId) -> usize {
        match self.entry(id).await {
            Ok(entry) => entry.read().await.client_count(),
            Err(_) => 0,
        }
    }

    /// Get source statistics
    pub async fn source_stats(&self, id: &SourceId) -> Option<SourceStats> {
        let entry = self.entry(id).await.ok()?;
        let entry = entry.read().await;
        Some(SourceStats {
            client_count: entry.client_count(),
            has_codecs: entry.codecs.is_some(),
            dropped_packets: entry.dropped_packets,
            age: entry.created_at.elapsed(),
        })
    }

    /// Get total number of sources
    pub async fn source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    async fn entry(&self, id: &SourceId) -> Result<Arc<RwLock<SourceEntry>>, RegistryError> {
        self.sources
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(RegistryError::SourceNotFound(*id))
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry for StreamRegistry {
    async fn exists_with_type(&self, source: &SourceId, mode: DeliveryMode) -> bool {
        match self.entry(source).await {
            Ok(entry) => entry.read().await.modes.contains(&mode),
            Err(_) => false,
        }
    }

    async fn add_client(
        &self,
        source: &SourceId,
    ) -> Result<(ClientId, mpsc::Receiver<Packet>), RegistryError> {
        let entry = self.entry(source).await?;
        let mut entry = entry.write().await;

        let max = self.config.max_clients_per_source;
        if max > 0 && entry.client_count() >= max {
            return Err(RegistryError::AtCapacity(*source));
        }

        let (client, rx) = entry.add_client(self.config.client_channel_capacity);

        tracing::info!(
            source = %source,
            client = %client,
            clients = entry.client_count(),
            "Client added"
        );

        Ok((client, rx))
    }

    async fn remove_client(&self, source: &SourceId, client: ClientId) {
        let Ok(entry) = self.entry(source).await else {
            return;
        };
        let mut entry = entry.write().await;

        if entry.remove_client(&client) {
            tracing::debug!(
                source = %source,
                client = %client,
                clients = entry.client_count(),
                "Client removed"
            );
        }
    }

    async fn codecs(&self, source: &SourceId) -> Result<Option<Vec<CodecData>>, RegistryError> {
        let entry = self.entry(source).await?;
        let codecs = entry.read().await.codecs.clone();
        Ok(codecs)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::media::AacCodec;

    fn packet(key: bool) -> Packet {
        Packet::video(0, Duration::ZERO, Bytes::from_static(&[0, 0, 0, 1, 0x65]), key)
    }

    #[tokio::test]
    async fn test_exists_with_type() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();

        assert!(!registry.exists_with_type(&id, DeliveryMode::Mse).await);

        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();
        assert!(registry.exists_with_type(&id, DeliveryMode::Mse).await);
        assert!(!registry.exists_with_type(&id, DeliveryMode::Hls).await);
    }

    #[tokio::test]
    async fn test_duplicate_source() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();

        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();
        let result = registry.add_source(id, [DeliveryMode::Hls]).await;
        assert_eq!(result, Err(RegistryError::SourceAlreadyExists(id)));
    }

    #[tokio::test]
    async fn test_add_remove_client() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();
        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();

        let (a, mut rx_a) = registry.add_client(&id).await.unwrap();
        let (b, _rx_b) = registry.add_client(&id).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.client_count(&id).await, 2);

        assert_eq!(registry.broadcast(&id, packet(true)).await, 2);
        assert!(rx_a.recv().await.unwrap().is_keyframe);

        registry.remove_client(&id, a).await;
        assert_eq!(registry.client_count(&id).await, 1);

        // Second removal of the same handle is a no-op
        registry.remove_client(&id, a).await;
        assert_eq!(registry.client_count(&id).await, 1);
    }

    #[tokio::test]
    async fn test_add_client_unknown_source() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();

        let result = registry.add_client(&id).await;
        assert!(matches!(result, Err(RegistryError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_client_limit() {
        let registry =
            StreamRegistry::with_config(RegistryConfig::default().max_clients_per_source(1));
        let id = SourceId::new();
        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();

        let _first = registry.add_client(&id).await.unwrap();
        let second = registry.add_client(&id).await;
        assert!(matches!(second, Err(RegistryError::AtCapacity(_))));
    }

    #[tokio::test]
    async fn test_slow_client_does_not_block_others() {
        let registry =
            StreamRegistry::with_config(RegistryConfig::default().client_channel_capacity(2));
        let id = SourceId::new();
        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();

        let (_slow, _slow_rx) = registry.add_client(&id).await.unwrap();
        let (_fast, mut fast_rx) = registry.add_client(&id).await.unwrap();

        for _ in 0..4 {
            registry.broadcast(&id, packet(false)).await;
            // fast consumer keeps up
            fast_rx.recv().await.unwrap();
        }

        let stats = registry.source_stats(&id).await.unwrap();
        assert_eq!(stats.client_count, 2);
        assert_eq!(stats.dropped_packets, 2);
    }

    #[tokio::test]
    async fn test_closed_receivers_pruned() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();
        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();

        let (_client, rx) = registry.add_client(&id).await.unwrap();
        drop(rx);

        assert_eq!(registry.broadcast(&id, packet(true)).await, 0);
        assert_eq!(registry.client_count(&id).await, 0);
    }

    #[tokio::test]
    async fn test_codecs_absent_then_present() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();
        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();

        assert!(registry.codecs(&id).await.unwrap().is_none());

        let aac = AacCodec::from_config_bytes(Bytes::from_static(&[0x12, 0x10])).unwrap();
        registry
            .set_codecs(&id, vec![CodecData::Aac(aac)])
            .await
            .unwrap();

        let codecs = registry.codecs(&id).await.unwrap().unwrap();
        assert_eq!(codecs.len(), 1);
        assert!(registry.source_stats(&id).await.unwrap().has_codecs);

        let missing = registry.codecs(&SourceId::new()).await;
        assert!(matches!(missing, Err(RegistryError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_source_closes_subscribers() {
        let registry = StreamRegistry::new();
        let id = SourceId::new();
        registry.add_source(id, [DeliveryMode::Mse]).await.unwrap();

        let (_client, mut rx) = registry.add_client(&id).await.unwrap();
        assert!(registry.remove_source(&id).await);
        assert!(rx.recv().await.is_none());
        assert_eq!(registry.source_count().await, 0);
    }
}
