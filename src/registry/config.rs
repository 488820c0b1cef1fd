//! Registry configuration

/// Source registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-subscriber packet channel capacity
    ///
    /// When a subscriber falls this far behind, further packets are dropped
    /// for that subscriber only.
    pub client_channel_capacity: usize,

    /// Maximum subscribers per source (0 = unlimited)
    pub max_clients_per_source: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            client_channel_capacity: 100,
            max_clients_per_source: 0,
        }
    }
}

impl RegistryConfig {
    /// Set the per-subscriber channel capacity
    pub fn client_channel_capacity(mut self, capacity: usize) -> Self {
        self.client_channel_capacity = capacity.max(1);
        self
    }

    /// Set the subscriber limit per source
    pub fn max_clients_per_source(mut self, max: usize) -> Self {
        self.max_clients_per_source = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.client_channel_capacity, 100);
        assert_eq!(config.max_clients_per_source, 0);
    }

    #[test]
    fn test_channel_capacity_never_zero() {
        let config = RegistryConfig::default().client_channel_capacity(0);
        assert_eq!(config.client_channel_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .client_channel_capacity(16)
            .max_clients_per_source(4);
        assert_eq!(config.client_channel_capacity, 16);
        assert_eq!(config.max_clients_per_source, 4);
    }
}
