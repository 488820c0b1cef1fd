//! Client session configuration

use std::time::Duration;

use crate::registry::DeliveryMode;

/// Per-session options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delivery mode a source must allow for this session to be admitted
    pub delivery_mode: DeliveryMode,

    /// Deadline for each of the two initialization writes
    pub init_write_timeout: Duration,

    /// Deadline for each fragment write; never shorter than `init_write_timeout`
    pub fragment_write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Mse,
            init_write_timeout: Duration::from_secs(5),
            fragment_write_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Set the required delivery mode
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    /// Set the initialization write deadline
    ///
    /// Raises the fragment deadline if it would otherwise be shorter.
    pub fn init_write_timeout(mut self, timeout: Duration) -> Self {
        self.init_write_timeout = timeout;
        self.fragment_write_timeout = self.fragment_write_timeout.max(timeout);
        self
    }

    /// Set the fragment write deadline, clamped to at least the init deadline
    pub fn fragment_write_timeout(mut self, timeout: Duration) -> Self {
        self.fragment_write_timeout = timeout.max(self.init_write_timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.delivery_mode, DeliveryMode::Mse);
        assert_eq!(config.init_write_timeout, Duration::from_secs(5));
        assert_eq!(config.fragment_write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_fragment_deadline_never_below_init() {
        let config = SessionConfig::default().fragment_write_timeout(Duration::from_secs(1));
        assert_eq!(config.fragment_write_timeout, Duration::from_secs(5));

        let config = SessionConfig::default().init_write_timeout(Duration::from_secs(30));
        assert_eq!(config.init_write_timeout, Duration::from_secs(30));
        assert_eq!(config.fragment_write_timeout, Duration::from_secs(30));

        let config = SessionConfig::default()
            .init_write_timeout(Duration::from_millis(50))
            .fragment_write_timeout(Duration::from_millis(200));
        assert_eq!(config.fragment_write_timeout, Duration::from_millis(200));
    }
}
