//! Statistics for client sessions and the relay server

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Packets taken off the subscription channel
    pub packets_received: u64,
    /// Packets dropped while waiting for the first keyframe
    pub packets_skipped: u64,
    /// Packets accepted by the muxer
    pub packets_muxed: u64,
    /// Packets the muxer rejected
    pub mux_errors: u64,
    /// Media fragments written to the client
    pub fragments_sent: u64,
    /// Total bytes written, init messages included
    pub bytes_sent: u64,
    /// Session duration
    pub duration: Duration,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

/// Server-wide statistics, shared between connection tasks
#[derive(Debug)]
pub struct ServerStats {
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    rejected_connections: AtomicU64,
    started_at: Instant,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn session_opened(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a session as active until the returned guard is dropped
    ///
    /// The guard also covers connection tasks cancelled mid-session.
    pub fn track_session(self: &Arc<Self>) -> ActiveSession {
        self.session_opened();
        ActiveSession {
            stats: Arc::clone(self),
        }
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn rejected_connections(&self) -> u64 {
        self.rejected_connections.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// An open session, counted in [`ServerStats::active_sessions`]
#[derive(Debug)]
pub struct ActiveSession {
    stats: Arc<ServerStats>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.stats.session_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::new();
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.fragments_sent, 0);
        assert_eq!(stats.bitrate(), 0);
    }

    #[test]
    fn test_session_bitrate() {
        let stats = SessionStats {
            bytes_sent: 1_000_000,
            duration: Duration::from_secs(8),
            ..Default::default()
        };
        assert_eq!(stats.bitrate(), 1_000_000);
    }

    #[test]
    fn test_server_stats_counters() {
        let stats = ServerStats::new();
        stats.session_opened();
        stats.session_opened();
        stats.session_closed();
        stats.connection_rejected();

        assert_eq!(stats.total_sessions(), 2);
        assert_eq!(stats.active_sessions(), 1);
        assert_eq!(stats.rejected_connections(), 1);
    }

    #[test]
    fn test_active_session_guard() {
        let stats = Arc::new(ServerStats::new());
        let first = stats.track_session();
        let second = stats.track_session();
        assert_eq!(stats.active_sessions(), 2);

        drop(first);
        assert_eq!(stats.active_sessions(), 1);
        drop(second);
        assert_eq!(stats.active_sessions(), 0);
        assert_eq!(stats.total_sessions(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_session_task_closes() {
        let stats = Arc::new(ServerStats::new());
        let task_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            let _active = task_stats.track_session();
            std::future::pending::<()>().await;
        });

        while stats.total_sessions() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(stats.active_sessions(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(stats.active_sessions(), 0);
    }
}
