//! Client sessions
//!
//! A session binds one client connection to one live source and pushes the
//! source's packets to it as fragments. See [`ClientSession`] for the
//! lifecycle.

pub mod client;
pub mod config;
pub mod state;
pub mod subscription;
pub mod watcher;

use std::fmt;

use crate::error::{MuxError, TransportError};
use crate::registry::{RegistryError, SourceId};

pub use client::{ClientSession, HEADER_TAG};
pub use config::SessionConfig;
pub use state::{SessionPhase, SessionState};
pub use subscription::Subscription;
pub use watcher::{Disconnect, DisconnectWatcher};

/// How a session that ran to the forward loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the connection
    PeerDisconnected,
    /// Reading from the peer failed
    ReadFailed(TransportError),
    /// The source went away
    SourceClosed,
}

/// Why a session ended early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Source identifier could not be parsed
    InvalidIdentifier(String),
    /// Source missing or not deliverable in the session's mode
    SourceNotEligible(SourceId),
    /// Registry refused the subscription
    RegistrationFailed(RegistryError),
    /// Registry failed to return codecs
    CodecFetchFailed(RegistryError),
    /// Source has not reported its codecs yet
    CodecNotReady(SourceId),
    /// Muxer could not be set up for the source's codecs
    MuxInitFailed(MuxError),
    /// A write failed or missed its deadline
    TransportWriteFailed(TransportError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidIdentifier(s) => write!(f, "Invalid source identifier: {}", s),
            SessionError::SourceNotEligible(id) => write!(f, "Source not eligible: {}", id),
            SessionError::RegistrationFailed(e) => write!(f, "Registration failed: {}", e),
            SessionError::CodecFetchFailed(e) => write!(f, "Codec fetch failed: {}", e),
            SessionError::CodecNotReady(id) => write!(f, "Codecs not ready for source {}", id),
            SessionError::MuxInitFailed(e) => write!(f, "Muxer initialization failed: {}", e),
            SessionError::TransportWriteFailed(e) => write!(f, "Write failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::RegistrationFailed(e) | SessionError::CodecFetchFailed(e) => Some(e),
            SessionError::MuxInitFailed(e) => Some(e),
            SessionError::TransportWriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_invalid_identifier() {
        let err = "not-a-uuid".parse::<SourceId>().unwrap_err();
        assert_eq!(err, SessionError::InvalidIdentifier("not-a-uuid".into()));
        assert_eq!(err.to_string(), "Invalid source identifier: not-a-uuid");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_error_source_chain() {
        let err =
            SessionError::TransportWriteFailed(TransportError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.to_string(), "Write failed: Write deadline of 5s exceeded");
        assert!(err.source().is_some());
    }
}
