//! Error types
//!
//! Each subsystem has its own error enum; [`Error`] wraps them for callers
//! that only need a single type (server startup, codec parsing helpers).

use std::fmt;
use std::time::Duration;

use crate::registry::RegistryError;
use crate::session::SessionError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug)]
pub enum Error {
    /// I/O error (bind, accept)
    Io(std::io::Error),
    /// Codec configuration could not be parsed
    Media(MediaError),
    /// Muxer failure
    Mux(MuxError),
    /// Registry operation failed
    Registry(RegistryError),
    /// Transport failure
    Transport(TransportError),
    /// Client session failure
    Session(SessionError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Mux(e) => write!(f, "Mux error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Transport(e) => write!(f, "Transport error: {}", e),
            Error::Session(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Media(e) => Some(e),
            Error::Mux(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Session(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<MuxError> for Error {
    fn from(e: MuxError) -> Self {
        Error::Mux(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Error::Session(e)
    }
}

/// Codec configuration parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Malformed AVCDecoderConfigurationRecord
    InvalidAvcConfig,
    /// Malformed sequence parameter set
    InvalidSps,
    /// Malformed AudioSpecificConfig
    InvalidAacConfig,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidAvcConfig => write!(f, "Invalid AVC decoder configuration"),
            MediaError::InvalidSps => write!(f, "Invalid H.264 sequence parameter set"),
            MediaError::InvalidAacConfig => write!(f, "Invalid AAC AudioSpecificConfig"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Muxer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// Codec description had no tracks
    NoTracks,
    /// Packet referenced a track the muxer was not set up with
    UnknownTrack(usize),
    /// `write_packet` or `init` called before `write_header`
    NotInitialized,
    /// Codec data the muxer cannot express
    InvalidCodec(&'static str),
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::NoTracks => write!(f, "No tracks in codec description"),
            MuxError::UnknownTrack(idx) => write!(f, "Packet for unknown track {}", idx),
            MuxError::NotInitialized => write!(f, "Muxer header not written"),
            MuxError::InvalidCodec(why) => write!(f, "Invalid codec: {}", why),
        }
    }
}

impl std::error::Error for MuxError {}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Write did not complete before its deadline
    Timeout(Duration),
    /// Connection already closed
    Closed,
    /// Underlying socket/protocol error
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(d) => write!(f, "Write deadline of {:?} exceeded", d),
            TransportError::Closed => write!(f, "Connection closed"),
            TransportError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_conversions() {
        let err: Error = MediaError::InvalidSps.into();
        assert!(matches!(err, Error::Media(MediaError::InvalidSps)));

        let err: Error = MuxError::UnknownTrack(3).into();
        assert_eq!(err.to_string(), "Mux error: Packet for unknown track 3");

        let err: Error = TransportError::Closed.into();
        assert!(matches!(err, Error::Transport(TransportError::Closed)));
    }

    #[test]
    fn test_timeout_display() {
        let err = TransportError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "Write deadline of 10s exceeded");
    }
}
