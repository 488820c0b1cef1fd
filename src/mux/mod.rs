//! Fragment muxing
//!
//! The client session only talks to the [`Muxer`] trait; [`Fmp4Muxer`] is
//! the implementation the relay server wires in. A muxer is stateful
//! (sequence numbers, running timestamps) so every session builds its own
//! through a shared [`MuxerFactory`].
//!
//! Call order:
//!
//! ```text
//! write_header(codecs) → init(codecs) → write_packet(..)*
//! ```

pub mod boxes;
pub mod fmp4;

use bytes::Bytes;

use crate::error::MuxError;
use crate::media::{CodecData, Packet};

pub use fmp4::{Fmp4Config, Fmp4Muxer, Fmp4MuxerFactory};

/// Output of [`Muxer::init`]
#[derive(Debug, Clone)]
pub struct MuxInit {
    /// Stream description sent in the tagged header message
    pub header: Bytes,
    /// Initialization segment
    pub segment: Bytes,
}

/// Stateful packet-to-fragment encoder
pub trait Muxer: Send {
    /// Bind the muxer to a source's tracks
    fn write_header(&mut self, codecs: &[CodecData]) -> Result<(), MuxError>;

    /// Produce the header bytes and initialization segment
    fn init(&self, codecs: &[CodecData]) -> Result<MuxInit, MuxError>;

    /// Submit the next packet
    ///
    /// Returns `Ok(None)` while the muxer is buffering and `Ok(Some(fragment))`
    /// once a fragment is ready to send. `flush` forces out anything pending.
    fn write_packet(&mut self, packet: &Packet, flush: bool) -> Result<Option<Bytes>, MuxError>;
}

/// Creates a fresh muxer per client session
pub trait MuxerFactory: Send + Sync + 'static {
    type Muxer: Muxer;

    fn new_muxer(&self) -> Self::Muxer;
}
