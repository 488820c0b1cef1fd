//! Source registry
//!
//! The registry tracks live sources, their codec descriptions, and the
//! client sessions subscribed to each of them.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<StreamRegistry>
//!                   ┌──────────────────────────┐
//!                   │ sources: HashMap<Id,     │
//!                   │   SourceEntry {          │
//!                   │     codecs,              │
//!                   │     clients: {id → tx},  │
//!                   │   }                      │
//!                   │ >                        │
//!                   └────────────┬─────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!   [Publisher]           [ClientSession]         [ClientSession]
//!   broadcast()            rx.recv()               rx.recv()
//!        │                       │                       │
//!        └──► try_send() per client ──► muxer ──► WebSocket
//! ```
//!
//! Every subscriber gets its own bounded channel. Packets are cloned into
//! each channel with `try_send`, so a stalled subscriber loses packets
//! instead of holding up the publisher or its siblings. `Packet` payloads
//! are `Bytes`, so the clone is a reference count bump.

pub mod config;
pub mod entry;
pub mod error;
pub mod source;
pub mod store;

use std::future::Future;

use tokio::sync::mpsc;

use crate::media::{CodecData, Packet};

pub use config::RegistryConfig;
pub use entry::{SourceEntry, SourceStats};
pub use error::RegistryError;
pub use source::{ClientId, DeliveryMode, SourceId};
pub use store::StreamRegistry;

/// Registry operations a client session depends on
///
/// Implementations are shared by every session and must be safe to call
/// concurrently.
pub trait SourceRegistry: Send + Sync + 'static {
    /// Check whether `source` exists and may be delivered in `mode`
    fn exists_with_type(
        &self,
        source: &SourceId,
        mode: DeliveryMode,
    ) -> impl Future<Output = bool> + Send;

    /// Subscribe to a source, returning a fresh client handle and packet channel
    fn add_client(
        &self,
        source: &SourceId,
    ) -> impl Future<Output = Result<(ClientId, mpsc::Receiver<Packet>), RegistryError>> + Send;

    /// Unsubscribe a client; unknown handles are ignored
    fn remove_client(&self, source: &SourceId, client: ClientId)
        -> impl Future<Output = ()> + Send;

    /// Fetch the codec description of a source
    ///
    /// `Ok(None)` means the source exists but has not reported its codecs yet.
    fn codecs(
        &self,
        source: &SourceId,
    ) -> impl Future<Output = Result<Option<Vec<CodecData>>, RegistryError>> + Send;
}
