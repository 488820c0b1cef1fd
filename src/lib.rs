//! mse-relay: live media relay for Media Source Extensions players
//!
//! Browsers connect over WebSocket, name a live source by UUID, and receive
//! a codec header, an fMP4 initialization segment, and then a stream of
//! `moof`+`mdat` fragments starting at the first keyframe.
//!
//! # Example
//!
//! ```no_run
//! use mse_relay::{RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> mse_relay::Result<()> {
//!     let server = RelayServer::new(RelayConfig::default());
//!
//!     // Publishers feed packets through the registry
//!     let _registry = server.registry().clone();
//!
//!     server.run().await
//! }
//! ```
//!
//! # Modules
//!
//! - [`media`]: packets, H.264 and AAC codec descriptions
//! - [`mux`]: fragmented MP4 muxer
//! - [`registry`]: live sources and their subscribers
//! - [`session`]: per-client relay session
//! - [`transport`]: message sink/stream halves, WebSocket adapter
//! - [`server`]: axum WebSocket endpoint

pub mod error;
pub mod media;
pub mod mux;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
pub use media::{AacCodec, CodecData, H264Codec, Packet};
pub use mux::{Fmp4Muxer, Fmp4MuxerFactory, MuxInit, Muxer, MuxerFactory};
pub use registry::{DeliveryMode, RegistryConfig, SourceId, SourceRegistry, StreamRegistry};
pub use server::{RelayConfig, RelayServer};
pub use session::{ClientSession, SessionConfig, SessionEnd, SessionError};
