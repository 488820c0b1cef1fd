//! Media types
//!
//! This module provides:
//! - Packet and codec description types shared by the registry and muxer
//! - H.264 decoder configuration and SPS parsing
//! - AAC AudioSpecificConfig parsing

pub mod aac;
mod bits;
pub mod h264;
pub mod packet;

pub use aac::AudioSpecificConfig;
pub use h264::{AvcConfig, NaluType, SpsInfo};
pub use packet::{AacCodec, CodecData, H264Codec, Packet};
