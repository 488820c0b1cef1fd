//! Media packets and per-track codec descriptions
//!
//! These are the types the source registry fans out and the muxer consumes.

use std::time::Duration;

use bytes::Bytes;

use super::aac::AudioSpecificConfig;
use super::h264::{contains_idr, AvcConfig, SpsInfo};
use crate::error::MediaError;

/// A single encoded media packet
///
/// Cheap to clone: the payload is reference counted, so fan-out to many
/// subscribers never copies media data.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Index into the source's codec list
    pub track: usize,
    /// Independently decodable (random access point)
    pub is_keyframe: bool,
    /// Decode timestamp, relative to the source start
    pub dts: Duration,
    /// Presentation offset from `dts` (B-frames)
    pub composition_offset: Duration,
    /// AVCC NAL units for H.264, raw frames for AAC
    pub data: Bytes,
}

impl Packet {
    /// Create a video packet
    pub fn video(track: usize, dts: Duration, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            track,
            is_keyframe,
            dts,
            composition_offset: Duration::ZERO,
            data,
        }
    }

    /// Create an audio packet
    ///
    /// Every audio frame is a random access point.
    pub fn audio(track: usize, dts: Duration, data: Bytes) -> Self {
        Self {
            track,
            is_keyframe: true,
            dts,
            composition_offset: Duration::ZERO,
            data,
        }
    }

    /// Set the composition offset
    pub fn with_composition_offset(mut self, offset: Duration) -> Self {
        self.composition_offset = offset;
        self
    }
}

/// H.264 track description
#[derive(Debug, Clone)]
pub struct H264Codec {
    pub config: AvcConfig,
    pub width: u32,
    pub height: u32,
}

impl H264Codec {
    /// Build from an AVCDecoderConfigurationRecord, reading dimensions from its first SPS
    pub fn from_record(record: Bytes) -> Result<Self, MediaError> {
        Self::from_config(AvcConfig::parse(record)?)
    }

    /// Build from raw SPS/PPS NAL units
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self, MediaError> {
        Self::from_config(AvcConfig::from_parameter_sets(sps, pps)?)
    }

    /// Wrap an AVCC access unit, flagging it as a keyframe when it carries an IDR slice
    pub fn packet(&self, track: usize, dts: Duration, data: Bytes) -> Packet {
        let keyframe = contains_idr(&data, self.config.nalu_length_size);
        Packet::video(track, dts, data, keyframe)
    }

    fn from_config(config: AvcConfig) -> Result<Self, MediaError> {
        let sps = config.sps.first().ok_or(MediaError::InvalidAvcConfig)?;
        let info = SpsInfo::parse(sps)?;
        Ok(Self {
            width: info.width,
            height: info.height,
            config,
        })
    }
}

/// AAC track description
#[derive(Debug, Clone)]
pub struct AacCodec {
    pub config: AudioSpecificConfig,
}

impl AacCodec {
    pub fn from_config_bytes(asc: Bytes) -> Result<Self, MediaError> {
        Ok(Self {
            config: AudioSpecificConfig::parse(asc)?,
        })
    }
}

/// Codec description of one track of a source
#[derive(Debug, Clone)]
pub enum CodecData {
    H264(H264Codec),
    Aac(AacCodec),
}

impl CodecData {
    pub fn is_video(&self) -> bool {
        matches!(self, CodecData::H264(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, CodecData::Aac(_))
    }

    /// RFC 6381 codec string for MSE `addSourceBuffer`
    pub fn codec_string(&self) -> String {
        match self {
            CodecData::H264(h264) => h264.config.codec_string(),
            CodecData::Aac(aac) => aac.config.codec_string(),
        }
    }
}
