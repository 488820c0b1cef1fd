//! H.264/AVC codec configuration
//!
//! Sources hand the relay H.264 in AVCC format (length-prefixed NAL units),
//! the same layout fMP4 `mdat` boxes carry, so frames pass through untouched.
//! What the muxer does need is the decoder configuration:
//!
//! AVCDecoderConfigurationRecord:
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```
//!
//! plus the coded picture size, which only lives inside the SPS.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::bits::{nal_to_rbsp, BitReader};
use crate::error::MediaError;

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }
}

/// AVC decoder configuration
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size in bytes (usually 4)
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
    /// Raw AVCDecoderConfigurationRecord bytes (the `avcC` box payload)
    pub raw: Bytes,
}

impl AvcConfig {
    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcConfig);
        }

        let raw = data.clone();
        let mut data = data;

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcConfig);
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let mut sps = Vec::with_capacity(num_sps);
        for _ in 0..num_sps {
            if data.len() < 2 {
                return Err(MediaError::InvalidAvcConfig);
            }
            let sps_len = data.get_u16() as usize;
            if data.len() < sps_len {
                return Err(MediaError::InvalidAvcConfig);
            }
            sps.push(data.copy_to_bytes(sps_len));
        }

        if data.is_empty() {
            return Err(MediaError::InvalidAvcConfig);
        }
        let num_pps = data.get_u8() as usize;
        let mut pps = Vec::with_capacity(num_pps);
        for _ in 0..num_pps {
            if data.len() < 2 {
                return Err(MediaError::InvalidAvcConfig);
            }
            let pps_len = data.get_u16() as usize;
            if data.len() < pps_len {
                return Err(MediaError::InvalidAvcConfig);
            }
            pps.push(data.copy_to_bytes(pps_len));
        }

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    /// Build a configuration record from a single SPS/PPS pair
    ///
    /// Sources fed from RTSP/SDP usually know the parameter sets rather than
    /// a ready-made record.
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self, MediaError> {
        if sps.len() < 4 || pps.is_empty() {
            return Err(MediaError::InvalidAvcConfig);
        }

        let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
        buf.put_u8(1);
        buf.put_u8(sps[1]);
        buf.put_u8(sps[2]);
        buf.put_u8(sps[3]);
        buf.put_u8(0xFF); // 4-byte NALU lengths
        buf.put_u8(0xE1); // 1 SPS
        buf.put_u16(sps.len() as u16);
        buf.put_slice(&sps);
        buf.put_u8(1);
        buf.put_u16(pps.len() as u16);
        buf.put_slice(&pps);

        Self::parse(buf.freeze())
    }

    /// RFC 6381 codec string, e.g. `avc1.64001f`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }
}

/// Fields of a sequence parameter set the muxer cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    /// Display width after cropping
    pub width: u32,
    /// Display height after cropping
    pub height: u32,
}

impl SpsInfo {
    /// Parse an SPS NAL unit (including its one-byte NAL header)
    pub fn parse(nal: &[u8]) -> Result<Self, MediaError> {
        if nal.len() < 4 || NaluType::from_byte(nal[0]) != Some(NaluType::Sps) {
            return Err(MediaError::InvalidSps);
        }

        let rbsp = nal_to_rbsp(&nal[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)? as u8;
        let _constraint_flags = r.read_bits(8)?;
        let level_idc = r.read_bits(8)? as u8;
        let _sps_id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_flag()?;
            }
            let _bit_depth_luma = r.read_ue()?;
            let _bit_depth_chroma = r.read_ue()?;
            let _qpprime_y_zero_transform_bypass = r.read_flag()?;
            if r.read_flag()? {
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if r.read_flag()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_poc_lsb = r.read_ue()?;
            }
            1 => {
                let _delta_pic_order_always_zero = r.read_flag()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom_field = r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    let _offset_for_ref_frame = r.read_se()?;
                }
            }
            _ => {}
        }

        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_allowed = r.read_flag()?;
        let width_in_mbs = r.read_ue()? + 1;
        let height_in_map_units = r.read_ue()? + 1;
        let frame_mbs_only = r.read_flag()?;
        if !frame_mbs_only {
            let _mb_adaptive_frame_field = r.read_flag()?;
        }
        let _direct_8x8_inference = r.read_flag()?;

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_flag()? {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let (crop_unit_x, crop_unit_y) = if chroma_format_idc == 0 || separate_colour_plane {
            (1, field_factor)
        } else {
            match chroma_format_idc {
                1 => (2, 2 * field_factor),
                2 => (2, field_factor),
                _ => (1, field_factor),
            }
        };

        let coded_width = width_in_mbs * 16;
        let coded_height = field_factor * height_in_map_units * 16;
        let width = coded_width
            .checked_sub((crop_left + crop_right) * crop_unit_x)
            .ok_or(MediaError::InvalidSps)?;
        let height = coded_height
            .checked_sub((crop_top + crop_bottom) * crop_unit_y)
            .ok_or(MediaError::InvalidSps)?;

        Ok(SpsInfo {
            profile_idc,
            level_idc,
            width,
            height,
        })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<(), MediaError> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Check whether an AVCC payload contains an IDR slice
pub fn contains_idr(data: &[u8], nalu_length_size: u8) -> bool {
    NaluIterator::new(data, nalu_length_size)
        .any(|nalu| !nalu.is_empty() && NaluType::from_byte(nalu[0]) == Some(NaluType::Idr))
}

/// Iterator over NAL units in AVCC format
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size as usize,
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[self.offset + i] as usize);
        }
        self.offset += self.nalu_length_size;

        if self.offset + len > self.data.len() {
            return None;
        }

        let nalu = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Some(nalu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Baseline 640x480 SPS, no cropping
    const SPS_640X480: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xF6, 0x40];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

    struct BitWriter {
        bits: Vec<bool>,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bits: Vec::new() }
        }

        fn bits(&mut self, value: u32, n: u32) {
            for i in (0..n).rev() {
                self.bits.push((value >> i) & 1 == 1);
            }
        }

        fn ue(&mut self, value: u32) {
            let v = value + 1;
            let len = 32 - v.leading_zeros();
            self.bits(0, len - 1);
            self.bits(v, len);
        }

        fn finish(mut self) -> Vec<u8> {
            self.bits.push(true); // rbsp stop bit
            while self.bits.len() % 8 != 0 {
                self.bits.push(false);
            }
            self.bits
                .chunks(8)
                .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
                .collect()
        }
    }

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert_eq!(NaluType::from_byte(0x00), None);
    }

    #[test]
    fn test_avc_config_parse() {
        let data = Bytes::from_static(&[
            0x01, // version
            0x64, // profile (High)
            0x00, // compatibility
            0x1F, // level 3.1
            0xFF, // nalu length size = 4
            0xE1, // 1 SPS
            0x00, 0x04, // SPS length
            0x67, 0x64, 0x00, 0x1F, // SPS data
            0x01, // 1 PPS
            0x00, 0x03, // PPS length
            0x68, 0xEF, 0x38, // PPS data
        ]);

        let config = AvcConfig::parse(data.clone()).unwrap();
        assert_eq!(config.profile, 100);
        assert_eq!(config.level, 31);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps.len(), 1);
        assert_eq!(config.pps.len(), 1);
        assert_eq!(config.codec_string(), "avc1.64001f");
        assert_eq!(config.raw, data);
    }

    #[test]
    fn test_avc_config_invalid() {
        let bad_version = Bytes::from_static(&[
            0x02, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00,
            0x03, 0x68, 0xEF, 0x38,
        ]);
        assert_eq!(
            AvcConfig::parse(bad_version).unwrap_err(),
            MediaError::InvalidAvcConfig
        );
        assert!(AvcConfig::parse(Bytes::from_static(&[0x01, 0x64, 0x00])).is_err());
    }

    #[test]
    fn test_from_parameter_sets() {
        let config = AvcConfig::from_parameter_sets(
            Bytes::from_static(SPS_640X480),
            Bytes::from_static(PPS),
        )
        .unwrap();

        assert_eq!(config.profile, 0x42);
        assert_eq!(config.compatibility, 0xC0);
        assert_eq!(config.level, 0x1E);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps[0].as_ref(), SPS_640X480);
        assert_eq!(config.pps[0].as_ref(), PPS);
        assert_eq!(config.codec_string(), "avc1.42c01e");
    }

    #[test]
    fn test_sps_baseline_dimensions() {
        let info = SpsInfo::parse(SPS_640X480).unwrap();
        assert_eq!(info.profile_idc, 66);
        assert_eq!(info.level_idc, 30);
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 480);
    }

    #[test]
    fn test_sps_high_profile_with_cropping() {
        let mut w = BitWriter::new();
        w.bits(100, 8); // profile_idc
        w.bits(0, 8); // constraint flags
        w.bits(40, 8); // level_idc
        w.ue(0); // sps id
        w.ue(1); // chroma_format_idc 4:2:0
        w.ue(0); // bit_depth_luma_minus8
        w.ue(0); // bit_depth_chroma_minus8
        w.bits(0, 1); // qpprime
        w.bits(0, 1); // no scaling matrix
        w.ue(0); // log2_max_frame_num_minus4
        w.ue(0); // poc type 0
        w.ue(2); // log2_max_poc_lsb_minus4
        w.ue(4); // max_num_ref_frames
        w.bits(0, 1); // gaps
        w.ue(119); // 120 MBs wide
        w.ue(67); // 68 MBs high
        w.bits(1, 1); // frame_mbs_only
        w.bits(1, 1); // direct_8x8
        w.bits(1, 1); // frame cropping
        w.ue(0);
        w.ue(0);
        w.ue(0);
        w.ue(4); // 8 rows off the bottom
        w.bits(0, 1); // no VUI

        let mut nal = vec![0x67];
        nal.extend(w.finish());

        let info = SpsInfo::parse(&nal).unwrap();
        assert_eq!(info.profile_idc, 100);
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
    }

    #[test]
    fn test_sps_rejects_other_nal_types() {
        assert_eq!(SpsInfo::parse(PPS).unwrap_err(), MediaError::InvalidSps);
        assert!(SpsInfo::parse(&[0x67, 0x42]).is_err());
    }

    #[test]
    fn test_contains_idr() {
        let idr: &[u8] = &[
            0x00, 0x00, 0x00, 0x02, 0x09, 0xF0, // AUD
            0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84, // IDR
        ];
        let p_frame: &[u8] = &[0x00, 0x00, 0x00, 0x03, 0x41, 0x9A, 0x00];

        assert!(contains_idr(idr, 4));
        assert!(!contains_idr(p_frame, 4));
        assert!(!contains_idr(&[], 4));
    }

    #[test]
    fn test_nalu_iterator() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x03, // length = 3
            0x67, 0x64, 0x00, // SPS NALU
            0x00, 0x00, 0x00, 0x02, // length = 2
            0x68, 0xEF, // PPS NALU
        ];

        let mut iter = NaluIterator::new(data, 4);

        let nalu1 = iter.next().unwrap();
        assert_eq!(nalu1.len(), 3);
        assert_eq!(NaluType::from_byte(nalu1[0]), Some(NaluType::Sps));

        let nalu2 = iter.next().unwrap();
        assert_eq!(nalu2.len(), 2);
        assert_eq!(NaluType::from_byte(nalu2[0]), Some(NaluType::Pps));

        assert!(iter.next().is_none());
    }

    #[test]
    fn test_nalu_iterator_truncated() {
        // Length says 10 bytes but only 3 available
        let data: &[u8] = &[0x00, 0x00, 0x00, 0x0A, 0x67, 0x64, 0x00];

        let mut iter = NaluIterator::new(data, 4);
        assert!(iter.next().is_none());
    }
}
