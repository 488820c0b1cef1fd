//! Fragmented MP4 muxer
//!
//! Produces the byte streams an MSE `SourceBuffer` expects:
//!
//! ```text
//! init segment:  ftyp | moov { mvhd, trak*, mvex { trex* } }
//! fragment:      moof { mfhd, traf { tfhd, tfdt, trun } } | mdat
//! ```
//!
//! Each fragment carries exactly one sample. A sample's duration is only
//! known once the next sample of the same track arrives, so the muxer holds
//! one pending sample per track and emits it on the following packet. The
//! first packet of a track therefore never produces output.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::boxes::{write_box, write_descriptor, write_full_box, write_matrix};
use super::{MuxInit, Muxer, MuxerFactory};
use crate::error::MuxError;
use crate::media::{CodecData, Packet};

const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
const TRUN_FLAGS: u32 = 0x0001 // data-offset
    | 0x0100 // sample-duration
    | 0x0200 // sample-size
    | 0x0400 // sample-flags
    | 0x0800; // sample-composition-time-offset

const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// Fallback frame rate used before a real duration has been observed
const DEFAULT_FRAME_RATE: u32 = 25;

/// Muxer configuration
#[derive(Debug, Clone)]
pub struct Fmp4Config {
    /// Timescale for video tracks (ticks per second)
    pub video_timescale: u32,
}

impl Default for Fmp4Config {
    fn default() -> Self {
        Self {
            video_timescale: 90_000,
        }
    }
}

impl Fmp4Config {
    /// Set the video timescale
    pub fn video_timescale(mut self, timescale: u32) -> Self {
        self.video_timescale = timescale.max(1);
        self
    }
}

/// Builds one [`Fmp4Muxer`] per client session
#[derive(Debug, Clone, Default)]
pub struct Fmp4MuxerFactory {
    config: Fmp4Config,
}

impl Fmp4MuxerFactory {
    pub fn new(config: Fmp4Config) -> Self {
        Self { config }
    }
}

impl MuxerFactory for Fmp4MuxerFactory {
    type Muxer = Fmp4Muxer;

    fn new_muxer(&self) -> Fmp4Muxer {
        Fmp4Muxer::new(self.config.clone())
    }
}

#[derive(Debug)]
struct PendingSample {
    decode_time: u64,
    composition_offset: i32,
    keyframe: bool,
    data: Bytes,
}

#[derive(Debug)]
struct Track {
    id: u32,
    timescale: u32,
    /// Duration of the previous sample, reused when timestamps repeat
    last_duration: u32,
    pending: Option<PendingSample>,
}

impl Track {
    fn new(id: u32, codec: &CodecData, config: &Fmp4Config) -> Self {
        let (timescale, default_duration) = match codec {
            CodecData::H264(_) => (
                config.video_timescale,
                (config.video_timescale / DEFAULT_FRAME_RATE).max(1),
            ),
            CodecData::Aac(aac) => (
                aac.config.sampling_frequency,
                aac.config.samples_per_frame(),
            ),
        };

        Self {
            id,
            timescale,
            last_duration: default_duration,
            pending: None,
        }
    }

    fn ticks(&self, d: Duration) -> u64 {
        (d.as_nanos() * u128::from(self.timescale) / 1_000_000_000) as u64
    }
}

/// Stateful fMP4 fragmenter for one client
#[derive(Debug)]
pub struct Fmp4Muxer {
    config: Fmp4Config,
    tracks: Vec<Track>,
    sequence: u32,
    /// Decode timestamp mapped to zero on the output timeline
    origin: Option<Duration>,
}

impl Fmp4Muxer {
    pub fn new(config: Fmp4Config) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            sequence: 0,
            origin: None,
        }
    }

    /// Number of fragments emitted so far
    pub fn sequence_number(&self) -> u32 {
        self.sequence
    }

    fn write_fragment(
        out: &mut BytesMut,
        sequence: u32,
        track_id: u32,
        sample: &PendingSample,
        duration: u32,
    ) {
        let moof_start = out.len();
        let mut data_offset_pos = 0usize;

        write_box(out, b"moof", |buf| {
            write_full_box(buf, b"mfhd", 0, 0, |buf| buf.put_u32(sequence));
            write_box(buf, b"traf", |buf| {
                write_full_box(buf, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF, |buf| {
                    buf.put_u32(track_id);
                });
                write_full_box(buf, b"tfdt", 1, 0, |buf| buf.put_u64(sample.decode_time));
                write_full_box(buf, b"trun", 1, TRUN_FLAGS, |buf| {
                    buf.put_u32(1); // sample_count
                    data_offset_pos = buf.len();
                    buf.put_i32(0);
                    buf.put_u32(duration);
                    buf.put_u32(sample.data.len() as u32);
                    buf.put_u32(if sample.keyframe {
                        SAMPLE_FLAGS_SYNC
                    } else {
                        SAMPLE_FLAGS_NON_SYNC
                    });
                    buf.put_i32(sample.composition_offset);
                });
            });
        });

        // Offset from the start of moof to the first byte of mdat payload
        let data_offset = (out.len() - moof_start + 8) as i32;
        out[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

        write_box(out, b"mdat", |buf| buf.put_slice(&sample.data));
    }

    fn write_ftyp(buf: &mut BytesMut) {
        write_box(buf, b"ftyp", |buf| {
            buf.put_slice(b"iso5");
            buf.put_u32(512);
            for brand in [b"iso5", b"iso6", b"mp41"] {
                buf.put_slice(brand);
            }
        });
    }

    fn write_moov(&self, buf: &mut BytesMut, codecs: &[CodecData]) {
        write_box(buf, b"moov", |buf| {
            write_full_box(buf, b"mvhd", 0, 0, |buf| {
                buf.put_u32(0); // creation_time
                buf.put_u32(0); // modification_time
                buf.put_u32(1000); // timescale
                buf.put_u32(0); // duration (live)
                buf.put_u32(0x0001_0000); // rate 1.0
                buf.put_u16(0x0100); // volume 1.0
                buf.put_u16(0);
                buf.put_u64(0);
                write_matrix(buf);
                buf.put_bytes(0, 24); // pre_defined
                buf.put_u32(self.tracks.len() as u32 + 1); // next_track_ID
            });

            for (track, codec) in self.tracks.iter().zip(codecs) {
                Self::write_trak(buf, track, codec);
            }

            write_box(buf, b"mvex", |buf| {
                for track in &self.tracks {
                    write_full_box(buf, b"trex", 0, 0, |buf| {
                        buf.put_u32(track.id);
                        buf.put_u32(1); // default_sample_description_index
                        buf.put_u32(0); // default_sample_duration
                        buf.put_u32(0); // default_sample_size
                        buf.put_u32(0); // default_sample_flags
                    });
                }
            });
        });
    }

    fn write_trak(buf: &mut BytesMut, track: &Track, codec: &CodecData) {
        let (width, height) = match codec {
            CodecData::H264(h264) => (h264.width, h264.height),
            CodecData::Aac(_) => (0, 0),
        };

        write_box(buf, b"trak", |buf| {
            write_full_box(buf, b"tkhd", 0, 0x000003, |buf| {
                buf.put_u32(0); // creation_time
                buf.put_u32(0); // modification_time
                buf.put_u32(track.id);
                buf.put_u32(0);
                buf.put_u32(0); // duration
                buf.put_u64(0);
                buf.put_u16(0); // layer
                buf.put_u16(0); // alternate_group
                buf.put_u16(if codec.is_audio() { 0x0100 } else { 0 });
                buf.put_u16(0);
                write_matrix(buf);
                buf.put_u32(width << 16);
                buf.put_u32(height << 16);
            });

            write_box(buf, b"mdia", |buf| {
                write_full_box(buf, b"mdhd", 0, 0, |buf| {
                    buf.put_u32(0);
                    buf.put_u32(0);
                    buf.put_u32(track.timescale);
                    buf.put_u32(0);
                    buf.put_u16(0x55C4); // "und"
                    buf.put_u16(0);
                });

                let (handler, name): (&[u8; 4], &[u8]) = if codec.is_video() {
                    (b"vide", &b"VideoHandler\0"[..])
                } else {
                    (b"soun", &b"SoundHandler\0"[..])
                };
                write_full_box(buf, b"hdlr", 0, 0, |buf| {
                    buf.put_u32(0);
                    buf.put_slice(handler);
                    buf.put_bytes(0, 12);
                    buf.put_slice(name);
                });

                write_box(buf, b"minf", |buf| {
                    if codec.is_video() {
                        write_full_box(buf, b"vmhd", 0, 1, |buf| buf.put_bytes(0, 8));
                    } else {
                        write_full_box(buf, b"smhd", 0, 0, |buf| buf.put_u32(0));
                    }

                    write_box(buf, b"dinf", |buf| {
                        write_full_box(buf, b"dref", 0, 0, |buf| {
                            buf.put_u32(1);
                            write_full_box(buf, b"url ", 0, 1, |_| {});
                        });
                    });

                    write_box(buf, b"stbl", |buf| {
                        write_full_box(buf, b"stsd", 0, 0, |buf| {
                            buf.put_u32(1);
                            Self::write_sample_entry(buf, track, codec, width, height);
                        });
                        write_full_box(buf, b"stts", 0, 0, |buf| buf.put_u32(0));
                        write_full_box(buf, b"stsc", 0, 0, |buf| buf.put_u32(0));
                        write_full_box(buf, b"stsz", 0, 0, |buf| buf.put_u64(0));
                        write_full_box(buf, b"stco", 0, 0, |buf| buf.put_u32(0));
                    });
                });
            });
        });
    }

    fn write_sample_entry(
        buf: &mut BytesMut,
        track: &Track,
        codec: &CodecData,
        width: u32,
        height: u32,
    ) {
        match codec {
            CodecData::H264(h264) => write_box(buf, b"avc1", |buf| {
                buf.put_bytes(0, 6);
                buf.put_u16(1); // data_reference_index
                buf.put_bytes(0, 16); // pre_defined + reserved
                buf.put_u16(width as u16);
                buf.put_u16(height as u16);
                buf.put_u32(0x0048_0000); // 72 dpi
                buf.put_u32(0x0048_0000);
                buf.put_u32(0);
                buf.put_u16(1); // frame_count
                buf.put_bytes(0, 32); // compressorname
                buf.put_u16(0x0018); // depth
                buf.put_i16(-1);
                write_box(buf, b"avcC", |buf| buf.put_slice(&h264.config.raw));
            }),
            CodecData::Aac(aac) => write_box(buf, b"mp4a", |buf| {
                buf.put_bytes(0, 6);
                buf.put_u16(1); // data_reference_index
                buf.put_u64(0);
                buf.put_u16(u16::from(aac.config.channels().max(1)));
                buf.put_u16(16); // samplesize
                buf.put_u32(0);
                buf.put_u32(aac.config.sampling_frequency.min(0xFFFF) << 16);
                write_full_box(buf, b"esds", 0, 0, |buf| {
                    write_descriptor(buf, 0x03, |buf| {
                        buf.put_u16(track.id as u16); // ES_ID
                        buf.put_u8(0);
                        write_descriptor(buf, 0x04, |buf| {
                            buf.put_u8(0x40); // MPEG-4 audio
                            buf.put_u8(0x15); // audio stream
                            buf.put_uint(0, 3); // bufferSizeDB
                            buf.put_u32(0); // maxBitrate
                            buf.put_u32(0); // avgBitrate
                            write_descriptor(buf, 0x05, |buf| buf.put_slice(&aac.config.raw));
                        });
                        write_descriptor(buf, 0x06, |buf| buf.put_u8(0x02));
                    });
                });
            }),
        }
    }
}

impl Muxer for Fmp4Muxer {
    fn write_header(&mut self, codecs: &[CodecData]) -> Result<(), MuxError> {
        if codecs.is_empty() {
            return Err(MuxError::NoTracks);
        }

        for codec in codecs {
            if let CodecData::H264(h264) = codec {
                if h264.width == 0 || h264.height == 0 || h264.config.raw.is_empty() {
                    return Err(MuxError::InvalidCodec("H.264 track without dimensions"));
                }
            }
        }

        self.tracks = codecs
            .iter()
            .enumerate()
            .map(|(i, codec)| Track::new(i as u32 + 1, codec, &self.config))
            .collect();
        self.sequence = 0;
        self.origin = None;
        Ok(())
    }

    fn init(&self, codecs: &[CodecData]) -> Result<MuxInit, MuxError> {
        if self.tracks.is_empty() || self.tracks.len() != codecs.len() {
            return Err(MuxError::NotInitialized);
        }

        let header = codecs
            .iter()
            .map(CodecData::codec_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut segment = BytesMut::with_capacity(1024);
        Self::write_ftyp(&mut segment);
        self.write_moov(&mut segment, codecs);

        Ok(MuxInit {
            header: Bytes::from(header),
            segment: segment.freeze(),
        })
    }

    fn write_packet(&mut self, packet: &Packet, flush: bool) -> Result<Option<Bytes>, MuxError> {
        if self.tracks.is_empty() {
            return Err(MuxError::NotInitialized);
        }

        let origin = *self.origin.get_or_insert(packet.dts);
        let track = self
            .tracks
            .get_mut(packet.track)
            .ok_or(MuxError::UnknownTrack(packet.track))?;

        let sample = PendingSample {
            decode_time: track.ticks(packet.dts.saturating_sub(origin)),
            composition_offset: track.ticks(packet.composition_offset) as i32,
            keyframe: packet.is_keyframe,
            data: packet.data.clone(),
        };

        let mut out = BytesMut::new();

        if let Some(prev) = track.pending.replace(sample) {
            let next_time = track.pending.as_ref().map_or(0, |s| s.decode_time);
            let duration = match next_time.saturating_sub(prev.decode_time) {
                0 => track.last_duration,
                d => d as u32,
            };
            track.last_duration = duration;
            self.sequence += 1;
            Self::write_fragment(&mut out, self.sequence, track.id, &prev, duration);
        }

        if flush {
            if let Some(last) = track.pending.take() {
                self.sequence += 1;
                Self::write_fragment(&mut out, self.sequence, track.id, &last, track.last_duration);
            }
        }

        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out.freeze()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AacCodec, H264Codec};
    use crate::mux::boxes::{find_box, iter_boxes};

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xF6, 0x40];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

    fn h264() -> CodecData {
        CodecData::H264(
            H264Codec::from_parameter_sets(Bytes::from_static(SPS), Bytes::from_static(PPS))
                .unwrap(),
        )
    }

    fn aac() -> CodecData {
        CodecData::Aac(AacCodec::from_config_bytes(Bytes::from_static(&[0x12, 0x10])).unwrap())
    }

    fn frame(ms: u64, key: bool) -> Packet {
        Packet::video(
            0,
            Duration::from_millis(ms),
            Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x88]),
            key,
        )
    }

    fn muxer(codecs: &[CodecData]) -> Fmp4Muxer {
        let mut muxer = Fmp4MuxerFactory::default().new_muxer();
        muxer.write_header(codecs).unwrap();
        muxer
    }

    #[test]
    fn test_init_segment_layout() {
        let codecs = vec![h264(), aac()];
        let init = muxer(&codecs).init(&codecs).unwrap();

        assert_eq!(init.header.as_ref(), b"avc1.42c01e,mp4a.40.2");
        assert_eq!(&init.segment[4..8], b"ftyp");

        let moov = find_box(&init.segment, b"moov").unwrap();
        assert!(find_box(moov, b"mvhd").is_some());
        assert!(find_box(moov, b"mvex").is_some());
        let traks = iter_boxes(moov).filter(|(k, _)| k == b"trak").count();
        assert_eq!(traks, 2);
    }

    #[test]
    fn test_video_sample_entry_dimensions() {
        let codecs = vec![h264()];
        let init = muxer(&codecs).init(&codecs).unwrap();

        let moov = find_box(&init.segment, b"moov").unwrap();
        let trak = find_box(moov, b"trak").unwrap();
        let tkhd = find_box(trak, b"tkhd").unwrap();
        // width/height are the last two 16.16 fields
        let w = u32::from_be_bytes(tkhd[tkhd.len() - 8..tkhd.len() - 4].try_into().unwrap());
        let h = u32::from_be_bytes(tkhd[tkhd.len() - 4..].try_into().unwrap());
        assert_eq!((w >> 16, h >> 16), (640, 480));
    }

    #[test]
    fn test_first_packet_is_buffered() {
        let mut muxer = muxer(&[h264()]);
        assert!(muxer.write_packet(&frame(0, true), false).unwrap().is_none());

        let fragment = muxer.write_packet(&frame(40, false), false).unwrap().unwrap();
        assert_eq!(&fragment[4..8], b"moof");
        assert_eq!(muxer.sequence_number(), 1);
    }

    #[test]
    fn test_fragment_offsets_and_duration() {
        let mut muxer = muxer(&[h264()]);
        muxer.write_packet(&frame(1000, true), false).unwrap();
        let fragment = muxer.write_packet(&frame(1040, false), false).unwrap().unwrap();

        let moof = find_box(&fragment, b"moof").unwrap();
        let mdat = find_box(&fragment, b"mdat").unwrap();
        assert_eq!(mdat, &[0, 0, 0, 2, 0x65, 0x88]);

        let traf = find_box(moof, b"traf").unwrap();
        let tfdt = find_box(traf, b"tfdt").unwrap();
        // rebased to the first packet
        assert_eq!(&tfdt[4..12], &0u64.to_be_bytes());

        let trun = find_box(traf, b"trun").unwrap();
        let data_offset = i32::from_be_bytes(trun[8..12].try_into().unwrap());
        let moof_size = moof.len() + 8;
        assert_eq!(data_offset as usize, moof_size + 8);

        let duration = u32::from_be_bytes(trun[12..16].try_into().unwrap());
        assert_eq!(duration, 3600); // 40ms at 90kHz

        let flags = u32::from_be_bytes(trun[20..24].try_into().unwrap());
        assert_eq!(flags, SAMPLE_FLAGS_SYNC);
    }

    #[test]
    fn test_flush_emits_pending_sample() {
        let mut muxer = muxer(&[h264()]);
        let out = muxer.write_packet(&frame(0, true), true).unwrap().unwrap();
        assert_eq!(&out[4..8], b"moof");
        assert_eq!(muxer.sequence_number(), 1);

        // Nothing left pending
        assert!(muxer.write_packet(&frame(40, false), false).unwrap().is_none());
    }

    #[test]
    fn test_unknown_track_and_uninitialized() {
        let mut fresh = Fmp4Muxer::new(Fmp4Config::default());
        assert_eq!(
            fresh.write_packet(&frame(0, true), false).unwrap_err(),
            MuxError::NotInitialized
        );
        assert_eq!(fresh.init(&[h264()]).unwrap_err(), MuxError::NotInitialized);

        let mut muxer = muxer(&[h264()]);
        let mut packet = frame(0, true);
        packet.track = 3;
        assert_eq!(
            muxer.write_packet(&packet, false).unwrap_err(),
            MuxError::UnknownTrack(3)
        );
    }

    #[test]
    fn test_no_tracks_rejected() {
        let mut muxer = Fmp4Muxer::new(Fmp4Config::default());
        assert_eq!(muxer.write_header(&[]).unwrap_err(), MuxError::NoTracks);
    }

    #[test]
    fn test_audio_uses_sample_rate_timescale() {
        let mut muxer = muxer(&[aac()]);
        let a = Packet::audio(0, Duration::ZERO, Bytes::from_static(&[0x21, 0x10]));
        let b = Packet::audio(0, Duration::from_micros(23_220), Bytes::from_static(&[0x21]));
        assert!(muxer.write_packet(&a, false).unwrap().is_none());

        let fragment = muxer.write_packet(&b, false).unwrap().unwrap();
        let moof = find_box(&fragment, b"moof").unwrap();
        let traf = find_box(moof, b"traf").unwrap();
        let trun = find_box(traf, b"trun").unwrap();
        let duration = u32::from_be_bytes(trun[12..16].try_into().unwrap());
        // 23.22ms at 44.1kHz
        assert_eq!(duration, 1024);
    }
}
