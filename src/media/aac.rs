//! AAC audio configuration
//!
//! AAC frames are relayed raw (no ADTS headers). The `esds` box in the init
//! segment carries the AudioSpecificConfig:
//!
//! ```text
//! audioObjectType (5 bits) | samplingFrequencyIndex (4 bits)
//! | [samplingFrequency (24 bits) if index == 0xF]
//! | channelConfiguration (4 bits) | GASpecificConfig ...
//! ```

use bytes::Bytes;

use crate::error::MediaError;

/// AudioSpecificConfig
#[derive(Debug, Clone)]
pub struct AudioSpecificConfig {
    /// Audio object type (profile)
    pub audio_object_type: u8,
    /// Sampling frequency index
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Frame length flag (960 or 1024 samples)
    pub frame_length_flag: bool,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Standard sampling frequencies by index
    const SAMPLING_FREQUENCIES: [u32; 16] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0,
        0, 0,
    ];

    /// Parse from raw AudioSpecificConfig bytes
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacConfig);
        }

        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, channel_configuration, frame_length_flag) =
            if sampling_frequency_index == 0x0F {
                // Explicit 24-bit frequency pushes channel config out to byte 4
                if data.len() < 5 {
                    return Err(MediaError::InvalidAacConfig);
                }
                let f0 = (data[1] & 0x7F) as u32;
                let f1 = data[2] as u32;
                let f2 = data[3] as u32;
                let f3 = (data[4] >> 7) as u32;
                let freq = (f0 << 17) | (f1 << 9) | (f2 << 1) | f3;
                let channels = (data[4] >> 3) & 0x0F;
                (freq, channels, data[4] & 0x04 != 0)
            } else {
                let freq = Self::SAMPLING_FREQUENCIES[sampling_frequency_index as usize];
                if freq == 0 {
                    return Err(MediaError::InvalidAacConfig);
                }
                (freq, (b1 >> 3) & 0x0F, b1 & 0x04 != 0)
            };

        if audio_object_type == 0 || sampling_frequency == 0 {
            return Err(MediaError::InvalidAacConfig);
        }

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            frame_length_flag,
            raw: data,
        })
    }

    /// Build the two-byte config for a standard sampling rate
    pub fn new(
        audio_object_type: u8,
        sampling_frequency: u32,
        channel_configuration: u8,
    ) -> Result<Self, MediaError> {
        let index = Self::SAMPLING_FREQUENCIES
            .iter()
            .position(|&f| f == sampling_frequency && f != 0)
            .ok_or(MediaError::InvalidAacConfig)? as u8;

        if audio_object_type == 0 || audio_object_type > 31 || channel_configuration > 7 {
            return Err(MediaError::InvalidAacConfig);
        }

        let b0 = (audio_object_type << 3) | (index >> 1);
        let b1 = ((index & 0x01) << 7) | (channel_configuration << 3);
        Self::parse(Bytes::copy_from_slice(&[b0, b1]))
    }

    /// Get channel count
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8, // 7.1
            _ => 0,
        }
    }

    /// Get samples per frame
    pub fn samples_per_frame(&self) -> u32 {
        if self.frame_length_flag {
            960
        } else {
            1024
        }
    }

    /// RFC 6381 codec string, e.g. `mp4a.40.2`
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.audio_object_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_specific_config_parse() {
        // AAC-LC, 44100 Hz, Stereo
        let data = Bytes::from_static(&[0x12, 0x10]);

        let config = AudioSpecificConfig::parse(data).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channel_configuration, 2);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.codec_string(), "mp4a.40.2");
    }

    #[test]
    fn test_audio_specific_config_various_rates() {
        let test_cases = [
            (&[0x12, 0x10][..], 44100, 2),
            (&[0x11, 0x90][..], 48000, 2),
            (&[0x11, 0x88][..], 48000, 1),
        ];

        for (data, expected_freq, expected_channels) in test_cases {
            let config = AudioSpecificConfig::parse(Bytes::copy_from_slice(data)).unwrap();
            assert_eq!(
                config.sampling_frequency, expected_freq,
                "sampling_frequency mismatch for {:02X?}",
                data
            );
            assert_eq!(
                config.channel_configuration, expected_channels,
                "channel_configuration mismatch for {:02X?}",
                data
            );
        }
    }

    #[test]
    fn test_new_round_trips_through_parse() {
        let config = AudioSpecificConfig::new(2, 48000, 2).unwrap();
        assert_eq!(config.raw.as_ref(), &[0x11, 0x90]);
        assert_eq!(config.sampling_frequency_index, 3);

        assert!(AudioSpecificConfig::new(2, 12345, 2).is_err());
        assert!(AudioSpecificConfig::new(0, 48000, 2).is_err());
    }

    #[test]
    fn test_explicit_frequency() {
        // obj=2, index=0xF, freq=0x00AC44 (44100), channels=1
        // 00010 1111 | 000000001010110001000100 | 0001 | 000
        let data = Bytes::from_static(&[0x17, 0x80, 0x56, 0x22, 0x08]);
        let config = AudioSpecificConfig::parse(data).unwrap();
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channel_configuration, 1);
    }

    #[test]
    fn test_channels_mapping() {
        let mut config = AudioSpecificConfig::new(2, 44100, 2).unwrap();
        for (value, expected) in [(0, 0), (1, 1), (6, 6), (7, 8), (8, 0)] {
            config.channel_configuration = value;
            assert_eq!(config.channels(), expected);
        }
    }

    #[test]
    fn test_samples_per_frame() {
        let mut config = AudioSpecificConfig::new(2, 44100, 2).unwrap();
        assert_eq!(config.samples_per_frame(), 1024);
        config.frame_length_flag = true;
        assert_eq!(config.samples_per_frame(), 960);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            AudioSpecificConfig::parse(Bytes::from_static(&[0x12])).unwrap_err(),
            MediaError::InvalidAacConfig
        );
    }
}
