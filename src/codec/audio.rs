use super::{optional_positive, require_range, BufferRequirements, CodecInfo, EngineCore, EngineError, EngineOutput};
use crate::av::{keys, BufferFlag, BufferInfo, Format};
use crate::error::{AvcsError, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const MIME_MPEG: &str = "audio/mpeg";
pub const MIME_AAC: &str = "audio/mp4a-latm";
pub const MIME_FLAC: &str = "audio/flac";
pub const MIME_RAW: &str = "audio/raw";

/// Interleaved signed 16-bit PCM.
pub const SAMPLE_FORMAT_S16LE: i32 = 1;

const DEFAULT_AUDIO_BUFFER_SIZE: usize = 8192;
const AUDIO_BUFFER_COUNT: usize = 4;
const DEFAULT_AAC_BITRATE: i32 = 128_000;

/// MPEG-4 audio object type for AAC LC.
const AAC_OBJECT_TYPE_LC: u16 = 2;

/// MPEG-4 sampling frequency table, indexed by `sampling_frequency_index`.
const AAC_SAMPLE_RATES: [i32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub channels: i32,
    pub sample_rate: i32,
    pub bitrate: Option<i32>,
    pub max_input_size: Option<i32>,
}

impl AudioParams {
    fn parse(format: &Format) -> Result<Self> {
        Ok(Self {
            channels: require_range(format, keys::CHANNEL_COUNT, 1, 8)?,
            sample_rate: require_range(format, keys::SAMPLE_RATE, 8000, 192_000)?,
            bitrate: optional_positive(format, keys::BITRATE)?,
            max_input_size: optional_positive(format, keys::MAX_INPUT_SIZE)?,
        })
    }

    fn requirements(&self) -> BufferRequirements {
        let size = self
            .max_input_size
            .map_or(DEFAULT_AUDIO_BUFFER_SIZE, |s| s as usize);
        BufferRequirements {
            input_count: AUDIO_BUFFER_COUNT,
            input_size: size,
            output_count: AUDIO_BUFFER_COUNT,
            output_size: size,
        }
    }
}

const ADTS_HEADER_LEN: usize = 7;

/// 12-bit ADTS syncword.
fn is_adts(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF0 == 0xF0
}

/// Checks the frame sync of the compressed input for `mime`.
fn check_framing(mime: &str, data: &[u8]) -> std::result::Result<(), EngineError> {
    let synced = match mime {
        // 11-bit MPEG audio frame sync
        MIME_MPEG => data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0,
        // stream marker or 14-bit frame sync
        MIME_FLAC => data.starts_with(b"fLaC") || (data.len() >= 2 && data[0] == 0xFF && data[1] & 0xFC == 0xF8),
        // raw access units pass; an ADTS header needs layer 0 and all 7 bytes
        MIME_AAC if is_adts(data) => data.len() >= ADTS_HEADER_LEN && data[1] & 0x06 == 0,
        _ => true,
    };
    if synced {
        Ok(())
    } else {
        Err(EngineError::corrupt(format!("{} frame sync not found", mime)))
    }
}

/// Compressed audio to PCM.
#[derive(Debug)]
pub struct AudioDecoder {
    pub(crate) info: CodecInfo,
    pub(crate) core: EngineCore,
    pub(crate) params: Option<AudioParams>,
}

impl AudioDecoder {
    pub fn new(info: CodecInfo) -> Self {
        Self {
            info,
            core: EngineCore::default(),
            params: None,
        }
    }

    pub(crate) fn configure(&mut self, format: &Format) -> Result<()> {
        self.params = Some(AudioParams::parse(format)?);
        Ok(())
    }

    pub(crate) fn buffer_requirements(&self) -> Option<BufferRequirements> {
        self.params.as_ref().map(AudioParams::requirements)
    }

    pub(crate) fn send_input(
        &mut self,
        data: Bytes,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> std::result::Result<(), EngineError> {
        self.core.accept()?;
        if !data.is_empty() {
            check_framing(self.info.mime, &data)?;
            self.core.announce_format(&self.output_format());
        }
        if data.is_empty() && !flag.is_eos() {
            return Ok(());
        }
        let mut out_flag = BufferFlag::NONE;
        if flag.is_eos() {
            out_flag |= BufferFlag::EOS;
        }
        self.core.push(EngineOutput {
            data,
            pts_us: info.presentation_time_us,
            flag: out_flag,
        });
        Ok(())
    }

    pub(crate) fn output_format(&self) -> Format {
        let mut format = Format::new();
        if let Some(params) = &self.params {
            format.put_string_value(keys::CODEC_MIME, MIME_RAW);
            format.put_int_value(keys::CHANNEL_COUNT, params.channels);
            format.put_int_value(keys::SAMPLE_RATE, params.sample_rate);
            format.put_int_value(keys::AUDIO_SAMPLE_FORMAT, SAMPLE_FORMAT_S16LE);
        }
        format
    }
}

/// PCM to AAC LC.
#[derive(Debug)]
pub struct AudioEncoder {
    pub(crate) info: CodecInfo,
    pub(crate) core: EngineCore,
    pub(crate) params: Option<AudioParams>,
    codec_data_sent: bool,
}

impl AudioEncoder {
    pub fn new(info: CodecInfo) -> Self {
        Self {
            info,
            core: EngineCore::default(),
            params: None,
            codec_data_sent: false,
        }
    }

    pub(crate) fn configure(&mut self, format: &Format) -> Result<()> {
        let mut params = AudioParams::parse(format)?;
        if sample_rate_index(params.sample_rate).is_none() {
            return Err(AvcsError::InvalidVal(format!(
                "sample rate {} has no AAC frequency index",
                params.sample_rate
            )));
        }
        params.bitrate.get_or_insert(DEFAULT_AAC_BITRATE);
        self.params = Some(params);
        self.codec_data_sent = false;
        Ok(())
    }

    pub(crate) fn set_parameter(&mut self, format: &Format) -> Result<()> {
        let bitrate = optional_positive(format, keys::BITRATE)?;
        if let (Some(params), Some(bitrate)) = (self.params.as_mut(), bitrate) {
            log::debug!("{}: bitrate -> {}", self.info.name, bitrate);
            params.bitrate = Some(bitrate);
        }
        Ok(())
    }

    pub(crate) fn restart(&mut self) {
        self.codec_data_sent = false;
    }

    pub(crate) fn buffer_requirements(&self) -> Option<BufferRequirements> {
        self.params.as_ref().map(AudioParams::requirements)
    }

    pub(crate) fn send_input(
        &mut self,
        data: Bytes,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> std::result::Result<(), EngineError> {
        self.core.accept()?;
        if !data.is_empty() && !self.codec_data_sent {
            self.codec_data_sent = true;
            let config = self.audio_specific_config();
            self.core.announce_format(&self.output_format());
            self.core.push(EngineOutput {
                data: config,
                pts_us: info.presentation_time_us,
                flag: BufferFlag::CODEC_DATA,
            });
        }
        if data.is_empty() && !flag.is_eos() {
            return Ok(());
        }
        let mut out_flag = if data.is_empty() {
            BufferFlag::NONE
        } else {
            BufferFlag::SYNC_FRAME
        };
        if flag.is_eos() {
            out_flag |= BufferFlag::EOS;
        }
        self.core.push(EngineOutput {
            data,
            pts_us: info.presentation_time_us,
            flag: out_flag,
        });
        Ok(())
    }

    /// Two-byte AudioSpecificConfig: object type, frequency index, channels.
    fn audio_specific_config(&self) -> Bytes {
        let mut config = BytesMut::with_capacity(2);
        if let Some(params) = &self.params {
            let freq_index = sample_rate_index(params.sample_rate).unwrap_or(4) as u16;
            let channels = params.channels as u16;
            config.put_u16((AAC_OBJECT_TYPE_LC << 11) | (freq_index << 7) | (channels << 3));
        }
        config.freeze()
    }

    pub(crate) fn output_format(&self) -> Format {
        let mut format = Format::new();
        if let Some(params) = &self.params {
            format.put_string_value(keys::CODEC_MIME, MIME_AAC);
            format.put_int_value(keys::CHANNEL_COUNT, params.channels);
            format.put_int_value(keys::SAMPLE_RATE, params.sample_rate);
            format.put_int_value(keys::BITRATE, params.bitrate.unwrap_or(DEFAULT_AAC_BITRATE));
            format.put_buffer(keys::CODEC_CONFIG, &self.audio_specific_config());
        }
        format
    }
}

fn sample_rate_index(sample_rate: i32) -> Option<usize> {
    AAC_SAMPLE_RATES.iter().position(|&rate| rate == sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecRegistry;
    use crate::codec::CodecEngine;
    use pretty_assertions::assert_eq;

    fn stereo_44k() -> Format {
        let mut format = Format::new();
        format.put_int_value(keys::CHANNEL_COUNT, 2);
        format.put_int_value(keys::SAMPLE_RATE, 44100);
        format
    }

    #[test]
    fn test_decoder_requires_keys() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("mp3-decoder").unwrap();
        assert!(engine.configure(&Format::new()).is_err());

        let mut format = stereo_44k();
        format.put_int_value(keys::CHANNEL_COUNT, 9);
        assert!(engine.configure(&format).is_err());
        assert!(engine.buffer_requirements().is_err());

        engine.configure(&stereo_44k()).unwrap();
        assert_eq!(engine.buffer_requirements().unwrap().input_size, DEFAULT_AUDIO_BUFFER_SIZE);
    }

    #[test]
    fn test_mp3_decode_and_eos() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("mp3-decoder").unwrap();
        engine.configure(&stereo_44k()).unwrap();

        let frame = Bytes::from_static(&[0xFF, 0xFB, 0x90, 0x64]);
        engine
            .send_input(frame.clone(), BufferInfo::new(0, 4, 0), BufferFlag::NONE)
            .unwrap();
        let change = engine.take_output_format_change().unwrap();
        assert_eq!(change.get_string_value(keys::CODEC_MIME), Some(MIME_RAW));
        assert!(engine.take_output_format_change().is_none());

        engine
            .send_input(Bytes::new(), BufferInfo::new(26_000, 0, 0), BufferFlag::EOS)
            .unwrap();
        assert_eq!(engine.receive_output().unwrap().data, frame);
        let eos = engine.receive_output().unwrap();
        assert!(eos.flag.is_eos());
        assert!(eos.data.is_empty());
        assert!(engine.receive_output().is_none());

        let after = engine.send_input(frame, BufferInfo::default(), BufferFlag::NONE);
        assert_eq!(after.unwrap_err().code, super::super::ENGINE_ERR_AFTER_EOS);
    }

    #[test]
    fn test_corrupt_mp3_rejected() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("mp3-decoder").unwrap();
        engine.configure(&stereo_44k()).unwrap();
        let err = engine
            .send_input(Bytes::from_static(&[0x00, 0x11]), BufferInfo::default(), BufferFlag::NONE)
            .unwrap_err();
        assert_eq!(err.code, super::super::ENGINE_ERR_CORRUPT_STREAM);
    }

    #[test]
    fn test_aac_decoder_checks_adts_header() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("aac-decoder").unwrap();
        engine.configure(&stereo_44k()).unwrap();

        let adts = Bytes::from_static(&[0xFF, 0xF1, 0x50, 0x80, 0x02, 0x1F, 0xFC, 0x21]);
        engine.send_input(adts, BufferInfo::new(0, 8, 0), BufferFlag::NONE).unwrap();
        let raw_au = Bytes::from_static(&[0x21, 0x10, 0x04, 0x60]);
        engine.send_input(raw_au, BufferInfo::new(23_000, 4, 0), BufferFlag::NONE).unwrap();

        for bad in [&[0xFF, 0xF7, 0x50, 0x80, 0x02, 0x1F, 0xFC][..], &[0xFF, 0xF1, 0x50][..]] {
            let err = engine
                .send_input(Bytes::copy_from_slice(bad), BufferInfo::default(), BufferFlag::NONE)
                .unwrap_err();
            assert_eq!(err.code, super::super::ENGINE_ERR_CORRUPT_STREAM);
        }
    }

    #[test]
    fn test_aac_encoder_codec_data_first() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("aac-encoder").unwrap();
        assert!(matches!(engine, CodecEngine::AudioEncoder(_)));
        engine.configure(&stereo_44k()).unwrap();

        engine
            .send_input(Bytes::from_static(&[1, 2, 3, 4]), BufferInfo::new(0, 4, 0), BufferFlag::NONE)
            .unwrap();
        let csd = engine.receive_output().unwrap();
        assert!(csd.flag.contains(BufferFlag::CODEC_DATA));
        // AAC LC, 44.1 kHz, stereo
        assert_eq!(&csd.data[..], &[0x12, 0x10]);
        assert!(engine.receive_output().unwrap().flag.contains(BufferFlag::SYNC_FRAME));
    }

    #[test]
    fn test_aac_encoder_rejects_unindexed_rate() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("aac-encoder").unwrap();
        let mut format = stereo_44k();
        format.put_int_value(keys::SAMPLE_RATE, 44000);
        assert!(engine.configure(&format).is_err());
    }

    #[test]
    fn test_set_parameter_updates_bitrate() {
        let mut engine = CodecRegistry::with_builtin().create_by_name("aac-encoder").unwrap();
        engine.configure(&stereo_44k()).unwrap();
        let mut update = Format::new();
        update.put_int_value(keys::BITRATE, 96_000);
        update.put_string_value("vendor.unknown", "ignored");
        engine.set_parameter(&update).unwrap();
        assert_eq!(engine.output_format().get_int_value(keys::BITRATE), Some(96_000));
    }
}
