use super::{optional_positive, require_range, BufferRequirements, CodecInfo, EngineCore, EngineError, EngineOutput};
use crate::av::{keys, BufferFlag, BufferInfo, Format};
use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};

pub const MIME_AVC: &str = "video/avc";
pub const MIME_HEVC: &str = "video/hevc";
pub const MIME_RAW: &str = "video/raw";

/// Semi-planar 4:2:0, luma plane followed by interleaved chroma.
pub const PIXEL_FORMAT_NV12: i32 = 1;

const VIDEO_BUFFER_COUNT: usize = 4;
const MIN_VIDEO_BUFFER_SIZE: usize = 4096;
/// Room for the start code and NAL header the encoder prepends.
const ENCODER_OUTPUT_OVERHEAD: usize = 64;
const DEFAULT_FRAME_RATE: i32 = 30;
const DEFAULT_VIDEO_BITRATE: i32 = 2_000_000;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Parameter sets emitted ahead of the first coded frame (Baseline, level 3.0).
const AVC_PARAMETER_SETS: [u8; 16] = [
    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
    0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80, // PPS
];

const NAL_IDR: u8 = 0x65;
const NAL_NON_IDR: u8 = 0x41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: i32,
    pub height: i32,
    pub frame_rate: Option<i32>,
    pub bitrate: Option<i32>,
    pub max_input_size: Option<i32>,
}

impl VideoParams {
    fn parse(format: &Format) -> Result<Self> {
        Ok(Self {
            width: require_range(format, keys::WIDTH, 1, 8192)?,
            height: require_range(format, keys::HEIGHT, 1, 8192)?,
            frame_rate: optional_positive(format, keys::FRAME_RATE)?,
            bitrate: optional_positive(format, keys::BITRATE)?,
            max_input_size: optional_positive(format, keys::MAX_INPUT_SIZE)?,
        })
    }

    /// Bytes of one NV12 frame.
    fn frame_size(&self) -> usize {
        (self.width as usize * self.height as usize * 3 / 2).max(MIN_VIDEO_BUFFER_SIZE)
    }
}

/// Checks for an Annex-B start code at the head of the access unit.
fn check_annex_b(mime: &str, data: &[u8]) -> std::result::Result<(), EngineError> {
    if data.starts_with(&START_CODE) || data.starts_with(&START_CODE[1..]) {
        Ok(())
    } else {
        Err(EngineError::corrupt(format!("{} access unit lacks a start code", mime)))
    }
}

/// Annex-B AVC/HEVC to raw frames.
#[derive(Debug)]
pub struct VideoDecoder {
    pub(crate) info: CodecInfo,
    pub(crate) core: EngineCore,
    pub(crate) params: Option<VideoParams>,
}

impl VideoDecoder {
    pub fn new(info: CodecInfo) -> Self {
        Self {
            info,
            core: EngineCore::default(),
            params: None,
        }
    }

    pub(crate) fn configure(&mut self, format: &Format) -> Result<()> {
        self.params = Some(VideoParams::parse(format)?);
        Ok(())
    }

    pub(crate) fn buffer_requirements(&self) -> Option<BufferRequirements> {
        self.params.as_ref().map(|params| {
            let input_size = params
                .max_input_size
                .map_or(params.frame_size(), |s| s as usize);
            BufferRequirements {
                input_count: VIDEO_BUFFER_COUNT,
                input_size,
                output_count: VIDEO_BUFFER_COUNT,
                output_size: input_size.max(params.frame_size()),
            }
        })
    }

    pub(crate) fn send_input(
        &mut self,
        data: Bytes,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> std::result::Result<(), EngineError> {
        self.core.accept()?;
        if !data.is_empty() {
            check_annex_b(self.info.mime, &data)?;
            self.core.announce_format(&self.output_format());
        }
        if data.is_empty() && !flag.is_eos() {
            return Ok(());
        }
        let mut out_flag = BufferFlag::NONE;
        if flag.contains(BufferFlag::SYNC_FRAME) {
            out_flag |= BufferFlag::SYNC_FRAME;
        }
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
            format.put_int_value(keys::WIDTH, params.width);
            format.put_int_value(keys::HEIGHT, params.height);
            format.put_int_value(keys::PIXEL_FORMAT, PIXEL_FORMAT_NV12);
        }
        format
    }
}

/// Raw frames to Annex-B AVC.
#[derive(Debug)]
pub struct VideoEncoder {
    pub(crate) info: CodecInfo,
    pub(crate) core: EngineCore,
    pub(crate) params: Option<VideoParams>,
    parameter_sets_sent: bool,
    frames_encoded: u64,
}

impl VideoEncoder {
    pub fn new(info: CodecInfo) -> Self {
        Self {
            info,
            core: EngineCore::default(),
            params: None,
            parameter_sets_sent: false,
            frames_encoded: 0,
        }
    }

    pub(crate) fn configure(&mut self, format: &Format) -> Result<()> {
        let mut params = VideoParams::parse(format)?;
        params.frame_rate.get_or_insert(DEFAULT_FRAME_RATE);
        params.bitrate.get_or_insert(DEFAULT_VIDEO_BITRATE);
        self.params = Some(params);
        self.restart();
        Ok(())
    }

    pub(crate) fn set_parameter(&mut self, format: &Format) -> Result<()> {
        let bitrate = optional_positive(format, keys::BITRATE)?;
        let frame_rate = optional_positive(format, keys::FRAME_RATE)?;
        if let Some(params) = self.params.as_mut() {
            if let Some(bitrate) = bitrate {
                params.bitrate = Some(bitrate);
            }
            if let Some(frame_rate) = frame_rate {
                params.frame_rate = Some(frame_rate);
            }
            log::debug!(
                "{}: bitrate={:?} frame_rate={:?}",
                self.info.name,
                params.bitrate,
                params.frame_rate
            );
        }
        Ok(())
    }

    pub(crate) fn restart(&mut self) {
        self.parameter_sets_sent = false;
        self.frames_encoded = 0;
    }

    pub(crate) fn buffer_requirements(&self) -> Option<BufferRequirements> {
        self.params.as_ref().map(|params| {
            let input_size = params
                .max_input_size
                .map_or(params.frame_size(), |s| s as usize);
            BufferRequirements {
                input_count: VIDEO_BUFFER_COUNT,
                input_size,
                output_count: VIDEO_BUFFER_COUNT,
                output_size: input_size + ENCODER_OUTPUT_OVERHEAD,
            }
        })
    }

    pub(crate) fn send_input(
        &mut self,
        data: Bytes,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> std::result::Result<(), EngineError> {
        self.core.accept()?;
        if !data.is_empty() && !self.parameter_sets_sent {
            self.parameter_sets_sent = true;
            self.core.announce_format(&self.output_format());
            self.core.push(EngineOutput {
                data: Bytes::from_static(&AVC_PARAMETER_SETS),
                pts_us: info.presentation_time_us,
                flag: BufferFlag::CODEC_DATA,
            });
        }
        if data.is_empty() {
            if flag.is_eos() {
                self.core.push(EngineOutput {
                    data,
                    pts_us: info.presentation_time_us,
                    flag: BufferFlag::EOS,
                });
            }
            return Ok(());
        }

        let key_frame = self.frames_encoded == 0 || flag.contains(BufferFlag::SYNC_FRAME);
        self.frames_encoded += 1;

        let mut access_unit = BytesMut::with_capacity(START_CODE.len() + 1 + data.len());
        access_unit.put_slice(&START_CODE);
        access_unit.put_u8(if key_frame { NAL_IDR } else { NAL_NON_IDR });
        access_unit.put_slice(&data);

        let mut out_flag = BufferFlag::NONE;
        if key_frame {
            out_flag |= BufferFlag::SYNC_FRAME;
        }
        if flag.is_eos() {
            out_flag |= BufferFlag::EOS;
        }
        self.core.push(EngineOutput {
            data: access_unit.freeze(),
            pts_us: info.presentation_time_us,
            flag: out_flag,
        });
        Ok(())
    }

    pub(crate) fn output_format(&self) -> Format {
        let mut format = Format::new();
        if let Some(params) = &self.params {
            format.put_string_value(keys::CODEC_MIME, MIME_AVC);
            format.put_int_value(keys::WIDTH, params.width);
            format.put_int_value(keys::HEIGHT, params.height);
            format.put_int_value(keys::FRAME_RATE, params.frame_rate.unwrap_or(DEFAULT_FRAME_RATE));
            format.put_int_value(keys::BITRATE, params.bitrate.unwrap_or(DEFAULT_VIDEO_BITRATE));
            format.put_buffer(keys::CODEC_CONFIG, &AVC_PARAMETER_SETS);
        }
        format
    }
}
