//! # Codec Engines
//!
//! The session layer drives bitstream processing through [`CodecEngine`], a
//! closed set of codec families sharing one capability surface:
//! `configure`, `set_parameter`, `send_input`, `receive_output`, `flush` and
//! `reset`. Engines are looked up by name or by `(mime, kind)` in the
//! [`CodecRegistry`].
//!
//! The built-in engines are pass-through stand-ins for the real bitstream
//! algorithms. They validate configuration and framing the way a real engine
//! would, announce the discovered output format with their first output and
//! report corrupt input as an [`EngineError`], which is enough to exercise the
//! full lifecycle above them.

use crate::av::{BufferFlag, BufferInfo, CodecKind, Format, MediaKind};
use crate::error::{AvcsError, ErrorCode, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use thiserror::Error;

pub mod audio;
pub mod registry;
pub mod video;

pub use audio::{AudioDecoder, AudioEncoder};
pub use registry::{CodecInfo, CodecRegistry};
pub use video::{VideoDecoder, VideoEncoder};

/// Engine sub-code: input framing is not a valid bitstream.
pub const ENGINE_ERR_CORRUPT_STREAM: i32 = -1001;
/// Engine sub-code: input arrived after end of stream.
pub const ENGINE_ERR_AFTER_EOS: i32 = -1002;

/// Fault raised by an engine while processing data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine fault {code}: {msg}")]
pub struct EngineError {
    pub code: i32,
    pub msg: String,
}

impl EngineError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self {
            code: ENGINE_ERR_CORRUPT_STREAM,
            msg: msg.into(),
        }
    }
}

impl From<EngineError> for AvcsError {
    fn from(err: EngineError) -> Self {
        AvcsError::Unsupported {
            code: ErrorCode::UnsupportStream,
            msg: err.to_string(),
        }
    }
}

/// One buffer produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub data: Bytes,
    pub pts_us: i64,
    pub flag: BufferFlag,
}

impl EngineOutput {
    pub fn info(&self) -> BufferInfo {
        BufferInfo::new(self.pts_us, self.data.len() as u32, 0)
    }
}

/// Pool geometry an engine needs, known once it is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    pub input_count: usize,
    pub input_size: usize,
    pub output_count: usize,
    pub output_size: usize,
}

/// Output queue and end-of-stream bookkeeping shared by every family.
#[derive(Debug, Default)]
pub(crate) struct EngineCore {
    pending: VecDeque<EngineOutput>,
    eos_received: bool,
    format_announced: bool,
    format_change: Option<Format>,
}

impl EngineCore {
    pub(crate) fn accept(&self) -> std::result::Result<(), EngineError> {
        if self.eos_received {
            return Err(EngineError {
                code: ENGINE_ERR_AFTER_EOS,
                msg: "input after end of stream".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, output: EngineOutput) {
        if output.flag.is_eos() {
            self.eos_received = true;
        }
        self.pending.push_back(output);
    }

    /// Records `format` as the output format, once per stream.
    pub(crate) fn announce_format(&mut self, format: &Format) {
        if !self.format_announced {
            self.format_announced = true;
            self.format_change = Some(format.clone());
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.eos_received = false;
    }

    fn reset(&mut self) {
        *self = EngineCore::default();
    }
}

/// Fetches a required integer key and checks its range.
pub(crate) fn require_range(format: &Format, key: &str, min: i32, max: i32) -> Result<i32> {
    let value = format
        .get_int_value(key)
        .ok_or_else(|| AvcsError::InvalidVal(format!("missing required key {}", key)))?;
    if value < min || value > max {
        return Err(AvcsError::InvalidVal(format!(
            "{} = {} outside [{}, {}]",
            key, value, min, max
        )));
    }
    Ok(value)
}

/// Reads an optional positive integer key.
pub(crate) fn optional_positive(format: &Format, key: &str) -> Result<Option<i32>> {
    match format.get_int_value(key) {
        Some(v) if v <= 0 => Err(AvcsError::InvalidVal(format!("{} must be positive, got {}", key, v))),
        other => Ok(other),
    }
}

#[derive(Debug)]
pub enum CodecEngine {
    AudioDecoder(AudioDecoder),
    AudioEncoder(AudioEncoder),
    VideoDecoder(VideoDecoder),
    VideoEncoder(VideoEncoder),
}

impl CodecEngine {
    pub fn info(&self) -> &CodecInfo {
        match self {
            CodecEngine::AudioDecoder(e) => &e.info,
            CodecEngine::AudioEncoder(e) => &e.info,
            CodecEngine::VideoDecoder(e) => &e.info,
            CodecEngine::VideoEncoder(e) => &e.info,
        }
    }

    pub fn kind(&self) -> CodecKind {
        self.info().kind
    }

    pub fn media(&self) -> MediaKind {
        self.info().media
    }

    /// Validates and applies a full configuration. On error the engine keeps
    /// no part of `format`.
    pub fn configure(&mut self, format: &Format) -> Result<()> {
        match self {
            CodecEngine::AudioDecoder(e) => e.configure(format),
            CodecEngine::AudioEncoder(e) => e.configure(format),
            CodecEngine::VideoDecoder(e) => e.configure(format),
            CodecEngine::VideoEncoder(e) => e.configure(format),
        }
    }

    /// Applies the keys this engine understands; unknown keys are ignored.
    pub fn set_parameter(&mut self, format: &Format) -> Result<()> {
        match self {
            CodecEngine::AudioDecoder(_) | CodecEngine::VideoDecoder(_) => Ok(()),
            CodecEngine::AudioEncoder(e) => e.set_parameter(format),
            CodecEngine::VideoEncoder(e) => e.set_parameter(format),
        }
    }

    pub fn buffer_requirements(&self) -> Result<BufferRequirements> {
        let requirements = match self {
            CodecEngine::AudioDecoder(e) => e.buffer_requirements(),
            CodecEngine::AudioEncoder(e) => e.buffer_requirements(),
            CodecEngine::VideoDecoder(e) => e.buffer_requirements(),
            CodecEngine::VideoEncoder(e) => e.buffer_requirements(),
        };
        requirements.ok_or_else(|| AvcsError::InvalidState("engine is not configured".into()))
    }

    pub fn send_input(
        &mut self,
        data: Bytes,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> std::result::Result<(), EngineError> {
        match self {
            CodecEngine::AudioDecoder(e) => e.send_input(data, info, flag),
            CodecEngine::AudioEncoder(e) => e.send_input(data, info, flag),
            CodecEngine::VideoDecoder(e) => e.send_input(data, info, flag),
            CodecEngine::VideoEncoder(e) => e.send_input(data, info, flag),
        }
    }

    pub fn has_output(&self) -> bool {
        !self.core().pending.is_empty()
    }

    pub fn receive_output(&mut self) -> Option<EngineOutput> {
        self.core_mut().pending.pop_front()
    }

    /// Output format discovered since the last call, reported once per stream.
    pub fn take_output_format_change(&mut self) -> Option<Format> {
        self.core_mut().format_change.take()
    }

    pub fn output_format(&self) -> Format {
        match self {
            CodecEngine::AudioDecoder(e) => e.output_format(),
            CodecEngine::AudioEncoder(e) => e.output_format(),
            CodecEngine::VideoDecoder(e) => e.output_format(),
            CodecEngine::VideoEncoder(e) => e.output_format(),
        }
    }

    /// Drops queued work but keeps the configuration.
    pub fn flush(&mut self) {
        match self {
            CodecEngine::AudioEncoder(e) => e.restart(),
            CodecEngine::VideoEncoder(e) => e.restart(),
            _ => {}
        }
        self.core_mut().flush();
    }

    /// Returns the engine to its freshly created state.
    pub fn reset(&mut self) {
        match self {
            CodecEngine::AudioDecoder(e) => e.params = None,
            CodecEngine::AudioEncoder(e) => {
                e.params = None;
                e.restart();
            }
            CodecEngine::VideoDecoder(e) => e.params = None,
            CodecEngine::VideoEncoder(e) => {
                e.params = None;
                e.restart();
            }
        }
        self.core_mut().reset();
    }

    pub fn supports_output_surface(&self) -> bool {
        matches!(self, CodecEngine::VideoDecoder(_))
    }

    pub fn supports_input_surface(&self) -> bool {
        matches!(self, CodecEngine::VideoEncoder(_))
    }

    fn core(&self) -> &EngineCore {
        match self {
            CodecEngine::AudioDecoder(e) => &e.core,
            CodecEngine::AudioEncoder(e) => &e.core,
            CodecEngine::VideoDecoder(e) => &e.core,
            CodecEngine::VideoEncoder(e) => &e.core,
        }
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        match self {
            CodecEngine::AudioDecoder(e) => &mut e.core,
            CodecEngine::AudioEncoder(e) => &mut e.core,
            CodecEngine::VideoDecoder(e) => &mut e.core,
            CodecEngine::VideoEncoder(e) => &mut e.core,
        }
    }
}
