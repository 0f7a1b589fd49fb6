use super::audio::{MIME_AAC, MIME_FLAC, MIME_MPEG};
use super::video::{MIME_AVC, MIME_HEVC};
use super::{AudioDecoder, AudioEncoder, CodecEngine, VideoDecoder, VideoEncoder};
use crate::av::{CodecKind, MediaKind};
use crate::error::{AvcsError, ErrorCode, Result};
use std::collections::HashMap;

/// Static description of one registered codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    pub name: &'static str,
    pub mime: &'static str,
    pub kind: CodecKind,
    pub media: MediaKind,
}

type Constructor = fn(CodecInfo) -> CodecEngine;

struct Entry {
    info: CodecInfo,
    construct: Constructor,
}

/// Name and MIME lookup for codec engines.
pub struct CodecRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<&'static str, usize>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry holding every built-in engine.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let audio = MediaKind::Audio;
        let video = MediaKind::Video;
        registry.register(info("mp3-decoder", MIME_MPEG, CodecKind::Decoder, audio), |i| {
            CodecEngine::AudioDecoder(AudioDecoder::new(i))
        });
        registry.register(info("aac-decoder", MIME_AAC, CodecKind::Decoder, audio), |i| {
            CodecEngine::AudioDecoder(AudioDecoder::new(i))
        });
        registry.register(info("flac-decoder", MIME_FLAC, CodecKind::Decoder, audio), |i| {
            CodecEngine::AudioDecoder(AudioDecoder::new(i))
        });
        registry.register(info("aac-encoder", MIME_AAC, CodecKind::Encoder, audio), |i| {
            CodecEngine::AudioEncoder(AudioEncoder::new(i))
        });
        registry.register(info("avc-decoder", MIME_AVC, CodecKind::Decoder, video), |i| {
            CodecEngine::VideoDecoder(VideoDecoder::new(i))
        });
        registry.register(info("hevc-decoder", MIME_HEVC, CodecKind::Decoder, video), |i| {
            CodecEngine::VideoDecoder(VideoDecoder::new(i))
        });
        registry.register(info("avc-encoder", MIME_AVC, CodecKind::Encoder, video), |i| {
            CodecEngine::VideoEncoder(VideoEncoder::new(i))
        });
        registry
    }

    /// Adds an engine; a later registration under the same name wins.
    pub fn register(&mut self, info: CodecInfo, construct: Constructor) {
        self.by_name.insert(info.name, self.entries.len());
        self.entries.push(Entry { info, construct });
    }

    pub fn find_by_name(&self, name: &str) -> Option<CodecInfo> {
        self.by_name.get(name).map(|&i| self.entries[i].info)
    }

    /// First engine registered for `mime` in direction `kind`.
    pub fn find_by_mime(&self, mime: &str, kind: CodecKind) -> Option<CodecInfo> {
        self.entries
            .iter()
            .find(|e| e.info.mime.eq_ignore_ascii_case(mime) && e.info.kind == kind)
            .map(|e| e.info)
    }

    pub fn create_by_name(&self, name: &str) -> Result<CodecEngine> {
        match self.by_name.get(name) {
            Some(&i) => Ok(self.instantiate(i)),
            None => Err(AvcsError::Unsupported {
                code: ErrorCode::Unsupport,
                msg: format!("no codec named {}", name),
            }),
        }
    }

    pub fn create_by_mime(&self, mime: &str, kind: CodecKind) -> Result<CodecEngine> {
        let index = self
            .entries
            .iter()
            .position(|e| e.info.mime.eq_ignore_ascii_case(mime) && e.info.kind == kind);
        match index {
            Some(i) => Ok(self.instantiate(i)),
            None => Err(AvcsError::Unsupported {
                code: unsupported_code(mime, kind),
                msg: format!("no {:?} for {}", kind, mime),
            }),
        }
    }

    pub fn codecs(&self) -> impl Iterator<Item = &CodecInfo> {
        self.entries.iter().map(|e| &e.info)
    }

    fn instantiate(&self, index: usize) -> CodecEngine {
        let entry = &self.entries[index];
        log::debug!("instantiating {} ({})", entry.info.name, entry.info.mime);
        (entry.construct)(entry.info)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn info(name: &'static str, mime: &'static str, kind: CodecKind, media: MediaKind) -> CodecInfo {
    CodecInfo {
        name,
        mime,
        kind,
        media,
    }
}

fn unsupported_code(mime: &str, kind: CodecKind) -> ErrorCode {
    let lower = mime.to_ascii_lowercase();
    match (lower.starts_with("audio/"), lower.starts_with("video/"), kind) {
        (true, _, CodecKind::Decoder) => ErrorCode::UnsupportAudDecType,
        (true, _, CodecKind::Encoder) => ErrorCode::UnsupportAudEncType,
        (_, true, CodecKind::Decoder) => ErrorCode::UnsupportVidDecType,
        (_, true, CodecKind::Encoder) => ErrorCode::UnsupportVidEncType,
        _ => ErrorCode::Unsupport,
    }
}
