//! In-memory media files addressed by `memory://` URIs.

use crate::av::{keys, Format, Sample};
use crate::error::{AvcsError, ErrorCode, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

pub const STORE_SCHEME: &str = "memory";

/// Container produced by a muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Mp4,
    M4a,
}

impl OutputFormat {
    pub fn as_u32(self) -> u32 {
        match self {
            OutputFormat::Mp4 => 0,
            OutputFormat::M4a => 1,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(OutputFormat::Mp4),
            1 => Some(OutputFormat::M4a),
            _ => None,
        }
    }

    /// Whether tracks of `mime` may be stored in this container.
    pub fn accepts(self, mime: &str) -> bool {
        match self {
            OutputFormat::Mp4 => mime.starts_with("audio/") || mime.starts_with("video/"),
            OutputFormat::M4a => mime.starts_with("audio/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceTrack {
    pub format: Format,
    pub samples: Vec<Sample>,
}

impl SourceTrack {
    /// Whether sample `i` is a seek target. A track without any key samples
    /// treats every sample as one.
    pub fn is_sync(&self, i: usize) -> bool {
        match self.samples.get(i) {
            Some(sample) => sample.is_key() || !self.samples.iter().any(Sample::is_key),
            None => false,
        }
    }

    pub fn duration_us(&self) -> i64 {
        self.samples.iter().map(|s| s.pts_us).max().unwrap_or(0)
    }
}

/// A readable media file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaSource {
    format: Format,
    tracks: Vec<SourceTrack>,
}

impl MediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.format.put_string_value(keys::TITLE, title);
        self
    }

    /// Appends a track; sample track indices are rewritten to match.
    pub fn with_track(mut self, format: Format, samples: Vec<Sample>) -> Self {
        let index = self.tracks.len() as u32;
        let samples = samples.into_iter().map(|s| s.with_track_index(index)).collect();
        self.tracks.push(SourceTrack { format, samples });
        self
    }

    /// Container format; track count and duration are derived from the tracks.
    pub fn format(&self) -> Format {
        let mut format = self.format.clone();
        format.put_int_value(keys::TRACK_COUNT, self.tracks.len() as i32);
        let duration = self.tracks.iter().map(SourceTrack::duration_us).max().unwrap_or(0);
        format.put_long_value(keys::DURATION, duration);
        format
    }

    pub fn tracks(&self) -> &[SourceTrack] {
        &self.tracks
    }
}

/// What a muxer wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxedFile {
    pub output_format: OutputFormat,
    pub rotation: i32,
    pub tracks: Vec<Format>,
    pub samples: Vec<Sample>,
    pub finalized: bool,
}

impl MuxedFile {
    fn new(output_format: OutputFormat) -> Self {
        Self {
            output_format,
            rotation: 0,
            tracks: Vec::new(),
            samples: Vec::new(),
            finalized: false,
        }
    }

    /// Reads a finalized file back as a source.
    pub fn to_source(&self) -> Result<MediaSource> {
        if !self.finalized {
            return Err(AvcsError::Failed {
                code: ErrorCode::DemuxerFailed,
                msg: "file has no trailer".into(),
            });
        }
        let mut source = MediaSource::new();
        for (index, format) in self.tracks.iter().enumerate() {
            let samples = self
                .samples
                .iter()
                .filter(|s| s.track_index as usize == index)
                .cloned()
                .collect();
            source = source.with_track(format.clone(), samples);
        }
        Ok(source)
    }
}

enum Entry {
    Source(Arc<MediaSource>),
    Sink(Arc<Mutex<MuxedFile>>),
}

/// Named media files shared by demuxer and muxer sessions.
#[derive(Default)]
pub struct MediaStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_source(&self, uri: &str, source: MediaSource) -> Result<()> {
        let key = parse_uri(uri)?;
        log::debug!("store: source {} ({} tracks)", key, source.tracks().len());
        self.entries.write().insert(key, Entry::Source(Arc::new(source)));
        Ok(())
    }

    /// Opens a file for reading; a finalized muxer output is readable too.
    pub fn open_source(&self, uri: &str) -> Result<Arc<MediaSource>> {
        let key = parse_uri(uri)?;
        match self.entries.read().get(&key) {
            Some(Entry::Source(source)) => Ok(source.clone()),
            Some(Entry::Sink(file)) => Ok(Arc::new(file.lock().to_source()?)),
            None => Err(AvcsError::Failed {
                code: ErrorCode::DemuxerFailed,
                msg: format!("no media at {}", key),
            }),
        }
    }

    /// Creates (or truncates) a file for writing.
    pub fn create_sink(&self, uri: &str, output_format: OutputFormat) -> Result<Arc<Mutex<MuxedFile>>> {
        let key = parse_uri(uri)?;
        let file = Arc::new(Mutex::new(MuxedFile::new(output_format)));
        self.entries.write().insert(key, Entry::Sink(file.clone()));
        Ok(file)
    }

    /// Snapshot of a file written by a muxer.
    pub fn muxed(&self, uri: &str) -> Option<MuxedFile> {
        let key = parse_uri(uri).ok()?;
        match self.entries.read().get(&key) {
            Some(Entry::Sink(file)) => Some(file.lock().clone()),
            _ => None,
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        match parse_uri(uri) {
            Ok(key) => self.entries.read().contains_key(&key),
            Err(_) => false,
        }
    }
}

/// Normalizes a store URI, rejecting other schemes.
fn parse_uri(uri: &str) -> Result<String> {
    let url = Url::parse(uri).map_err(|e| AvcsError::InvalidVal(format!("{}: {}", uri, e)))?;
    if url.scheme() != STORE_SCHEME {
        return Err(AvcsError::Unsupported {
            code: ErrorCode::UnsupportFileType,
            msg: format!("scheme {} is not supported", url.scheme()),
        });
    }
    Ok(url.to_string())
}
