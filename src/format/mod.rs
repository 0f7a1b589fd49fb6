//! Container access: the demuxer and muxer seams, the in-memory media store
//! they read from and write to, and the server-side sessions driving them.

use crate::av::{Format, Sample};
use crate::Result;

pub mod demuxer;
pub mod muxer;
pub mod store;

pub use demuxer::{DemuxerSession, MemoryDemuxer};
pub use muxer::{MemoryMuxer, MuxerSession, MuxerState};
pub use store::{MediaSource, MediaStore, MuxedFile, OutputFormat, SourceTrack};

/// Where a seek lands relative to the requested time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekMode {
    /// Last sync sample at or before the time
    PreviousSync,
    /// First sync sample at or after the time
    NextSync,
    /// Sync sample nearest to the time
    ClosestSync,
}

impl SeekMode {
    pub fn as_u32(self) -> u32 {
        match self {
            SeekMode::PreviousSync => 0,
            SeekMode::NextSync => 1,
            SeekMode::ClosestSync => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(SeekMode::PreviousSync),
            1 => Some(SeekMode::NextSync),
            2 => Some(SeekMode::ClosestSync),
            _ => None,
        }
    }
}

/// Common trait for container demuxers
#[async_trait::async_trait]
pub trait Demuxer: Send {
    /// Container-level description (duration, title, track count)
    async fn source_format(&mut self) -> Result<Format>;

    /// One descriptor per track, in track order
    async fn tracks(&mut self) -> Result<Vec<Format>>;

    /// Next sample of `track`, or `None` once the track is exhausted
    async fn read_sample(&mut self, track: u32) -> Result<Option<Sample>>;

    /// Repositions `tracks` on a sync sample near `time_us`
    async fn seek(&mut self, tracks: &[u32], time_us: i64, mode: SeekMode) -> Result<()>;
}

/// Common trait for container muxers
#[async_trait::async_trait]
pub trait Muxer: Send {
    /// Write container header information
    async fn write_header(&mut self, tracks: &[Format], rotation: i32) -> Result<()>;

    /// Write one sample
    async fn write_sample(&mut self, sample: &Sample) -> Result<()>;

    /// Write container trailer information
    async fn write_trailer(&mut self) -> Result<()>;
}
