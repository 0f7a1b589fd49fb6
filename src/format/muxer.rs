use super::store::{MediaStore, MuxedFile, OutputFormat};
use super::Muxer;
use crate::av::{keys, BufferFlag, BufferInfo, Format, Sample};
use crate::error::{AvcsError, ErrorCode, Result};
use crate::memory::SharedMemory;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Muxer writing into a [`MuxedFile`] of the media store.
pub struct MemoryMuxer {
    file: Arc<parking_lot::Mutex<MuxedFile>>,
}

impl MemoryMuxer {
    pub fn new(file: Arc<parking_lot::Mutex<MuxedFile>>) -> Self {
        Self { file }
    }
}

#[async_trait]
impl Muxer for MemoryMuxer {
    async fn write_header(&mut self, tracks: &[Format], rotation: i32) -> Result<()> {
        let mut file = self.file.lock();
        file.tracks = tracks.to_vec();
        file.rotation = rotation;
        file.samples.clear();
        file.finalized = false;
        Ok(())
    }

    async fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        let mut file = self.file.lock();
        if sample.track_index as usize >= file.tracks.len() {
            return Err(muxer_failed(format!("no track {}", sample.track_index)));
        }
        file.samples.push(sample.clone());
        Ok(())
    }

    async fn write_trailer(&mut self) -> Result<()> {
        self.file.lock().finalized = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Idle,
    Initialized,
    Started,
    Stopped,
    Released,
}

impl fmt::Display for MuxerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct MuxerInner {
    state: MuxerState,
    muxer: Option<Box<dyn Muxer>>,
    output_format: OutputFormat,
    rotation: i32,
    tracks: Vec<Format>,
    last_pts: Vec<Option<i64>>,
}

/// Server-side muxer session.
pub struct MuxerSession {
    store: Arc<MediaStore>,
    inner: Mutex<MuxerInner>,
}

impl MuxerSession {
    pub fn new(store: Arc<MediaStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(MuxerInner {
                state: MuxerState::Idle,
                muxer: None,
                output_format: OutputFormat::Mp4,
                rotation: 0,
                tracks: Vec::new(),
                last_pts: Vec::new(),
            }),
        }
    }

    pub async fn state(&self) -> MuxerState {
        self.inner.lock().await.state
    }

    pub async fn init(&self, uri: &str, output_format: OutputFormat) -> Result<()> {
        let mut inner = self.inner.lock().await;
        expect(inner.state, "init", MuxerState::Idle)?;
        let file = self.store.create_sink(uri, output_format)?;
        inner.muxer = Some(Box::new(MemoryMuxer::new(file)));
        inner.output_format = output_format;
        inner.state = MuxerState::Initialized;
        log::info!("muxer: writing {:?} to {}", output_format, uri);
        Ok(())
    }

    /// Display rotation in degrees; one of 0, 90, 180, 270.
    pub async fn set_rotation(&self, rotation: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        expect(inner.state, "set_rotation", MuxerState::Initialized)?;
        if ![0, 90, 180, 270].contains(&rotation) {
            return Err(AvcsError::InvalidVal(format!("rotation {} is not a right angle", rotation)));
        }
        inner.rotation = rotation;
        Ok(())
    }

    /// Adds a track and returns its index.
    pub async fn add_track(&self, format: &Format) -> Result<u32> {
        let mut inner = self.inner.lock().await;
        expect(inner.state, "add_track", MuxerState::Initialized)?;
        let mime = format
            .get_string_value(keys::CODEC_MIME)
            .ok_or_else(|| AvcsError::InvalidVal("track format has no codec_mime".into()))?;
        if !inner.output_format.accepts(mime) {
            return Err(AvcsError::Unsupported {
                code: ErrorCode::UnsupportStream,
                msg: format!("{:?} cannot carry {}", inner.output_format, mime),
            });
        }
        let index = inner.tracks.len() as u32;
        inner.tracks.push(format.clone());
        inner.last_pts.push(None);
        log::debug!("muxer: track {} = {}", index, mime);
        Ok(index)
    }

    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        expect(inner.state, "start", MuxerState::Initialized)?;
        if inner.tracks.is_empty() {
            return Err(muxer_failed("no track added".to_string()));
        }
        let tracks = inner.tracks.clone();
        let rotation = inner.rotation;
        muxer_of(&mut inner)?.write_header(&tracks, rotation).await?;
        inner.state = MuxerState::Started;
        Ok(())
    }

    /// Appends the payload described by `info` from `memory` to `track`.
    /// Timestamps must not go backwards within a track.
    pub async fn write_sample(
        &self,
        track: u32,
        memory: &SharedMemory,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        expect(inner.state, "write_sample", MuxerState::Started)?;
        let last = match inner.last_pts.get(track as usize) {
            Some(last) => *last,
            None => return Err(AvcsError::InvalidVal(format!("no track {}", track))),
        };
        if !info.fits(memory.size()) {
            return Err(AvcsError::InvalidVal(format!(
                "payload {}+{} exceeds buffer of {} bytes",
                info.offset,
                info.size,
                memory.size()
            )));
        }
        if let Some(last) = last {
            if info.presentation_time_us < last {
                return Err(muxer_failed(format!(
                    "track {} pts {} after {}",
                    track, info.presentation_time_us, last
                )));
            }
        }
        let data = memory.snapshot(info.offset as usize, info.size as usize)?;
        let sample = Sample::new(data)
            .with_pts(info.presentation_time_us)
            .with_track_index(track)
            .with_flag(flag);
        muxer_of(&mut inner)?.write_sample(&sample).await?;
        inner.last_pts[track as usize] = Some(info.presentation_time_us);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        expect(inner.state, "stop", MuxerState::Started)?;
        muxer_of(&mut inner)?.write_trailer().await?;
        inner.state = MuxerState::Stopped;
        log::info!("muxer: stopped after {} tracks", inner.tracks.len());
        Ok(())
    }

    pub async fn release(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == MuxerState::Started {
            // An unfinished file still gets its trailer.
            if let Some(muxer) = inner.muxer.as_mut() {
                muxer.write_trailer().await?;
            }
        }
        inner.muxer = None;
        inner.state = MuxerState::Released;
        Ok(())
    }
}

fn expect(state: MuxerState, op: &str, required: MuxerState) -> Result<()> {
    if state == required {
        return Ok(());
    }
    log::warn!("muxer: {} rejected in state {}", op, state);
    Err(AvcsError::InvalidState(format!("{} not allowed in {}", op, state)))
}

fn muxer_of(inner: &mut MuxerInner) -> Result<&mut Box<dyn Muxer>> {
    inner
        .muxer
        .as_mut()
        .ok_or_else(|| AvcsError::InvalidState("muxer not initialized".into()))
}

fn muxer_failed(msg: String) -> AvcsError {
    AvcsError::Failed {
        code: ErrorCode::MuxerFailed,
        msg,
    }
}
