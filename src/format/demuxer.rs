use super::store::{MediaSource, MediaStore};
use super::{Demuxer, SeekMode};
use crate::av::{BufferFlag, BufferInfo, Format, Sample};
use crate::error::{AvcsError, ErrorCode, Result};
use crate::memory::SharedMemory;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Demuxer over a [`MediaSource`] held in memory.
pub struct MemoryDemuxer {
    source: Arc<MediaSource>,
    cursors: Vec<usize>,
}

impl MemoryDemuxer {
    pub fn new(source: Arc<MediaSource>) -> Self {
        let cursors = vec![0; source.tracks().len()];
        Self { source, cursors }
    }

    fn seek_position(&self, track: usize, time_us: i64, mode: SeekMode) -> Option<usize> {
        let t = &self.source.tracks()[track];
        let mut sync = (0..t.samples.len()).filter(|&i| t.is_sync(i));
        match mode {
            SeekMode::PreviousSync => sync.filter(|&i| t.samples[i].pts_us <= time_us).last(),
            SeekMode::NextSync => sync.find(|&i| t.samples[i].pts_us >= time_us),
            SeekMode::ClosestSync => sync.min_by_key(|&i| (t.samples[i].pts_us - time_us).abs()),
        }
    }
}

#[async_trait]
impl Demuxer for MemoryDemuxer {
    async fn source_format(&mut self) -> Result<Format> {
        Ok(self.source.format())
    }

    async fn tracks(&mut self) -> Result<Vec<Format>> {
        Ok(self.source.tracks().iter().map(|t| t.format.clone()).collect())
    }

    async fn read_sample(&mut self, track: u32) -> Result<Option<Sample>> {
        let index = track as usize;
        let samples = match self.source.tracks().get(index) {
            Some(t) => &t.samples,
            None => return Err(AvcsError::InvalidVal(format!("no track {}", track))),
        };
        let cursor = self.cursors[index];
        let sample = samples.get(cursor).cloned();
        if sample.is_some() {
            self.cursors[index] = cursor + 1;
        }
        Ok(sample)
    }

    async fn seek(&mut self, tracks: &[u32], time_us: i64, mode: SeekMode) -> Result<()> {
        // Resolve every track before moving any cursor.
        let mut targets = Vec::with_capacity(tracks.len());
        for &track in tracks {
            let index = track as usize;
            if index >= self.cursors.len() {
                return Err(AvcsError::InvalidVal(format!("no track {}", track)));
            }
            let position = self.seek_position(index, time_us, mode).ok_or_else(|| AvcsError::Failed {
                code: ErrorCode::SeekFailed,
                msg: format!("track {} has no {:?} sample for {} us", track, mode, time_us),
            })?;
            targets.push((index, position));
        }
        for (index, position) in targets {
            self.cursors[index] = position;
        }
        Ok(())
    }
}

struct DemuxerInner {
    demuxer: Option<Box<dyn Demuxer>>,
    track_count: u32,
    selected: BTreeSet<u32>,
    released: bool,
}

/// Server-side demuxer session.
pub struct DemuxerSession {
    store: Arc<MediaStore>,
    inner: Mutex<DemuxerInner>,
}

impl DemuxerSession {
    pub fn new(store: Arc<MediaStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(DemuxerInner {
                demuxer: None,
                track_count: 0,
                selected: BTreeSet::new(),
                released: false,
            }),
        }
    }

    /// Opens the media at `uri`.
    pub async fn init(&self, uri: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.released || inner.demuxer.is_some() {
            return Err(AvcsError::InvalidState("demuxer already initialized".into()));
        }
        let source = self.store.open_source(uri)?;
        let track_count = source.tracks().len() as u32;
        inner.demuxer = Some(Box::new(MemoryDemuxer::new(source)));
        inner.track_count = track_count;
        log::info!("demuxer: opened {} ({} tracks)", uri, track_count);
        Ok(())
    }

    pub async fn source_format(&self) -> Result<Format> {
        let mut inner = self.inner.lock().await;
        active(&mut inner)?.source_format().await
    }

    pub async fn track_format(&self, track: u32) -> Result<Format> {
        let mut inner = self.inner.lock().await;
        let tracks = active(&mut inner)?.tracks().await?;
        tracks
            .into_iter()
            .nth(track as usize)
            .ok_or_else(|| AvcsError::InvalidVal(format!("no track {}", track)))
    }

    pub async fn select_track(&self, track: u32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        active(&mut inner)?;
        check_track(&inner, track)?;
        inner.selected.insert(track);
        log::debug!("demuxer: track {} selected", track);
        Ok(())
    }

    pub async fn unselect_track(&self, track: u32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        active(&mut inner)?;
        check_track(&inner, track)?;
        inner.selected.remove(&track);
        Ok(())
    }

    /// Copies the next sample of a selected track into `memory`. An exhausted
    /// track yields an empty buffer flagged EOS.
    pub async fn read_sample(&self, track: u32, memory: &SharedMemory) -> Result<(BufferInfo, BufferFlag)> {
        let mut inner = self.inner.lock().await;
        active(&mut inner)?;
        check_track(&inner, track)?;
        if !inner.selected.contains(&track) {
            return Err(AvcsError::InvalidVal(format!("track {} is not selected", track)));
        }
        let sample = active(&mut inner)?.read_sample(track).await?;
        match sample {
            None => Ok((BufferInfo::default(), BufferFlag::EOS)),
            Some(sample) => {
                if sample.data.len() > memory.size() {
                    return Err(AvcsError::Failed {
                        code: ErrorCode::DemuxerFailed,
                        msg: format!(
                            "sample of {} bytes does not fit buffer of {}",
                            sample.data.len(),
                            memory.size()
                        ),
                    });
                }
                memory.fill(0, &sample.data)?;
                Ok((sample.info(), sample.flag))
            }
        }
    }

    /// Seeks every selected track.
    pub async fn seek_to_time(&self, time_ms: i64, mode: SeekMode) -> Result<()> {
        let mut inner = self.inner.lock().await;
        active(&mut inner)?;
        if time_ms < 0 {
            return Err(AvcsError::InvalidVal(format!("negative seek time {}", time_ms)));
        }
        if inner.selected.is_empty() {
            return Err(AvcsError::InvalidOperation("no track selected".into()));
        }
        let tracks: Vec<u32> = inner.selected.iter().copied().collect();
        active(&mut inner)?.seek(&tracks, time_ms * 1000, mode).await?;
        log::debug!("demuxer: seek {} ms ({:?})", time_ms, mode);
        Ok(())
    }

    pub async fn release(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.demuxer = None;
        inner.selected.clear();
        inner.released = true;
        Ok(())
    }
}

fn active(inner: &mut DemuxerInner) -> Result<&mut Box<dyn Demuxer>> {
    if inner.released {
        return Err(AvcsError::InvalidState("demuxer released".into()));
    }
    inner
        .demuxer
        .as_mut()
        .ok_or_else(|| AvcsError::InvalidState("demuxer not initialized".into()))
}

fn check_track(inner: &DemuxerInner, track: u32) -> Result<()> {
    if track >= inner.track_count {
        return Err(AvcsError::InvalidVal(format!(
            "track {} out of range 0..{}",
            track, inner.track_count
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::keys;
    use crate::memory::MemoryFlag;
    use pretty_assertions::assert_eq;

    fn video_clip() -> MediaSource {
        let mut video = Format::new();
        video.put_string_value(keys::CODEC_MIME, "video/avc");
        let samples = (0..6)
            .map(|i| {
                Sample::new(vec![i as u8; 4])
                    .with_pts(i * 40_000)
                    .with_key_flag(i % 3 == 0)
            })
            .collect();
        MediaSource::new().with_track(video, samples)
    }

    async fn open() -> (DemuxerSession, SharedMemory) {
        let store = Arc::new(MediaStore::new());
        store.insert_source("memory://clip.mp4", video_clip()).unwrap();
        let session = DemuxerSession::new(store);
        session.init("memory://clip.mp4").await.unwrap();
        let memory = SharedMemory::create(64, MemoryFlag::ReadWrite, "sample").unwrap();
        (session, memory)
    }

    #[tokio::test]
    async fn test_read_until_eos() {
        let (session, memory) = open().await;
        assert_eq!(
            session.read_sample(0, &memory).await.unwrap_err().code(),
            ErrorCode::InvalidVal
        );
        session.select_track(0).await.unwrap();
        for i in 0..6 {
            let (info, flag) = session.read_sample(0, &memory).await.unwrap();
            assert_eq!(info.presentation_time_us, i * 40_000);
            assert_eq!(flag.contains(BufferFlag::SYNC_FRAME), i % 3 == 0);
            assert_eq!(memory.read(0, 4).unwrap()[0], i as u8);
        }
        let (info, flag) = session.read_sample(0, &memory).await.unwrap();
        assert!(flag.is_eos());
        assert_eq!(info.size, 0);
    }

    #[tokio::test]
    async fn test_seek_modes() {
        let (session, memory) = open().await;
        session.select_track(0).await.unwrap();

        session.seek_to_time(150, SeekMode::PreviousSync).await.unwrap();
        assert_eq!(session.read_sample(0, &memory).await.unwrap().0.presentation_time_us, 120_000);

        session.seek_to_time(50, SeekMode::NextSync).await.unwrap();
        assert_eq!(session.read_sample(0, &memory).await.unwrap().0.presentation_time_us, 120_000);

        session.seek_to_time(50, SeekMode::ClosestSync).await.unwrap();
        assert_eq!(session.read_sample(0, &memory).await.unwrap().0.presentation_time_us, 0);

        let err = session.seek_to_time(500, SeekMode::NextSync).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SeekFailed);
    }

    #[tokio::test]
    async fn test_track_format_and_release() {
        let (session, _) = open().await;
        let format = session.track_format(0).await.unwrap();
        assert_eq!(format.get_string_value(keys::CODEC_MIME), Some("video/avc"));
        assert_eq!(session.track_format(3).await.unwrap_err().code(), ErrorCode::InvalidVal);
        assert_eq!(
            session.source_format().await.unwrap().get_long_value(keys::DURATION),
            Some(200_000)
        );

        session.release().await.unwrap();
        assert_eq!(session.source_format().await.unwrap_err().code(), ErrorCode::InvalidState);
    }
}
