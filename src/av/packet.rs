use super::{BufferFlag, BufferInfo};
use bytes::Bytes;

/// One compressed access unit of a track, as read by a demuxer or written by a muxer.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub data: Bytes,
    pub pts_us: i64,
    pub track_index: u32,
    pub flag: BufferFlag,
}

impl Sample {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts_us: 0,
            track_index: 0,
            flag: BufferFlag::NONE,
        }
    }

    pub fn with_pts(mut self, pts_us: i64) -> Self {
        self.pts_us = pts_us;
        self
    }

    pub fn with_track_index(mut self, index: u32) -> Self {
        self.track_index = index;
        self
    }

    pub fn with_flag(mut self, flag: BufferFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        if is_key {
            self.flag |= BufferFlag::SYNC_FRAME;
        }
        self
    }

    pub fn is_key(&self) -> bool {
        self.flag.contains(BufferFlag::SYNC_FRAME)
    }

    /// Buffer info describing this sample written at offset 0.
    pub fn info(&self) -> BufferInfo {
        BufferInfo::new(self.pts_us, self.data.len() as u32, 0)
    }
}
