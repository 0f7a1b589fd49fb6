use std::fmt;
use std::ops::{BitOr, BitOrAssign};

pub mod format;
mod packet;
pub mod surface;

pub use format::{keys, Format, FormatValue, FormatValueType};
pub use packet::*;
pub use surface::Surface;

/// Direction of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Decoder,
    Encoder,
}

impl CodecKind {
    pub fn as_u32(self) -> u32 {
        match self {
            CodecKind::Decoder => 0,
            CodecKind::Encoder => 1,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(CodecKind::Decoder),
            1 => Some(CodecKind::Encoder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Per-buffer flags. Values combine bitwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlag(u32);

impl BufferFlag {
    pub const NONE: BufferFlag = BufferFlag(0);
    /// End of stream
    pub const EOS: BufferFlag = BufferFlag(1 << 0);
    /// Key frame
    pub const SYNC_FRAME: BufferFlag = BufferFlag(1 << 1);
    pub const PARTIAL_FRAME: BufferFlag = BufferFlag(1 << 2);
    /// Codec specific data (e.g. AudioSpecificConfig, SPS/PPS)
    pub const CODEC_DATA: BufferFlag = BufferFlag(1 << 3);

    const ALL: u32 = 0b1111;

    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL != 0 {
            return None;
        }
        Some(BufferFlag(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BufferFlag) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_eos(self) -> bool {
        self.contains(BufferFlag::EOS)
    }
}

impl BitOr for BufferFlag {
    type Output = BufferFlag;

    fn bitor(self, rhs: BufferFlag) -> BufferFlag {
        BufferFlag(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlag {
    fn bitor_assign(&mut self, rhs: BufferFlag) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BufferFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("NONE");
        }
        let names = [
            (BufferFlag::EOS, "EOS"),
            (BufferFlag::SYNC_FRAME, "SYNC_FRAME"),
            (BufferFlag::PARTIAL_FRAME, "PARTIAL_FRAME"),
            (BufferFlag::CODEC_DATA, "CODEC_DATA"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&set.join("|"))
    }
}

/// Location and timing of the payload inside a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub presentation_time_us: i64,
    pub size: u32,
    pub offset: u32,
}

impl BufferInfo {
    pub fn new(presentation_time_us: i64, size: u32, offset: u32) -> Self {
        Self {
            presentation_time_us,
            size,
            offset,
        }
    }

    /// End of the payload, or `None` on overflow.
    pub fn end(&self) -> Option<usize> {
        (self.offset as usize).checked_add(self.size as usize)
    }

    /// Whether the payload lies inside a buffer of `capacity` bytes.
    pub fn fits(&self, capacity: usize) -> bool {
        self.end().map_or(false, |end| end <= capacity)
    }
}
