//! # Shared Memory
//!
//! A fixed-size, named memory region that can be handed to another process.
//!
//! Within one process a [`SharedMemory`] is a cheap reference-counted handle;
//! across the service boundary it travels through the object table of a
//! [`crate::ipc::MessageParcel`], which is the moral equivalent of duplicating
//! a file descriptor. Both ends then address the same bytes.
//!
//! ```rust
//! use avcs::memory::{MemoryFlag, SharedMemory};
//!
//! # fn main() -> avcs::Result<()> {
//! let memory = SharedMemory::create(16, MemoryFlag::ReadWrite, "input_0")?;
//! memory.write(0, b"frame")?;
//! assert_eq!(&memory.read(0, 5)?[..], b"frame");
//! # Ok(())
//! # }
//! ```

use crate::error::{AvcsError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// Access mode granted to holders of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryFlag {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl MemoryFlag {
    pub fn as_u32(self) -> u32 {
        match self {
            MemoryFlag::ReadOnly => 0,
            MemoryFlag::WriteOnly => 1,
            MemoryFlag::ReadWrite => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MemoryFlag::ReadOnly),
            1 => Some(MemoryFlag::WriteOnly),
            2 => Some(MemoryFlag::ReadWrite),
            _ => None,
        }
    }

    fn readable(self) -> bool {
        self != MemoryFlag::WriteOnly
    }

    fn writable(self) -> bool {
        self != MemoryFlag::ReadOnly
    }
}

struct Region {
    id: u64,
    name: String,
    flags: MemoryFlag,
    bytes: RwLock<Box<[u8]>>,
}

#[derive(Clone)]
pub struct SharedMemory {
    region: Arc<Region>,
}

impl SharedMemory {
    /// Allocates a zeroed region of `size` bytes.
    pub fn create(size: usize, flags: MemoryFlag, name: &str) -> Result<Self> {
        if size == 0 {
            return Err(AvcsError::InvalidVal(format!(
                "shared memory {} must not be empty",
                name
            )));
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(size)
            .map_err(|e| AvcsError::NoMemory(format!("{} ({} bytes): {}", name, size, e)))?;
        storage.resize(size, 0u8);

        Ok(Self {
            region: Arc::new(Region {
                id: NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                flags,
                bytes: RwLock::new(storage.into_boxed_slice()),
            }),
        })
    }

    /// Process-unique identity of the underlying region.
    pub fn id(&self) -> u64 {
        self.region.id
    }

    pub fn name(&self) -> &str {
        &self.region.name
    }

    pub fn size(&self) -> usize {
        self.region.bytes.read().len()
    }

    pub fn flags(&self) -> MemoryFlag {
        self.region.flags
    }

    /// Whether both handles refer to the same region.
    pub fn same_region(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if !self.region.flags.writable() {
            return Err(AvcsError::InvalidOperation(format!(
                "{} is read-only",
                self.region.name
            )));
        }
        self.fill(offset, data)
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Bytes> {
        if !self.region.flags.readable() {
            return Err(AvcsError::InvalidOperation(format!(
                "{} is write-only",
                self.region.name
            )));
        }
        self.snapshot(offset, len)
    }

    /// Service-side write that ignores the client-facing access mode.
    pub(crate) fn fill(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut bytes = self.region.bytes.write();
        let end = self.bounds(offset, data.len(), bytes.len())?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Service-side read that ignores the client-facing access mode.
    pub(crate) fn snapshot(&self, offset: usize, len: usize) -> Result<Bytes> {
        let bytes = self.region.bytes.read();
        let end = self.bounds(offset, len, bytes.len())?;
        Ok(Bytes::copy_from_slice(&bytes[offset..end]))
    }

    fn bounds(&self, offset: usize, len: usize, size: usize) -> Result<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(end),
            _ => Err(AvcsError::InvalidVal(format!(
                "range {}+{} exceeds {} ({} bytes)",
                offset, len, self.region.name, size
            ))),
        }
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("id", &self.region.id)
            .field("name", &self.region.name)
            .field("flags", &self.region.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_empty() {
        assert_eq!(
            SharedMemory::create(0, MemoryFlag::ReadWrite, "x").unwrap_err().code(),
            crate::ErrorCode::InvalidVal
        );
    }

    #[test]
    fn test_clone_shares_bytes() {
        let a = SharedMemory::create(8, MemoryFlag::ReadWrite, "shared").unwrap();
        let b = a.clone();
        a.write(2, &[9, 9]).unwrap();
        assert!(a.same_region(&b));
        assert_eq!(b.id(), a.id());
        assert_eq!(&b.read(0, 4).unwrap()[..], &[0, 0, 9, 9]);
    }

    #[test]
    fn test_bounds_checked() {
        let memory = SharedMemory::create(4, MemoryFlag::ReadWrite, "small").unwrap();
        assert!(memory.write(3, &[1, 2]).is_err());
        assert!(memory.read(5, 0).is_err());
        assert!(memory.read(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_access_mode() {
        let output = SharedMemory::create(4, MemoryFlag::ReadOnly, "output_0").unwrap();
        assert!(output.write(0, &[1]).is_err());
        output.fill(0, &[1]).unwrap();
        assert_eq!(&output.read(0, 1).unwrap()[..], &[1]);

        let sink = SharedMemory::create(4, MemoryFlag::WriteOnly, "sink").unwrap();
        assert!(sink.read(0, 1).is_err());
    }
}
