//! # Buffer Cache
//!
//! Fetching a buffer by index transfers its shared-memory handle, which is
//! the expensive part of the exchange. Both ends of a codec connection keep a
//! per-`(direction, index)` record of the last handle transferred, and the
//! server prefixes every buffer reply with a [`CacheFlag`]:
//!
//! * `HitCache` – the index still maps to the region sent last time; no
//!   handle follows and the client reuses its own entry.
//! * `UpdateCache` – a new handle follows; both sides record it.
//! * `InvalidateCache` – the fetch failed; both sides drop the entry.
//!
//! A reply is laid out as `[result][flag][handle?]`. Both caches are cleared
//! together whenever the pools behind them are reallocated.

use super::parcel::MessageParcel;
use crate::error::{AvcsError, Result};
use crate::memory::SharedMemory;
use crate::session::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlag {
    HitCache,
    UpdateCache,
    InvalidateCache,
}

impl CacheFlag {
    pub fn as_u32(self) -> u32 {
        match self {
            CacheFlag::HitCache => 0,
            CacheFlag::UpdateCache => 1,
            CacheFlag::InvalidateCache => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(CacheFlag::HitCache),
            1 => Some(CacheFlag::UpdateCache),
            2 => Some(CacheFlag::InvalidateCache),
            _ => None,
        }
    }
}

/// Server side: identity of the region last sent for each index.
#[derive(Debug, Default)]
pub struct ServerBufferCache {
    sent: HashMap<(Direction, u32), u64>,
}

impl ServerBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the reply for one buffer fetch.
    pub fn write_reply(
        &mut self,
        direction: Direction,
        index: u32,
        fetched: &Result<SharedMemory>,
        reply: &mut MessageParcel,
    ) {
        reply.write_result(fetched);
        let key = (direction, index);
        match fetched {
            Ok(memory) if self.sent.get(&key) == Some(&memory.id()) => {
                reply.write_u32(CacheFlag::HitCache.as_u32());
            }
            Ok(memory) => {
                self.sent.insert(key, memory.id());
                reply.write_u32(CacheFlag::UpdateCache.as_u32());
                reply.write_memory(memory);
            }
            Err(_) => {
                self.sent.remove(&key);
                reply.write_u32(CacheFlag::InvalidateCache.as_u32());
            }
        }
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub updates: u64,
    pub invalidations: u64,
}

/// Client side: the handles received so far.
#[derive(Debug, Default)]
pub struct ClientBufferCache {
    entries: HashMap<(Direction, u32), SharedMemory>,
    stats: CacheStats,
}

impl ClientBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a buffer fetch reply against the cache.
    pub fn read_reply(&mut self, direction: Direction, index: u32, reply: &mut MessageParcel) -> Result<SharedMemory> {
        let result = reply.read_result();
        let raw = reply.read_u32()?;
        let flag = CacheFlag::from_u32(raw)
            .ok_or_else(|| AvcsError::InvalidVal(format!("unknown cache flag {}", raw)))?;
        let key = (direction, index);
        match flag {
            CacheFlag::HitCache => {
                result?;
                self.stats.hits += 1;
                self.entries.get(&key).cloned().ok_or_else(|| {
                    log::error!("cache hit for uncached {} buffer {}", direction, index);
                    AvcsError::InvalidVal(format!("no cached {} buffer {}", direction, index))
                })
            }
            CacheFlag::UpdateCache => {
                result?;
                let memory = reply.read_memory()?;
                self.stats.updates += 1;
                self.entries.insert(key, memory.clone());
                Ok(memory)
            }
            CacheFlag::InvalidateCache => {
                self.stats.invalidations += 1;
                self.entries.remove(&key);
                result?;
                Err(AvcsError::InvalidVal(format!("{} buffer {} invalidated", direction, index)))
            }
        }
    }

    pub fn get(&self, direction: Direction, index: u32) -> Option<&SharedMemory> {
        self.entries.get(&(direction, index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
