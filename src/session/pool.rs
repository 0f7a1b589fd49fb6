//! Fixed-size pools of shared buffers addressed by index.
//!
//! Every slot has exactly one owner. A slot enters the `ready` queue when the
//! client may claim it: a free input slot, or an output slot the engine has
//! filled. Claiming removes it from the queue, so no index is handed out
//! twice before it comes back through queue/release.

use crate::av::{BufferFlag, BufferInfo};
use crate::error::{AvcsError, Result};
use crate::memory::{MemoryFlag, SharedMemory};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_u32(self) -> u32 {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Direction::Input),
            1 => Some(Direction::Output),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    OwnedByClient,
    OwnedByEngine,
}

#[derive(Debug)]
struct Slot {
    memory: SharedMemory,
    state: SlotState,
    /// Set once the client has fetched the buffer of a claimed slot.
    fetched: bool,
    info: BufferInfo,
    flag: BufferFlag,
}

#[derive(Debug)]
pub struct BufferPool {
    direction: Direction,
    slots: Vec<Slot>,
    ready: VecDeque<u32>,
    buffer_size: usize,
}

impl BufferPool {
    /// Allocates `count` buffers of `size` bytes each.
    pub fn allocate(direction: Direction, count: usize, size: usize) -> Result<Self> {
        // Clients write input buffers and only read output buffers.
        let flags = match direction {
            Direction::Input => MemoryFlag::ReadWrite,
            Direction::Output => MemoryFlag::ReadOnly,
        };
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let memory = SharedMemory::create(size, flags, &format!("{}_{}", direction, index))?;
            slots.push(Slot {
                memory,
                state: SlotState::Free,
                fetched: false,
                info: BufferInfo::default(),
                flag: BufferFlag::NONE,
            });
        }
        log::debug!("allocated {} {} buffers of {} bytes", count, direction, size);
        Ok(Self {
            direction,
            slots,
            ready: VecDeque::with_capacity(count),
            buffer_size: size,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).map(|slot| slot.state)
    }

    pub fn memory(&self, index: u32) -> Option<&SharedMemory> {
        self.slots.get(index as usize).map(|slot| &slot.memory)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Returns every slot to FREE and forgets pending availability.
    pub fn free_all(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
            slot.fetched = false;
            slot.info = BufferInfo::default();
            slot.flag = BufferFlag::NONE;
        }
        self.ready.clear();
    }

    /// Offers every free slot to the client, in index order.
    pub fn offer_all_free(&mut self) -> Vec<u32> {
        let offered: Vec<u32> = (0..self.slots.len() as u32)
            .filter(|&i| self.slots[i as usize].state == SlotState::Free && !self.ready.contains(&i))
            .collect();
        self.ready.extend(offered.iter().copied());
        offered
    }

    /// Claims the oldest ready slot for the client.
    pub fn dequeue(&mut self) -> Option<(u32, BufferInfo, BufferFlag)> {
        let index = self.ready.pop_front()?;
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::OwnedByClient;
        slot.fetched = false;
        Some((index, slot.info, slot.flag))
    }

    /// Hands the buffer at `index` to the client. A ready slot is claimed on
    /// the spot; a slot claimed by `dequeue` may be fetched exactly once.
    pub fn fetch(&mut self, index: u32) -> Result<SharedMemory> {
        let direction = self.direction;
        let position = self.ready.iter().position(|&i| i == index);
        let slot = self.slot_mut(index)?;
        if let Some(position) = position {
            slot.state = SlotState::OwnedByClient;
            slot.fetched = true;
            let memory = slot.memory.clone();
            self.ready.remove(position);
            return Ok(memory);
        }
        if slot.state == SlotState::OwnedByClient && !slot.fetched {
            slot.fetched = true;
            return Ok(slot.memory.clone());
        }
        Err(AvcsError::InvalidVal(format!(
            "{} buffer {} is not available ({:?})",
            direction, index, slot.state
        )))
    }

    /// Moves a client-owned slot to the engine.
    pub fn hand_to_engine(&mut self, index: u32) -> Result<SharedMemory> {
        let direction = self.direction;
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::OwnedByClient {
            return Err(AvcsError::InvalidVal(format!(
                "{} buffer {} is not owned by the client ({:?})",
                direction, index, slot.state
            )));
        }
        slot.state = SlotState::OwnedByEngine;
        slot.fetched = false;
        Ok(slot.memory.clone())
    }

    /// Returns a slot to FREE. With `offer` it is immediately ready again.
    pub fn recycle(&mut self, index: u32, offer: bool) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.state = SlotState::Free;
            slot.fetched = false;
            slot.info = BufferInfo::default();
            slot.flag = BufferFlag::NONE;
            if offer {
                self.ready.push_back(index);
            }
        }
    }

    /// Releases a client-owned slot back to FREE, returning what it held.
    pub fn release(&mut self, index: u32) -> Result<(BufferInfo, BufferFlag)> {
        let direction = self.direction;
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::OwnedByClient {
            return Err(AvcsError::InvalidVal(format!(
                "{} buffer {} is not owned by the client ({:?})",
                direction, index, slot.state
            )));
        }
        let held = (slot.info, slot.flag);
        self.recycle(index, false);
        Ok(held)
    }

    /// Lowest-index free slot that is not already on offer.
    pub fn find_free(&self) -> Option<u32> {
        (0..self.slots.len() as u32)
            .find(|&i| self.slots[i as usize].state == SlotState::Free && !self.ready.contains(&i))
    }

    /// Writes engine output into a free slot and queues it for the client.
    pub fn fill(&mut self, index: u32, data: &[u8], info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let slot = self.slot_mut(index)?;
        if data.len() > slot.memory.size() {
            return Err(AvcsError::NoMemory(format!(
                "{} bytes do not fit buffer {} ({} bytes)",
                data.len(),
                index,
                slot.memory.size()
            )));
        }
        slot.memory.fill(0, data)?;
        slot.state = SlotState::OwnedByEngine;
        slot.fetched = false;
        slot.info = info;
        slot.flag = flag;
        self.ready.push_back(index);
        Ok(())
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut Slot> {
        let direction = self.direction;
        let len = self.slots.len();
        self.slots.get_mut(index as usize).ok_or_else(|| {
            AvcsError::InvalidVal(format!("{} index {} out of range 0..{}", direction, index, len))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_input_cycle() {
        let mut pool = BufferPool::allocate(Direction::Input, 2, 16).unwrap();
        assert_eq!(pool.offer_all_free(), vec![0, 1]);
        assert_eq!(pool.offer_all_free(), Vec::<u32>::new());

        let (index, _, _) = pool.dequeue().unwrap();
        assert_eq!(index, 0);
        assert_eq!(pool.state(0), Some(SlotState::OwnedByClient));

        // dequeue then fetch is allowed once
        let memory = pool.fetch(0).unwrap();
        memory.write(0, b"abc").unwrap();
        assert!(pool.fetch(0).is_err());

        pool.hand_to_engine(0).unwrap();
        assert!(pool.hand_to_engine(0).is_err());
        pool.recycle(0, true);
        assert_eq!(pool.ready_count(), 2);
        assert_eq!(pool.dequeue().unwrap().0, 1);
    }

    #[test]
    fn test_fetch_claims_ready_slot() {
        let mut pool = BufferPool::allocate(Direction::Input, 3, 8).unwrap();
        pool.offer_all_free();
        pool.fetch(1).unwrap();
        assert_eq!(pool.dequeue().unwrap().0, 0);
        assert_eq!(pool.dequeue().unwrap().0, 2);
        assert!(pool.dequeue().is_none());
        assert!(pool.fetch(7).is_err());
    }

    #[test]
    fn test_output_fill_and_release() {
        let mut pool = BufferPool::allocate(Direction::Output, 2, 4).unwrap();
        let index = pool.find_free().unwrap();
        let info = BufferInfo::new(100, 3, 0);
        pool.fill(index, &[1, 2, 3], info, BufferFlag::SYNC_FRAME).unwrap();
        assert_eq!(pool.find_free(), Some(1));
        assert!(pool.fill(1, &[0; 5], info, BufferFlag::NONE).is_err());

        let (dequeued, got_info, flag) = pool.dequeue().unwrap();
        assert_eq!((dequeued, got_info, flag), (0, info, BufferFlag::SYNC_FRAME));
        let memory = pool.fetch(0).unwrap();
        assert_eq!(&memory.read(0, 3).unwrap()[..], &[1, 2, 3]);
        assert!(memory.write(0, &[9]).is_err());

        assert_eq!(pool.release(0).unwrap().0, info);
        assert!(pool.release(0).is_err());
        assert_eq!(pool.state(0), Some(SlotState::Free));
    }

    #[test]
    fn test_free_all() {
        let mut pool = BufferPool::allocate(Direction::Input, 4, 8).unwrap();
        pool.offer_all_free();
        pool.dequeue();
        pool.dequeue();
        pool.hand_to_engine(0).unwrap();
        pool.free_all();
        assert!((0..4).all(|i| pool.state(i) == Some(SlotState::Free)));
        assert_eq!(pool.ready_count(), 0);
        assert_eq!(pool.len(), 4);
    }
}
