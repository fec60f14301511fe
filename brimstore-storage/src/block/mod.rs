//! Location blocks and the process-wide block registry.
//!
//! Every place a value can live, a memory buffer or an append-only value
//! file, is a *location block* addressable by a 16-bit id. The registry
//! is a write-once table: ids come from an atomic counter and a slot is
//! populated before its id is ever published, so lookups never race with
//! registration.

mod disk;
mod mem;

pub use disk::{DiskBlock, READERS_PER_BLOCK};
pub use mem::{MemBlock, MemBlockInner};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use brimstore_core::error::{Error, Result};
use brimstore_core::types::ReadValue;

/// Block ids below this value mean "no location"; id 0 never names a block.
pub const BLOCK_ID_OFFSET: u16 = 1;

/// Capacity of the registry: the whole `u16` id space.
pub const MAX_BLOCKS: usize = 65536;

/// A unit of storage addressable by a 16-bit id. Only these two variants
/// ever exist, so a tagged enum beats an open trait hierarchy.
pub enum LocationBlock {
    Mem(Arc<MemBlock>),
    Disk(Arc<DiskBlock>),
}

impl LocationBlock {
    /// Creation instant in nanoseconds. Memory blocks report `i64::MAX` so
    /// page grouping treats them as a bucket distinct from every disk file.
    pub fn timestamp(&self) -> i64 {
        match self {
            LocationBlock::Mem(_) => i64::MAX,
            LocationBlock::Disk(block) => block.timestamp(),
        }
    }

    /// Serve a read whose location points into this block. A request
    /// handed back means the location went stale and the caller should
    /// re-resolve it.
    pub fn get(&self, r: ReadValue) -> Option<ReadValue> {
        match self {
            LocationBlock::Mem(block) => block.get(r),
            LocationBlock::Disk(block) => {
                block.get(r);
                None
            }
        }
    }
}

/// Write-once table of every live location block, indexed by block id.
pub struct BlockRegistry {
    blocks: Box<[OnceLock<LocationBlock>]>,
    next_id: AtomicU32,
}

impl BlockRegistry {
    pub fn new() -> Self {
        let blocks = (0..MAX_BLOCKS)
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            blocks,
            next_id: AtomicU32::new(BLOCK_ID_OFFSET as u32),
        }
    }

    /// Assign the next id and publish the block under it.
    pub fn register(&self, block: LocationBlock) -> Result<u16> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if id as usize >= MAX_BLOCKS {
            return Err(Error::BlockTableExhausted);
        }
        // ids are unique, so the slot is always vacant
        let _ = self.blocks[id as usize].set(block);
        Ok(id as u16)
    }

    pub fn get(&self, id: u16) -> Option<&LocationBlock> {
        self.blocks[id as usize].get()
    }

    pub fn timestamp(&self, id: u16) -> Option<i64> {
        self.get(id).map(LocationBlock::timestamp)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_the_offset_and_ascend() {
        let registry = BlockRegistry::new();
        let a = registry
            .register(LocationBlock::Mem(MemBlock::new(64, 64)))
            .unwrap();
        let b = registry
            .register(LocationBlock::Mem(MemBlock::new(64, 64)))
            .unwrap();
        assert_eq!(a, BLOCK_ID_OFFSET);
        assert_eq!(b, BLOCK_ID_OFFSET + 1);
        assert!(registry.get(0).is_none());
        assert!(registry.get(a).is_some());
    }

    #[test]
    fn mem_blocks_sort_after_everything() {
        let registry = BlockRegistry::new();
        let id = registry
            .register(LocationBlock::Mem(MemBlock::new(64, 64)))
            .unwrap();
        assert_eq!(registry.timestamp(id), Some(i64::MAX));
        assert_eq!(registry.timestamp(0), None);
    }
}
