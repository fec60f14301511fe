//! In-memory location block: the write-side staging buffer.
//!
//! A memory block is created once at startup and cycles through the
//! pipeline forever: the memory writer appends into it, the disk writer
//! streams its data region into a value file, and the clearer repoints its
//! entries at disk before wiping it for reuse. Readers copy values out
//! under the shared lock at any point in that cycle.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;

use brimstore_core::types::ReadValue;

/// Mutable interior of a memory block.
#[derive(Debug, Default)]
pub struct MemBlockInner {
    /// Disk block that absorbed this buffer, set by the disk writer.
    pub disk_id: u16,
    /// Logical offset of this buffer's data within that disk block.
    pub disk_offset: u32,
    /// Fixed-size records locating each value in `data`.
    pub toc: Vec<u8>,
    /// Length-prefixed values.
    pub data: Vec<u8>,
}

pub struct MemBlock {
    id: AtomicU16,
    /// Fixed capacity of the TOC region; appends never reallocate.
    pub toc_capacity: usize,
    /// Fixed capacity of the data region; appends never reallocate.
    pub data_capacity: usize,
    pub inner: RwLock<MemBlockInner>,
}

impl MemBlock {
    pub fn new(toc_capacity: usize, data_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: AtomicU16::new(0),
            toc_capacity,
            data_capacity,
            inner: RwLock::new(MemBlockInner {
                disk_id: 0,
                disk_offset: 0,
                toc: Vec::with_capacity(toc_capacity),
                data: Vec::with_capacity(data_capacity),
            }),
        })
    }

    /// Registry id, assigned once right after registration.
    pub fn id(&self) -> u16 {
        self.id.load(Ordering::SeqCst)
    }

    pub fn set_id(&self, id: u16) {
        self.id.store(id, Ordering::SeqCst);
    }

    /// Copy the value at `r.offset` into the request buffer and complete
    /// the request. Hands the request back instead when the offset no
    /// longer lies inside the data region, which means the buffer was
    /// flushed and reset after the caller resolved its location; the
    /// caller should re-resolve and find the disk copy.
    pub fn get(&self, mut r: ReadValue) -> Option<ReadValue> {
        let inner = self.inner.read();
        let offset = r.offset as usize;
        if offset + 4 > inner.data.len() {
            drop(inner);
            return Some(r);
        }
        let len = LittleEndian::read_u32(&inner.data[offset..offset + 4]) as usize;
        let start = offset + 4;
        if start + len > inner.data.len() {
            drop(inner);
            return Some(r);
        }
        r.value.clear();
        r.value.extend_from_slice(&inner.data[start..start + len]);
        drop(inner);
        r.complete(Ok(()));
        None
    }

    /// Return the block to its empty state, capacities preserved.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.disk_id = 0;
        inner.disk_offset = 0;
        inner.toc.clear();
        inner.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_value(block: &MemBlock, value: &[u8]) -> u32 {
        let mut inner = block.inner.write();
        let offset = inner.data.len() as u32;
        inner
            .data
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        inner.data.extend_from_slice(value);
        offset
    }

    #[test]
    fn serves_staged_values() {
        let block = MemBlock::new(4096, 4096);
        let offset = stage_value(&block, b"hello");
        let mut r = ReadValue::new(64);
        r.offset = offset;
        let rx = r.read_rx.clone();
        assert!(block.get(r).is_none());
        let (r, result) = rx.recv().unwrap();
        assert!(result.is_ok());
        assert_eq!(r.value, b"hello");
    }

    #[test]
    fn hands_back_requests_after_reset() {
        let block = MemBlock::new(4096, 4096);
        let offset = stage_value(&block, b"hello");
        block.reset();
        let mut r = ReadValue::new(64);
        r.offset = offset;
        let back = block.get(r);
        assert!(back.is_some());
    }

    #[test]
    fn reset_keeps_capacity() {
        let block = MemBlock::new(128, 256);
        stage_value(&block, b"x");
        block.reset();
        let inner = block.inner.read();
        assert!(inner.toc.is_empty());
        assert!(inner.data.is_empty());
        assert!(inner.data.capacity() >= 256);
    }
}
