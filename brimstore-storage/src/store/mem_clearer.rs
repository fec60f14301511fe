//! Memory clearer stage: folds flushed blocks into the key-location index,
//! accumulates TOC pages for the TOC writer, and recycles the buffers.
//!
//! Ordering inside a block matters: every entry is repointed at its disk
//! location before the buffer is wiped, so a concurrent read resolves to
//! either the still-intact memory copy or the already-written disk copy.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{Receiver, Sender};
use tracing::error;

use brimstore_core::metrics::StoreMetrics;

use crate::block::{BlockRegistry, MemBlock};
use crate::format::TOC_ENTRY_SIZE;
use crate::locmap::KeyLocationMap;

pub(crate) fn run(
    clearable_rx: Receiver<Arc<MemBlock>>,
    cleared_tx: Sender<Arc<MemBlock>>,
    free_toc_rx: Receiver<Vec<u8>>,
    pending_toc_tx: Sender<Vec<u8>>,
    registry: Arc<BlockRegistry>,
    locmap: Arc<KeyLocationMap>,
    metrics: StoreMetrics,
) {
    let mut page: Option<Vec<u8>> = None;
    let mut page_timestamp: i64 = 0;
    // set when the TOC writer is gone; the index fold and block recycling
    // must keep running regardless, or the whole pipeline wedges
    let mut toc_lost = false;

    while let Ok(mb) = clearable_rx.recv() {
        {
            let inner = mb.inner.read();
            if inner.toc.is_empty() {
                // freshly seeded buffer from startup; nothing to fold
                drop(inner);
                mb.reset();
                if cleared_tx.send(mb).is_err() {
                    return;
                }
                continue;
            }
            let disk_id = inner.disk_id;
            let disk_offset = inner.disk_offset;
            let Some(block_timestamp) = registry.timestamp(disk_id) else {
                error!(disk_id, "flushed block names an unregistered disk file");
                panic!("flushed block names an unregistered disk file");
            };

            // pages hold entries for exactly one disk file
            if page.is_some() && page_timestamp != block_timestamp {
                if let Some(finished) = page.take() {
                    flush_page(finished, &pending_toc_tx, &metrics);
                }
            }

            for record in inner.toc.chunks_exact(TOC_ENTRY_SIZE) {
                let data_offset = LittleEndian::read_u32(&record[0..4]);
                let key_hash_a = LittleEndian::read_u64(&record[4..12]);
                let key_hash_b = LittleEndian::read_u64(&record[12..20]);
                let seq = LittleEndian::read_u64(&record[20..28]);
                locmap.set(disk_id, disk_offset + data_offset, key_hash_a, key_hash_b, seq);

                if toc_lost {
                    continue;
                }
                if let Some(open) = &page {
                    if open.len() + TOC_ENTRY_SIZE > open.capacity() {
                        if let Some(finished) = page.take() {
                            flush_page(finished, &pending_toc_tx, &metrics);
                        }
                    }
                }
                if page.is_none() {
                    match free_toc_rx.recv() {
                        Ok(mut fresh) => {
                            fresh.clear();
                            fresh.extend_from_slice(&[0u8; 4]);
                            fresh.extend_from_slice(&(block_timestamp as u64).to_le_bytes());
                            page_timestamp = block_timestamp;
                            page = Some(fresh);
                        }
                        Err(_) => {
                            toc_lost = true;
                            continue;
                        }
                    }
                }
                if let Some(open) = page.as_mut() {
                    open.extend_from_slice(&(disk_offset + data_offset).to_le_bytes());
                    open.extend_from_slice(&key_hash_a.to_le_bytes());
                    open.extend_from_slice(&key_hash_b.to_le_bytes());
                    open.extend_from_slice(&seq.to_le_bytes());
                }
            }
        }

        mb.reset();
        if cleared_tx.send(mb).is_err() {
            return;
        }
    }

    // shutting down: the in-flight page still has to reach the TOC writer
    if let Some(finished) = page.take() {
        flush_page(finished, &pending_toc_tx, &metrics);
    }
}

fn flush_page(mut page: Vec<u8>, pending_toc_tx: &Sender<Vec<u8>>, metrics: &StoreMetrics) {
    let body_len = (page.len() - 4) as u32;
    LittleEndian::write_u32(&mut page[0..4], body_len);
    metrics.record_toc_page();
    let _ = pending_toc_tx.send(page);
}
