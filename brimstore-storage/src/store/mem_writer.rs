//! Memory writer stage: one worker per shard appends incoming values into
//! its current memory block and publishes their in-memory locations.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use brimstore_core::error::Error;
use brimstore_core::metrics::StoreMetrics;
use brimstore_core::types::WriteValue;

use crate::block::MemBlock;
use crate::format::TOC_ENTRY_SIZE;
use crate::locmap::KeyLocationMap;

pub(crate) fn run(
    write_rx: Receiver<WriteValue>,
    cleared_rx: Receiver<Arc<MemBlock>>,
    disk_writable_tx: Sender<Arc<MemBlock>>,
    locmap: Arc<KeyLocationMap>,
    max_value_size: usize,
    metrics: StoreMetrics,
) {
    let mut block: Option<Arc<MemBlock>> = None;
    let mut toc_offset = 0usize;
    let mut data_offset = 0usize;

    while let Ok(w) = write_rx.recv() {
        let len = w.value.len();
        if len > max_value_size {
            w.complete(Err(Error::ValueTooLarge {
                length: len,
                max: max_value_size,
            }));
            continue;
        }

        // hand off a block that cannot take one more entry
        let full = matches!(&block, Some(b) if toc_offset + TOC_ENTRY_SIZE > b.toc_capacity
            || data_offset + 4 + len > b.data_capacity);
        if full {
            if let Some(filled) = block.take() {
                metrics.record_mem_block_flush();
                if disk_writable_tx.send(filled).is_err() {
                    w.complete(Err(Error::NotRunning));
                    return;
                }
            }
        }

        let current = match &block {
            Some(b) => Arc::clone(b),
            None => match cleared_rx.recv() {
                Ok(fresh) => {
                    toc_offset = 0;
                    data_offset = 0;
                    block = Some(Arc::clone(&fresh));
                    fresh
                }
                Err(_) => {
                    // the pipeline was torn down underneath us
                    w.complete(Err(Error::NotRunning));
                    return;
                }
            },
        };

        {
            let mut inner = current.inner.write();
            inner
                .toc
                .extend_from_slice(&(data_offset as u32).to_le_bytes());
            inner.toc.extend_from_slice(&w.key_hash_a.to_le_bytes());
            inner.toc.extend_from_slice(&w.key_hash_b.to_le_bytes());
            inner.toc.extend_from_slice(&w.seq.to_le_bytes());
            inner.data.extend_from_slice(&(len as u32).to_le_bytes());
            inner.data.extend_from_slice(&w.value);
        }
        locmap.set(
            current.id(),
            data_offset as u32,
            w.key_hash_a,
            w.key_hash_b,
            w.seq,
        );
        toc_offset += TOC_ENTRY_SIZE;
        data_offset += 4 + len;
        metrics.record_value_written(len as u64);
        w.complete(Ok(()));
    }

    // shutting down: forward whatever is staged so nothing is lost
    if let Some(current) = block {
        if toc_offset > 0 {
            metrics.record_mem_block_flush();
            let _ = disk_writable_tx.send(current);
        }
    }
}
