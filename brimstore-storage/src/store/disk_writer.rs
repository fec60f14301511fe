//! Disk writer stage: streams filled memory blocks into the active
//! `.values` file, rotating to a fresh file before the logical offset
//! could overflow the 32-bit location space.
//!
//! Write failures here are fatal. The value log is the only durable copy
//! of the data, and there is no consistent state to fall back to once an
//! append has partially happened.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info};

use brimstore_core::metrics::StoreMetrics;
use brimstore_core::utils::timestamp_nanos;

use crate::block::{BlockRegistry, DiskBlock, LocationBlock, MemBlock};
use crate::format::{terminator, HEADER_SIZE, TERMINATOR_SIZE, VALUES_HEADER};
use crate::framing::ChecksummedWriter;

struct ActiveFile {
    block: Arc<DiskBlock>,
    writer: ChecksummedWriter<File>,
    /// Logical offset where the next block's data will land.
    offset: u32,
}

pub(crate) fn run(
    disk_writable_rx: Receiver<Arc<MemBlock>>,
    clearable_tx: Sender<Arc<MemBlock>>,
    registry: Arc<BlockRegistry>,
    dir: PathBuf,
    checksum_interval: usize,
    queue_depth: usize,
    metrics: StoreMetrics,
) {
    let mut active: Option<ActiveFile> = None;

    while let Ok(mb) = disk_writable_rx.recv() {
        let data_len = mb.inner.read().data.len();

        if let Some(file) = &active {
            let projected =
                file.offset as u64 + data_len as u64 + (HEADER_SIZE + TERMINATOR_SIZE) as u64;
            if projected > u32::MAX as u64 {
                close_file(active.take(), &metrics);
            }
        }
        let file = active.get_or_insert_with(|| {
            open_file(&registry, &dir, checksum_interval, queue_depth, &metrics)
        });

        {
            let inner = mb.inner.read();
            if let Err(e) = file.writer.write_all(&inner.data) {
                error!(path = %file.block.path().display(), error = %e, "value log write failed");
                panic!("value log write failed: {e}");
            }
        }
        // make the just-written bytes readable before anything repoints at
        // them
        if let Err(e) = file.writer.checkpoint() {
            error!(path = %file.block.path().display(), error = %e, "value log flush failed");
            panic!("value log flush failed: {e}");
        }

        {
            let mut inner = mb.inner.write();
            inner.disk_id = file.block.id();
            inner.disk_offset = file.offset;
        }
        file.offset += data_len as u32;

        if clearable_tx.send(mb).is_err() {
            break;
        }
    }

    close_file(active.take(), &metrics);
}

fn open_file(
    registry: &BlockRegistry,
    dir: &Path,
    checksum_interval: usize,
    queue_depth: usize,
    metrics: &StoreMetrics,
) -> ActiveFile {
    let timestamp = timestamp_nanos();
    let (block, mut writer) =
        match DiskBlock::create(dir, timestamp, checksum_interval, queue_depth, metrics.clone()) {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "value file create failed");
                panic!("value file create failed: {e}");
            }
        };
    match registry.register(LocationBlock::Disk(Arc::clone(&block))) {
        Ok(id) => block.set_id(id),
        Err(e) => {
            error!(error = %e, "location block registration failed");
            panic!("location block registration failed: {e}");
        }
    }
    if let Err(e) = writer.write_all(VALUES_HEADER) {
        error!(path = %block.path().display(), error = %e, "value log write failed");
        panic!("value log write failed: {e}");
    }
    metrics.record_value_file_created();
    info!(path = %block.path().display(), "opened value file");
    ActiveFile {
        block,
        writer,
        offset: HEADER_SIZE as u32,
    }
}

fn close_file(active: Option<ActiveFile>, metrics: &StoreMetrics) {
    let Some(file) = active else {
        return;
    };
    let ActiveFile {
        block,
        mut writer,
        offset,
    } = file;
    if let Err(e) = writer.write_all(&terminator(offset as u64)) {
        error!(path = %block.path().display(), error = %e, "value log write failed");
        panic!("value log write failed: {e}");
    }
    match writer.finish() {
        Ok(bytes) => {
            metrics.record_value_log_bytes(bytes);
            info!(path = %block.path().display(), bytes, "closed value file");
        }
        Err(e) => {
            error!(path = %block.path().display(), error = %e, "value log close failed");
            panic!("value log close failed: {e}");
        }
    }
}
