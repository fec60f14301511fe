//! On-disk location block: an append-only value file plus a fixed pool of
//! reader threads serving random GETs against it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use brimstore_core::error::{Error, Result};
use brimstore_core::metrics::StoreMetrics;
use brimstore_core::types::ReadValue;

use crate::framing::{ChecksummedReader, ChecksummedWriter};

/// Reader handles (and threads) per value file.
pub const READERS_PER_BLOCK: usize = 4;

pub struct DiskBlock {
    id: AtomicU16,
    timestamp: i64,
    path: PathBuf,
    read_txs: Vec<Sender<ReadValue>>,
}

impl DiskBlock {
    /// Create the value file and spawn its reader pool. Returns the block
    /// together with the append writer that the disk writer stage owns.
    pub fn create(
        dir: &Path,
        timestamp: i64,
        checksum_interval: usize,
        queue_depth: usize,
        metrics: StoreMetrics,
    ) -> Result<(Arc<Self>, ChecksummedWriter<File>)> {
        let path = dir.join(format!("{timestamp}.values"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let writer = ChecksummedWriter::new(file, checksum_interval);

        let mut read_txs = Vec::with_capacity(READERS_PER_BLOCK);
        for i in 0..READERS_PER_BLOCK {
            let handle = File::open(&path)?;
            let reader = ChecksummedReader::new(handle, checksum_interval);
            let (tx, rx) = bounded(queue_depth);
            read_txs.push(tx);
            let reader_path = path.clone();
            let reader_metrics = metrics.clone();
            thread::Builder::new()
                .name(format!("values-reader-{timestamp}-{i}"))
                .spawn(move || reader_loop(reader, rx, reader_path, reader_metrics))?;
        }

        debug!(path = %path.display(), "created value file");
        Ok((
            Arc::new(Self {
                id: AtomicU16::new(0),
                timestamp,
                path,
                read_txs,
            }),
            writer,
        ))
    }

    /// Registry id, assigned once right after registration.
    pub fn id(&self) -> u16 {
        self.id.load(Ordering::SeqCst)
    }

    pub fn set_id(&self, id: u16) {
        self.id.store(id, Ordering::SeqCst);
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue the request on one of the reader threads.
    pub fn get(&self, r: ReadValue) {
        let lane = ((r.key_hash_a >> 1) as usize) % self.read_txs.len();
        if let Err(err) = self.read_txs[lane].send(r) {
            // reader threads live as long as the block; this only happens
            // if one panicked
            err.into_inner().complete(Err(Error::Internal {
                message: "value file reader is gone".into(),
            }));
        }
    }
}

fn reader_loop(
    mut reader: ChecksummedReader<File>,
    rx: Receiver<ReadValue>,
    path: PathBuf,
    metrics: StoreMetrics,
) {
    while let Ok(mut r) = rx.recv() {
        let result = read_value(&mut reader, &mut r);
        match &result {
            Ok(()) => metrics.record_read(),
            Err(e) => {
                metrics.record_read_error();
                warn!(path = %path.display(), offset = r.offset, error = %e, "value read failed");
            }
        }
        r.complete(result);
    }
}

fn read_value(reader: &mut ChecksummedReader<File>, r: &mut ReadValue) -> Result<()> {
    reader.seek(r.offset as u64)?;
    let len = reader.read_u32()? as usize;
    if len > r.value.capacity() {
        return Err(Error::InvalidData {
            message: format!("value length {len} exceeds request buffer"),
        });
    }
    r.value.resize(len, 0);
    reader.read_exact(&mut r.value)?;
    Ok(())
}
