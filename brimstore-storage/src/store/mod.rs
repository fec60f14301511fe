//! The store façade: owns the block registry, the key-location map, and
//! the pipeline worker threads.
//!
//! ```text
//! Put ──> mem writer ──(full block)──> disk writer ──> mem clearer ──> TOC writer
//!            ▲                                             │
//!            └────────────── cleared block pool ◄──────────┘
//! ```
//!
//! Memory blocks and TOC page buffers are created once at start and cycle
//! through a closed graph of bounded queues; back-pressure arises because
//! a writer cannot take a new buffer until a previous one has completed
//! the loop. Shutdown walks the pipeline in stage order, using channel
//! disconnection as the end-of-input sentinel for each stage.

mod disk_writer;
mod mem_clearer;
mod mem_writer;
mod toc_writer;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::info;

use brimstore_core::config::StoreConfig;
use brimstore_core::error::{Error, Result};
use brimstore_core::metrics::{StoreMetrics, StoreMetricsSnapshot};
use brimstore_core::types::{ReadValue, WriteValue};

use crate::block::{BlockRegistry, LocationBlock, MemBlock, BLOCK_ID_OFFSET};
use crate::locmap::KeyLocationMap;

/// Append-only, log-structured value store.
pub struct Store {
    config: StoreConfig,
    registry: Arc<BlockRegistry>,
    locmap: Arc<KeyLocationMap>,
    metrics: StoreMetrics,
    pipeline: Option<Pipeline>,
}

struct Pipeline {
    write_txs: Vec<Sender<WriteValue>>,
    cleared_rx: Receiver<Arc<MemBlock>>,
    mem_writers: Vec<JoinHandle<()>>,
    disk_writer: JoinHandle<()>,
    mem_clearers: Vec<JoinHandle<()>>,
    toc_writer: JoinHandle<()>,
}

impl Store {
    /// Build a store. No workers run and no files exist until `start`.
    pub fn new(config: StoreConfig) -> Self {
        let config = config.clamped();
        Self {
            locmap: Arc::new(KeyLocationMap::new(config.cores)),
            registry: Arc::new(BlockRegistry::new()),
            metrics: StoreMetrics::new(),
            pipeline: None,
            config,
        }
    }

    /// Largest value length this store accepts.
    pub fn max_value_size(&self) -> usize {
        self.config.max_value_size
    }

    /// A read request whose buffer can hold any value this store accepts.
    pub fn new_read_value(&self) -> ReadValue {
        ReadValue::new(self.config.max_value_size)
    }

    /// Current operation counters.
    pub fn metrics(&self) -> StoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the pipeline workers and seed the buffer pools. Calling
    /// `start` on a running store is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.data_dir)?;
        let cores = self.config.cores;

        let (clearable_tx, clearable_rx) = bounded::<Arc<MemBlock>>(cores);
        let (cleared_tx, cleared_rx) = bounded::<Arc<MemBlock>>(cores);
        let (disk_writable_tx, disk_writable_rx) = bounded::<Arc<MemBlock>>(cores);
        let (free_toc_tx, free_toc_rx) = bounded::<Vec<u8>>(cores);
        let (pending_toc_tx, pending_toc_rx) = bounded::<Vec<u8>>(cores);

        // Half the blocks start in the clear queue and half in the cleared
        // pool, so writers and clearers can both make progress immediately.
        for _ in 0..cores {
            let _ = clearable_tx.send(self.new_mem_block()?);
        }
        for _ in 0..cores {
            let _ = cleared_tx.send(self.new_mem_block()?);
        }
        for _ in 0..cores {
            let _ = free_toc_tx.send(Vec::with_capacity(self.config.mem_toc_page_size));
        }

        let toc_writer = thread::Builder::new()
            .name("toc-writer".into())
            .spawn({
                let dir = self.config.data_dir.clone();
                let interval = self.config.checksum_interval;
                let metrics = self.metrics.clone();
                move || toc_writer::run(pending_toc_rx, free_toc_tx, dir, interval, metrics)
            })?;

        let disk_writer = thread::Builder::new()
            .name("disk-writer".into())
            .spawn({
                let registry = Arc::clone(&self.registry);
                let dir = self.config.data_dir.clone();
                let interval = self.config.checksum_interval;
                let metrics = self.metrics.clone();
                move || {
                    disk_writer::run(
                        disk_writable_rx,
                        clearable_tx,
                        registry,
                        dir,
                        interval,
                        cores,
                        metrics,
                    )
                }
            })?;

        let mut mem_clearers = Vec::with_capacity(cores);
        for i in 0..cores {
            let handle = thread::Builder::new()
                .name(format!("mem-clearer-{i}"))
                .spawn({
                    let clearable_rx = clearable_rx.clone();
                    let cleared_tx = cleared_tx.clone();
                    let free_toc_rx = free_toc_rx.clone();
                    let pending_toc_tx = pending_toc_tx.clone();
                    let registry = Arc::clone(&self.registry);
                    let locmap = Arc::clone(&self.locmap);
                    let metrics = self.metrics.clone();
                    move || {
                        mem_clearer::run(
                            clearable_rx,
                            cleared_tx,
                            free_toc_rx,
                            pending_toc_tx,
                            registry,
                            locmap,
                            metrics,
                        )
                    }
                })?;
            mem_clearers.push(handle);
        }

        let mut write_txs = Vec::with_capacity(cores);
        let mut mem_writers = Vec::with_capacity(cores);
        for i in 0..cores {
            let (write_tx, write_rx) = bounded::<WriteValue>(cores);
            write_txs.push(write_tx);
            let handle = thread::Builder::new()
                .name(format!("mem-writer-{i}"))
                .spawn({
                    let cleared_rx = cleared_rx.clone();
                    let disk_writable_tx = disk_writable_tx.clone();
                    let locmap = Arc::clone(&self.locmap);
                    let max_value_size = self.config.max_value_size;
                    let metrics = self.metrics.clone();
                    move || {
                        mem_writer::run(
                            write_rx,
                            cleared_rx,
                            disk_writable_tx,
                            locmap,
                            max_value_size,
                            metrics,
                        )
                    }
                })?;
            mem_writers.push(handle);
        }

        info!(cores, dir = %self.config.data_dir.display(), "store started");
        self.pipeline = Some(Pipeline {
            write_txs,
            cleared_rx,
            mem_writers,
            disk_writer,
            mem_clearers,
            toc_writer,
        });
        Ok(())
    }

    /// Drain the pipeline stage by stage and join every worker. Returns
    /// the total physical bytes written to value and TOC files over the
    /// store's lifetime. Idempotent.
    pub fn stop(&mut self) -> u64 {
        if let Some(pipeline) = self.pipeline.take() {
            let Pipeline {
                write_txs,
                cleared_rx,
                mem_writers,
                disk_writer,
                mem_clearers,
                toc_writer,
            } = pipeline;

            // 1. no more writes: the shard channels disconnect and each
            //    memory writer forwards its staged block before exiting
            drop(write_txs);
            for handle in mem_writers {
                handle.join().expect("mem writer thread panicked");
            }
            // 2. the disk queue is now senderless; the disk writer drains
            //    it, terminates the open value file, and exits
            disk_writer.join().expect("disk writer thread panicked");
            // 3. reclaim every buffer so the clearers' final sends never
            //    block on the bounded cleared pool
            for _ in 0..self.config.cores * 2 {
                let _ = cleared_rx.recv();
            }
            for handle in mem_clearers {
                handle.join().expect("mem clearer thread panicked");
            }
            // 4. the TOC queue is senderless; the TOC writer finalizes
            //    both open files and exits
            toc_writer.join().expect("toc writer thread panicked");
            // 5. let any in-flight index rebuild settle
            while self.locmap.is_resizing() {
                thread::sleep(Duration::from_millis(10));
            }
            info!("store stopped");
        }
        let snapshot = self.metrics.snapshot();
        snapshot.value_log_bytes + snapshot.toc_log_bytes
    }

    /// Queue a write for its key's shard. The outcome arrives on the
    /// request's completion channel; back-pressure blocks the enqueue when
    /// the shard is saturated.
    pub fn put(&self, w: WriteValue) -> Result<()> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(Error::NotRunning);
        };
        let shard = ((w.key_hash_a >> 1) as usize) % pipeline.write_txs.len();
        if let Err(err) = pipeline.write_txs[shard].send(w) {
            err.into_inner().complete(Err(Error::NotRunning));
            return Err(Error::NotRunning);
        }
        Ok(())
    }

    /// Resolve a key and serve the read; the outcome arrives on the
    /// request's completion channel. Reads work against memory and disk
    /// locations alike, including after `stop`.
    pub fn get(&self, mut r: ReadValue) {
        loop {
            let loc = self.locmap.get(r.key_hash_a, r.key_hash_b);
            if loc.block_id < BLOCK_ID_OFFSET {
                r.complete(Err(Error::KeyNotFound));
                return;
            }
            r.seq = loc.seq;
            r.offset = loc.offset;
            match self.registry.get(loc.block_id) {
                Some(block) => match block.get(r) {
                    None => return,
                    // the block was flushed and reset between the lookup
                    // and the read; the index now names the disk copy
                    Some(back) => r = back,
                },
                None => {
                    r.complete(Err(Error::Internal {
                        message: format!("location names unknown block {}", loc.block_id),
                    }));
                    return;
                }
            }
        }
    }

    fn new_mem_block(&self) -> Result<Arc<MemBlock>> {
        let block = MemBlock::new(
            self.config.mem_toc_page_size,
            self.config.mem_values_page_size,
        );
        let id = self
            .registry
            .register(LocationBlock::Mem(Arc::clone(&block)))?;
        block.set_id(id);
        Ok(block)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.pipeline.is_some() && !thread::panicking() {
            self.stop();
        }
    }
}
