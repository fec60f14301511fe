//! TOC writer stage: streams finished pages into timestamped `.toc`
//! files, keeping the newest two files open so pages straddling a value
//! file rotation still land in the right place.
//!
//! Once a page arrives for a third timestamp, no more pages can exist for
//! the oldest open file and it is finalized. Write failures are fatal for
//! the same reason they are in the disk writer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info};

use brimstore_core::metrics::StoreMetrics;

use crate::format::{terminator, HEADER_SIZE, TOC_HEADER};
use crate::framing::ChecksummedWriter;

struct OpenToc {
    timestamp: u64,
    writer: ChecksummedWriter<File>,
    offset: u64,
    path: PathBuf,
}

pub(crate) fn run(
    pending_toc_rx: Receiver<Vec<u8>>,
    free_toc_tx: Sender<Vec<u8>>,
    dir: PathBuf,
    checksum_interval: usize,
    metrics: StoreMetrics,
) {
    let mut newest: Option<OpenToc> = None;
    let mut previous: Option<OpenToc> = None;

    while let Ok(mut page) = pending_toc_rx.recv() {
        let timestamp = LittleEndian::read_u64(&page[4..12]);
        if newest.as_ref().is_some_and(|f| f.timestamp == timestamp) {
            if let Some(file) = newest.as_mut() {
                append_page(file, &page);
            }
        } else if previous.as_ref().is_some_and(|f| f.timestamp == timestamp) {
            if let Some(file) = previous.as_mut() {
                append_page(file, &page);
            }
        } else {
            // a third timestamp retires the oldest open file
            if let Some(retired) = previous.take() {
                close_file(retired, &metrics);
            }
            previous = newest.take();
            newest = Some(open_file(&dir, timestamp, checksum_interval, &page));
        }
        page.clear();
        let _ = free_toc_tx.send(page);
    }

    if let Some(retired) = previous.take() {
        close_file(retired, &metrics);
    }
    if let Some(retired) = newest.take() {
        close_file(retired, &metrics);
    }
}

fn open_file(dir: &Path, timestamp: u64, checksum_interval: usize, page: &[u8]) -> OpenToc {
    let path = dir.join(format!("{timestamp}.toc"));
    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            error!(path = %path.display(), error = %e, "toc file create failed");
            panic!("toc file create failed: {e}");
        }
    };
    let mut writer = ChecksummedWriter::new(file, checksum_interval);
    if let Err(e) = writer.write_all(TOC_HEADER).and_then(|_| writer.write_all(page)) {
        error!(path = %path.display(), error = %e, "toc write failed");
        panic!("toc write failed: {e}");
    }
    info!(path = %path.display(), "opened toc file");
    OpenToc {
        timestamp,
        writer,
        offset: (HEADER_SIZE + page.len()) as u64,
        path,
    }
}

fn append_page(file: &mut OpenToc, page: &[u8]) {
    if let Err(e) = file.writer.write_all(page) {
        error!(path = %file.path.display(), error = %e, "toc write failed");
        panic!("toc write failed: {e}");
    }
    file.offset += page.len() as u64;
}

fn close_file(file: OpenToc, metrics: &StoreMetrics) {
    let OpenToc {
        mut writer,
        offset,
        path,
        ..
    } = file;
    if let Err(e) = writer.write_all(&terminator(offset)) {
        error!(path = %path.display(), error = %e, "toc write failed");
        panic!("toc write failed: {e}");
    }
    match writer.finish() {
        Ok(bytes) => {
            metrics.record_toc_log_bytes(bytes);
            info!(path = %path.display(), bytes, "closed toc file");
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "toc close failed");
            panic!("toc close failed: {e}");
        }
    }
}
