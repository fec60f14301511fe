//! # Request Objects
//!
//! PUT and GET are asynchronous: the caller fills in a request object,
//! enqueues it, and waits on the request's single-slot completion channel.
//! Buffers travel with the request so the steady-state path never
//! allocates.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::Result;

/// Completion message for a read: the request object comes back with
/// `value` and `seq` filled on success, so its buffer can be reused.
pub type ReadReply = (ReadValue, Result<()>);

/// A pending write.
#[derive(Debug)]
pub struct WriteValue {
    pub key_hash_a: u64,
    pub key_hash_b: u64,
    pub value: Bytes,
    /// Caller-supplied version; the highest seq for a key wins.
    pub seq: u64,
    written_tx: Sender<Result<()>>,
    /// Receives exactly one completion result.
    pub written_rx: Receiver<Result<()>>,
}

impl WriteValue {
    pub fn new(key_hash_a: u64, key_hash_b: u64, value: Bytes, seq: u64) -> Self {
        let (written_tx, written_rx) = bounded(1);
        Self {
            key_hash_a,
            key_hash_b,
            value,
            seq,
            written_tx,
            written_rx,
        }
    }

    /// Signal the waiting caller. Extra signals are dropped, so a request
    /// can never be completed twice.
    pub fn complete(&self, result: Result<()>) {
        let _ = self.written_tx.try_send(result);
    }
}

/// A pending read.
#[derive(Debug)]
pub struct ReadValue {
    pub key_hash_a: u64,
    pub key_hash_b: u64,
    /// Caller-owned buffer, rewritten with the value bytes on success.
    pub value: Vec<u8>,
    /// Version of the returned value, filled from the key-location index.
    pub seq: u64,
    /// Location offset, filled by the store during dispatch.
    pub offset: u32,
    read_tx: Sender<ReadReply>,
    /// Receives exactly one completion reply.
    pub read_rx: Receiver<ReadReply>,
}

impl ReadValue {
    /// A request whose buffer can hold any value up to `max_value_size`
    /// without reallocating.
    pub fn new(max_value_size: usize) -> Self {
        let (read_tx, read_rx) = bounded(1);
        Self {
            key_hash_a: 0,
            key_hash_b: 0,
            value: Vec::with_capacity(max_value_size),
            seq: 0,
            offset: 0,
            read_tx,
            read_rx,
        }
    }

    /// Hand the request back to the waiting caller, exactly once.
    pub fn complete(self, result: Result<()>) {
        let tx = self.read_tx.clone();
        let _ = tx.try_send((self, result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn write_completion_is_single_shot() {
        let w = WriteValue::new(1, 2, Bytes::from_static(b"abc"), 7);
        let rx = w.written_rx.clone();
        w.complete(Ok(()));
        w.complete(Err(Error::KeyNotFound));
        assert!(rx.recv().unwrap().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn read_completion_returns_the_request() {
        let mut r = ReadValue::new(64);
        r.key_hash_a = 42;
        r.value.extend_from_slice(b"payload");
        let rx = r.read_rx.clone();
        r.complete(Ok(()));
        let (r, result) = rx.recv().unwrap();
        assert!(result.is_ok());
        assert_eq!(r.key_hash_a, 42);
        assert_eq!(r.value, b"payload");
    }

    #[test]
    fn read_buffer_is_preallocated() {
        let r = ReadValue::new(4096);
        assert!(r.value.capacity() >= 4096);
        assert!(r.value.is_empty());
    }
}
