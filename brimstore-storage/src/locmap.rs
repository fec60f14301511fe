//! Concurrent key-location map.
//!
//! Maps a 128-bit key hash to the current location of its value: a block
//! id, an offset inside that block, and the winning sequence number. The
//! map is written twice per value (once when the memory writer stages it,
//! once when the clearer repoints it at disk) while readers resolve
//! locations at any time from any thread.
//!
//! Layout: a fixed power-of-two array of stripes selected by the high bits
//! of `key_hash_a`, each holding its own lock and bucket table indexed by
//! `key_hash_b`. A stripe that passes its load factor is rebuilt at double
//! width by a background thread; `is_resizing` reports whether any such
//! rebuild is in flight so shutdown can wait for the map to quiesce.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use brimstore_core::utils::next_power_of_two;

/// Where a key's current value lives. A `block_id` of zero means the key
/// is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyLocation {
    pub block_id: u16,
    pub offset: u32,
    pub seq: u64,
}

const INITIAL_BUCKETS: usize = 64;
/// Mean chain length that triggers a stripe rebuild.
const GROW_LOAD_FACTOR: usize = 4;

struct LocEntry {
    key_hash_a: u64,
    key_hash_b: u64,
    block_id: u16,
    offset: u32,
    seq: u64,
}

struct BucketTable {
    buckets: Vec<Vec<LocEntry>>,
    mask: u64,
    entries: usize,
}

struct Stripe {
    table: RwLock<BucketTable>,
    growing: AtomicBool,
}

pub struct KeyLocationMap {
    stripes: Box<[Arc<Stripe>]>,
    stripe_mask: usize,
    resizing: Arc<AtomicUsize>,
}

impl KeyLocationMap {
    /// Size the stripe array for the given worker parallelism.
    pub fn new(cores: usize) -> Self {
        let count = (next_power_of_two((cores.max(1) * 4) as u64) as usize).clamp(16, 65536);
        let stripes = (0..count)
            .map(|_| {
                Arc::new(Stripe {
                    table: RwLock::new(BucketTable {
                        buckets: (0..INITIAL_BUCKETS).map(|_| Vec::new()).collect(),
                        mask: INITIAL_BUCKETS as u64 - 1,
                        entries: 0,
                    }),
                    growing: AtomicBool::new(false),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            stripes,
            stripe_mask: count - 1,
            resizing: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn stripe_index(&self, key_hash_a: u64) -> usize {
        ((key_hash_a >> 48) as usize) & self.stripe_mask
    }

    /// Resolve a key to its current location; zeroed when absent. The
    /// triple is read under the stripe lock, so it is never seen torn.
    pub fn get(&self, key_hash_a: u64, key_hash_b: u64) -> KeyLocation {
        let stripe = &self.stripes[self.stripe_index(key_hash_a)];
        let table = stripe.table.read();
        let bucket = &table.buckets[(key_hash_b & table.mask) as usize];
        for entry in bucket {
            if entry.key_hash_a == key_hash_a && entry.key_hash_b == key_hash_b {
                return KeyLocation {
                    block_id: entry.block_id,
                    offset: entry.offset,
                    seq: entry.seq,
                };
            }
        }
        KeyLocation::default()
    }

    /// Insert or update a key's location. A stored seq above the incoming
    /// one wins and the call is a no-op. An incoming seq at or above the
    /// stored one replaces the whole triple; equality must replace, since
    /// that is how a flushed value moves from its memory block to its disk
    /// location without changing version.
    pub fn set(&self, block_id: u16, offset: u32, key_hash_a: u64, key_hash_b: u64, seq: u64) {
        let stripe = &self.stripes[self.stripe_index(key_hash_a)];
        let overloaded = {
            let mut table = stripe.table.write();
            let index = (key_hash_b & table.mask) as usize;
            let mut found = false;
            for entry in &mut table.buckets[index] {
                if entry.key_hash_a == key_hash_a && entry.key_hash_b == key_hash_b {
                    if seq >= entry.seq {
                        entry.block_id = block_id;
                        entry.offset = offset;
                        entry.seq = seq;
                    }
                    found = true;
                    break;
                }
            }
            if !found {
                table.buckets[index].push(LocEntry {
                    key_hash_a,
                    key_hash_b,
                    block_id,
                    offset,
                    seq,
                });
                table.entries += 1;
            }
            table.entries > table.buckets.len() * GROW_LOAD_FACTOR
        };
        if overloaded && !stripe.growing.swap(true, Ordering::SeqCst) {
            self.spawn_grow(Arc::clone(stripe));
        }
    }

    /// Whether any stripe rebuild is currently in flight.
    pub fn is_resizing(&self) -> bool {
        self.resizing.load(Ordering::SeqCst) > 0
    }

    /// Number of keys currently mapped.
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.table.read().entries).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_grow(&self, stripe: Arc<Stripe>) {
        let resizing = Arc::clone(&self.resizing);
        resizing.fetch_add(1, Ordering::SeqCst);
        thread::Builder::new()
            .name("locmap-grow".into())
            .spawn(move || {
                grow_stripe(&stripe);
                stripe.growing.store(false, Ordering::SeqCst);
                resizing.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("failed to spawn locmap grow thread");
    }
}

fn grow_stripe(stripe: &Stripe) {
    let mut table = stripe.table.write();
    let new_len = table.buckets.len() * 2;
    let mask = new_len as u64 - 1;
    let mut buckets: Vec<Vec<LocEntry>> = (0..new_len).map(|_| Vec::new()).collect();
    for bucket in std::mem::take(&mut table.buckets) {
        for entry in bucket {
            buckets[(entry.key_hash_b & mask) as usize].push(entry);
        }
    }
    table.buckets = buckets;
    table.mask = mask;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiesce(map: &KeyLocationMap) {
        while map.is_resizing() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn absent_keys_resolve_to_zero() {
        let map = KeyLocationMap::new(2);
        assert_eq!(map.get(99, 99), KeyLocation::default());
        assert!(map.is_empty());
    }

    #[test]
    fn set_then_get() {
        let map = KeyLocationMap::new(2);
        map.set(3, 128, 1, 2, 10);
        assert_eq!(
            map.get(1, 2),
            KeyLocation {
                block_id: 3,
                offset: 128,
                seq: 10
            }
        );
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn stale_seq_is_a_no_op() {
        let map = KeyLocationMap::new(2);
        map.set(3, 128, 1, 2, 10);
        map.set(4, 256, 1, 2, 5);
        assert_eq!(
            map.get(1, 2),
            KeyLocation {
                block_id: 3,
                offset: 128,
                seq: 10
            }
        );
        map.set(5, 512, 1, 2, 11);
        assert_eq!(
            map.get(1, 2),
            KeyLocation {
                block_id: 5,
                offset: 512,
                seq: 11
            }
        );
    }

    #[test]
    fn equal_seq_moves_the_location() {
        let map = KeyLocationMap::new(2);
        // staged in a memory block, then repointed at disk by the clearer
        map.set(3, 128, 1, 2, 10);
        map.set(9, 4096, 1, 2, 10);
        assert_eq!(
            map.get(1, 2),
            KeyLocation {
                block_id: 9,
                offset: 4096,
                seq: 10
            }
        );
    }

    #[test]
    fn grows_under_load_and_quiesces() {
        let map = KeyLocationMap::new(1);
        // all keys share key_hash_a high bits, forcing one stripe to grow
        for i in 0..2000u64 {
            map.set(1, i as u32, 7, i, 1);
        }
        quiesce(&map);
        assert_eq!(map.len(), 2000);
        for i in 0..2000u64 {
            let loc = map.get(7, i);
            assert_eq!(loc.block_id, 1, "key {i}");
            assert_eq!(loc.offset, i as u32);
        }
        assert!(!map.is_resizing());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let map = Arc::new(KeyLocationMap::new(4));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..5000u64 {
                    let a = (t << 48) | i;
                    map.set(2, i as u32, a, i.wrapping_mul(31), i + 1);
                    let loc = map.get(a, i.wrapping_mul(31));
                    assert_eq!(loc.block_id, 2);
                    assert!(loc.seq >= 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        quiesce(&map);
        assert_eq!(map.len(), 20000);
    }
}
