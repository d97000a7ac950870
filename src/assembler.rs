//! Reassembly of messages delivered as multiple chunks.
//!
//! Each chunk group is keyed by its group key and guarded by its own mutex; the map of groups
//! is only write-locked to insert or remove a group, so updates to unrelated groups do not
//! serialize behind each other.
//!
//! Invariants:
//! - A group completes at most once: the chunk that makes `received == total` takes the
//!   payload, marks the state done, and removes it from the map.
//! - Chunks are concatenated by index, so arrival order does not matter.
//! - Re-delivery of an index overwrites the earlier bytes.
//! - A chunk whose `total` disagrees with the group is rejected and the group is untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, MonotonicClock};
use crate::error::AssemblyError;

#[derive(Debug)]
struct AssemblyState {
    chunks: BTreeMap<usize, Vec<u8>>,
    total: usize,
    created_millis: u64,
    done: bool,
}

type Slot = Arc<Mutex<AssemblyState>>;

/// Snapshot of an incomplete chunk group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGroup {
    pub group_key: String,
    pub received: usize,
    pub total: usize,
    pub age: Duration,
}

/// Thread-safe chunk reassembler.
#[derive(Debug)]
pub struct ChunkAssembler {
    groups: RwLock<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
    last_sweep_millis: AtomicU64,
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }

    /// Build an assembler that stamps groups with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let last_sweep_millis = AtomicU64::new(clock.now_millis());
        Self { groups: RwLock::new(HashMap::new()), clock, last_sweep_millis }
    }

    /// Record one chunk. Returns the full payload when this chunk completes its group.
    pub fn on_chunk(
        &self,
        group_key: &str,
        index: usize,
        total: usize,
        bytes: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, AssemblyError> {
        if total == 0 {
            return Err(AssemblyError::EmptyGroup { group: group_key.to_string() });
        }
        if index >= total {
            return Err(AssemblyError::IndexOutOfRange {
                group: group_key.to_string(),
                index,
                total,
            });
        }

        let mut bytes = Some(bytes);
        loop {
            let slot = self.slot(group_key, total);
            let mut state = lock(&slot);
            if state.done {
                // Completed or evicted between lookup and lock; start over on a fresh group.
                continue;
            }
            if state.total != total {
                return Err(AssemblyError::TotalMismatch {
                    group: group_key.to_string(),
                    expected: state.total,
                    got: total,
                });
            }

            state.chunks.insert(index, bytes.take().unwrap_or_default());
            if state.chunks.len() < state.total {
                return Ok(None);
            }

            state.done = true;
            let chunks = std::mem::take(&mut state.chunks);
            drop(state);
            self.remove(group_key, &slot);

            let size = chunks.values().map(Vec::len).sum();
            let mut payload = Vec::with_capacity(size);
            for chunk in chunks.into_values() {
                payload.extend_from_slice(&chunk);
            }
            debug!(target: "hub_transport::assembler", group = group_key, total, size, "chunk group assembled");
            return Ok(Some(payload));
        }
    }

    /// Number of incomplete groups currently held.
    pub fn pending_len(&self) -> usize {
        self.groups.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshot of incomplete groups, sorted by key.
    pub fn pending_groups(&self) -> Vec<PendingGroup> {
        let now = self.clock.now_millis();
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<PendingGroup> = groups
            .iter()
            .map(|(key, slot)| {
                let state = lock(slot);
                PendingGroup {
                    group_key: key.clone(),
                    received: state.chunks.len(),
                    total: state.total,
                    age: Duration::from_millis(now.saturating_sub(state.created_millis)),
                }
            })
            .collect();
        pending.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        pending
    }

    /// Drop incomplete groups older than `ttl`. Returns how many were evicted.
    pub fn evict_older_than(&self, ttl: Duration) -> usize {
        let now = self.clock.now_millis();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        let before = groups.len();
        groups.retain(|key, slot| {
            let mut state = lock(slot);
            let stale = now.saturating_sub(state.created_millis) >= ttl_millis;
            if stale {
                state.done = true;
                debug!(
                    target: "hub_transport::assembler",
                    group = %key,
                    received = state.chunks.len(),
                    total = state.total,
                    "evicting stale chunk group"
                );
            }
            !stale
        });
        before - groups.len()
    }

    /// Evict groups older than `ttl`, at most once per `ttl` across all callers.
    pub fn evict_if_due(&self, ttl: Duration) -> usize {
        let now = self.clock.now_millis();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_sweep_millis.load(Ordering::Acquire);
        if now.saturating_sub(last) < ttl_millis {
            return 0;
        }
        if self
            .last_sweep_millis
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        self.evict_older_than(ttl)
    }

    fn slot(&self, group_key: &str, total: usize) -> Slot {
        if let Some(slot) = self.groups.read().unwrap_or_else(|e| e.into_inner()).get(group_key) {
            return slot.clone();
        }
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups
            .entry(group_key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AssemblyState {
                    chunks: BTreeMap::new(),
                    total,
                    created_millis: self.clock.now_millis(),
                    done: false,
                }))
            })
            .clone()
    }

    fn remove(&self, group_key: &str, slot: &Slot) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        if groups.get(group_key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            groups.remove(group_key);
        }
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, AssemblyState> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn split(payload: &[u8], k: usize) -> Vec<Vec<u8>> {
        let size = payload.len().div_ceil(k);
        payload.chunks(size).map(<[u8]>::to_vec).collect()
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![vec![]];
        }
        let mut out = Vec::new();
        for perm in permutations(n - 1) {
            for pos in 0..=perm.len() {
                let mut p = perm.clone();
                p.insert(pos, n - 1);
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn any_arrival_order_yields_payload_once() {
        let payload = b"the quick brown fox jumps over the lazy dog".to_vec();
        let chunks = split(&payload, 4);
        assert_eq!(chunks.len(), 4);

        for (n, order) in permutations(4).into_iter().enumerate() {
            let assembler = ChunkAssembler::new();
            let key = format!("group-{n}");
            let mut completions = Vec::new();
            for &i in &order {
                if let Some(out) = assembler.on_chunk(&key, i, 4, chunks[i].clone()).unwrap() {
                    completions.push(out);
                }
            }
            assert_eq!(completions, vec![payload.clone()], "order {:?}", order);
            assert_eq!(assembler.pending_len(), 0);
        }
    }

    #[test]
    fn partial_group_does_not_complete() {
        let assembler = ChunkAssembler::new();
        assert_eq!(assembler.on_chunk("g", 0, 3, b"a".to_vec()).unwrap(), None);
        assert_eq!(assembler.on_chunk("g", 2, 3, b"c".to_vec()).unwrap(), None);
        assert_eq!(assembler.pending_len(), 1);

        let done = assembler.on_chunk("g", 1, 3, b"b".to_vec()).unwrap();
        assert_eq!(done, Some(b"abc".to_vec()));
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn duplicate_index_overwrites_previous_bytes() {
        let assembler = ChunkAssembler::new();
        assert_eq!(assembler.on_chunk("g", 0, 2, b"old".to_vec()).unwrap(), None);
        assert_eq!(assembler.on_chunk("g", 0, 2, b"new".to_vec()).unwrap(), None);
        let done = assembler.on_chunk("g", 1, 2, b"!".to_vec()).unwrap();
        assert_eq!(done, Some(b"new!".to_vec()));
    }

    #[test]
    fn single_chunk_group_completes_immediately() {
        let assembler = ChunkAssembler::new();
        assert_eq!(assembler.on_chunk("g", 0, 1, b"x".to_vec()).unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn mismatched_total_is_rejected_without_touching_group() {
        let assembler = ChunkAssembler::new();
        assembler.on_chunk("g", 0, 2, b"a".to_vec()).unwrap();
        let err = assembler.on_chunk("g", 1, 3, b"b".to_vec()).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::TotalMismatch { group: "g".into(), expected: 2, got: 3 }
        );
        assert_eq!(assembler.on_chunk("g", 1, 2, b"b".to_vec()).unwrap(), Some(b"ab".to_vec()));
    }

    #[test]
    fn invalid_metadata_is_rejected() {
        let assembler = ChunkAssembler::new();
        assert!(matches!(
            assembler.on_chunk("g", 3, 3, vec![]),
            Err(AssemblyError::IndexOutOfRange { index: 3, total: 3, .. })
        ));
        assert!(matches!(
            assembler.on_chunk("g", 0, 0, vec![]),
            Err(AssemblyError::EmptyGroup { .. })
        ));
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn stale_groups_are_evicted() {
        let clock = ManualClock::new();
        let assembler = ChunkAssembler::with_clock(Arc::new(clock.clone()));
        assembler.on_chunk("old", 0, 2, b"a".to_vec()).unwrap();
        clock.advance_millis(5_000);
        assembler.on_chunk("young", 0, 2, b"a".to_vec()).unwrap();
        clock.advance_millis(1_000);

        let pending = assembler.pending_groups();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].group_key, "old");
        assert_eq!(pending[0].age, Duration::from_secs(6));
        assert_eq!(pending[0].received, 1);

        assert_eq!(assembler.evict_older_than(Duration::from_secs(3)), 1);
        let pending = assembler.pending_groups();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].group_key, "young");

        // a late chunk for an evicted group starts over instead of completing
        assert_eq!(assembler.on_chunk("old", 1, 2, b"b".to_vec()).unwrap(), None);
    }

    #[test]
    fn sweeps_are_throttled_to_once_per_ttl() {
        let clock = ManualClock::new();
        let assembler = ChunkAssembler::with_clock(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(10);

        assembler.on_chunk("a", 0, 2, vec![1]).unwrap();
        clock.advance_millis(10_000);
        assert_eq!(assembler.evict_if_due(ttl), 1);

        assembler.on_chunk("b", 0, 2, vec![1]).unwrap();
        clock.advance_millis(5_000);
        assert_eq!(assembler.evict_if_due(ttl), 0, "too soon after the last sweep");
        clock.advance_millis(5_000);
        assert_eq!(assembler.evict_if_due(ttl), 1);
    }

    #[test]
    fn concurrent_groups_assemble_independently() {
        let assembler = Arc::new(ChunkAssembler::new());
        let handles: Vec<_> = (0..8)
            .map(|g| {
                let assembler = assembler.clone();
                std::thread::spawn(move || {
                    let key = format!("group-{g}");
                    let mut done = Vec::new();
                    for i in (0..16).rev() {
                        if let Some(p) = assembler.on_chunk(&key, i, 16, vec![i as u8]).unwrap() {
                            done.push(p);
                        }
                    }
                    done
                })
            })
            .collect();

        let expected: Vec<u8> = (0..16).collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![expected.clone()]);
        }
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn concurrent_chunks_for_one_group_complete_once() {
        let assembler = Arc::new(ChunkAssembler::new());
        let handles: Vec<_> = (0..32usize)
            .map(|i| {
                let assembler = assembler.clone();
                std::thread::spawn(move || assembler.on_chunk("shared", i, 32, vec![i as u8]).unwrap())
            })
            .collect();

        let completions: Vec<Vec<u8>> =
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0], (0..32).collect::<Vec<u8>>());
    }
}
