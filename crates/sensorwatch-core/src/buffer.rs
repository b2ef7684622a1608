//! Bounded, thread-safe telemetry buffer.
//!
//! Architecture:
//! 1. One mutex guards the arrival-ordered store and the per-machine counts
//! 2. `append` evicts the oldest arrival inline when full (O(1))
//! 3. `snapshot` copies matching records inside the critical section and
//!    sorts them by timestamp after the lock is released
//! 4. `replace_all` swaps the whole store under the same lock, so readers see
//!    either the old or the new contents
//!
//! Eviction is FIFO by arrival, not per machine: a chatty machine can crowd
//! out the history of quieter ones.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::query::QueryResult;
use crate::record::TelemetryRecord;

/// Default number of records retained.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Thread-safe fixed-capacity telemetry store.
pub struct TelemetryBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
}

#[derive(Default)]
struct BufferState {
    records: VecDeque<TelemetryRecord>,
    machines: HashMap<String, usize>,
    total_appended: u64,
    total_evicted: u64,
}

impl BufferState {
    fn push(&mut self, record: TelemetryRecord) {
        *self.machines.entry(record.machine_id.clone()).or_insert(0) += 1;
        self.records.push_back(record);
        self.total_appended += 1;
    }

    fn evict_oldest(&mut self) {
        let Some(old) = self.records.pop_front() else {
            return;
        };
        if let Some(count) = self.machines.get_mut(&old.machine_id) {
            *count -= 1;
            if *count == 0 {
                self.machines.remove(&old.machine_id);
            }
        }
        self.total_evicted += 1;
    }
}

impl TelemetryBuffer {
    /// Create an empty buffer holding at most `capacity` records.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("buffer capacity must be at least 1".into()));
        }
        Ok(Self {
            capacity,
            state: Mutex::new(BufferState {
                records: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
        })
    }

    /// Create an empty buffer with [`DEFAULT_CAPACITY`].
    pub fn with_default_capacity() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            state: Mutex::new(BufferState {
                records: VecDeque::with_capacity(DEFAULT_CAPACITY),
                ..Default::default()
            }),
        }
    }

    // Every mutation leaves the state consistent before any call that could
    // panic, so a poisoned lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert one normalized record, evicting the oldest arrival when full.
    pub fn append(&self, record: TelemetryRecord) {
        let mut state = self.lock();
        if state.records.len() >= self.capacity {
            state.evict_oldest();
        }
        state.push(record);
    }

    /// Atomically replace the whole contents. When more than `capacity`
    /// records are given, the last `capacity` (in the given order) are kept.
    /// Returns the number of records retained.
    pub fn replace_all(&self, records: Vec<TelemetryRecord>) -> usize {
        let skip = records.len().saturating_sub(self.capacity);
        let mut state = self.lock();
        let dropped = state.records.len() as u64;
        state.records.clear();
        state.machines.clear();
        state.total_evicted += dropped;
        for record in records.into_iter().skip(skip) {
            state.push(record);
        }
        state.records.len()
    }

    /// Copy of every stored record matching `machine_filter` (all records when
    /// `None`), ordered by timestamp ascending with ties in arrival order.
    pub fn snapshot(&self, machine_filter: Option<&str>) -> QueryResult {
        let mut records: Vec<TelemetryRecord> = {
            let state = self.lock();
            match machine_filter {
                Some(id) => {
                    if !state.machines.contains_key(id) {
                        return QueryResult::default();
                    }
                    state
                        .records
                        .iter()
                        .filter(|r| r.machine_id == id)
                        .cloned()
                        .collect()
                }
                None => state.records.iter().cloned().collect(),
            }
        };
        // Stable: equal timestamps keep arrival order.
        records.sort_by_key(|r| r.timestamp);
        QueryResult::from(records)
    }

    /// Machine identifiers with at least one retained record.
    pub fn distinct_machine_ids(&self) -> BTreeSet<String> {
        self.lock().machines.keys().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters as structured data.
    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            len: state.records.len(),
            capacity: self.capacity,
            machines: state.machines.len(),
            total_appended: state.total_appended,
            total_evicted: state.total_evicted,
        }
    }
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Point-in-time buffer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Records currently stored.
    pub len: usize,
    /// Maximum records retained.
    pub capacity: usize,
    /// Distinct machines currently present.
    pub machines: usize,
    /// Records ever inserted, including those loaded by `replace_all`.
    pub total_appended: u64,
    /// Records ever removed, by eviction or replacement.
    pub total_evicted: u64,
}
