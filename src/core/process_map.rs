//! Per-owning-process state map with deferred release.
//!
//! Every stateful component keeps its per-run state in one of these maps.
//! State is created on first use and released by [`ProcessStateMap::finished_with`]
//! after a grace period, so monitoring reads that are already in flight never
//! race the teardown.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Grace period applied when a component is built without explicit configuration.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(1000);

struct ProcessEntry<T> {
    state: Arc<T>,
    generation: u64,
    retiring: bool,
}

pub struct ProcessStateMap<T> {
    entries: Arc<DashMap<String, ProcessEntry<T>>>,
    next_generation: AtomicU64,
    grace_period: Duration,
}

impl<T: Send + Sync + 'static> ProcessStateMap<T> {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            grace_period,
        }
    }

    fn bump(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the state of `process`, creating it with `init` on first use.
    ///
    /// A process that is waiting for release is revived, and the pending
    /// release no longer applies to it.
    pub fn get_or_insert_with(&self, process: &str, init: impl FnOnce() -> T) -> Arc<T> {
        if let Some(mut entry) = self.entries.get_mut(process) {
            if entry.retiring {
                entry.retiring = false;
                entry.generation = self.bump();
            }
            return entry.state.clone();
        }
        let mut entry = self
            .entries
            .entry(process.to_string())
            .or_insert_with(|| ProcessEntry {
                state: Arc::new(init()),
                generation: self.bump(),
                retiring: false,
            });
        if entry.retiring {
            entry.retiring = false;
            entry.generation = self.bump();
        }
        entry.state.clone()
    }

    /// Returns the state of `process` without creating or reviving it.
    pub fn get(&self, process: &str) -> Option<Arc<T>> {
        self.entries.get(process).map(|entry| entry.state.clone())
    }

    pub fn contains(&self, process: &str) -> bool {
        self.entries.contains_key(process)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Schedules release of the state of `process`.
    ///
    /// Unknown processes and repeated calls are no-ops. Removal only happens
    /// if the entry has not been revived or replaced in the meantime.
    pub fn finished_with(&self, process: &str) {
        let generation = match self.entries.get_mut(process) {
            Some(mut entry) => {
                entry.retiring = true;
                entry.generation
            }
            None => return,
        };

        let entries = self.entries.clone();
        let key = process.to_string();
        let remove = move || {
            let removed = entries
                .remove_if(&key, |_, entry| entry.retiring && entry.generation == generation)
                .is_some();
            if removed {
                tracing::debug!(owning_process = %key, "released process state");
            }
        };

        if self.grace_period.is_zero() {
            remove();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let grace = self.grace_period;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    remove();
                });
            }
            Err(_) => remove(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for ProcessStateMap<T> {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}
