//! Prefix dot product: pairs a shorter index with every longer index it prefixes.
//!
//! Child 0 supplies the short indices, child 1 the long ones. Emitted jobs
//! carry the longer index.

use std::collections::HashMap;

use tokenweave_types::IndexArray;

use crate::core::events::{IterationEvent, Job};
use crate::core::tree_cache::TreeCache;

use super::completion::{final_completion, CompletionTracker};

pub(crate) const SHORTER: usize = 0;
pub(crate) const LONGER: usize = 1;

#[derive(Debug)]
pub(crate) struct PrefixDotState {
    shorter: TreeCache,
    longer: TreeCache,
    tracker: CompletionTracker,
}

impl PrefixDotState {
    pub(crate) fn new() -> Self {
        Self {
            shorter: TreeCache::new(),
            longer: TreeCache::new(),
            tracker: CompletionTracker::new(2),
        }
    }

    pub(crate) fn receive(&mut self, child: usize, event: IterationEvent) -> Vec<IterationEvent> {
        let mut out = Vec::new();
        let closes_child = event.index().is_empty();
        let process = event.owning_process().to_string();
        let context = event.context().clone();

        if let IterationEvent::Job(job) = event {
            if child == SHORTER {
                out.extend(self.receive_shorter(job).into_iter().map(IterationEvent::Job));
            } else {
                out.extend(self.receive_longer(job).map(IterationEvent::Job));
            }
        }

        if closes_child && self.tracker.mark(child) {
            self.shorter.clear();
            self.longer.clear();
            out.push(final_completion(&process, &context));
        }
        out
    }

    fn receive_shorter(&mut self, job: Job) -> Vec<Job> {
        let partners: Vec<IndexArray> = self
            .longer
            .jobs_with_prefix(&job.index)
            .into_iter()
            .map(|partner| partner.index.clone())
            .collect();

        let mut merged = Vec::with_capacity(partners.len());
        for index in partners {
            if let Some(partner) = self.longer.cut(&index) {
                merged.push(merge(&job, &partner, index));
            }
        }
        self.shorter.insert(job);
        merged
    }

    fn receive_longer(&mut self, job: Job) -> Option<Job> {
        let prefix = job.index.truncated(self.shorter.index_length());
        let merged = self
            .shorter
            .get(&prefix)
            .map(|partner| merge(partner, &job, job.index.clone()));
        self.longer.insert(job);
        merged
    }

    pub(crate) fn cached_jobs(&self) -> usize {
        self.shorter.len() + self.longer.len()
    }
}

fn merge(shorter: &Job, longer: &Job, index: IndexArray) -> Job {
    let mut data: HashMap<_, _> = shorter.data.clone();
    data.extend(longer.data.iter().map(|(k, v)| (k.clone(), v.clone())));
    longer.derive(index, data)
}
