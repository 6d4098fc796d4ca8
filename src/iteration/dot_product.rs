//! Dot product: combines children by exact index match.

use std::collections::HashMap;

use crate::core::events::{IterationEvent, Job};
use crate::core::tree_cache::TreeCache;

use super::completion::{final_completion, CompletionTracker};

#[derive(Debug)]
pub(crate) struct DotState {
    caches: Vec<TreeCache>,
    tracker: CompletionTracker,
}

impl DotState {
    pub(crate) fn new(children: usize) -> Self {
        Self {
            caches: (0..children).map(|_| TreeCache::new()).collect(),
            tracker: CompletionTracker::new(children),
        }
    }

    pub(crate) fn receive(&mut self, child: usize, event: IterationEvent) -> Vec<IterationEvent> {
        let mut out = Vec::new();
        let closes_child = event.index().is_empty();
        let process = event.owning_process().to_string();
        let context = event.context().clone();

        match event {
            IterationEvent::Job(job) if self.caches.len() == 1 => {
                out.push(IterationEvent::Job(job));
            }
            IterationEvent::Job(job) => {
                if let Some(merged) = self.match_job(child, job) {
                    out.push(IterationEvent::Job(merged));
                }
            }
            IterationEvent::Completion(completion) => {
                if self.caches.len() == 1 && !completion.is_final() {
                    out.push(IterationEvent::Completion(completion));
                }
            }
        }

        if closes_child && self.tracker.mark(child) {
            self.caches.iter_mut().for_each(TreeCache::clear);
            out.push(final_completion(&process, &context));
        }
        out
    }

    fn match_job(&mut self, child: usize, job: Job) -> Option<Job> {
        let index = job.index.clone();
        let template = job.derive(index.clone(), HashMap::new());
        self.caches[child].insert(job);
        if !self.caches.iter().all(|cache| cache.contains(&index)) {
            return None;
        }

        let mut data = HashMap::new();
        for cache in &mut self.caches {
            if let Some(part) = cache.cut(&index) {
                data.extend(part.data);
            }
        }
        Some(template.derive(index, data))
    }

    pub(crate) fn cached_jobs(&self) -> usize {
        self.caches.iter().map(TreeCache::len).sum()
    }
}
