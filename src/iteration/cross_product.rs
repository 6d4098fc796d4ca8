//! Cross product: combines every job of each child with every job of the others.

use std::collections::HashMap;

use tokenweave_types::IndexArray;

use crate::core::events::{IterationEvent, Job};

use super::completion::{final_completion, CompletionTracker};

#[derive(Debug)]
pub(crate) struct CrossState {
    caches: Vec<Vec<Job>>,
    tracker: CompletionTracker,
}

impl CrossState {
    pub(crate) fn new(children: usize) -> Self {
        Self {
            caches: vec![Vec::new(); children],
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
                out.extend(self.combine(child, &job).into_iter().map(IterationEvent::Job));
                if !self.tracker.others_complete(child) {
                    self.caches[child].push(job);
                }
            }
            IterationEvent::Completion(completion) => {
                if self.caches.len() == 1 && !completion.is_final() {
                    out.push(IterationEvent::Completion(completion));
                }
            }
        }

        if closes_child {
            if self.tracker.mark(child) {
                self.caches.iter_mut().for_each(Vec::clear);
                out.push(final_completion(&process, &context));
            } else {
                self.release_unneeded();
            }
        }
        out
    }

    /// Every combination of `job` with the cached jobs of the other children,
    /// in child order.
    fn combine(&self, child: usize, job: &Job) -> Vec<Job> {
        let mut combinations: Vec<Vec<&Job>> = vec![Vec::new()];
        for (position, cache) in self.caches.iter().enumerate() {
            let options: Vec<&Job> = if position == child {
                vec![job]
            } else {
                cache.iter().collect()
            };
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    options.iter().map(move |option| {
                        let mut combination = prefix.clone();
                        combination.push(*option);
                        combination
                    })
                })
                .collect();
            if combinations.is_empty() {
                return Vec::new();
            }
        }

        combinations
            .into_iter()
            .map(|combination| {
                let index = IndexArray::concat_all(combination.iter().map(|part| &part.index));
                let mut data = HashMap::new();
                for part in &combination {
                    data.extend(part.data.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                job.derive(index, data)
            })
            .collect()
    }

    /// A child's cache is only needed while some other child may still
    /// produce jobs to combine with it.
    fn release_unneeded(&mut self) {
        for position in 0..self.caches.len() {
            if self.tracker.others_complete(position) {
                self.caches[position].clear();
            }
        }
    }

    pub(crate) fn cached_jobs(&self) -> usize {
        self.caches.iter().map(Vec::len).sum()
    }
}
