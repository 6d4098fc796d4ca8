//! Final-completion accounting shared by every combinator node.

use tokenweave_types::{IndexArray, InvocationContext};

use crate::core::events::{Completion, IterationEvent};

/// Tracks which children of a node have delivered their final completion for
/// one owning process.
#[derive(Debug)]
pub(crate) struct CompletionTracker {
    completed: Vec<bool>,
    emitted: bool,
}

impl CompletionTracker {
    pub(crate) fn new(children: usize) -> Self {
        Self {
            completed: vec![false; children],
            emitted: false,
        }
    }

    /// Marks `child` complete. Returns true exactly once, when the last
    /// outstanding child completes.
    pub(crate) fn mark(&mut self, child: usize) -> bool {
        if self.emitted {
            return false;
        }
        if let Some(slot) = self.completed.get_mut(child) {
            *slot = true;
        }
        if self.completed.iter().all(|done| *done) {
            self.emitted = true;
            return true;
        }
        false
    }

    pub(crate) fn is_complete(&self, child: usize) -> bool {
        self.completed.get(child).copied().unwrap_or(false)
    }

    /// True when every child other than `child` has completed.
    pub(crate) fn others_complete(&self, child: usize) -> bool {
        self.completed
            .iter()
            .enumerate()
            .all(|(i, done)| i == child || *done)
    }

    pub(crate) fn has_emitted(&self) -> bool {
        self.emitted
    }
}

pub(crate) fn final_completion(owning_process: &str, context: &InvocationContext) -> IterationEvent {
    IterationEvent::Completion(Completion::new(
        owning_process,
        IndexArray::empty(),
        context.clone(),
    ))
}
