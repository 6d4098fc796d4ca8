//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use tokenweave_types::{DataRef, IndexArray, InvocationContext};

use crate::core::events::{Completion, IterationEvent, Job};
use crate::core::reference::InMemoryReferenceService;

pub(crate) fn context() -> InvocationContext {
    Arc::new(InMemoryReferenceService::new()).context()
}

pub(crate) fn data(entries: &[(&str, &str)]) -> HashMap<String, DataRef> {
    entries
        .iter()
        .map(|(port, id)| (port.to_string(), DataRef::new(*id, 0)))
        .collect()
}

pub(crate) fn job(process: &str, index: &[usize], entries: &[(&str, &str)]) -> Job {
    Job::new(process, IndexArray::from(index), data(entries), context())
}

pub(crate) fn job_event(process: &str, index: &[usize], entries: &[(&str, &str)]) -> IterationEvent {
    IterationEvent::Job(job(process, index, entries))
}

pub(crate) fn completion_event(process: &str, index: &[usize]) -> IterationEvent {
    IterationEvent::Completion(Completion::new(process, IndexArray::from(index), context()))
}

pub(crate) fn indices(events: &[IterationEvent]) -> Vec<Vec<usize>> {
    events
        .iter()
        .filter(|e| matches!(e, IterationEvent::Job(_)))
        .map(|e| e.index().as_slice().to_vec())
        .collect()
}

pub(crate) fn completions(events: &[IterationEvent]) -> Vec<Vec<usize>> {
    events
        .iter()
        .filter(|e| matches!(e, IterationEvent::Completion(_)))
        .map(|e| e.index().as_slice().to_vec())
        .collect()
}
