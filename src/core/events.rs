//! Event value types exchanged between iteration nodes and dispatch layers.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokenweave_types::{DataRef, FailureKind, IndexArray, InvocationContext};

/// One unit of invocation input.
#[derive(Debug, Clone)]
pub struct Job {
    pub owning_process: String,
    pub index: IndexArray,
    pub data: HashMap<String, DataRef>,
    pub context: InvocationContext,
}

impl Job {
    pub fn new(
        owning_process: impl Into<String>,
        index: IndexArray,
        data: HashMap<String, DataRef>,
        context: InvocationContext,
    ) -> Self {
        Self {
            owning_process: owning_process.into(),
            index,
            data,
            context,
        }
    }

    /// A copy of this job at another index with other data.
    pub fn derive(&self, index: IndexArray, data: HashMap<String, DataRef>) -> Job {
        Job {
            owning_process: self.owning_process.clone(),
            index,
            data,
            context: self.context.clone(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.data.values().any(DataRef::contains_errors)
    }
}

/// "No further events with this index as a strict prefix will arrive."
#[derive(Debug, Clone)]
pub struct Completion {
    pub owning_process: String,
    pub index: IndexArray,
    pub context: InvocationContext,
}

impl Completion {
    pub fn new(
        owning_process: impl Into<String>,
        index: IndexArray,
        context: InvocationContext,
    ) -> Self {
        Self {
            owning_process: owning_process.into(),
            index,
            context,
        }
    }

    /// A completion with an empty index closes the whole stream.
    pub fn is_final(&self) -> bool {
        self.index.is_empty()
    }
}

/// Outputs produced for one index by the layers below.
#[derive(Debug, Clone)]
pub struct ResultEvent {
    pub owning_process: String,
    pub index: IndexArray,
    pub data: HashMap<String, DataRef>,
    pub context: InvocationContext,
    pub streaming: bool,
}

/// Failure reported for one index by the layers below.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub owning_process: String,
    pub index: IndexArray,
    pub message: String,
    pub cause: Option<String>,
    pub kind: FailureKind,
    pub activity: Option<String>,
    pub context: InvocationContext,
}

impl ErrorEvent {
    pub fn new(
        owning_process: impl Into<String>,
        index: IndexArray,
        message: impl Into<String>,
        kind: FailureKind,
        context: InvocationContext,
    ) -> Self {
        Self {
            owning_process: owning_process.into(),
            index,
            message: message.into(),
            cause: None,
            kind,
            activity: None,
            context,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }
}

/// Event emitted by an iteration node or queued for a dispatch stack.
#[derive(Debug, Clone)]
pub enum IterationEvent {
    Job(Job),
    Completion(Completion),
}

impl IterationEvent {
    pub fn owning_process(&self) -> &str {
        match self {
            IterationEvent::Job(job) => &job.owning_process,
            IterationEvent::Completion(completion) => &completion.owning_process,
        }
    }

    pub fn index(&self) -> &IndexArray {
        match self {
            IterationEvent::Job(job) => &job.index,
            IterationEvent::Completion(completion) => &completion.index,
        }
    }

    pub fn context(&self) -> &InvocationContext {
        match self {
            IterationEvent::Job(job) => &job.context,
            IterationEvent::Completion(completion) => &completion.context,
        }
    }
}

/// Shared FIFO of iteration events feeding one owning process of a stack.
///
/// The producer side (the dispatch stack) pushes; the consuming layer pops
/// when it has capacity.
#[derive(Debug, Clone, Default)]
pub struct JobQueueHandle {
    events: Arc<Mutex<VecDeque<IterationEvent>>>,
}

impl JobQueueHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: IterationEvent) {
        self.events.lock().push_back(event);
    }

    pub fn pop(&self) -> Option<IterationEvent> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// True when both handles refer to the same queue.
    pub fn same_queue(&self, other: &JobQueueHandle) -> bool {
        Arc::ptr_eq(&self.events, &other.events)
    }
}

/// Announces a job queue for an owning process to the top of a stack.
#[derive(Debug, Clone)]
pub struct JobQueueEvent {
    pub owning_process: String,
    pub context: InvocationContext,
    pub queue: JobQueueHandle,
}

/// Event leaving the top of a dispatch stack.
#[derive(Debug, Clone)]
pub enum DispatchOutput {
    Result(ResultEvent),
    Completion(Completion),
    Error(ErrorEvent),
}

impl DispatchOutput {
    pub fn owning_process(&self) -> &str {
        match self {
            DispatchOutput::Result(result) => &result.owning_process,
            DispatchOutput::Completion(completion) => &completion.owning_process,
            DispatchOutput::Error(error) => &error.owning_process,
        }
    }

    pub fn index(&self) -> &IndexArray {
        match self {
            DispatchOutput::Result(result) => &result.index,
            DispatchOutput::Completion(completion) => &completion.index,
            DispatchOutput::Error(error) => &error.index,
        }
    }
}
