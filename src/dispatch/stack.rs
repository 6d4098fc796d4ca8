//! The dispatch stack: an ordered pipeline of layers for one processor.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokenweave_types::Activity;

use crate::core::events::{
    Completion, DispatchOutput, ErrorEvent, IterationEvent, Job, JobQueueEvent, JobQueueHandle,
    ResultEvent,
};
use crate::core::monitor::MonitorProperty;
use crate::core::process_map::ProcessStateMap;
use crate::error::{DispatchError, DispatchResult, IterationResult};
use crate::iteration::IterationSink;

use super::layer::{DispatchLayer, LayerContext, ProcessorSpec, StackInner};

/// Ordered pipeline of [`DispatchLayer`]s.
///
/// Events leaving the top layer are delivered on the receiver returned by
/// [`DispatchStack::new`]. As an [`IterationSink`] the stack turns the events
/// of each owning process into a job queue: the first event announces the
/// queue to the top layer, every later one is appended and signalled.
#[derive(Clone)]
pub struct DispatchStack {
    inner: Arc<StackInner>,
}

impl DispatchStack {
    pub fn new(
        processor: ProcessorSpec,
        layers: Vec<Arc<dyn DispatchLayer>>,
        activities: Vec<Arc<dyn Activity>>,
        grace_period: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchOutput>) {
        let (output, rx) = mpsc::unbounded_channel();
        let inner = StackInner {
            processor,
            layers,
            activities,
            output,
            queues: ProcessStateMap::new(grace_period),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn processor(&self) -> &ProcessorSpec {
        &self.inner.processor
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.inner.layers.iter().map(|layer| layer.name()).collect()
    }

    pub(crate) fn layer_context(&self, position: usize) -> LayerContext {
        LayerContext::new(self.inner.clone(), position)
    }

    fn top(&self) -> DispatchResult<(&Arc<dyn DispatchLayer>, LayerContext)> {
        match self.inner.layers.first() {
            Some(layer) => Ok((layer, self.layer_context(0))),
            None => Err(DispatchError::Configuration(format!(
                "dispatch stack of {} has no layers",
                self.inner.processor.name
            ))),
        }
    }

    fn bottom(&self) -> DispatchResult<(&Arc<dyn DispatchLayer>, LayerContext)> {
        match self.inner.layers.last() {
            Some(layer) => Ok((layer, self.layer_context(self.inner.layers.len() - 1))),
            None => Err(DispatchError::Configuration(format!(
                "dispatch stack of {} has no layers",
                self.inner.processor.name
            ))),
        }
    }

    /// Hands a queue for a new owning process to the top layer.
    pub fn receive_job_queue(&self, event: JobQueueEvent) -> DispatchResult<()> {
        let (layer, ctx) = self.top()?;
        layer.receive_job_queue(&ctx, event)
    }

    /// Sends a single job into the top layer, bypassing the queue.
    pub fn receive_job(&self, job: Job) -> DispatchResult<()> {
        let (layer, ctx) = self.top()?;
        layer.receive_job(&ctx, job)
    }

    /// Injects a result at the bottom of the stack.
    pub fn receive_result(&self, result: ResultEvent) -> DispatchResult<()> {
        let (layer, ctx) = self.bottom()?;
        layer.receive_result(&ctx, result)
    }

    pub fn receive_result_completion(&self, completion: Completion) -> DispatchResult<()> {
        let (layer, ctx) = self.bottom()?;
        layer.receive_result_completion(&ctx, completion)
    }

    pub fn receive_error(&self, error: ErrorEvent) -> DispatchResult<()> {
        let (layer, ctx) = self.bottom()?;
        layer.receive_error(&ctx, error)
    }

    /// Releases, after the grace period, everything every layer holds for
    /// `owning_process`. Repeated and unknown processes are no-ops.
    pub fn finished_with(&self, owning_process: &str) {
        tracing::debug!(
            processor = %self.inner.processor.name,
            owning_process = %owning_process,
            "finished with process"
        );
        for layer in &self.inner.layers {
            layer.finished_with(owning_process);
        }
        self.inner.queues.finished_with(owning_process);
    }

    /// Monitoring snapshot of every layer for `owning_process`.
    pub fn monitor_properties(&self, owning_process: &str) -> Vec<MonitorProperty> {
        self.inner
            .layers
            .iter()
            .flat_map(|layer| layer.monitor_properties(owning_process))
            .collect()
    }

    fn enqueue(&self, event: IterationEvent) -> DispatchResult<()> {
        let (layer, ctx) = self.top()?;
        let process = event.owning_process().to_string();
        let slot = self
            .inner
            .queues
            .get_or_insert_with(&process, || Mutex::new(None));
        let mut guard = slot.lock();
        match guard.as_ref() {
            Some(queue) => {
                queue.push(event);
                layer.event_added(&ctx, &process)
            }
            None => {
                let queue = JobQueueHandle::new();
                let context = event.context().clone();
                queue.push(event);
                *guard = Some(queue.clone());
                tracing::debug!(
                    processor = %self.inner.processor.name,
                    owning_process = %process,
                    "announcing job queue"
                );
                layer.receive_job_queue(
                    &ctx,
                    JobQueueEvent {
                        owning_process: process.clone(),
                        context,
                        queue,
                    },
                )
            }
        }
    }
}

impl IterationSink for DispatchStack {
    fn receive_job(&self, job: Job) -> IterationResult<()> {
        Ok(self.enqueue(IterationEvent::Job(job))?)
    }

    fn receive_completion(&self, completion: Completion) -> IterationResult<()> {
        Ok(self.enqueue(IterationEvent::Completion(completion))?)
    }
}
