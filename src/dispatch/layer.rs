//! The layer contract and the handle layers use to reach their neighbours.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokenweave_types::{Activity, PortSpec};

use crate::core::events::{
    Completion, DispatchOutput, ErrorEvent, Job, JobQueueEvent, JobQueueHandle, ResultEvent,
};
use crate::core::monitor::MonitorProperty;
use crate::core::process_map::ProcessStateMap;
use crate::error::{DispatchError, DispatchResult};

/// Identity and declared outputs of the processor a stack belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSpec {
    pub name: String,
    pub outputs: Vec<PortSpec>,
}

impl ProcessorSpec {
    pub fn new(name: impl Into<String>, outputs: Vec<PortSpec>) -> Self {
        Self {
            name: name.into(),
            outputs,
        }
    }

    /// A processor named after `activity`, exposing its output ports.
    pub fn for_activity(activity: &dyn Activity) -> Self {
        Self::new(activity.name(), activity.output_ports().to_vec())
    }
}

/// A stage of a dispatch stack.
///
/// Jobs and job queues travel down from the top layer; results, completions
/// and errors travel up from the bottom. Every default forwards the event to
/// the next layer in its direction of travel, so a layer only overrides what
/// it changes.
pub trait DispatchLayer: Send + Sync {
    fn name(&self) -> &str;

    fn receive_job_queue(&self, ctx: &LayerContext, event: JobQueueEvent) -> DispatchResult<()> {
        ctx.push_down_queue(event)
    }

    /// Called when an event was appended to a queue previously announced
    /// through [`DispatchLayer::receive_job_queue`].
    fn event_added(&self, ctx: &LayerContext, owning_process: &str) -> DispatchResult<()> {
        ctx.notify_below(owning_process)
    }

    fn receive_job(&self, ctx: &LayerContext, job: Job) -> DispatchResult<()> {
        ctx.push_down_job(job)
    }

    fn receive_result(&self, ctx: &LayerContext, result: ResultEvent) -> DispatchResult<()> {
        ctx.push_up_result(result)
    }

    fn receive_result_completion(
        &self,
        ctx: &LayerContext,
        completion: Completion,
    ) -> DispatchResult<()> {
        ctx.push_up_completion(completion)
    }

    fn receive_error(&self, ctx: &LayerContext, error: ErrorEvent) -> DispatchResult<()> {
        ctx.push_up_error(error)
    }

    /// Schedules release of all state held for `owning_process`.
    fn finished_with(&self, _owning_process: &str) {}

    fn monitor_properties(&self, _owning_process: &str) -> Vec<MonitorProperty> {
        Vec::new()
    }
}

pub(crate) struct StackInner {
    pub(crate) processor: ProcessorSpec,
    pub(crate) layers: Vec<Arc<dyn DispatchLayer>>,
    pub(crate) activities: Vec<Arc<dyn Activity>>,
    pub(crate) output: mpsc::UnboundedSender<DispatchOutput>,
    pub(crate) queues: ProcessStateMap<Mutex<Option<JobQueueHandle>>>,
}

/// Position of one layer within its stack.
///
/// Cheap to clone; spawned tasks keep a clone to deliver events once their
/// asynchronous work completes.
#[derive(Clone)]
pub struct LayerContext {
    stack: Arc<StackInner>,
    position: usize,
}

impl LayerContext {
    pub(crate) fn new(stack: Arc<StackInner>, position: usize) -> Self {
        Self { stack, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn processor(&self) -> &ProcessorSpec {
        &self.stack.processor
    }

    pub fn activities(&self) -> &[Arc<dyn Activity>] {
        &self.stack.activities
    }

    fn layer_name(&self) -> String {
        self.stack
            .layers
            .get(self.position)
            .map(|layer| layer.name().to_string())
            .unwrap_or_else(|| "stack".to_string())
    }

    fn below(&self) -> DispatchResult<(&Arc<dyn DispatchLayer>, LayerContext)> {
        let position = self.position + 1;
        match self.stack.layers.get(position) {
            Some(layer) => Ok((layer, LayerContext::new(self.stack.clone(), position))),
            None => Err(DispatchError::NoLayerBelow {
                layer: self.layer_name(),
            }),
        }
    }

    fn above(&self) -> Option<(&Arc<dyn DispatchLayer>, LayerContext)> {
        let position = self.position.checked_sub(1)?;
        let layer = self.stack.layers.get(position)?;
        Some((layer, LayerContext::new(self.stack.clone(), position)))
    }

    pub fn push_down_job(&self, job: Job) -> DispatchResult<()> {
        let (layer, ctx) = self.below()?;
        layer.receive_job(&ctx, job)
    }

    pub fn push_down_queue(&self, event: JobQueueEvent) -> DispatchResult<()> {
        let (layer, ctx) = self.below()?;
        layer.receive_job_queue(&ctx, event)
    }

    pub fn notify_below(&self, owning_process: &str) -> DispatchResult<()> {
        let (layer, ctx) = self.below()?;
        layer.event_added(&ctx, owning_process)
    }

    pub fn push_up_result(&self, result: ResultEvent) -> DispatchResult<()> {
        match self.above() {
            Some((layer, ctx)) => layer.receive_result(&ctx, result),
            None => self.emit(DispatchOutput::Result(result)),
        }
    }

    pub fn push_up_completion(&self, completion: Completion) -> DispatchResult<()> {
        match self.above() {
            Some((layer, ctx)) => layer.receive_result_completion(&ctx, completion),
            None => self.emit(DispatchOutput::Completion(completion)),
        }
    }

    pub fn push_up_error(&self, error: ErrorEvent) -> DispatchResult<()> {
        match self.above() {
            Some((layer, ctx)) => layer.receive_error(&ctx, error),
            None => self.emit(DispatchOutput::Error(error)),
        }
    }

    fn emit(&self, output: DispatchOutput) -> DispatchResult<()> {
        tracing::debug!(
            processor = %self.stack.processor.name,
            owning_process = %output.owning_process(),
            index = %output.index(),
            "dispatch stack output"
        );
        if self.stack.output.send(output).is_err() {
            tracing::debug!(
                processor = %self.stack.processor.name,
                "dispatch output receiver dropped"
            );
        }
        Ok(())
    }
}
