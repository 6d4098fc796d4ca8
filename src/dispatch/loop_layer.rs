//! Re-submits a job while a condition activity says so.
//!
//! Every job is recorded by `(owning process, index)`. After (or, without
//! `run_first`, before) each invocation the condition activity runs on a
//! spawned task; its `"loop"` output decides between another round with the
//! original inputs and releasing the last outgoing event.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokenweave_types::{
    Activity, ActivityCallback, ActivityEvent, DataRef, FailureKind, IndexArray, InvocationContext,
};

use crate::core::events::{Completion, ErrorEvent, Job, ResultEvent};
use crate::core::monitor::{MonitorProperty, LOOP_ACTIVE};
use crate::core::process_map::ProcessStateMap;
use crate::error::{DispatchError, DispatchResult};

use super::config::LoopConfig;
use super::layer::{DispatchLayer, LayerContext};

/// Name of the condition output port that decides whether to loop.
pub const LOOP_PORT: &str = "loop";

#[derive(Debug, Clone)]
enum Outgoing {
    Result(ResultEvent),
    Completion(Completion),
}

#[derive(Debug)]
struct LoopEntry {
    job: Job,
    outgoing: Option<Outgoing>,
    iterations: usize,
}

#[derive(Debug)]
struct LoopState {
    entries: HashMap<IndexArray, LoopEntry>,
    last_modified: DateTime<Utc>,
}

impl LoopState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            last_modified: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

type LoopStates = ProcessStateMap<Mutex<LoopState>>;

struct ConditionFailure {
    message: String,
    kind: FailureKind,
}

impl ConditionFailure {
    fn new(message: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

struct ConditionOutcome {
    should_loop: bool,
    outputs: HashMap<String, DataRef>,
}

/// Shared with the condition tasks.
#[derive(Clone)]
struct LoopShared {
    condition: Option<Arc<dyn Activity>>,
    states: Arc<LoopStates>,
    max_iterations: usize,
}

pub struct Loop {
    run_first: bool,
    shared: LoopShared,
}

impl Loop {
    pub fn new(config: LoopConfig, condition: Option<Arc<dyn Activity>>, grace_period: Duration) -> Self {
        Self {
            run_first: config.run_first,
            shared: LoopShared {
                condition,
                states: Arc::new(ProcessStateMap::new(grace_period)),
                max_iterations: config.max_iterations,
            },
        }
    }

    fn record(&self, job: &Job) {
        let state = self
            .shared
            .states
            .get_or_insert_with(&job.owning_process, || Mutex::new(LoopState::new()));
        let mut state = state.lock();
        state.entries.insert(
            job.index.clone(),
            LoopEntry {
                job: job.clone(),
                outgoing: None,
                iterations: 0,
            },
        );
        state.touch();
    }

    /// Stores `outgoing` for its index and returns the condition inputs, or
    /// `None` when the index is not looping here.
    fn hold(&self, owning_process: &str, index: &IndexArray, outgoing: Outgoing) -> Option<HashMap<String, DataRef>> {
        let state = self.shared.states.get(owning_process)?;
        let mut state = state.lock();
        let entry = state.entries.get_mut(index)?;
        let mut inputs = entry.job.data.clone();
        if let Outgoing::Result(result) = &outgoing {
            inputs.extend(result.data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entry.outgoing = Some(outgoing);
        state.touch();
        Some(inputs)
    }
}

impl LoopShared {
    fn spawn_condition(
        &self,
        ctx: &LayerContext,
        owning_process: &str,
        index: &IndexArray,
        context: &InvocationContext,
        inputs: HashMap<String, DataRef>,
    ) -> DispatchResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            DispatchError::Configuration("loop condition requires a tokio runtime".to_string())
        })?;
        let shared = self.clone();
        let ctx = ctx.clone();
        let owning_process = owning_process.to_string();
        let index = index.clone();
        let context = context.clone();
        handle.spawn(async move {
            let outcome = shared.evaluate(inputs, context).await;
            if let Err(e) = shared.decide(&ctx, &owning_process, &index, outcome) {
                tracing::error!(
                    owning_process = %owning_process,
                    index = %index,
                    error = %e,
                    "loop decision could not be delivered"
                );
            }
        });
        Ok(())
    }

    async fn evaluate(
        &self,
        inputs: HashMap<String, DataRef>,
        context: InvocationContext,
    ) -> Result<ConditionOutcome, ConditionFailure> {
        let condition = self.condition.clone().ok_or_else(|| {
            ConditionFailure::new("loop has no condition activity", FailureKind::ConfigurationFailure)
        })?;
        let declared = condition.input_ports();
        let inputs: HashMap<String, DataRef> = if declared.is_empty() {
            inputs
        } else {
            inputs
                .into_iter()
                .filter(|(port, _)| declared.iter().any(|spec| &spec.name == port))
                .collect()
        };

        let references = context.reference_service().clone();
        let (callback, mut rx) = ActivityCallback::channel(context);
        condition.invoke(inputs, callback).await;

        let mut outputs = None;
        while let Some(event) = rx.recv().await {
            match event {
                ActivityEvent::Result { data, index } if index.is_empty() => {
                    outputs = Some(data);
                }
                ActivityEvent::Result { .. } | ActivityEvent::Completion { .. } => {}
                ActivityEvent::Failure { message, cause, kind } => {
                    let message = match cause {
                        Some(cause) => format!("loop condition {} failed: {} ({})", condition.name(), message, cause),
                        None => format!("loop condition {} failed: {}", condition.name(), message),
                    };
                    return Err(ConditionFailure::new(message, kind));
                }
            }
        }

        let outputs = outputs.ok_or_else(|| {
            ConditionFailure::new(
                format!("loop condition {} produced no result", condition.name()),
                FailureKind::InvocationFailure,
            )
        })?;
        let flag = outputs.get(LOOP_PORT).ok_or_else(|| {
            ConditionFailure::new(
                format!("loop condition {} has no '{}' output", condition.name(), LOOP_PORT),
                FailureKind::InvocationFailure,
            )
        })?;
        if flag.depth() != 0 {
            return Err(ConditionFailure::new(
                format!("'{}' output has depth {}, expected 0", LOOP_PORT, flag.depth()),
                FailureKind::InvocationFailure,
            ));
        }
        let should_loop = match references.resolve(flag) {
            Some(Value::Bool(flag)) => flag,
            Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
            other => {
                return Err(ConditionFailure::new(
                    format!("'{}' output is not a boolean: {:?}", LOOP_PORT, other),
                    FailureKind::InvocationFailure,
                ))
            }
        };
        Ok(ConditionOutcome {
            should_loop,
            outputs,
        })
    }

    fn decide(
        &self,
        ctx: &LayerContext,
        owning_process: &str,
        index: &IndexArray,
        outcome: Result<ConditionOutcome, ConditionFailure>,
    ) -> DispatchResult<()> {
        let Some(state) = self.states.get(owning_process) else {
            tracing::debug!(owning_process = %owning_process, "loop state already released");
            return Ok(());
        };
        let mut guard = state.lock();
        let Some(mut entry) = guard.entries.remove(index) else {
            return Ok(());
        };
        guard.touch();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(failure) => {
                drop(guard);
                return self.fail(ctx, &entry.job, failure);
            }
        };

        if outcome.should_loop {
            if entry.iterations >= self.max_iterations {
                drop(guard);
                tracing::warn!(
                    owning_process = %owning_process,
                    index = %index,
                    iterations = entry.iterations,
                    "loop iteration cap reached"
                );
                let failure = ConditionFailure::new(
                    format!("loop exceeded {} iterations", self.max_iterations),
                    FailureKind::InvocationFailure,
                );
                return self.fail(ctx, &entry.job, failure);
            }
            entry.iterations += 1;
            entry.outgoing = None;
            let mut data = entry.job.data.clone();
            data.extend(
                outcome
                    .outputs
                    .into_iter()
                    .filter(|(port, _)| port != LOOP_PORT),
            );
            let next = entry.job.derive(index.clone(), data);
            tracing::debug!(
                owning_process = %owning_process,
                index = %index,
                iteration = entry.iterations,
                "loop condition true, resubmitting"
            );
            guard.entries.insert(index.clone(), entry);
            drop(guard);
            return ctx.push_down_job(next);
        }

        drop(guard);
        match entry.outgoing {
            Some(Outgoing::Result(result)) => ctx.push_up_result(result),
            Some(Outgoing::Completion(completion)) => ctx.push_up_completion(completion),
            None => {
                let failure = ConditionFailure::new(
                    "loop condition was false before the first invocation",
                    FailureKind::InvocationFailure,
                );
                self.fail(ctx, &entry.job, failure)
            }
        }
    }

    fn fail(&self, ctx: &LayerContext, job: &Job, failure: ConditionFailure) -> DispatchResult<()> {
        tracing::debug!(
            owning_process = %job.owning_process,
            index = %job.index,
            message = %failure.message,
            "loop terminated by failure"
        );
        let mut error = ErrorEvent::new(
            job.owning_process.clone(),
            job.index.clone(),
            failure.message,
            failure.kind,
            job.context.clone(),
        );
        if let Some(condition) = &self.condition {
            error = error.with_activity(condition.name());
        }
        ctx.push_up_error(error)
    }
}

impl DispatchLayer for Loop {
    fn name(&self) -> &str {
        "loop"
    }

    fn receive_job(&self, ctx: &LayerContext, job: Job) -> DispatchResult<()> {
        self.record(&job);
        if self.run_first {
            return ctx.push_down_job(job);
        }
        let inputs = job.data.clone();
        self.shared
            .spawn_condition(ctx, &job.owning_process, &job.index, &job.context, inputs)
    }

    fn receive_result(&self, ctx: &LayerContext, result: ResultEvent) -> DispatchResult<()> {
        if result.streaming {
            return ctx.push_up_result(result);
        }
        match self.hold(&result.owning_process, &result.index, Outgoing::Result(result.clone())) {
            Some(inputs) => self.shared.spawn_condition(
                ctx,
                &result.owning_process,
                &result.index,
                &result.context,
                inputs,
            ),
            None => ctx.push_up_result(result),
        }
    }

    fn receive_result_completion(&self, ctx: &LayerContext, completion: Completion) -> DispatchResult<()> {
        match self.hold(
            &completion.owning_process,
            &completion.index,
            Outgoing::Completion(completion.clone()),
        ) {
            Some(inputs) => self.shared.spawn_condition(
                ctx,
                &completion.owning_process,
                &completion.index,
                &completion.context,
                inputs,
            ),
            None => ctx.push_up_completion(completion),
        }
    }

    fn receive_error(&self, ctx: &LayerContext, error: ErrorEvent) -> DispatchResult<()> {
        if let Some(state) = self.shared.states.get(&error.owning_process) {
            let mut state = state.lock();
            if state.entries.remove(&error.index).is_some() {
                state.touch();
            }
        }
        ctx.push_up_error(error)
    }

    fn finished_with(&self, owning_process: &str) {
        self.shared.states.finished_with(owning_process);
    }

    fn monitor_properties(&self, owning_process: &str) -> Vec<MonitorProperty> {
        match self.shared.states.get(owning_process) {
            Some(state) => {
                let state = state.lock();
                vec![MonitorProperty::new(
                    LOOP_ACTIVE,
                    state.entries.len() as i64,
                    state.last_modified,
                )]
            }
            None => Vec::new(),
        }
    }
}
