//! Bottom layer: hands jobs to the processor's activity.

use std::collections::HashMap;
use std::sync::Arc;

use tokenweave_types::{Activity, ActivityCallback, ActivityEvent, ActivityReceiver, FailureKind};

use crate::core::events::{Completion, ErrorEvent, Job, JobQueueEvent, ResultEvent};
use crate::error::{DispatchError, DispatchResult};

use super::layer::{DispatchLayer, LayerContext};

#[derive(Debug, Default)]
pub struct Invoke;

impl Invoke {
    pub fn new() -> Self {
        Self
    }
}

/// Relays everything `activity` reports for `job` until its callback is
/// dropped.
async fn drain(ctx: &LayerContext, job: &Job, activity: &str, mut rx: ActivityReceiver) -> DispatchResult<()> {
    let mut answered = false;
    while let Some(event) = rx.recv().await {
        answered = true;
        match event {
            ActivityEvent::Result { data, index } => {
                let streaming = !index.is_empty();
                ctx.push_up_result(ResultEvent {
                    owning_process: job.owning_process.clone(),
                    index: job.index.concat(&index),
                    data,
                    context: job.context.clone(),
                    streaming,
                })?;
            }
            ActivityEvent::Completion { index } => {
                ctx.push_up_completion(Completion::new(
                    job.owning_process.clone(),
                    job.index.concat(&index),
                    job.context.clone(),
                ))?;
            }
            ActivityEvent::Failure { message, cause, kind } => {
                let mut error = ErrorEvent::new(
                    job.owning_process.clone(),
                    job.index.clone(),
                    message,
                    kind,
                    job.context.clone(),
                )
                .with_activity(activity);
                if let Some(cause) = cause {
                    error = error.with_cause(cause);
                }
                ctx.push_up_error(error)?;
            }
        }
    }

    if !answered {
        ctx.push_up_error(
            ErrorEvent::new(
                job.owning_process.clone(),
                job.index.clone(),
                format!("activity {} finished without a result", activity),
                FailureKind::InvocationFailure,
                job.context.clone(),
            )
            .with_activity(activity),
        )?;
    }
    Ok(())
}

fn spawn_invocation(ctx: &LayerContext, activity: Arc<dyn Activity>, job: Job) -> DispatchResult<()> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        DispatchError::Configuration("activity invocation requires a tokio runtime".to_string())
    })?;
    let ctx = ctx.clone();
    handle.spawn(async move {
        let (callback, rx) = ActivityCallback::channel(job.context.clone());
        let inputs: HashMap<_, _> = job.data.clone();
        activity.invoke(inputs, callback).await;
        if let Err(e) = drain(&ctx, &job, activity.name(), rx).await {
            tracing::error!(
                owning_process = %job.owning_process,
                index = %job.index,
                activity = %activity.name(),
                error = %e,
                "activity outcome could not be delivered"
            );
        }
    });
    Ok(())
}

impl DispatchLayer for Invoke {
    fn name(&self) -> &str {
        "invoke"
    }

    fn receive_job_queue(&self, _ctx: &LayerContext, _event: JobQueueEvent) -> DispatchResult<()> {
        Err(DispatchError::UnsupportedEvent {
            layer: self.name().to_string(),
            event: "job queue".to_string(),
        })
    }

    fn event_added(&self, _ctx: &LayerContext, _owning_process: &str) -> DispatchResult<()> {
        Err(DispatchError::UnsupportedEvent {
            layer: self.name().to_string(),
            event: "job queue".to_string(),
        })
    }

    fn receive_job(&self, ctx: &LayerContext, job: Job) -> DispatchResult<()> {
        let Some(activity) = ctx.activities().first().cloned() else {
            let message = format!("processor {} has no activity", ctx.processor().name);
            return ctx.push_up_error(ErrorEvent::new(
                job.owning_process,
                job.index,
                message,
                FailureKind::ConfigurationFailure,
                job.context,
            ));
        };
        tracing::debug!(
            owning_process = %job.owning_process,
            index = %job.index,
            activity = %activity.name(),
            "invoking activity"
        );
        spawn_invocation(ctx, activity, job)
    }
}
