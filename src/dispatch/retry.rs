//! Re-sends jobs that failed below, with backoff.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use tokenweave_types::IndexArray;

use crate::core::events::{Completion, ErrorEvent, Job, ResultEvent};
use crate::core::process_map::ProcessStateMap;
use crate::error::{DispatchError, DispatchResult};

use super::config::{BackoffStrategy, RetryConfig};
use super::layer::{DispatchLayer, LayerContext};

#[derive(Debug)]
struct Attempt {
    job: Job,
    retries: u32,
}

pub struct Retry {
    config: RetryConfig,
    attempts: ProcessStateMap<Mutex<HashMap<IndexArray, Attempt>>>,
}

impl Retry {
    pub fn new(config: RetryConfig, grace_period: Duration) -> Self {
        Self {
            config,
            attempts: ProcessStateMap::new(grace_period),
        }
    }

    fn forget(&self, owning_process: &str, index: &IndexArray) {
        if let Some(attempts) = self.attempts.get(owning_process) {
            attempts.lock().remove(index);
        }
    }

    /// The job to send again for `error`, with its retry number, if another
    /// attempt is allowed.
    fn next_attempt(&self, error: &ErrorEvent) -> Option<(Job, u32)> {
        let attempts = self.attempts.get(&error.owning_process)?;
        let mut attempts = attempts.lock();
        let attempt = attempts.get_mut(&error.index)?;
        let allowed = !self.config.retry_on_retryable_only || error.kind.is_retryable();
        if !allowed || attempt.retries >= self.config.max_retries {
            attempts.remove(&error.index);
            return None;
        }
        attempt.retries += 1;
        Some((attempt.job.clone(), attempt.retries))
    }
}

/// Delay in milliseconds before retry number `attempt` (zero based).
pub fn calculate_retry_interval(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.retry_interval;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let interval = match config.backoff_strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Exponential => {
            let multiplied = base as f64 * config.backoff_multiplier.powi(exponent);
            multiplied as u64
        }
        BackoffStrategy::ExponentialWithJitter => {
            let multiplied = base as f64 * config.backoff_multiplier.powi(exponent);
            let jitter = rand::random::<f64>() * multiplied * 0.1;
            (multiplied + jitter) as u64
        }
    };
    interval.min(config.max_retry_interval)
}

impl DispatchLayer for Retry {
    fn name(&self) -> &str {
        "retry"
    }

    fn receive_job(&self, ctx: &LayerContext, job: Job) -> DispatchResult<()> {
        if self.config.max_retries > 0 {
            let attempts = self
                .attempts
                .get_or_insert_with(&job.owning_process, || Mutex::new(HashMap::new()));
            attempts.lock().insert(
                job.index.clone(),
                Attempt {
                    job: job.clone(),
                    retries: 0,
                },
            );
        }
        ctx.push_down_job(job)
    }

    fn receive_result(&self, ctx: &LayerContext, result: ResultEvent) -> DispatchResult<()> {
        if !result.streaming {
            self.forget(&result.owning_process, &result.index);
        }
        ctx.push_up_result(result)
    }

    fn receive_result_completion(&self, ctx: &LayerContext, completion: Completion) -> DispatchResult<()> {
        self.forget(&completion.owning_process, &completion.index);
        ctx.push_up_completion(completion)
    }

    fn receive_error(&self, ctx: &LayerContext, error: ErrorEvent) -> DispatchResult<()> {
        let Some((job, retry)) = self.next_attempt(&error) else {
            return ctx.push_up_error(error);
        };
        let interval = calculate_retry_interval(&self.config, retry - 1);
        tracing::debug!(
            owning_process = %job.owning_process,
            index = %job.index,
            retry,
            interval_ms = interval,
            error = %error.message,
            "retrying job"
        );
        if interval == 0 {
            return ctx.push_down_job(job);
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            DispatchError::Configuration("delayed retry requires a tokio runtime".to_string())
        })?;
        let ctx = ctx.clone();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(interval)).await;
            let owning_process = job.owning_process.clone();
            let index = job.index.clone();
            if let Err(e) = ctx.push_down_job(job) {
                tracing::error!(
                    owning_process = %owning_process,
                    index = %index,
                    error = %e,
                    "retry could not be sent"
                );
            }
        });
        Ok(())
    }

    fn finished_with(&self, owning_process: &str) {
        self.attempts.finished_with(owning_process);
    }
}
