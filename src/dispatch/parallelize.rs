//! Admission control: bounds the jobs in flight per owning process.
//!
//! The layer consumes the job queue announced from above. Jobs are admitted
//! while fewer than `maximum_jobs` are outstanding; completions wait in the
//! pending list behind the jobs queued before them, so a completion is never
//! relayed before the data it closes.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::VecDeque;
use std::time::Duration;

use tokenweave_types::IndexArray;

use crate::core::events::{
    Completion, ErrorEvent, IterationEvent, Job, JobQueueEvent, JobQueueHandle, ResultEvent,
};
use crate::core::monitor::{
    MonitorProperty, PARALLELIZE_COMPLETED_JOBS, PARALLELIZE_QUEUE_SIZE, PARALLELIZE_SENT_JOBS,
};
use crate::core::process_map::ProcessStateMap;
use crate::error::{DispatchError, DispatchResult};

use super::config::ParallelizeConfig;
use super::layer::{DispatchLayer, LayerContext};

#[derive(Debug)]
enum Pending {
    Job(IndexArray),
    Completion(Completion),
}

struct ParallelizeState {
    queue: JobQueueHandle,
    pending: VecDeque<Pending>,
    active: usize,
    sent: u64,
    completed: u64,
    last_modified: DateTime<Utc>,
    /// Completions released for upward delivery, oldest first.
    outbox: VecDeque<Completion>,
}

impl ParallelizeState {
    fn new(queue: JobQueueHandle) -> Self {
        Self {
            queue,
            pending: VecDeque::new(),
            active: 0,
            sent: 0,
            completed: 0,
            last_modified: Utc::now(),
            outbox: VecDeque::new(),
        }
    }

    /// Admits queued events while capacity remains. Returns the jobs to send.
    fn fill_from_queue(&mut self, maximum: usize) -> Vec<Job> {
        let mut admitted = Vec::new();
        while self.active < maximum {
            let Some(event) = self.queue.pop() else {
                break;
            };
            match event {
                IterationEvent::Completion(completion) if self.pending.is_empty() => {
                    self.outbox.push_back(completion);
                }
                IterationEvent::Completion(completion) => {
                    self.pending.push_back(Pending::Completion(completion));
                }
                IterationEvent::Job(job) => {
                    self.pending.push_back(Pending::Job(job.index.clone()));
                    self.active += 1;
                    self.sent += 1;
                    admitted.push(job);
                }
            }
        }
        if !admitted.is_empty() {
            self.last_modified = Utc::now();
        }
        admitted
    }

    /// Frees the slot of the pending job at `index`, if there is one, and
    /// releases the completions that were waiting on it.
    fn finish_job(&mut self, index: &IndexArray) -> bool {
        let position = self
            .pending
            .iter()
            .position(|pending| matches!(pending, Pending::Job(pending) if pending == index));
        let Some(position) = position else {
            return false;
        };
        self.pending.remove(position);
        self.active -= 1;
        self.completed += 1;
        self.last_modified = Utc::now();
        while let Some(Pending::Completion(_)) = self.pending.front() {
            if let Some(Pending::Completion(completion)) = self.pending.pop_front() {
                self.outbox.push_back(completion);
            }
        }
        true
    }
}

struct ProcessSlot {
    state: Mutex<ParallelizeState>,
    /// Serialises upward delivery of completions.
    emitting: ReentrantMutex<()>,
}

pub struct Parallelize {
    config: ParallelizeConfig,
    states: ProcessStateMap<ProcessSlot>,
}

impl Parallelize {
    pub fn new(config: ParallelizeConfig, grace_period: Duration) -> Self {
        Self {
            config,
            states: ProcessStateMap::new(grace_period),
        }
    }

    pub fn maximum_jobs(&self) -> usize {
        self.config.maximum_jobs.max(1)
    }

    fn pump(&self, ctx: &LayerContext, slot: &ProcessSlot) -> DispatchResult<()> {
        let admitted = slot.state.lock().fill_from_queue(self.maximum_jobs());
        self.flush(ctx, slot)?;
        for job in admitted {
            tracing::debug!(
                owning_process = %job.owning_process,
                index = %job.index,
                "parallelize dispatching job"
            );
            ctx.push_down_job(job)?;
        }
        Ok(())
    }

    fn flush(&self, ctx: &LayerContext, slot: &ProcessSlot) -> DispatchResult<()> {
        let _emitting = slot.emitting.lock();
        loop {
            let next = slot.state.lock().outbox.pop_front();
            match next {
                Some(completion) => ctx.push_up_completion(completion)?,
                None => return Ok(()),
            }
        }
    }

    /// Bookkeeping after a result, completion or error for `index` was relayed.
    fn resolved(&self, ctx: &LayerContext, owning_process: &str, index: &IndexArray) -> DispatchResult<()> {
        let Some(slot) = self.states.get(owning_process) else {
            return Ok(());
        };
        let freed = slot.state.lock().finish_job(index);
        if !freed {
            tracing::debug!(
                owning_process = %owning_process,
                index = %index,
                "no pending job for event, slot kept"
            );
            return Ok(());
        }
        self.pump(ctx, &slot)
    }
}

impl DispatchLayer for Parallelize {
    fn name(&self) -> &str {
        "parallelize"
    }

    fn receive_job_queue(&self, ctx: &LayerContext, event: JobQueueEvent) -> DispatchResult<()> {
        let queue = event.queue.clone();
        let slot = self.states.get_or_insert_with(&event.owning_process, || ProcessSlot {
            state: Mutex::new(ParallelizeState::new(queue)),
            emitting: ReentrantMutex::new(()),
        });
        {
            let mut state = slot.state.lock();
            if !state.queue.same_queue(&event.queue) {
                tracing::warn!(
                    owning_process = %event.owning_process,
                    "replacing job queue of active process"
                );
                state.queue = event.queue;
            }
        }
        self.pump(ctx, &slot)
    }

    fn event_added(&self, ctx: &LayerContext, owning_process: &str) -> DispatchResult<()> {
        let slot = self
            .states
            .get(owning_process)
            .ok_or_else(|| DispatchError::UnknownProcess(owning_process.to_string()))?;
        self.pump(ctx, &slot)
    }

    fn receive_result(&self, ctx: &LayerContext, result: ResultEvent) -> DispatchResult<()> {
        let owning_process = result.owning_process.clone();
        let index = result.index.clone();
        ctx.push_up_result(result)?;
        self.resolved(ctx, &owning_process, &index)
    }

    fn receive_result_completion(&self, ctx: &LayerContext, completion: Completion) -> DispatchResult<()> {
        let owning_process = completion.owning_process.clone();
        let index = completion.index.clone();
        ctx.push_up_completion(completion)?;
        self.resolved(ctx, &owning_process, &index)
    }

    fn receive_error(&self, ctx: &LayerContext, error: ErrorEvent) -> DispatchResult<()> {
        let owning_process = error.owning_process.clone();
        let index = error.index.clone();
        ctx.push_up_error(error)?;
        self.resolved(ctx, &owning_process, &index)
    }

    fn finished_with(&self, owning_process: &str) {
        self.states.finished_with(owning_process);
    }

    fn monitor_properties(&self, owning_process: &str) -> Vec<MonitorProperty> {
        let Some(slot) = self.states.get(owning_process) else {
            return Vec::new();
        };
        let state = slot.state.lock();
        vec![
            MonitorProperty::new(PARALLELIZE_QUEUE_SIZE, state.queue.len() as i64, state.last_modified),
            MonitorProperty::new(PARALLELIZE_SENT_JOBS, state.sent as i64, state.last_modified),
            MonitorProperty::new(
                PARALLELIZE_COMPLETED_JOBS,
                state.completed as i64,
                state.last_modified,
            ),
        ]
    }
}
