//! Staged iteration: several strategies chained one after another.
//!
//! Each job leaving a stage is split per port and fed to the next stage's
//! named inputs at the job's index. Completions are broadcast to every named
//! input of the next stage.

use std::collections::HashMap;

use tokenweave_types::{DataRef, IndexArray, InvocationContext};

use crate::core::events::{Completion, IterationEvent, Job};
use crate::error::{IterationError, IterationResult};

use super::strategy::{IterationSink, IterationStrategy};

pub struct IterationStrategyStack {
    stages: Vec<IterationStrategy>,
}

impl IterationStrategyStack {
    pub fn new(first: IterationStrategy) -> Self {
        Self {
            stages: vec![first],
        }
    }

    pub fn push(mut self, stage: IterationStrategy) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[IterationStrategy] {
        &self.stages
    }

    pub fn input_ports(&self) -> Vec<&str> {
        self.stages[0].input_ports()
    }

    /// Sum of the stage depths. After each stage a port's depth is cut down
    /// to the cardinality that stage declared for it.
    pub fn iteration_depth(&self, input_depths: &HashMap<String, usize>) -> IterationResult<usize> {
        let mut depths = input_depths.clone();
        let mut total = 0;
        for stage in &self.stages {
            total += stage.iteration_depth(&depths)?;
            for (port, depth) in depths.iter_mut() {
                if let Some(cardinality) = stage.cardinality(port) {
                    *depth = (*depth).min(cardinality);
                }
            }
        }
        Ok(total)
    }

    pub fn receive_data(
        &self,
        port: &str,
        owning_process: &str,
        index: IndexArray,
        data: DataRef,
        context: InvocationContext,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let link = StageLink::new(self, 0, sink);
        self.stages[0].receive_data(port, owning_process, index, data, context, &link)
    }

    pub fn receive_completion(
        &self,
        port: &str,
        owning_process: &str,
        index: IndexArray,
        context: InvocationContext,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let link = StageLink::new(self, 0, sink);
        self.stages[0].receive_completion(port, owning_process, index, context, &link)
    }

    pub fn receive_event(
        &self,
        port: &str,
        event: IterationEvent,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let link = StageLink::new(self, 0, sink);
        self.stages[0].receive_event(port, event, &link)
    }

    pub fn finished_with(&self, owning_process: &str) {
        for stage in &self.stages {
            stage.finished_with(owning_process);
        }
    }
}

/// Sink connecting stage `stage` to the one after it, or to the caller's
/// sink after the last stage.
struct StageLink<'a> {
    stack: &'a IterationStrategyStack,
    stage: usize,
    sink: &'a dyn IterationSink,
}

impl<'a> StageLink<'a> {
    fn new(stack: &'a IterationStrategyStack, stage: usize, sink: &'a dyn IterationSink) -> Self {
        Self { stack, stage, sink }
    }

    fn next(&self) -> Option<(&'a IterationStrategy, StageLink<'a>)> {
        let next = self.stage + 1;
        self.stack
            .stages
            .get(next)
            .map(|strategy| (strategy, StageLink::new(self.stack, next, self.sink)))
    }
}

impl IterationSink for StageLink<'_> {
    fn receive_job(&self, job: Job) -> IterationResult<()> {
        let Some((next, link)) = self.next() else {
            return self.sink.receive_job(job);
        };
        if let Some(port) = job.data.keys().find(|port| !next.has_port(port)) {
            return Err(IterationError::UnknownPort(port.clone()));
        }
        let mut entries: Vec<(String, DataRef)> = job.data.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (port, data) in entries {
            next.receive_data(
                &port,
                &job.owning_process,
                job.index.clone(),
                data,
                job.context.clone(),
                &link,
            )?;
        }
        Ok(())
    }

    fn receive_completion(&self, completion: Completion) -> IterationResult<()> {
        let Some((next, link)) = self.next() else {
            return self.sink.receive_completion(completion);
        };
        for port in next.input_ports() {
            next.receive_completion(
                port,
                &completion.owning_process,
                completion.index.clone(),
                completion.context.clone(),
                &link,
            )?;
        }
        Ok(())
    }
}
