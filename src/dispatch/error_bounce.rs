//! Turns erroneous input and failures from below into error placeholder data.
//!
//! Jobs carrying error references are never invoked. The processor instead
//! produces an error placeholder on every declared output port, and failures
//! reported from below are converted the same way, so nothing above this
//! layer ever observes a raw failure.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use tokenweave_types::{DataRef, IndexArray, InvocationContext};

use crate::core::events::{ErrorEvent, Job, ResultEvent};
use crate::core::monitor::{MonitorProperty, ERROR_BOUNCE_REFLECTED, ERROR_BOUNCE_TRANSLATED};
use crate::core::process_map::ProcessStateMap;
use crate::error::DispatchResult;

use super::layer::{DispatchLayer, LayerContext};

#[derive(Debug)]
struct BounceCounters {
    reflected: u64,
    translated: u64,
    last_modified: DateTime<Utc>,
}

impl Default for BounceCounters {
    fn default() -> Self {
        Self {
            reflected: 0,
            translated: 0,
            last_modified: Utc::now(),
        }
    }
}

pub struct ErrorBounce {
    counters: ProcessStateMap<Mutex<BounceCounters>>,
}

impl ErrorBounce {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            counters: ProcessStateMap::new(grace_period),
        }
    }

    fn count(&self, owning_process: &str, update: impl FnOnce(&mut BounceCounters)) {
        let counters = self
            .counters
            .get_or_insert_with(owning_process, || Mutex::new(BounceCounters::default()));
        let mut counters = counters.lock();
        update(&mut counters);
        counters.last_modified = Utc::now();
    }

    /// One freshly registered placeholder per declared output port.
    fn placeholders(
        ctx: &LayerContext,
        context: &InvocationContext,
        reason: &str,
        causes: &[DataRef],
    ) -> HashMap<String, DataRef> {
        let processor = ctx.processor();
        let references = context.reference_service();
        processor
            .outputs
            .iter()
            .map(|port| {
                let message = format!("{}:{} {}", processor.name, port.name, reason);
                let placeholder = references.register_error(port.depth, &message, causes);
                (port.name.clone(), placeholder)
            })
            .collect()
    }

    fn bounce(
        ctx: &LayerContext,
        owning_process: String,
        index: IndexArray,
        data: HashMap<String, DataRef>,
        context: InvocationContext,
    ) -> DispatchResult<()> {
        ctx.push_up_result(ResultEvent {
            owning_process,
            index,
            data,
            context,
            streaming: false,
        })
    }
}

impl DispatchLayer for ErrorBounce {
    fn name(&self) -> &str {
        "error_bounce"
    }

    fn receive_job(&self, ctx: &LayerContext, job: Job) -> DispatchResult<()> {
        if !job.has_errors() {
            return ctx.push_down_job(job);
        }

        let mut erroneous: Vec<(&String, &DataRef)> = job
            .data
            .iter()
            .filter(|(_, data)| data.contains_errors())
            .collect();
        erroneous.sort_by(|a, b| a.0.cmp(b.0));
        let ports: Vec<&str> = erroneous.iter().map(|(port, _)| port.as_str()).collect();
        let causes: Vec<DataRef> = erroneous.iter().map(|(_, data)| (*data).clone()).collect();

        tracing::debug!(
            owning_process = %job.owning_process,
            index = %job.index,
            ports = ?ports,
            "reflecting erroneous input"
        );
        let reason = format!("received erroneous input on {}", ports.join(", "));
        let data = Self::placeholders(ctx, &job.context, &reason, &causes);
        self.count(&job.owning_process, |c| c.reflected += 1);
        Self::bounce(ctx, job.owning_process, job.index, data, job.context)
    }

    fn receive_error(&self, ctx: &LayerContext, error: ErrorEvent) -> DispatchResult<()> {
        tracing::debug!(
            owning_process = %error.owning_process,
            index = %error.index,
            kind = ?error.kind,
            "translating failure into error data"
        );
        let reason = match &error.cause {
            Some(cause) => format!("failed: {} ({})", error.message, cause),
            None => format!("failed: {}", error.message),
        };
        let data = Self::placeholders(ctx, &error.context, &reason, &[]);
        self.count(&error.owning_process, |c| c.translated += 1);
        Self::bounce(ctx, error.owning_process, error.index, data, error.context)
    }

    fn finished_with(&self, owning_process: &str) {
        self.counters.finished_with(owning_process);
    }

    fn monitor_properties(&self, owning_process: &str) -> Vec<MonitorProperty> {
        let Some(counters) = self.counters.get(owning_process) else {
            return Vec::new();
        };
        let counters = counters.lock();
        vec![
            MonitorProperty::new(ERROR_BOUNCE_REFLECTED, counters.reflected as i64, counters.last_modified),
            MonitorProperty::new(
                ERROR_BOUNCE_TRANSLATED,
                counters.translated as i64,
                counters.last_modified,
            ),
        ]
    }
}
