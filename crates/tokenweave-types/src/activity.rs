use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;

use crate::data_ref::{DataRef, InvocationContext};
use crate::index::IndexArray;

/// Classification of an asynchronous failure reported by an activity or layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvocationFailure,
    ConfigurationFailure,
    Timeout,
    Internal,
}

impl FailureKind {
    /// Whether re-sending the same job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::InvocationFailure | FailureKind::Timeout)
    }
}

/// Declared port of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(default)]
    pub depth: usize,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, depth: usize) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }
}

/// Event reported by a running activity through its [`ActivityCallback`].
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    Result {
        data: HashMap<String, DataRef>,
        index: IndexArray,
    },
    Completion {
        index: IndexArray,
    },
    Failure {
        message: String,
        cause: Option<String>,
        kind: FailureKind,
    },
}

/// Receiving half of an activity callback channel.
pub type ActivityReceiver = mpsc::UnboundedReceiver<ActivityEvent>;

/// Handle an activity uses to report results back to the engine.
///
/// Dropping every clone of the callback closes the channel, which the engine
/// reads as "the activity finished".
#[derive(Clone)]
pub struct ActivityCallback {
    tx: mpsc::UnboundedSender<ActivityEvent>,
    context: InvocationContext,
}

impl ActivityCallback {
    pub fn channel(context: InvocationContext) -> (Self, ActivityReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, context }, rx)
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn receive_result(&self, data: HashMap<String, DataRef>, index: IndexArray) {
        let _ = self.tx.send(ActivityEvent::Result { data, index });
    }

    pub fn receive_completion(&self, index: IndexArray) {
        let _ = self.tx.send(ActivityEvent::Completion { index });
    }

    pub fn fail(&self, message: impl Into<String>, cause: Option<String>, kind: FailureKind) {
        let _ = self.tx.send(ActivityEvent::Failure {
            message: message.into(),
            cause,
            kind,
        });
    }

    /// Runs arbitrary work on an engine-owned task.
    pub fn request_run<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task);
    }
}

/// Opaque unit of work invoked by the dispatch stack.
#[async_trait]
pub trait Activity: Send + Sync {
    fn name(&self) -> &str;

    fn input_ports(&self) -> &[PortSpec];

    fn output_ports(&self) -> &[PortSpec];

    /// Starts the activity. Outcomes are reported through `callback`; the
    /// returned future may complete before the activity does.
    async fn invoke(&self, inputs: HashMap<String, DataRef>, callback: ActivityCallback);
}
