#![allow(unused)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use tokenweave::{
    Activity, ActivityCallback, DataRef, DispatchLayer, DispatchOutput, DispatchResult,
    DispatchStack, FailureKind, IndexArray, InMemoryReferenceService, InvocationContext, Job,
    LayerContext, PortSpec, ReferenceService, ResultEvent, LOOP_PORT,
};

pub async fn with_timeout<F, T>(label: &str, duration: Duration, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, f)
        .await
        .unwrap_or_else(|_| panic!("'{}' timed out after {:?}", label, duration))
}

pub fn references() -> Arc<InMemoryReferenceService> {
    Arc::new(InMemoryReferenceService::new())
}

pub fn index(indices: &[usize]) -> IndexArray {
    IndexArray::from(indices)
}

pub fn job(references: &Arc<InMemoryReferenceService>, process: &str, at: &[usize], entries: &[(&str, Value)]) -> Job {
    let data = entries
        .iter()
        .map(|(port, value)| (port.to_string(), references.register(value.clone(), 0)))
        .collect();
    Job::new(process, index(at), data, references.context())
}

/// Next stack output, panicking after five seconds.
pub async fn next_output(rx: &mut mpsc::UnboundedReceiver<DispatchOutput>) -> DispatchOutput {
    with_timeout("next output", Duration::from_secs(5), rx.recv())
        .await
        .expect("output channel closed")
}

/// Collects outputs up to and including the final completion.
pub async fn outputs_until_final(rx: &mut mpsc::UnboundedReceiver<DispatchOutput>) -> Vec<DispatchOutput> {
    let mut outputs = Vec::new();
    loop {
        let output = next_output(rx).await;
        let done = matches!(&output, DispatchOutput::Completion(c) if c.is_final());
        outputs.push(output);
        if done {
            return outputs;
        }
    }
}

/// Bottom layer that keeps every job until the test answers it.
#[derive(Default)]
pub struct Hold {
    jobs: Mutex<Vec<Job>>,
}

impl Hold {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl DispatchLayer for Hold {
    fn name(&self) -> &str {
        "hold"
    }

    fn receive_job(&self, _ctx: &LayerContext, job: Job) -> DispatchResult<()> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

/// Answers a held job through the bottom of `stack`.
pub fn answer(stack: &DispatchStack, job: &Job) {
    let out = job.context.reference_service().register(json!("answered"), 0);
    stack
        .receive_result(ResultEvent {
            owning_process: job.owning_process.clone(),
            index: job.index.clone(),
            data: HashMap::from([("out".to_string(), out)]),
            context: job.context.clone(),
            streaming: false,
        })
        .unwrap();
}

/// Joins the string values of its inputs in port order.
pub struct Concat {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    invocations: Mutex<usize>,
    fail_on: Option<String>,
}

impl Concat {
    pub fn new(ports: &[&str]) -> Arc<Self> {
        Self::build(ports, None)
    }

    /// Fails every invocation that receives `value` on any port.
    pub fn failing_on(ports: &[&str], value: &str) -> Arc<Self> {
        Self::build(ports, Some(value.to_string()))
    }

    fn build(ports: &[&str], fail_on: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            inputs: ports.iter().map(|p| PortSpec::new(*p, 0)).collect(),
            outputs: vec![PortSpec::new("out", 0)],
            invocations: Mutex::new(0),
            fail_on,
        })
    }

    pub fn invocations(&self) -> usize {
        *self.invocations.lock()
    }
}

#[async_trait]
impl Activity for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    async fn invoke(&self, inputs: HashMap<String, DataRef>, callback: ActivityCallback) {
        *self.invocations.lock() += 1;
        let references = callback.context().reference_service().clone();
        let mut parts = Vec::new();
        for port in &self.inputs {
            let value = inputs
                .get(&port.name)
                .and_then(|data| references.resolve(data))
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();
            if self.fail_on.as_deref() == Some(value.as_str()) {
                callback.fail(format!("cannot handle {}", value), None, FailureKind::InvocationFailure);
                return;
            }
            parts.push(value);
        }
        let out = references.register(json!(parts.join("")), 0);
        callback.receive_result(HashMap::from([("out".to_string(), out)]), IndexArray::empty());
    }
}

/// Fails the first `failures` invocations, then answers.
pub struct Flaky {
    remaining: Mutex<usize>,
    invocations: Mutex<usize>,
    outputs: Vec<PortSpec>,
}

impl Flaky {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: Mutex::new(failures),
            invocations: Mutex::new(0),
            outputs: vec![PortSpec::new("out", 0)],
        })
    }

    pub fn invocations(&self) -> usize {
        *self.invocations.lock()
    }
}

#[async_trait]
impl Activity for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    async fn invoke(&self, _inputs: HashMap<String, DataRef>, callback: ActivityCallback) {
        *self.invocations.lock() += 1;
        {
            let mut remaining = self.remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                drop(remaining);
                callback.fail("transient", None, FailureKind::Timeout);
                return;
            }
        }
        let out = callback.context().reference_service().register(json!("ok"), 0);
        callback.receive_result(HashMap::from([("out".to_string(), out)]), IndexArray::empty());
    }
}

/// Loop condition answering with the next scripted value.
pub struct Condition {
    answers: Mutex<VecDeque<bool>>,
    outputs: Vec<PortSpec>,
}

impl Condition {
    pub fn new(answers: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            outputs: vec![PortSpec::new(LOOP_PORT, 0)],
        })
    }
}

#[async_trait]
impl Activity for Condition {
    fn name(&self) -> &str {
        "keep_going"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    async fn invoke(&self, _inputs: HashMap<String, DataRef>, callback: ActivityCallback) {
        let answer = self.answers.lock().pop_front().unwrap_or(false);
        let decision = callback.context().reference_service().register(json!(answer), 0);
        callback.receive_result(HashMap::from([(LOOP_PORT.to_string(), decision)]), IndexArray::empty());
    }
}

/// Joins `a` and `b` after a short random sleep, tracking concurrent
/// invocations per process. Values on `a` are prefixed `"<process>/"`.
pub struct Tracked {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    /// Current and peak invocations in flight, keyed by process.
    in_flight: Mutex<HashMap<String, (usize, usize)>>,
}

impl Tracked {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inputs: vec![PortSpec::new("a", 0), PortSpec::new("b", 0)],
            outputs: vec![PortSpec::new("out", 0)],
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn peak(&self, process: &str) -> usize {
        self.in_flight.lock().get(process).map_or(0, |(_, peak)| *peak)
    }
}

#[async_trait]
impl Activity for Tracked {
    fn name(&self) -> &str {
        "tracked"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortSpec] {
        &self.outputs
    }

    async fn invoke(&self, inputs: HashMap<String, DataRef>, callback: ActivityCallback) {
        use rand::Rng;

        let references = callback.context().reference_service().clone();
        let text = |port: &str| {
            inputs
                .get(port)
                .and_then(|data| references.resolve(data))
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default()
        };
        let (a, b) = (text("a"), text("b"));
        let process = a.split('/').next().unwrap_or_default().to_string();
        {
            let mut in_flight = self.in_flight.lock();
            let entry = in_flight.entry(process.clone()).or_default();
            entry.0 += 1;
            entry.1 = entry.1.max(entry.0);
        }

        let delay = rand::thread_rng().gen_range(0..3u64);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if let Some(entry) = self.in_flight.lock().get_mut(&process) {
            entry.0 -= 1;
        }
        let out = references.register(json!(format!("{}{}", a, b)), 0);
        callback.receive_result(HashMap::from([("out".to_string(), out)]), IndexArray::empty());
    }
}
