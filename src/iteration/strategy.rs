//! Iteration strategy: a tree of combinators merging per-port token streams.
//!
//! Events enter at a named-input leaf, travel up through the combinators and
//! leave through the terminal node into an [`IterationSink`], usually a
//! dispatch stack. A combinator holds its per-process lock while it forwards
//! its output to the parent. Locks are therefore always taken leaf-to-root,
//! and the events a node emits reach its parent in the order it emitted them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use tokenweave_types::{DataRef, IndexArray, InvocationContext};

use crate::core::events::{Completion, IterationEvent, Job};
use crate::core::process_map::{ProcessStateMap, DEFAULT_GRACE_PERIOD};
use crate::error::{IterationError, IterationResult};

use super::cross_product::CrossState;
use super::dot_product::DotState;
use super::node::{CombinatorKind, IterationNode, NodeId, NodeKind};
use super::prefix_dot_product::PrefixDotState;

/// Receiver of the events leaving a strategy's terminal node.
pub trait IterationSink: Send + Sync {
    fn receive_job(&self, job: Job) -> IterationResult<()>;
    fn receive_completion(&self, completion: Completion) -> IterationResult<()>;
}

/// Sink that records everything it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<IterationEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IterationEvent> {
        self.events.lock().clone()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                IterationEvent::Job(job) => Some(job.clone()),
                IterationEvent::Completion(_) => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                IterationEvent::Completion(completion) => Some(completion.clone()),
                IterationEvent::Job(_) => None,
            })
            .collect()
    }
}

impl IterationSink for CollectingSink {
    fn receive_job(&self, job: Job) -> IterationResult<()> {
        self.events.lock().push(IterationEvent::Job(job));
        Ok(())
    }

    fn receive_completion(&self, completion: Completion) -> IterationResult<()> {
        self.events.lock().push(IterationEvent::Completion(completion));
        Ok(())
    }
}

const TERMINAL: NodeId = NodeId(0);

/// Builds the node tree of an [`IterationStrategy`].
pub struct IterationStrategyBuilder {
    nodes: Vec<IterationNode>,
    ports: HashMap<String, NodeId>,
    grace_period: Duration,
}

impl Default for IterationStrategyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IterationStrategyBuilder {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    /// Builder whose combinators keep per-process state for `grace_period`
    /// after `finished_with`.
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            nodes: vec![IterationNode::new(NodeKind::Terminal)],
            ports: HashMap::new(),
            grace_period,
        }
    }

    pub fn named_input(
        &mut self,
        port: impl Into<String>,
        cardinality: usize,
    ) -> IterationResult<NodeId> {
        let port = port.into();
        if self.ports.contains_key(&port) {
            return Err(IterationError::InvalidTree(format!(
                "duplicate input port '{}'",
                port
            )));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(IterationNode::new(NodeKind::NamedInput {
            port: port.clone(),
            cardinality,
        }));
        self.ports.insert(port, id);
        Ok(id)
    }

    pub fn dot(&mut self, children: &[NodeId]) -> IterationResult<NodeId> {
        let kind = NodeKind::Dot(ProcessStateMap::new(self.grace_period));
        self.combinator(kind, children)
    }

    pub fn cross(&mut self, children: &[NodeId]) -> IterationResult<NodeId> {
        let kind = NodeKind::Cross(ProcessStateMap::new(self.grace_period));
        self.combinator(kind, children)
    }

    /// `shorter` supplies prefix indices, `longer` the indices they prefix.
    pub fn prefix_dot(&mut self, shorter: NodeId, longer: NodeId) -> IterationResult<NodeId> {
        let kind = NodeKind::PrefixDot(ProcessStateMap::new(self.grace_period));
        self.combinator(kind, &[shorter, longer])
    }

    fn combinator(&mut self, kind: NodeKind, children: &[NodeId]) -> IterationResult<NodeId> {
        if children.is_empty() {
            return Err(IterationError::InvalidTree(
                "combinator needs at least one child".to_string(),
            ));
        }
        for (i, child) in children.iter().enumerate() {
            self.check_attachable(*child)?;
            if children[..i].contains(child) {
                return Err(IterationError::InvalidTree(format!(
                    "node {} listed twice",
                    child
                )));
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(IterationNode::new(kind));
        for child in children {
            self.attach(id, *child);
        }
        Ok(id)
    }

    fn check_attachable(&self, child: NodeId) -> IterationResult<()> {
        let node = self
            .nodes
            .get(child.0)
            .ok_or_else(|| IterationError::InvalidTree(format!("unknown node {}", child)))?;
        if child == TERMINAL {
            return Err(IterationError::InvalidTree(
                "the terminal node cannot be a child".to_string(),
            ));
        }
        if node.parent.is_some() {
            return Err(IterationError::InvalidTree(format!(
                "node {} already has a parent",
                child
            )));
        }
        Ok(())
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        let position = self.nodes[parent.0].children.len();
        self.nodes[parent.0].children.push(child);
        let node = &mut self.nodes[child.0];
        node.parent = Some(parent);
        node.position = position;
    }

    /// Attaches `root` under the terminal node and checks that every node
    /// is connected.
    pub fn build(mut self, root: NodeId) -> IterationResult<IterationStrategy> {
        self.check_attachable(root)?;
        self.attach(TERMINAL, root);
        if let Some(orphan) = self
            .nodes
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, node)| node.parent.is_none())
        {
            return Err(IterationError::InvalidTree(format!(
                "node #{} is not connected to the terminal",
                orphan.0
            )));
        }
        Ok(IterationStrategy {
            nodes: self.nodes,
            ports: self.ports,
        })
    }
}

pub struct IterationStrategy {
    nodes: Vec<IterationNode>,
    ports: HashMap<String, NodeId>,
}

impl IterationStrategy {
    /// Dot product over the given `(port, cardinality)` inputs.
    pub fn dot_product(inputs: &[(&str, usize)]) -> IterationResult<Self> {
        let mut builder = IterationStrategyBuilder::new();
        let leaves = inputs
            .iter()
            .map(|(port, cardinality)| builder.named_input(*port, *cardinality))
            .collect::<IterationResult<Vec<_>>>()?;
        let root = builder.dot(&leaves)?;
        builder.build(root)
    }

    /// Cross product over the given `(port, cardinality)` inputs.
    pub fn cross_product(inputs: &[(&str, usize)]) -> IterationResult<Self> {
        let mut builder = IterationStrategyBuilder::new();
        let leaves = inputs
            .iter()
            .map(|(port, cardinality)| builder.named_input(*port, *cardinality))
            .collect::<IterationResult<Vec<_>>>()?;
        let root = builder.cross(&leaves)?;
        builder.build(root)
    }

    /// Input port names in sorted order.
    pub fn input_ports(&self) -> Vec<&str> {
        let mut ports: Vec<&str> = self.ports.keys().map(String::as_str).collect();
        ports.sort_unstable();
        ports
    }

    pub fn has_port(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    /// Desired cardinality declared for `port`.
    pub fn cardinality(&self, port: &str) -> Option<usize> {
        let id = self.ports.get(port)?;
        match &self.nodes[id.0].kind {
            NodeKind::NamedInput { cardinality, .. } => Some(*cardinality),
            _ => None,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.nodes[TERMINAL.0].children.first().copied()
    }

    pub fn kind(&self, id: NodeId) -> Option<CombinatorKind> {
        self.nodes.get(id.0).map(|node| node.kind.combinator_kind())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Length of the index arrays this strategy emits, given the depth of
    /// the data supplied on each port.
    pub fn iteration_depth(&self, input_depths: &HashMap<String, usize>) -> IterationResult<usize> {
        self.node_depth(TERMINAL, input_depths)
    }

    fn node_depth(&self, id: NodeId, input_depths: &HashMap<String, usize>) -> IterationResult<usize> {
        let node = &self.nodes[id.0];
        let child_depths = || {
            node.children
                .iter()
                .map(|child| self.node_depth(*child, input_depths))
                .collect::<IterationResult<Vec<_>>>()
        };

        match &node.kind {
            NodeKind::Terminal => match node.children.first() {
                Some(child) => self.node_depth(*child, input_depths),
                None => Ok(0),
            },
            NodeKind::NamedInput { port, cardinality } => {
                let supplied = input_depths
                    .get(port)
                    .ok_or_else(|| IterationError::MissingInput(port.clone()))?;
                Ok(supplied.saturating_sub(*cardinality))
            }
            NodeKind::Dot(_) => {
                let depths = child_depths()?;
                let first = depths.first().copied().unwrap_or(0);
                if depths.iter().any(|d| *d != first) {
                    return Err(IterationError::TypeMismatch(format!(
                        "dot product {} over children of depths {:?}",
                        id, depths
                    )));
                }
                Ok(first)
            }
            NodeKind::Cross(_) => Ok(child_depths()?.into_iter().sum()),
            NodeKind::PrefixDot(_) => {
                let depths = child_depths()?;
                match depths.as_slice() {
                    [shorter, longer] if shorter <= longer => Ok(*longer),
                    _ => Err(IterationError::TypeMismatch(format!(
                        "prefix dot product {} over children of depths {:?}",
                        id, depths
                    ))),
                }
            }
        }
    }

    /// Feeds one data item arriving on `port`.
    pub fn receive_data(
        &self,
        port: &str,
        owning_process: &str,
        index: IndexArray,
        data: DataRef,
        context: InvocationContext,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let mut map = HashMap::with_capacity(1);
        map.insert(port.to_string(), data);
        let job = Job::new(owning_process, index, map, context);
        self.receive_event(port, IterationEvent::Job(job), sink)
    }

    /// Feeds a completion arriving on `port`.
    pub fn receive_completion(
        &self,
        port: &str,
        owning_process: &str,
        index: IndexArray,
        context: InvocationContext,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let completion = Completion::new(owning_process, index, context);
        self.receive_event(port, IterationEvent::Completion(completion), sink)
    }

    pub fn receive_event(
        &self,
        port: &str,
        event: IterationEvent,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let leaf = self
            .ports
            .get(port)
            .copied()
            .ok_or_else(|| IterationError::UnknownPort(port.to_string()))?;
        self.deliver(leaf, 0, event, sink)
    }

    fn deliver(
        &self,
        id: NodeId,
        child: usize,
        event: IterationEvent,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        let node = &self.nodes[id.0];
        let fan_in = node.children.len();
        match &node.kind {
            NodeKind::Terminal => {
                tracing::debug!(
                    owning_process = %event.owning_process(),
                    index = %event.index(),
                    "iteration strategy emitting"
                );
                match event {
                    IterationEvent::Job(job) => sink.receive_job(job),
                    IterationEvent::Completion(completion) => sink.receive_completion(completion),
                }
            }
            NodeKind::NamedInput { .. } => self.emit(node, event, sink),
            NodeKind::Dot(states) => {
                let state = states
                    .get_or_insert_with(event.owning_process(), || Mutex::new(DotState::new(fan_in)));
                let mut guard = state.lock();
                for out in guard.receive(child, event) {
                    self.emit(node, out, sink)?;
                }
                Ok(())
            }
            NodeKind::Cross(states) => {
                let state = states
                    .get_or_insert_with(event.owning_process(), || Mutex::new(CrossState::new(fan_in)));
                let mut guard = state.lock();
                for out in guard.receive(child, event) {
                    self.emit(node, out, sink)?;
                }
                Ok(())
            }
            NodeKind::PrefixDot(states) => {
                let state = states
                    .get_or_insert_with(event.owning_process(), || Mutex::new(PrefixDotState::new()));
                let mut guard = state.lock();
                for out in guard.receive(child, event) {
                    self.emit(node, out, sink)?;
                }
                Ok(())
            }
        }
    }

    fn emit(
        &self,
        node: &IterationNode,
        event: IterationEvent,
        sink: &dyn IterationSink,
    ) -> IterationResult<()> {
        match node.parent {
            Some(parent) => self.deliver(parent, node.position, event, sink),
            None => Err(IterationError::InvalidTree(
                "event reached a detached node".to_string(),
            )),
        }
    }

    /// Schedules release of every combinator's state for `owning_process`.
    pub fn finished_with(&self, owning_process: &str) {
        for node in &self.nodes {
            node.kind.finished_with(owning_process);
        }
    }
}
