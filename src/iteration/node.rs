//! Iteration strategy tree nodes.
//!
//! Nodes live in an arena owned by their strategy and refer to each other by
//! [`NodeId`]. The set of node kinds is closed.

use parking_lot::Mutex;
use std::fmt;

use crate::core::process_map::ProcessStateMap;

use super::cross_product::CrossState;
use super::dot_product::DotState;
use super::prefix_dot_product::PrefixDotState;

/// Handle of a node within one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a node, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinatorKind {
    Terminal,
    NamedInput,
    Dot,
    Cross,
    PrefixDot,
}

pub(crate) enum NodeKind {
    Terminal,
    NamedInput { port: String, cardinality: usize },
    Dot(ProcessStateMap<Mutex<DotState>>),
    Cross(ProcessStateMap<Mutex<CrossState>>),
    PrefixDot(ProcessStateMap<Mutex<PrefixDotState>>),
}

impl NodeKind {
    pub(crate) fn combinator_kind(&self) -> CombinatorKind {
        match self {
            NodeKind::Terminal => CombinatorKind::Terminal,
            NodeKind::NamedInput { .. } => CombinatorKind::NamedInput,
            NodeKind::Dot(_) => CombinatorKind::Dot,
            NodeKind::Cross(_) => CombinatorKind::Cross,
            NodeKind::PrefixDot(_) => CombinatorKind::PrefixDot,
        }
    }

    pub(crate) fn finished_with(&self, owning_process: &str) {
        match self {
            NodeKind::Terminal | NodeKind::NamedInput { .. } => {}
            NodeKind::Dot(states) => states.finished_with(owning_process),
            NodeKind::Cross(states) => states.finished_with(owning_process),
            NodeKind::PrefixDot(states) => states.finished_with(owning_process),
        }
    }
}

pub(crate) struct IterationNode {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    /// Position of this node among its parent's children.
    pub(crate) position: usize,
    pub(crate) children: Vec<NodeId>,
}

impl IterationNode {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            position: 0,
            children: Vec::new(),
        }
    }
}
