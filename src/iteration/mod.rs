//! Iteration strategies.
//!
//! A strategy decides which combinations of incoming data items form the
//! jobs of a processor. Leaves are named input ports; inner nodes are dot,
//! cross and prefix-dot combinators; the terminal node hands the resulting
//! jobs and completions to an [`IterationSink`].

mod completion;
mod cross_product;
mod dot_product;
pub mod node;
mod prefix_dot_product;
pub mod stack;
pub mod strategy;

pub use node::{CombinatorKind, NodeId};
pub use stack::IterationStrategyStack;
pub use strategy::{CollectingSink, IterationSink, IterationStrategy, IterationStrategyBuilder};
