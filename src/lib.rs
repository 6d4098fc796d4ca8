//! # Tokenweave: token iteration and dispatch for dataflow workflows
//!
//! `tokenweave` drives the per-processor core of a dataflow workflow engine.
//! Data arrives on a processor's input ports as a stream of references, each
//! tagged with an index array locating it inside a nested collection. The
//! engine decides which combinations of those items form invocation jobs and
//! pushes the jobs through a configurable stack of dispatch layers:
//!
//! - **Iteration strategies**: trees of dot, cross and prefix-dot combinators
//!   over named input ports, with per-run caches and completion accounting.
//! - **Dispatch stacks**: ordered layers for admission control, error
//!   reflection, conditional looping, retry with backoff and activity
//!   invocation.
//! - **Per-run state**: every component keys its state by owning process and
//!   releases it a grace period after `finished_with`.
//! - **Monitoring**: named counters per owning process with timestamps.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokenweave::{
//!     DispatchStackBuilder, IndexArray, InMemoryReferenceService, IterationStrategy,
//!     ReferenceService,
//! };
//! # use tokenweave::Activity;
//!
//! # async fn run(tool: Arc<dyn Activity>) {
//! let references = Arc::new(InMemoryReferenceService::new());
//! let strategy = IterationStrategy::cross_product(&[("a", 0), ("b", 0)]).unwrap();
//! let (stack, mut outputs) = DispatchStackBuilder::for_activity(tool).build().unwrap();
//!
//! let context = references.context();
//! for (port, value) in [("a", "x"), ("b", "y")] {
//!     let data = references.register(serde_json::json!(value), 0);
//!     strategy
//!         .receive_data(port, "run1", IndexArray::from([0]), data, context.clone(), &stack)
//!         .unwrap();
//!     strategy
//!         .receive_completion(port, "run1", IndexArray::empty(), context.clone(), &stack)
//!         .unwrap();
//! }
//! while let Some(output) = outputs.recv().await {
//!     println!("{:?}", output);
//! }
//! # }
//! ```

pub mod core;
pub mod dispatch;
pub mod error;
pub mod iteration;

#[cfg(test)]
mod test_support;

pub use tokenweave_types::{
    Activity, ActivityCallback, ActivityEvent, ActivityReceiver, DataRef, FailureKind, IndexArray,
    InvocationContext, PortSpec, ReferenceService,
};

pub use crate::core::{
    Completion, DispatchOutput, ErrorEvent, InMemoryReferenceService, IterationEvent, Job,
    JobQueueEvent, JobQueueHandle, MonitorProperty, ProcessStateMap, ResultEvent, TreeCache,
    DEFAULT_GRACE_PERIOD,
};
pub use dispatch::{
    calculate_retry_interval, parse_stack_config, ActivityRegistry, BackoffStrategy, ConfigFormat,
    DispatchLayer, DispatchStack, DispatchStackBuilder, DispatchStackConfig, ErrorBounce, Invoke,
    LayerConfig, LayerContext, Loop, LoopConfig, Parallelize, ParallelizeConfig, ProcessorSpec,
    Retry, RetryConfig, LOOP_PORT,
};
pub use error::{DispatchError, DispatchResult, IterationError, IterationResult};
pub use iteration::{
    CollectingSink, CombinatorKind, IterationSink, IterationStrategy, IterationStrategyBuilder,
    IterationStrategyStack, NodeId,
};
