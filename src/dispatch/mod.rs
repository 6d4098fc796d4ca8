//! Dispatch stacks.
//!
//! A dispatch stack sits below a processor's iteration strategy. Jobs flow
//! down through its layers to the activity and results, completions and
//! errors flow back up:
//!
//! - [`Parallelize`]: bounds the jobs in flight per owning process.
//! - [`ErrorBounce`]: turns error inputs and failures into error data.
//! - [`Loop`]: re-submits jobs while a condition activity says so.
//! - [`Retry`]: re-sends failed jobs with backoff.
//! - [`Invoke`]: runs the activity.

pub mod builder;
pub mod config;
pub mod error_bounce;
pub mod invoke;
pub mod layer;
pub mod loop_layer;
pub mod parallelize;
pub mod retry;
pub mod stack;

pub use builder::{ActivityRegistry, DispatchStackBuilder};
pub use config::{
    parse_stack_config, BackoffStrategy, ConfigFormat, DispatchStackConfig, LayerConfig,
    LoopConfig, ParallelizeConfig, RetryConfig,
};
pub use error_bounce::ErrorBounce;
pub use invoke::Invoke;
pub use layer::{DispatchLayer, LayerContext, ProcessorSpec};
pub use loop_layer::{Loop, LOOP_PORT};
pub use parallelize::Parallelize;
pub use retry::{calculate_retry_interval, Retry};
pub use stack::DispatchStack;
