//! Error types for the iteration and dispatch engine.
//!
//! - [`IterationError`]: Errors raised while building or driving an iteration strategy.
//! - [`DispatchError`]: Structural errors raised by the dispatch stack and its layers.
//! - [`FailureKind`]: Classification carried by asynchronous error events.

pub mod dispatch_error;
pub mod iteration_error;

pub use dispatch_error::DispatchError;
pub use iteration_error::IterationError;
pub use tokenweave_types::FailureKind;

/// Convenience alias for iteration-level results.
pub type IterationResult<T> = Result<T, IterationError>;
/// Convenience alias for dispatch-level results.
pub type DispatchResult<T> = Result<T, DispatchError>;
