use super::DispatchError;
use thiserror::Error;

/// Iteration strategy errors
#[derive(Debug, Clone, Error)]
pub enum IterationError {
    #[error("Iteration type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Missing iteration input: no depth declared for port '{0}'")]
    MissingInput(String),
    #[error("Invalid iteration tree: {0}")]
    InvalidTree(String),
    #[error("Unknown input port: {0}")]
    UnknownPort(String),
    #[error("Dispatch error: {0}")]
    Dispatch(Box<DispatchError>),
}

impl From<DispatchError> for IterationError {
    fn from(value: DispatchError) -> Self {
        IterationError::Dispatch(Box::new(value))
    }
}
