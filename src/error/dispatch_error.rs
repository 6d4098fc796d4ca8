use thiserror::Error;

/// Structural dispatch errors.
///
/// These indicate a misconfigured stack or a bug in a collaborator, never a
/// problem with workflow data. Data problems travel as error events instead.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Unknown owning process: {0}")]
    UnknownProcess(String),
    #[error("No layer below {layer}")]
    NoLayerBelow { layer: String },
    #[error("Layer {layer} cannot handle {event}")]
    UnsupportedEvent { layer: String, event: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid stack configuration: {0}")]
    InvalidConfig(String),
}
