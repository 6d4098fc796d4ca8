//! Serializable configuration of dispatch stacks and their layers.
//!
//! A stack is described as an ordered list of layers, top first:
//!
//! ```yaml
//! grace_period_ms: 500
//! layers:
//!   - type: parallelize
//!     maximum_jobs: 4
//!   - type: error_bounce
//!   - type: retry
//!     max_retries: 2
//!     retry_interval: 100
//!     backoff_strategy: exponential
//!   - type: invoke
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DispatchError, DispatchResult};

/// Supported configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DispatchStackConfig {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerConfig>,
}

impl DispatchStackConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for DispatchStackConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            layers: default_layers(),
        }
    }
}

fn default_grace_period_ms() -> u64 {
    1000
}

fn default_layers() -> Vec<LayerConfig> {
    vec![
        LayerConfig::Parallelize(ParallelizeConfig::default()),
        LayerConfig::ErrorBounce,
        LayerConfig::Invoke,
    ]
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Parallelize(ParallelizeConfig),
    ErrorBounce,
    Loop(LoopConfig),
    Retry(RetryConfig),
    Invoke,
}

impl LayerConfig {
    pub fn name(&self) -> &'static str {
        match self {
            LayerConfig::Parallelize(_) => "parallelize",
            LayerConfig::ErrorBounce => "error_bounce",
            LayerConfig::Loop(_) => "loop",
            LayerConfig::Retry(_) => "retry",
            LayerConfig::Invoke => "invoke",
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ParallelizeConfig {
    /// Upper bound on jobs in flight per owning process.
    #[serde(default = "default_maximum_jobs")]
    pub maximum_jobs: usize,
}

impl Default for ParallelizeConfig {
    fn default() -> Self {
        Self {
            maximum_jobs: default_maximum_jobs(),
        }
    }
}

fn default_maximum_jobs() -> usize {
    1
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Registry name of the condition activity.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_run_first")]
    pub run_first: bool,
    /// Resubmissions allowed per index before the loop fails.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            condition: None,
            run_first: default_run_first(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_run_first() -> bool {
    true
}

fn default_max_iterations() -> usize {
    100
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    /// Base delay in milliseconds.
    #[serde(default)]
    pub retry_interval: u64,
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: u64,
    #[serde(default = "default_retry_on_retryable_only")]
    pub retry_on_retryable_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval: 0,
            backoff_strategy: default_backoff_strategy(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_interval: default_max_retry_interval(),
            retry_on_retryable_only: default_retry_on_retryable_only(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

fn default_backoff_strategy() -> BackoffStrategy {
    BackoffStrategy::Fixed
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retry_interval() -> u64 {
    60000
}

fn default_retry_on_retryable_only() -> bool {
    true
}

/// Parse stack configuration text.
pub fn parse_stack_config(content: &str, format: ConfigFormat) -> DispatchResult<DispatchStackConfig> {
    let config: DispatchStackConfig = match format {
        ConfigFormat::Yaml => serde_saphyr::from_str(content)
            .map_err(|e| DispatchError::InvalidConfig(e.to_string()))?,
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| DispatchError::InvalidConfig(e.to_string()))?,
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| DispatchError::InvalidConfig(e.to_string()))?
        }
    };
    validate_stack_config(&config)?;
    Ok(config)
}

/// Structural checks shared by parsed and hand-built configurations.
///
/// Iteration output reaches a stack as per-process job queues, and only
/// `parallelize` consumes queues. Every other layer handles individual jobs,
/// so the top layer must be `parallelize`.
pub fn validate_stack_config(config: &DispatchStackConfig) -> DispatchResult<()> {
    let Some(top) = config.layers.first() else {
        return Err(DispatchError::InvalidConfig(
            "a dispatch stack needs at least one layer".to_string(),
        ));
    };
    if !matches!(top, LayerConfig::Parallelize(_)) {
        return Err(DispatchError::InvalidConfig(format!(
            "layer '{}' handles individual jobs and must sit below a parallelize layer",
            top.name()
        )));
    }
    let last = config.layers.len() - 1;
    for (position, layer) in config.layers.iter().enumerate() {
        match layer {
            LayerConfig::Invoke if position != last => {
                return Err(DispatchError::InvalidConfig(
                    "invoke must be the bottom layer".to_string(),
                ));
            }
            LayerConfig::Parallelize(parallelize) if parallelize.maximum_jobs == 0 => {
                return Err(DispatchError::InvalidConfig(
                    "parallelize maximum_jobs must be at least 1".to_string(),
                ));
            }
            LayerConfig::Retry(retry) if retry.backoff_multiplier < 1.0 => {
                return Err(DispatchError::InvalidConfig(format!(
                    "retry backoff_multiplier must be at least 1, got {}",
                    retry.backoff_multiplier
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
