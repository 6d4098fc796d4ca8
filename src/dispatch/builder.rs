//! Assembles dispatch stacks from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokenweave_types::Activity;

use crate::core::events::DispatchOutput;
use crate::error::{DispatchError, DispatchResult};

use super::config::{validate_stack_config, DispatchStackConfig, LayerConfig};
use super::error_bounce::ErrorBounce;
use super::invoke::Invoke;
use super::layer::{DispatchLayer, ProcessorSpec};
use super::loop_layer::Loop;
use super::parallelize::Parallelize;
use super::retry::Retry;
use super::stack::DispatchStack;

/// Activities addressable by name from configuration, e.g. loop conditions.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `activity` under its own name.
    pub fn register(&mut self, activity: Arc<dyn Activity>) {
        self.activities.insert(activity.name().to_string(), activity);
    }

    pub fn register_as(&mut self, name: impl Into<String>, activity: Arc<dyn Activity>) {
        self.activities.insert(name.into(), activity);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

pub struct DispatchStackBuilder {
    processor: ProcessorSpec,
    config: DispatchStackConfig,
    activities: Vec<Arc<dyn Activity>>,
    registry: ActivityRegistry,
}

impl DispatchStackBuilder {
    pub fn new(processor: ProcessorSpec) -> Self {
        Self {
            processor,
            config: DispatchStackConfig::default(),
            activities: Vec::new(),
            registry: ActivityRegistry::new(),
        }
    }

    /// Builder for a processor wrapping `activity` with its output ports.
    pub fn for_activity(activity: Arc<dyn Activity>) -> Self {
        Self::new(ProcessorSpec::for_activity(activity.as_ref())).activity(activity)
    }

    pub fn config(mut self, config: DispatchStackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn layers(mut self, layers: Vec<LayerConfig>) -> Self {
        self.config.layers = layers;
        self
    }

    /// Adds an activity the invoke layer may run.
    pub fn activity(mut self, activity: Arc<dyn Activity>) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn registry(mut self, registry: ActivityRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn layer(&self, config: &LayerConfig) -> DispatchResult<Arc<dyn DispatchLayer>> {
        let grace_period = self.config.grace_period();
        let layer: Arc<dyn DispatchLayer> = match config {
            LayerConfig::Parallelize(parallelize) => {
                Arc::new(Parallelize::new(parallelize.clone(), grace_period))
            }
            LayerConfig::ErrorBounce => Arc::new(ErrorBounce::new(grace_period)),
            LayerConfig::Loop(looping) => {
                let condition = match &looping.condition {
                    Some(name) => Some(self.registry.get(name).ok_or_else(|| {
                        DispatchError::Configuration(format!(
                            "unknown loop condition activity '{}'",
                            name
                        ))
                    })?),
                    None => None,
                };
                Arc::new(Loop::new(looping.clone(), condition, grace_period))
            }
            LayerConfig::Retry(retry) => Arc::new(Retry::new(retry.clone(), grace_period)),
            LayerConfig::Invoke => Arc::new(Invoke::new()),
        };
        Ok(layer)
    }

    pub fn build(self) -> DispatchResult<(DispatchStack, mpsc::UnboundedReceiver<DispatchOutput>)> {
        validate_stack_config(&self.config)?;
        let layers = self
            .config
            .layers
            .iter()
            .map(|config| self.layer(config))
            .collect::<DispatchResult<Vec<_>>>()?;
        tracing::debug!(
            processor = %self.processor.name,
            layers = ?self.config.layers.iter().map(LayerConfig::name).collect::<Vec<_>>(),
            "built dispatch stack"
        );
        Ok(DispatchStack::new(
            self.processor,
            layers,
            self.activities,
            self.config.grace_period(),
        ))
    }
}
