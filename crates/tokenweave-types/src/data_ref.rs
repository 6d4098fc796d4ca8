use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque handle to a value or collection held by a [`ReferenceService`].
///
/// The engine never looks inside the referenced payload. It only reads the
/// collection depth and whether the reference stands for an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataRef {
    id: String,
    depth: usize,
    #[serde(default)]
    contains_errors: bool,
}

impl DataRef {
    pub fn new(id: impl Into<String>, depth: usize) -> Self {
        Self {
            id: id.into(),
            depth,
            contains_errors: false,
        }
    }

    pub fn error(id: impl Into<String>, depth: usize) -> Self {
        Self {
            id: id.into(),
            depth,
            contains_errors: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn contains_errors(&self) -> bool {
        self.contains_errors
    }
}

impl fmt::Display for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.depth)?;
        if self.contains_errors {
            write!(f, "!")?;
        }
        Ok(())
    }
}

/// Registers and resolves data on behalf of activities and dispatch layers.
pub trait ReferenceService: Send + Sync {
    /// Stores a value and returns a new reference to it.
    fn register(&self, value: Value, depth: usize) -> DataRef;

    /// Stores an error placeholder derived from `causes` and returns its reference.
    fn register_error(&self, depth: usize, message: &str, causes: &[DataRef]) -> DataRef;

    /// Looks up the value behind a reference.
    fn resolve(&self, reference: &DataRef) -> Option<Value>;
}

/// Opaque per-invocation context threaded through jobs and results.
#[derive(Clone)]
pub struct InvocationContext {
    reference_service: Arc<dyn ReferenceService>,
    properties: Arc<HashMap<String, Value>>,
}

impl InvocationContext {
    pub fn new(reference_service: Arc<dyn ReferenceService>) -> Self {
        Self {
            reference_service,
            properties: Arc::new(HashMap::new()),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        Arc::make_mut(&mut self.properties).insert(key.into(), value);
        self
    }

    pub fn reference_service(&self) -> &Arc<dyn ReferenceService> {
        &self.reference_service
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}
