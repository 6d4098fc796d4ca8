//! In-process [`ReferenceService`] backed by a concurrent map.

use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;

use tokenweave_types::{DataRef, InvocationContext, ReferenceService};

#[derive(Debug, Clone)]
enum StoredData {
    Value(Value),
    Error {
        message: String,
        causes: Vec<String>,
    },
}

#[derive(Debug, Default)]
pub struct InMemoryReferenceService {
    entries: DashMap<String, StoredData>,
}

impl InMemoryReferenceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a shared service into a fresh invocation context.
    pub fn context(self: &Arc<Self>) -> InvocationContext {
        InvocationContext::new(self.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Message of a registered error placeholder.
    pub fn error_message(&self, reference: &DataRef) -> Option<String> {
        match self.entries.get(reference.id())?.value() {
            StoredData::Error { message, .. } => Some(message.clone()),
            StoredData::Value(_) => None,
        }
    }

    fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl ReferenceService for InMemoryReferenceService {
    fn register(&self, value: Value, depth: usize) -> DataRef {
        let id = Self::next_id();
        self.entries.insert(id.clone(), StoredData::Value(value));
        DataRef::new(id, depth)
    }

    fn register_error(&self, depth: usize, message: &str, causes: &[DataRef]) -> DataRef {
        let id = Self::next_id();
        self.entries.insert(
            id.clone(),
            StoredData::Error {
                message: message.to_string(),
                causes: causes.iter().map(|c| c.id().to_string()).collect(),
            },
        );
        DataRef::error(id, depth)
    }

    fn resolve(&self, reference: &DataRef) -> Option<Value> {
        match self.entries.get(reference.id())?.value() {
            StoredData::Value(value) => Some(value.clone()),
            StoredData::Error { message, causes } => Some(json!({
                "error": message,
                "causes": causes,
            })),
        }
    }
}
