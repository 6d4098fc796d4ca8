//! Monitoring properties exposed by stateful dispatch layers.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const PARALLELIZE_QUEUE_SIZE: &str = "dispatch:parallelize:queuesize";
pub const PARALLELIZE_SENT_JOBS: &str = "dispatch:parallelize:sentjobs";
pub const PARALLELIZE_COMPLETED_JOBS: &str = "dispatch:parallelize:completedjobs";
pub const ERROR_BOUNCE_REFLECTED: &str = "dispatch:errorbounce:reflected";
pub const ERROR_BOUNCE_TRANSLATED: &str = "dispatch:errorbounce:translated";
pub const LOOP_ACTIVE: &str = "dispatch:loop:active";

/// Named numeric property of one owning process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorProperty {
    pub name: String,
    pub value: i64,
    pub last_modified: DateTime<Utc>,
}

impl MonitorProperty {
    pub fn new(name: impl Into<String>, value: i64, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            last_modified,
        }
    }
}

/// Finds a property by name in a snapshot.
pub fn find_property<'a>(properties: &'a [MonitorProperty], name: &str) -> Option<&'a MonitorProperty> {
    properties.iter().find(|p| p.name == name)
}
