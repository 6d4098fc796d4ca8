pub mod events;
pub mod monitor;
pub mod process_map;
pub mod reference;
pub mod tree_cache;

pub use events::{
    Completion, DispatchOutput, ErrorEvent, IterationEvent, Job, JobQueueEvent, JobQueueHandle,
    ResultEvent,
};
pub use monitor::MonitorProperty;
pub use process_map::{ProcessStateMap, DEFAULT_GRACE_PERIOD};
pub use reference::InMemoryReferenceService;
pub use tree_cache::TreeCache;
