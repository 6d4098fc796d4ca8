pub mod activity;
pub mod data_ref;
pub mod index;

pub use activity::{
    Activity, ActivityCallback, ActivityEvent, ActivityReceiver, FailureKind, PortSpec,
};
pub use data_ref::{DataRef, InvocationContext, ReferenceService};
pub use index::IndexArray;
