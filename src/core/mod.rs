//! Core types shared by the server and client halves.

mod event;
pub mod properties;
mod service;
mod topic;

pub use event::{ChangeEvent, ChangeListener, Notification, WatchedNamespace};
pub use service::ServiceInstance;
pub use topic::{
    DEFAULT_CLUSTER, DEFAULT_NAMESPACE, INITIAL_SEQUENCE, NO_TENANT_PLACEHOLDER, TOPIC_SEPARATOR,
    Topic,
};
