//! Run tracking and event streaming

pub mod broker;
pub mod registry;

pub use broker::EventBroker;
pub use registry::{Run, RunRegistry, RunStatus};
