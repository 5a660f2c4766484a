//! Reducer-style chat state: the message store, tool invocation table,
//! agent lifecycle tracker and the background maintenance timer.

pub mod agents;
pub mod maintenance;
pub mod store;

pub use agents::ActiveAgent;
pub use agents::AgentActivityTracker;
pub use agents::AgentStatus;
pub use maintenance::MaintenanceTask;
pub use store::Action;
pub use store::ChatState;
pub use store::ChatStateStore;
pub use store::ScreenshotRecord;
