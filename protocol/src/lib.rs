//! Wire-level data model shared by the streaming client, the state store
//! and the viewport: the multiplexed stream event taxonomy, chat messages
//! with their ordered parts, and tool invocation lifecycle state.

mod event;
mod message;

pub use event::AgentOutcome;
pub use event::Phase;
pub use event::StreamEvent;
pub use message::Message;
pub use message::MessagePart;
pub use message::Role;
pub use message::ToolInvocation;
pub use message::ToolState;
