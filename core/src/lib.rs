//! Streaming/state-synchronization core for the testpilot chat client.
//!
//! The pipeline is `StreamSession` → SSE frame decoding + event parsing →
//! `ChatStateStore` (with the agent lifecycle tracker), plus cursor-based
//! backward pagination into the same message list. Rendering is a
//! read-only consumer of the store's snapshots and is not part of this
//! crate.

pub mod backend_info;
pub mod client;
pub mod error;
pub mod history;
pub mod state;
mod util;

pub use backend_info::BackendInfo;
pub use client::EventStream;
pub use client::StreamSession;
pub use error::PilotErr;
pub use error::Result;
pub use history::LoadTrigger;
pub use history::MessagePaginator;
pub use history::PaginationCursor;
pub use state::ChatStateStore;
