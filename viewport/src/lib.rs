//! Windowed rendering support for long conversations: content-based
//! height estimation and a prefix-sum virtualizer that keeps scroll
//! positions stable across streaming appends and history prepends.

mod estimate;
mod virtualizer;

pub use estimate::estimate_height;
pub use virtualizer::MessageVirtualizer;
pub use virtualizer::VirtualWindow;
