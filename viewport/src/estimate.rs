//! Pre-measurement height heuristics. Estimates only have to be good
//! enough to keep offsets ordered until a real measurement replaces
//! them, so they are deliberately coarse and strictly monotonic in
//! content size.

use testpilot_protocol::Message;
use testpilot_protocol::MessagePart;

/// Avatar, padding and role header of every message row.
const BASE_HEIGHT: f64 = 64.0;
/// One wrapped text line.
const LINE_HEIGHT: f64 = 24.0;
/// Assumed wrap width in characters.
const CHARS_PER_LINE: usize = 80;
/// Flat allowance for a fenced code block pair.
const CODE_FENCE_HEIGHT: f64 = 120.0;
/// Collapsed tool invocation card.
const TOOL_CARD_HEIGHT: f64 = 96.0;

/// Estimate the rendered height of a message in pixels.
///
/// Monotonic: growing any part's content never lowers the estimate, so
/// prefix-sum offsets stay ordered while a message is still streaming.
pub fn estimate_height(message: &Message) -> f64 {
    let mut height = BASE_HEIGHT;
    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                let chars = text.chars().count();
                let lines = chars.div_ceil(CHARS_PER_LINE).max(1);
                height += lines as f64 * LINE_HEIGHT;
                height += code_fence_pairs(text) as f64 * CODE_FENCE_HEIGHT;
            }
            MessagePart::ToolInvocation { .. } => height += TOOL_CARD_HEIGHT,
        }
    }
    height
}

fn code_fence_pairs(text: &str) -> usize {
    text.matches("```").count() / 2
}
