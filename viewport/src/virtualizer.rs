use std::collections::HashMap;

use tracing::debug;

use crate::estimate::estimate_height;
use testpilot_protocol::Message;

const DEFAULT_OVERSCAN: usize = 5;
/// How close to the bottom the user must be for new content to keep
/// them pinned there.
const BOTTOM_THRESHOLD: f64 = 100.0;

/// One row to mount: derived from the height table on every query,
/// never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualWindow {
    pub index: usize,
    pub offset: f64,
    pub size: f64,
}

/// Maps a message list plus a scroll position to the subset of rows
/// worth mounting. Offsets come from a prefix-sum table over estimated
/// heights; measured heights override estimates as rows get laid out.
/// Scroll cost is a binary search, independent of conversation length.
pub struct MessageVirtualizer {
    ids: Vec<String>,
    heights: Vec<f64>,
    /// `prefix[i]` is the offset of row `i`; `prefix[len]` is the total.
    prefix: Vec<f64>,
    measured: HashMap<String, f64>,
    overscan: usize,
    bottom_threshold: f64,
    viewport_height: f64,
    scroll_top: f64,
}

impl Default for MessageVirtualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageVirtualizer {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            heights: Vec::new(),
            prefix: vec![0.0],
            measured: HashMap::new(),
            overscan: DEFAULT_OVERSCAN,
            bottom_threshold: BOTTOM_THRESHOLD,
            viewport_height: 0.0,
            scroll_top: 0.0,
        }
    }

    pub fn set_overscan(&mut self, overscan: usize) {
        self.overscan = overscan;
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport_height = height.max(0.0);
        self.clamp_scroll();
    }

    pub fn set_scroll_top(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top;
        self.clamp_scroll();
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    /// Rebuild the height table from the current message list.
    ///
    /// Mutations are classified by id comparison: rows inserted before
    /// the previous first id are a history prepend, and `scroll_top`
    /// shifts by the inserted height so the anchored message stays put.
    /// Growth without a prepend auto-scrolls only when the user was
    /// already within the bottom threshold; a reader who scrolled up is
    /// never yanked away.
    pub fn sync(&mut self, messages: &[Message]) {
        let was_near_bottom = self.is_near_bottom();
        let old_first = self.ids.first().cloned();
        let old_total = self.total_height();

        self.ids = messages.iter().map(|m| m.id.clone()).collect();
        self.heights = messages
            .iter()
            .map(|m| {
                self.measured
                    .get(&m.id)
                    .copied()
                    .unwrap_or_else(|| estimate_height(m))
            })
            .collect();
        self.rebuild_prefix();

        let prepended = old_first
            .and_then(|first| self.ids.iter().position(|id| *id == first))
            .unwrap_or(0);
        if prepended > 0 {
            let inserted: f64 = self.heights[..prepended].iter().sum();
            self.scroll_top += inserted;
            self.clamp_scroll();
        } else if was_near_bottom && self.total_height() > old_total {
            self.scroll_top = self.max_scroll();
        } else {
            self.clamp_scroll();
        }
    }

    /// Replace a row's estimate with its real layout height. Offsets of
    /// every later row shift accordingly; the overscan buffer is what
    /// keeps that shift out of the visible area.
    pub fn record_measured(&mut self, id: &str, height: f64) {
        self.measured.insert(id.to_string(), height);
        if let Some(i) = self.ids.iter().position(|row| row == id)
            && self.heights[i] != height
        {
            self.heights[i] = height;
            self.rebuild_prefix();
            self.clamp_scroll();
        }
    }

    /// Rows overlapping the viewport, padded by `overscan` on each side.
    pub fn window(&self) -> Vec<VirtualWindow> {
        let n = self.ids.len();
        if n == 0 || self.viewport_height <= 0.0 {
            return Vec::new();
        }
        // Row i spans [prefix[i], prefix[i + 1]).
        let first = self.prefix[1..].partition_point(|&end| end <= self.scroll_top);
        let view_bottom = self.scroll_top + self.viewport_height;
        let last = self.prefix[..n].partition_point(|&start| start < view_bottom);

        let start = first.saturating_sub(self.overscan);
        let end = (last + self.overscan).min(n);
        (start..end)
            .map(|index| VirtualWindow {
                index,
                offset: self.prefix[index],
                size: self.heights[index],
            })
            .collect()
    }

    pub fn total_height(&self) -> f64 {
        *self.prefix.last().unwrap_or(&0.0)
    }

    pub fn max_scroll(&self) -> f64 {
        (self.total_height() - self.viewport_height).max(0.0)
    }

    pub fn is_near_bottom(&self) -> bool {
        self.scroll_top >= self.max_scroll() - self.bottom_threshold
    }

    pub fn offset_of(&self, id: &str) -> Option<f64> {
        let i = self.ids.iter().position(|row| row == id)?;
        Some(self.prefix[i])
    }

    /// Id of the first row intersecting the viewport top; the natural
    /// anchor to preserve across mutations.
    pub fn top_visible_message(&self) -> Option<&str> {
        if self.ids.is_empty() {
            return None;
        }
        let i = self.prefix[1..].partition_point(|&end| end <= self.scroll_top);
        self.ids.get(i).map(String::as_str)
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.max_scroll();
    }

    pub fn scroll_to_index(&mut self, index: usize) {
        if index < self.ids.len() {
            self.scroll_top = self.prefix[index].min(self.max_scroll());
        }
    }

    pub fn scroll_to_message(&mut self, id: &str) -> bool {
        match self.ids.iter().position(|row| row == id) {
            Some(i) => {
                self.scroll_to_index(i);
                true
            }
            None => {
                debug!(id, "scroll target not in the message list");
                false
            }
        }
    }

    fn rebuild_prefix(&mut self) {
        self.prefix.clear();
        self.prefix.push(0.0);
        let mut acc = 0.0;
        for h in &self.heights {
            acc += h;
            self.prefix.push(acc);
        }
    }

    fn clamp_scroll(&mut self) {
        self.scroll_top = self.scroll_top.clamp(0.0, self.max_scroll());
    }
}
