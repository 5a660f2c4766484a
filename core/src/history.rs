//! Cursor-based backward pagination: fetch pages of older messages using
//! the oldest known message id as an exclusive upper bound.

use serde::Deserialize;

use crate::backend_info::BackendInfo;
use crate::error::PilotErr;
use crate::error::Result;
use testpilot_protocol::Message;

/// Wire shape of `GET {base}/{conversation}/messages?limit=N&before=<id>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

/// Advanced only after a successful fetch; a failed fetch retries with
/// the same cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    pub oldest_message_id: Option<String>,
    pub has_more: bool,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            oldest_message_id: None,
            has_more: true,
        }
    }
}

/// Backward loader for one conversation. `load_more` takes `&mut self`,
/// so at most one fetch can be in flight per paginator; exhaustion
/// (`has_more == false`) turns it into a no-op.
pub struct MessagePaginator {
    client: reqwest::Client,
    backend: BackendInfo,
    conversation_id: String,
    cursor: PaginationCursor,
}

impl MessagePaginator {
    pub fn new(backend: BackendInfo, conversation_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend,
            conversation_id,
            cursor: PaginationCursor::default(),
        }
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    /// Fetch the next older page, in chronological order, ready to be
    /// prepended through the store. Returns an empty page once history is
    /// exhausted. A failed or cancelled fetch leaves the cursor untouched
    /// and keeps `has_more` set, so the caller may simply retry.
    pub async fn load_more(&mut self) -> Result<Vec<Message>> {
        if !self.cursor.has_more {
            return Ok(Vec::new());
        }

        let page = self.fetch_page().await?;

        if let Some(first) = page.messages.first() {
            self.cursor.oldest_message_id = Some(first.id.clone());
        }
        self.cursor.has_more = page
            .has_more
            // No explicit flag: a full page implies more may exist.
            .unwrap_or(page.messages.len() == self.backend.page_size());
        Ok(page.messages)
    }

    async fn fetch_page(&self) -> Result<HistoryPage> {
        let base = self.backend.base_url()?;
        let url = format!("{base}/{}/messages", self.conversation_id);
        let limit = self.backend.page_size().to_string();
        let mut builder = self.client.get(url).query(&[("limit", limit.as_str())]);
        if let Some(before) = self.cursor.oldest_message_id.as_deref() {
            builder = builder.query(&[("before", before)]);
        }
        builder = self.backend.apply_headers(builder);

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PilotErr::UnexpectedStatus { status, body });
        }
        Ok(resp.json::<HistoryPage>().await?)
    }
}

/// Alternative strategies for deciding when to pull the next page; both
/// funnel into the same `load_more`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadTrigger {
    /// Fire when the scroll position comes within `threshold` px of the
    /// top of the scrollable region.
    TopOffset { threshold: f64 },
    /// Fire while a sentinel element above the list reports visible.
    Sentinel,
}

impl Default for LoadTrigger {
    fn default() -> Self {
        Self::TopOffset { threshold: 200.0 }
    }
}

impl LoadTrigger {
    pub fn should_load(&self, scroll_top: f64, sentinel_visible: bool) -> bool {
        match self {
            Self::TopOffset { threshold } => scroll_top <= *threshold,
            Self::Sentinel => sentinel_visible,
        }
    }
}
