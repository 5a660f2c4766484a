use std::time::Instant;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use crate::state::agents::AgentActivityTracker;
use testpilot_protocol::Message;
use testpilot_protocol::MessagePart;
use testpilot_protocol::Phase;
use testpilot_protocol::Role;
use testpilot_protocol::StreamEvent;
use testpilot_protocol::ToolInvocation;
use testpilot_protocol::ToolState;

/// A screenshot pushed by the backend while a turn streams, keyed to the
/// message it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotRecord {
    pub message_id: String,
    pub url: String,
    pub caption: Option<String>,
}

/// In-flight assistant content, in arrival order. Tool drafts reference
/// the invocation table by id and are materialized at finalization.
#[derive(Debug, Clone)]
enum DraftPart {
    Text(String),
    Tool(String),
}

/// The single source of truth read by the view layer. Mutated only by
/// [`ChatStateStore`]; consumers read snapshots.
#[derive(Default)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub streaming_message_id: Option<String>,
    pub tools: IndexMap<String, ToolInvocation>,
    pub phase: Phase,
    pub phase_progress: u8,
    pub last_error: Option<String>,
    pub screenshots: Vec<ScreenshotRecord>,
    draft: Vec<DraftPart>,
}

impl ChatState {
    /// Concatenation of the in-flight message's text, in delivery order.
    pub fn partial_content(&self) -> String {
        let mut out = String::new();
        for part in &self.draft {
            if let DraftPart::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_message_id.is_some() || !self.draft.is_empty()
    }
}

/// User-initiated mutations. Live-stream events and these actions funnel
/// through the same reducer, so a prepended history page can never race a
/// streamed append.
#[derive(Debug)]
pub enum Action {
    SendUserMessage { id: Option<String>, text: String },
    /// User pressed stop: the turn ends with whatever content arrived.
    StopStreaming,
    /// The session's event channel closed normally.
    StreamEnded,
    /// The session surfaced a transport error.
    StreamFailed { message: String },
    /// Older history fetched by the paginator, already in chronological
    /// order.
    PrependHistory { messages: Vec<Message> },
    ClearConversation,
}

type MessagesCallback = Box<dyn FnMut(&[Message]) + Send>;

/// Reducer-style state container. Every [`StreamEvent`] maps to exactly
/// one transition, applied synchronously and in full before the next —
/// observers never see a half-applied state.
#[derive(Default)]
pub struct ChatStateStore {
    state: ChatState,
    agents: AgentActivityTracker,
    on_messages_change: Option<MessagesCallback>,
}

impl ChatStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the persistence callback, invoked whenever a message
    /// finalizes. Delivery is at-least-once; the collaborator must
    /// deduplicate by message id.
    pub fn set_on_messages_change(&mut self, callback: MessagesCallback) {
        self.on_messages_change = Some(callback);
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn agents(&self) -> &AgentActivityTracker {
        &self.agents
    }

    pub fn apply_event(&mut self, event: StreamEvent, now: Instant) {
        match event {
            StreamEvent::TextDelta { message_id, delta } => {
                if self.state.streaming_message_id.is_none() {
                    self.state.streaming_message_id = Some(message_id);
                }
                match self.state.draft.last_mut() {
                    Some(DraftPart::Text(text)) => text.push_str(&delta),
                    _ => self.state.draft.push(DraftPart::Text(delta)),
                }
            }
            StreamEvent::ToolCall { id, tool_name, args } => {
                if self.state.tools.contains_key(&id) {
                    debug!(tool_call_id = %id, "duplicate tool_call dropped");
                    return;
                }
                self.state.tools.insert(
                    id.clone(),
                    ToolInvocation {
                        id: id.clone(),
                        tool_name,
                        args,
                        state: ToolState::Call,
                        result: None,
                    },
                );
                self.state.draft.push(DraftPart::Tool(id));
            }
            StreamEvent::ToolResult { id, result } => match self.state.tools.get_mut(&id) {
                Some(invocation) if invocation.state == ToolState::Call => {
                    invocation.state = ToolState::Result;
                    invocation.result = Some(result);
                }
                Some(_) => {
                    // First write wins.
                    debug!(tool_call_id = %id, "second tool_result dropped");
                }
                None => {
                    warn!(tool_call_id = %id, "orphaned tool_result dropped");
                }
            },
            StreamEvent::AgentStart {
                agent_id,
                agent_type,
                name,
                message,
            } => {
                self.agents
                    .handle_start(agent_id, agent_type, name, message, now);
                self.state.phase_progress = self.agents.overall_progress();
            }
            StreamEvent::AgentProgress {
                agent_id,
                progress,
                current_tool,
                message,
            } => {
                self.agents
                    .handle_progress(&agent_id, progress, current_tool, message);
                self.state.phase_progress = self.agents.overall_progress();
            }
            StreamEvent::AgentComplete {
                agent_id,
                status,
                confidence,
                message,
            } => {
                self.agents
                    .handle_complete(&agent_id, status, confidence, message, now);
                self.state.phase_progress = self.agents.overall_progress();
            }
            StreamEvent::PhaseTransition { from, to } => {
                self.state.phase = to;
                if to != from {
                    self.state.phase_progress = 0;
                }
                if to == Phase::Idle {
                    self.finalize_streaming();
                }
            }
            StreamEvent::Screenshot {
                message_id,
                url,
                caption,
            } => {
                self.state.screenshots.push(ScreenshotRecord {
                    message_id,
                    url,
                    caption,
                });
            }
            StreamEvent::Error { message } => {
                // Accumulated partial content survives the error.
                self.state.last_error = Some(message);
                self.finalize_streaming();
            }
        }
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SendUserMessage { id, text } => {
                let message = Message {
                    id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    role: Role::User,
                    parts: vec![MessagePart::Text { text }],
                    created_at: Utc::now(),
                };
                self.state.messages.push(message);
                self.state.last_error = None;
                self.notify_messages_changed();
            }
            Action::StopStreaming | Action::StreamEnded => {
                self.finalize_streaming();
            }
            Action::StreamFailed { message } => {
                self.state.last_error = Some(message);
                self.finalize_streaming();
            }
            Action::PrependHistory { messages } => {
                self.state.messages.splice(0..0, messages);
            }
            Action::ClearConversation => {
                self.state = ChatState::default();
                self.agents.clear();
            }
        }
    }

    /// Drive time-based agent maintenance (completed-agent removal and
    /// the staleness sweep).
    pub fn tick(&mut self, now: Instant) {
        self.agents.tick(now);
    }

    /// Close the in-flight assistant message: materialize ordered draft
    /// parts (tool drafts embed the invocation snapshot), append it to
    /// the list, and fire the persistence callback.
    fn finalize_streaming(&mut self) {
        if self.state.draft.is_empty() && self.state.streaming_message_id.is_none() {
            return;
        }
        let mut parts = Vec::with_capacity(self.state.draft.len());
        for draft in self.state.draft.drain(..) {
            match draft {
                DraftPart::Text(text) => parts.push(MessagePart::Text { text }),
                DraftPart::Tool(id) => match self.state.tools.get(&id) {
                    Some(invocation) => parts.push(MessagePart::ToolInvocation {
                        tool_invocation: invocation.clone(),
                    }),
                    None => debug!(tool_call_id = %id, "draft references missing invocation"),
                },
            }
        }
        let id = self
            .state
            .streaming_message_id
            .take()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if parts.is_empty() {
            return;
        }
        self.state.messages.push(Message {
            id,
            role: Role::Assistant,
            parts,
            created_at: Utc::now(),
        });
        self.notify_messages_changed();
    }

    fn notify_messages_changed(&mut self) {
        if let Some(callback) = self.on_messages_change.as_mut() {
            callback(&self.state.messages);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::agents::AgentStatus;
    use crate::state::agents::COMPLETE_LINGER;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn delta(message_id: &str, delta: &str) -> StreamEvent {
        StreamEvent::TextDelta {
            message_id: message_id.to_string(),
            delta: delta.to_string(),
        }
    }

    #[test]
    fn deltas_concatenate_in_delivery_order() {
        let mut store = ChatStateStore::new();
        let now = Instant::now();
        let mut expected = String::new();
        for i in 0..10_000 {
            let ch = char::from(b'a' + (i % 26) as u8);
            expected.push(ch);
            store.apply_event(delta("m1", &ch.to_string()), now);
        }
        assert_eq!(store.state().partial_content(), expected);
        assert_eq!(store.state().streaming_message_id.as_deref(), Some("m1"));

        store.apply_event(
            StreamEvent::PhaseTransition {
                from: Phase::Execution,
                to: Phase::Idle,
            },
            now,
        );
        let messages = &store.state().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].text(), expected);
        assert_eq!(store.state().partial_content(), "");
    }

    #[test]
    fn orphaned_tool_result_is_a_no_op_and_duplicates_keep_first_write() {
        let mut store = ChatStateStore::new();
        let now = Instant::now();

        store.apply_event(
            StreamEvent::ToolResult {
                id: "ghost".to_string(),
                result: json!({"passed": 0}),
            },
            now,
        );
        assert!(store.state().tools.is_empty());

        store.apply_event(
            StreamEvent::ToolCall {
                id: "t1".to_string(),
                tool_name: "run_test".to_string(),
                args: json!({"spec": "auth.spec.ts"}),
            },
            now,
        );
        store.apply_event(
            StreamEvent::ToolResult {
                id: "t1".to_string(),
                result: json!({"passed": 3}),
            },
            now,
        );
        store.apply_event(
            StreamEvent::ToolResult {
                id: "t1".to_string(),
                result: json!({"passed": 99}),
            },
            now,
        );
        let invocation = &store.state().tools["t1"];
        assert_eq!(invocation.state, ToolState::Result);
        assert_eq!(invocation.result, Some(json!({"passed": 3})));
    }

    #[test]
    fn finalized_message_interleaves_text_and_tool_parts() {
        let mut store = ChatStateStore::new();
        let now = Instant::now();
        store.apply_event(delta("m1", "running "), now);
        store.apply_event(
            StreamEvent::ToolCall {
                id: "t1".to_string(),
                tool_name: "run_test".to_string(),
                args: json!({}),
            },
            now,
        );
        store.apply_event(delta("m1", "done"), now);
        store.apply(Action::StopStreaming);

        let parts = &store.state().messages[0].parts;
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], MessagePart::Text { text } if text == "running "));
        assert!(matches!(&parts[1], MessagePart::ToolInvocation { .. }));
        assert!(matches!(&parts[2], MessagePart::Text { text } if text == "done"));
    }

    #[test]
    fn error_event_keeps_partial_content() {
        let mut store = ChatStateStore::new();
        let now = Instant::now();
        store.apply_event(delta("m1", "half a rep"), now);
        store.apply_event(
            StreamEvent::Error {
                message: "backend fell over".to_string(),
            },
            now,
        );
        assert_eq!(store.state().last_error.as_deref(), Some("backend fell over"));
        assert_eq!(store.state().messages[0].text(), "half a rep");
    }

    #[test]
    fn phase_transition_resets_progress_only_on_change() {
        let mut store = ChatStateStore::new();
        let now = Instant::now();
        store.apply_event(
            StreamEvent::AgentStart {
                agent_id: "a1".to_string(),
                agent_type: "runner".to_string(),
                name: None,
                message: None,
            },
            now,
        );
        store.apply_event(
            StreamEvent::AgentProgress {
                agent_id: "a1".to_string(),
                progress: 40.0,
                current_tool: None,
                message: None,
            },
            now,
        );
        assert_eq!(store.state().phase_progress, 40);

        store.apply_event(
            StreamEvent::PhaseTransition {
                from: Phase::Idle,
                to: Phase::Execution,
            },
            now,
        );
        assert_eq!(store.state().phase, Phase::Execution);
        assert_eq!(store.state().phase_progress, 0);
    }

    #[test]
    fn prepend_history_keeps_live_messages_after_it() {
        let mut store = ChatStateStore::new();
        store.apply(
            Action::SendUserMessage {
                id: Some("u1".to_string()),
                text: "run the suite".to_string(),
            },
        );
        let older = vec![
            Message {
                id: "h1".to_string(),
                role: Role::User,
                parts: vec![MessagePart::Text { text: "earlier".to_string() }],
                created_at: Utc::now(),
            },
            Message {
                id: "h2".to_string(),
                role: Role::Assistant,
                parts: vec![MessagePart::Text { text: "reply".to_string() }],
                created_at: Utc::now(),
            },
        ];
        store.apply(Action::PrependHistory { messages: older });
        let ids: Vec<&str> = store.state().messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "h2", "u1"]);
    }

    #[test]
    fn persistence_callback_fires_on_finalize() {
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let mut store = ChatStateStore::new();
        store.set_on_messages_change(Box::new(move |messages| {
            if let Ok(mut log) = seen_cb.lock() {
                log.push(messages.len());
            }
        }));
        let now = Instant::now();
        store.apply(
            Action::SendUserMessage {
                id: None,
                text: "hi".to_string(),
            },
        );
        store.apply_event(delta("m1", "hello"), now);
        store.apply(Action::StreamEnded);
        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
    }

    #[test]
    fn clear_conversation_resets_everything() {
        let mut store = ChatStateStore::new();
        let now = Instant::now();
        store.apply_event(delta("m1", "text"), now);
        store.apply_event(
            StreamEvent::AgentStart {
                agent_id: "a1".to_string(),
                agent_type: "runner".to_string(),
                name: None,
                message: None,
            },
            now,
        );
        store.apply(Action::ClearConversation);
        assert!(store.state().messages.is_empty());
        assert!(!store.state().is_streaming());
        assert_eq!(store.state().phase, Phase::Idle);
        assert_eq!(store.state().phase_progress, 0);
        assert!(store.agents().is_empty());
    }

    /// End-to-end reduction of the literal frame sequence from the
    /// protocol contract: phase in and out of execution around an agent
    /// run and three text deltas.
    #[test]
    fn full_turn_reduces_to_expected_final_state() {
        let mut store = ChatStateStore::new();
        let t0 = Instant::now();
        store.apply_event(
            StreamEvent::PhaseTransition { from: Phase::Idle, to: Phase::Execution },
            t0,
        );
        store.apply_event(
            StreamEvent::AgentStart {
                agent_id: "a1".to_string(),
                agent_type: "runner".to_string(),
                name: None,
                message: None,
            },
            t0,
        );
        for d in ["He", "llo ", "world"] {
            store.apply_event(delta("m1", d), t0);
        }
        store.apply_event(
            StreamEvent::AgentComplete {
                agent_id: "a1".to_string(),
                status: testpilot_protocol::AgentOutcome::Complete,
                confidence: None,
                message: None,
            },
            t0,
        );
        assert_eq!(
            store.agents().get("a1").map(|a| a.status),
            Some(AgentStatus::Complete)
        );
        store.apply_event(
            StreamEvent::PhaseTransition { from: Phase::Execution, to: Phase::Idle },
            t0,
        );

        assert_eq!(store.state().phase, Phase::Idle);
        assert_eq!(store.state().messages.len(), 1);
        assert_eq!(store.state().messages[0].text(), "Hello world");
        assert_eq!(store.state().messages[0].role, Role::Assistant);

        store.tick(t0 + COMPLETE_LINGER + Duration::from_millis(1));
        assert!(store.agents().get("a1").is_none());
    }
}
