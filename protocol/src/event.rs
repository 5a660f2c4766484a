use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// One parsed event from the backend's multiplexed stream.
///
/// The `type` tag comes either from the SSE `event:` field or from a
/// `type` field inside the JSON payload; the parser in `testpilot-core`
/// normalizes both forms before deserializing. Every variant except
/// `PhaseTransition` and `Error` carries the identifier used as its
/// reduction key — the parser never fabricates one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta { message_id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    AgentStart {
        agent_id: String,
        agent_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AgentProgress {
        agent_id: String,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_tool: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AgentComplete {
        agent_id: String,
        status: AgentOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    PhaseTransition { from: Phase, to: Phase },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        id: String,
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
    ToolResult { id: String, result: Value },
    #[serde(rename_all = "camelCase")]
    Screenshot {
        message_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Error { message: String },
}

impl StreamEvent {
    /// The reduction key, when the variant carries one.
    pub fn reduction_key(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta { message_id, .. }
            | StreamEvent::Screenshot { message_id, .. } => Some(message_id),
            StreamEvent::AgentStart { agent_id, .. }
            | StreamEvent::AgentProgress { agent_id, .. }
            | StreamEvent::AgentComplete { agent_id, .. } => Some(agent_id),
            StreamEvent::ToolCall { id, .. } | StreamEvent::ToolResult { id, .. } => Some(id),
            StreamEvent::PhaseTransition { .. } | StreamEvent::Error { .. } => None,
        }
    }
}

/// Terminal status reported by `agent_complete`. Anything the backend
/// sends other than `"complete"` is treated as an error outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Complete,
    #[serde(other)]
    Error,
}

/// Coarse-grained stage of the autonomous testing workflow.
///
/// Unrecognized phase names deserialize to `Idle` so a newer backend
/// cannot wedge an older client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    Planning,
    Execution,
    Healing,
    Reporting,
    // `other` must sit on the last variant for the derive to accept it.
    #[default]
    #[serde(other)]
    Idle,
}
