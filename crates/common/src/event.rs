//! Progress events published during a coordinated session.

use serde::{Deserialize, Serialize};

use crate::now_millis;

/// What kind of progress a session event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    /// The session state machine committed a transition.
    StateChange,
    /// An agent reported a result that was recorded on the session.
    FindingRecorded,
    /// An agent or coordination step failed.
    Error,
}

/// A transient progress event.
///
/// Events are published after their causing transition is committed and
/// are never persisted beyond an optional short replay buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Session this event belongs to
    pub session_id: String,

    /// Agent that caused the event, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Event kind
    pub event_type: ProgressEventType,

    /// Free-form payload (state names, finding summaries, error text)
    pub payload: serde_json::Value,

    /// Publish timestamp (Unix millis)
    pub timestamp: u64,
}

impl ProgressEvent {
    pub fn state_change(
        session_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: None,
            event_type: ProgressEventType::StateChange,
            payload: serde_json::json!({ "from": from.into(), "to": to.into() }),
            timestamp: now_millis(),
        }
    }

    pub fn finding_recorded(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: Some(agent_id.into()),
            event_type: ProgressEventType::FindingRecorded,
            payload: serde_json::json!({ "summary": summary.into() }),
            timestamp: now_millis(),
        }
    }

    pub fn error(
        session_id: impl Into<String>,
        agent_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id,
            event_type: ProgressEventType::Error,
            payload: serde_json::json!({ "message": message.into() }),
            timestamp: now_millis(),
        }
    }
}
