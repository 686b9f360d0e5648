//! Stream events: what subscribers see on the wire.
//!
//! Wire shape: `{"type", "task_id", "timestamp", "sequence", "data"}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProgressUpdate,
    StageComplete,
    ErrorOccurred,
    AnalysisComplete,
    CostUpdate,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    /// Global, strictly increasing across all tasks.
    #[serde(rename = "sequence")]
    pub sequence_number: u64,
    pub data: serde_json::Value,
}

impl StreamEvent {
    pub const KEEPALIVE: &'static str = "keepalive";

    /// Synthetic INFO sent to an idle subscriber. Never buffered.
    pub fn keepalive(task_id: TaskId, sequence_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: EventType::Info,
            task_id,
            timestamp,
            sequence_number,
            data: json!({ "message": Self::KEEPALIVE }),
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.event_type == EventType::Info
            && self.data.get("message").and_then(|m| m.as_str()) == Some(Self::KEEPALIVE)
    }
}
