//! Deployment event stream payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event pushed to a deployment subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Init(InitEvent),
    Step(StepEvent),
    Status(StatusEvent),
    Log(LogEvent),
}

impl StreamEvent {
    /// Event name used on the wire (`event:` field of the SSE frame)
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Init(_) => "init",
            StreamEvent::Step(_) => "step",
            StreamEvent::Status(_) => "status",
            StreamEvent::Log(_) => "log",
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Status(status) => is_terminal_status(&status.status),
            _ => false,
        }
    }
}

/// Deployment statuses after which no further events are produced
pub fn is_terminal_status(status: &str) -> bool {
    matches!(status, "COMPLETED" | "FAILED" | "ROLLED_BACK")
}

/// Snapshot sent once when a subscriber connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEvent {
    pub deployment_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub steps: Vec<StepSnapshot>,
    pub timestamp: DateTime<Utc>,
}

/// A historic step as replayed in the init event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub step_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub step_name: String,
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
