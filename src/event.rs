//! Raw activity events.
//!
//! Events are immutable point-in-time facts appended to a per-task log.
//! They are ordered by position; ties keep insertion order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Note,
    Subtask,
    EditorActivity,
    IdleActivity,
    ExternalActivity,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Note => "NOTE",
            EventType::Subtask => "SUBTASK",
            EventType::EditorActivity => "EDITOR_ACTIVITY",
            EventType::IdleActivity => "IDLE_ACTIVITY",
            EventType::ExternalActivity => "EXTERNAL_ACTIVITY",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub position: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<bool>,
}

impl Event {
    pub fn new(event_type: EventType, task_id: TaskId, position: DateTime<Utc>) -> Self {
        Self {
            event_id: Ulid::new().to_string(),
            task_id,
            event_type,
            position,
            comment: None,
            duration_seconds: None,
            file_path: None,
            modified: None,
            auto: None,
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }
}

/// Stable chronological order; equal positions keep their original order.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by_key(|event| event.position);
}
