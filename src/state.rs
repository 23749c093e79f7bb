//! IdeaFlow states and scopes.
//!
//! A task runs several independent state tracks ([`Scope`]). Each track holds
//! at most one open [`PartialState`]; closing it archives an immutable
//! [`IdeaFlowState`]. Nested states live on `Scope::Nested(depth)` slots and
//! form a single LIFO stack per task ([`NestingStack`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::TaskId;

/// Flow-state type of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    Progress,
    Conflict,
    Learning,
    Rework,
}

impl StateType {
    pub const ALL: [StateType; 4] = [
        StateType::Progress,
        StateType::Conflict,
        StateType::Learning,
        StateType::Rework,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Progress => "PROGRESS",
            StateType::Conflict => "CONFLICT",
            StateType::Learning => "LEARNING",
            StateType::Rework => "REWORK",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        StateType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown state type '{trimmed}' (expected progress|conflict|learning|rework)"
                ))
            })
    }
}

/// Independent state track within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Primary,
    Subtask,
    Nested(u8),
}

impl Scope {
    /// Nesting depth; root tracks sit at zero.
    pub fn depth(&self) -> u8 {
        match self {
            Scope::Primary | Scope::Subtask => 0,
            Scope::Nested(depth) => *depth,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Scope::Nested(_))
    }

    /// Scope a child opened under `self` occupies.
    pub fn nested_child(&self) -> Result<Scope> {
        self.depth()
            .checked_add(1)
            .map(Scope::Nested)
            .ok_or_else(|| {
                Error::PreconditionViolation(format!("nesting too deep under scope {self}"))
            })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Primary => f.write_str("primary"),
            Scope::Subtask => f.write_str("subtask"),
            Scope::Nested(depth) => write!(f, "nested:{depth}"),
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim().to_ascii_lowercase();
        match trimmed.as_str() {
            "primary" => Ok(Scope::Primary),
            "subtask" => Ok(Scope::Subtask),
            other => {
                let depth = other
                    .strip_prefix("nested:")
                    .and_then(|raw| raw.parse::<u8>().ok())
                    .filter(|depth| *depth > 0);
                depth.map(Scope::Nested).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "unknown scope '{other}' (expected primary|subtask|nested:<depth>)"
                    ))
                })
            }
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// An open span of a flow state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialState {
    pub task_id: TaskId,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_comment: Option<String>,
    #[serde(default)]
    pub is_linked_to_previous: bool,
    #[serde(default)]
    pub is_nested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scope: Option<Scope>,
    /// Per-task open order; breaks exact start-time ties.
    #[serde(default)]
    pub sequence: u64,
}

impl PartialState {
    /// Archive this span. The end never precedes the start, so same-instant
    /// supersedes produce zero-length spans.
    pub fn close(self, end: DateTime<Utc>, ending_comment: Option<String>) -> IdeaFlowState {
        let end = end.max(self.start);
        IdeaFlowState {
            task_id: self.task_id,
            scope: self.scope,
            state_type: self.state_type,
            start: self.start,
            end,
            starting_comment: self.starting_comment,
            ending_comment,
            is_linked_to_previous: self.is_linked_to_previous,
            is_nested: self.is_nested,
            parent_scope: self.parent_scope,
            sequence: self.sequence,
        }
    }
}

/// A closed, immutable span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdeaFlowState {
    pub task_id: TaskId,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending_comment: Option<String>,
    #[serde(default)]
    pub is_linked_to_previous: bool,
    #[serde(default)]
    pub is_nested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scope: Option<Scope>,
    #[serde(default)]
    pub sequence: u64,
}

impl IdeaFlowState {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Open nested states of one task, outermost first.
#[derive(Debug, Clone, Default)]
pub struct NestingStack {
    frames: Vec<PartialState>,
}

impl NestingStack {
    pub fn from_open_states(open: &[PartialState]) -> Self {
        let mut frames: Vec<PartialState> = open
            .iter()
            .filter(|state| state.scope.is_nested())
            .cloned()
            .collect();
        frames.sort_by_key(|state| state.scope.depth());
        Self { frames }
    }

    pub fn depth(&self) -> u8 {
        self.frames.last().map(|state| state.scope.depth()).unwrap_or(0)
    }

    /// Root track the stack hangs off, if any.
    pub fn base_parent(&self) -> Option<Scope> {
        self.frames.first().and_then(|state| state.parent_scope)
    }

    /// Nested scopes that must close before `scope` closes, innermost first.
    pub fn descendants_of(&self, scope: Scope) -> Vec<Scope> {
        let owns_stack = match scope {
            Scope::Nested(_) => true,
            root => self.base_parent() == Some(root),
        };
        if !owns_stack {
            return Vec::new();
        }
        self.frames
            .iter()
            .rev()
            .map(|state| state.scope)
            .filter(|nested| nested.depth() > scope.depth())
            .collect()
    }

    /// Nested scopes at `depth` or deeper, innermost first.
    pub fn at_or_below(&self, depth: u8) -> Vec<Scope> {
        self.frames
            .iter()
            .rev()
            .map(|state| state.scope)
            .filter(|nested| nested.depth() >= depth)
            .collect()
    }
}
