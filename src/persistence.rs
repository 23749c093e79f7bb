//! Persistence collaborator for the state machine and timeline builder.
//!
//! Backends keep three things per task: the open partial states (one slot per
//! scope), the archive of closed states, and the raw event log. The state
//! machine only mutates a task while holding the guard returned by
//! [`IdeaFlowPersistence::lock_task`].

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::Event;
use crate::lock::TaskGuard;
use crate::state::{IdeaFlowState, PartialState, Scope};
use crate::task::{NewTask, Task, TaskId};

pub trait IdeaFlowPersistence: Send + Sync {
    /// Register a task. A name collision detected here is reported as
    /// `PersistenceConflict`.
    fn save_task(&self, task: &NewTask, created_at: DateTime<Utc>) -> Result<Task>;

    fn find_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    fn find_task_with_name(&self, name: &str) -> Result<Option<Task>>;

    /// Enter the exclusive section for `task_id`'s state transitions.
    fn lock_task(&self, task_id: TaskId) -> Result<TaskGuard<'_>>;

    fn find_open_partial_state(
        &self,
        task_id: TaskId,
        scope: Scope,
    ) -> Result<Option<PartialState>>;

    /// All open slots for a task, ordered by scope.
    fn find_open_partial_states(&self, task_id: TaskId) -> Result<Vec<PartialState>>;

    /// Store `state` in its (task, scope) slot, replacing whatever was there.
    fn save_partial_state(&self, state: &PartialState) -> Result<()>;

    /// Archive `closed` and empty its open slot in one step.
    fn close_partial_state(&self, closed: &IdeaFlowState) -> Result<()>;

    /// Closed states in the order they were archived.
    fn find_closed_states(&self, task_id: TaskId) -> Result<Vec<IdeaFlowState>>;

    fn save_event(&self, event: &Event) -> Result<()>;

    /// Events in insertion order.
    fn find_events(&self, task_id: TaskId) -> Result<Vec<Event>>;
}
