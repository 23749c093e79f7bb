//! IdeaFlow state machine.
//!
//! Each command runs a read-modify-write over one task's open slots while
//! holding the task's exclusive section. Per (task, scope) the slot is either
//! closed or holds exactly one open [`PartialState`]:
//!
//! - opening on an occupied slot closes the occupant first (same instant, so
//!   a same-timestamp supersede yields a zero-length span)
//! - a linked open continues the previous closed state of the same type in
//!   that scope; across a type change it degrades to a plain open
//! - nested states stack on `Scope::Nested(depth)` slots and are closed LIFO
//!   before anything they were opened under

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::persistence::IdeaFlowPersistence;
use crate::state::{IdeaFlowState, NestingStack, PartialState, Scope, StateType};
use crate::task::TaskId;

/// Parameters of an `open_state` command.
#[derive(Debug, Clone)]
pub struct OpenStateRequest {
    pub scope: Scope,
    pub state_type: StateType,
    pub comment: Option<String>,
    pub link: bool,
}

impl OpenStateRequest {
    pub fn new(scope: Scope, state_type: StateType) -> Self {
        Self {
            scope,
            state_type,
            comment: None,
            link: false,
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn linked(mut self, link: bool) -> Self {
        self.link = link;
        self
    }
}

/// Result of an open command: the new state plus anything it closed.
#[derive(Debug, Clone)]
pub struct Transition {
    pub opened: PartialState,
    pub closed: Vec<IdeaFlowState>,
}

/// Transition engine bound to a single task.
pub struct IdeaFlowStateMachine<'a> {
    task_id: TaskId,
    persistence: &'a dyn IdeaFlowPersistence,
    clock: &'a dyn Clock,
}

/// Working copy of a task's slots inside one command.
struct Snapshot {
    open: Vec<PartialState>,
    closed_count: usize,
}

impl Snapshot {
    fn slot(&self, scope: Scope) -> Option<&PartialState> {
        self.open.iter().find(|state| state.scope == scope)
    }

    fn take(&mut self, scope: Scope) -> Option<PartialState> {
        let index = self.open.iter().position(|state| state.scope == scope)?;
        Some(self.open.remove(index))
    }

    fn stack(&self) -> NestingStack {
        NestingStack::from_open_states(&self.open)
    }

    /// Number of states ever opened for the task; the next open's sequence.
    fn next_sequence(&self) -> u64 {
        (self.open.len() + self.closed_count) as u64
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Position of one state, open or closed, in a task's history.
struct Mark {
    scope: Scope,
    sequence: u64,
    parent_scope: Option<Scope>,
    /// Start of an open state, end of a closed one.
    latest: DateTime<Utc>,
}

/// Latest instant already taken by `current` or anything opened under it.
fn close_floor(
    current: &PartialState,
    open: &[PartialState],
    closed: &[IdeaFlowState],
) -> DateTime<Utc> {
    let Some(child_depth) = current.scope.depth().checked_add(1) else {
        return current.start;
    };
    let marks: Vec<Mark> = open
        .iter()
        .map(|state| Mark {
            scope: state.scope,
            sequence: state.sequence,
            parent_scope: state.parent_scope,
            latest: state.start,
        })
        .chain(closed.iter().map(|state| Mark {
            scope: state.scope,
            sequence: state.sequence,
            parent_scope: state.parent_scope,
            latest: state.end,
        }))
        .collect();

    // One state per nesting level is open at a time, so a nested state's
    // ancestor at `child_depth` is the latest one opened there before it.
    let opened_under = |mark: &Mark| {
        if mark.sequence <= current.sequence || mark.scope.depth() < child_depth {
            return false;
        }
        marks
            .iter()
            .filter(|other| {
                other.scope == Scope::Nested(child_depth) && other.sequence <= mark.sequence
            })
            .max_by_key(|other| other.sequence)
            .is_some_and(|ancestor| {
                ancestor.sequence > current.sequence
                    && ancestor.parent_scope == Some(current.scope)
            })
    };

    marks
        .iter()
        .filter(|mark| opened_under(mark))
        .map(|mark| mark.latest)
        .fold(current.start, Ord::max)
}

impl<'a> IdeaFlowStateMachine<'a> {
    pub fn new(
        task_id: TaskId,
        persistence: &'a dyn IdeaFlowPersistence,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            task_id,
            persistence,
            clock,
        }
    }

    fn snapshot(&self) -> Result<Snapshot> {
        if self.persistence.find_task(self.task_id)?.is_none() {
            return Err(Error::NotFound(format!("task {}", self.task_id)));
        }
        Ok(Snapshot {
            open: self.persistence.find_open_partial_states(self.task_id)?,
            closed_count: self.persistence.find_closed_states(self.task_id)?.len(),
        })
    }

    fn close_slot(
        &self,
        snapshot: &mut Snapshot,
        scope: Scope,
        end: DateTime<Utc>,
        ending_comment: Option<String>,
        closed: &mut Vec<IdeaFlowState>,
    ) -> Result<()> {
        let Some(state) = snapshot.take(scope) else {
            return Ok(());
        };
        let archived = state.close(end, ending_comment);
        self.persistence.close_partial_state(&archived)?;
        snapshot.closed_count += 1;
        debug!(
            task_id = self.task_id,
            scope = %archived.scope,
            state_type = %archived.state_type,
            "closed state"
        );
        closed.push(archived);
        Ok(())
    }

    /// Close `scope` and, first, every nested state opened under it.
    fn close_with_descendants(
        &self,
        snapshot: &mut Snapshot,
        scope: Scope,
        end: DateTime<Utc>,
        ending_comment: Option<String>,
        closed: &mut Vec<IdeaFlowState>,
    ) -> Result<()> {
        for nested in snapshot.stack().descendants_of(scope) {
            warn!(
                task_id = self.task_id,
                scope = %nested,
                parent = %scope,
                "force-closing nested state with its parent"
            );
            self.close_slot(snapshot, nested, end, None, closed)?;
        }
        self.close_slot(snapshot, scope, end, ending_comment, closed)
    }

    fn open_slot(&self, snapshot: &mut Snapshot, state: PartialState) -> Result<PartialState> {
        self.persistence.save_partial_state(&state)?;
        debug!(
            task_id = self.task_id,
            scope = %state.scope,
            state_type = %state.state_type,
            linked = state.is_linked_to_previous,
            "opened state"
        );
        snapshot.open.push(state.clone());
        Ok(state)
    }

    /// Open PROGRESS on the primary track. Valid once per task.
    pub fn start_task(&self) -> Result<PartialState> {
        let _guard = self.persistence.lock_task(self.task_id)?;
        let mut snapshot = self.snapshot()?;
        if !snapshot.open.is_empty() || snapshot.closed_count > 0 {
            return Err(Error::PreconditionViolation(format!(
                "task {} has already been started",
                self.task_id
            )));
        }

        let state = PartialState {
            task_id: self.task_id,
            scope: Scope::Primary,
            state_type: StateType::Progress,
            start: self.clock.now(),
            starting_comment: None,
            is_linked_to_previous: false,
            is_nested: false,
            parent_scope: None,
            sequence: snapshot.next_sequence(),
        };
        self.open_slot(&mut snapshot, state)
    }

    /// Open a state on `request.scope`, closing the current occupant first.
    pub fn open_state(&self, request: OpenStateRequest) -> Result<Transition> {
        let _guard = self.persistence.lock_task(self.task_id)?;
        let mut snapshot = self.snapshot()?;
        let now = self.clock.now();
        let scope = request.scope;

        let current_parent = match snapshot.slot(scope) {
            Some(current) => current.parent_scope,
            None if scope.is_nested() => {
                return Err(Error::PreconditionViolation(format!(
                    "scope {scope} is closed; nested states are opened under a parent"
                )));
            }
            None => None,
        };

        let mut closed = Vec::new();
        self.close_with_descendants(&mut snapshot, scope, now, None, &mut closed)?;

        let linked = request.link && self.can_link(scope, request.state_type, &closed)?;
        let state = PartialState {
            task_id: self.task_id,
            scope,
            state_type: request.state_type,
            start: now,
            starting_comment: normalize_comment(request.comment),
            is_linked_to_previous: linked,
            is_nested: scope.is_nested(),
            parent_scope: current_parent,
            sequence: snapshot.next_sequence(),
        };
        let opened = self.open_slot(&mut snapshot, state)?;
        Ok(Transition { opened, closed })
    }

    /// Whether the immediately preceding closed state in `scope` has `state_type`.
    fn can_link(
        &self,
        scope: Scope,
        state_type: StateType,
        just_closed: &[IdeaFlowState],
    ) -> Result<bool> {
        let previous = match just_closed.iter().rev().find(|state| state.scope == scope) {
            Some(state) => Some(state.clone()),
            None => self
                .persistence
                .find_closed_states(self.task_id)?
                .into_iter()
                .rev()
                .find(|state| state.scope == scope),
        };

        match previous {
            Some(previous) if previous.state_type == state_type => Ok(true),
            Some(previous) => {
                warn!(
                    task_id = self.task_id,
                    scope = %scope,
                    previous = %previous.state_type,
                    requested = %state_type,
                    "link across a type change; opening unlinked"
                );
                Ok(false)
            }
            None => {
                warn!(
                    task_id = self.task_id,
                    scope = %scope,
                    "nothing to link to; opening unlinked"
                );
                Ok(false)
            }
        }
    }

    /// Open a child state under the open `parent_scope`.
    pub fn open_nested_state(
        &self,
        parent_scope: Scope,
        state_type: StateType,
        comment: Option<String>,
    ) -> Result<Transition> {
        let _guard = self.persistence.lock_task(self.task_id)?;
        let mut snapshot = self.snapshot()?;
        if snapshot.slot(parent_scope).is_none() {
            return Err(Error::PreconditionViolation(format!(
                "cannot nest under closed scope {parent_scope}"
            )));
        }

        let now = self.clock.now();
        let child_scope = parent_scope.nested_child()?;
        let mut closed = Vec::new();
        for nested in snapshot.stack().at_or_below(child_scope.depth()) {
            self.close_slot(&mut snapshot, nested, now, None, &mut closed)?;
        }

        let state = PartialState {
            task_id: self.task_id,
            scope: child_scope,
            state_type,
            start: now,
            starting_comment: normalize_comment(comment),
            is_linked_to_previous: false,
            is_nested: true,
            parent_scope: Some(parent_scope),
            sequence: snapshot.next_sequence(),
        };
        let opened = self.open_slot(&mut snapshot, state)?;
        Ok(Transition { opened, closed })
    }

    /// Close `scope` at `end_time` (default now). Closing a closed scope is a
    /// no-op and returns an empty list.
    ///
    /// An explicit end may not lie in the future, nor before the start of the
    /// state or of anything nested under it, so children end with their parent.
    ///
    /// Returns the archived states, nested children first.
    pub fn close_state(
        &self,
        scope: Scope,
        end_time: Option<DateTime<Utc>>,
        comment: Option<String>,
    ) -> Result<Vec<IdeaFlowState>> {
        let _guard = self.persistence.lock_task(self.task_id)?;
        let mut snapshot = self.snapshot()?;
        let Some(current) = snapshot.slot(scope) else {
            debug!(task_id = self.task_id, scope = %scope, "close on closed scope ignored");
            return Ok(Vec::new());
        };

        let now = self.clock.now();
        let end = match end_time {
            Some(end) if end > now => {
                return Err(Error::PreconditionViolation(format!(
                    "end time {end} of scope {scope} is in the future"
                )));
            }
            Some(end) => {
                let closed = self.persistence.find_closed_states(self.task_id)?;
                let floor = close_floor(current, &snapshot.open, &closed);
                if end < floor {
                    return Err(Error::PreconditionViolation(format!(
                        "end time {end} precedes {floor}, the latest activity under scope {scope}"
                    )));
                }
                end
            }
            None => now,
        };

        let mut closed = Vec::new();
        self.close_with_descendants(
            &mut snapshot,
            scope,
            end,
            normalize_comment(comment),
            &mut closed,
        )?;
        Ok(closed)
    }

    /// Close every open scope: nested deepest first, then subtask, then primary.
    pub fn end_task(&self) -> Result<Vec<IdeaFlowState>> {
        let _guard = self.persistence.lock_task(self.task_id)?;
        let mut snapshot = self.snapshot()?;
        let now = self.clock.now();

        let mut order: Vec<Scope> = snapshot.stack().at_or_below(1);
        for root in [Scope::Subtask, Scope::Primary] {
            if snapshot.slot(root).is_some() {
                order.push(root);
            }
        }

        let mut closed = Vec::new();
        for scope in order {
            self.close_slot(&mut snapshot, scope, now, None, &mut closed)?;
        }
        debug!(task_id = self.task_id, closed = closed.len(), "ended task");
        Ok(closed)
    }

    /// Currently open slots, ordered by scope.
    pub fn open_states(&self) -> Result<Vec<PartialState>> {
        self.persistence.find_open_partial_states(self.task_id)
    }
}
