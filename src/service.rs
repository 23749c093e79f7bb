//! Library facade over the state machine, event log and timeline builder.
//!
//! Every ingestion call resolves the task, stamps the current time from the
//! injected clock and runs one state-machine command or event append.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::event::{Event, EventType};
use crate::persistence::IdeaFlowPersistence;
use crate::state::{IdeaFlowState, PartialState, Scope, StateType};
use crate::state_machine::{IdeaFlowStateMachine, OpenStateRequest, Transition};
use crate::task::{NewTask, Task, TaskId};
use crate::timeline::{BandTimeline, TimelineBuilder, TimelineOptions, TreeTimeline};

/// Payload of an editor activity report.
#[derive(Debug, Clone)]
pub struct EditorActivity {
    pub file_path: String,
    pub duration_seconds: i64,
    pub modified: bool,
}

/// Payload of an idle period report.
#[derive(Debug, Clone, Default)]
pub struct IdleActivity {
    pub duration_seconds: i64,
    pub comment: Option<String>,
    /// Detected by tooling rather than declared by the developer.
    pub auto: bool,
}

/// Payload of time spent outside the tracked tools.
#[derive(Debug, Clone, Default)]
pub struct ExternalActivity {
    pub duration_seconds: i64,
    pub comment: Option<String>,
}

/// Result of `add_subtask`: the marker event and the subtask state it opened.
#[derive(Debug, Clone)]
pub struct SubtaskStarted {
    pub event: Event,
    pub transition: Transition,
}

pub struct IdeaFlowService {
    persistence: Arc<dyn IdeaFlowPersistence>,
    clock: Arc<dyn Clock>,
    timeline: TimelineOptions,
}

fn validate_duration(duration_seconds: i64) -> Result<i64> {
    if duration_seconds < 0 {
        return Err(Error::InvalidArgument(format!(
            "duration must not be negative (got {duration_seconds})"
        )));
    }
    Ok(duration_seconds)
}

impl IdeaFlowService {
    pub fn new(persistence: Arc<dyn IdeaFlowPersistence>, clock: Arc<dyn Clock>) -> Self {
        Self {
            persistence,
            clock,
            timeline: TimelineOptions::default(),
        }
    }

    pub fn with_timeline_options(mut self, options: TimelineOptions) -> Self {
        self.timeline = options;
        self
    }

    pub fn persistence(&self) -> &dyn IdeaFlowPersistence {
        self.persistence.as_ref()
    }

    fn state_machine(&self, task_id: TaskId) -> IdeaFlowStateMachine<'_> {
        IdeaFlowStateMachine::new(task_id, self.persistence.as_ref(), self.clock.as_ref())
    }

    fn require_task(&self, task_id: TaskId) -> Result<Task> {
        self.persistence
            .find_task(task_id)?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Create a task and open its primary PROGRESS state.
    ///
    /// If the start fails the task stays registered; `start_task` resumes it.
    pub fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let task = self.register_task(new_task)?;
        if let Err(err) = self.state_machine(task.id).start_task() {
            warn!(
                task_id = task.id,
                name = %task.name,
                error = %err,
                "task registered but not started"
            );
            return Err(err);
        }
        info!(task_id = task.id, name = %task.name, "created task");
        Ok(task)
    }

    /// Create a task without starting it.
    ///
    /// A name already in use fails with `DuplicateTaskName` carrying the
    /// existing task, including when another writer wins the race between the
    /// lookup and the insert.
    pub fn register_task(&self, new_task: NewTask) -> Result<Task> {
        let new_task = new_task.normalized()?;
        if let Some(existing) = self.persistence.find_task_with_name(&new_task.name)? {
            return Err(Error::DuplicateTaskName(Box::new(existing)));
        }

        match self.persistence.save_task(&new_task, self.clock.now()) {
            Ok(task) => Ok(task),
            Err(Error::PersistenceConflict(detail)) => {
                debug!(name = %new_task.name, %detail, "task insert lost a race");
                match self.persistence.find_task_with_name(&new_task.name)? {
                    Some(existing) => Err(Error::DuplicateTaskName(Box::new(existing))),
                    None => Err(Error::PersistenceConflict(detail)),
                }
            }
            Err(err) => Err(err),
        }
    }

    pub fn find_task_with_name(&self, name: &str) -> Result<Task> {
        self.persistence
            .find_task_with_name(name.trim())?
            .ok_or_else(|| Error::NotFound(format!("task named '{}'", name.trim())))
    }

    pub fn find_task(&self, task_id: TaskId) -> Result<Task> {
        self.require_task(task_id)
    }

    pub fn start_task(&self, task_id: TaskId) -> Result<PartialState> {
        self.state_machine(task_id).start_task()
    }

    pub fn end_task(&self, task_id: TaskId) -> Result<Vec<IdeaFlowState>> {
        self.state_machine(task_id).end_task()
    }

    // =========================================================================
    // States
    // =========================================================================

    pub fn open_state(&self, task_id: TaskId, request: OpenStateRequest) -> Result<Transition> {
        self.state_machine(task_id).open_state(request)
    }

    pub fn open_nested_state(
        &self,
        task_id: TaskId,
        parent_scope: Scope,
        state_type: StateType,
        comment: Option<String>,
    ) -> Result<Transition> {
        self.state_machine(task_id)
            .open_nested_state(parent_scope, state_type, comment)
    }

    /// Close `scope` at `end_time`, or now when none is given.
    pub fn close_state(
        &self,
        task_id: TaskId,
        scope: Scope,
        end_time: Option<DateTime<Utc>>,
        comment: Option<String>,
    ) -> Result<Vec<IdeaFlowState>> {
        self.state_machine(task_id)
            .close_state(scope, end_time, comment)
    }

    pub fn open_states(&self, task_id: TaskId) -> Result<Vec<PartialState>> {
        self.require_task(task_id)?;
        self.state_machine(task_id).open_states()
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn append_event(&self, event: Event) -> Result<Event> {
        self.persistence.save_event(&event)?;
        debug!(
            task_id = event.task_id,
            event_type = %event.event_type,
            event_id = %event.event_id,
            "appended event"
        );
        Ok(event)
    }

    fn new_event(&self, task_id: TaskId, event_type: EventType) -> Result<Event> {
        self.require_task(task_id)?;
        Ok(Event::new(event_type, task_id, self.clock.now()))
    }

    pub fn add_note(&self, task_id: TaskId, comment: impl Into<String>) -> Result<Event> {
        let event = self
            .new_event(task_id, EventType::Note)?
            .with_comment(Some(comment.into()));
        self.append_event(event)
    }

    /// Start a PROGRESS band on the subtask track, then record the marker.
    ///
    /// The marker is only logged once its band is open.
    pub fn add_subtask(&self, task_id: TaskId, comment: impl Into<String>) -> Result<SubtaskStarted> {
        let event = self
            .new_event(task_id, EventType::Subtask)?
            .with_comment(Some(comment.into()));

        let mut request = OpenStateRequest::new(Scope::Subtask, StateType::Progress);
        request.comment = event.comment.clone();
        let transition = self.state_machine(task_id).open_state(request)?;

        let event = self.append_event(event)?;
        Ok(SubtaskStarted { event, transition })
    }

    pub fn add_editor_activity(&self, task_id: TaskId, activity: EditorActivity) -> Result<Event> {
        let file_path = activity.file_path.trim();
        if file_path.is_empty() {
            return Err(Error::InvalidArgument("file path cannot be empty".to_string()));
        }
        let mut event = self.new_event(task_id, EventType::EditorActivity)?;
        event.duration_seconds = Some(validate_duration(activity.duration_seconds)?);
        event.file_path = Some(file_path.to_string());
        event.modified = Some(activity.modified);
        self.append_event(event)
    }

    pub fn add_idle_activity(&self, task_id: TaskId, activity: IdleActivity) -> Result<Event> {
        let mut event = self
            .new_event(task_id, EventType::IdleActivity)?
            .with_comment(activity.comment);
        event.duration_seconds = Some(validate_duration(activity.duration_seconds)?);
        event.auto = Some(activity.auto);
        self.append_event(event)
    }

    pub fn add_external_activity(
        &self,
        task_id: TaskId,
        activity: ExternalActivity,
    ) -> Result<Event> {
        let mut event = self
            .new_event(task_id, EventType::ExternalActivity)?
            .with_comment(activity.comment);
        event.duration_seconds = Some(validate_duration(activity.duration_seconds)?);
        self.append_event(event)
    }

    // =========================================================================
    // Timelines
    // =========================================================================

    fn timeline_builder(&self) -> TimelineBuilder<'_> {
        TimelineBuilder::new(self.persistence.as_ref(), self.clock.as_ref(), self.timeline)
    }

    pub fn band_timeline(&self, task_id: TaskId) -> Result<BandTimeline> {
        self.timeline_builder().build_band_timeline(task_id)
    }

    pub fn tree_timeline(&self, task_id: TaskId) -> Result<TreeTimeline> {
        self.timeline_builder().build_tree_timeline(task_id)
    }
}
