//! File-backed persistence.
//!
//! Open slots are rewritten atomically; closed states and events are
//! append-only JSONL. Transitions hold both the in-process task lock and the
//! task's `state.lock` file so concurrent `ifm` processes serialize too.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::lock::{FileLock, TaskGuard, TaskLocks};
use crate::persistence::IdeaFlowPersistence;
use crate::state::{IdeaFlowState, PartialState, Scope};
use crate::storage::Storage;
use crate::task::{NewTask, Task, TaskId, TaskRegistry};

#[derive(Debug, Default, Serialize, Deserialize)]
struct OpenStates {
    #[serde(default)]
    states: Vec<PartialState>,
}

#[derive(Debug)]
pub struct FileStore {
    storage: Storage,
    lock_timeout_ms: u64,
    locks: TaskLocks,
}

impl FileStore {
    pub fn new(storage: Storage, lock_timeout_ms: u64) -> Self {
        Self {
            storage,
            lock_timeout_ms,
            locks: TaskLocks::new(),
        }
    }

    /// Open the store described by `config` under its root.
    pub fn open(storage: Storage, config: &Config) -> Result<Self> {
        storage.init()?;
        Ok(Self::new(storage, config.storage.lock_timeout_ms))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn read_registry(&self) -> Result<TaskRegistry> {
        let path = self.storage.tasks_file();
        if !path.exists() {
            return Ok(TaskRegistry::default());
        }
        self.storage.read_json(&path)
    }

    fn update_registry<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskRegistry) -> Result<T>,
    {
        let _lock = FileLock::acquire(self.storage.tasks_lock_file(), self.lock_timeout_ms)?;
        let mut registry = self.read_registry()?;
        let result = f(&mut registry)?;
        registry.validate()?;
        self.storage
            .write_json(&self.storage.tasks_file(), &registry)?;
        Ok(result)
    }

    fn ensure_task(&self, task_id: TaskId) -> Result<()> {
        if self.read_registry()?.find(task_id).is_none() {
            return Err(Error::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    fn read_open(&self, task_id: TaskId) -> Result<Vec<PartialState>> {
        let path = self.storage.open_states_file(task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let open: OpenStates = self.storage.read_json(&path)?;
        Ok(open.states)
    }

    fn write_open(&self, task_id: TaskId, mut states: Vec<PartialState>) -> Result<()> {
        states.sort_by_key(|state| state.scope);
        self.storage
            .write_json(&self.storage.open_states_file(task_id), &OpenStates { states })
    }
}

impl IdeaFlowPersistence for FileStore {
    fn save_task(&self, task: &NewTask, created_at: DateTime<Utc>) -> Result<Task> {
        let saved = self.update_registry(|registry| registry.insert(task, created_at))?;
        self.storage.init_task(saved.id)?;
        Ok(saved)
    }

    fn find_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        Ok(self.read_registry()?.find(task_id).cloned())
    }

    fn find_task_with_name(&self, name: &str) -> Result<Option<Task>> {
        Ok(self.read_registry()?.find_by_name(name).cloned())
    }

    fn lock_task(&self, task_id: TaskId) -> Result<TaskGuard<'_>> {
        self.ensure_task(task_id)?;
        let process = self.locks.acquire(task_id);
        let file = FileLock::acquire(self.storage.state_lock_file(task_id), self.lock_timeout_ms)?;
        Ok(TaskGuard::with_file(process, file))
    }

    fn find_open_partial_state(
        &self,
        task_id: TaskId,
        scope: Scope,
    ) -> Result<Option<PartialState>> {
        Ok(self
            .find_open_partial_states(task_id)?
            .into_iter()
            .find(|state| state.scope == scope))
    }

    fn find_open_partial_states(&self, task_id: TaskId) -> Result<Vec<PartialState>> {
        let open = self.read_open(task_id)?;
        if open.is_empty() {
            return Ok(open);
        }
        // An interrupted close can leave a slot whose state is already archived.
        let archived: HashSet<(Scope, u64)> = self
            .find_closed_states(task_id)?
            .into_iter()
            .map(|state| (state.scope, state.sequence))
            .collect();
        Ok(open
            .into_iter()
            .filter(|state| !archived.contains(&(state.scope, state.sequence)))
            .collect())
    }

    fn save_partial_state(&self, state: &PartialState) -> Result<()> {
        self.ensure_task(state.task_id)?;
        let mut open = self.read_open(state.task_id)?;
        open.retain(|existing| existing.scope != state.scope);
        open.push(state.clone());
        self.write_open(state.task_id, open)
    }

    fn close_partial_state(&self, closed: &IdeaFlowState) -> Result<()> {
        self.ensure_task(closed.task_id)?;
        self.storage
            .append_jsonl(&self.storage.closed_states_log(closed.task_id), closed)?;
        let mut open = self.read_open(closed.task_id)?;
        open.retain(|existing| existing.scope != closed.scope);
        self.write_open(closed.task_id, open)
    }

    fn find_closed_states(&self, task_id: TaskId) -> Result<Vec<IdeaFlowState>> {
        self.storage
            .read_jsonl(&self.storage.closed_states_log(task_id))
    }

    fn save_event(&self, event: &Event) -> Result<()> {
        self.ensure_task(event.task_id)?;
        let _lock = FileLock::acquire(
            self.storage.events_lock_file(event.task_id),
            self.lock_timeout_ms,
        )?;
        self.storage
            .append_jsonl(&self.storage.events_log(event.task_id), event)
    }

    fn find_events(&self, task_id: TaskId) -> Result<Vec<Event>> {
        self.storage.read_jsonl(&self.storage.events_log(task_id))
    }
}
