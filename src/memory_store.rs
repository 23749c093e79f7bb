//! In-process persistence backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::lock::{TaskGuard, TaskLocks};
use crate::persistence::IdeaFlowPersistence;
use crate::state::{IdeaFlowState, PartialState, Scope};
use crate::task::{NewTask, Task, TaskId, TaskRegistry};

#[derive(Debug, Default)]
struct TaskData {
    open: BTreeMap<Scope, PartialState>,
    closed: Vec<IdeaFlowState>,
    events: Vec<Event>,
}

#[derive(Debug, Default)]
struct Inner {
    registry: TaskRegistry,
    data: HashMap<TaskId, TaskData>,
}

/// Volatile store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    locks: TaskLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn unknown_task(task_id: TaskId) -> Error {
    Error::NotFound(format!("task {task_id}"))
}

impl IdeaFlowPersistence for MemoryStore {
    fn save_task(&self, task: &NewTask, created_at: DateTime<Utc>) -> Result<Task> {
        let mut inner = self.write();
        let saved = inner.registry.insert(task, created_at)?;
        inner.data.insert(saved.id, TaskData::default());
        Ok(saved)
    }

    fn find_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        Ok(self.read().registry.find(task_id).cloned())
    }

    fn find_task_with_name(&self, name: &str) -> Result<Option<Task>> {
        Ok(self.read().registry.find_by_name(name).cloned())
    }

    fn lock_task(&self, task_id: TaskId) -> Result<TaskGuard<'_>> {
        Ok(TaskGuard::in_process(self.locks.acquire(task_id)))
    }

    fn find_open_partial_state(
        &self,
        task_id: TaskId,
        scope: Scope,
    ) -> Result<Option<PartialState>> {
        Ok(self
            .read()
            .data
            .get(&task_id)
            .and_then(|data| data.open.get(&scope))
            .cloned())
    }

    fn find_open_partial_states(&self, task_id: TaskId) -> Result<Vec<PartialState>> {
        Ok(self
            .read()
            .data
            .get(&task_id)
            .map(|data| data.open.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save_partial_state(&self, state: &PartialState) -> Result<()> {
        let mut inner = self.write();
        let data = inner
            .data
            .get_mut(&state.task_id)
            .ok_or_else(|| unknown_task(state.task_id))?;
        data.open.insert(state.scope, state.clone());
        Ok(())
    }

    fn close_partial_state(&self, closed: &IdeaFlowState) -> Result<()> {
        let mut inner = self.write();
        let data = inner
            .data
            .get_mut(&closed.task_id)
            .ok_or_else(|| unknown_task(closed.task_id))?;
        data.open.remove(&closed.scope);
        data.closed.push(closed.clone());
        Ok(())
    }

    fn find_closed_states(&self, task_id: TaskId) -> Result<Vec<IdeaFlowState>> {
        Ok(self
            .read()
            .data
            .get(&task_id)
            .map(|data| data.closed.clone())
            .unwrap_or_default())
    }

    fn save_event(&self, event: &Event) -> Result<()> {
        let mut inner = self.write();
        let data = inner
            .data
            .get_mut(&event.task_id)
            .ok_or_else(|| unknown_task(event.task_id))?;
        data.events.push(event.clone());
        Ok(())
    }

    fn find_events(&self, task_id: TaskId) -> Result<Vec<Event>> {
        Ok(self
            .read()
            .data
            .get(&task_id)
            .map(|data| data.events.clone())
            .unwrap_or_default())
    }
}
