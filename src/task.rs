//! Tasks tracked by ideaflow.
//!
//! A task is the unit of work a timeline is derived for. Task names are
//! unique; the registry enforces that at the storage boundary so a lost race
//! surfaces as [`Error::PersistenceConflict`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type TaskId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
}

impl NewTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Trim the name and drop blank descriptions.
    pub fn normalized(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidArgument("task name cannot be empty".to_string()));
        }
        let description = self
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self { name, description })
    }
}

/// Registry of all tasks known to a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRegistry {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskRegistry {
    pub fn find(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Task> {
        let name = name.trim();
        self.tasks.iter().find(|task| task.name == name)
    }

    fn next_id(&self) -> TaskId {
        self.tasks.iter().map(|task| task.id).max().unwrap_or(0) + 1
    }

    /// Insert a new task, assigning the next id.
    ///
    /// Fails with `PersistenceConflict` when the name is already registered.
    pub fn insert(&mut self, new_task: &NewTask, created_at: DateTime<Utc>) -> Result<Task> {
        if self.find_by_name(&new_task.name).is_some() {
            return Err(Error::PersistenceConflict(format!(
                "unique constraint violated for task name '{}'",
                new_task.name
            )));
        }
        let task = Task {
            id: self.next_id(),
            name: new_task.name.clone(),
            description: new_task.description.clone(),
            created_at,
        };
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Check registry integrity after a load.
    pub fn validate(&self) -> Result<()> {
        let mut ids = std::collections::HashSet::new();
        let mut names = std::collections::HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id) {
                return Err(Error::OperationFailed(format!(
                    "duplicate task id in registry: {}",
                    task.id
                )));
            }
            if !names.insert(task.name.as_str()) {
                return Err(Error::OperationFailed(format!(
                    "duplicate task name in registry: {}",
                    task.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let mut registry = TaskRegistry::default();
        let first = registry.insert(&NewTask::new("alpha"), at(0)).unwrap();
        let second = registry.insert(&NewTask::new("beta"), at(1)).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(registry.find_by_name("beta").map(|t| t.id), Some(2));
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let mut registry = TaskRegistry::default();
        registry.insert(&NewTask::new("alpha"), at(0)).unwrap();
        let err = registry.insert(&NewTask::new("alpha"), at(1)).unwrap_err();
        assert!(matches!(err, Error::PersistenceConflict(_)));
    }

    #[test]
    fn normalized_trims_and_rejects_blank() {
        let task = NewTask::new("  fix parser ")
            .with_description("   ")
            .normalized()
            .unwrap();
        assert_eq!(task.name, "fix parser");
        assert_eq!(task.description, None);

        let err = NewTask::new("   ").normalized().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
