// Workflow model: a DAG of tasks executed as one logical job

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{MaestroError, Result};
use crate::models::task::{Task, TaskRecord};

/// Aggregated status of a workflow, derived from its tasks' statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    #[default]
    Unknown,
    Revoked,
    Pending,
    Running,
    Failed,
    Done,
}

/// Free-form workflow metadata with a defaulted author.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowMetadata {
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: HashMap<String, Value>,
}

fn default_author() -> String {
    "anonymous".to_string()
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self {
            author: default_author(),
            extra: HashMap::new(),
        }
    }
}

/// A workflow as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workflow {
    #[serde(default = "generate_id")]
    pub id: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Sealed-secret references shared by the whole workflow.
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            id: generate_id(),
            tasks: Vec::new(),
            secrets: Vec::new(),
            labels: Vec::new(),
            metadata: WorkflowMetadata::default(),
        }
    }
}

impl Workflow {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            ..Default::default()
        }
    }

    /// Check the workflow-level invariants: per-task rules, unique task
    /// names, and every input referring to another task of this workflow.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !names.insert(task.name.as_str()) {
                return Err(MaestroError::validation(format!(
                    "found duplicated task name `{}` in workflow",
                    task.name
                )));
            }
        }

        for task in &self.tasks {
            for input in task.inputs.values() {
                let upstream = input.split('.').next().unwrap_or_default();
                if upstream == task.name {
                    return Err(MaestroError::validation(format!(
                        "task `{}` declares itself as an input",
                        task.name
                    )));
                }
                if !names.contains(upstream) {
                    return Err(MaestroError::validation(format!(
                        "input `{input}` of task `{}` refers to unknown task `{upstream}`",
                        task.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A workflow as persisted in the state store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WorkflowRecord {
    pub id: String,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub is_revoked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_simple_hex() {
        let workflow = Workflow::default();
        assert_eq!(workflow.id.len(), 32);
        assert!(workflow.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn duplicated_task_names_are_rejected() {
        let workflow =
            Workflow::with_tasks(vec![Task::new("First", "test"), Task::new("First", "test")]);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn inputs_must_refer_to_known_tasks() {
        let workflow = Workflow::with_tasks(vec![
            Task::new("First", "test"),
            Task::new("Second", "test")
                .with_inputs([("Input".to_string(), "Ghost.Data".to_string())]),
        ]);
        assert!(workflow.validate().is_err());

        let workflow = Workflow::with_tasks(vec![
            Task::new("First", "test"),
            Task::new("Second", "test")
                .with_inputs([("Input".to_string(), "First.Data".to_string())]),
        ]);
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn self_referencing_inputs_are_rejected() {
        let workflow = Workflow::with_tasks(vec![Task::new("Loop", "test")
            .with_inputs([("Input".to_string(), "Loop.Data".to_string())])]);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn metadata_defaults_author_and_keeps_extras() {
        let metadata: WorkflowMetadata =
            serde_json::from_str(r#"{"project": "demo"}"#).unwrap();
        assert_eq!(metadata.author, "anonymous");
        assert_eq!(metadata.extra["project"], "demo");
    }
}
