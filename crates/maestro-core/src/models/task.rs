// Task model: one node of a workflow DAG

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{MaestroError, Result};
use crate::models::resource::Resource;
use crate::secrets::SealedSecret;

/// Execution status of a single task. DONE and FAILED are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Unknown,
    Pending,
    Running,
    Failed,
    Done,
}

impl TaskStatus {
    /// Terminal statuses are never left again, even when the queue
    /// redelivers a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// Per-task execution options.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TaskOptions {
    /// Emit an INTERRUPTION signal when the task fails, cascading the
    /// failure to downstream consumers.
    pub on_fail_force_interruption: bool,
    /// Clear the task's local scratch directory when the task fails.
    pub on_fail_remove_local_dir: bool,
    /// Queue to submit the task to instead of the default one.
    pub queue_name: Option<String>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            on_fail_force_interruption: true,
            on_fail_remove_local_dir: true,
            queue_name: None,
        }
    }
}

/// Files attached to a task result: either bare resources or named maps.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ResultFile {
    Plain(Resource),
    Named(HashMap<String, Resource>),
}

/// What a component hands back when it finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    #[schema(value_type = Option<Object>)]
    pub message: Option<Value>,
    #[serde(default)]
    pub files: Vec<ResultFile>,
    pub log: Option<Resource>,
}

impl TaskResult {
    pub fn with_message(message: impl Into<Value>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A task as submitted inside a workflow request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub name: String,
    /// Registry key of the component to run.
    pub module: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: HashMap<String, Value>,
    /// Local input name to `"<upstream_task>.<record_name>"`, kept in
    /// declaration order since it breaks ties in the topological sort.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub inputs: IndexMap<String, String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<SealedSecret>,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            params: HashMap::new(),
            inputs: IndexMap::new(),
            labels: Vec::new(),
            secrets: Vec::new(),
            options: TaskOptions::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Names of the upstream tasks this task consumes from.
    pub fn upstream_tasks(&self) -> Vec<&str> {
        self.inputs
            .values()
            .filter_map(|v| v.split('.').next())
            .collect()
    }

    /// Check the task-level invariants: the name carries no spaces or dots
    /// and every input value forms a `<task>.<output>` identifier.
    pub fn validate(&self) -> Result<()> {
        if self.name.contains(' ') {
            return Err(MaestroError::validation(format!(
                "task name `{}` must not contain spaces",
                self.name
            )));
        }
        if self.name.contains('.') {
            return Err(MaestroError::validation(format!(
                "task name `{}` must not contain dots",
                self.name
            )));
        }
        for value in self.inputs.values() {
            if !value.contains('.') {
                return Err(MaestroError::validation(format!(
                    "input `{value}` of task `{}` must form a valid identifier (<task>.<output>)",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// A task as persisted in the state store. The id is assigned by the job
/// queue at enqueue time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Workflow id this task belongs to.
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: HashMap<String, Value>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub inputs: IndexMap<String, String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<SealedSecret>,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: HashMap<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_must_not_contain_spaces() {
        let task = Task::new("bad name", "test");
        assert!(task.validate().is_err());
    }

    #[test]
    fn task_name_must_not_contain_dots() {
        let task = Task::new("bad.name", "test");
        assert!(task.validate().is_err());
    }

    #[test]
    fn input_values_must_form_identifiers() {
        let task = Task::new("Reader", "test")
            .with_inputs([("Input".to_string(), "UpstreamData".to_string())]);
        assert!(task.validate().is_err());

        let task = Task::new("Reader", "test")
            .with_inputs([("Input".to_string(), "Upstream.Data".to_string())]);
        assert!(task.validate().is_ok());
        assert_eq!(task.upstream_tasks(), vec!["Upstream"]);
    }

    #[test]
    fn options_default_to_interruption_and_cleanup() {
        let opts = TaskOptions::default();
        assert!(opts.on_fail_force_interruption);
        assert!(opts.on_fail_remove_local_dir);
        assert!(opts.queue_name.is_none());
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Unknown.is_terminal());
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        let status: TaskStatus = serde_json::from_str("\"DONE\"").unwrap();
        assert_eq!(status, TaskStatus::Done);
    }
}
