// Workflow scheduler: validation, topological ordering and enqueueing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use maestro_bus::Job;
use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{Task, TaskRecord, TaskStatus, Workflow, WorkflowRecord, WorkflowStatus};
use maestro_storage::{TaskPatch, WorkflowPatch};

use crate::catalog::REVOKE_EXECUTION_MODULE;
use crate::runtime::Runtime;

pub struct Scheduler {
    runtime: Arc<Runtime>,
}

impl Scheduler {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Validate a workflow, persist it as PENDING and enqueue its tasks in
    /// topological order.
    pub async fn run(&self, workflow: Workflow) -> Result<WorkflowRecord> {
        workflow.validate()?;
        let sorted = Self::sorted_tasks(&workflow)?;

        let record = self
            .runtime
            .db
            .upsert_workflow(
                &workflow.id,
                WorkflowPatch {
                    labels: Some(workflow.labels.clone()),
                    metadata: Some(workflow.metadata.clone()),
                    secrets: Some(workflow.secrets.clone()),
                    status: Some(WorkflowStatus::Pending),
                    created_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        // Workflow metadata rides along on every task.
        let mut tasks: HashMap<String, Task> = HashMap::new();
        for mut task in workflow.tasks.clone() {
            task.metadata.insert(
                "author".to_string(),
                Value::String(workflow.metadata.author.clone()),
            );
            for (key, value) in &workflow.metadata.extra {
                task.metadata.insert(key.clone(), value.clone());
            }
            tasks.insert(task.name.clone(), task);
        }

        for task_name in &sorted {
            let task = tasks
                .get(task_name)
                .cloned()
                .expect("sorted task names come from the workflow");
            self.enqueue(task, &workflow.id).await?;
        }

        Ok(record)
    }

    /// Cancel a workflow: flip `is_revoked` and enqueue the built-in
    /// revocation task, which broadcasts an interruption on the topic.
    pub async fn revoke(&self, workflow_id: &str) -> Result<WorkflowRecord> {
        tracing::debug!(workflow_id, "revoking workflow");

        let workflow = self
            .runtime
            .db
            .upsert_workflow(
                workflow_id,
                WorkflowPatch {
                    is_revoked: Some(true),
                    updated_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        let task_revoke = Task::new("RevokeExecution", REVOKE_EXECUTION_MODULE);
        self.enqueue(task_revoke, workflow_id).await?;

        Ok(workflow)
    }

    /// A workflow row with its tasks populated.
    pub async fn status(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let Some(mut workflow) = self.runtime.db.find_workflow(workflow_id).await? else {
            return Ok(None);
        };
        workflow.tasks = self.runtime.db.find_tasks(workflow_id).await?;
        Ok(Some(workflow))
    }

    /// Submit one task onto the job queue. The queue's message id becomes
    /// the task id under which the PENDING row is persisted.
    pub async fn enqueue(&self, task: Task, workflow_id: &str) -> Result<TaskRecord> {
        let queue_name = task
            .options
            .queue_name
            .clone()
            .unwrap_or_else(|| self.runtime.settings.default_actor_opts.queue_name.clone());

        let job = Job {
            task: task.clone(),
            workflow_id: workflow_id.to_string(),
            retries: 0,
        };
        let message_id = self.runtime.queue.enqueue(&queue_name, &job, None).await?;

        self.runtime
            .db
            .upsert_task(
                &message_id,
                TaskPatch {
                    name: Some(task.name),
                    parent: Some(workflow_id.to_string()),
                    module: Some(task.module),
                    params: Some(task.params),
                    inputs: Some(task.inputs),
                    labels: Some(task.labels),
                    secrets: Some(task.secrets),
                    options: Some(task.options),
                    metadata: Some(task.metadata),
                    status: Some(TaskStatus::Pending),
                    created_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Deterministic topological order over the workflow DAG.
    ///
    /// Sources are tasks without inputs; edges point from a producer to
    /// every task that declares one of its records. The iterative sort
    /// groups the descendants of a branch together before moving on to the
    /// next source, breaking ties by declaration order. A graph that leaves
    /// tasks unplaced is cyclic and rejected.
    pub fn sorted_tasks(workflow: &Workflow) -> Result<Vec<String>> {
        let mut sources: Vec<String> = Vec::new();
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();

        for task in &workflow.tasks {
            if task.inputs.is_empty() {
                sources.push(task.name.clone());
            } else {
                for input in task.inputs.values() {
                    let upstream = input.split('.').next().unwrap_or_default();
                    graph
                        .entry(upstream.to_string())
                        .or_default()
                        .push(task.name.clone());
                }
            }
        }

        let no_children: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = Vec::new();
        let mut order: Vec<String> = Vec::new();
        let mut queue: Vec<String> = sources;

        while let Some(current) = queue.pop() {
            if seen.insert(current.clone()) {
                queue.extend(graph.get(&current).cloned().unwrap_or_default());

                while let Some(top) = stack.last() {
                    let children = graph.get(top).unwrap_or(&no_children);
                    if children.contains(&current) {
                        break;
                    }
                    order.push(stack.pop().expect("stack top exists"));
                }
                stack.push(current);
            }
        }

        stack.extend(order.into_iter().rev());

        if stack.len() != workflow.tasks.len() {
            return Err(MaestroError::validation(
                "workflow graph contains a cycle",
            ));
        }

        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> Task {
        Task::new(name, "test")
    }

    fn task_with_inputs(name: &str, inputs: &[(&str, &str)]) -> Task {
        task(name).with_inputs(
            inputs
                .iter()
                .map(|(local, key)| (local.to_string(), key.to_string())),
        )
    }

    #[test]
    fn computes_dag_from_workflow() {
        let workflow = Workflow::with_tasks(vec![
            task("First"),
            task_with_inputs("Second", &[("Input", "First.Data")]),
            task_with_inputs("Third", &[("Input", "First.Data")]),
        ]);

        assert_eq!(
            Scheduler::sorted_tasks(&workflow).unwrap(),
            vec!["First", "Second", "Third"]
        );
    }

    #[test]
    fn computes_dag_with_multiple_sources() {
        let workflow = Workflow::with_tasks(vec![
            task("First"),
            task_with_inputs("Second", &[("Input", "First.Data")]),
            task_with_inputs("Three", &[("Input", "First.Data")]),
            task("Fourth"),
        ]);

        assert_eq!(
            Scheduler::sorted_tasks(&workflow).unwrap(),
            vec!["First", "Second", "Three", "Fourth"]
        );
    }

    #[test]
    fn computes_deeper_dag() {
        let workflow = Workflow::with_tasks(vec![
            task("First"),
            task("Second"),
            task_with_inputs("Third", &[("Input", "First.Data")]),
            task_with_inputs("Fourth", &[("Input", "First.Data")]),
            task_with_inputs("Fifth", &[("Input", "Third.Data")]),
            task_with_inputs("Sixth", &[("Input", "Fourth.Data")]),
            task_with_inputs("Seventh", &[("Input", "Fourth.Data")]),
        ]);

        assert_eq!(
            Scheduler::sorted_tasks(&workflow).unwrap(),
            vec!["First", "Third", "Fifth", "Fourth", "Sixth", "Seventh", "Second"]
        );
    }

    #[test]
    fn computes_dag_with_fan_in_across_branches() {
        let workflow = Workflow::with_tasks(vec![
            task("ComponentImportFile0"),
            task("ComponentImportFile1"),
            task_with_inputs("ComponentTrophPos0", &[("Input", "ComponentImportFile0.Data")]),
            task_with_inputs(
                "ComponentShapeFileCreator0",
                &[("Input", "ComponentTrophPos0.Data")],
            ),
            task_with_inputs(
                "ComponentSpatialViewer0",
                &[
                    ("Input1", "ComponentTrophPos0.Data"),
                    ("Input2", "ComponentShapeFileCreator0.Data"),
                ],
            ),
            task_with_inputs(
                "ComponentCopernicusLink0",
                &[
                    ("Input0", "ComponentTrophPos0.Data"),
                    ("Input1", "ComponentSpatialViewer0.Data"),
                ],
            ),
            task_with_inputs(
                "ComponentModeler0",
                &[
                    ("Input0", "ComponentTrophPos0.Data"),
                    ("Input1", "ComponentCopernicusLink0.Data"),
                    ("Input2", "ComponentImportFile1.Data"),
                ],
            ),
        ]);

        assert_eq!(
            Scheduler::sorted_tasks(&workflow).unwrap(),
            vec![
                "ComponentImportFile0",
                "ComponentTrophPos0",
                "ComponentShapeFileCreator0",
                "ComponentSpatialViewer0",
                "ComponentCopernicusLink0",
                "ComponentImportFile1",
                "ComponentModeler0",
            ]
        );
    }

    #[test]
    fn dependencies_always_precede_consumers() {
        let workflow = Workflow::with_tasks(vec![
            task("First"),
            task("Second"),
            task_with_inputs("Third", &[("Input", "First.Data")]),
            task_with_inputs("Fourth", &[("A", "Third.Data"), ("B", "Second.Data")]),
        ]);

        let sorted = Scheduler::sorted_tasks(&workflow).unwrap();
        let position =
            |name: &str| sorted.iter().position(|n| n == name).expect("task placed");

        assert!(position("First") < position("Third"));
        assert!(position("Third") < position("Fourth"));
        assert!(position("Second") < position("Fourth"));
    }

    #[test]
    fn cyclic_workflows_are_rejected() {
        let workflow = Workflow::with_tasks(vec![
            task("Seed"),
            task_with_inputs("Ping", &[("Input", "Pong.Data")]),
            task_with_inputs("Pong", &[("Input", "Ping.Data")]),
        ]);

        let err = Scheduler::sorted_tasks(&workflow).unwrap_err();
        assert!(matches!(err, MaestroError::Validation(_)));
    }
}
