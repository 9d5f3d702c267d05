// Worker actor: drives one task end-to-end.
//
// Each delivery goes through the same stages: unseal secrets, gate on
// upstream task states, build the process context, resolve the component,
// run it under the job time limit, and record the outcome. Every task state
// transition re-derives the parent workflow's aggregate status.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use maestro_bus::{Delivery, Job};
use maestro_core::config::Settings;
use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{Task, TaskResult, TaskStatus, WorkflowRecord, WorkflowStatus};
use maestro_storage::{get_available_storage, TaskPatch, WorkflowPatch};

use crate::process::Process;
use crate::runtime::Runtime;

/// Pause before handing a gated job back to the queue, so a lone worker
/// does not spin on a task whose upstreams are still pending.
const REQUEUE_DELAY: Duration = Duration::from_secs(1);

pub struct Worker {
    runtime: Arc<Runtime>,
}

impl Worker {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Attach `processes` concurrent consumers to the default queue and run
    /// until a shutdown signal arrives.
    pub async fn run(&self, processes: usize) -> Result<()> {
        let queue_name = self.runtime.settings.default_actor_opts.queue_name.clone();
        tracing::info!(queue = %queue_name, processes, "worker attached to queue");

        let mut handles = Vec::new();
        for index in 0..processes.max(1) {
            let runtime = self.runtime.clone();
            let queue_name = queue_name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = consume_loop(runtime, &queue_name, index).await {
                    tracing::error!("consumer {index} stopped: {err}");
                }
            }));
        }

        tokio::signal::ctrl_c()
            .await
            .map_err(anyhow::Error::from)?;
        tracing::info!("shutdown signal received, stopping consumers");

        for handle in handles {
            handle.abort();
        }
        Ok(())
    }
}

async fn consume_loop(runtime: Arc<Runtime>, queue_name: &str, index: usize) -> Result<()> {
    let consumer_tag = format!("maestro-worker-{index}");
    let mut consumer = runtime.queue.consume(queue_name, &consumer_tag).await?;

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::error!("broken delivery: {err}");
                continue;
            }
        };

        if let Err(err) = handle_delivery(&runtime, &delivery).await {
            tracing::error!("task handling failed: {err}");
        }

        // at-least-once: the job is acked whatever its outcome; failures
        // are recorded in the state store, not redelivered by the broker
        if let Err(err) = runtime.queue.ack(delivery.delivery_tag).await {
            tracing::error!("could not ack delivery: {err}");
        }
    }

    Ok(())
}

async fn handle_delivery(runtime: &Arc<Runtime>, delivery: &Delivery) -> Result<()> {
    let task_id = delivery
        .properties
        .message_id()
        .clone()
        .map(|id| id.to_string())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let job: Job = serde_json::from_slice(&delivery.data)
        .map_err(|e| MaestroError::queue(format!("could not decode job: {e}")))?;

    tracing::info!(task_id, task = %job.task.name, workflow = %job.workflow_id, "processing task");
    process_job(runtime, &task_id, job).await
}

fn queue_for(task: &Task, settings: &Settings) -> String {
    task.options
        .queue_name
        .clone()
        .unwrap_or_else(|| settings.default_actor_opts.queue_name.clone())
}

async fn process_job(runtime: &Arc<Runtime>, task_id: &str, job: Job) -> Result<()> {
    let task = job.task.clone();
    let workflow_id = job.workflow_id.clone();

    let mut unsealed = Vec::new();
    if !task.secrets.is_empty() {
        let sk = runtime.settings.secrets_sk_key.as_deref().ok_or_else(|| {
            MaestroError::config("SECRETS_SK_KEY is required to unseal task secrets")
        })?;
        for secret in &task.secrets {
            unsealed.push(secret.unseal(sk)?);
        }
    }

    // The queue is at-least-once; a job whose task already reached a
    // terminal state is a duplicate delivery and is dropped.
    if let Some(row) = runtime.db.find_task(task_id).await? {
        if row.status.is_terminal() {
            tracing::warn!(task_id, "task already in a terminal state, dropping duplicate job");
            return Ok(());
        }
    }

    // Dependency gate: while any upstream task is still pending there is no
    // point executing this one; hand it back to the queue under its own id.
    let rows = runtime.db.find_tasks(&workflow_id).await?;
    if rows.is_empty() {
        return Err(MaestroError::state(format!(
            "tasks for workflow `{workflow_id}` not found"
        )));
    }
    let upstream: HashSet<&str> = task.upstream_tasks().into_iter().collect();
    let upstream_pending = rows
        .iter()
        .any(|row| upstream.contains(row.name.as_str()) && row.status == TaskStatus::Pending);
    if upstream_pending {
        tracing::debug!(task_id, "upstream tasks still pending, re-enqueueing");
        tokio::time::sleep(REQUEUE_DELAY).await;
        let queue_name = queue_for(&task, &runtime.settings);
        runtime
            .queue
            .enqueue(&queue_name, &job, Some(task_id.to_string()))
            .await?;
        return Ok(());
    }

    // The bucket folder is shared across the workflow's tasks.
    let author = task
        .metadata
        .get("author")
        .and_then(Value::as_str)
        .unwrap_or("anonymous");
    let folder = format!("{workflow_id}/{}", task.name);
    let storage = get_available_storage(&runtime.settings, author, &folder)?;

    let process = Process::new(
        runtime.clone(),
        &task.name,
        &task.module,
        &workflow_id,
        task.params.clone(),
        task.inputs.clone(),
        unsealed,
        storage,
    )
    .await?;

    process.debug(format!("Running task {task_id} with name {}", task.name));

    let force_interruption = task.options.on_fail_force_interruption;
    let remove_local_dir = task.options.on_fail_remove_local_dir;

    process.debug(format!("Resolving component {}", task.module));
    let component = match runtime.registry.get(&task.module) {
        Ok(component) => component,
        Err(err) => {
            process.error(err.to_string());
            close_quietly(&process, force_interruption, false).await;
            return fail_or_retry(runtime, task_id, job, err).await;
        }
    };

    set_running(runtime, task_id).await?;

    let time_limit = runtime.settings.default_actor_opts.time_limit;
    let outcome = match tokio::time::timeout(
        Duration::from_millis(time_limit),
        component.execute(&process),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(MaestroError::TimeLimitExceeded(time_limit)),
    };

    match outcome {
        Ok(mut result) => {
            process.info(format!("Task {task_id} successfully executed"));
            match process.close(false, false).await {
                Ok(log) => {
                    result.log = Some(log);
                    set_success(runtime, task_id, result).await?;
                    Ok(())
                }
                Err(err) => {
                    process.error(format!("could not close process context: {err}"));
                    fail_or_retry(runtime, task_id, job, err).await
                }
            }
        }
        Err(err) => {
            process.error("Task execution raised an error:");
            process.error(err.to_string());

            // stream-protocol failures keep the scratch dir for debugging
            let keep_dir = matches!(
                err,
                MaestroError::UpstreamInterrupted | MaestroError::MissingInputs(_)
            );
            close_quietly(&process, force_interruption, remove_local_dir && !keep_dir).await;
            fail_or_retry(runtime, task_id, job, err).await
        }
    }
}

/// Best-effort close on a failure path; the original error wins over any
/// close error.
async fn close_quietly(process: &Process, force_interruption: bool, remove_local_dir: bool) {
    if let Err(err) = process.close(force_interruption, remove_local_dir).await {
        tracing::warn!("could not close process context: {err}");
    }
}

/// Either push the job back for another attempt or persist the failure.
async fn fail_or_retry(
    runtime: &Arc<Runtime>,
    task_id: &str,
    job: Job,
    err: MaestroError,
) -> Result<()> {
    let max_retries = runtime.settings.default_actor_opts.max_retries;
    if job.retries < max_retries {
        let retried = Job {
            retries: job.retries + 1,
            ..job
        };
        tracing::warn!(
            task_id,
            retry = retried.retries,
            max_retries,
            "task failed, retrying: {err}"
        );
        runtime
            .db
            .upsert_task(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Pending),
                    updated_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        let queue_name = queue_for(&retried.task, &runtime.settings);
        runtime
            .queue
            .enqueue(&queue_name, &retried, Some(task_id.to_string()))
            .await?;
        return Ok(());
    }

    set_failure(runtime, task_id, &err.to_string()).await?;
    Err(err)
}

async fn set_running(runtime: &Runtime, task_id: &str) -> Result<()> {
    let task = runtime
        .db
        .upsert_task(
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Running),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
    set_workflow_run_state(runtime, &task.parent).await?;
    Ok(())
}

async fn set_success(runtime: &Runtime, task_id: &str, result: TaskResult) -> Result<()> {
    let task = runtime
        .db
        .upsert_task(
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Done),
                result: Some(result),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
    set_workflow_run_state(runtime, &task.parent).await?;
    Ok(())
}

async fn set_failure(runtime: &Runtime, task_id: &str, message: &str) -> Result<()> {
    let task = runtime
        .db
        .upsert_task(
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Failed),
                result: Some(TaskResult::with_message(message)),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
    set_workflow_run_state(runtime, &task.parent).await?;
    Ok(())
}

/// Recompute and persist a workflow's aggregate status from its tasks.
pub async fn set_workflow_run_state(runtime: &Runtime, workflow_id: &str) -> Result<WorkflowRecord> {
    let workflow = runtime
        .db
        .find_workflow(workflow_id)
        .await?
        .ok_or_else(|| MaestroError::state(format!("workflow `{workflow_id}` not found")))?;
    let tasks = runtime.db.find_tasks(workflow_id).await?;

    let statuses: Vec<TaskStatus> = tasks.iter().map(|t| t.status).collect();
    let status = derive_workflow_status(workflow.is_revoked, &statuses);

    runtime
        .db
        .upsert_workflow(
            workflow_id,
            WorkflowPatch {
                status: Some(status),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
}

/// The workflow status as a pure function of revocation and task statuses.
pub fn derive_workflow_status(is_revoked: bool, statuses: &[TaskStatus]) -> WorkflowStatus {
    let all = |wanted: TaskStatus| statuses.iter().all(|s| *s == wanted);
    let any = |wanted: TaskStatus| statuses.iter().any(|s| *s == wanted);

    if is_revoked {
        WorkflowStatus::Revoked
    } else if all(TaskStatus::Done) {
        WorkflowStatus::Done
    } else if any(TaskStatus::Failed) {
        WorkflowStatus::Failed
    } else if all(TaskStatus::Pending) {
        WorkflowStatus::Pending
    } else if any(TaskStatus::Pending) && !any(TaskStatus::Failed) {
        WorkflowStatus::Pending
    } else if any(TaskStatus::Running) && !any(TaskStatus::Failed) {
        WorkflowStatus::Running
    } else {
        WorkflowStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn revocation_wins_over_everything() {
        assert_eq!(
            derive_workflow_status(true, &[Done, Done]),
            WorkflowStatus::Revoked
        );
        assert_eq!(
            derive_workflow_status(true, &[Failed]),
            WorkflowStatus::Revoked
        );
    }

    #[test]
    fn all_done_means_done() {
        assert_eq!(
            derive_workflow_status(false, &[Done, Done, Done]),
            WorkflowStatus::Done
        );
    }

    #[test]
    fn any_failed_means_failed() {
        assert_eq!(
            derive_workflow_status(false, &[Done, Failed, Running]),
            WorkflowStatus::Failed
        );
    }

    #[test]
    fn all_pending_means_pending() {
        assert_eq!(
            derive_workflow_status(false, &[Pending, Pending]),
            WorkflowStatus::Pending
        );
    }

    #[test]
    fn pending_remainder_without_failure_means_pending() {
        assert_eq!(
            derive_workflow_status(false, &[Done, Pending, Running]),
            WorkflowStatus::Pending
        );
    }

    #[test]
    fn running_without_pending_or_failure_means_running() {
        assert_eq!(
            derive_workflow_status(false, &[Done, Running]),
            WorkflowStatus::Running
        );
    }

    #[test]
    fn anything_else_is_unknown() {
        assert_eq!(
            derive_workflow_status(false, &[Done, Unknown]),
            WorkflowStatus::Unknown
        );
    }
}
