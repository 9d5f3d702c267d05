// Workflow HTTP routes

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use maestro_core::error::MaestroError;
use maestro_core::models::{Workflow, WorkflowRecord};
use maestro_worker::Scheduler;

use crate::AppState;

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/status", get(status))
        .route("/revoke", post(revoke))
        .route("/topic", post(topic))
        .with_state(state)
}

fn error_status(err: &MaestroError) -> StatusCode {
    match err {
        MaestroError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct IdParams {
    /// Workflow id.
    pub id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TopicParams {
    /// Workflow id.
    pub id: String,
    /// Component (task) name the message is addressed to.
    pub component: String,
    /// Raw message payload.
    pub message: String,
}

/// POST /api/v2/workflow/run - Execute a workflow
#[utoipa::path(
    post,
    path = "/api/v2/workflow/run",
    request_body = Workflow,
    responses(
        (status = 200, description = "Workflow accepted and scheduled", body = WorkflowRecord),
        (status = 400, description = "Workflow breaks a validation invariant"),
        (status = 500, description = "Internal server error")
    ),
    tag = "workflow"
)]
pub async fn run(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    tracing::info!("received workflow request");

    let scheduler = Scheduler::new(state.runtime.clone());
    let record = scheduler.run(workflow).await.map_err(|err| {
        tracing::error!("failed to schedule workflow: {err}");
        error_status(&err)
    })?;

    Ok(Json(record))
}

/// GET /api/v2/workflow/status - Workflow execution status
#[utoipa::path(
    get,
    path = "/api/v2/workflow/status",
    params(IdParams),
    responses(
        (status = 200, description = "Workflow with its tasks populated", body = WorkflowRecord),
        (status = 404, description = "Workflow not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "workflow"
)]
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    let scheduler = Scheduler::new(state.runtime.clone());
    let workflow = scheduler.status(&params.id).await.map_err(|err| {
        tracing::error!("failed to look up workflow: {err}");
        error_status(&err)
    })?;

    match workflow {
        Some(workflow) => {
            tracing::info!(workflow_id = %params.id, "found workflow");
            Ok(Json(workflow))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// POST /api/v2/workflow/revoke - Cancel a workflow execution
#[utoipa::path(
    post,
    path = "/api/v2/workflow/revoke",
    params(IdParams),
    responses(
        (status = 200, description = "Workflow marked revoked", body = WorkflowRecord),
        (status = 404, description = "Workflow not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "workflow"
)]
pub async fn revoke(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    let workflow = state
        .runtime
        .db
        .find_workflow(&params.id)
        .await
        .map_err(|err| {
            tracing::error!("failed to look up workflow: {err}");
            error_status(&err)
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    if workflow.is_revoked {
        return Ok(Json(workflow));
    }

    let scheduler = Scheduler::new(state.runtime.clone());
    let workflow = scheduler.revoke(&params.id).await.map_err(|err| {
        tracing::error!("failed to revoke workflow: {err}");
        error_status(&err)
    })?;

    Ok(Json(workflow))
}

/// POST /api/v2/workflow/topic - Publish a message on a component's topic
///
/// Useful for components that read from their own topic to allow
/// interactivity from the user.
#[utoipa::path(
    post,
    path = "/api/v2/workflow/topic",
    params(TopicParams),
    responses(
        (status = 200, description = "Message published"),
        (status = 500, description = "Internal server error")
    ),
    tag = "workflow"
)]
pub async fn topic(
    State(state): State<AppState>,
    Query(params): Query<TopicParams>,
) -> Result<StatusCode, StatusCode> {
    let topic = format!("{}-{}", params.id, params.component);

    let producer = state.runtime.producer().map_err(|err| {
        tracing::error!("could not create producer: {err}");
        error_status(&err)
    })?;
    producer
        .send_unkeyed(&topic, params.message.as_bytes())
        .await
        .map_err(|err| {
            tracing::error!("could not publish to `{topic}`: {err}");
            error_status(&err)
        })?;

    Ok(StatusCode::OK)
}
