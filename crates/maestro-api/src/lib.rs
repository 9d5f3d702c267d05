// Maestro API server

pub mod security;
pub mod workflow;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use maestro_core::models::{
    Resource, ResultFile, Task, TaskOptions, TaskRecord, TaskResult, TaskStatus, Workflow,
    WorkflowMetadata, WorkflowRecord, WorkflowStatus,
};
use maestro_core::secrets::SealedSecret;
use maestro_worker::Runtime;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflow::run,
        workflow::status,
        workflow::revoke,
        workflow::topic,
    ),
    components(
        schemas(
            Workflow, WorkflowRecord, WorkflowMetadata, WorkflowStatus,
            Task, TaskRecord, TaskStatus, TaskOptions, TaskResult,
            ResultFile, Resource, SealedSecret,
        )
    ),
    tags(
        (name = "workflow", description = "Workflow execution endpoints"),
        (name = "health", description = "Health check")
    ),
    info(
        title = "Maestro API",
        description = "Distributed workflow orchestrator",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    // swagger and the openapi document sit behind the API-key guard
    let docs = Router::new()
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::require_api_key,
        ));

    let router = Router::new()
        .route("/api/health", get(health))
        .nest("/api/v2/workflow", workflow::routes(state.clone()))
        .merge(docs)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let root_path = state.runtime.settings.root_path.clone();
    if root_path.is_empty() {
        router
    } else {
        // for applications sub-mounted below a given URL path
        Router::new().nest(&root_path, router)
    }
}

/// Bind and serve the API until the process is stopped.
pub async fn serve(runtime: Arc<Runtime>) -> Result<()> {
    let address = format!(
        "{}:{}",
        runtime.settings.api_host, runtime.settings.api_port
    );
    let state = AppState { runtime };

    tracing::info!("deploying server at http://{address}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
