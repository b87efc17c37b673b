//! HTTP probe surface: liveness plus read-only task views.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use llm_eval_core::{CoreError, TaskId, TaskProgress};
use llm_eval_workflow::Processor;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<dyn Processor>,
}

pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidState(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            err => {
                tracing::error!(error = %err, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks/:id/progress", get(task_progress))
        .route("/tasks/:id/report", get(task_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state.processor.health_check().await;
    let stats = state.processor.stats();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "dispatched": stats.dispatched,
            "completed": stats.completed,
            "failed": stats.failed,
            "last_activity": stats.last_activity,
        })),
    )
}

async fn task_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskProgress>, ApiError> {
    let progress = state.processor.task_progress(&TaskId::from(id)).await?;
    Ok(Json(progress))
}

async fn task_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.processor.core().score_report(&TaskId::from(id)).await?;
    Ok(Json(report))
}
