//! HTTP status surface.
//!
//! Mostly read-only views over the scheduler, plus task submission and
//! cancellation for manual operation.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Default number of history entries returned by `GET /tasks`.
const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct HttpState {
    pub scheduler: Arc<Scheduler>,
}

/// Build the router.
pub fn routes(scheduler: Arc<Scheduler>) -> Router {
    let state = HttpState { scheduler };

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/tasks", get(list_tasks).post(submit_task))
        .route("/tasks/{id}", get(get_task).delete(cancel_task))
        .with_state(state)
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let (code, label) = if state.scheduler.is_running() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped")
    };
    (
        code,
        Json(serde_json::json!({
            "status": label,
            "service": "tasknode"
        })),
    )
}

async fn status(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    history: Option<usize>,
}

async fn list_tasks(
    State(state): State<HttpState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let limit = query.history.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let active = state.scheduler.active_tasks().await;
    let history = state.scheduler.history(Some(limit)).await;
    Json(serde_json::json!({
        "active": active,
        "history": history,
    }))
}

async fn get_task(State(state): State<HttpState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.scheduler.task(&id).await {
        Some(record) => (StatusCode::OK, Json(serde_json::json!(record))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        ),
    }
}

async fn submit_task(
    State(state): State<HttpState>,
    Json(mut task): Json<Task>,
) -> impl IntoResponse {
    if task.id.trim().is_empty() {
        task.id = Uuid::new_v4().to_string();
    }
    let id = task.id.clone();
    let priority = task.priority;

    match state.scheduler.schedule_task(task, priority).await {
        Ok(()) => {
            info!(task_id = %id, "Task submitted over HTTP");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({"id": id, "status": "pending"})),
            )
        }
        Err(e) => {
            debug!(task_id = %id, error = %e, "HTTP submission rejected");
            (
                rejection_status(&e),
                Json(serde_json::json!({"id": id, "error": e.to_string()})),
            )
        }
    }
}

async fn cancel_task(State(state): State<HttpState>, Path(id): Path<String>) -> impl IntoResponse {
    if state.scheduler.task(&id).await.is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        );
    }

    let cancelled = state.scheduler.cancel_task(&id).await;
    let record = state.scheduler.task(&id).await;
    (
        StatusCode::OK,
        Json(serde_json::json!({"id": id, "cancelled": cancelled, "task": record})),
    )
}

fn rejection_status(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::MalformedTask { .. } | SchedulerError::UnknownTaskType { .. } => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::DuplicateTask { .. } => StatusCode::CONFLICT,
        SchedulerError::InsufficientResources
        | SchedulerError::ResourcePressure
        | SchedulerError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes() {
        assert_eq!(
            rejection_status(&SchedulerError::DuplicateTask { id: "t".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            rejection_status(&SchedulerError::UnknownTaskType {
                task_type: "pdf".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            rejection_status(&SchedulerError::InsufficientResources),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
