use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use super::{fail, ok, ok_message, ApiResult};
use crate::models::Task;
use crate::scheduler::validate_cron;
use crate::state::AppState;

fn validate_task(task: &Task) -> Result<(), String> {
    if task.name.is_empty() || task.local_path.is_empty() {
        return Err("Tasks need a name and a local path".to_string());
    }
    if !validate_cron(&task.cron) {
        return Err(format!(
            "Cron expression '{}' is not valid in either the 5- or 6-field dialect",
            task.cron
        ));
    }
    Ok(())
}

/// List all tasks, each decorated with its running state
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    responses((status = 200, description = "Tasks in descending id order")),
    security(("bearerAuth" = [])),
    tag = "tasks"
)]
pub async fn list_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let tasks = state.store.list_tasks().map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list tasks: {}", err),
        )
    })?;

    let decorated: Vec<serde_json::Value> = tasks
        .into_iter()
        .map(|task| {
            let is_running = state.scheduler.is_running(task.id);
            let mut value = serde_json::to_value(&task).unwrap_or_default();
            if let Some(object) = value.as_object_mut() {
                object.insert("isRunning".to_string(), json!(is_running));
            }
            value
        })
        .collect();

    Ok(ok(decorated))
}

/// Create a task
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    request_body = Task,
    responses(
        (status = 200, description = "Task created"),
        (status = 400, description = "Validation failed")
    ),
    security(("bearerAuth" = [])),
    tag = "tasks"
)]
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    Json(mut task): Json<Task>,
) -> ApiResult {
    validate_task(&task).map_err(|msg| fail(StatusCode::BAD_REQUEST, msg))?;

    state
        .store
        .account(task.account_id)
        .map_err(|_| fail(StatusCode::BAD_REQUEST, "Owning account does not exist"))?;

    let id = state.store.create_task(&task).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to create task: {}", err),
        )
    })?;
    task.id = id;
    state.scheduler.refresh();
    Ok(ok(task))
}

/// Update a task
#[utoipa::path(
    put,
    path = "/api/v1/tasks/{id}",
    params(("id" = i64, Path, description = "Task id")),
    request_body = Task,
    responses(
        (status = 200, description = "Task updated"),
        (status = 404, description = "Unknown task")
    ),
    security(("bearerAuth" = [])),
    tag = "tasks"
)]
pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut task): Json<Task>,
) -> ApiResult {
    state
        .store
        .task(id)
        .map_err(|_| fail(StatusCode::NOT_FOUND, "Task not found"))?;
    validate_task(&task).map_err(|msg| fail(StatusCode::BAD_REQUEST, msg))?;

    task.id = id;
    state.store.update_task(&task).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to update task: {}", err),
        )
    })?;
    state.scheduler.refresh();
    Ok(ok(task))
}

/// Delete a task, its manifest rows included
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{id}",
    params(("id" = i64, Path, description = "Task id")),
    responses((status = 200, description = "Task deleted")),
    security(("bearerAuth" = [])),
    tag = "tasks"
)]
pub async fn delete_handler(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    state.scheduler.stop(id);
    if let Err(err) = state.store.delete_manifest_for_task(id) {
        log::error!("Failed to drop manifest of task {}: {}", id, err);
    }
    state.store.delete_task(id).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to delete task: {}", err),
        )
    })?;
    state.scheduler.refresh();
    Ok(ok_message("Task deleted"))
}

/// Run a task now
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/run",
    params(("id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "Run accepted"),
        (status = 404, description = "Unknown task"),
        (status = 409, description = "Task already running")
    ),
    security(("bearerAuth" = [])),
    tag = "tasks"
)]
pub async fn run_handler(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    let task = state
        .store
        .task(id)
        .map_err(|_| fail(StatusCode::NOT_FOUND, "Task not found"))?;

    let name = task.name.clone();
    if state.scheduler.run_manual(task) {
        Ok(ok_message(format!("Task '{}' started in the background", name)))
    } else {
        Err(fail(
            StatusCode::CONFLICT,
            format!("Task '{}' is already running", name),
        ))
    }
}

/// Stop a running task
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/stop",
    params(("id" = i64, Path, description = "Task id")),
    responses((status = 200, description = "Stop signal sent")),
    security(("bearerAuth" = [])),
    tag = "tasks"
)]
pub async fn stop_handler(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    state.scheduler.stop(id);
    Ok(ok_message(format!("Stop signal sent to task #{}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::sample_task;

    #[test]
    fn test_validate_task_accepts_both_cron_dialects() {
        let mut task = sample_task("shows", 1);
        task.cron = "0 30 3 * * *".to_string();
        assert!(validate_task(&task).is_ok());
        task.cron = "30 3 * * *".to_string();
        assert!(validate_task(&task).is_ok());
    }

    #[test]
    fn test_validate_task_rejects_bad_cron() {
        let mut task = sample_task("shows", 1);
        task.cron = "every tuesday".to_string();
        assert!(validate_task(&task).is_err());
    }

    #[test]
    fn test_validate_task_requires_name_and_path() {
        let mut task = sample_task("", 1);
        assert!(validate_task(&task).is_err());
        task.name = "shows".to_string();
        task.local_path = String::new();
        assert!(validate_task(&task).is_err());
    }
}
