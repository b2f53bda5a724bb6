//! `/system/*`: about info, the task queue, task history and planning,
//! and the power endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use kapowarr_core::tasks::TaskAction;
use kapowarr_core::KapowarrError;
use kapowarr_model::{IssueId, TaskId, VolumeId};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiError, ApiResult};
use crate::state::{AppState, PowerAction};

pub async fn about(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    ok_response(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "data_folder": state.config.data_folder,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
}

/// `GET /system/logs`: the tail of the configured log file.
pub async fn logs(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let log_file = state
        .config
        .log_file
        .clone()
        .ok_or(ApiError(KapowarrError::LogFileNotFound))?;
    let content = tokio::fs::read_to_string(&log_file)
        .await
        .map_err(|_| ApiError(KapowarrError::LogFileNotFound))?;

    let lines: Vec<&str> = content.lines().collect();
    let tail: Vec<&str> =
        lines.iter().rev().take(500).rev().copied().collect();
    Ok(ok_response(tail))
}

pub async fn list_tasks(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    ok_response(state.app.tasks.list())
}

#[derive(Debug, Deserialize)]
pub struct AddTaskBody {
    pub action: String,
    pub volume_id: Option<VolumeId>,
    pub issue_id: Option<IssueId>,
}

fn action_from_request(body: &AddTaskBody) -> Option<TaskAction> {
    match (body.action.as_str(), body.volume_id) {
        ("update_all", _) => Some(TaskAction::UpdateAll),
        ("search_all", _) => Some(TaskAction::SearchAll),
        ("refresh_and_scan", Some(volume_id)) => {
            Some(TaskAction::RefreshAndScan(volume_id))
        }
        ("auto_search", Some(volume_id)) => Some(TaskAction::AutoSearch {
            volume_id,
            issue_id: body.issue_id,
        }),
        ("mass_rename", Some(volume_id)) => Some(TaskAction::MassRename {
            volume_id,
            issue_id: body.issue_id,
        }),
        ("mass_convert", Some(volume_id)) => Some(TaskAction::MassConvert {
            volume_id,
            issue_id: body.issue_id,
        }),
        _ => None,
    }
}

pub async fn add_task(
    State(state): State<AppState>,
    Json(body): Json<AddTaskBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let action = action_from_request(&body).ok_or(ApiError(
        KapowarrError::InvalidKeyValue {
            key: "action".to_string(),
            value: body.action.clone(),
        },
    ))?;
    let id = state.app.tasks.add(action, "api");
    Ok(ok_response(json!({ "id": id })))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(state.app.tasks.get(id)?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteTaskQuery {
    /// Cancel a running task cooperatively instead of deleting a queued
    /// one.
    #[serde(default)]
    pub cancel: bool,
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Query(query): Query<DeleteTaskQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if query.cancel {
        state.app.tasks.cancel(id)?;
    } else {
        state.app.tasks.delete(id)?;
    }
    Ok(ok_response(json!({})))
}

pub async fn task_history(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let history = state
        .app
        .database
        .task_store()
        .fetch_history(page.offset, 50)
        .await?;
    Ok(ok_response(history))
}

pub async fn clear_task_history(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.database.task_store().clear_history().await?;
    Ok(ok_response(json!({})))
}

pub async fn task_planning(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(state.app.tasks.planning().await?))
}

pub async fn shutdown(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let _ = state.power.send(PowerAction::Shutdown).await;
    ok_response(json!({}))
}

pub async fn restart(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let _ = state.power.send(PowerAction::Restart).await;
    ok_response(json!({}))
}
