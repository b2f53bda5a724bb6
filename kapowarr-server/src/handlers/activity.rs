//! `/activity/*`: the download queue, download history and the download
//! folder contents.

use axum::extract::{Path, Query, State};
use axum::Json;
use kapowarr_model::DownloadId;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::handlers::system::PageQuery;
use crate::state::AppState;

pub async fn queue(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    ok_response(state.app.downloads.list())
}

pub async fn queue_entry(
    State(state): State<AppState>,
    Path(id): Path<DownloadId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(state.app.downloads.get(id)?))
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub index: usize,
}

/// `PUT /activity/queue/{id}`: move the download to another position.
pub async fn move_queue_entry(
    State(state): State<AppState>,
    Path(id): Path<DownloadId>,
    Json(body): Json<MoveBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.downloads.move_position(id, body.index)?;
    Ok(ok_response(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQueueQuery {
    #[serde(default)]
    pub blocklist: bool,
}

pub async fn delete_queue_entry(
    State(state): State<AppState>,
    Path(id): Path<DownloadId>,
    Query(query): Query<DeleteQueueQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.downloads.remove(id, query.blocklist).await?;
    Ok(ok_response(json!({})))
}

pub async fn history(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let history = state
        .app
        .database
        .downloads()
        .fetch_history(page.offset, 50)
        .await?;
    Ok(ok_response(history))
}

pub async fn clear_history(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.database.downloads().clear_history().await?;
    Ok(ok_response(json!({})))
}

/// `GET /activity/folder`: what is currently in the download scratch
/// folder.
pub async fn folder(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let download_folder = state.app.settings.get().download_folder;
    let files =
        kapowarr_core::fs_util::list_files(&download_folder, &[]);
    ok_response(files)
}
