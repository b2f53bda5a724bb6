//! `/rootfolder*`: root folder CRUD.

use axum::extract::{Path, State};
use axum::Json;
use kapowarr_model::RootFolderId;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(state.app.root_folders.get_all().await?))
}

#[derive(Debug, Deserialize)]
pub struct AddRootFolderBody {
    pub folder: String,
}

pub async fn add(
    State(state): State<AppState>,
    Json(body): Json<AddRootFolderBody>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.root_folders.add(&body.folder).await?,
    ))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<RootFolderId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(state.app.root_folders.get_one(id).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<RootFolderId>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.root_folders.delete(id).await?;
    Ok(ok_response(json!({})))
}
