//! `/blocklist*`: the blocked-link list.

use axum::extract::{Path, State};
use axum::Json;
use kapowarr_core::db::blocklist::BlocklistInput;
use kapowarr_model::{BlocklistEntryId, BlocklistReason};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.blocklist().fetch_all().await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AddBlocklistBody {
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub download_link: Option<String>,
}

pub async fn add(
    State(state): State<AppState>,
    Json(body): Json<AddBlocklistBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .app
        .database
        .blocklist()
        .add(
            &BlocklistInput {
                web_link: body.web_link,
                web_title: body.web_title,
                download_link: body.download_link,
                ..Default::default()
            },
            BlocklistReason::AddedByUser,
        )
        .await?;
    Ok(ok_response(json!({})))
}

pub async fn clear(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.database.blocklist().clear().await?;
    Ok(ok_response(json!({})))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<BlocklistEntryId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.blocklist().fetch_one(id).await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<BlocklistEntryId>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.database.blocklist().delete(id).await?;
    Ok(ok_response(json!({})))
}
