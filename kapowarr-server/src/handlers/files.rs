//! `/files/{id}`: file row lookup.

use axum::extract::{Path, State};
use axum::Json;
use kapowarr_model::FileId;

use crate::errors::{ok_response, ApiResult};
use crate::state::AppState;

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<FileId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.files().fetch_by_id(id).await?,
    ))
}
