//! `/credentials*`: stored credentials for download sources.

use axum::extract::{Path, State};
use axum::Json;
use kapowarr_model::{CredentialData, CredentialId, DownloadSource};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.clients().fetch_credentials().await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AddCredentialBody {
    pub source: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
}

pub async fn add(
    State(state): State<AppState>,
    Json(body): Json<AddCredentialBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = state
        .app
        .database
        .clients()
        .add_credential(&CredentialData {
            id: CredentialId(0),
            source: DownloadSource(body.source),
            username: body.username,
            email: body.email,
            password: body.password,
            api_key: body.api_key,
        })
        .await?;
    Ok(ok_response(json!({ "id": id })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<CredentialId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.clients().fetch_credential(id).await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<CredentialId>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.database.clients().delete_credential(id).await?;
    Ok(ok_response(json!({})))
}
