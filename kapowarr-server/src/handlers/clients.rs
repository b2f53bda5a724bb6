//! `/externalclients*`: download client configuration.

use axum::extract::{Path, State};
use axum::Json;
use kapowarr_core::download::clients::{
    client_options, TransmissionClient,
};
use kapowarr_core::KapowarrError;
use kapowarr_model::ClientId;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiError, ApiResult};
use crate::state::AppState;

pub async fn options(
    State(_state): State<AppState>,
) -> Json<serde_json::Value> {
    let options: Vec<serde_json::Value> = client_options()
        .into_iter()
        .map(|(client_type, download_type)| {
            json!({
                "client_type": client_type,
                "download_type": download_type,
            })
        })
        .collect();
    ok_response(options)
}

#[derive(Debug, Deserialize)]
pub struct TestClientBody {
    pub client_type: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub async fn test(
    State(state): State<AppState>,
    Json(body): Json<TestClientBody>,
) -> ApiResult<Json<serde_json::Value>> {
    match body.client_type.as_str() {
        "Transmission" => {
            TransmissionClient::test(
                &state.app.session,
                &body.base_url,
                body.username.as_deref(),
                body.password.as_deref(),
            )
            .await?;
        }
        other => {
            return Err(ApiError(KapowarrError::ExternalClientNotWorking(
                format!("unknown client type {other}"),
            )));
        }
    }
    Ok(ok_response(json!({})))
}

pub async fn list(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.clients().fetch_all().await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AddClientBody {
    pub client_type: String,
    pub title: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
}

pub async fn add(
    State(state): State<AppState>,
    Json(body): Json<AddClientBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let download_type = client_options()
        .into_iter()
        .find(|(client_type, _)| *client_type == body.client_type)
        .map(|(_, download_type)| download_type)
        .ok_or_else(|| {
            ApiError(KapowarrError::ExternalClientNotWorking(format!(
                "unknown client type {}",
                body.client_type
            )))
        })?;

    let id = state
        .app
        .database
        .clients()
        .add(
            &body.client_type,
            download_type,
            &body.title,
            &body.base_url,
            body.username.as_deref(),
            body.password.as_deref(),
            body.api_token.as_deref(),
        )
        .await?;
    Ok(ok_response(json!({ "id": id })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.clients().fetch_one(id).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientBody {
    pub title: Option<String>,
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
    Json(body): Json<UpdateClientBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let clients = state.app.database.clients();
    let mut client = clients.fetch_one(id).await?;
    if let Some(title) = body.title {
        client.title = title;
    }
    if let Some(base_url) = body.base_url {
        client.base_url = base_url;
    }
    if body.username.is_some() {
        client.username = body.username;
    }
    if body.password.is_some() {
        client.password = body.password;
    }
    if body.api_token.is_some() {
        client.api_token = body.api_token;
    }
    clients.update(&client).await?;
    Ok(ok_response(client))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<ClientId>,
) -> ApiResult<Json<serde_json::Value>> {
    // A client that still owns queued downloads can not go.
    if state
        .app
        .database
        .downloads()
        .client_has_downloads(id)
        .await?
    {
        return Err(ApiError(KapowarrError::ClientDownloading(id)));
    }
    state.app.database.clients().delete(id).await?;
    Ok(ok_response(json!({})))
}
