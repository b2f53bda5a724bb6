//! `/settings*`: reading and updating the runtime settings.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::state::AppState;

pub async fn get_settings(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    ok_response(state.app.settings.get())
}

/// `PUT /settings` takes a flat map of setting keys to string values.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<HashMap<String, String>>,
) -> ApiResult<Json<serde_json::Value>> {
    for (key, value) in &body {
        if key == "auth_password" {
            state.app.settings.set_auth_password(value).await?;
            continue;
        }
        state.app.settings.update_key(key, value).await?;

        // The challenge solver follows its setting immediately.
        if key == "flaresolverr_base_url" {
            state
                .app
                .solver
                .set_base_url((!value.is_empty()).then(|| value.clone()));
        }
    }
    Ok(ok_response(state.app.settings.get()))
}

pub async fn regenerate_api_key(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let api_key = state.app.settings.generate_api_key().await?;
    Ok(ok_response(json!({ "api_key": api_key })))
}

pub async fn available_formats(
    State(_state): State<AppState>,
) -> Json<serde_json::Value> {
    ok_response(kapowarr_core::conversion::available_formats())
}
