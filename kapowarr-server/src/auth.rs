//! API key authentication. Every request below the API prefix must
//! present the key, in the `X-Api-Key` header or the `api_key` query
//! parameter; `/auth` itself is the only exception.

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "ApiKeyInvalid", "result": {} })),
    )
        .into_response()
}

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.app.settings.get().api_key;

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let query_key = Query::<ApiKeyQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|query| query.0.api_key);

    let presented = header_key.or(query_key);
    match presented {
        Some(key) if !expected.is_empty() && key == expected => {
            next.run(request).await
        }
        _ => unauthorized(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub password: String,
}

/// `POST /auth`: exchange the password for the API key.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Response {
    if !state.app.settings.check_password(&body.password) {
        return unauthorized();
    }
    let api_key = state.app.settings.get().api_key;
    Json(json!({ "error": null, "result": { "api_key": api_key } }))
        .into_response()
}
