//! Mapping of core error kinds onto HTTP responses. This is the single
//! place where error names meet status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kapowarr_core::KapowarrError;
use serde_json::json;
use tracing::error;

pub struct ApiError(pub KapowarrError);

impl From<KapowarrError> for ApiError {
    fn from(error: KapowarrError) -> Self {
        Self(error)
    }
}

fn status_of(error: &KapowarrError) -> StatusCode {
    use KapowarrError::*;
    match error {
        VolumeNotFound(_) | IssueNotFound(_) | FileNotFound
        | FolderNotFound(_) | RootFolderNotFound(_) | TaskNotFound(_)
        | DownloadNotFound(_) | BlocklistEntryNotFound(_)
        | CredentialNotFound(_) | ExternalClientNotFound(_)
        | LogFileNotFound => StatusCode::NOT_FOUND,

        CVRateLimitReached | DownloadLimitReached(_) => {
            // 509: the upstream bandwidth/rate budget is exhausted.
            StatusCode::from_u16(509).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
        }

        Io(_) | Database(_) | Migration(_) | Request(_)
        | Serialization(_) | Archive(_) | Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }

        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error handling request: {}", self.0);
        }

        let body = json!({
            "error": self.0.api_name(),
            "result": {},
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// The success envelope: `{"error": null, "result": ...}`.
pub fn ok_response(result: impl serde::Serialize) -> Json<serde_json::Value> {
    Json(json!({ "error": null, "result": result }))
}
