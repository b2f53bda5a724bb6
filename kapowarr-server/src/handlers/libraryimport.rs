//! `/libraryimport`: propose catalog matches for unimported files (GET)
//! and commit the accepted ones (POST).

use axum::extract::{Query, State};
use axum::Json;
use kapowarr_core::library_import::{
    import_library, propose_library_import, ImportMatch,
    ProposeImportOptions,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProposeQuery {
    #[serde(default)]
    pub included_folders: Option<String>,
    #[serde(default)]
    pub excluded_folders: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub limit_parent_folder: Option<bool>,
    #[serde(default)]
    pub only_english: Option<bool>,
}

fn split_folders(value: Option<String>) -> Vec<String> {
    value
        .map(|folders| {
            folders
                .split(',')
                .map(|folder| folder.trim().to_string())
                .filter(|folder| !folder.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub async fn propose(
    State(state): State<AppState>,
    Query(query): Query<ProposeQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let defaults = ProposeImportOptions::default();
    let proposals = propose_library_import(
        &state.app.task_context(),
        ProposeImportOptions {
            included_folders: split_folders(query.included_folders),
            excluded_folders: split_folders(query.excluded_folders),
            limit: query.limit.unwrap_or(defaults.limit),
            limit_parent_folder: query
                .limit_parent_folder
                .unwrap_or(defaults.limit_parent_folder),
            only_english: query
                .only_english
                .unwrap_or(defaults.only_english),
        },
    )
    .await?;
    Ok(ok_response(proposals))
}

#[derive(Debug, Deserialize)]
pub struct CommitBody {
    pub matches: Vec<ImportMatch>,
    #[serde(default)]
    pub rename_files: bool,
}

pub async fn commit(
    State(state): State<AppState>,
    Json(body): Json<CommitBody>,
) -> ApiResult<Json<serde_json::Value>> {
    import_library(
        &state.app.task_context(),
        body.matches,
        body.rename_files,
    )
    .await?;
    Ok(ok_response(json!({})))
}
