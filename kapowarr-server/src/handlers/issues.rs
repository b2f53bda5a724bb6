//! `/issues/{id}*`: per-issue operations.

use axum::extract::{Path, State};
use axum::Json;
use kapowarr_core::download::AddDownloadParams;
use kapowarr_core::tasks::TaskAction;
use kapowarr_model::IssueId;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiResult};
use crate::handlers::volumes::{rename_plan_json, DownloadBody};
use crate::state::AppState;

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
) -> ApiResult<Json<serde_json::Value>> {
    let issue = state.app.database.volumes().fetch_issue(id).await?;
    let files = state.app.database.files().fetch_for_issue(id).await?;
    Ok(ok_response(json!({ "issue": issue, "files": files })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateIssueBody {
    pub monitored: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
    Json(body): Json<UpdateIssueBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let volumes = state.app.database.volumes();
    if let Some(monitored) = body.monitored {
        volumes.set_issue_monitored(id, monitored).await?;
    }
    state
        .app
        .bus
        .emit(kapowarr_model::Event::IssueUpdated { issue_id: id });
    Ok(ok_response(volumes.fetch_issue(id).await?))
}

pub async fn preview_rename(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
) -> ApiResult<Json<serde_json::Value>> {
    let issue = state.app.database.volumes().fetch_issue(id).await?;
    let settings = state.app.settings.get();
    let plan = kapowarr_core::naming::preview_mass_rename(
        &state.app.database,
        &settings,
        issue.volume_id,
        Some(id),
        None,
    )
    .await?;
    Ok(ok_response(rename_plan_json(plan)))
}

pub async fn execute_rename(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
) -> ApiResult<Json<serde_json::Value>> {
    let issue = state.app.database.volumes().fetch_issue(id).await?;
    let task_id = state.app.tasks.add(
        TaskAction::MassRename {
            volume_id: issue.volume_id,
            issue_id: Some(id),
        },
        "api",
    );
    Ok(ok_response(json!({ "task_id": task_id })))
}

pub async fn execute_convert(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
) -> ApiResult<Json<serde_json::Value>> {
    let issue = state.app.database.volumes().fetch_issue(id).await?;
    let task_id = state.app.tasks.add(
        TaskAction::MassConvert {
            volume_id: issue.volume_id,
            issue_id: Some(id),
        },
        "api",
    );
    Ok(ok_response(json!({ "task_id": task_id })))
}

pub async fn manual_search(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
) -> ApiResult<Json<serde_json::Value>> {
    let issue = state.app.database.volumes().fetch_issue(id).await?;
    let settings = state.app.settings.get();
    let results = kapowarr_core::search::manual_search(
        &state.app.database,
        &settings,
        &state.app.session,
        issue.volume_id,
        Some(id),
    )
    .await?;
    Ok(ok_response(results))
}

pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<IssueId>,
    Json(body): Json<DownloadBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let issue = state.app.database.volumes().fetch_issue(id).await?;
    let download = state
        .app
        .downloads
        .add(AddDownloadParams {
            link: body.link.clone(),
            volume_id: issue.volume_id,
            issue_id: Some(id),
            filename: body.filename,
            source: "manual".to_string(),
            web_link: Some(body.link),
            web_title: None,
            web_sub_title: None,
            force_match: body.force_match,
            ..Default::default()
        })
        .await?;
    Ok(ok_response(download))
}
