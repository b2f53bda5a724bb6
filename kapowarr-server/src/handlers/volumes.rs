//! `/volumes*`: library listing, catalog search, volume CRUD and the
//! per-volume operations (rename, convert, search, download).

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kapowarr_core::comicvine::to_number_cv_id;
use kapowarr_core::download::AddDownloadParams;
use kapowarr_core::tasks::TaskAction;
use kapowarr_core::volumes::{change_volume_folder, AddVolumeOptions};
use kapowarr_core::KapowarrError;
use kapowarr_model::{
    MonitorScheme, RootFolderId, SpecialVersion, VolumeId,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ok_response, ApiError, ApiResult};
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(
        state.app.database.volumes().fetch_all_volumes().await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

/// `GET /volumes/search`: search the catalog for new volumes to add.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let comicvine = state.app.comicvine()?;
    Ok(ok_response(
        comicvine.search_volumes(&query.query).await?,
    ))
}

pub async fn stats(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(ok_response(state.app.database.volumes().stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct AddVolumeBody {
    pub comicvine_id: serde_json::Value,
    pub root_folder_id: RootFolderId,
    #[serde(default)]
    pub monitored: Option<bool>,
    #[serde(default)]
    pub monitor_scheme: Option<MonitorScheme>,
    #[serde(default)]
    pub monitor_new_issues: Option<bool>,
    #[serde(default)]
    pub volume_folder: Option<String>,
    #[serde(default)]
    pub special_version: Option<SpecialVersion>,
}

pub async fn add(
    State(state): State<AppState>,
    Json(body): Json<AddVolumeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    // The id arrives as a number or any of the string forms.
    let comicvine_id = match &body.comicvine_id {
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(kapowarr_model::ComicvineId)
            .ok_or(KapowarrError::VolumeNotMatched)?,
        serde_json::Value::String(text) => to_number_cv_id(text)?,
        _ => return Err(ApiError(KapowarrError::VolumeNotMatched)),
    };

    let volume_id = kapowarr_core::volumes::add_volume(
        &state.app.task_context(),
        AddVolumeOptions {
            comicvine_id,
            root_folder_id: body.root_folder_id,
            monitored: body.monitored.unwrap_or(true),
            monitor_scheme: body.monitor_scheme.unwrap_or_default(),
            monitor_new_issues: body.monitor_new_issues.unwrap_or(true),
            volume_folder: body.volume_folder,
            special_version: body.special_version,
        },
    )
    .await?;
    Ok(ok_response(json!({ "id": volume_id })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Json<serde_json::Value>> {
    let volumes = state.app.database.volumes();
    let volume = volumes.fetch_volume(id).await?;
    let issues = volumes.fetch_issues(id).await?;
    Ok(ok_response(json!({
        "volume": volume,
        "issues": issues,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateVolumeBody {
    pub monitored: Option<bool>,
    pub monitor_new_issues: Option<bool>,
    pub special_version: Option<SpecialVersion>,
    pub root_folder: Option<RootFolderId>,
    pub volume_folder: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
    Json(body): Json<UpdateVolumeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let volumes = state.app.database.volumes();
    // Fail early on unknown ids.
    volumes.fetch_volume(id).await?;

    if let Some(monitored) = body.monitored {
        volumes.set_monitored(id, monitored).await?;
    }
    if let Some(monitor_new_issues) = body.monitor_new_issues {
        volumes
            .set_monitor_new_issues(id, monitor_new_issues)
            .await?;
    }
    if let Some(special_version) = body.special_version {
        volumes.set_special_version(id, special_version, true).await?;
    }
    if body.root_folder.is_some() || body.volume_folder.is_some() {
        change_volume_folder(
            &state.app.task_context(),
            id,
            body.root_folder,
            body.volume_folder,
        )
        .await?;
    }

    state
        .app
        .bus
        .emit(kapowarr_model::Event::VolumeUpdated { volume_id: id });
    Ok(ok_response(volumes.fetch_volume(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteVolumeQuery {
    #[serde(default)]
    pub delete_folder: bool,
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
    Query(query): Query<DeleteVolumeQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.app.delete_volume(id, query.delete_folder).await?;
    Ok(ok_response(json!({})))
}

/// `GET /volumes/{id}/cover`: proxy the catalog cover image.
pub async fn cover(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Response> {
    let volume = state.app.database.volumes().fetch_volume(id).await?;
    let comicvine = state.app.comicvine()?;
    let metadata = comicvine.fetch_volume(volume.comicvine_id).await?;
    let bytes = state
        .app
        .session
        .get_content(&metadata.cover_link)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "image/jpeg")],
        bytes,
    )
        .into_response())
}

pub async fn preview_rename(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Json<serde_json::Value>> {
    let settings = state.app.settings.get();
    let plan = kapowarr_core::naming::preview_mass_rename(
        &state.app.database,
        &settings,
        id,
        None,
        None,
    )
    .await?;
    Ok(ok_response(rename_plan_json(plan)))
}

pub fn rename_plan_json(
    plan: Vec<(std::path::PathBuf, std::path::PathBuf)>,
) -> serde_json::Value {
    json!(plan
        .into_iter()
        .map(|(before, after)| json!({
            "before": before,
            "after": after,
        }))
        .collect::<Vec<_>>())
}

pub async fn execute_rename(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Json<serde_json::Value>> {
    let task_id = state.app.tasks.add(
        TaskAction::MassRename {
            volume_id: id,
            issue_id: None,
        },
        "api",
    );
    Ok(ok_response(json!({ "task_id": task_id })))
}

pub async fn preview_convert(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Json<serde_json::Value>> {
    let settings = state.app.settings.get();
    let plan = kapowarr_core::conversion::preview_mass_convert(
        &state.app.database,
        &settings,
        id,
        None,
    )
    .await?;
    Ok(ok_response(rename_plan_json(plan)))
}

pub async fn execute_convert(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Json<serde_json::Value>> {
    let task_id = state.app.tasks.add(
        TaskAction::MassConvert {
            volume_id: id,
            issue_id: None,
        },
        "api",
    );
    Ok(ok_response(json!({ "task_id": task_id })))
}

pub async fn manual_search(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
) -> ApiResult<Json<serde_json::Value>> {
    let settings = state.app.settings.get();
    let results = kapowarr_core::search::manual_search(
        &state.app.database,
        &settings,
        &state.app.session,
        id,
        None,
    )
    .await?;
    Ok(ok_response(results))
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    pub link: String,
    #[serde(default)]
    pub force_match: bool,
    #[serde(default)]
    pub filename: Option<String>,
}

pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<VolumeId>,
    Json(body): Json<DownloadBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let download = state
        .app
        .downloads
        .add(AddDownloadParams {
            link: body.link.clone(),
            volume_id: id,
            issue_id: None,
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
