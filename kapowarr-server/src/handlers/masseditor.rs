//! `/masseditor`: run one operation over a list of volumes, with
//! progress events.

use axum::extract::State;
use axum::Json;
use kapowarr_core::tasks::TaskAction;
use kapowarr_core::volumes::change_volume_folder;
use kapowarr_core::KapowarrError;
use kapowarr_model::{Event, RootFolderId, VolumeId};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::errors::{ok_response, ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MassEditorBody {
    pub volume_ids: Vec<VolumeId>,
    pub action: String,
    #[serde(default)]
    pub root_folder_id: Option<RootFolderId>,
    #[serde(default)]
    pub delete_folder: bool,
    #[serde(default)]
    pub monitored: Option<bool>,
}

pub async fn run(
    State(state): State<AppState>,
    Json(body): Json<MassEditorBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let total_items = body.volume_ids.len();
    let volumes = state.app.database.volumes();

    for (index, volume_id) in body.volume_ids.iter().enumerate() {
        state.app.bus.emit(Event::MassEditorStatus {
            identifier: body.action.clone(),
            current_item: index + 1,
            total_items,
        });

        let outcome = match body.action.as_str() {
            "delete" => {
                state
                    .app
                    .delete_volume(*volume_id, body.delete_folder)
                    .await
            }
            "rename" => {
                state.app.tasks.add(
                    TaskAction::MassRename {
                        volume_id: *volume_id,
                        issue_id: None,
                    },
                    "mass_editor",
                );
                Ok(())
            }
            "convert" => {
                state.app.tasks.add(
                    TaskAction::MassConvert {
                        volume_id: *volume_id,
                        issue_id: None,
                    },
                    "mass_editor",
                );
                Ok(())
            }
            "search" => {
                state.app.tasks.add(
                    TaskAction::AutoSearch {
                        volume_id: *volume_id,
                        issue_id: None,
                    },
                    "mass_editor",
                );
                Ok(())
            }
            "refresh_and_scan" => {
                state.app.tasks.add(
                    TaskAction::RefreshAndScan(*volume_id),
                    "mass_editor",
                );
                Ok(())
            }
            "root_folder" => {
                change_volume_folder(
                    &state.app.task_context(),
                    *volume_id,
                    body.root_folder_id,
                    None,
                )
                .await
            }
            "monitor" | "unmonitor" => {
                let monitored = body
                    .monitored
                    .unwrap_or(body.action == "monitor");
                volumes
                    .set_monitored(*volume_id, monitored)
                    .await
                    .map(|_| {
                        state.app.bus.emit(Event::VolumeUpdated {
                            volume_id: *volume_id,
                        });
                    })
            }
            other => {
                return Err(ApiError(KapowarrError::InvalidKeyValue {
                    key: "action".to_string(),
                    value: other.to_string(),
                }));
            }
        };

        if let Err(error) = outcome {
            warn!("Mass editor action failed for {volume_id}: {error}");
        }
    }

    Ok(ok_response(json!({})))
}
