//! Scanning volume folders for files and mapping them to issues.

use std::collections::HashMap;
use std::path::PathBuf;

use kapowarr_model::{
    Event, FileId, GeneralFileType, IssueId, ScannableExt, SpecialVersion,
    VolumeId,
};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::db::files::FileExtraInfo;
use crate::db::Database;
use crate::error::Result;
use crate::events::EventBus;
use crate::filename::{extract_filename_data, ExtractOptions};
use crate::fs_util::{
    create_folder, delete_empty_child_folders, delete_empty_parent_folders,
    list_files,
};
use crate::matching::{file_importing_filter, NumberToYear};
use crate::settings::SettingsValues;

/// Options of a [`scan_files`] run.
#[derive(Debug, Default)]
pub struct ScanOptions {
    /// Only scan specific files; intended for adding files to a volume.
    pub filepath_filter: Option<Vec<PathBuf>>,
    /// Delete file rows that aren't linked to anything anymore.
    pub del_unmatched_files: bool,
    /// Emit `DownloadedStatus` events for binding changes.
    pub update_websocket: bool,
    /// Provenance to record on newly added files.
    pub file_extra_info: Option<FileExtraInfo>,
}

impl ScanOptions {
    pub fn full() -> Self {
        Self {
            del_unmatched_files: true,
            ..Default::default()
        }
    }
}

async fn ensure_file(
    files_repo: &crate::db::FilesRepository,
    volume_files: &mut HashMap<String, FileId>,
    filepath: &str,
    size: i64,
    extra: Option<&FileExtraInfo>,
) -> Result<FileId> {
    if let Some(id) = volume_files.get(filepath) {
        return Ok(*id);
    }
    let id = files_repo.add_file(filepath, size, extra).await?;
    volume_files.insert(filepath.to_string(), id);
    Ok(id)
}

/// Scan inside the volume folder for files and map them to issues.
pub async fn scan_files(
    database: &Database,
    settings: &SettingsValues,
    bus: &EventBus,
    volume_id: VolumeId,
    options: ScanOptions,
) -> Result<()> {
    debug!("Scanning for files for volume {volume_id}");

    let volumes = database.volumes();
    let files_repo = database.files();

    let volume = volumes.fetch_volume(volume_id).await?;
    let volume_folder = PathBuf::from(&volume.folder);
    let root_folder = database
        .root_folder_path(volume.root_folder)
        .await?;

    if !volume_folder.is_dir() {
        if settings.create_empty_volume_folders {
            create_folder(&volume_folder)?;
        } else {
            return Ok(());
        }
    }

    let volume_issues = volumes.fetch_issues(volume_id).await?;
    let general_files = files_repo.general_files(volume_id).await?;
    let number_to_year: NumberToYear = volume_issues
        .iter()
        .map(|issue| {
            (
                OrderedFloat(issue.calculated_issue_number),
                issue.date.map(|d| {
                    d.format("%Y").to_string().parse().unwrap_or(0)
                }),
            )
        })
        .collect();

    // Known file rows of this volume, by path.
    let mut volume_files: HashMap<String, FileId> = files_repo
        .fetch_for_volume(volume_id)
        .await?
        .into_iter()
        .map(|file| (file.filepath, file.id))
        .chain(
            general_files
                .iter()
                .map(|general| (general.file.filepath.clone(), general.file.id)),
        )
        .collect();

    let mut bindings: Vec<(FileId, IssueId)> = Vec::new();
    let mut general_bindings: Vec<(FileId, GeneralFileType)> = Vec::new();

    let folder_contents = list_files(&volume_folder, ScannableExt::ALL);
    for file in folder_contents {
        if let Some(filter) = &options.filepath_filter {
            if !filter.is_empty() && !filter.contains(&file) {
                continue;
            }
        }

        let filepath = file.to_string_lossy().to_string();
        let file_data = extract_filename_data(
            &filepath,
            ExtractOptions::default(),
        );

        if !file_importing_filter(
            &file_data,
            &volume,
            &volume_issues,
            &number_to_year,
        ) {
            continue;
        }

        let size = std::fs::metadata(&file)
            .map(|m| m.len() as i64)
            .unwrap_or(0);
        let extra = options.file_extra_info.as_ref();

        if file_data.special_version == Some(SpecialVersion::Cover)
            && file_data.issue_number.is_none()
        {
            // Volume cover file
            let file_id = ensure_file(
                &files_repo,
                &mut volume_files,
                &filepath,
                size,
                extra,
            )
            .await?;
            general_bindings.push((file_id, GeneralFileType::Cover));
        } else if file_data.special_version == Some(SpecialVersion::Metadata)
            && file_data.issue_number.is_none()
        {
            // Volume metadata file
            let file_id = ensure_file(
                &files_repo,
                &mut volume_files,
                &filepath,
                size,
                extra,
            )
            .await?;
            general_bindings.push((file_id, GeneralFileType::Metadata));
        } else if !matches!(
            volume.special_version,
            SpecialVersion::VolumeAsIssue | SpecialVersion::Normal
        ) && file_data.special_version.is_some()
        {
            // Special-version file: bound to the volume's single issue.
            let Some(first_issue) = volume_issues.first() else {
                continue;
            };
            let file_id = ensure_file(
                &files_repo,
                &mut volume_files,
                &filepath,
                size,
                extra,
            )
            .await?;
            bindings.push((file_id, first_issue.id));
        } else if file_data.issue_number.is_some()
            || volume.special_version == SpecialVersion::VolumeAsIssue
        {
            // Normal issue file, possibly covering a range.
            let issue_range = file_data.issue_number.or_else(|| {
                file_data
                    .volume_number
                    .map(|v| v.as_issue_range())
            });

            let Some(issue_range) = issue_range else {
                continue;
            };
            let (start, end) = issue_range.as_range();
            let matching_issues =
                volumes.issues_in_range(volume_id, start, end).await?;
            if matching_issues.is_empty() {
                continue;
            }

            let file_id = ensure_file(
                &files_repo,
                &mut volume_files,
                &filepath,
                size,
                extra,
            )
            .await?;
            for issue in &matching_issues {
                bindings.push((file_id, issue.id));
            }
        }
    }

    // Diff against the stored bindings to find out what is added, what is
    // deleted, and which issues flip between downloaded and not.
    let current_bindings = files_repo.issue_bindings(volume_id).await?;
    let delete_bindings: Vec<(FileId, IssueId)> = current_bindings
        .iter()
        .filter(|binding| !bindings.contains(binding))
        .copied()
        .collect();
    let add_bindings: Vec<(FileId, IssueId)> = bindings
        .iter()
        .filter(|binding| !current_bindings.contains(binding))
        .copied()
        .collect();

    let mut issue_binding_count: HashMap<IssueId, i64> = HashMap::new();
    for (_, issue_id) in &current_bindings {
        *issue_binding_count.entry(*issue_id).or_insert(0) += 1;
    }

    let mut newly_downloaded_issues: Vec<IssueId> = Vec::new();
    for (_, issue_id) in &add_bindings {
        let count = issue_binding_count.entry(*issue_id).or_insert(0);
        if *count == 0 {
            newly_downloaded_issues.push(*issue_id);
        }
        *count += 1;
    }

    // Only meaningful without a filepath filter, as a filtered scan
    // doesn't see the other files of the issue.
    let mut deleted_downloaded_issues: Vec<IssueId> = Vec::new();
    for (_, issue_id) in &delete_bindings {
        let count = issue_binding_count.entry(*issue_id).or_insert(0);
        *count -= 1;
        if *count == 0 {
            deleted_downloaded_issues.push(*issue_id);
        }
    }

    let filtered = options
        .filepath_filter
        .as_ref()
        .is_some_and(|filter| !filter.is_empty());

    if !filtered {
        for (file_id, issue_id) in &delete_bindings {
            files_repo.delete_issue_binding(*file_id, *issue_id).await?;
        }

        if settings.unmonitor_deleted_issues {
            for issue_id in &deleted_downloaded_issues {
                volumes.set_issue_monitored(*issue_id, false).await?;
            }
        }
    }

    for (file_id, issue_id) in &add_bindings {
        files_repo.add_issue_binding(*file_id, *issue_id).await?;
    }

    if options.update_websocket {
        if !filtered
            && (!deleted_downloaded_issues.is_empty()
                || !newly_downloaded_issues.is_empty())
        {
            bus.emit(Event::DownloadedStatus {
                volume_id,
                downloaded_issues: newly_downloaded_issues.clone(),
                not_downloaded_issues: deleted_downloaded_issues.clone(),
            });
        } else if filtered && !newly_downloaded_issues.is_empty() {
            bus.emit(Event::DownloadedStatus {
                volume_id,
                downloaded_issues: newly_downloaded_issues.clone(),
                not_downloaded_issues: vec![],
            });
        }
    }

    // Sync volume-level bindings the same way.
    if !filtered {
        for general in &general_files {
            let still_bound = general_bindings
                .iter()
                .any(|(id, file_type)| {
                    *id == general.file.id && *file_type == general.file_type
                });
            if !still_bound {
                files_repo.delete_general_binding(general.file.id).await?;
            }
        }
    }
    for (file_id, file_type) in &general_bindings {
        files_repo
            .add_general_binding(*file_id, volume_id, *file_type)
            .await?;
    }

    if options.del_unmatched_files {
        files_repo.delete_unmatched_files().await?;
    }

    // Refresh sizes of bound files; conversions change them in place.
    for (file_id, _) in &bindings {
        let file = files_repo.fetch_by_id(*file_id).await?;
        let on_disk = std::fs::metadata(&file.filepath)
            .map(|m| m.len() as i64)
            .unwrap_or(file.size);
        if on_disk != file.size {
            files_repo.update_size(*file_id, on_disk).await?;
        }
    }

    if settings.delete_empty_folders {
        delete_empty_child_folders(&volume_folder, true)?;
        if list_files(&volume_folder, &[]).is_empty()
            && !settings.create_empty_volume_folders
        {
            delete_empty_parent_folders(&volume_folder, &root_folder)?;
        }
    }

    Ok(())
}
