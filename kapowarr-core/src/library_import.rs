//! Library import: propose catalog matches for not-yet-imported files
//! and commit the accepted ones as new volumes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use kapowarr_model::{
    ComicvineId, FilenameData, MonitorScheme, ScannableExt, SpecialVersion,
};
use tracing::{debug, info};

use crate::comicvine::{CvMatchProposal, FileGroupKey};
use crate::error::{KapowarrError, Result};
use crate::filename::{extract_filename_data, ExtractOptions};
use crate::fs_util::{
    delete_empty_parent_folders, find_common_folder, folder_is_inside_folder,
    list_files, propose_basefolder_change, rename_file,
};
use crate::naming::mass_rename;
use crate::scanner::{scan_files, ScanOptions};
use crate::tasks::TaskContext;
use crate::volumes::{add_volume, AddVolumeOptions};

/// One file of the import proposal, with its suggested catalog match.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportProposal {
    pub filepath: String,
    pub file_title: String,
    pub cv: CvMatchProposal,
    pub group_number: usize,
}

/// An accepted mapping of a file onto a catalog volume.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImportMatch {
    pub filepath: PathBuf,
    pub comicvine_id: ComicvineId,
}

/// Group files that seem to belong to the same volume: identical
/// filename data once the issue number is ignored.
fn create_groups(
    files: &[(PathBuf, FilenameData)],
) -> HashMap<usize, Vec<(PathBuf, FilenameData)>> {
    let mut key_to_group: HashMap<FileGroupKey, usize> = HashMap::new();
    let mut groups: HashMap<usize, Vec<(PathBuf, FilenameData)>> =
        HashMap::new();

    for (file, data) in files {
        let key = FileGroupKey::from(data);
        let next_group = key_to_group.len() + 1;
        let group = *key_to_group.entry(key).or_insert(next_group);
        groups
            .entry(group)
            .or_default()
            .push((file.clone(), data.clone()));
    }

    debug!("File groupings: {groups:?}");
    groups
}

/// Options of a library import proposal run.
#[derive(Debug, Clone)]
pub struct ProposeImportOptions {
    /// Only scan these folders; empty means all root folders.
    pub included_folders: Vec<String>,
    pub excluded_folders: Vec<String>,
    /// The max amount of folders to propose for.
    pub limit: usize,
    /// Base the folder limit on the parent folder, for issue-per-folder
    /// layouts.
    pub limit_parent_folder: bool,
    /// Only match with English releases.
    pub only_english: bool,
}

impl Default for ProposeImportOptions {
    fn default() -> Self {
        Self {
            included_folders: vec![],
            excluded_folders: vec![],
            limit: 20,
            limit_parent_folder: false,
            only_english: true,
        }
    }
}

/// Scan the root folders for unimported files and suggest a catalog
/// volume for each group.
pub async fn propose_library_import(
    context: &TaskContext,
    options: ProposeImportOptions,
) -> Result<Vec<ImportProposal>> {
    info!("Loading library import");

    let root_folders: Vec<PathBuf> = sqlx::query_scalar::<_, String>(
        "SELECT folder FROM root_folders;",
    )
    .fetch_all(context.database.pool())
    .await?
    .into_iter()
    .map(PathBuf::from)
    .collect();

    let scan_folders: Vec<PathBuf> = if options.included_folders.is_empty() {
        root_folders.clone()
    } else {
        let folders: Vec<PathBuf> = options
            .included_folders
            .iter()
            .map(PathBuf::from)
            .collect();
        for folder in &folders {
            if !root_folders
                .iter()
                .any(|root| folder_is_inside_folder(root, folder))
            {
                return Err(KapowarrError::InvalidKeyValue {
                    key: "included_folders".to_string(),
                    value: folder.to_string_lossy().to_string(),
                });
            }
        }
        folders
    };

    let excluded_files: HashSet<PathBuf> = options
        .excluded_folders
        .iter()
        .flat_map(|folder| {
            list_files(Path::new(folder), ScannableExt::ALL)
        })
        .collect();

    let imported_files: HashSet<String> = context
        .database
        .files()
        .fetch_all()
        .await?
        .into_iter()
        .map(|file| file.filepath)
        .collect();

    let mut all_files: Vec<PathBuf> = scan_folders
        .iter()
        .flat_map(|folder| list_files(folder, ScannableExt::ALL))
        .collect();
    all_files.sort_by_key(|file| {
        file.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    });

    let mut folders: HashSet<PathBuf> = HashSet::new();
    let mut image_folders: HashSet<PathBuf> = HashSet::new();
    let mut unimported: Vec<(PathBuf, FilenameData)> = Vec::new();

    for file in all_files {
        let filepath = file.to_string_lossy().to_string();
        if imported_files.contains(&filepath)
            || excluded_files.contains(&file)
        {
            continue;
        }

        let Some(mut dir) = file.parent().map(Path::to_path_buf) else {
            continue;
        };
        if root_folders.contains(&dir) {
            // Files directly in a root folder are not importable.
            continue;
        }

        let data = extract_filename_data(
            &filepath,
            ExtractOptions {
                prefer_folder_year: true,
                ..Default::default()
            },
        );

        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let mut proposal_path = file.clone();
        if ScannableExt::IMAGE.contains(&extension.as_str())
            && data.special_version != Some(SpecialVersion::Cover)
        {
            // Page images: propose their folder once, not every page.
            if !image_folders.insert(dir.clone()) {
                continue;
            }
            proposal_path = dir.clone();
            dir = match dir.parent() {
                Some(parent) => parent.to_path_buf(),
                None => continue,
            };
        }

        let limit_folder = if options.limit_parent_folder {
            dir.parent().map(Path::to_path_buf).unwrap_or(dir)
        } else {
            dir
        };
        folders.insert(limit_folder);
        if folders.len() > options.limit {
            break;
        }

        unimported.push((proposal_path, data));
    }

    let groups = create_groups(&unimported);
    let group_datas: Vec<FilenameData> = groups
        .values()
        .filter_map(|files| files.first().map(|(_, data)| data.clone()))
        .collect();

    let comicvine = crate::comicvine::ComicVine::new(
        context.session.clone(),
        context.cv_cache.clone(),
        context.database.clone(),
        context.settings.clone(),
        None,
    )?;
    let matches = comicvine
        .filenames_to_cvs(&group_datas, options.only_english)
        .await?;

    let empty_match = CvMatchProposal {
        id: None,
        title: None,
        issue_count: None,
        link: None,
    };

    let mut result: Vec<ImportProposal> = Vec::new();
    for (group_number, files) in &groups {
        for (file, data) in files {
            let cv = matches
                .get(&FileGroupKey::from(data))
                .cloned()
                .unwrap_or_else(|| empty_match.clone());
            result.push(ImportProposal {
                filepath: file.to_string_lossy().to_string(),
                file_title: file
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_default(),
                cv,
                group_number: *group_number,
            });
        }
    }
    result.sort_by(|a, b| a.filepath.cmp(&b.filepath));

    Ok(result)
}

/// Add the matched volumes to the library and attach their files.
pub async fn import_library(
    context: &TaskContext,
    matches: Vec<ImportMatch>,
    rename_files: bool,
) -> Result<()> {
    info!("Starting library import");

    let mut cvid_to_files: HashMap<ComicvineId, Vec<PathBuf>> =
        HashMap::new();
    for entry in matches {
        cvid_to_files
            .entry(entry.comicvine_id)
            .or_default()
            .push(entry.filepath);
    }
    debug!("id_to_filepath: {cvid_to_files:?}");

    let root_folders: Vec<(i64, PathBuf)> = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, folder FROM root_folders;",
    )
    .fetch_all(context.database.pool())
    .await?
    .into_iter()
    .map(|(id, folder)| (id, PathBuf::from(folder)))
    .collect();

    let settings = context.settings.get();

    for (comicvine_id, files) in cvid_to_files {
        // Find the root folder the media is in.
        let Some((root_folder_id, root_folder)) =
            root_folders.iter().find(|(_, folder)| {
                files
                    .first()
                    .is_some_and(|file| folder_is_inside_folder(folder, file))
            })
        else {
            continue;
        };

        let common_folder = find_common_folder(&files);

        let volume_id = match add_volume(
            context,
            AddVolumeOptions {
                comicvine_id,
                root_folder_id: kapowarr_model::RootFolderId(
                    *root_folder_id,
                ),
                monitored: true,
                monitor_scheme: MonitorScheme::All,
                monitor_new_issues: true,
                volume_folder: if rename_files {
                    None
                } else {
                    common_folder
                        .as_ref()
                        .map(|folder| folder.to_string_lossy().to_string())
                },
                special_version: None,
            },
        )
        .await
        {
            Ok(volume_id) => volume_id,
            // Already added, but the file did not match it; the file is
            // apparently not for that volume after all.
            Err(KapowarrError::VolumeAlreadyAdded) => continue,
            Err(error) => return Err(error),
        };

        if rename_files {
            // Put the files in the volume folder.
            let volume = context
                .database
                .volumes()
                .fetch_volume(volume_id)
                .await?;
            let volume_folder = PathBuf::from(&volume.folder);
            let Some(common_folder) = common_folder else {
                continue;
            };

            let moves = propose_basefolder_change(
                &files,
                &common_folder,
                &volume_folder,
            );
            let mut new_files: Vec<PathBuf> =
                Vec::with_capacity(moves.len());
            for (old, new) in &moves {
                if old != new {
                    rename_file(old, new)?;
                    if let Some(parent) = old.parent() {
                        delete_empty_parent_folders(parent, root_folder)?;
                    }
                }
                new_files.push(new.clone());
            }

            scan_files(
                &context.database,
                &settings,
                &context.bus,
                volume_id,
                ScanOptions::full(),
            )
            .await?;
            mass_rename(
                &context.database,
                &settings,
                volume_id,
                None,
                Some(&new_files),
            )
            .await?;
        } else {
            scan_files(
                &context.database,
                &settings,
                &context.bus,
                volume_id,
                ScanOptions {
                    filepath_filter: Some(files.clone()),
                    ..Default::default()
                },
            )
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(series: &str, issue: f64) -> FilenameData {
        FilenameData {
            series: series.to_string(),
            year: Some(2003),
            volume_number: None,
            issue_number: Some(kapowarr_model::IssueRange::Single(issue)),
            annual: false,
            special_version: None,
        }
    }

    #[test]
    fn test_create_groups_ignores_issue_number() {
        let files = vec![
            (PathBuf::from("/a/Invincible 001.cbz"), data("Invincible", 1.0)),
            (PathBuf::from("/a/Invincible 002.cbz"), data("Invincible", 2.0)),
            (PathBuf::from("/a/Spawn 001.cbz"), data("Spawn", 1.0)),
        ];
        let groups = create_groups(&files);
        assert_eq!(groups.len(), 2);
        let sizes: Vec<usize> =
            groups.values().map(|group| group.len()).collect();
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&1));
    }
}
