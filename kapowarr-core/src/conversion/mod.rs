//! Converting files between formats according to the user's format
//! preference, including extracting issue files out of range archives.

pub mod archives;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use kapowarr_model::{Event, IssueId, VolumeId};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::db::files::FileExtraInfo;
use crate::db::Database;
use crate::error::{KapowarrError, Result};
use crate::events::EventBus;
use crate::fs_util::{
    delete_empty_parent_folders, delete_file_folder, generate_archive_folder,
};
use crate::naming::mass_rename;
use crate::scanner::{scan_files, ScanOptions};
use crate::settings::SettingsValues;

/// The pseudo-format meaning "extract the archive into issue files".
pub const FOLDER_FORMAT: &str = "folder";

/// File formats the conversion engine understands.
const KNOWN_FORMATS: [&str; 5] = ["zip", "cbz", "rar", "cbr", FOLDER_FORMAT];

/// The registered converters as `(source, target)` pairs. Populated here,
/// in one place, and checked by [`verify_registry`] at startup.
pub const CONVERTERS: [(&str, &str); 16] = [
    ("zip", "cbz"),
    ("zip", "rar"),
    ("zip", "cbr"),
    ("zip", FOLDER_FORMAT),
    ("cbz", "zip"),
    ("cbz", "rar"),
    ("cbz", "cbr"),
    ("cbz", FOLDER_FORMAT),
    ("rar", "cbr"),
    ("rar", "zip"),
    ("rar", "cbz"),
    ("rar", FOLDER_FORMAT),
    ("cbr", "rar"),
    ("cbr", "zip"),
    ("cbr", "cbz"),
    ("cbr", FOLDER_FORMAT),
];

/// Check the converter table for duplicate registrations and unknown
/// formats. Run once at startup.
pub fn verify_registry() -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for (source, target) in CONVERTERS {
        if !KNOWN_FORMATS.contains(&source) {
            return Err(KapowarrError::Internal(format!(
                "converter source format {source} is invalid"
            )));
        }
        if !KNOWN_FORMATS.contains(&target) {
            return Err(KapowarrError::Internal(format!(
                "converter target format {target} is invalid"
            )));
        }
        if !seen.insert((source, target)) {
            return Err(KapowarrError::Internal(format!(
                "converter {source} -> {target} registered multiple times"
            )));
        }
    }
    Ok(())
}

/// Whether a format can appear in the user's format preference.
pub fn is_known_format(format: &str) -> bool {
    format != FOLDER_FORMAT && KNOWN_FORMATS.contains(&format)
}

/// All formats that files can be converted into.
pub fn available_formats() -> Vec<&'static str> {
    let mut formats: Vec<&'static str> =
        CONVERTERS.iter().map(|(_, target)| *target).collect();
    formats.sort_unstable();
    formats.dedup();
    formats
}

/// Source formats that can be exploded into a folder of issue files.
fn formats_convertible_to_folder() -> Vec<&'static str> {
    CONVERTERS
        .iter()
        .filter(|(_, target)| *target == FOLDER_FORMAT)
        .map(|(source, _)| *source)
        .collect()
}

fn has_converter(source: &str, target: &str) -> bool {
    CONVERTERS.contains(&(source, target))
}

/// A planned conversion of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedConversion {
    pub filepath: PathBuf,
    pub source_format: String,
    pub target_format: String,
    /// `None` for conversions into a folder.
    pub new_filepath: Option<PathBuf>,
}

impl ProposedConversion {
    fn new(filepath: PathBuf, target_format: &str) -> Self {
        let source_format = file_format(&filepath);
        let new_filepath = (target_format != FOLDER_FORMAT)
            .then(|| filepath.with_extension(target_format));
        Self {
            filepath,
            source_format,
            target_format: target_format.to_string(),
            new_filepath,
        }
    }
}

fn file_format(filepath: &Path) -> String {
    filepath
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Decide what, if anything, a file should be converted to, based on the
/// extraction setting and the ordered format preference.
pub fn select_converter(
    settings: &SettingsValues,
    filepath: &Path,
) -> Option<ProposedConversion> {
    let source_format = file_format(filepath);

    if settings.extract_issue_ranges
        && formats_convertible_to_folder()
            .contains(&source_format.as_str())
        && archives::archive_contains_issues(filepath)
    {
        return Some(ProposedConversion::new(
            filepath.to_path_buf(),
            FOLDER_FORMAT,
        ));
    }

    for preferred in &settings.format_preference {
        if *preferred == source_format {
            // The file already is in the most desired reachable format.
            return None;
        }
        if has_converter(&source_format, preferred) {
            return Some(ProposedConversion::new(
                filepath.to_path_buf(),
                preferred,
            ));
        }
    }

    None
}

/// Perform a non-folder conversion. Returns the resulting file, or the
/// input unchanged when the conversion isn't possible (e.g. no rar
/// binary).
fn perform_conversion(
    volume_folder: &Path,
    proposal: &ProposedConversion,
) -> Result<PathBuf> {
    use archives::*;

    let file = &proposal.filepath;
    let source = proposal.source_format.as_str();
    let target = proposal.target_format.as_str();
    info!(
        "Converting file from {source} to {target}: {}",
        file.display()
    );

    // Relabels: the container stays, only the extension changes.
    let relabel = matches!(
        (source, target),
        ("zip", "cbz")
            | ("cbz", "zip")
            | ("rar", "cbr")
            | ("cbr", "rar")
    );
    if relabel {
        let new_filepath = file.with_extension(target);
        crate::fs_util::rename_file(file, &new_filepath)?;
        return Ok(new_filepath);
    }

    if !rar_available() {
        // Every remaining pair goes through the rar binary.
        return Ok(file.clone());
    }

    let archive_folder = generate_archive_folder(volume_folder, file);
    let result = match (source, target) {
        ("zip" | "cbz", "rar" | "cbr") => {
            extract_zip(file, &archive_folder)?;
            let stem = file.with_extension("");
            create_rar_archive(&archive_folder, &stem)?;
            let rar_file = file.with_extension("rar");
            if target == "cbr" {
                let cbr_file = file.with_extension("cbr");
                crate::fs_util::rename_file(&rar_file, &cbr_file)?;
                cbr_file
            } else {
                rar_file
            }
        }
        ("rar" | "cbr", "zip" | "cbz") => {
            extract_rar(file, &archive_folder)?;
            let zip_file = file.with_extension(target);
            create_zip_archive(&archive_folder, &zip_file)?;
            zip_file
        }
        _ => {
            return Err(KapowarrError::Internal(format!(
                "no converter from {source} to {target}"
            )));
        }
    };

    delete_file_folder(&archive_folder)?;
    delete_file_folder(file)?;
    if let Some(parent) = file.parent() {
        delete_empty_parent_folders(parent, volume_folder)?;
    }
    Ok(result)
}

async fn convertable_files(
    database: &Database,
    settings: &SettingsValues,
    volume_id: VolumeId,
    issue_id: Option<IssueId>,
    filepath_filter: Option<&[PathBuf]>,
) -> Result<Vec<ProposedConversion>> {
    let files = match issue_id {
        Some(issue_id) => database.files().fetch_for_issue(issue_id).await?,
        None => database.files().fetch_for_volume(volume_id).await?,
    };

    Ok(files
        .iter()
        .map(|file| PathBuf::from(&file.filepath))
        .filter(|path| {
            filepath_filter.is_none_or(|filter| filter.contains(path))
        })
        .filter_map(|path| select_converter(settings, &path))
        .collect())
}

/// Preview which files of a volume (or issue) would be converted, and to
/// what. Folder extractions map to the volume folder.
pub async fn preview_mass_convert(
    database: &Database,
    settings: &SettingsValues,
    volume_id: VolumeId,
    issue_id: Option<IssueId>,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let volume = database.volumes().fetch_volume(volume_id).await?;
    let volume_folder = PathBuf::from(&volume.folder);

    Ok(
        convertable_files(database, settings, volume_id, issue_id, None)
            .await?
            .into_iter()
            .map(|proposal| {
                let target = proposal
                    .new_filepath
                    .clone()
                    .unwrap_or_else(|| volume_folder.clone());
                (proposal.filepath, target)
            })
            .collect(),
    )
}

/// Options of a [`mass_convert`] run.
#[derive(Debug, Default)]
pub struct ConvertOptions {
    pub issue_id: Option<IssueId>,
    pub filepath_filter: Option<Vec<PathBuf>>,
    /// Stream `Converted k/N` task-status events.
    pub update_websocket_progress: bool,
    /// Emit downloaded-status events from the reabsorbing scan.
    pub update_websocket_files: bool,
    pub file_extra_info: Option<FileExtraInfo>,
}

/// Convert the files of a volume (or issue). Conversions run in a
/// bounded blocking pool; results are reabsorbed through a scan.
pub async fn mass_convert(
    database: &Database,
    settings: &SettingsValues,
    bus: &EventBus,
    volume_id: VolumeId,
    options: ConvertOptions,
) -> Result<Vec<PathBuf>> {
    let volumes = database.volumes();
    let volume = volumes.fetch_volume(volume_id).await?;
    let volume_folder = PathBuf::from(&volume.folder);
    let volume_issues = volumes.fetch_issues(volume_id).await?;
    let end_year = volumes
        .ending_year(volume_id)
        .await?
        .or(volume.year);

    let proposals = convertable_files(
        database,
        settings,
        volume_id,
        options.issue_id,
        options.filepath_filter.as_deref(),
    )
    .await?;

    let mut planned: Vec<ProposedConversion> = Vec::new();
    let mut results: Vec<PathBuf> = Vec::new();
    let mut converted_sources: Vec<String> = Vec::new();

    for proposal in proposals {
        if proposal.target_format != FOLDER_FORMAT {
            planned.push(proposal);
            continue;
        }

        // Explode the archive into issue files, rebind them, then decide
        // per extracted file whether it needs converting itself.
        let source = proposal.filepath.clone();
        let extra_info = database
            .files()
            .fetch_by_filepath(&source.to_string_lossy())
            .await?
            .map(|file| FileExtraInfo::from(&file));

        let archive_folder =
            generate_archive_folder(&volume_folder, &source);
        let extract_volume = volume.clone();
        let extract_issues = volume_issues.clone();
        let extract_source = source.clone();
        let extracted: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
            let format = file_format(&extract_source);
            match format.as_str() {
                "zip" | "cbz" => {
                    archives::extract_zip(&extract_source, &archive_folder)?
                }
                "rar" | "cbr" => {
                    if !archives::rar_available() {
                        return Ok(vec![]);
                    }
                    archives::extract_rar(&extract_source, &archive_folder)?
                }
                other => {
                    return Err(KapowarrError::Internal(format!(
                        "can not extract format {other}"
                    )));
                }
            }
            archives::extract_files_from_folder(
                &archive_folder,
                &extract_volume,
                &extract_issues,
                end_year,
            )
        })
        .await
        .map_err(|e| KapowarrError::Internal(e.to_string()))??;

        if extracted.is_empty() {
            continue;
        }

        scan_files(
            database,
            settings,
            bus,
            volume_id,
            ScanOptions {
                filepath_filter: Some(extracted.clone()),
                file_extra_info: extra_info.clone(),
                update_websocket: options.update_websocket_files,
                ..Default::default()
            },
        )
        .await?;
        let renamed = mass_rename(
            database,
            settings,
            volume_id,
            None,
            Some(&extracted),
        )
        .await?;
        let extracted = if renamed.is_empty() { extracted } else { renamed };

        delete_file_folder(&source)?;
        if let Some(parent) = source.parent() {
            delete_empty_parent_folders(parent, &volume_folder)?;
        }
        converted_sources.push(source.to_string_lossy().to_string());

        for file in extracted {
            match select_converter(settings, &file) {
                Some(sub_proposal) => planned.push(sub_proposal),
                None => results.push(file),
            }
        }
    }

    let total_count = planned.len();
    if total_count == 0 && results.is_empty() {
        return Ok(vec![]);
    }

    if total_count > 0 {
        if options.update_websocket_progress {
            bus.emit(Event::TaskStatus {
                message: format!("Converted 0/{total_count}"),
            });
        }

        // Workers are bounded by the batch size, capped by CPU count.
        let permits = total_count.min(num_cpus::get()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut pool = FuturesUnordered::new();
        for proposal in &planned {
            let semaphore = Arc::clone(&semaphore);
            let folder = volume_folder.clone();
            let proposal = proposal.clone();
            pool.push(async move {
                let _permit = semaphore.acquire_owned().await;
                tokio::task::spawn_blocking(move || {
                    perform_conversion(&folder, &proposal)
                })
                .await
            });
        }

        let mut done = 0usize;
        while let Some(outcome) = pool.next().await {
            let converted = outcome
                .map_err(|e| KapowarrError::Internal(e.to_string()))?;
            match converted {
                Ok(path) => results.push(path),
                Err(error) => warn!("Conversion failed: {error}"),
            }
            done += 1;
            if options.update_websocket_progress {
                bus.emit(Event::TaskStatus {
                    message: format!("Converted {done}/{total_count}"),
                });
            }
        }

        converted_sources.extend(
            planned
                .iter()
                .map(|p| p.filepath.to_string_lossy().to_string()),
        );
    }

    database
        .files()
        .delete_by_filepaths(&converted_sources)
        .await?;
    scan_files(
        database,
        settings,
        bus,
        volume_id,
        ScanOptions {
            filepath_filter: Some(results.clone()),
            file_extra_info: options.file_extra_info,
            update_websocket: options.update_websocket_files,
            del_unmatched_files: true,
            ..Default::default()
        },
    )
    .await?;

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_valid() {
        verify_registry().unwrap();
    }

    #[test]
    fn test_available_formats() {
        let formats = available_formats();
        assert!(formats.contains(&"cbz"));
        assert!(formats.contains(&FOLDER_FORMAT));
    }

    #[test]
    fn test_select_converter_prefers_existing_format() {
        let settings = SettingsValues {
            format_preference: vec!["cbz".to_string(), "zip".to_string()],
            ..Default::default()
        };
        // Already the top preference: no conversion.
        assert_eq!(
            select_converter(&settings, Path::new("/a/file.cbz")),
            None
        );
        // zip is reachable from cbr, but cbz is preferred and reachable.
        let proposal =
            select_converter(&settings, Path::new("/a/file.cbr")).unwrap();
        assert_eq!(proposal.target_format, "cbz");
        assert_eq!(
            proposal.new_filepath,
            Some(PathBuf::from("/a/file.cbz"))
        );
    }

    #[test]
    fn test_select_converter_without_preference() {
        let settings = SettingsValues::default();
        assert_eq!(
            select_converter(&settings, Path::new("/a/file.cbz")),
            None
        );
    }

    #[test]
    fn test_unknown_source_format() {
        let settings = SettingsValues {
            format_preference: vec!["cbz".to_string()],
            ..Default::default()
        };
        assert_eq!(
            select_converter(&settings, Path::new("/a/file.jpg")),
            None
        );
    }
}
