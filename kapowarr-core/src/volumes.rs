//! Volume lifecycle: adding from the catalog, refreshing metadata,
//! updating and deleting.

use std::path::PathBuf;

use chrono::Utc;
use kapowarr_model::{
    ComicvineId, Event, IssueMetadata, MonitorScheme, RootFolderId,
    SpecialVersion, VolumeId,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::comicvine::ComicVine;
use crate::db::volumes::NewVolume;
use crate::error::{KapowarrError, Result};
use crate::fs_util::{delete_file_folder, folder_is_inside_folder};
use crate::naming::{generate_volume_folder_path, move_volume_folder};
use crate::scanner::{scan_files, ScanOptions};
use crate::tasks::TaskContext;

static ONE_SHOT_TITLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bone[\s-]?shot\b").unwrap());
static HARD_COVER_TITLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bhard[\s-]?cover\b|\bhc\b").unwrap());
static TPB_TITLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btrade[\s-]?paper[\s-]?back\b|\btpb\b").unwrap()
});
static VOLUME_ISSUE_TITLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:volume|vol\.?|book)\s*\d+$").unwrap());

/// Derive the special version of a volume from its catalog metadata.
pub fn determine_special_version(
    title: &str,
    issue_count: i32,
    issues: &[IssueMetadata],
) -> SpecialVersion {
    if title.to_lowercase().contains("omnibus") {
        return SpecialVersion::Omnibus;
    }
    if HARD_COVER_TITLE_REGEX.is_match(title) {
        return SpecialVersion::HardCover;
    }
    if ONE_SHOT_TITLE_REGEX.is_match(title) || issue_count == 1 {
        return SpecialVersion::OneShot;
    }
    if TPB_TITLE_REGEX.is_match(title) {
        return SpecialVersion::TradePaperBack;
    }

    // A volume whose issues are titled "Volume 1", "Volume 2", ... is a
    // series of books, not sequential issues.
    if !issues.is_empty()
        && issues.iter().all(|issue| {
            issue
                .title
                .as_deref()
                .is_some_and(|title| VOLUME_ISSUE_TITLE_REGEX.is_match(title))
        })
    {
        return SpecialVersion::VolumeAsIssue;
    }

    SpecialVersion::Normal
}

/// Options of an "add volume" request.
#[derive(Debug, Clone)]
pub struct AddVolumeOptions {
    pub comicvine_id: ComicvineId,
    pub root_folder_id: RootFolderId,
    pub monitored: bool,
    pub monitor_scheme: MonitorScheme,
    pub monitor_new_issues: bool,
    /// User-supplied folder overriding the generated one.
    pub volume_folder: Option<String>,
    pub special_version: Option<SpecialVersion>,
}

fn build_comicvine(context: &TaskContext) -> Result<ComicVine> {
    ComicVine::new(
        context.session.clone(),
        context.cv_cache.clone(),
        context.database.clone(),
        context.settings.clone(),
        None,
    )
}

/// Add a volume from the catalog to the library.
pub async fn add_volume(
    context: &TaskContext,
    options: AddVolumeOptions,
) -> Result<VolumeId> {
    let volumes = context.database.volumes();

    if volumes
        .volume_id_of_comicvine(options.comicvine_id)
        .await?
        .is_some()
    {
        return Err(KapowarrError::VolumeAlreadyAdded);
    }

    let root_folder = context
        .database
        .root_folder_path(options.root_folder_id)
        .await?;

    info!(
        "Adding volume {} to the library",
        options.comicvine_id
    );
    let comicvine = build_comicvine(context)?;
    let metadata = comicvine.fetch_volume(options.comicvine_id).await?;
    let issues = metadata.issues.clone().unwrap_or_default();

    let (special_version, locked) = match options.special_version {
        Some(special_version) => (special_version, true),
        None => (
            determine_special_version(
                &metadata.title,
                metadata.issue_count,
                &issues,
            ),
            false,
        ),
    };

    let (folder, custom_folder) = match &options.volume_folder {
        Some(folder) => (folder.clone(), true),
        None => (
            root_folder
                .join(&metadata.folder_name)
                .to_string_lossy()
                .to_string(),
            false,
        ),
    };

    let volume_id = volumes
        .insert_volume(&NewVolume {
            comicvine_id: metadata.comicvine_id,
            title: metadata.title.clone(),
            alt_title: metadata.aliases.first().cloned(),
            year: metadata.year,
            publisher: metadata.publisher.clone(),
            volume_number: metadata.volume_number,
            description: metadata.description.clone(),
            site_url: metadata.site_url.clone(),
            monitored: options.monitored,
            monitor_new_issues: options.monitor_new_issues,
            root_folder: options.root_folder_id,
            folder,
            custom_folder,
            special_version,
        })
        .await?;

    if locked {
        volumes
            .set_special_version(volume_id, special_version, true)
            .await?;
    }

    let monitor_issues =
        options.monitor_scheme != MonitorScheme::None;
    volumes
        .upsert_issues(volume_id, &issues, monitor_issues)
        .await?;

    let settings = context.settings.get();
    scan_files(
        &context.database,
        &settings,
        &context.bus,
        volume_id,
        ScanOptions::full(),
    )
    .await?;

    debug!("Adding volume result: {volume_id}");
    Ok(volume_id)
}

/// Refresh a volume's metadata from the catalog and rescan its files.
pub async fn refresh_and_scan(
    context: &TaskContext,
    volume_id: VolumeId,
) -> Result<()> {
    let volumes = context.database.volumes();
    let volume = volumes.fetch_volume(volume_id).await?;

    info!("Refreshing volume {volume_id}");
    let comicvine = build_comicvine(context)?;

    // A refresh must see fresh data, not last week's cache entry.
    comicvine
        .cache()
        .remove_from_cache("volume", volume.comicvine_id)
        .await?;
    comicvine
        .cache()
        .remove_from_cache("issues", volume.comicvine_id)
        .await?;

    let metadata = comicvine.fetch_volume(volume.comicvine_id).await?;
    let issues = metadata.issues.clone().unwrap_or_default();

    volumes
        .update_metadata(
            volume_id,
            &metadata.title,
            metadata.year,
            metadata.publisher.as_deref(),
            metadata.volume_number,
            metadata.description.as_deref(),
            &metadata.site_url,
            Utc::now().timestamp(),
        )
        .await?;

    if !volume.special_version_locked {
        let special_version = determine_special_version(
            &metadata.title,
            metadata.issue_count,
            &issues,
        );
        if special_version != volume.special_version {
            volumes
                .set_special_version(volume_id, special_version, false)
                .await?;
        }
    }

    volumes
        .upsert_issues(volume_id, &issues, volume.monitor_new_issues)
        .await?;

    let settings = context.settings.get();
    scan_files(
        &context.database,
        &settings,
        &context.bus,
        volume_id,
        ScanOptions {
            del_unmatched_files: true,
            update_websocket: true,
            ..Default::default()
        },
    )
    .await?;

    context
        .bus
        .emit(Event::VolumeUpdated { volume_id });
    Ok(())
}

/// Delete a volume. Refused while a download for it is queued; the task
/// guard is the caller's job (it owns the task orchestrator).
pub async fn delete_volume(
    context: &TaskContext,
    volume_id: VolumeId,
    delete_folder: bool,
) -> Result<()> {
    if context
        .database
        .downloads()
        .volume_has_downloads(volume_id)
        .await?
    {
        return Err(KapowarrError::VolumeDownloadedFor(volume_id));
    }

    let volumes = context.database.volumes();
    let volume = volumes.fetch_volume(volume_id).await?;

    info!("Deleting volume {volume_id} (delete_folder: {delete_folder})");

    context
        .database
        .files()
        .delete_volume_linked_files(volume_id)
        .await?;
    if delete_folder {
        let root_folder = context
            .database
            .root_folder_path(volume.root_folder)
            .await?;
        let folder = PathBuf::from(&volume.folder);
        if folder_is_inside_folder(&root_folder, &folder) {
            delete_file_folder(&folder)?;
        }
    }

    volumes.delete_volume(volume_id).await?;
    context
        .bus
        .emit(Event::VolumeDeleted { volume_id });
    Ok(())
}

/// Move a volume to another root folder (or folder override), relocating
/// its files.
pub async fn change_volume_folder(
    context: &TaskContext,
    volume_id: VolumeId,
    new_root_folder: Option<RootFolderId>,
    new_volume_folder: Option<String>,
) -> Result<()> {
    let volumes = context.database.volumes();
    let mut volume = volumes.fetch_volume(volume_id).await?;
    let settings = context.settings.get();

    let root_folder_id = new_root_folder.unwrap_or(volume.root_folder);
    let root_folder =
        context.database.root_folder_path(root_folder_id).await?;

    let (new_folder, custom_folder) = match new_volume_folder {
        Some(folder) if !folder.is_empty() => (PathBuf::from(folder), true),
        _ => {
            volume.root_folder = root_folder_id;
            (
                generate_volume_folder_path(&root_folder, &volume, &settings),
                false,
            )
        }
    };

    if new_folder == PathBuf::from(&volume.folder) {
        return Ok(());
    }

    let old_root_folder = context
        .database
        .root_folder_path(volume.root_folder)
        .await?;
    move_volume_folder(
        &context.database,
        &settings,
        volume_id,
        &new_folder,
        &old_root_folder,
    )
    .await?;
    volumes
        .set_folder(
            volume_id,
            root_folder_id,
            &new_folder.to_string_lossy(),
            custom_folder,
        )
        .await?;

    // A new home means new canonical names.
    crate::naming::mass_rename(
        &context.database,
        &settings,
        volume_id,
        None,
        None,
    )
    .await?;

    context
        .bus
        .emit(Event::VolumeUpdated { volume_id });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(title: &str) -> IssueMetadata {
        IssueMetadata {
            comicvine_id: ComicvineId(1),
            volume_comicvine_id: ComicvineId(1),
            issue_number: "1".to_string(),
            calculated_issue_number: 1.0,
            title: Some(title.to_string()),
            date: None,
            description: None,
        }
    }

    #[test]
    fn test_determine_special_version() {
        assert_eq!(
            determine_special_version("Saga Omnibus", 1, &[]),
            SpecialVersion::Omnibus
        );
        assert_eq!(
            determine_special_version("Nimona", 1, &[]),
            SpecialVersion::OneShot
        );
        assert_eq!(
            determine_special_version(
                "Monster",
                3,
                &[issue("Volume 1"), issue("Volume 2"), issue("Volume 3")]
            ),
            SpecialVersion::VolumeAsIssue
        );
        assert_eq!(
            determine_special_version("Invincible", 144, &[]),
            SpecialVersion::Normal
        );
    }
}
