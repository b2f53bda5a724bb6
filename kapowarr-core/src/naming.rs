//! The (re)naming of volume folders and files from user-controlled
//! format strings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use kapowarr_model::{
    ComicvineId, FileData, IssueData, IssueId, IssueRange, RootFolderId,
    ScannableExt, SpecialVersion, VolumeData, VolumeId,
};
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use regex::Regex;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{KapowarrError, Result};
use crate::filename::{extract_filename_data, ExtractOptions};
use crate::fs_util::{
    delete_empty_child_folders, delete_empty_parent_folders,
    make_filename_safe, rename_file,
};
use crate::matching::{file_importing_filter, NumberToYear};
use crate::settings::SettingsValues;

static TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());

const VOLUME_TOKENS: [&str; 7] = [
    "series_name",
    "clean_series_name",
    "volume_number",
    "year",
    "publisher",
    "comicvine_id",
    "special_version",
];

const ISSUE_TOKENS: [&str; 5] = [
    "issue_number",
    "issue_title",
    "issue_release_date",
    "issue_release_year",
    "issue_comicvine_id",
];

/// What `{special_version}` renders as.
fn special_version_label(special_version: SpecialVersion) -> &'static str {
    match special_version {
        SpecialVersion::Normal => "Normal",
        SpecialVersion::TradePaperBack => "TPB",
        SpecialVersion::OneShot => "One-Shot",
        SpecialVersion::HardCover => "Hard-Cover",
        SpecialVersion::Omnibus => "Omnibus",
        SpecialVersion::VolumeAsIssue => "Volume",
        SpecialVersion::Cover => "Cover",
        SpecialVersion::Metadata => "Metadata",
    }
}

/// Move a leading article to the end: "The Walking Dead" ->
/// "Walking Dead, The".
fn clean_series_name(title: &str) -> String {
    for article in ["The ", "A ", "An "] {
        if title.len() > article.len()
            && title[..article.len()].eq_ignore_ascii_case(article)
        {
            return format!(
                "{}, {}",
                &title[article.len()..],
                title[..article.len()].trim()
            );
        }
    }
    title.to_string()
}

/// Zero-pad the integer part of an issue number, keeping any fraction:
/// `6.0` with padding 3 -> `"006"`, `4.5` -> `"004.5"`.
fn pad_number(number: f64, padding: usize) -> String {
    let integer = number.trunc() as i64;
    let rendered = format!("{number}");
    match rendered.split_once('.') {
        Some((_, fraction)) if number.fract() != 0.0 => {
            format!("{integer:0padding$}.{fraction}")
        }
        _ => format!("{integer:0padding$}"),
    }
}

fn format_issue_range(range: IssueRange, padding: usize) -> String {
    match range {
        IssueRange::Single(number) => pad_number(number, padding),
        IssueRange::Range(start, end) => format!(
            "{} - {}",
            pad_number(start, padding),
            pad_number(end, padding)
        ),
    }
}

struct NamingContext<'a> {
    volume: &'a VolumeData,
    issue: Option<&'a IssueData>,
    covered: Option<IssueRange>,
    settings: &'a SettingsValues,
}

fn render_format(format: &str, context: &NamingContext<'_>) -> String {
    TOKEN_REGEX
        .replace_all(format, |captures: &regex::Captures<'_>| {
            let value = match &captures[1] {
                "series_name" => Some(context.volume.title.clone()),
                "clean_series_name" => {
                    Some(clean_series_name(&context.volume.title))
                }
                "volume_number" => {
                    // In volume-as-issue volumes the issue number is
                    // presented as the volume number.
                    let number = if context.volume.special_version
                        == SpecialVersion::VolumeAsIssue
                    {
                        context.covered.map(|covered| {
                            format_issue_range(
                                covered,
                                context.settings.volume_padding,
                            )
                        })
                    } else {
                        None
                    };
                    Some(number.unwrap_or_else(|| {
                        pad_number(
                            context.volume.volume_number as f64,
                            context.settings.volume_padding,
                        )
                    }))
                }
                "year" => context.volume.year.map(|y| y.to_string()),
                "publisher" => context.volume.publisher.clone(),
                "comicvine_id" => {
                    Some(context.volume.comicvine_id.to_string())
                }
                "special_version" => Some(
                    special_version_label(context.volume.special_version)
                        .to_string(),
                ),
                "issue_number" => context.covered.map(|covered| {
                    format_issue_range(
                        covered,
                        context.settings.issue_padding,
                    )
                }),
                "issue_title" => {
                    context.issue.and_then(|i| i.title.clone())
                }
                "issue_release_date" => context
                    .issue
                    .and_then(|i| i.date)
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                "issue_release_year" => context
                    .issue
                    .and_then(|i| i.date)
                    .map(|d| d.format("%Y").to_string()),
                "issue_comicvine_id" => {
                    context.issue.map(|i| i.comicvine_id.to_string())
                }
                _ => Some(captures[0].to_string()),
            };
            make_filename_safe(&value.unwrap_or_else(|| "Unknown".to_string()))
        })
        .to_string()
}

fn unknown_tokens(format: &str, allowed: &[&str]) -> Vec<String> {
    TOKEN_REGEX
        .captures_iter(format)
        .filter(|captures| !allowed.contains(&&captures[1]))
        .map(|captures| captures[1].to_string())
        .collect()
}

fn forbidden_separator() -> char {
    if cfg!(windows) { '/' } else { '\\' }
}

fn mock_volume() -> VolumeData {
    VolumeData {
        id: VolumeId(-1),
        comicvine_id: ComicvineId(1234),
        title: "Mock Series".to_string(),
        alt_title: None,
        year: Some(2000),
        publisher: Some("Mock Publisher".to_string()),
        volume_number: 1,
        description: None,
        site_url: String::new(),
        monitored: true,
        monitor_new_issues: true,
        root_folder: RootFolderId(1),
        folder: String::new(),
        custom_folder: false,
        special_version: SpecialVersion::Normal,
        special_version_locked: false,
        last_cv_fetch: 0,
    }
}

fn mock_issue() -> IssueData {
    IssueData {
        id: IssueId(-1),
        volume_id: VolumeId(-1),
        comicvine_id: ComicvineId(5678),
        issue_number: "1".to_string(),
        calculated_issue_number: 1.0,
        title: Some("Mock Title".to_string()),
        date: chrono::NaiveDate::from_ymd_opt(2000, 1, 1),
        monitored: true,
    }
}

/// Render a format on a synthetic volume and check that the filename
/// extractor recovers the synthetic issue and matches back to the volume.
pub fn check_mock_filename(format: &str) -> bool {
    let volume = mock_volume();
    let issue = mock_issue();
    let settings = SettingsValues::default();
    let context = NamingContext {
        volume: &volume,
        issue: Some(&issue),
        covered: Some(IssueRange::Single(1.0)),
        settings: &settings,
    };
    let rendered = format!("{}.cbz", render_format(format, &context));

    let data = extract_filename_data(
        &rendered,
        ExtractOptions {
            assume_volume_number: false,
            ..Default::default()
        },
    );

    if data.issue_number != Some(IssueRange::Single(1.0)) {
        return false;
    }

    let issues = vec![issue];
    let mut number_to_year = NumberToYear::new();
    number_to_year.insert(OrderedFloat(1.0), Some(2000));
    file_importing_filter(&data, &volume, &issues, &number_to_year)
}

/// Validate a volume-folder format string.
pub fn validate_folder_format(format: &str) -> Result<()> {
    if format.contains(forbidden_separator()) {
        return Err(KapowarrError::InvalidSettingValue {
            key: "volume_folder_naming".to_string(),
            value: format.to_string(),
        });
    }
    let unknown = unknown_tokens(format, &VOLUME_TOKENS);
    if !unknown.is_empty() {
        return Err(KapowarrError::InvalidSettingValue {
            key: "volume_folder_naming".to_string(),
            value: format.to_string(),
        });
    }
    Ok(())
}

/// Validate a file format string. Issue formats must round-trip through
/// the filename extractor; formats with `{issue_title}` get one retry
/// without it before being rejected.
pub fn validate_file_format(format: &str, issue_format: bool) -> Result<()> {
    let invalid = || KapowarrError::InvalidSettingValue {
        key: "file_naming".to_string(),
        value: format.to_string(),
    };

    if format.contains(forbidden_separator()) {
        return Err(invalid());
    }

    let mut allowed: Vec<&str> = VOLUME_TOKENS.to_vec();
    if issue_format {
        allowed.extend(ISSUE_TOKENS);
    }
    if !unknown_tokens(format, &allowed).is_empty() {
        return Err(invalid());
    }

    if issue_format && !check_mock_filename(format) {
        if format.contains("{issue_title}")
            && check_mock_filename(&strip_issue_title(format))
        {
            return Ok(());
        }
        return Err(invalid());
    }

    Ok(())
}

/// Remove the `{issue_title}` token and the separator directly before it.
fn strip_issue_title(format: &str) -> String {
    static TITLE_WITH_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"([-_\s]*\{issue_title\})").unwrap()
    });
    TITLE_WITH_SEPARATOR.replace_all(format, "").to_string()
}

/// The folder name of a volume under its root folder.
pub fn generate_volume_folder_name(
    volume: &VolumeData,
    settings: &SettingsValues,
) -> String {
    let context = NamingContext {
        volume,
        issue: None,
        covered: None,
        settings,
    };
    render_format(&settings.volume_folder_naming, &context)
        .split('/')
        .map(make_filename_safe)
        .collect::<Vec<_>>()
        .join("/")
}

/// The absolute folder path of a volume.
pub fn generate_volume_folder_path(
    root_folder: &Path,
    volume: &VolumeData,
    settings: &SettingsValues,
) -> PathBuf {
    root_folder.join(generate_volume_folder_name(volume, settings))
}

fn pick_format<'a>(
    volume: &VolumeData,
    issue: Option<&IssueData>,
    settings: &'a SettingsValues,
) -> &'a str {
    match volume.special_version {
        SpecialVersion::Normal => {
            let title_missing =
                issue.is_none_or(|i| i.title.is_none());
            if title_missing
                && settings.file_naming.contains("{issue_title}")
            {
                &settings.file_naming_empty
            } else {
                &settings.file_naming
            }
        }
        SpecialVersion::VolumeAsIssue => &settings.file_naming_vai,
        _ => &settings.file_naming_special_version,
    }
}

/// Append ` (1)`, ` (2)`, ... before the extension until the target is
/// neither planned nor on disk.
fn deduplicate_target(
    target: PathBuf,
    planned: &HashSet<PathBuf>,
    originals: &HashSet<PathBuf>,
) -> PathBuf {
    let taken = |candidate: &PathBuf| {
        planned.contains(candidate)
            || (candidate.exists() && !originals.contains(candidate))
    };

    if !taken(&target) {
        return target;
    }

    let extension = target
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let stem = target
        .with_extension("")
        .to_string_lossy()
        .to_string();

    let mut counter = 1;
    loop {
        let candidate = PathBuf::from(format!("{stem} ({counter}){extension}"));
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Compute the rename plan for the files of a volume (or one issue).
/// Only entries whose target differs from the current path are returned.
pub async fn preview_mass_rename(
    database: &Database,
    settings: &SettingsValues,
    volume_id: VolumeId,
    issue_id: Option<IssueId>,
    filepath_filter: Option<&[PathBuf]>,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let volumes = database.volumes();
    let files_repo = database.files();

    let volume = volumes.fetch_volume(volume_id).await?;
    let volume_folder = PathBuf::from(&volume.folder);
    let issues = volumes.fetch_issues(volume_id).await?;

    let files: Vec<FileData> = match issue_id {
        Some(issue_id) => files_repo.fetch_for_issue(issue_id).await?,
        None => files_repo.fetch_for_volume(volume_id).await?,
    };
    let general_files = if issue_id.is_none() {
        files_repo.general_files(volume_id).await?
    } else {
        vec![]
    };

    let originals: HashSet<PathBuf> = files
        .iter()
        .map(|f| PathBuf::from(&f.filepath))
        .chain(
            general_files
                .iter()
                .map(|g| PathBuf::from(&g.file.filepath)),
        )
        .collect();

    let mut planned: HashSet<PathBuf> = HashSet::new();
    let mut plan: Vec<(PathBuf, PathBuf)> = Vec::new();

    let mut push = |old: PathBuf, target: PathBuf| {
        let target = deduplicate_target(target, &planned, &originals);
        planned.insert(target.clone());
        if old != target {
            plan.push((old, target));
        }
    };

    // Volume-level files get canonical names in the volume folder.
    for general in &general_files {
        let old = PathBuf::from(&general.file.filepath);
        if filepath_filter.is_some_and(|filter| !filter.contains(&old)) {
            continue;
        }
        let extension = old
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let stem = match general.file_type {
            kapowarr_model::GeneralFileType::Cover => "cover",
            kapowarr_model::GeneralFileType::Metadata => "cvinfo",
        };
        push(old, volume_folder.join(format!("{stem}.{extension}")));
    }

    for file in &files {
        let old = PathBuf::from(&file.filepath);
        if filepath_filter.is_some_and(|filter| !filter.contains(&old)) {
            continue;
        }

        let covered_numbers =
            files_repo.issues_covered(&file.filepath).await?;
        let covered = match covered_numbers.as_slice() {
            [] => continue,
            [single] => IssueRange::Single(*single),
            [first, .., last] => IssueRange::Range(*first, *last),
        };
        let representative = issues
            .iter()
            .find(|i| i.calculated_issue_number == covered.first());

        let format = pick_format(&volume, representative, settings);
        let context = NamingContext {
            volume: &volume,
            issue: representative,
            covered: Some(covered),
            settings,
        };
        let mut name = render_format(format, &context);

        let extension = old
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if ScannableExt::IMAGE.contains(&extension.as_str()) {
            // Images belonging to an issue live in a sub-folder named
            // after it.
            let basename = make_filename_safe(
                &old.file_stem().unwrap_or_default().to_string_lossy(),
            );
            push(
                old,
                volume_folder
                    .join(&name)
                    .join(format!("{basename}.{extension}")),
            );
            continue;
        }

        // The rendered name must parse back to the issues it covers,
        // otherwise the next scan would unbind the file.
        let round_trips = |name: &str| {
            let data = extract_filename_data(
                &format!("{name}.{extension}"),
                ExtractOptions {
                    assume_volume_number: false,
                    ..Default::default()
                },
            );
            data.issue_number == Some(covered)
                || volume.special_version != SpecialVersion::Normal
        };

        if !round_trips(&name) {
            if format.contains("{issue_title}") {
                let retry_context = NamingContext {
                    volume: &volume,
                    issue: None,
                    covered: Some(covered),
                    settings,
                };
                name = render_format(
                    &strip_issue_title(format),
                    &retry_context,
                );
            }
            if !round_trips(&name) {
                // Keep the original name rather than break the binding.
                continue;
            }
        }

        push(old, volume_folder.join(format!("{name}.{extension}")));
    }

    Ok(plan)
}

/// Rename the files of a volume (or one issue) to their canonical names
/// and update the store in one batch. Returns the new paths of the files
/// that were renamed.
pub async fn mass_rename(
    database: &Database,
    settings: &SettingsValues,
    volume_id: VolumeId,
    issue_id: Option<IssueId>,
    filepath_filter: Option<&[PathBuf]>,
) -> Result<Vec<PathBuf>> {
    let plan = preview_mass_rename(
        database,
        settings,
        volume_id,
        issue_id,
        filepath_filter,
    )
    .await?;
    if plan.is_empty() {
        return Ok(vec![]);
    }

    info!("Renaming {} files for volume {volume_id}", plan.len());

    let mut changes: Vec<(String, String)> = Vec::with_capacity(plan.len());
    let mut new_paths: Vec<PathBuf> = Vec::with_capacity(plan.len());
    for (old, new) in &plan {
        rename_file(old, new)?;
        changes.push((
            old.to_string_lossy().to_string(),
            new.to_string_lossy().to_string(),
        ));
        new_paths.push(new.clone());
    }
    database.files().update_filepaths(&changes).await?;

    let volume = database.volumes().fetch_volume(volume_id).await?;
    let volume_folder = PathBuf::from(&volume.folder);
    if settings.delete_empty_folders {
        delete_empty_child_folders(&volume_folder, true)?;
    }

    debug!("Rename result: {new_paths:?}");
    Ok(new_paths)
}

/// Move all files of a volume into a new volume folder, preserving their
/// structure relative to the old folder.
pub async fn move_volume_folder(
    database: &Database,
    settings: &SettingsValues,
    volume_id: VolumeId,
    new_folder: &Path,
    root_folder: &Path,
) -> Result<()> {
    let volume = database.volumes().fetch_volume(volume_id).await?;
    let old_folder = PathBuf::from(&volume.folder);
    if old_folder == new_folder {
        return Ok(());
    }

    info!(
        "Moving volume folder {} to {}",
        old_folder.display(),
        new_folder.display()
    );

    let files_repo = database.files();
    let mut files: Vec<PathBuf> = files_repo
        .fetch_for_volume(volume_id)
        .await?
        .iter()
        .map(|f| PathBuf::from(&f.filepath))
        .collect();
    files.extend(
        files_repo
            .general_files(volume_id)
            .await?
            .iter()
            .map(|g| PathBuf::from(&g.file.filepath)),
    );

    let moves =
        crate::fs_util::propose_basefolder_change(&files, &old_folder, new_folder);
    let mut changes = Vec::with_capacity(moves.len());
    for (old, new) in &moves {
        rename_file(old, new)?;
        changes.push((
            old.to_string_lossy().to_string(),
            new.to_string_lossy().to_string(),
        ));
    }
    files_repo.update_filepaths(&changes).await?;

    if old_folder.is_dir() && !settings.create_empty_volume_folders {
        delete_empty_parent_folders(&old_folder, root_folder)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_number() {
        assert_eq!(pad_number(6.0, 3), "006");
        assert_eq!(pad_number(4.5, 3), "004.5");
        assert_eq!(pad_number(12.0, 2), "12");
        assert_eq!(pad_number(3.0, 1), "3");
    }

    #[test]
    fn test_format_issue_range() {
        assert_eq!(
            format_issue_range(IssueRange::Range(1.0, 5.0), 3),
            "001 - 005"
        );
        assert_eq!(format_issue_range(IssueRange::Single(7.0), 3), "007");
    }

    #[test]
    fn test_clean_series_name() {
        assert_eq!(
            clean_series_name("The Walking Dead"),
            "Walking Dead, The"
        );
        assert_eq!(clean_series_name("A-Force"), "A-Force");
        assert_eq!(clean_series_name("Invincible"), "Invincible");
    }

    #[test]
    fn test_render_format_with_missing_values() {
        let mut volume = mock_volume();
        volume.year = None;
        volume.publisher = None;
        let settings = SettingsValues::default();
        let context = NamingContext {
            volume: &volume,
            issue: None,
            covered: None,
            settings: &settings,
        };
        let rendered =
            render_format("{series_name} ({year}) {publisher}", &context);
        assert_eq!(rendered, "Mock Series (Unknown) Unknown");
    }

    #[test]
    fn test_validate_file_format() {
        assert!(validate_file_format(
            "{series_name} ({year}) Volume {volume_number} Issue {issue_number}",
            true
        )
        .is_ok());
        assert!(validate_file_format("{bogus_token}", true).is_err());
        // A format that hides the issue number can never round-trip.
        assert!(validate_file_format("{series_name}", true).is_err());
    }

    #[test]
    fn test_check_mock_filename() {
        assert!(check_mock_filename(
            "{series_name} ({year}) Volume {volume_number} Issue {issue_number}"
        ));
        assert!(!check_mock_filename("{series_name}"));
    }

    #[test]
    fn test_strip_issue_title() {
        assert_eq!(
            strip_issue_title(
                "{series_name} Issue {issue_number} - {issue_title}"
            ),
            "{series_name} Issue {issue_number}"
        );
    }
}
