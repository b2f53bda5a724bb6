//! Archive plumbing for the conversion engine: zip handling via the zip
//! crate, rar via an external `rar` binary, and the extraction of issue
//! files out of an unpacked archive folder.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use kapowarr_model::{IssueData, ScannableExt, VolumeData};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{KapowarrError, Result};
use crate::filename::{extract_filename_data, ExtractOptions};
use crate::fs_util::{
    create_folder, delete_file_folder, list_files, rename_file,
    set_detected_extension,
};
use crate::matching::folder_extraction_filter;

static RAR_AVAILABLE: OnceCell<bool> = OnceCell::new();

/// Whether the external `rar` binary is available. Checked once; without
/// it, rar-touching conversions degrade to keeping the original file.
pub fn rar_available() -> bool {
    *RAR_AVAILABLE.get_or_init(|| {
        let found = Command::new("rar")
            .arg("-inul")
            .output()
            .is_ok();
        if !found {
            warn!("rar binary not found; rar conversions are disabled");
        }
        found
    })
}

fn run_rar(args: &[&str]) -> Result<()> {
    let output = Command::new("rar").args(args).output()?;
    if !output.status.success() {
        return Err(KapowarrError::Internal(format!(
            "rar exited with {}",
            output.status
        )));
    }
    Ok(())
}

/// Extract a zip archive into a folder.
pub fn extract_zip(archive_file: &Path, target_folder: &Path) -> Result<()> {
    create_folder(target_folder)?;
    let mut archive = zip::ZipArchive::new(File::open(archive_file)?)?;
    archive.extract(target_folder)?;
    Ok(())
}

/// Pack the files of a folder into a flat zip archive.
pub fn create_zip_archive(
    source_folder: &Path,
    target_file: &Path,
) -> Result<()> {
    let mut writer = zip::ZipWriter::new(File::create(target_file)?);
    let options: zip::write::SimpleFileOptions =
        zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

    for file in list_files(source_folder, &[]) {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        writer.start_file(name, options)?;
        io::copy(&mut File::open(&file)?, &mut writer)?;
    }
    writer.finish()?;
    Ok(())
}

/// Extract a rar archive into a folder using the external binary.
pub fn extract_rar(archive_file: &Path, target_folder: &Path) -> Result<()> {
    create_folder(target_folder)?;
    run_rar(&[
        "x",
        "-inul",
        &archive_file.to_string_lossy(),
        &target_folder.to_string_lossy(),
    ])
}

/// Pack the files of a folder into a rar archive using the external
/// binary. `target_file` must not carry an extension; rar appends `.rar`.
pub fn create_rar_archive(
    source_folder: &Path,
    target_stem: &Path,
) -> Result<()> {
    run_rar(&[
        "a",
        "-ep",
        "-inul",
        &target_stem.to_string_lossy(),
        &source_folder.to_string_lossy(),
    ])
}

/// The entry names of an archive, for probing its contents without
/// extracting. Unlistable archives yield an empty list.
pub fn archive_entry_names(archive_file: &Path) -> Vec<String> {
    let extension = archive_file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "zip" | "cbz" => File::open(archive_file)
            .ok()
            .and_then(|file| zip::ZipArchive::new(file).ok())
            .map(|archive| {
                archive.file_names().map(|n| n.to_string()).collect()
            })
            .unwrap_or_default(),
        "rar" | "cbr" if rar_available() => Command::new("rar")
            .args(["lb", &archive_file.to_string_lossy()])
            .output()
            .ok()
            .map(|output| {
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        _ => vec![],
    }
}

/// Whether an archive contains issue-level sub-files, detected by running
/// the filename extractor over its entry names.
pub fn archive_contains_issues(archive_file: &Path) -> bool {
    archive_entry_names(archive_file).iter().any(|name| {
        let data = extract_filename_data(
            name,
            ExtractOptions {
                assume_volume_number: false,
                ..Default::default()
            },
        );
        data.issue_number.is_some()
    })
}

/// Move the relevant files out of an extracted archive folder into the
/// volume folder; irrelevant files are deleted with the source folder.
/// Returns the new paths of the moved files.
pub fn extract_files_from_folder(
    source_folder: &Path,
    volume: &VolumeData,
    volume_issues: &[IssueData],
    end_year: Option<i32>,
) -> Result<Vec<PathBuf>> {
    let volume_folder = PathBuf::from(&volume.folder);
    let folder_contents = list_files(source_folder, ScannableExt::ALL);

    let mut relevant_files: Vec<PathBuf> = folder_contents
        .iter()
        .filter(|file| {
            let data = extract_filename_data(
                &file.to_string_lossy(),
                ExtractOptions {
                    assume_volume_number: false,
                    ..Default::default()
                },
            );
            folder_extraction_filter(&data, volume, volume_issues, end_year)
        })
        .cloned()
        .collect();

    if relevant_files.is_empty() {
        warn!("No relevant files found in folder. Keeping all media files.");
        relevant_files = folder_contents;
    }

    debug!("Relevant files: {relevant_files:?}");

    let mut result = Vec::with_capacity(relevant_files.len());
    for file in relevant_files {
        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let in_subfolder = file
            .parent()
            .is_some_and(|parent| parent != source_folder);
        let mut destination = if in_subfolder
            && ScannableExt::IMAGE.contains(&extension.as_str())
        {
            // Page images keep their per-issue sub-folder.
            let issue_folder = file
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            volume_folder
                .join(issue_folder)
                .join(file.file_name().unwrap_or_default())
        } else {
            volume_folder.join(file.file_name().unwrap_or_default())
        };

        // Trust the magic bytes over whatever extension the release used.
        let detected = set_detected_extension(&file);
        if let Some(extension) = detected.extension() {
            destination = destination.with_extension(extension);
        }

        rename_file(&file, &destination)?;
        result.push(destination);
    }

    delete_file_folder(source_folder)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options: zip::write::SimpleFileOptions =
            zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_zip_round_trip_preserves_content() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("test.zip");
        make_zip(
            &archive,
            &[("Issue 1.cbz", b"one".as_slice()), ("Issue 2.cbz", b"two")],
        );

        let extracted = temp.path().join("out");
        extract_zip(&archive, &extracted).unwrap();
        assert_eq!(
            std::fs::read(extracted.join("Issue 1.cbz")).unwrap(),
            b"one"
        );

        let repacked = temp.path().join("repacked.zip");
        create_zip_archive(&extracted, &repacked).unwrap();
        let again = temp.path().join("again");
        extract_zip(&repacked, &again).unwrap();
        assert_eq!(
            std::fs::read(again.join("Issue 1.cbz")).unwrap(),
            b"one"
        );
        assert_eq!(
            std::fs::read(again.join("Issue 2.cbz")).unwrap(),
            b"two"
        );
    }

    #[test]
    fn test_archive_contains_issues() {
        let temp = TempDir::new().unwrap();
        let with_issues = temp.path().join("issues.zip");
        make_zip(
            &with_issues,
            &[
                ("Invincible 001.cbz", b"a".as_slice()),
                ("Invincible 002.cbz", b"b"),
                ("cover.jpg", b"c"),
            ],
        );
        assert!(archive_contains_issues(&with_issues));

        let without = temp.path().join("plain.zip");
        make_zip(&without, &[("page_scan.jpg", b"a".as_slice())]);
        assert!(!archive_contains_issues(&without));
    }
}
