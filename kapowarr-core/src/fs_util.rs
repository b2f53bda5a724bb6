//! Folder and file handling: walking, renaming, cleaning names and
//! collapsing empty directory trees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::filename::ARCHIVE_EXTRACT_FOLDER;

/// Magic bytes of archive formats the library knows, mapped to their
/// canonical extension.
const ARCHIVE_MAGIC_BYTES: [(&[u8], &str); 2] =
    [(b"PK\x03\x04", "zip"), (b"Rar!\x1A\x07", "rar")];

/// Check if `folder` is inside (or equal to) `base_folder`.
pub fn folder_is_inside_folder(base_folder: &Path, folder: &Path) -> bool {
    folder.starts_with(base_folder)
}

/// Find the deepest folder that is shared between the files.
pub fn find_common_folder(files: &[PathBuf]) -> Option<PathBuf> {
    let first = files.first()?;
    if files.len() == 1 {
        return first.parent().map(Path::to_path_buf);
    }

    let mut common: PathBuf = first.parent()?.to_path_buf();
    for file in &files[1..] {
        while !file.starts_with(&common) {
            common = common.parent()?.to_path_buf();
        }
    }
    Some(common)
}

/// Propose new paths with a different base folder for a list of files.
pub fn propose_basefolder_change(
    files: &[PathBuf],
    current_base_folder: &Path,
    desired_base_folder: &Path,
) -> Vec<(PathBuf, PathBuf)> {
    files
        .iter()
        .map(|file| {
            let new_path = match file.strip_prefix(current_base_folder) {
                Ok(relative) => desired_base_folder.join(relative),
                Err(_) => desired_base_folder
                    .join(file.file_name().unwrap_or_default()),
            };
            (file.clone(), new_path)
        })
        .collect()
}

/// The folder an archive file gets extracted into, inside the volume
/// folder. Always removed at the end of a conversion.
pub fn generate_archive_folder(
    volume_folder: &Path,
    archive_file: &Path,
) -> PathBuf {
    let relative = archive_file
        .strip_prefix(volume_folder)
        .unwrap_or(archive_file);
    let flattened: String = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("_");
    volume_folder.join(format!("{ARCHIVE_EXTRACT_FOLDER}_{flattened}"))
}

/// List all files in a folder recursively. Hidden files are ignored.
/// `extensions` filters on lowercase dot-less extensions; empty means no
/// filter. Results are sorted for deterministic processing order.
pub fn list_files(folder: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter(|entry| {
            if extensions.is_empty() {
                return true;
            }
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .is_some_and(|e| extensions.contains(&e.as_str()))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

pub fn create_folder(folder: &Path) -> Result<()> {
    fs::create_dir_all(folder)?;
    Ok(())
}

/// Whether a metadata error after a successful copy can be tolerated.
/// NFS mounts commonly refuse chmod (EPERM) and xattr writes
/// (ENOTSUP, 524 on Linux).
fn is_tolerable_metadata_error(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(1) | Some(524))
}

/// Rename a file, taking care of new folder locations and the
/// complications of network filesystems.
pub fn rename_file(before: &Path, after: &Path) -> Result<()> {
    if before == after {
        return Ok(());
    }
    if before.is_dir() && folder_is_inside_folder(before, after) {
        // Cannot move a folder into itself.
        return Ok(());
    }

    debug!("Renaming file {} to {}", before.display(), after.display());

    if let Some(parent) = after.parent() {
        create_folder(parent)?;
    }

    match fs::rename(before, after) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Crossing filesystems: copy, then carry permissions over as
            // far as the target filesystem lets us.
            fs::copy(before, after)?;
            if let Ok(metadata) = fs::metadata(before) {
                if let Err(error) =
                    fs::set_permissions(after, metadata.permissions())
                {
                    if !is_tolerable_metadata_error(&error) {
                        return Err(error.into());
                    }
                    warn!(
                        "Could not carry over permissions to {}: {error}",
                        after.display()
                    );
                }
            }
            fs::remove_file(before)?;
            Ok(())
        }
    }
}

/// Delete a file or, recursively, a folder. Missing paths are fine.
pub fn delete_file_folder(path: &Path) -> Result<()> {
    if path.is_file() {
        fs::remove_file(path)?;
    } else if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    }
    Ok(())
}

/// Delete parent folders that are empty, walking up from `top_folder`
/// until a folder with content or the root folder is reached.
pub fn delete_empty_parent_folders(
    top_folder: &Path,
    root_folder: &Path,
) -> Result<()> {
    if top_folder == root_folder {
        return Ok(());
    }

    debug!(
        "Deleting empty parent folders from {} until {}",
        top_folder.display(),
        root_folder.display()
    );

    if !folder_is_inside_folder(root_folder, top_folder) {
        error!(
            "The folder {} is not in {}",
            top_folder.display(),
            root_folder.display()
        );
        return Ok(());
    }

    let mut parent = if top_folder.is_file() {
        match top_folder.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Ok(()),
        }
    } else {
        top_folder.to_path_buf()
    };

    // Walk up while each folder is empty or only holds the (empty) child
    // we came from.
    let mut child_name: Option<std::ffi::OsString> = None;
    loop {
        if parent.is_dir() {
            if parent == root_folder {
                break;
            }
            let entries = read_dir_names(&parent);
            let only_previous_child = entries.is_empty()
                || (entries.len() == 1
                    && child_name.as_deref().is_some_and(|child| {
                        entries[0].file_name() == Some(child)
                    }));
            if !only_previous_child {
                break;
            }
        }
        child_name = parent.file_name().map(|n| n.to_os_string());
        match parent.parent() {
            Some(up) => parent = up.to_path_buf(),
            None => break,
        }
    }

    if let Some(child) = child_name {
        let lowest_empty = parent.join(child);
        debug!(
            "Deleting folder and children: {}",
            lowest_empty.display()
        );
        delete_file_folder(&lowest_empty)?;
    }
    Ok(())
}

fn read_dir_names(folder: &Path) -> Vec<PathBuf> {
    fs::read_dir(folder)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .collect()
        })
        .unwrap_or_default()
}

/// Delete child folders that don't (indirectly) contain any files.
pub fn delete_empty_child_folders(
    base_folder: &Path,
    skip_hidden_folders: bool,
) -> Result<()> {
    debug!(
        "Deleting empty child folders from {}",
        base_folder.display()
    );

    fn visit(
        folder: &Path,
        skip_hidden: bool,
        first_call: bool,
        to_delete: &mut Vec<PathBuf>,
    ) -> bool {
        let mut folders = Vec::new();
        let mut contains_files = false;

        for entry in read_dir_names(folder) {
            let hidden = entry
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(false);
            if entry.is_dir() {
                if skip_hidden && hidden {
                    contains_files = true;
                    continue;
                }
                folders.push(entry);
            } else {
                contains_files = true;
            }
        }

        if !contains_files && folders.is_empty() {
            return true;
        }

        let results: Vec<(PathBuf, bool)> = folders
            .into_iter()
            .map(|f| {
                let empty = visit(&f, skip_hidden, false, to_delete);
                (f, empty)
            })
            .collect();

        if !contains_files && results.iter().all(|(_, empty)| *empty) {
            if first_call {
                to_delete.extend(results.into_iter().map(|(f, _)| f));
            }
            return true;
        }

        to_delete.extend(
            results
                .into_iter()
                .filter(|(_, empty)| *empty)
                .map(|(f, _)| f),
        );
        false
    }

    let base = if base_folder.is_file() {
        match base_folder.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Ok(()),
        }
    } else {
        base_folder.to_path_buf()
    };

    let mut to_delete = Vec::new();
    visit(&base, skip_hidden_folders, true, &mut to_delete);

    for folder in to_delete {
        debug!("Deleting folder and children: {}", folder.display());
        delete_file_folder(&folder)?;
    }
    Ok(())
}

/// Remove characters that are unsafe in a single filename component.
pub fn make_filename_safe(filestring: &str) -> String {
    let without_separators =
        filestring.replace(" / ", " - ").replace(['/', '\\'], "");
    let mut result = String::with_capacity(without_separators.len());
    for (i, c) in without_separators.chars().enumerate() {
        match c {
            '<' | '>' | '"' | '|' | '?' | '*' | '\x00' => {}
            ':' => {
                // "Title: Subtitle" reads better as "Title - Subtitle".
                if i > 0 {
                    result.push_str(" -");
                }
            }
            _ => result.push(c),
        }
    }
    // Collapse runs of spaces introduced by removals.
    let collapsed = result.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

/// Find the real archive type of a file via its magic bytes and return
/// the path with the matching extension. Non-archives and unrecognised
/// content keep their path.
pub fn set_detected_extension(filepath: &Path) -> PathBuf {
    use std::io::Read;

    let mut start = [0u8; 8];
    let Ok(mut file) = fs::File::open(filepath) else {
        return filepath.to_path_buf();
    };
    let Ok(read) = file.read(&mut start) else {
        return filepath.to_path_buf();
    };

    let detected = ARCHIVE_MAGIC_BYTES
        .iter()
        .find(|(magic, _)| start[..read].starts_with(magic))
        .map(|(_, ext)| *ext);
    let Some(mut detected) = detected else {
        return filepath.to_path_buf();
    };

    let current = filepath
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if current == detected {
        return filepath.to_path_buf();
    }

    // Comic archives use the cb* aliases; stay within that family.
    if current == "cbz" || current == "cbr" {
        detected = match detected {
            "zip" => "cbz",
            "rar" => "cbr",
            other => other,
        };
        if current == detected {
            return filepath.to_path_buf();
        }
    }

    filepath.with_extension(detected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_list_files_filters_and_skips_hidden() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        File::create(temp.path().join("a.cbz")).unwrap();
        File::create(temp.path().join(".hidden.cbz")).unwrap();
        File::create(temp.path().join("sub/b.zip")).unwrap();
        File::create(temp.path().join("notes.txt")).unwrap();

        let files = list_files(temp.path(), &["cbz", "zip"]);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.cbz", "b.zip"]);
    }

    #[test]
    fn test_rename_file_creates_folders() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.cbz");
        File::create(&source).unwrap();
        let target = temp.path().join("new/folder/b.cbz");

        rename_file(&source, &target).unwrap();
        assert!(!source.exists());
        assert!(target.exists());
    }

    #[test]
    fn test_delete_empty_child_folders() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b1/c1")).unwrap();
        fs::create_dir_all(temp.path().join("a/b2")).unwrap();
        File::create(temp.path().join("a/b2/file.txt")).unwrap();

        delete_empty_child_folders(&temp.path().join("a"), true).unwrap();
        assert!(!temp.path().join("a/b1").exists());
        assert!(temp.path().join("a/b2/file.txt").exists());
    }

    #[test]
    fn test_delete_empty_parent_folders() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("x/y/z")).unwrap();
        File::create(root.join("keep.txt")).unwrap();

        delete_empty_parent_folders(&root.join("x/y/z"), &root).unwrap();
        assert!(!root.join("x").exists());
        assert!(root.join("keep.txt").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_make_filename_safe() {
        assert_eq!(
            make_filename_safe("Batman: Year One?"),
            "Batman - Year One"
        );
        assert_eq!(make_filename_safe("a / b"), "a - b");
        assert_eq!(make_filename_safe("trailing dot."), "trailing dot");
    }

    #[test]
    fn test_set_detected_extension() {
        let temp = TempDir::new().unwrap();
        let fake_cbr = temp.path().join("issue.cbr");
        let mut file = File::create(&fake_cbr).unwrap();
        file.write_all(b"PK\x03\x04rest of zip").unwrap();

        let corrected = set_detected_extension(&fake_cbr);
        assert_eq!(
            corrected.extension().and_then(|e| e.to_str()),
            Some("cbz")
        );

        let text = temp.path().join("notes.txt");
        let mut file = File::create(&text).unwrap();
        file.write_all(b"hello").unwrap();
        assert_eq!(set_detected_extension(&text), text);
    }

    #[test]
    fn test_generate_archive_folder() {
        let folder = generate_archive_folder(
            Path::new("/library/Batman (2016)"),
            Path::new("/library/Batman (2016)/sub/Batman 001-005.zip"),
        );
        assert_eq!(
            folder,
            Path::new(
                "/library/Batman (2016)/KapowarrExtract_sub_Batman 001-005"
            )
        );
    }

    #[test]
    fn test_common_folder() {
        let files = vec![
            PathBuf::from("/a/b/c/file1.cbz"),
            PathBuf::from("/a/b/d/file2.cbz"),
        ];
        assert_eq!(find_common_folder(&files), Some(PathBuf::from("/a/b")));

        let single = vec![PathBuf::from("/a/b/c/file1.cbz")];
        assert_eq!(
            find_common_folder(&single),
            Some(PathBuf::from("/a/b/c"))
        );
    }
}
