//! End-to-end tests of the file pipeline: scanning, binding accounting,
//! renaming and archive extraction against a real (temporary) filesystem
//! and an in-memory store.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use kapowarr_core::conversion::{mass_convert, ConvertOptions};
use kapowarr_core::db::volumes::NewVolume;
use kapowarr_core::db::Database;
use kapowarr_core::events::EventBus;
use kapowarr_core::naming::{mass_rename, preview_mass_rename};
use kapowarr_core::scanner::{scan_files, ScanOptions};
use kapowarr_core::settings::SettingsValues;
use kapowarr_model::{
    ComicvineId, Event, GeneralFileType, IssueMetadata, RootFolderId,
    SpecialVersion, VolumeId,
};
use tempfile::TempDir;

struct Fixture {
    database: Database,
    bus: EventBus,
    settings: SettingsValues,
    volume_id: VolumeId,
    volume_folder: PathBuf,
    _temp: TempDir,
}

async fn fixture(
    title: &str,
    year: i32,
    volume_number: i32,
    issues: &[(&str, f64, Option<&str>)],
) -> Fixture {
    let temp = TempDir::new().unwrap();
    let database = Database::open_in_memory().await.unwrap();

    let root_folder = temp.path().join("library");
    std::fs::create_dir_all(&root_folder).unwrap();
    sqlx::query("INSERT INTO root_folders(id, folder) VALUES (1, ?);")
        .bind(root_folder.to_string_lossy().to_string())
        .execute(database.pool())
        .await
        .unwrap();

    let volume_folder = root_folder.join(format!("{title} ({year})"));
    std::fs::create_dir_all(&volume_folder).unwrap();

    let volume_id = database
        .volumes()
        .insert_volume(&NewVolume {
            comicvine_id: ComicvineId(1000),
            title: title.to_string(),
            alt_title: None,
            year: Some(year),
            publisher: Some("Image".to_string()),
            volume_number,
            description: None,
            site_url: String::new(),
            monitored: true,
            monitor_new_issues: true,
            root_folder: RootFolderId(1),
            folder: volume_folder.to_string_lossy().to_string(),
            custom_folder: false,
            special_version: SpecialVersion::Normal,
        })
        .await
        .unwrap();

    let issue_metadata: Vec<IssueMetadata> = issues
        .iter()
        .enumerate()
        .map(|(index, (number, calculated, issue_title))| IssueMetadata {
            comicvine_id: ComicvineId(2000 + index as i64),
            volume_comicvine_id: ComicvineId(1000),
            issue_number: number.to_string(),
            calculated_issue_number: *calculated,
            title: issue_title.map(|t| t.to_string()),
            date: chrono::NaiveDate::from_ymd_opt(year, 1, 1),
            description: None,
        })
        .collect();
    database
        .volumes()
        .upsert_issues(volume_id, &issue_metadata, true)
        .await
        .unwrap();

    Fixture {
        database,
        bus: EventBus::new(),
        settings: SettingsValues::default(),
        volume_id,
        volume_folder,
        _temp: temp,
    }
}

fn touch(path: &Path, content: &[u8]) {
    let mut file = File::create(path).unwrap();
    file.write_all(content).unwrap();
}

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

#[tokio::test]
async fn test_scan_binds_files_and_accounts_downloads() {
    let fixture = fixture(
        "Invincible",
        2003,
        1,
        &[("1", 1.0, None), ("2", 2.0, None), ("3", 3.0, None)],
    )
    .await;
    let mut events = fixture.bus.subscribe();

    touch(
        &fixture.volume_folder.join("Invincible 001.cbz"),
        b"issue one",
    );
    touch(
        &fixture.volume_folder.join("Invincible 002.cbz"),
        b"issue two",
    );

    scan_files(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ScanOptions {
            del_unmatched_files: true,
            update_websocket: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let files = fixture
        .database
        .files()
        .fetch_for_volume(fixture.volume_id)
        .await
        .unwrap();
    assert_eq!(files.len(), 2);

    // Binding accounting: exactly the two issues flip to downloaded.
    let event = events.recv().await.unwrap();
    match event {
        Event::DownloadedStatus {
            downloaded_issues,
            not_downloaded_issues,
            ..
        } => {
            assert_eq!(downloaded_issues.len(), 2);
            assert!(not_downloaded_issues.is_empty());
        }
        other => panic!("expected DownloadedStatus, got {other:?}"),
    }

    // File sizes in the store match the disk.
    for file in &files {
        let on_disk = std::fs::metadata(&file.filepath).unwrap().len() as i64;
        assert_eq!(file.size, on_disk);
    }

    // Deleting a file and rescanning flips its issue back and sweeps the
    // orphaned row.
    std::fs::remove_file(
        fixture.volume_folder.join("Invincible 002.cbz"),
    )
    .unwrap();
    scan_files(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ScanOptions {
            del_unmatched_files: true,
            update_websocket: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let event = events.recv().await.unwrap();
    match event {
        Event::DownloadedStatus {
            downloaded_issues,
            not_downloaded_issues,
            ..
        } => {
            assert!(downloaded_issues.is_empty());
            assert_eq!(not_downloaded_issues.len(), 1);
        }
        other => panic!("expected DownloadedStatus, got {other:?}"),
    }

    let all_files = fixture.database.files().fetch_all().await.unwrap();
    assert_eq!(all_files.len(), 1);
}

#[tokio::test]
async fn test_scan_range_file_binds_all_covered_issues() {
    let fixture = fixture(
        "Invincible",
        2003,
        1,
        &[("1", 1.0, None), ("2", 2.0, None), ("3", 3.0, None)],
    )
    .await;

    let range_file =
        fixture.volume_folder.join("Invincible 001-003 (2003).cbz");
    touch(&range_file, b"the whole run");

    scan_files(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ScanOptions::full(),
    )
    .await
    .unwrap();

    let covered = fixture
        .database
        .files()
        .issues_covered(&range_file.to_string_lossy())
        .await
        .unwrap();
    assert_eq!(covered, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn test_mass_rename_builds_canonical_path() {
    let mut fixture =
        fixture("Batman", 2016, 3, &[("6", 6.0, Some("The Rise"))]).await;
    fixture.settings.file_naming = concat!(
        "{series_name} ({year}) Volume {volume_number}/",
        "{series_name} ({year}) Volume {volume_number} ",
        "Issue {issue_number} - {issue_title}",
    )
    .to_string();

    let original = fixture.volume_folder.join("Batman 006.cbz");
    touch(&original, b"the rise");
    scan_files(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ScanOptions::full(),
    )
    .await
    .unwrap();

    let renamed = mass_rename(
        &fixture.database,
        &fixture.settings,
        fixture.volume_id,
        None,
        None,
    )
    .await
    .unwrap();

    let expected = fixture
        .volume_folder
        .join("Batman (2016) Volume 3")
        .join("Batman (2016) Volume 3 Issue 006 - The Rise.cbz");
    assert_eq!(renamed, vec![expected.clone()]);
    assert!(expected.exists());
    assert!(!original.exists());

    // Rerunning is a no-op.
    let plan = preview_mass_rename(
        &fixture.database,
        &fixture.settings,
        fixture.volume_id,
        None,
        None,
    )
    .await
    .unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn test_rename_targets_are_collision_free() {
    let fixture = fixture(
        "Invincible",
        2003,
        1,
        &[("1", 1.0, None), ("2", 2.0, None)],
    )
    .await;

    // Two distinct files for the same issue produce two distinct
    // targets.
    touch(
        &fixture.volume_folder.join("Invincible 001.cbz"),
        b"scan one",
    );
    touch(
        &fixture.volume_folder.join("Invincible 1 (2003).cbz"),
        b"scan two",
    );
    scan_files(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ScanOptions::full(),
    )
    .await
    .unwrap();

    let plan = preview_mass_rename(
        &fixture.database,
        &fixture.settings,
        fixture.volume_id,
        None,
        None,
    )
    .await
    .unwrap();

    let mut targets: Vec<PathBuf> =
        plan.iter().map(|(_, after)| after.clone()).collect();
    let total = targets.len();
    targets.sort();
    targets.dedup();
    assert_eq!(targets.len(), total);
    for target in &targets {
        assert!(target.starts_with(&fixture.volume_folder));
    }
}

#[tokio::test]
async fn test_extracting_issue_archive() {
    let mut fixture = fixture(
        "Invincible",
        2003,
        1,
        &[("1", 1.0, None), ("2", 2.0, None)],
    )
    .await;
    fixture.settings.extract_issue_ranges = true;
    let mut events = fixture.bus.subscribe();

    let archive =
        fixture.volume_folder.join("Invincible 001-002 (2003).zip");
    make_zip(
        &archive,
        &[
            ("Invincible 001 (2003).cbz", b"one".as_slice()),
            ("Invincible 002 (2003).cbz", b"two"),
            ("cover.jpg", b"art"),
        ],
    );

    // The download flow: the archive gets scanned in, then converted.
    scan_files(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ScanOptions {
            del_unmatched_files: true,
            update_websocket: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    match events.recv().await.unwrap() {
        Event::DownloadedStatus {
            downloaded_issues, ..
        } => assert_eq!(downloaded_issues.len(), 2),
        other => panic!("expected DownloadedStatus, got {other:?}"),
    }

    mass_convert(
        &fixture.database,
        &fixture.settings,
        &fixture.bus,
        fixture.volume_id,
        ConvertOptions::default(),
    )
    .await
    .unwrap();

    // The archive is gone, its content sits in the volume folder under
    // canonical names.
    assert!(!archive.exists());
    let issue_one = fixture
        .volume_folder
        .join("Invincible (2003) Volume 1 Issue 001.cbz");
    let issue_two = fixture
        .volume_folder
        .join("Invincible (2003) Volume 1 Issue 002.cbz");
    assert!(issue_one.exists());
    assert!(issue_two.exists());
    assert!(fixture.volume_folder.join("cover.jpg").exists());

    // Conversion preserved the issue contents.
    assert_eq!(std::fs::read(&issue_one).unwrap(), b"one");
    assert_eq!(std::fs::read(&issue_two).unwrap(), b"two");

    // No stray extraction folder is left behind.
    let leftovers: Vec<_> = std::fs::read_dir(&fixture.volume_folder)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("KapowarrExtract")
        })
        .collect();
    assert!(leftovers.is_empty());

    // Each issue file is bound to its issue, the cover to the volume.
    let issue_files = fixture
        .database
        .files()
        .fetch_for_volume(fixture.volume_id)
        .await
        .unwrap();
    assert_eq!(issue_files.len(), 2);
    let covered = fixture
        .database
        .files()
        .issues_covered(&issue_one.to_string_lossy())
        .await
        .unwrap();
    assert_eq!(covered, vec![1.0]);

    let general = fixture
        .database
        .files()
        .general_files(fixture.volume_id)
        .await
        .unwrap();
    assert_eq!(general.len(), 1);
    assert_eq!(general[0].file_type, GeneralFileType::Cover);

    // The archive's row is swept.
    let all_files = fixture.database.files().fetch_all().await.unwrap();
    assert_eq!(all_files.len(), 3);
}
