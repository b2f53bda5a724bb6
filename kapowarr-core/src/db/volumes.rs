//! Queries over volumes and their issues.

use chrono::NaiveDate;
use kapowarr_model::{
    ComicvineId, IssueData, IssueId, IssueMetadata, RootFolderId,
    SpecialVersion, VolumeData, VolumeId,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{KapowarrError, Result};

fn volume_from_row(row: &SqliteRow) -> Result<VolumeData> {
    let special_version: String = row.get("special_version");
    Ok(VolumeData {
        id: VolumeId(row.get("id")),
        comicvine_id: ComicvineId(row.get("comicvine_id")),
        title: row.get("title"),
        alt_title: row.get("alt_title"),
        year: row.get("year"),
        publisher: row.get("publisher"),
        volume_number: row.get("volume_number"),
        description: row.get("description"),
        site_url: row.get("site_url"),
        monitored: row.get("monitored"),
        monitor_new_issues: row.get("monitor_new_issues"),
        root_folder: RootFolderId(row.get("root_folder")),
        folder: row.get("folder"),
        custom_folder: row.get("custom_folder"),
        special_version: special_version
            .parse::<SpecialVersion>()
            .map_err(KapowarrError::Internal)?,
        special_version_locked: row.get("special_version_locked"),
        last_cv_fetch: row.get("last_cv_fetch"),
    })
}

fn issue_from_row(row: &SqliteRow) -> IssueData {
    let date: Option<String> = row.get("date");
    IssueData {
        id: IssueId(row.get("id")),
        volume_id: VolumeId(row.get("volume_id")),
        comicvine_id: ComicvineId(row.get("comicvine_id")),
        issue_number: row.get("issue_number"),
        calculated_issue_number: row.get("calculated_issue_number"),
        title: row.get("title"),
        date: date
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        monitored: row.get("monitored"),
    }
}

const VOLUME_COLUMNS: &str = r"
    id, comicvine_id, title, alt_title, year, publisher, volume_number,
    description, site_url, monitored, monitor_new_issues, root_folder,
    folder, custom_folder, special_version, special_version_locked,
    last_cv_fetch
";

/// Parameters for creating a volume row.
#[derive(Debug, Clone)]
pub struct NewVolume {
    pub comicvine_id: ComicvineId,
    pub title: String,
    pub alt_title: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    pub volume_number: i32,
    pub description: Option<String>,
    pub site_url: String,
    pub monitored: bool,
    pub monitor_new_issues: bool,
    pub root_folder: RootFolderId,
    pub folder: String,
    pub custom_folder: bool,
    pub special_version: SpecialVersion,
}

#[derive(Debug, Clone)]
pub struct VolumesRepository {
    pool: SqlitePool,
}

impl VolumesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch_volume(&self, volume_id: VolumeId) -> Result<VolumeData> {
        let query =
            format!("SELECT {VOLUME_COLUMNS} FROM volumes WHERE id = ?;");
        let row = sqlx::query(&query)
            .bind(volume_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(KapowarrError::VolumeNotFound(volume_id))?;
        volume_from_row(&row)
    }

    pub async fn fetch_all_volumes(&self) -> Result<Vec<VolumeData>> {
        let query =
            format!("SELECT {VOLUME_COLUMNS} FROM volumes ORDER BY title;");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(volume_from_row).collect()
    }

    pub async fn volumes_in_root_folder(
        &self,
        root_folder: RootFolderId,
    ) -> Result<Vec<VolumeId>> {
        let ids = sqlx::query_scalar::<_, VolumeId>(
            "SELECT id FROM volumes WHERE root_folder = ?;",
        )
        .bind(root_folder)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn volume_id_of_comicvine(
        &self,
        comicvine_id: ComicvineId,
    ) -> Result<Option<VolumeId>> {
        let id = sqlx::query_scalar::<_, VolumeId>(
            "SELECT id FROM volumes WHERE comicvine_id = ?;",
        )
        .bind(comicvine_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn insert_volume(&self, new: &NewVolume) -> Result<VolumeId> {
        let result = sqlx::query(
            r"
            INSERT INTO volumes(
                comicvine_id, title, alt_title, year, publisher,
                volume_number, description, site_url, monitored,
                monitor_new_issues, root_folder, folder, custom_folder,
                special_version, special_version_locked, last_cv_fetch
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0);
            ",
        )
        .bind(new.comicvine_id)
        .bind(&new.title)
        .bind(&new.alt_title)
        .bind(new.year)
        .bind(&new.publisher)
        .bind(new.volume_number)
        .bind(&new.description)
        .bind(&new.site_url)
        .bind(new.monitored)
        .bind(new.monitor_new_issues)
        .bind(new.root_folder)
        .bind(&new.folder)
        .bind(new.custom_folder)
        .bind(new.special_version.as_str())
        .execute(&self.pool)
        .await?;
        Ok(VolumeId(result.last_insert_rowid()))
    }

    /// Update the mutable metadata columns after a ComicVine refresh.
    pub async fn update_metadata(
        &self,
        volume_id: VolumeId,
        title: &str,
        year: Option<i32>,
        publisher: Option<&str>,
        volume_number: i32,
        description: Option<&str>,
        site_url: &str,
        last_cv_fetch: i64,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE volumes SET
                title = ?, year = ?, publisher = ?, volume_number = ?,
                description = ?, site_url = ?, last_cv_fetch = ?
            WHERE id = ?;
            ",
        )
        .bind(title)
        .bind(year)
        .bind(publisher)
        .bind(volume_number)
        .bind(description)
        .bind(site_url)
        .bind(last_cv_fetch)
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_monitored(
        &self,
        volume_id: VolumeId,
        monitored: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE volumes SET monitored = ? WHERE id = ?;")
            .bind(monitored)
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_monitor_new_issues(
        &self,
        volume_id: VolumeId,
        monitor_new_issues: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE volumes SET monitor_new_issues = ? WHERE id = ?;")
            .bind(monitor_new_issues)
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_special_version(
        &self,
        volume_id: VolumeId,
        special_version: SpecialVersion,
        locked: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE volumes
            SET special_version = ?, special_version_locked = ?
            WHERE id = ?;
            ",
        )
        .bind(special_version.as_str())
        .bind(locked)
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_folder(
        &self,
        volume_id: VolumeId,
        root_folder: RootFolderId,
        folder: &str,
        custom_folder: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE volumes
            SET root_folder = ?, folder = ?, custom_folder = ?
            WHERE id = ?;
            ",
        )
        .bind(root_folder)
        .bind(folder)
        .bind(custom_folder)
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_volume(&self, volume_id: VolumeId) -> Result<()> {
        sqlx::query("DELETE FROM volumes WHERE id = ?;")
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fetch_issues(
        &self,
        volume_id: VolumeId,
    ) -> Result<Vec<IssueData>> {
        let rows = sqlx::query(
            r"
            SELECT id, volume_id, comicvine_id, issue_number,
                   calculated_issue_number, title, date, monitored
            FROM issues
            WHERE volume_id = ?
            ORDER BY calculated_issue_number;
            ",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(issue_from_row).collect())
    }

    pub async fn fetch_issue(&self, issue_id: IssueId) -> Result<IssueData> {
        let row = sqlx::query(
            r"
            SELECT id, volume_id, comicvine_id, issue_number,
                   calculated_issue_number, title, date, monitored
            FROM issues
            WHERE id = ?;
            ",
        )
        .bind(issue_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(KapowarrError::IssueNotFound(issue_id))?;
        Ok(issue_from_row(&row))
    }

    /// The issues of a volume whose calculated number falls inside the
    /// inclusive range.
    pub async fn issues_in_range(
        &self,
        volume_id: VolumeId,
        start: f64,
        end: f64,
    ) -> Result<Vec<IssueData>> {
        let rows = sqlx::query(
            r"
            SELECT id, volume_id, comicvine_id, issue_number,
                   calculated_issue_number, title, date, monitored
            FROM issues
            WHERE volume_id = ?
                AND ? <= calculated_issue_number
                AND calculated_issue_number <= ?
            ORDER BY calculated_issue_number;
            ",
        )
        .bind(volume_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(issue_from_row).collect())
    }

    /// Monitored issues without any file: the ones worth searching for.
    pub async fn open_issues(
        &self,
        volume_id: VolumeId,
    ) -> Result<Vec<IssueData>> {
        let rows = sqlx::query(
            r"
            SELECT id, volume_id, comicvine_id, issue_number,
                   calculated_issue_number, title, date, monitored
            FROM issues
            WHERE volume_id = ?
                AND monitored = 1
                AND id NOT IN (SELECT issue_id FROM issues_files)
            ORDER BY calculated_issue_number;
            ",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(issue_from_row).collect())
    }

    /// The year of the last released issue, for year matching on late
    /// issues of long-running volumes.
    pub async fn ending_year(&self, volume_id: VolumeId) -> Result<Option<i32>> {
        let date: Option<String> = sqlx::query_scalar(
            "SELECT MAX(date) FROM issues WHERE volume_id = ?;",
        )
        .bind(volume_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok()))
    }

    pub async fn set_issue_monitored(
        &self,
        issue_id: IssueId,
        monitored: bool,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE issues SET monitored = ? WHERE id = ?;")
                .bind(monitored)
                .bind(issue_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(KapowarrError::IssueNotFound(issue_id));
        }
        Ok(())
    }

    /// Sync the issue rows of a volume with fresh catalog metadata.
    /// Existing issues keep their monitored flag; new ones follow
    /// `monitor_new`; issues gone from the catalog are deleted.
    pub async fn upsert_issues(
        &self,
        volume_id: VolumeId,
        issues: &[IssueMetadata],
        monitor_new: bool,
    ) -> Result<()> {
        let mut transaction = self.pool.begin().await?;

        let mut kept_ids: Vec<i64> = Vec::with_capacity(issues.len());
        for issue in issues {
            let date = issue.date.map(|d| d.format("%Y-%m-%d").to_string());
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM issues WHERE comicvine_id = ?;",
            )
            .bind(issue.comicvine_id)
            .fetch_optional(&mut *transaction)
            .await?;

            match existing {
                Some(id) => {
                    sqlx::query(
                        r"
                        UPDATE issues SET
                            issue_number = ?, calculated_issue_number = ?,
                            title = ?, date = ?
                        WHERE id = ?;
                        ",
                    )
                    .bind(&issue.issue_number)
                    .bind(issue.calculated_issue_number)
                    .bind(&issue.title)
                    .bind(&date)
                    .bind(id)
                    .execute(&mut *transaction)
                    .await?;
                    kept_ids.push(id);
                }
                None => {
                    let result = sqlx::query(
                        r"
                        INSERT INTO issues(
                            volume_id, comicvine_id, issue_number,
                            calculated_issue_number, title, date, monitored
                        ) VALUES (?, ?, ?, ?, ?, ?, ?);
                        ",
                    )
                    .bind(volume_id)
                    .bind(issue.comicvine_id)
                    .bind(&issue.issue_number)
                    .bind(issue.calculated_issue_number)
                    .bind(&issue.title)
                    .bind(&date)
                    .bind(monitor_new)
                    .execute(&mut *transaction)
                    .await?;
                    kept_ids.push(result.last_insert_rowid());
                }
            }
        }

        let placeholders = if kept_ids.is_empty() {
            "NULL".to_string()
        } else {
            kept_ids
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ")
        };
        let delete_query = format!(
            "DELETE FROM issues WHERE volume_id = ? AND id NOT IN ({placeholders});"
        );
        let mut delete = sqlx::query(&delete_query).bind(volume_id);
        for id in &kept_ids {
            delete = delete.bind(id);
        }
        delete.execute(&mut *transaction).await?;

        transaction.commit().await?;
        Ok(())
    }

    /// Library totals for the stats endpoint.
    pub async fn stats(&self) -> Result<LibraryStats> {
        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM volumes) AS volumes,
                (SELECT COUNT(*) FROM volumes WHERE monitored = 1)
                    AS monitored,
                (SELECT COUNT(*) FROM issues) AS issues,
                (SELECT COUNT(DISTINCT issue_id) FROM issues_files)
                    AS downloaded_issues,
                (SELECT COUNT(*) FROM files) AS files,
                (SELECT COALESCE(SUM(size), 0) FROM files) AS total_file_size;
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LibraryStats {
            volumes: row.get("volumes"),
            monitored: row.get("monitored"),
            unmonitored: row.get::<i64, _>("volumes")
                - row.get::<i64, _>("monitored"),
            issues: row.get("issues"),
            downloaded_issues: row.get("downloaded_issues"),
            files: row.get("files"),
            total_file_size: row.get("total_file_size"),
        })
    }
}

/// Totals shown on the library stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LibraryStats {
    pub volumes: i64,
    pub monitored: i64,
    pub unmonitored: i64,
    pub issues: i64,
    pub downloaded_issues: i64,
    pub files: i64,
    pub total_file_size: i64,
}
