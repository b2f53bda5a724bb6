//! Queries over files and their links to issues and volumes.

use kapowarr_model::{
    FileData, FileId, GeneralFileData, GeneralFileType, IssueId, VolumeId,
};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use crate::error::{KapowarrError, Result};

/// Optional provenance to record when adding a file, taken from the
/// download or search result it came from.
#[derive(Debug, Clone, Default)]
pub struct FileExtraInfo {
    pub releaser: Option<String>,
    pub scan_type: Option<String>,
    pub resolution: Option<String>,
    pub dpi: Option<String>,
}

impl From<&FileData> for FileExtraInfo {
    fn from(file: &FileData) -> Self {
        Self {
            releaser: file.releaser.clone(),
            scan_type: file.scan_type.clone(),
            resolution: file.resolution.clone(),
            dpi: file.dpi.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilesRepository {
    pool: SqlitePool,
}

impl FilesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch_all(&self) -> Result<Vec<FileData>> {
        let files = sqlx::query_as::<_, FileData>(
            r"
            SELECT id, filepath, size, releaser, scan_type, resolution, dpi
            FROM files
            ORDER BY filepath;
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn fetch_for_volume(
        &self,
        volume_id: VolumeId,
    ) -> Result<Vec<FileData>> {
        let files = sqlx::query_as::<_, FileData>(
            r"
            SELECT DISTINCT
                f.id, f.filepath, f.size,
                f.releaser, f.scan_type, f.resolution, f.dpi
            FROM files f
            INNER JOIN issues_files isf ON f.id = isf.file_id
            INNER JOIN issues i ON isf.issue_id = i.id
            WHERE i.volume_id = ?
            ORDER BY f.filepath;
            ",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn fetch_for_issue(
        &self,
        issue_id: IssueId,
    ) -> Result<Vec<FileData>> {
        let files = sqlx::query_as::<_, FileData>(
            r"
            SELECT DISTINCT
                f.id, f.filepath, f.size,
                f.releaser, f.scan_type, f.resolution, f.dpi
            FROM files f
            INNER JOIN issues_files isf ON f.id = isf.file_id
            WHERE isf.issue_id = ?
            ORDER BY f.filepath;
            ",
        )
        .bind(issue_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn fetch_by_id(&self, file_id: FileId) -> Result<FileData> {
        sqlx::query_as::<_, FileData>(
            r"
            SELECT id, filepath, size, releaser, scan_type, resolution, dpi
            FROM files
            WHERE id = ?
            LIMIT 1;
            ",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(KapowarrError::FileNotFound)
    }

    pub async fn fetch_by_filepath(
        &self,
        filepath: &str,
    ) -> Result<Option<FileData>> {
        let file = sqlx::query_as::<_, FileData>(
            r"
            SELECT id, filepath, size, releaser, scan_type, resolution, dpi
            FROM files
            WHERE filepath = ?
            LIMIT 1;
            ",
        )
        .bind(filepath)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// The volume a file belongs to, via either link table.
    pub async fn volume_of_file(
        &self,
        filepath: &str,
    ) -> Result<Option<VolumeId>> {
        let volume_id = sqlx::query_scalar::<_, VolumeId>(
            r"
            SELECT i.volume_id
            FROM files f
            INNER JOIN issues_files isf ON f.id = isf.file_id
            INNER JOIN issues i ON isf.issue_id = i.id
            WHERE f.filepath = ?
            LIMIT 1;
            ",
        )
        .bind(filepath)
        .fetch_optional(&self.pool)
        .await?;

        if volume_id.is_some() {
            return Ok(volume_id);
        }

        let volume_id = sqlx::query_scalar::<_, VolumeId>(
            r"
            SELECT vf.volume_id
            FROM files f
            INNER JOIN volume_files vf ON f.id = vf.file_id
            WHERE f.filepath = ?
            LIMIT 1;
            ",
        )
        .bind(filepath)
        .fetch_optional(&self.pool)
        .await?;

        Ok(volume_id)
    }

    /// The set of calculated issue numbers bound to a file, in order.
    pub async fn issues_covered(&self, filepath: &str) -> Result<Vec<f64>> {
        let numbers = sqlx::query_scalar::<_, f64>(
            r"
            SELECT DISTINCT i.calculated_issue_number
            FROM issues i
            INNER JOIN issues_files isf ON i.id = isf.issue_id
            INNER JOIN files f ON isf.file_id = f.id
            WHERE f.filepath = ?
            ORDER BY i.calculated_issue_number;
            ",
        )
        .bind(filepath)
        .fetch_all(&self.pool)
        .await?;
        Ok(numbers)
    }

    /// Insert a file, or return the existing row's ID when the path is
    /// already known.
    pub async fn add_file(
        &self,
        filepath: &str,
        size: i64,
        extra: Option<&FileExtraInfo>,
    ) -> Result<FileId> {
        let extra_owned;
        let extra = match extra {
            Some(extra) => extra,
            None => {
                extra_owned = FileExtraInfo::default();
                &extra_owned
            }
        };

        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO
                files(filepath, size, releaser, scan_type, resolution, dpi)
            VALUES (?, ?, ?, ?, ?, ?);
            ",
        )
        .bind(filepath)
        .bind(size)
        .bind(&extra.releaser)
        .bind(&extra.scan_type)
        .bind(&extra.resolution)
        .bind(&extra.dpi)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Added file to the database: {filepath}");
            return Ok(FileId(result.last_insert_rowid()));
        }

        self.fetch_by_filepath(filepath)
            .await?
            .map(|f| f.id)
            .ok_or(KapowarrError::FileNotFound)
    }

    pub async fn update_size(&self, file_id: FileId, size: i64) -> Result<()> {
        sqlx::query("UPDATE files SET size = ? WHERE id = ?;")
            .bind(size)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically swap a batch of file paths, for renames. The orphan
    /// sweep never observes a half-applied batch.
    pub async fn update_filepaths(
        &self,
        changes: &[(String, String)],
    ) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        for (old, new) in changes {
            sqlx::query("UPDATE files SET filepath = ? WHERE filepath = ?;")
                .bind(new)
                .bind(old)
                .execute(&mut *transaction)
                .await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    pub async fn delete_file(&self, file_id: FileId) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = ?;")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_by_filepaths(&self, filepaths: &[String]) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        for filepath in filepaths {
            sqlx::query("DELETE FROM files WHERE filepath = ?;")
                .bind(filepath)
                .execute(&mut *transaction)
                .await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    /// The orphan sweep: remove files that no link table references.
    pub async fn delete_unmatched_files(&self) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM files
            WHERE id NOT IN (
                SELECT file_id FROM issues_files
                UNION
                SELECT file_id FROM volume_files
            );
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete all files linked to a volume, via either link table.
    pub async fn delete_volume_linked_files(
        &self,
        volume_id: VolumeId,
    ) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM files
            WHERE id IN (
                SELECT DISTINCT isf.file_id
                FROM issues_files isf
                INNER JOIN issues i ON isf.issue_id = i.id
                WHERE i.volume_id = ?
            ) OR id IN (
                SELECT DISTINCT file_id
                FROM volume_files
                WHERE volume_id = ?
            );
            ",
        )
        .bind(volume_id)
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All `(file_id, issue_id)` bindings of a volume.
    pub async fn issue_bindings(
        &self,
        volume_id: VolumeId,
    ) -> Result<Vec<(FileId, IssueId)>> {
        let rows = sqlx::query(
            r"
            SELECT isf.file_id, isf.issue_id
            FROM issues_files isf
            INNER JOIN issues i ON isf.issue_id = i.id
            WHERE i.volume_id = ?;
            ",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (FileId(row.get::<i64, _>(0)), IssueId(row.get::<i64, _>(1)))
            })
            .collect())
    }

    pub async fn add_issue_binding(
        &self,
        file_id: FileId,
        issue_id: IssueId,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO issues_files(file_id, issue_id) VALUES (?, ?);",
        )
        .bind(file_id)
        .bind(issue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_issue_binding(
        &self,
        file_id: FileId,
        issue_id: IssueId,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM issues_files WHERE file_id = ? AND issue_id = ?;",
        )
        .bind(file_id)
        .bind(issue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Volume-level files (covers, metadata) of a volume.
    pub async fn general_files(
        &self,
        volume_id: VolumeId,
    ) -> Result<Vec<GeneralFileData>> {
        let rows = sqlx::query(
            r"
            SELECT
                f.id, f.filepath, f.size,
                f.releaser, f.scan_type, f.resolution, f.dpi,
                vf.file_type
            FROM files f
            INNER JOIN volume_files vf ON f.id = vf.file_id
            WHERE vf.volume_id = ?
            ORDER BY f.filepath;
            ",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let file_type: String = row.get("file_type");
                let file_type = file_type.parse::<GeneralFileType>().map_err(
                    KapowarrError::Internal,
                )?;
                Ok(GeneralFileData {
                    file: FileData {
                        id: FileId(row.get("id")),
                        filepath: row.get("filepath"),
                        size: row.get("size"),
                        releaser: row.get("releaser"),
                        scan_type: row.get("scan_type"),
                        resolution: row.get("resolution"),
                        dpi: row.get("dpi"),
                    },
                    file_type,
                })
            })
            .collect()
    }

    pub async fn add_general_binding(
        &self,
        file_id: FileId,
        volume_id: VolumeId,
        file_type: GeneralFileType,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO volume_files(file_id, file_type, volume_id)
            VALUES (?, ?, ?);
            ",
        )
        .bind(file_id)
        .bind(file_type.as_str())
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_general_binding(&self, file_id: FileId) -> Result<()> {
        sqlx::query("DELETE FROM volume_files WHERE file_id = ?;")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
