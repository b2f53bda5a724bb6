//! Persistence of the download queue and download history. The queue
//! table lets queued downloads survive a restart; the live state machine
//! is owned by the download orchestrator.

use chrono::Utc;
use kapowarr_model::{ClientId, DownloadId, DownloadSource, IssueId, VolumeId};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::Result;

/// A queued download as persisted between restarts.
#[derive(Debug, Clone)]
pub struct QueuedDownloadRow {
    pub id: DownloadId,
    pub download_link: String,
    pub filename: Option<String>,
    pub source: DownloadSource,
    pub volume_id: VolumeId,
    pub issue_id: Option<IssueId>,
    pub external_client_id: Option<ClientId>,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
}

/// A line of download history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadHistoryEntry {
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub file_title: Option<String>,
    pub volume_id: Option<VolumeId>,
    pub issue_id: Option<IssueId>,
    pub source: Option<String>,
    pub success: bool,
    pub downloaded_at: i64,
}

fn queued_from_row(row: &SqliteRow) -> QueuedDownloadRow {
    QueuedDownloadRow {
        id: DownloadId(row.get("id")),
        download_link: row.get("download_link"),
        filename: row.get("filename"),
        source: DownloadSource(row.get("source")),
        volume_id: VolumeId(row.get("volume_id")),
        issue_id: row.get::<Option<i64>, _>("issue_id").map(IssueId),
        external_client_id: row
            .get::<Option<i64>, _>("external_client_id")
            .map(ClientId),
        web_link: row.get("web_link"),
        web_title: row.get("web_title"),
        web_sub_title: row.get("web_sub_title"),
    }
}

#[derive(Debug, Clone)]
pub struct DownloadsRepository {
    pool: SqlitePool,
}

impl DownloadsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch_queue(&self) -> Result<Vec<QueuedDownloadRow>> {
        let rows = sqlx::query(
            r"
            SELECT id, download_link, filename, source, volume_id, issue_id,
                   external_client_id, web_link, web_title, web_sub_title
            FROM download_queue
            ORDER BY id;
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queued_from_row).collect())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        download_link: &str,
        filename: Option<&str>,
        source: &DownloadSource,
        volume_id: VolumeId,
        issue_id: Option<IssueId>,
        external_client_id: Option<ClientId>,
        web_link: Option<&str>,
        web_title: Option<&str>,
        web_sub_title: Option<&str>,
    ) -> Result<DownloadId> {
        let result = sqlx::query(
            r"
            INSERT INTO download_queue(
                download_link, filename, source, volume_id, issue_id,
                external_client_id, web_link, web_title, web_sub_title
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
            ",
        )
        .bind(download_link)
        .bind(filename)
        .bind(&source.0)
        .bind(volume_id)
        .bind(issue_id)
        .bind(external_client_id)
        .bind(web_link)
        .bind(web_title)
        .bind(web_sub_title)
        .execute(&self.pool)
        .await?;
        Ok(DownloadId(result.last_insert_rowid()))
    }

    pub async fn remove(&self, id: DownloadId) -> Result<()> {
        sqlx::query("DELETE FROM download_queue WHERE id = ?;")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether any queued download references the volume. Volume deletion
    /// is refused while this holds.
    pub async fn volume_has_downloads(
        &self,
        volume_id: VolumeId,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM download_queue WHERE volume_id = ?;",
        )
        .bind(volume_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Whether any queued download is assigned to the external client.
    pub async fn client_has_downloads(
        &self,
        client_id: ClientId,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM download_queue WHERE external_client_id = ?;",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_history(
        &self,
        web_link: Option<&str>,
        web_title: Option<&str>,
        web_sub_title: Option<&str>,
        file_title: Option<&str>,
        volume_id: Option<VolumeId>,
        issue_id: Option<IssueId>,
        source: Option<&str>,
        success: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO download_history(
                web_link, web_title, web_sub_title, file_title,
                volume_id, issue_id, source, success, downloaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
            ",
        )
        .bind(web_link)
        .bind(web_title)
        .bind(web_sub_title)
        .bind(file_title)
        .bind(volume_id)
        .bind(issue_id)
        .bind(source)
        .bind(success)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_history(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DownloadHistoryEntry>> {
        let rows = sqlx::query(
            r"
            SELECT web_link, web_title, web_sub_title, file_title,
                   volume_id, issue_id, source, success, downloaded_at
            FROM download_history
            ORDER BY downloaded_at DESC
            LIMIT ? OFFSET ?;
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DownloadHistoryEntry {
                web_link: row.get("web_link"),
                web_title: row.get("web_title"),
                web_sub_title: row.get("web_sub_title"),
                file_title: row.get("file_title"),
                volume_id: row.get::<Option<i64>, _>("volume_id").map(VolumeId),
                issue_id: row.get::<Option<i64>, _>("issue_id").map(IssueId),
                source: row.get("source"),
                success: row.get("success"),
                downloaded_at: row.get("downloaded_at"),
            })
            .collect())
    }

    pub async fn clear_history(&self) -> Result<()> {
        sqlx::query("DELETE FROM download_history;")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
