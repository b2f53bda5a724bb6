//! The blocklist of links that downloads must not be started from. The
//! table is the source of truth; a process-wide link set mirrors it so
//! the hot lookup during search-result filtering stays in memory.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use kapowarr_model::{
    BlocklistEntry, BlocklistEntryId, BlocklistReason, DownloadSource,
    IssueId, VolumeId,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::error::{KapowarrError, Result};

fn entry_from_row(row: &SqliteRow) -> Result<BlocklistEntry> {
    let reason: String = row.get("reason");
    Ok(BlocklistEntry {
        id: BlocklistEntryId(row.get("id")),
        web_link: row.get("web_link"),
        web_title: row.get("web_title"),
        web_sub_title: row.get("web_sub_title"),
        download_link: row.get("download_link"),
        source: row
            .get::<Option<String>, _>("source")
            .map(DownloadSource),
        volume_id: row.get::<Option<i64>, _>("volume_id").map(VolumeId),
        issue_id: row.get::<Option<i64>, _>("issue_id").map(IssueId),
        reason: reason
            .parse::<BlocklistReason>()
            .map_err(KapowarrError::Internal)?,
        added_at: DateTime::<Utc>::from_timestamp(row.get("added_at"), 0)
            .unwrap_or_default(),
    })
}

/// Everything identifying a blocklist entry except the reason.
#[derive(Debug, Clone, Default)]
pub struct BlocklistInput {
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub download_link: Option<String>,
    pub source: Option<DownloadSource>,
    pub volume_id: Option<VolumeId>,
    pub issue_id: Option<IssueId>,
}

#[derive(Debug, Clone)]
pub struct BlocklistRepository {
    pool: SqlitePool,
    /// Mirror of all blocked download and web links, shared process-wide.
    links: Arc<DashSet<String>>,
}

impl BlocklistRepository {
    pub fn new(pool: SqlitePool, links: Arc<DashSet<String>>) -> Self {
        Self { pool, links }
    }

    pub async fn fetch_all(&self) -> Result<Vec<BlocklistEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, web_link, web_title, web_sub_title, download_link,
                   source, volume_id, issue_id, reason, added_at
            FROM blocklist
            ORDER BY added_at DESC;
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn fetch_one(
        &self,
        id: BlocklistEntryId,
    ) -> Result<BlocklistEntry> {
        let row = sqlx::query(
            r"
            SELECT id, web_link, web_title, web_sub_title, download_link,
                   source, volume_id, issue_id, reason, added_at
            FROM blocklist
            WHERE id = ?;
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(KapowarrError::BlocklistEntryNotFound(id))?;
        entry_from_row(&row)
    }

    /// Whether a link is blocked, by download link or web link. Served
    /// from the in-memory link set.
    pub fn contains(&self, link: &str) -> bool {
        self.links.contains(link)
    }

    /// Add an entry. First insertion wins: a duplicate download link
    /// leaves the original untouched.
    pub async fn add(
        &self,
        input: &BlocklistInput,
        reason: BlocklistReason,
    ) -> Result<()> {
        info!(
            "Blocklisting {} (reason: {reason})",
            input
                .download_link
                .as_deref()
                .or(input.web_link.as_deref())
                .unwrap_or("<unknown>")
        );
        sqlx::query(
            r"
            INSERT OR IGNORE INTO blocklist(
                web_link, web_title, web_sub_title, download_link,
                source, volume_id, issue_id, reason, added_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
            ",
        )
        .bind(&input.web_link)
        .bind(&input.web_title)
        .bind(&input.web_sub_title)
        .bind(&input.download_link)
        .bind(input.source.as_ref().map(|s| s.0.clone()))
        .bind(input.volume_id)
        .bind(input.issue_id)
        .bind(reason.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        for link in [&input.download_link, &input.web_link]
            .into_iter()
            .flatten()
        {
            self.links.insert(link.clone());
        }
        Ok(())
    }

    pub async fn delete(&self, id: BlocklistEntryId) -> Result<()> {
        let entry = self.fetch_one(id).await?;
        sqlx::query("DELETE FROM blocklist WHERE id = ?;")
            .bind(id)
            .execute(&self.pool)
            .await?;

        // Only drop a link from the mirror when no other entry still
        // blocks it.
        for link in [entry.download_link, entry.web_link]
            .into_iter()
            .flatten()
        {
            let still_blocked: i64 = sqlx::query_scalar(
                r"
                SELECT COUNT(*)
                FROM blocklist
                WHERE download_link = ? OR web_link = ?;
                ",
            )
            .bind(&link)
            .bind(&link)
            .fetch_one(&self.pool)
            .await?;
            if still_blocked == 0 {
                self.links.remove(&link);
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM blocklist;")
            .execute(&self.pool)
            .await?;
        self.links.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn input(download_link: &str, web_link: &str) -> BlocklistInput {
        BlocklistInput {
            download_link: Some(download_link.to_string()),
            web_link: Some(web_link.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_link_set_mirrors_table() {
        let database = Database::open_in_memory().await.unwrap();
        let blocklist = database.blocklist();

        assert!(!blocklist.contains("https://example.com/dl/1"));

        blocklist
            .add(
                &input(
                    "https://example.com/dl/1",
                    "https://example.com/post/1",
                ),
                BlocklistReason::DownloadFailed,
            )
            .await
            .unwrap();
        assert!(blocklist.contains("https://example.com/dl/1"));
        assert!(blocklist.contains("https://example.com/post/1"));

        // A fresh handle off the same database shares the mirror.
        assert!(database
            .blocklist()
            .contains("https://example.com/dl/1"));

        let entry = blocklist.fetch_all().await.unwrap().remove(0);
        blocklist.delete(entry.id).await.unwrap();
        assert!(!blocklist.contains("https://example.com/dl/1"));
        assert!(!blocklist.contains("https://example.com/post/1"));
    }

    #[tokio::test]
    async fn test_clear_empties_link_set() {
        let database = Database::open_in_memory().await.unwrap();
        let blocklist = database.blocklist();

        blocklist
            .add(
                &input(
                    "https://example.com/dl/2",
                    "https://example.com/post/2",
                ),
                BlocklistReason::AddedByUser,
            )
            .await
            .unwrap();
        blocklist.clear().await.unwrap();
        assert!(!blocklist.contains("https://example.com/dl/2"));
        assert!(blocklist.fetch_all().await.unwrap().is_empty());
    }
}
