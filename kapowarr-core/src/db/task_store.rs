//! Persistence for task history and the recurring-task planner.

use chrono::{DateTime, Utc};
use kapowarr_model::TaskHistoryEntry;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_history(
        &self,
        task_name: &str,
        display_title: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO task_history(task_name, display_title, run_at)
            VALUES (?, ?, ?);
            ",
        )
        .bind(task_name)
        .bind(display_title)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_history(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TaskHistoryEntry>> {
        let rows = sqlx::query(
            r"
            SELECT task_name, display_title, run_at
            FROM task_history
            ORDER BY run_at DESC
            LIMIT ? OFFSET ?;
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TaskHistoryEntry {
                action: row.get("task_name"),
                display_title: row.get("display_title"),
                run_at: DateTime::<Utc>::from_timestamp(row.get("run_at"), 0)
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn clear_history(&self) -> Result<()> {
        sqlx::query("DELETE FROM task_history;")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The interval and last run of a recurring task, if it ever ran.
    pub async fn interval(
        &self,
        task_name: &str,
    ) -> Result<Option<(i64, Option<i64>)>> {
        let row = sqlx::query(
            r"
            SELECT interval_seconds, last_run
            FROM task_intervals
            WHERE task_name = ?;
            ",
        )
        .bind(task_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.get("interval_seconds"), r.get("last_run"))))
    }

    pub async fn set_interval(
        &self,
        task_name: &str,
        interval_seconds: i64,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO task_intervals(task_name, interval_seconds)
            VALUES (?, ?)
            ON CONFLICT(task_name)
            DO UPDATE SET interval_seconds = excluded.interval_seconds;
            ",
        )
        .bind(task_name)
        .bind(interval_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_run(&self, task_name: &str) -> Result<()> {
        sqlx::query(
            "UPDATE task_intervals SET last_run = ? WHERE task_name = ?;",
        )
        .bind(Utc::now().timestamp())
        .bind(task_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
