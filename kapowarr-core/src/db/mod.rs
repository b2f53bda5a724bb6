//! The embedded relational store. One SQLite database file holds the
//! whole library model; all multi-step writes go through transactions on
//! the shared pool.

pub mod blocklist;
pub mod clients;
pub mod downloads;
pub mod files;
pub mod settings;
pub mod task_store;
pub mod volumes;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashSet;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::error::Result;

pub use blocklist::BlocklistRepository;
pub use clients::ClientsRepository;
pub use downloads::DownloadsRepository;
pub use files::FilesRepository;
pub use settings::SettingsRepository;
pub use task_store::TaskStore;
pub use volumes::VolumesRepository;

/// The in-memory mirror of the blocked links, populated from the
/// blocklist table at startup.
async fn load_blocklist_links(
    pool: &SqlitePool,
) -> Result<Arc<DashSet<String>>> {
    let links = DashSet::new();
    let rows = sqlx::query("SELECT download_link, web_link FROM blocklist;")
        .fetch_all(pool)
        .await?;
    for row in rows {
        let download_link: Option<String> = row.get("download_link");
        let web_link: Option<String> = row.get("web_link");
        for link in [download_link, web_link].into_iter().flatten() {
            links.insert(link);
        }
    }
    Ok(Arc::new(links))
}

/// Handle to the library database. Cloning is cheap; all clones share the
/// same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    blocklist_links: Arc<DashSet<String>>,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn open(db_file: &Path) -> Result<Self> {
        info!("Opening database at {}", db_file.display());

        let options = SqliteConnectOptions::new()
            .filename(db_file)
            .create_if_missing(true)
            .foreign_keys(true)
            .pragma("journal_mode", "WAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        let blocklist_links = load_blocklist_links(&pool).await?;

        Ok(Self {
            pool,
            blocklist_links,
        })
    }

    /// An in-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);

        // An in-memory database lives and dies with its connection, so
        // the pool must hold on to exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        let blocklist_links = load_blocklist_links(&pool).await?;

        Ok(Self {
            pool,
            blocklist_links,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn files(&self) -> FilesRepository {
        FilesRepository::new(self.pool.clone())
    }

    pub fn volumes(&self) -> VolumesRepository {
        VolumesRepository::new(self.pool.clone())
    }

    pub fn blocklist(&self) -> BlocklistRepository {
        BlocklistRepository::new(
            self.pool.clone(),
            Arc::clone(&self.blocklist_links),
        )
    }

    pub fn clients(&self) -> ClientsRepository {
        ClientsRepository::new(self.pool.clone())
    }

    pub fn downloads(&self) -> DownloadsRepository {
        DownloadsRepository::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    pub fn task_store(&self) -> TaskStore {
        TaskStore::new(self.pool.clone())
    }

    /// The path of a root folder, straight from its table.
    pub async fn root_folder_path(
        &self,
        id: kapowarr_model::RootFolderId,
    ) -> Result<std::path::PathBuf> {
        let folder = sqlx::query_scalar::<_, String>(
            "SELECT folder FROM root_folders WHERE id = ?;",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(crate::error::KapowarrError::RootFolderNotFound(id))?;
        Ok(std::path::PathBuf::from(folder))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
