//! Root folder management: the user-declared directories that hold the
//! volume folders.

use std::path::{Path, PathBuf};

use kapowarr_model::{DiskUsage, RootFolderData, RootFolderId};
use sqlx::Row;
use sysinfo::Disks;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{KapowarrError, Result};
use crate::fs_util::{create_folder, folder_is_inside_folder};
use crate::settings::Settings;

/// Whether two folders collide: one is the other, or a parent of it.
fn folders_colliding(first: &Path, second: &Path) -> bool {
    folder_is_inside_folder(first, second)
        || folder_is_inside_folder(second, first)
}

fn disk_usage_of(folder: &Path) -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| folder.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| DiskUsage {
            total: disk.total_space(),
            used: disk.total_space() - disk.available_space(),
            free: disk.available_space(),
        })
}

/// Handle for root folder operations.
#[derive(Debug, Clone)]
pub struct RootFolders {
    database: Database,
    settings: Settings,
}

impl RootFolders {
    pub fn new(database: Database, settings: Settings) -> Self {
        Self { database, settings }
    }

    async fn folder_list(&self) -> Result<Vec<(RootFolderId, String)>> {
        let rows =
            sqlx::query("SELECT id, folder FROM root_folders ORDER BY id;")
                .fetch_all(self.database.pool())
                .await?;
        Ok(rows
            .iter()
            .map(|row| (RootFolderId(row.get("id")), row.get("folder")))
            .collect())
    }

    pub async fn get_all(&self) -> Result<Vec<RootFolderData>> {
        let folders = self.folder_list().await?;
        Ok(folders
            .into_iter()
            .map(|(id, folder)| {
                let size = disk_usage_of(Path::new(&folder));
                RootFolderData { id, folder, size }
            })
            .collect())
    }

    pub async fn get_one(&self, id: RootFolderId) -> Result<RootFolderData> {
        self.get_all()
            .await?
            .into_iter()
            .find(|root_folder| root_folder.id == id)
            .ok_or(KapowarrError::RootFolderNotFound(id))
    }

    /// Add a root folder. The folder must exist (or be creatable) and
    /// may not be a parent or child of another root folder or of the
    /// download folder.
    pub async fn add(&self, folder: &str) -> Result<RootFolderData> {
        info!("Adding rootfolder from {folder}");

        let path = PathBuf::from(folder);
        if !path.is_absolute() {
            return Err(KapowarrError::RootFolderInvalid(folder.to_string()));
        }
        if !path.is_dir() {
            create_folder(&path).map_err(|_| {
                KapowarrError::FolderNotFound(folder.to_string())
            })?;
        }

        let download_folder = self.settings.get().download_folder;
        if folders_colliding(&path, &download_folder) {
            return Err(KapowarrError::RootFolderInvalid(folder.to_string()));
        }
        for (_, existing) in self.folder_list().await? {
            if folders_colliding(&path, Path::new(&existing)) {
                return Err(KapowarrError::RootFolderInvalid(
                    folder.to_string(),
                ));
            }
        }

        let result =
            sqlx::query("INSERT INTO root_folders(folder) VALUES (?);")
                .bind(path.to_string_lossy().to_string())
                .execute(self.database.pool())
                .await?;
        let id = RootFolderId(result.last_insert_rowid());

        debug!("Adding rootfolder result: {id}");
        self.get_one(id).await
    }

    /// Delete a root folder. Refused while any volume still uses it.
    pub async fn delete(&self, id: RootFolderId) -> Result<()> {
        info!("Deleting rootfolder {id}");

        let in_use = !self
            .database
            .volumes()
            .volumes_in_root_folder(id)
            .await?
            .is_empty();
        if in_use {
            return Err(KapowarrError::RootFolderInUse(id));
        }

        let result = sqlx::query("DELETE FROM root_folders WHERE id = ?;")
            .bind(id)
            .execute(self.database.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(KapowarrError::RootFolderNotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folders_colliding() {
        assert!(folders_colliding(
            Path::new("/comics"),
            Path::new("/comics/dc")
        ));
        assert!(folders_colliding(
            Path::new("/comics/dc"),
            Path::new("/comics")
        ));
        assert!(folders_colliding(
            Path::new("/comics"),
            Path::new("/comics")
        ));
        assert!(!folders_colliding(
            Path::new("/comics"),
            Path::new("/downloads")
        ));
    }
}
