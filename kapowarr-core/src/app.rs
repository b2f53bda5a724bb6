//! The application value: every long-lived component, constructed once
//! at startup and passed by reference.

use std::path::Path;
use std::sync::Arc;

use kapowarr_model::VolumeId;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::comicvine::{ComicVine, CvCache};
use crate::db::Database;
use crate::download::DownloadOrchestrator;
use crate::error::{KapowarrError, Result};
use crate::events::EventBus;
use crate::flaresolverr::FlareSolverr;
use crate::fs_util::create_folder;
use crate::root_folders::RootFolders;
use crate::session::HttpSession;
use crate::settings::Settings;
use crate::tasks::{TaskContext, TaskOrchestrator};

const DB_FILE_NAME: &str = "kapowarr.db";
const CV_CACHE_FILE_NAME: &str = "cv_cache.db";

/// The wired-up service. One of these exists per process.
#[derive(Debug, Clone)]
pub struct Application {
    pub database: Database,
    pub settings: Settings,
    pub bus: EventBus,
    pub solver: Arc<FlareSolverr>,
    pub session: HttpSession,
    pub cv_cache: CvCache,
    pub downloads: DownloadOrchestrator,
    pub tasks: TaskOrchestrator,
    pub root_folders: RootFolders,
}

impl Application {
    /// Construct every component; the data folder is created if missing.
    pub async fn new(data_folder: &Path) -> Result<Self> {
        crate::conversion::verify_registry()?;
        create_folder(data_folder)?;

        let database = Database::open(&data_folder.join(DB_FILE_NAME)).await?;
        let bus = EventBus::new();
        let settings =
            Settings::load(database.settings(), bus.clone()).await?;

        let solver = Arc::new(FlareSolverr::new(
            settings.get().flaresolverr_base_url,
        ));
        let session = HttpSession::new(Arc::clone(&solver));
        let cv_cache =
            CvCache::open(&data_folder.join(CV_CACHE_FILE_NAME)).await?;

        let downloads = DownloadOrchestrator::new(
            database.clone(),
            settings.clone(),
            bus.clone(),
            session.clone(),
        );

        let tasks = TaskOrchestrator::new(TaskContext {
            database: database.clone(),
            settings: settings.clone(),
            bus: bus.clone(),
            session: session.clone(),
            downloads: downloads.clone(),
            cv_cache: cv_cache.clone(),
        });

        let root_folders =
            RootFolders::new(database.clone(), settings.clone());

        info!("Application initialised");
        Ok(Self {
            database,
            settings,
            bus,
            solver,
            session,
            cv_cache,
            downloads,
            tasks,
            root_folders,
        })
    }

    /// Start the background loops; they stop when the token fires.
    pub fn start(&self, shutdown: CancellationToken) {
        self.downloads.start(shutdown.clone());
        self.tasks.start(shutdown, num_cpus::get());
    }

    pub fn task_context(&self) -> TaskContext {
        TaskContext {
            database: self.database.clone(),
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            session: self.session.clone(),
            downloads: self.downloads.clone(),
            cv_cache: self.cv_cache.clone(),
        }
    }

    /// A ComicVine client with the configured API key.
    pub fn comicvine(&self) -> Result<ComicVine> {
        ComicVine::new(
            self.session.clone(),
            self.cv_cache.clone(),
            self.database.clone(),
            self.settings.clone(),
            None,
        )
    }

    /// Delete a volume with all its guards applied: no running task and
    /// no active download may reference it.
    pub async fn delete_volume(
        &self,
        volume_id: VolumeId,
        delete_folder: bool,
    ) -> Result<()> {
        if self.tasks.volume_busy(volume_id) {
            return Err(KapowarrError::TaskForVolumeRunning(volume_id));
        }
        crate::volumes::delete_volume(
            &self.task_context(),
            volume_id,
            delete_folder,
        )
        .await
    }
}
