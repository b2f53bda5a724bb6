//! The download queue: admission, ordering, client driving, stall
//! handling and the import of finished downloads.

pub mod clients;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use kapowarr_model::{
    BlocklistReason, DownloadData, DownloadId, DownloadSource, DownloadState,
    Event, IssueId, VolumeId,
};
use ordered_float::OrderedFloat;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::blocklist::BlocklistInput;
use crate::db::files::FileExtraInfo;
use crate::db::Database;
use crate::error::{KapowarrError, Result};
use crate::events::EventBus;
use crate::filename::{extract_filename_data, ExtractOptions};
use crate::fs_util::{create_folder, list_files, rename_file};
use crate::matching::{check_search_result_match, NumberToYear};
use crate::naming::mass_rename;
use crate::scanner::{scan_files, ScanOptions};
use crate::session::HttpSession;
use crate::settings::Settings;
use clients::{build_client, ExternalClient, StatusLookup};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything needed to admit a download into the queue.
#[derive(Debug, Clone, Default)]
pub struct AddDownloadParams {
    pub link: String,
    pub volume_id: VolumeId,
    pub issue_id: Option<IssueId>,
    pub filename: Option<String>,
    pub source: String,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    /// Skip the match filter; the user insists.
    pub force_match: bool,
    pub releaser: Option<String>,
    pub scan_type: Option<String>,
    pub resolution: Option<String>,
    pub dpi: Option<String>,
}

struct QueueEntry {
    data: DownloadData,
    web_link: Option<String>,
    web_title: Option<String>,
    web_sub_title: Option<String>,
    extra_info: FileExtraInfo,
    client: Option<Arc<dyn ExternalClient>>,
    client_handle: Option<String>,
    canceled: Arc<AtomicBool>,
}

struct Inner {
    database: Database,
    settings: Settings,
    bus: EventBus,
    session: HttpSession,
    queue: Mutex<Vec<Arc<Mutex<QueueEntry>>>>,
    notify: Notify,
}

/// The download orchestrator. One instance owns the FIFO queue and the
/// background worker and poll loops.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("queue_size", &self.inner.queue.lock().unwrap().len())
            .finish()
    }
}

fn is_torrent_link(link: &str) -> bool {
    link.starts_with("magnet:") || link.ends_with(".torrent")
}

impl DownloadOrchestrator {
    pub fn new(
        database: Database,
        settings: Settings,
        bus: EventBus,
        session: HttpSession,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                database,
                settings,
                bus,
                session,
                queue: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Start the worker and poll loops; they run until the token fires.
    /// Downloads that were queued when the process last stopped are
    /// picked up again first.
    pub fn start(&self, shutdown: CancellationToken) {
        let restorer = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(error) = restorer.restore_queue().await {
                warn!("Restoring the download queue failed: {error}");
            }
            restorer.notify.notify_one();
        });

        let worker = Arc::clone(&self.inner);
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.cancelled() => break,
                    _ = worker.notify.notified() => {}
                }
                while worker.first_queued().is_some() {
                    if let Err(error) = worker.process_next().await {
                        error!("Download worker error: {error}");
                        break;
                    }
                }
            }
        });

        let poller = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(error) = poller.poll_clients().await {
                    warn!("Download poll error: {error}");
                }
            }
        });
    }

    /// Admit a link into the queue. Blocklisted links are refused; the
    /// match filter applies unless forced.
    pub async fn add(
        &self,
        params: AddDownloadParams,
    ) -> Result<DownloadData> {
        let inner = &self.inner;

        if inner.database.blocklist().contains(&params.link) {
            return Err(KapowarrError::LinkBroken(
                "the link is blocklisted".to_string(),
            ));
        }

        if !params.force_match {
            inner.check_link_match(&params).await?;
        }

        // Torrent-style links go to an external client; the rest is
        // downloaded directly.
        let client = inner.client_for_link(&params.link).await?;

        let source = DownloadSource(params.source.clone());
        let id = inner
            .database
            .downloads()
            .enqueue(
                &params.link,
                params.filename.as_deref(),
                &source,
                params.volume_id,
                params.issue_id,
                None,
                params.web_link.as_deref(),
                params.web_title.as_deref(),
                params.web_sub_title.as_deref(),
            )
            .await?;

        let data = DownloadData {
            id,
            url: params.link.clone(),
            filename: params.filename.clone(),
            volume_id: params.volume_id,
            issue_id: params.issue_id,
            source,
            client_id: None,
            state: DownloadState::Queued,
            size: None,
            progress: 0.0,
            speed: 0,
            started_at: None,
            failing_since: None,
        };

        let entry = QueueEntry {
            data: data.clone(),
            web_link: params.web_link,
            web_title: params.web_title,
            web_sub_title: params.web_sub_title,
            extra_info: FileExtraInfo {
                releaser: params.releaser,
                scan_type: params.scan_type,
                resolution: params.resolution,
                dpi: params.dpi,
            },
            client,
            client_handle: None,
            canceled: Arc::new(AtomicBool::new(false)),
        };
        inner
            .queue
            .lock()
            .unwrap()
            .push(Arc::new(Mutex::new(entry)));

        info!("Added download {} for volume {}", data.id, data.volume_id);
        inner.bus.emit(Event::QueueAdded(data.clone()));
        inner.notify.notify_one();
        Ok(data)
    }

    pub fn list(&self) -> Vec<DownloadData> {
        self.inner
            .queue
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.lock().unwrap().data.clone())
            .collect()
    }

    pub fn get(&self, id: DownloadId) -> Result<DownloadData> {
        self.list()
            .into_iter()
            .find(|data| data.id == id)
            .ok_or(KapowarrError::DownloadNotFound(id))
    }

    /// Remove a download, cancelling it wherever it currently is.
    pub async fn remove(
        &self,
        id: DownloadId,
        add_to_blocklist: bool,
    ) -> Result<()> {
        let entry = {
            let mut queue = self.inner.queue.lock().unwrap();
            let position = queue
                .iter()
                .position(|entry| entry.lock().unwrap().data.id == id)
                .ok_or(KapowarrError::DownloadNotFound(id))?;
            queue.remove(position)
        };

        let (client, handle, data, input) = {
            let mut entry = entry.lock().unwrap();
            entry.canceled.store(true, Ordering::SeqCst);
            entry.data.state = DownloadState::Canceled;
            (
                entry.client.clone(),
                entry.client_handle.clone(),
                entry.data.clone(),
                BlocklistInput {
                    web_link: entry.web_link.clone(),
                    web_title: entry.web_title.clone(),
                    web_sub_title: entry.web_sub_title.clone(),
                    download_link: Some(entry.data.url.clone()),
                    source: Some(entry.data.source.clone()),
                    volume_id: Some(entry.data.volume_id),
                    issue_id: entry.data.issue_id,
                },
            )
        };

        if let (Some(client), Some(handle)) = (client, handle) {
            client.delete_download(&handle, true).await?;
        }
        if add_to_blocklist {
            self.inner
                .database
                .blocklist()
                .add(&input, BlocklistReason::AddedByUser)
                .await?;
        }

        self.inner.database.downloads().remove(id).await?;
        self.inner.bus.emit(Event::QueueEnded { id: data.id });
        Ok(())
    }

    /// Move a download to another position in the queue. The head is
    /// busy and stays where it is.
    pub fn move_position(&self, id: DownloadId, index: usize) -> Result<()> {
        let mut queue = self.inner.queue.lock().unwrap();
        let position = queue
            .iter()
            .position(|entry| entry.lock().unwrap().data.id == id)
            .ok_or(KapowarrError::DownloadNotFound(id))?;

        let head_busy = queue.first().is_some_and(|entry| {
            entry.lock().unwrap().data.state != DownloadState::Queued
        });
        if (position == 0 && head_busy)
            || (index == 0 && head_busy)
            || index >= queue.len()
        {
            return Err(KapowarrError::DownloadUnmovable);
        }

        let entry = queue.remove(position);
        queue.insert(index, entry);
        Ok(())
    }
}

impl Inner {
    /// The client adapter a link belongs to: a torrent client for
    /// torrent-style links, in-process direct download otherwise.
    async fn client_for_link(
        &self,
        link: &str,
    ) -> Result<Option<Arc<dyn ExternalClient>>> {
        if !is_torrent_link(link) {
            return Ok(None);
        }
        let stored = self
            .database
            .clients()
            .fetch_all()
            .await?
            .into_iter()
            .find(|c| {
                c.download_type == kapowarr_model::DownloadType::Torrent
            })
            .ok_or_else(|| {
                KapowarrError::LinkBroken(
                    "no torrent client configured".to_string(),
                )
            })?;
        Ok(Some(build_client(
            &self.session,
            &stored,
            self.settings.get().failing_download_timeout,
        )?))
    }

    /// Re-queue the downloads persisted by a previous run.
    async fn restore_queue(&self) -> Result<()> {
        for row in self.database.downloads().fetch_queue().await? {
            let client = match self.client_for_link(&row.download_link).await
            {
                Ok(client) => client,
                Err(error) => {
                    warn!(
                        "Not restoring download {}: {error}",
                        row.id
                    );
                    continue;
                }
            };

            let data = DownloadData {
                id: row.id,
                url: row.download_link.clone(),
                filename: row.filename.clone(),
                volume_id: row.volume_id,
                issue_id: row.issue_id,
                source: row.source.clone(),
                client_id: row.external_client_id,
                state: DownloadState::Queued,
                size: None,
                progress: 0.0,
                speed: 0,
                started_at: None,
                failing_since: None,
            };
            let entry = QueueEntry {
                data: data.clone(),
                web_link: row.web_link,
                web_title: row.web_title,
                web_sub_title: row.web_sub_title,
                extra_info: FileExtraInfo::default(),
                client,
                client_handle: None,
                canceled: Arc::new(AtomicBool::new(false)),
            };
            self.queue.lock().unwrap().push(Arc::new(Mutex::new(entry)));
            info!("Restored queued download {}", data.id);
            self.bus.emit(Event::QueueAdded(data));
        }
        Ok(())
    }

    /// Check the link against the volume with the match filter.
    async fn check_link_match(
        &self,
        params: &AddDownloadParams,
    ) -> Result<()> {
        let volumes = self.database.volumes();
        let volume = volumes.fetch_volume(params.volume_id).await?;
        let volume_issues = volumes.fetch_issues(params.volume_id).await?;
        let number_to_year: NumberToYear = volume_issues
            .iter()
            .map(|issue| {
                (
                    OrderedFloat(issue.calculated_issue_number),
                    issue.date.and_then(|d| {
                        d.format("%Y").to_string().parse().ok()
                    }),
                )
            })
            .collect();

        let display = params
            .web_title
            .clone()
            .or_else(|| params.filename.clone())
            .unwrap_or_else(|| params.link.clone());
        let data = extract_filename_data(
            &display,
            ExtractOptions {
                assume_volume_number: false,
                ..Default::default()
            },
        );
        let candidate = kapowarr_model::SearchResultData {
            series: data.series,
            year: data.year,
            volume_number: data.volume_number,
            special_version: data.special_version,
            issue_number: data.issue_number,
            annual: data.annual,
            link: params.link.clone(),
            display_title: display,
            source: params.source.clone(),
            filesize: 0,
            pages: 0,
            releaser: None,
            scan_type: None,
            resolution: None,
            dpi: None,
        };

        let calculated = match params.issue_id {
            Some(issue_id) => Some(
                volumes
                    .fetch_issue(issue_id)
                    .await?
                    .calculated_issue_number,
            ),
            None => None,
        };

        let rejections = check_search_result_match(
            &candidate,
            &volume,
            &volume_issues,
            &number_to_year,
            calculated,
            false,
        );
        if !rejections.is_empty() {
            return Err(KapowarrError::LinkBroken(format!(
                "the release does not match the volume: {rejections:?}"
            )));
        }
        Ok(())
    }

    fn first_queued(&self) -> Option<Arc<Mutex<QueueEntry>>> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .find(|entry| {
                let entry = entry.lock().unwrap();
                entry.data.state == DownloadState::Queued
            })
            .cloned()
    }

    /// Process the next queued download: direct downloads run right
    /// here; torrents are handed to their client and left to the poller.
    async fn process_next(&self) -> Result<()> {
        let Some(entry) = self.first_queued() else {
            return Ok(());
        };

        let (is_torrent, data) = {
            let entry = entry.lock().unwrap();
            (entry.client.is_some(), entry.data.clone())
        };

        let download_folder = self.settings.get().download_folder.clone();
        create_folder(&download_folder)?;

        if is_torrent {
            let client = entry.lock().unwrap().client.clone().unwrap();
            let handle = client
                .add_download(
                    &data.url,
                    &download_folder,
                    data.filename.as_deref(),
                    None,
                )
                .await;
            match handle {
                Ok(handle) => {
                    let mut entry = entry.lock().unwrap();
                    entry.client_handle = Some(handle);
                    entry.data.state = DownloadState::Downloading;
                    entry.data.started_at = Some(Utc::now());
                }
                Err(error) => {
                    warn!("Adding torrent failed: {error}");
                    self.fail_download(&entry).await?;
                }
            }
            return Ok(());
        }

        self.run_direct_download(&entry, &download_folder).await
    }

    async fn run_direct_download(
        &self,
        entry: &Arc<Mutex<QueueEntry>>,
        download_folder: &std::path::Path,
    ) -> Result<()> {
        let (data, canceled) = {
            let mut locked = entry.lock().unwrap();
            locked.data.state = DownloadState::Downloading;
            locked.data.started_at = Some(Utc::now());
            (locked.data.clone(), Arc::clone(&locked.canceled))
        };

        let filename = data.filename.clone().unwrap_or_else(|| {
            data.url
                .rsplit('/')
                .next()
                .unwrap_or("download")
                .split('?')
                .next()
                .unwrap_or("download")
                .to_string()
        });
        let target = download_folder.join(&filename);

        debug!("Starting direct download of {}", data.url);
        let bus = self.bus.clone();
        let entry_for_progress = Arc::clone(entry);
        let started = std::time::Instant::now();
        let mut last_emit = std::time::Instant::now() - POLL_INTERVAL;

        let outcome = self
            .session
            .download_to_file(&data.url, &target, |downloaded, total| {
                if canceled.load(Ordering::SeqCst) {
                    return false;
                }
                let elapsed = started.elapsed().as_secs_f64().max(0.001);
                let speed = (downloaded as f64 / elapsed) as i64;
                let progress = total
                    .map(|t| downloaded as f64 / t as f64 * 100.0)
                    .unwrap_or(0.0);
                {
                    let mut locked = entry_for_progress.lock().unwrap();
                    locked.data.size = total.map(|t| t as i64);
                    locked.data.progress = progress;
                    locked.data.speed = speed;
                }
                if last_emit.elapsed() >= POLL_INTERVAL {
                    last_emit = std::time::Instant::now();
                    bus.emit(Event::QueueStatus {
                        id: data.id,
                        status: DownloadState::Downloading,
                        size: total.map(|t| t as i64),
                        speed,
                        progress,
                    });
                }
                true
            })
            .await;

        if canceled.load(Ordering::SeqCst) {
            let _ = std::fs::remove_file(&target);
            return Ok(());
        }

        match outcome {
            Ok(()) => self.finish_download(entry, vec![target]).await,
            Err(error) => {
                warn!("Direct download failed: {error}");
                let _ = std::fs::remove_file(&target);
                self.fail_download(entry).await
            }
        }
    }

    /// Poll all client-managed downloads and propagate their state.
    async fn poll_clients(&self) -> Result<()> {
        let entries: Vec<Arc<Mutex<QueueEntry>>> = self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.lock().unwrap().client_handle.is_some())
            .cloned()
            .collect();

        for entry in entries {
            let (client, handle, id) = {
                let locked = entry.lock().unwrap();
                (
                    locked.client.clone().unwrap(),
                    locked.client_handle.clone().unwrap(),
                    locked.data.id,
                )
            };

            let lookup = match client.get_download(&handle).await {
                Ok(lookup) => lookup,
                Err(error) => {
                    warn!("Polling download {id} failed: {error}");
                    continue;
                }
            };

            match lookup {
                StatusLookup::Unknown => {}
                StatusLookup::Gone => {
                    // Removed externally; treat like a cancellation.
                    self.drop_entry(&entry).await?;
                    self.bus.emit(Event::QueueEnded { id });
                }
                StatusLookup::Known(status) => {
                    {
                        let mut locked = entry.lock().unwrap();
                        locked.data.size = Some(status.size);
                        locked.data.progress = status.progress;
                        locked.data.speed = status.speed;
                        locked.data.state = status.state;
                    }
                    self.bus.emit(Event::QueueStatus {
                        id,
                        status: status.state,
                        size: Some(status.size),
                        speed: status.speed,
                        progress: status.progress,
                    });

                    match status.state {
                        DownloadState::Failed => {
                            client.delete_download(&handle, true).await?;
                            self.fail_download(&entry).await?;
                        }
                        DownloadState::Seeding => {
                            self.import_torrent(&entry, &client, &handle)
                                .await?;
                        }
                        _ if status.progress >= 100.0 => {
                            self.import_torrent(&entry, &client, &handle)
                                .await?;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn import_torrent(
        &self,
        entry: &Arc<Mutex<QueueEntry>>,
        client: &Arc<dyn ExternalClient>,
        handle: &str,
    ) -> Result<()> {
        client.delete_download(handle, false).await?;
        let download_folder = self.settings.get().download_folder.clone();
        let files = list_files(
            &download_folder,
            kapowarr_model::ScannableExt::ALL,
        );
        self.finish_download(entry, files).await
    }

    /// Import the finished files into the library and close the entry.
    async fn finish_download(
        &self,
        entry: &Arc<Mutex<QueueEntry>>,
        files: Vec<PathBuf>,
    ) -> Result<()> {
        let (data, extra_info) = {
            let mut locked = entry.lock().unwrap();
            locked.data.state = DownloadState::Importing;
            (locked.data.clone(), locked.extra_info.clone())
        };
        self.bus.emit(Event::QueueStatus {
            id: data.id,
            status: DownloadState::Importing,
            size: data.size,
            speed: 0,
            progress: 100.0,
        });

        let settings = self.settings.get();
        let volume = self
            .database
            .volumes()
            .fetch_volume(data.volume_id)
            .await?;
        let volume_folder = PathBuf::from(&volume.folder);
        create_folder(&volume_folder)?;

        let mut imported: Vec<PathBuf> = Vec::with_capacity(files.len());
        for file in files {
            let target =
                volume_folder.join(file.file_name().unwrap_or_default());
            rename_file(&file, &target)?;
            imported.push(target);
        }

        scan_files(
            &self.database,
            &settings,
            &self.bus,
            data.volume_id,
            ScanOptions {
                filepath_filter: Some(imported.clone()),
                file_extra_info: Some(extra_info),
                update_websocket: true,
                ..Default::default()
            },
        )
        .await?;

        if settings.convert {
            crate::conversion::mass_convert(
                &self.database,
                &settings,
                &self.bus,
                data.volume_id,
                crate::conversion::ConvertOptions {
                    filepath_filter: Some(imported.clone()),
                    update_websocket_files: true,
                    ..Default::default()
                },
            )
            .await?;
        } else if settings.rename_downloaded_files {
            mass_rename(
                &self.database,
                &settings,
                data.volume_id,
                None,
                Some(&imported),
            )
            .await?;
        }

        {
            let (web_link, web_title, web_sub_title) = {
                let locked = entry.lock().unwrap();
                (
                    locked.web_link.clone(),
                    locked.web_title.clone(),
                    locked.web_sub_title.clone(),
                )
            };
            self.database
                .downloads()
                .add_history(
                    web_link.as_deref(),
                    web_title.as_deref(),
                    web_sub_title.as_deref(),
                    data.filename.as_deref(),
                    Some(data.volume_id),
                    data.issue_id,
                    Some(&data.source.0),
                    true,
                )
                .await?;
        }

        info!("Download {} finished and imported", data.id);
        self.drop_entry(entry).await?;
        self.bus.emit(Event::QueueEnded { id: data.id });
        self.notify.notify_one();
        Ok(())
    }

    /// Fail a download: blocklist the link, record history, advance the
    /// queue.
    async fn fail_download(
        &self,
        entry: &Arc<Mutex<QueueEntry>>,
    ) -> Result<()> {
        let (data, input) = {
            let mut locked = entry.lock().unwrap();
            locked.data.state = DownloadState::Failed;
            (
                locked.data.clone(),
                BlocklistInput {
                    web_link: locked.web_link.clone(),
                    web_title: locked.web_title.clone(),
                    web_sub_title: locked.web_sub_title.clone(),
                    download_link: Some(locked.data.url.clone()),
                    source: Some(locked.data.source.clone()),
                    volume_id: Some(locked.data.volume_id),
                    issue_id: locked.data.issue_id,
                },
            )
        };

        self.database
            .blocklist()
            .add(&input, BlocklistReason::DownloadFailed)
            .await?;
        self.database
            .downloads()
            .add_history(
                input.web_link.as_deref(),
                input.web_title.as_deref(),
                input.web_sub_title.as_deref(),
                data.filename.as_deref(),
                Some(data.volume_id),
                data.issue_id,
                Some(&data.source.0),
                false,
            )
            .await?;

        self.drop_entry(entry).await?;
        self.bus.emit(Event::QueueEnded { id: data.id });
        self.notify.notify_one();
        Ok(())
    }

    async fn drop_entry(&self, entry: &Arc<Mutex<QueueEntry>>) -> Result<()> {
        let id = entry.lock().unwrap().data.id;
        self.queue
            .lock()
            .unwrap()
            .retain(|other| other.lock().unwrap().data.id != id);
        self.database.downloads().remove(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_torrent_link_detection() {
        assert!(is_torrent_link("magnet:?xt=urn:btih:abc"));
        assert!(is_torrent_link("https://example.com/file.torrent"));
        assert!(!is_torrent_link("https://example.com/file.cbz"));
    }
}
