//! The task queue: serialising work per volume, running recurring tasks
//! and broadcasting task lifecycle events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};
use kapowarr_model::{
    Event, IssueId, TaskData, TaskId, TaskPlanEntry, VolumeId,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::download::{AddDownloadParams, DownloadOrchestrator};
use crate::error::{KapowarrError, Result};
use crate::events::EventBus;
use crate::session::HttpSession;
use crate::settings::Settings;

const PLANNER_INTERVAL: std::time::Duration =
    std::time::Duration::from_secs(60);

/// The recurring tasks and their default interval in seconds.
const RECURRING_TASKS: [(&str, i64); 2] =
    [("update_all", 86_400), ("search_all", 86_400)];

/// The work a task performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Refresh metadata and scan files for the whole library.
    UpdateAll,
    /// Refresh metadata and scan files for one volume.
    RefreshAndScan(VolumeId),
    /// Auto search for all monitored volumes.
    SearchAll,
    /// Auto search for one volume or issue and queue the results.
    AutoSearch {
        volume_id: VolumeId,
        issue_id: Option<IssueId>,
    },
    /// Rename the files of a volume or issue.
    MassRename {
        volume_id: VolumeId,
        issue_id: Option<IssueId>,
    },
    /// Convert the files of a volume or issue.
    MassConvert {
        volume_id: VolumeId,
        issue_id: Option<IssueId>,
    },
}

impl TaskAction {
    pub fn name(&self) -> &'static str {
        match self {
            TaskAction::UpdateAll => "update_all",
            TaskAction::RefreshAndScan(_) => "refresh_and_scan",
            TaskAction::SearchAll => "search_all",
            TaskAction::AutoSearch { .. } => "auto_search",
            TaskAction::MassRename { .. } => "mass_rename",
            TaskAction::MassConvert { .. } => "mass_convert",
        }
    }

    pub fn display_title(&self) -> &'static str {
        match self {
            TaskAction::UpdateAll => "Update all volumes",
            TaskAction::RefreshAndScan(_) => "Refresh and scan",
            TaskAction::SearchAll => "Search all volumes",
            TaskAction::AutoSearch { .. } => "Auto search",
            TaskAction::MassRename { .. } => "Mass rename",
            TaskAction::MassConvert { .. } => "Mass convert",
        }
    }

    pub fn volume_id(&self) -> Option<VolumeId> {
        match self {
            TaskAction::RefreshAndScan(volume_id)
            | TaskAction::AutoSearch { volume_id, .. }
            | TaskAction::MassRename { volume_id, .. }
            | TaskAction::MassConvert { volume_id, .. } => Some(*volume_id),
            _ => None,
        }
    }

    pub fn issue_id(&self) -> Option<IssueId> {
        match self {
            TaskAction::AutoSearch { issue_id, .. }
            | TaskAction::MassRename { issue_id, .. }
            | TaskAction::MassConvert { issue_id, .. } => *issue_id,
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<TaskAction> {
        match name {
            "update_all" => Some(TaskAction::UpdateAll),
            "search_all" => Some(TaskAction::SearchAll),
            _ => None,
        }
    }
}

/// Everything a task needs to do its work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub database: Database,
    pub settings: Settings,
    pub bus: EventBus,
    pub session: HttpSession,
    pub downloads: DownloadOrchestrator,
    pub cv_cache: crate::comicvine::CvCache,
}

struct QueuedTask {
    id: TaskId,
    action: TaskAction,
    called_from: String,
    message: RwLock<String>,
    token: CancellationToken,
}

impl QueuedTask {
    fn to_data(&self) -> TaskData {
        TaskData {
            id: self.id,
            action: self.action.name().to_string(),
            display_title: self.action.display_title().to_string(),
            volume_id: self.action.volume_id(),
            issue_id: self.action.issue_id(),
            called_from: self.called_from.clone(),
            message: self.message.read().unwrap().clone(),
        }
    }
}

/// A serialisation lane: one per volume, plus the global one for
/// volume-less tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Lane {
    Global,
    Volume(VolumeId),
}

impl Lane {
    fn of(action: &TaskAction) -> Lane {
        match action.volume_id() {
            Some(volume_id) => Lane::Volume(volume_id),
            None => Lane::Global,
        }
    }
}

struct Inner {
    context: TaskContext,
    queue: Mutex<VecDeque<Arc<QueuedTask>>>,
    running: DashMap<TaskId, Arc<QueuedTask>>,
    busy_lanes: DashSet<Lane>,
    notify: Notify,
    next_id: AtomicI64,
}

/// The task orchestrator. Two tasks for the same volume never run
/// concurrently; volume-less tasks serialise on a global lane.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("queue_size", &self.inner.queue.lock().unwrap().len())
            .finish()
    }
}

impl TaskOrchestrator {
    pub fn new(context: TaskContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                queue: Mutex::new(VecDeque::new()),
                running: DashMap::new(),
                busy_lanes: DashSet::new(),
                notify: Notify::new(),
                next_id: AtomicI64::new(1),
            }),
        }
    }

    /// Queue a task. Returns its id for status polling and cancellation.
    pub fn add(&self, action: TaskAction, called_from: &str) -> TaskId {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let task = Arc::new(QueuedTask {
            id,
            action,
            called_from: called_from.to_string(),
            message: RwLock::new(String::new()),
            token: CancellationToken::new(),
        });

        self.inner.context.bus.emit(Event::TaskAdded {
            action: task.action.name().to_string(),
            volume_id: task.action.volume_id(),
            issue_id: task.action.issue_id(),
        });
        self.inner.queue.lock().unwrap().push_back(task);
        self.inner.notify.notify_waiters();
        info!("Added task {id}");
        id
    }

    pub fn list(&self) -> Vec<TaskData> {
        let running: Vec<TaskData> = self
            .inner
            .running
            .iter()
            .map(|task| task.to_data())
            .collect();
        running
            .into_iter()
            .chain(
                self.inner
                    .queue
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|task| task.to_data()),
            )
            .collect()
    }

    pub fn get(&self, id: TaskId) -> Result<TaskData> {
        self.list()
            .into_iter()
            .find(|task| task.id == id)
            .ok_or(KapowarrError::TaskNotFound(id))
    }

    /// Delete a queued task. A running task can not be deleted, only
    /// cancelled.
    pub fn delete(&self, id: TaskId) -> Result<()> {
        if self.inner.running.contains_key(&id) {
            return Err(KapowarrError::TaskNotDeletable);
        }

        let mut queue = self.inner.queue.lock().unwrap();
        let position = queue
            .iter()
            .position(|task| task.id == id)
            .ok_or(KapowarrError::TaskNotFound(id))?;
        let task = queue.remove(position).unwrap();
        drop(queue);

        self.inner.context.bus.emit(Event::TaskEnded {
            action: task.action.name().to_string(),
            volume_id: task.action.volume_id(),
            issue_id: task.action.issue_id(),
        });
        Ok(())
    }

    /// Cancel a task. A running task stops at its next cooperative yield
    /// point; a queued task is removed right away.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        if let Some(task) = self.inner.running.get(&id) {
            task.token.cancel();
            return Ok(());
        }
        self.delete(id)
    }

    /// Whether a task is running for the volume, for deletion guards.
    pub fn volume_busy(&self, volume_id: VolumeId) -> bool {
        self.inner.busy_lanes.contains(&Lane::Volume(volume_id))
    }

    /// The schedule of the recurring tasks.
    pub async fn planning(&self) -> Result<Vec<TaskPlanEntry>> {
        let store = self.inner.context.database.task_store();
        let mut entries = Vec::with_capacity(RECURRING_TASKS.len());
        for (name, default_interval) in RECURRING_TASKS {
            let (interval, last_run) = store
                .interval(name)
                .await?
                .unwrap_or((default_interval, None));
            let last_run = last_run
                .and_then(|stamp| DateTime::<Utc>::from_timestamp(stamp, 0));
            let next_run = last_run
                .map(|run| run + ChronoDuration::seconds(interval))
                .unwrap_or_else(Utc::now);
            let action = TaskAction::from_name(name)
                .expect("recurring task names are static");
            entries.push(TaskPlanEntry {
                action: name.to_string(),
                display_title: action.display_title().to_string(),
                interval_seconds: interval,
                last_run,
                next_run,
            });
        }
        Ok(entries)
    }

    /// Start the worker pool and the planner; they run until the token
    /// fires.
    pub fn start(&self, shutdown: CancellationToken, workers: usize) {
        for _ in 0..workers.max(1) {
            let inner = Arc::clone(&self.inner);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    match inner.claim_runnable() {
                        Some(task) => inner.run_task(task).await,
                        None => {
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = inner.notify.notified() => {}
                            }
                        }
                    }
                }
            });
        }

        let inner = Arc::clone(&self.inner);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PLANNER_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(error) = inner.plan_due_tasks(&orchestrator).await
                {
                    warn!("Task planner error: {error}");
                }
            }
        });
    }
}

impl Inner {
    /// Take the first queued task whose lane is free. The `DashSet`
    /// insert doubles as the atomic lane claim: it only returns true for
    /// a lane nobody holds.
    fn claim_runnable(&self) -> Option<Arc<QueuedTask>> {
        let mut queue = self.queue.lock().unwrap();
        let position = queue
            .iter()
            .position(|task| self.busy_lanes.insert(Lane::of(&task.action)))?;
        let task = queue.remove(position).unwrap();
        drop(queue);

        self.running.insert(task.id, Arc::clone(&task));
        Some(task)
    }

    fn release(&self, task: &QueuedTask) {
        self.busy_lanes.remove(&Lane::of(&task.action));
        self.running.remove(&task.id);
        // Another queued task may have been waiting on this lane.
        self.notify.notify_waiters();
    }

    fn set_message(&self, task: &QueuedTask, message: impl Into<String>) {
        let message = message.into();
        *task.message.write().unwrap() = message.clone();
        self.context.bus.emit(Event::TaskStatus { message });
    }

    async fn run_task(&self, task: Arc<QueuedTask>) {
        info!("Running task {} ({})", task.id, task.action.name());
        self.set_message(
            &task,
            format!("Running {}", task.action.display_title()),
        );

        if let Err(error) = self.execute(&task).await {
            error!("Task {} failed: {error}", task.id);
        }

        if let Err(error) = self
            .context
            .database
            .task_store()
            .add_history(task.action.name(), task.action.display_title())
            .await
        {
            warn!("Recording task history failed: {error}");
        }

        self.context.bus.emit(Event::TaskEnded {
            action: task.action.name().to_string(),
            volume_id: task.action.volume_id(),
            issue_id: task.action.issue_id(),
        });
        self.release(&task);
    }

    async fn execute(&self, task: &QueuedTask) -> Result<()> {
        let context = &self.context;
        let settings = context.settings.get();

        match &task.action {
            TaskAction::UpdateAll => {
                let volumes =
                    context.database.volumes().fetch_all_volumes().await?;
                let total = volumes.len();
                for (index, volume) in volumes.iter().enumerate() {
                    if task.token.is_cancelled() {
                        info!("Task {} cancelled", task.id);
                        break;
                    }
                    self.set_message(
                        task,
                        format!(
                            "Updating volume {}/{total}: {}",
                            index + 1,
                            volume.title
                        ),
                    );
                    if let Err(error) = crate::volumes::refresh_and_scan(
                        context, volume.id,
                    )
                    .await
                    {
                        warn!(
                            "Refreshing volume {} failed: {error}",
                            volume.id
                        );
                    }
                }
            }
            TaskAction::RefreshAndScan(volume_id) => {
                crate::volumes::refresh_and_scan(context, *volume_id)
                    .await?;
            }
            TaskAction::SearchAll => {
                let volumes =
                    context.database.volumes().fetch_all_volumes().await?;
                for volume in volumes.iter().filter(|v| v.monitored) {
                    if task.token.is_cancelled() {
                        info!("Task {} cancelled", task.id);
                        break;
                    }
                    self.set_message(
                        task,
                        format!("Searching for {}", volume.title),
                    );
                    self.search_and_queue(volume.id, None).await?;
                }
            }
            TaskAction::AutoSearch {
                volume_id,
                issue_id,
            } => {
                self.search_and_queue(*volume_id, *issue_id).await?;
            }
            TaskAction::MassRename {
                volume_id,
                issue_id,
            } => {
                crate::naming::mass_rename(
                    &context.database,
                    &settings,
                    *volume_id,
                    *issue_id,
                    None,
                )
                .await?;
                context.bus.emit(Event::VolumeUpdated {
                    volume_id: *volume_id,
                });
            }
            TaskAction::MassConvert {
                volume_id,
                issue_id,
            } => {
                crate::conversion::mass_convert(
                    &context.database,
                    &settings,
                    &context.bus,
                    *volume_id,
                    crate::conversion::ConvertOptions {
                        issue_id: *issue_id,
                        update_websocket_progress: true,
                        update_websocket_files: true,
                        ..Default::default()
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Auto search and push the chosen results into the download queue.
    async fn search_and_queue(
        &self,
        volume_id: VolumeId,
        issue_id: Option<IssueId>,
    ) -> Result<()> {
        let context = &self.context;
        let settings = context.settings.get();
        let results = crate::search::auto_search(
            &context.database,
            &settings,
            &context.session,
            volume_id,
            issue_id,
        )
        .await?;

        for result in results {
            let params = AddDownloadParams {
                link: result.result.link.clone(),
                volume_id,
                issue_id,
                filename: None,
                source: result.result.source.clone(),
                web_link: Some(result.result.link.clone()),
                web_title: Some(result.result.display_title.clone()),
                web_sub_title: None,
                force_match: false,
                releaser: result.result.releaser.clone(),
                scan_type: result.result.scan_type.clone(),
                resolution: result.result.resolution.clone(),
                dpi: result.result.dpi.clone(),
            };
            if let Err(error) = context.downloads.add(params).await {
                warn!(
                    "Queueing download for volume {volume_id} failed: {error}"
                );
            }
        }
        Ok(())
    }

    /// Queue recurring tasks that are due.
    async fn plan_due_tasks(
        &self,
        orchestrator: &TaskOrchestrator,
    ) -> Result<()> {
        let store = self.context.database.task_store();
        let now = Utc::now().timestamp();

        for (name, default_interval) in RECURRING_TASKS {
            let (interval, last_run) = match store.interval(name).await? {
                Some(row) => row,
                None => {
                    store.set_interval(name, default_interval).await?;
                    (default_interval, None)
                }
            };

            let due = last_run
                .map(|stamp| stamp + interval <= now)
                .unwrap_or(true);
            if !due {
                continue;
            }

            let already_queued = orchestrator
                .list()
                .iter()
                .any(|task| task.action == name);
            if already_queued {
                continue;
            }

            if let Some(action) = TaskAction::from_name(name) {
                orchestrator.add(action, "planner");
                store.mark_run(name).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(TaskAction::UpdateAll.name(), "update_all");
        assert_eq!(
            TaskAction::AutoSearch {
                volume_id: VolumeId(1),
                issue_id: None
            }
            .name(),
            "auto_search"
        );
        assert_eq!(
            TaskAction::from_name("search_all"),
            Some(TaskAction::SearchAll)
        );
    }

    #[test]
    fn test_volume_lane_assignment() {
        let rename = TaskAction::MassRename {
            volume_id: VolumeId(4),
            issue_id: None,
        };
        assert_eq!(Lane::of(&rename), Lane::Volume(VolumeId(4)));
        assert_eq!(Lane::of(&TaskAction::UpdateAll), Lane::Global);
    }

    #[test]
    fn test_lane_claim_is_exclusive() {
        let lanes: DashSet<Lane> = DashSet::new();
        let action = TaskAction::RefreshAndScan(VolumeId(4));

        assert!(lanes.insert(Lane::of(&action)));
        assert!(!lanes.insert(Lane::of(&action)));
        // A different lane is unaffected.
        assert!(lanes.insert(Lane::of(&TaskAction::UpdateAll)));

        lanes.remove(&Lane::of(&action));
        assert!(lanes.insert(Lane::of(&action)));
    }
}
