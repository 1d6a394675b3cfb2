//! Coordinator facade: the API consumed by the editor bridge.
//!
//! All state lives in one [`State`] behind a mutex that is never held across
//! an await. Editor notifications update that state synchronously, in the
//! order they arrive, and hand any daemon work to a spawned task. The
//! returned [`JoinHandle`] resolves when that work is done; callers that do
//! not care may drop it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rtag_config::RtagConfig;
use rtag_types::{CoordinatorEvent, DiagnosticsSnapshot, UnsavedFile};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::diagnostics::DiagnosticsStore;
use crate::documents::DocumentSet;
use crate::gateway::CommandGateway;
use crate::registry::{ProjectRegistry, deepest_root};
use crate::reload::ReloadSet;
use crate::stream::StreamControl;
use crate::tasks::{TaskKind, TaskManager, TaskPayload};
use crate::timers::{AbortOnDrop, TimerMap};

/// Quiet period after the last edit before a file is reindexed.
pub const REINDEX_DEBOUNCE: Duration = Duration::from_millis(500);
/// Bound on the whole will-save suspend exchange (also passed to the daemon).
pub const SUSPEND_TIMEOUT: Duration = Duration::from_millis(100);
/// Fallback resume for a clean file whose save produces no save notification.
pub const RESUME_DELAY: Duration = Duration::from_millis(2000);
/// Delay of an upgraded reindex so it lands after the daemon's own save pass.
pub const DELAYED_REINDEX: Duration = Duration::from_millis(1000);
/// Interval between "is this project still indexing" queries.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5000);
/// Bound on a single indexing query.
pub const POLL_QUERY_TIMEOUT: Duration = Duration::from_millis(1000);
/// Wait before restarting a crashed diagnostics or daemon process.
pub const RESTART_BACKOFF: Duration = Duration::from_millis(5000);

pub(crate) struct State {
    pub config: RtagConfig,
    pub registry: ProjectRegistry,
    pub tasks: TaskManager,
    pub documents: DocumentSet,
    pub reindex_timers: TimerMap<PathBuf>,
    pub resume_timers: TimerMap<PathBuf>,
    pub delayed_reindexes: TimerMap<PathBuf>,
    pub suspended: HashSet<PathBuf>,
    /// Suspended files with a resume exchange in flight.
    pub resuming: HashSet<PathBuf>,
    pub diagnostics: DiagnosticsStore,
    pub diagnostics_enabled: bool,
    pub stream: Option<StreamControl>,
    pub stream_generation: u64,
    pub reload: ReloadSet,
    pub daemon_supervisor: Option<AbortOnDrop>,
    pub initialized: bool,
}

impl State {
    fn new(config: RtagConfig, reload: ReloadSet) -> Self {
        let diagnostics_enabled = config.diagnostics.enabled;
        Self {
            config,
            registry: ProjectRegistry::new(),
            tasks: TaskManager::new(),
            documents: DocumentSet::new(),
            reindex_timers: TimerMap::new(),
            resume_timers: TimerMap::new(),
            delayed_reindexes: TimerMap::new(),
            suspended: HashSet::new(),
            resuming: HashSet::new(),
            diagnostics: DiagnosticsStore::new(),
            diagnostics_enabled,
            stream: None,
            stream_generation: 0,
            reload,
            daemon_supervisor: None,
            initialized: false,
        }
    }

    pub fn owning_project(&self, file: &Path) -> Option<PathBuf> {
        self.registry.owning_project(file).map(Path::to_path_buf)
    }

    /// Whether `file` falls under a project that is still loading and has
    /// not been superseded by a deeper registered project.
    pub fn is_in_loading_project(&self, file: &Path) -> bool {
        let Some(loading) = deepest_root(self.tasks.loading_projects(), file) else {
            return false;
        };
        match self.registry.owning_project(file) {
            None => true,
            Some(owner) => loading.components().count() > owner.components().count(),
        }
    }

    /// Registered or loading.
    pub fn is_known_file(&self, file: &Path) -> bool {
        self.registry.is_in_project(file, None) || self.is_in_loading_project(file)
    }

    pub fn unsaved_in(&self, project: &Path) -> Vec<UnsavedFile> {
        self.documents.unsaved(|path| {
            self.config.is_source_file(path) && self.registry.is_in_project(path, Some(project))
        })
    }

    pub fn open_sources_in(&self, project: &Path) -> Vec<PathBuf> {
        self.documents.open_paths(|path| {
            self.config.is_source_file(path) && self.registry.is_in_project(path, Some(project))
        })
    }

    pub fn suspended_in(&self, project: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .suspended
            .iter()
            .filter(|file| self.registry.is_in_project(file, Some(project)))
            .cloned()
            .collect();
        files.sort();
        files
    }
}

pub(crate) struct Shared<G> {
    pub gateway: G,
    pub state: Mutex<State>,
    pub events: mpsc::UnboundedSender<CoordinatorEvent>,
    /// Signalled whenever a file leaves the suspended set or a resume
    /// exchange finishes.
    pub resumed: Notify,
}

/// Project index coordinator for one editor session.
pub struct Coordinator<G> {
    pub(crate) shared: Arc<Shared<G>>,
}

impl<G> Clone for Coordinator<G> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<G: CommandGateway> Coordinator<G> {
    /// Create a coordinator. Nothing talks to the daemon until
    /// [`start`](Self::start).
    pub fn new(
        config: RtagConfig,
        gateway: G,
        reload: ReloadSet,
    ) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            gateway,
            state: Mutex::new(State::new(config, reload)),
            events,
            resumed: Notify::new(),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub(crate) fn emit(&self, event: CoordinatorEvent) {
        // The receiver is gone only while the bridge shuts down.
        let _ = self.shared.events.send(event);
    }

    /// User-visible error; also logged.
    pub(crate) fn report(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!("{text}");
        self.emit(CoordinatorEvent::error(text));
    }

    pub(crate) fn inform(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{text}");
        self.emit(CoordinatorEvent::info(text));
    }

    /// Invoke the client; a failure is reported (unless the daemon said
    /// nothing useful) and yields `None`.
    pub(crate) async fn run(&self, args: Vec<String>, unsaved: Vec<UnsavedFile>) -> Option<String> {
        match self.shared.gateway.invoke(args, unsaved).await {
            Ok(output) => Some(output),
            Err(e) => {
                match e.user_message() {
                    Some(message) => self.report(message),
                    None => tracing::debug!("{e}"),
                }
                None
            }
        }
    }

    fn spawn<F>(&self, work: impl FnOnce(Self) -> F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(work(self.clone()))
    }

    /// Bring up the daemon, start the diagnostics stream and discover
    /// projects in `folders`.
    pub fn start(&self, folders: Vec<PathBuf>) -> JoinHandle<()> {
        self.spawn(|this| async move {
            if let Err(e) = this.initialize_daemon().await {
                this.report(e.to_string());
                return;
            }
            this.with_state(|s| s.initialized = true);
            this.start_diagnostics();
            this.add_projects(folders).await;
        })
    }

    /// Workspace folders were added or removed.
    pub fn folders_changed(&self, added: Vec<PathBuf>, removed: Vec<PathBuf>) -> JoinHandle<()> {
        let initialized = self.with_state(|s| s.initialized);
        if initialized {
            for folder in &removed {
                self.remove_project(folder);
            }
        }
        self.spawn(|this| async move {
            if initialized {
                this.add_projects(added).await;
            }
        })
    }

    /// A new configuration was loaded.
    ///
    /// Projects whose compilation database moved are queued for a purge on
    /// next open; diagnostics toggles apply immediately; anything else needs
    /// a restart.
    pub fn configuration_changed(&self, config: RtagConfig) {
        let (restart_needed, enable, disable) = self.with_state(|s| {
            let affected: Vec<PathBuf> = s
                .registry
                .paths()
                .iter()
                .filter(|project| s.config.database_directory_changed(&config, project))
                .cloned()
                .collect();
            s.reload.extend(affected);

            let mut comparable = s.config.clone();
            comparable.diagnostics = config.diagnostics.clone();
            let restart_needed = comparable != config;

            let enable = config.diagnostics.enabled && !s.diagnostics_enabled;
            let disable = !config.diagnostics.enabled && s.diagnostics_enabled;
            if enable {
                s.diagnostics_enabled = true;
            }
            s.config = config;
            (restart_needed, enable, disable)
        });

        if restart_needed {
            tracing::info!("Configuration change requires a restart");
            self.emit(CoordinatorEvent::ReloadRequired);
        }
        if disable {
            self.stop_diagnostics();
        }
        if enable {
            self.start_diagnostics();
        }
    }

    /// Reindex the project owning `file`.
    pub fn reindex_active_project(&self, file: &Path) -> Option<JoinHandle<()>> {
        let (project, unsaved) = self.with_state(|s| {
            let project = s.owning_project(file)?;
            let unsaved = s.unsaved_in(&project);
            Some((project, unsaved))
        })?;
        Some(self.start_task(project, TaskPayload::Reindex { unsaved }))
    }

    /// Reindex every registered project.
    pub fn reindex_workspace(&self) -> Vec<JoinHandle<()>> {
        let projects: Vec<(PathBuf, Vec<UnsavedFile>)> = self.with_state(|s| {
            s.registry
                .paths()
                .iter()
                .map(|project| (project.clone(), s.unsaved_in(project)))
                .collect()
        });
        projects
            .into_iter()
            .map(|(project, unsaved)| self.start_task(project, TaskPayload::Reindex { unsaved }))
            .collect()
    }

    /// Unconditionally reindex one file.
    pub fn reindex_file(&self, file: PathBuf) -> JoinHandle<()> {
        self.spawn(|this| async move { this.reindex(&file, None).await })
    }

    /// Ask the daemon to re-emit diagnostics for `files`.
    pub fn request_diagnostics(&self, files: Vec<PathBuf>) -> JoinHandle<()> {
        self.spawn(|this| async move {
            if !files.is_empty() {
                this.run(crate::protocol::diagnose_files(&files), Vec::new())
                    .await;
            }
        })
    }

    /// Ask the daemon to re-emit diagnostics for every file in `project`.
    pub fn request_project_diagnostics(&self, project: PathBuf) -> JoinHandle<()> {
        self.spawn(|this| async move { this.diagnose_project(&project, true).await })
    }

    /// Stop diagnostics and cancel every timer and task.
    pub fn shutdown(&self) {
        self.stop_diagnostics();
        self.with_state(|s| {
            s.reindex_timers.cancel_all();
            s.resume_timers.cancel_all();
            s.delayed_reindexes.cancel_all();
            s.tasks.cancel_all();
            s.daemon_supervisor = None;
            s.initialized = false;
        });
        tracing::info!("Coordinator shut down");
    }

    #[must_use]
    pub fn project_paths(&self) -> Vec<PathBuf> {
        self.with_state(|s| s.registry.paths().to_vec())
    }

    #[must_use]
    pub fn owning_project(&self, file: &Path) -> Option<PathBuf> {
        self.with_state(|s| s.owning_project(file))
    }

    #[must_use]
    pub fn is_in_project(&self, file: &Path, project: Option<&Path>) -> bool {
        self.with_state(|s| s.registry.is_in_project(file, project))
    }

    #[must_use]
    pub fn is_in_loading_project(&self, file: &Path) -> bool {
        self.with_state(|s| s.is_in_loading_project(file))
    }

    #[must_use]
    pub fn is_loading(&self, project: &Path) -> bool {
        self.with_state(|s| s.tasks.is_running(project, TaskKind::Load))
    }

    #[must_use]
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.with_state(|s| s.diagnostics.snapshot())
    }

    #[must_use]
    pub fn diagnostics_enabled(&self) -> bool {
        self.with_state(|s| s.diagnostics_enabled)
    }

    /// Files whose daemon watch is currently suspended, sorted.
    #[must_use]
    pub fn suspended_files(&self) -> Vec<PathBuf> {
        self.with_state(|s| {
            let mut files: Vec<PathBuf> = s.suspended.iter().cloned().collect();
            files.sort();
            files
        })
    }
}
