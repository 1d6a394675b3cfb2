//! Edit debouncing and the save-time watch suspension protocol.
//!
//! Edits are reindexed after a quiet period. Around a save, the daemon's own
//! file watch is suspended when other files in the project are unsaved, so
//! that its save-triggered reindex cannot run against stale buffers. A file
//! is always resumed before anything in its project is reindexed.

use std::path::{Path, PathBuf};

use rtag_types::CoordinatorEvent;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};

use crate::gateway::CommandGateway;
use crate::manager::{
    Coordinator, DELAYED_REINDEX, REINDEX_DEBOUNCE, RESUME_DELAY, SUSPEND_TIMEOUT,
};
use crate::protocol;

enum ResumeStep {
    Done,
    Wait,
    Orphaned,
    Resume(PathBuf),
}

/// Clears a file's in-flight resume marker, even if the exchange is dropped.
struct ResumeInFlight<'a, G: CommandGateway> {
    coordinator: &'a Coordinator<G>,
    path: &'a Path,
}

impl<G: CommandGateway> Drop for ResumeInFlight<'_, G> {
    fn drop(&mut self) {
        self.coordinator.with_state(|s| s.resuming.remove(self.path));
        self.coordinator.shared.resumed.notify_waiters();
    }
}

impl<G: CommandGateway> Coordinator<G> {
    /// A document was opened in the editor.
    pub fn document_opened(&self, path: PathBuf, text: String) -> JoinHandle<()> {
        let diagnose = self.with_state(|s| {
            s.documents.open(path.clone(), text);
            s.diagnostics_enabled
                && s.config.diagnostics.open_files_only
                && s.config.is_source_file(&path)
                && s.is_known_file(&path)
        });
        self.spawn_diagnose(diagnose.then_some(path))
    }

    fn spawn_diagnose(&self, file: Option<PathBuf>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Some(file) = file {
                this.run(protocol::diagnose_files([&file]), Vec::new()).await;
            }
        })
    }

    /// A document was closed; its published diagnostics are withdrawn.
    pub fn document_closed(&self, path: &Path) {
        self.with_state(|s| {
            s.documents.close(path);
            let withdraw = s.config.diagnostics.open_files_only
                && s.config.is_source_file(path)
                && s.is_known_file(path)
                && s.diagnostics.remove(path);
            if withdraw {
                self.emit(CoordinatorEvent::DiagnosticsRemoved {
                    path: path.to_path_buf(),
                });
            }
        });
    }

    /// The content of a document changed. Re-arms the file's debounce timer.
    pub fn document_changed(&self, path: PathBuf, text: String) {
        let this = self.clone();
        self.with_state(|s| {
            if !s.documents.change(path.clone(), text) || !s.config.is_source_file(&path) {
                return;
            }
            let Some(project) = s.owning_project(&path) else {
                return;
            };

            let generation = s.reindex_timers.next_generation();
            let file = path.clone();
            let handle = tokio::spawn(async move {
                sleep(REINDEX_DEBOUNCE).await;
                if !this.with_state(|s| s.reindex_timers.fire(&file, generation)) {
                    return;
                }
                tracing::debug!(path = %file.display(), "Edit quiet period elapsed");
                this.resume_delayed(&project, None).await;
                this.reindex(&file, Some(true)).await;
            });
            s.reindex_timers.arm(path, generation, handle);
        });
    }

    /// A document is about to be saved. The returned handle resolves once
    /// the save may proceed, at most [`SUSPEND_TIMEOUT`] later.
    pub fn will_save(&self, path: PathBuf) -> JoinHandle<()> {
        let plan = self.with_state(|s| {
            s.reindex_timers.cancel(&path);
            if !s.config.is_source_file(&path) {
                return None;
            }
            let project = s.owning_project(&path)?;

            // Without other unsaved files the daemon's watch is trusted.
            let unsaved = s.unsaved_in(&project);
            let only_this = unsaved.iter().all(|file| file.path == path);
            if only_this || s.suspended.contains(&path) {
                return None;
            }
            Some((project, s.documents.is_dirty(&path)))
        });

        let this = self.clone();
        tokio::spawn(async move {
            let Some((project, dirty)) = plan else {
                return;
            };
            let suspended = match timeout(SUSPEND_TIMEOUT, this.suspend_watch(&project, &path)).await {
                Ok(suspended) => suspended,
                Err(_) => {
                    // The daemon may have acted on a toggle we stopped waiting
                    // for; the resume path checks its listing before acting.
                    tracing::debug!(path = %path.display(), "Suspend timed out");
                    this.mark_suspended(&path);
                    true
                }
            };
            if suspended && !dirty {
                // Saving a clean buffer produces no save notification.
                this.arm_resume_timer(path);
            }
        })
    }

    /// A document was saved.
    pub fn did_save(&self, path: PathBuf) -> JoinHandle<()> {
        let project = self.with_state(|s| {
            s.documents.saved(&path);
            s.resume_timers.cancel(&path);
            if s.config.is_source_file(&path) {
                s.owning_project(&path)
            } else {
                None
            }
        });

        let this = self.clone();
        tokio::spawn(async move {
            let Some(project) = project else {
                return;
            };
            this.resume_delayed(&project, Some(&path)).await;
            // The daemon's content check misses whatever happened while the
            // watch was off, so a suspended file is always force-reindexed.
            let suspended = this.resume_watch(&path).await;
            this.reindex(&path, suspended).await;
        })
    }

    async fn suspend_watch(&self, project: &Path, path: &Path) -> bool {
        let args = protocol::list_suspended(project, Some(SUSPEND_TIMEOUT));
        let Some(listing) = self.run(args, Vec::new()).await else {
            return false;
        };
        if protocol::parse_suspended(&listing).iter().any(|p| p == path) {
            self.mark_suspended(path);
            return true;
        }

        let args = protocol::toggle_suspend(path, Some(SUSPEND_TIMEOUT));
        let Some(output) = self.run(args, Vec::new()).await else {
            return false;
        };
        if protocol::is_now_suspended(&output, path) {
            tracing::debug!(path = %path.display(), "Suspended file watch");
            self.mark_suspended(path);
            true
        } else {
            false
        }
    }

    /// Resume `path`'s watch if it is suspended.
    ///
    /// Returns whether it was suspended, or `None` if the daemon could not
    /// be asked. A file not in the suspended set is left alone. The daemon's
    /// `--suspend` is a toggle, so only one resume per file is in flight; a
    /// concurrent caller waits for it instead of toggling again.
    pub(crate) async fn resume_watch(&self, path: &Path) -> Option<bool> {
        let mut waited = false;
        let project = loop {
            let notified = self.shared.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let step = self.with_state(|s| {
                if !s.suspended.contains(path) {
                    return ResumeStep::Done;
                }
                if s.resuming.contains(path) {
                    return ResumeStep::Wait;
                }
                match s.owning_project(path) {
                    Some(project) => {
                        s.resuming.insert(path.to_path_buf());
                        ResumeStep::Resume(project)
                    }
                    None => ResumeStep::Orphaned,
                }
            });
            match step {
                // If we waited, another caller resumed a suspended file.
                ResumeStep::Done => return Some(waited),
                ResumeStep::Wait => {
                    waited = true;
                    notified.await;
                }
                ResumeStep::Orphaned => {
                    // Its project is gone; nothing left to reindex it against.
                    self.mark_resumed(path);
                    return None;
                }
                ResumeStep::Resume(project) => break project,
            }
        };

        let _in_flight = ResumeInFlight { coordinator: self, path };
        self.toggle_resume(&project, path).await
    }

    async fn toggle_resume(&self, project: &Path, path: &Path) -> Option<bool> {
        let listing = self
            .run(protocol::list_suspended(project, None), Vec::new())
            .await?;
        if !protocol::parse_suspended(&listing).iter().any(|p| p == path) {
            self.mark_resumed(path);
            return Some(false);
        }

        let output = self
            .run(protocol::toggle_suspend(path, None), Vec::new())
            .await?;
        if protocol::is_no_longer_suspended(&output, path) {
            tracing::debug!(path = %path.display(), "Resumed file watch");
            self.mark_resumed(path);
        }
        Some(true)
    }

    /// Resume files in `project` that are waiting on a fallback timer.
    pub(crate) async fn resume_delayed(&self, project: &Path, except: Option<&Path>) {
        let files = self.with_state(|s| {
            let registry = &s.registry;
            s.resume_timers.cancel_where(|file| {
                except != Some(file.as_path()) && registry.is_in_project(file, Some(project))
            })
        });
        for file in files {
            self.resume_watch(&file).await;
        }
    }

    /// Wait until no file in `project` is suspended, force-resuming any
    /// still suspended after [`RESUME_DELAY`].
    pub(crate) async fn wait_for_resumed(&self, project: &Path) {
        let deadline = Instant::now() + RESUME_DELAY;
        loop {
            let notified = self.shared.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.with_state(|s| s.suspended_in(project).is_empty()) {
                return;
            }
            if timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        for file in self.with_state(|s| s.suspended_in(project)) {
            tracing::warn!(path = %file.display(), "Forcing resume of a suspended file watch");
            self.resume_watch(&file).await;
        }
    }

    /// Reindex `file` against the unsaved buffers of its project.
    ///
    /// `Some(true)` and `None` reindex unconditionally. `Some(false)` asks the
    /// daemon to check first, unless other files are unsaved: then the
    /// reindex is made unconditional and delayed past the daemon's own
    /// save-triggered pass.
    pub(crate) async fn reindex(&self, file: &Path, force: Option<bool>) {
        let Some((project, unsaved)) = self.with_state(|s| {
            let project = s.owning_project(file)?;
            let unsaved = s.unsaved_in(&project);
            Some((project, unsaved))
        }) else {
            return;
        };

        let delay = force == Some(false) && !unsaved.is_empty();
        let force = force.unwrap_or(true) || delay;
        let args = protocol::reindex_file(file, force);

        if !delay {
            self.wait_for_resumed(&project).await;
            self.run(args, unsaved).await;
            return;
        }

        let this = self.clone();
        let key = file.to_path_buf();
        self.with_state(|s| {
            let generation = s.delayed_reindexes.next_generation();
            let timer_key = key.clone();
            let handle = tokio::spawn(async move {
                sleep(DELAYED_REINDEX).await;
                if !this.with_state(|s| s.delayed_reindexes.fire(&timer_key, generation)) {
                    return;
                }
                this.wait_for_resumed(&project).await;
                this.run(args, unsaved).await;
            });
            s.delayed_reindexes.arm(key, generation, handle);
        });
    }

    fn arm_resume_timer(&self, path: PathBuf) {
        let this = self.clone();
        self.with_state(|s| {
            let generation = s.resume_timers.next_generation();
            let file = path.clone();
            let handle = tokio::spawn(async move {
                sleep(RESUME_DELAY).await;
                if this.with_state(|s| s.resume_timers.fire(&file, generation)) {
                    this.resume_watch(&file).await;
                }
            });
            s.resume_timers.arm(path, generation, handle);
        });
    }

    fn mark_suspended(&self, path: &Path) {
        self.with_state(|s| s.suspended.insert(path.to_path_buf()));
    }

    fn mark_resumed(&self, path: &Path) {
        if self.with_state(|s| s.suspended.remove(path)) {
            self.shared.resumed.notify_waiters();
        }
    }
}
