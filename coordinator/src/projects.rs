//! Project discovery, load/reindex task driving and project diagnostics.

use std::path::{Path, PathBuf};

use rtag_config::normalize_path;
use rtag_types::CoordinatorEvent;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};

use crate::gateway::CommandGateway;
use crate::manager::{Coordinator, POLL_INTERVAL, POLL_QUERY_TIMEOUT};
use crate::protocol;
use crate::tasks::{TaskId, TaskKind, TaskPayload};

/// Reading the first compile command gives up past this many bytes.
const MAX_FIRST_COMMAND_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProjectLoadError {
    #[error("Unable to find the compilation database: {}", .0.display())]
    MissingDatabase(PathBuf),
    #[error("Unable to find the project root path in {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("The project path is outside of the root path given by {}", .0.display())]
    OutsideRoot(PathBuf),
}

/// Source file of the first entry in a compilation database fragment.
///
/// `text` is a JSON array; the entry needs an absolute `directory` and a
/// `file`, which is resolved against it when relative.
fn first_compile_file(text: &str) -> Option<PathBuf> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(text).ok()?;
    let entry = entries.first()?;
    let directory = Path::new(entry.get("directory")?.as_str()?);
    let file = Path::new(entry.get("file")?.as_str()?);
    if !directory.is_absolute() {
        return None;
    }
    Some(normalize_path(&directory.join(file)))
}

/// Read `compile_commands.json` up to the end of its first entry and close
/// the array, so huge databases are not parsed in full.
async fn read_first_compile_command(path: &Path) -> Option<String> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut text = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = file.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        if let Some(end) = chunk[..n].iter().position(|&b| b == b'}') {
            text.extend_from_slice(&chunk[..=end]);
            break;
        }
        text.extend_from_slice(&chunk[..n]);
        if text.len() > MAX_FIRST_COMMAND_BYTES {
            return None;
        }
    }
    text.extend_from_slice(b"\n]");
    String::from_utf8(text).ok()
}

fn capitalized(text: &str) -> String {
    let mut chars = text.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

impl<G: CommandGateway> Coordinator<G> {
    /// Discover and load projects for newly opened workspace folders.
    pub(crate) async fn add_projects(&self, folders: Vec<PathBuf>) {
        if folders.is_empty() {
            return;
        }

        let purge: Vec<PathBuf> = self.with_state(|s| {
            s.reload
                .paths()
                .filter(|path| folders.contains(path))
                .cloned()
                .collect()
        });
        if !purge.is_empty() {
            tracing::info!(projects = ?purge, "Deleting projects queued for reload");
            self.run(protocol::delete_projects(&purge), Vec::new()).await;
            self.with_state(|s| s.reload.remove_all(&purge));
        }

        let known = self
            .run(protocol::list_projects(), Vec::new())
            .await
            .map(|output| protocol::parse_project_list(&output));
        let mut loaded = Vec::new();
        for project in known.iter().flatten() {
            if let Some(output) = self.run(protocol::project_status(project), Vec::new()).await {
                loaded.extend(protocol::parse_compile_directories(&output));
            }
        }

        for folder in folders {
            let known_project = known.as_ref().is_some_and(|k| k.contains(&folder));
            self.add_project(folder, known_project, &loaded).await;
        }
    }

    async fn add_project(&self, folder: PathBuf, known: bool, loaded_dirs: &[PathBuf]) {
        let info = match self.with_state(|s| s.config.compile_commands_info(&folder)) {
            Ok(info) => info,
            Err(e) => {
                self.report(e.to_string());
                return;
            }
        };
        let loaded = loaded_dirs.contains(&info.directory);
        let compile_file = info.compile_file();

        if tokio::fs::try_exists(&compile_file).await.unwrap_or(false) {
            if let Err(e) = self.validate_compile_commands(&compile_file, &folder).await {
                self.report_load_error(&folder, &e);
                return;
            }
        } else if !loaded || info.from_config {
            if known || info.from_config {
                self.report_load_error(&folder, &ProjectLoadError::MissingDatabase(compile_file));
            }
            return;
        }

        if loaded {
            tracing::info!(project = %folder.display(), "Project already loaded by the daemon");
            self.register_project(folder.clone());
            self.diagnose_project(&folder, false).await;
        } else if self.is_loading(&folder) {
            tracing::debug!(project = %folder.display(), "Project is already loading");
        } else {
            self.start_task(folder, TaskPayload::Load { compile_file });
        }
    }

    fn report_load_error(&self, project: &Path, error: &ProjectLoadError) {
        self.report(format!(
            "Could not load the project: {}. {error}",
            project.display()
        ));
    }

    async fn validate_compile_commands(
        &self,
        compile_file: &Path,
        project: &Path,
    ) -> Result<(), ProjectLoadError> {
        let root = self
            .find_project_root(compile_file)
            .await
            .ok_or_else(|| ProjectLoadError::RootNotFound(compile_file.to_path_buf()))?;
        if project.starts_with(&root) {
            Ok(())
        } else {
            Err(ProjectLoadError::OutsideRoot(compile_file.to_path_buf()))
        }
    }

    async fn find_project_root(&self, compile_file: &Path) -> Option<PathBuf> {
        let text = read_first_compile_command(compile_file).await?;
        let source = first_compile_file(&text)?;

        let mut root = None;
        for realpath in [false, true] {
            let args = protocol::find_project_root(&source, realpath);
            if let Some(output) = self.run(args, Vec::new()).await {
                root = protocol::parse_project_root(&output);
            }
            if root.is_some() {
                break;
            }
        }
        tokio::fs::canonicalize(root?).await.ok()
    }

    /// Cancel `project`'s tasks and unregister it.
    pub(crate) fn remove_project(&self, project: &Path) {
        let (cancelled, removed, multi_before, multi_after) = self.with_state(|s| {
            let multi_before = s.registry.multi_project();
            let cancelled = s.tasks.cancel_project(project);
            let removed = s.registry.remove(project);
            (cancelled, removed, multi_before, s.registry.multi_project())
        });
        tracing::info!(project = %project.display(), cancelled, removed, "Removing project");
        if removed {
            self.emit(CoordinatorEvent::ProjectRemoved {
                path: project.to_path_buf(),
            });
        }
        if multi_before != multi_after {
            self.emit(CoordinatorEvent::MultiProjectAvailable {
                available: multi_after,
            });
        }
    }

    pub(crate) fn register_project(&self, project: PathBuf) {
        let (added, multi_before, multi_after) = self.with_state(|s| {
            let multi_before = s.registry.multi_project();
            let added = s.registry.add(project.clone());
            (added, multi_before, s.registry.multi_project())
        });
        if !added {
            return;
        }
        tracing::info!(project = %project.display(), "Registered project");
        self.emit(CoordinatorEvent::ProjectRegistered { path: project });
        if multi_before != multi_after {
            self.emit(CoordinatorEvent::MultiProjectAvailable {
                available: multi_after,
            });
        }
    }

    /// Create a task and run it in the background.
    pub(crate) fn start_task(&self, project: PathBuf, payload: TaskPayload) -> JoinHandle<()> {
        let id = self.with_state(|s| s.tasks.create(project, payload));
        let this = self.clone();
        tokio::spawn(async move { this.execute_task(id).await })
    }

    async fn execute_task(&self, id: TaskId) {
        let Some((project, kind, (args, unsaved))) = self.with_state(|s| {
            let task = s.tasks.get(id)?;
            Some((task.project().to_path_buf(), task.kind(), task.initial_command()))
        }) else {
            return;
        };

        if kind == TaskKind::Reindex {
            self.resume_delayed(&project, None).await;
            self.wait_for_resumed(&project).await;
            if self.with_state(|s| s.tasks.get(id).is_none()) {
                tracing::debug!(task = id, "Task cancelled while waiting for resumes");
                return;
            }
        }
        if self.run(args, unsaved).await.is_none() {
            tracing::debug!(task = id, project = %project.display(), "Initial task command failed");
            self.with_state(|s| s.tasks.discard(id));
            return;
        }

        let this = self.clone();
        let target = project.clone();
        let poll = tokio::spawn(async move { this.poll_task(id, target).await });
        if self.with_state(|s| s.tasks.start_polling(id, poll)) {
            self.inform(format!(
                "{} project: {}",
                capitalized(kind.action()),
                project.display()
            ));
        } else {
            tracing::debug!(task = id, "Task cancelled before polling");
        }
    }

    /// Query the daemon until it reports `project` idle, then stop the task.
    async fn poll_task(&self, id: TaskId, project: PathBuf) {
        let mut interval = interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let args = protocol::is_indexing(&project, POLL_QUERY_TIMEOUT);
            let query = self.shared.gateway.invoke(args, Vec::new());
            // Anything but a clean answer means "not finished yet".
            match timeout(POLL_QUERY_TIMEOUT, query).await {
                Ok(Ok(output)) if protocol::indexing_finished(&output) => break,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(task = id, "Indexing query failed: {e}"),
                Err(_) => tracing::debug!(task = id, "Indexing query timed out"),
            }
        }
        self.task_stopped(id).await;
    }

    async fn task_stopped(&self, id: TaskId) {
        let Some((project, kind)) = self.with_state(|s| s.tasks.finish(id)) else {
            return;
        };
        self.inform(format!(
            "Finished {} project: {}",
            kind.action(),
            project.display()
        ));
        if kind == TaskKind::Load {
            self.register_project(project.clone());
            self.diagnose_project(&project, false).await;
        }
    }

    /// Ask the daemon to re-emit diagnostics for `project`: every file when
    /// `all` is set or diagnostics are not limited to open files, otherwise
    /// its open source files.
    pub(crate) async fn diagnose_project(&self, project: &Path, all: bool) {
        let (enabled, open_only, open_files) = self.with_state(|s| {
            (
                s.diagnostics_enabled,
                s.config.diagnostics.open_files_only,
                s.open_sources_in(project),
            )
        });
        if !enabled {
            return;
        }
        if all || !open_only {
            self.run(protocol::diagnose_all(project), Vec::new()).await;
        } else if !open_files.is_empty() {
            self.run(protocol::diagnose_files(&open_files), Vec::new())
                .await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_first_compile_file_resolves_relative_file() {
        let text = r#"[{"directory":"/repo/build","command":"cc -c ../src/a.c","file":"../src/a.c"}
]"#;
        assert_eq!(first_compile_file(text), Some(PathBuf::from("/repo/src/a.c")));
    }

    #[test]
    fn test_first_compile_file_requires_absolute_directory() {
        let text = r#"[{"directory":"build","file":"a.c"}]"#;
        assert_eq!(first_compile_file(text), None);
        assert_eq!(first_compile_file(r#"[{"file":"/a.c"}]"#), None);
        assert_eq!(first_compile_file("[]"), None);
    }

    #[tokio::test]
    async fn test_read_first_compile_command_stops_at_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compile_commands.json");
        std::fs::write(
            &path,
            r#"[
  {"directory": "/repo", "file": "/repo/a.c"},
  {"directory": "/repo", "file": "/repo/b.c"}
]"#,
        )
        .unwrap();

        let text = read_first_compile_command(&path).await.unwrap();
        assert!(text.ends_with("}\n]"));
        assert_eq!(first_compile_file(&text), Some(PathBuf::from("/repo/a.c")));
    }

    #[tokio::test]
    async fn test_read_first_compile_command_without_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compile_commands.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(read_first_compile_command(&path).await.is_none());
        assert!(read_first_compile_command(&dir.path().join("missing")).await.is_none());
    }

    #[test]
    fn test_capitalized() {
        assert_eq!(capitalized("loading"), "Loading");
        assert_eq!(capitalized(""), "");
    }
}
