//! Bookkeeping for in-flight project load and reindex tasks.
//!
//! A task is created in the `Executing` phase while its initial command runs,
//! moves to `Polling` once that command succeeds, and leaves the map when
//! indexing finishes or the project is removed. The map only stores state;
//! the coordinator drives the commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rtag_types::UnsavedFile;
use tokio::task::JoinHandle;

use crate::protocol;
use crate::timers::AbortOnDrop;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Load,
    Reindex,
}

impl TaskKind {
    pub fn action(self) -> &'static str {
        match self {
            Self::Load => "loading",
            Self::Reindex => "reindexing",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum TaskPayload {
    Load { compile_file: PathBuf },
    Reindex { unsaved: Vec<UnsavedFile> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskPhase {
    Executing,
    Polling,
}

#[derive(Debug)]
pub(crate) struct ProjectTask {
    project: PathBuf,
    payload: TaskPayload,
    phase: TaskPhase,
    poll: Option<AbortOnDrop>,
}

impl ProjectTask {
    pub fn kind(&self) -> TaskKind {
        match self.payload {
            TaskPayload::Load { .. } => TaskKind::Load,
            TaskPayload::Reindex { .. } => TaskKind::Reindex,
        }
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    /// The command issued in the `Executing` phase.
    pub fn initial_command(&self) -> (Vec<String>, Vec<UnsavedFile>) {
        match &self.payload {
            TaskPayload::Load { compile_file } => {
                (protocol::load_compile_commands(compile_file), Vec::new())
            }
            TaskPayload::Reindex { unsaved } => {
                (protocol::reindex_project(&self.project), unsaved.clone())
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct TaskManager {
    tasks: HashMap<TaskId, ProjectTask>,
    next_id: TaskId,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id = if id == TaskId::MAX { 0 } else { id + 1 };
        id
    }

    pub fn create(&mut self, project: PathBuf, payload: TaskPayload) -> TaskId {
        let id = self.allocate_id();
        self.tasks.insert(
            id,
            ProjectTask {
                project,
                payload,
                phase: TaskPhase::Executing,
                poll: None,
            },
        );
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&ProjectTask> {
        self.tasks.get(&id)
    }

    /// Enter the `Polling` phase with `poll` as the periodic query task.
    ///
    /// Returns `false` (aborting `poll`) if the task was cancelled while its
    /// initial command ran.
    pub fn start_polling(&mut self, id: TaskId, poll: JoinHandle<()>) -> bool {
        let poll = AbortOnDrop::new(poll);
        match self.tasks.get_mut(&id) {
            Some(task) if task.phase == TaskPhase::Executing => {
                task.phase = TaskPhase::Polling;
                task.poll = Some(poll);
                true
            }
            _ => false,
        }
    }

    /// Remove a finished task. Called from the task's own poll loop, so the
    /// poll handle is released rather than aborted.
    pub fn finish(&mut self, id: TaskId) -> Option<(PathBuf, TaskKind)> {
        let mut task = self.tasks.remove(&id)?;
        if let Some(poll) = task.poll.take() {
            poll.release();
        }
        let kind = task.kind();
        Some((task.project, kind))
    }

    /// Drop a task whose initial command failed.
    pub fn discard(&mut self, id: TaskId) {
        self.tasks.remove(&id);
    }

    /// Cancel every task for `project` in any phase. Returns how many.
    pub fn cancel_project(&mut self, project: &Path) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| task.project != project);
        before - self.tasks.len()
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    /// Whether a task of `kind` already targets `project`.
    pub fn is_running(&self, project: &Path, kind: TaskKind) -> bool {
        self.tasks
            .values()
            .any(|task| task.project == project && task.kind() == kind)
    }

    /// Targets of Load tasks that are polling for completion.
    pub fn loading_projects(&self) -> impl Iterator<Item = &Path> {
        self.tasks
            .values()
            .filter(|task| task.phase == TaskPhase::Polling && task.kind() == TaskKind::Load)
            .map(|task| task.project.as_path())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
