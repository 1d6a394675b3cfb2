//! Project index coordinator for the rtags indexing daemon.
//!
//! Tracks which editor files belong to which project, drives project loads
//! and reindexes as polled background tasks, debounces edits, suspends the
//! daemon's file watch around saves and republishes the daemon's streamed
//! diagnostics.

pub mod codec;
pub mod protocol;

pub(crate) mod diagnostics;
pub(crate) mod documents;
pub(crate) mod registry;
pub(crate) mod tasks;
pub(crate) mod timers;

mod daemon;
mod edits;
mod gateway;
mod manager;
mod projects;
mod reload;
mod stream;


pub use codec::{ObjectScanner, Segment};
pub use daemon::{DaemonError, MINIMUM_VERSION, RECOMMENDED_VERSION, Version, daemon_arguments};
pub use diagnostics::{DecodeError, FileDiagnostics, decode_unit};
pub use gateway::{CommandGateway, DaemonStream, GatewayError, RcGateway};
pub use manager::{
    Coordinator, DELAYED_REINDEX, POLL_INTERVAL, POLL_QUERY_TIMEOUT, REINDEX_DEBOUNCE,
    RESTART_BACKOFF, RESUME_DELAY, SUSPEND_TIMEOUT,
};
pub use projects::ProjectLoadError;
pub use reload::{RELOAD_FILE_NAME, ReloadSet};
pub use tasks::{TaskId, TaskKind};
