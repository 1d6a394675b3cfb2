//! Daemon bootstrap: version check, connection test and auto-launch.

use std::fmt;
use std::num::NonZeroUsize;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use rtag_config::ConfigError;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::sleep;

use crate::gateway::{CommandGateway, GatewayError};
use crate::manager::{Coordinator, RESTART_BACKOFF};
use crate::protocol;
use crate::timers::AbortOnDrop;

/// Oldest daemon release the coordinator can drive.
pub const MINIMUM_VERSION: Version = Version::new(2, 18);
/// Releases older than this work with known problems.
pub const RECOMMENDED_VERSION: Version = Version::new(2, 21);

const CONNECT_STEP: Duration = Duration::from_secs(1);
const CONNECT_ATTEMPTS: u32 = 30;

static JOB_COUNT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(-j=?(\d+)?|--job-count(=(\d+)?)?)$").ok());

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Could not run the client: {0}")]
    Client(GatewayError),
    #[error("Could not determine the daemon version from {0:?}")]
    UnknownVersion(String),
    #[error("Daemon version {found} is too old; version {MINIMUM_VERSION} or later is required")]
    TooOld { found: Version },
    #[error(
        "The server is not running and auto-launch is disabled. Launch the server manually or enable daemon.auto_launch"
    )]
    AutoLaunchDisabled,
    #[error("Could not launch the server {executable}: {source}")]
    Launch {
        executable: String,
        source: std::io::Error,
    },
    #[error("The server exited during startup ({0})")]
    Exited(ExitStatus),
    #[error("Could not start the server. Check the daemon.executable and daemon.arguments settings")]
    NotConnected,
}

/// Daemon release as `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `--version` output. The last dot-separated component is the
    /// database format version and is not part of the release number.
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        let text = output.trim();
        let (release, _database) = text.rsplit_once('.')?;
        let mut parts = release.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(minor) => minor.parse().ok()?,
            None => 0,
        };
        Some(Self::new(major, minor))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn is_job_count_arg(arg: &str) -> bool {
    JOB_COUNT_RE.as_ref().is_some_and(|re| re.is_match(arg))
}

/// Daemon arguments with a default job count of half the CPUs unless one
/// was configured.
#[must_use]
pub fn daemon_arguments(configured: &[String], cpus: usize) -> Vec<String> {
    let mut args = configured.to_vec();
    if !configured.iter().any(|arg| is_job_count_arg(arg)) {
        args.push("--job-count".to_string());
        args.push((cpus / 2).max(1).to_string());
    }
    args
}

impl<G: CommandGateway> Coordinator<G> {
    /// Check the client and make sure a daemon is reachable.
    pub(crate) async fn initialize_daemon(&self) -> Result<(), DaemonError> {
        self.with_state(|s| s.config.validate_rc_executable())?;

        let output = self
            .shared
            .gateway
            .invoke(protocol::version(), Vec::new())
            .await
            .map_err(DaemonError::Client)?;
        let version = Version::parse(&output)
            .ok_or_else(|| DaemonError::UnknownVersion(output.trim().to_string()))?;
        tracing::info!(%version, "Daemon client version");
        if version < MINIMUM_VERSION {
            return Err(DaemonError::TooOld { found: version });
        }
        if version < RECOMMENDED_VERSION {
            self.inform(format!(
                "A newer version of RTags is recommended. Installed version: {version}. Recommended version: {RECOMMENDED_VERSION} or later."
            ));
        }

        self.ensure_daemon().await
    }

    async fn is_connected(&self) -> bool {
        self.shared
            .gateway
            .invoke(protocol::current_project(), Vec::new())
            .await
            .is_ok()
    }

    async fn ensure_daemon(&self) -> Result<(), DaemonError> {
        if self.is_connected().await {
            tracing::info!("Connected to a running daemon");
            return Ok(());
        }
        if !self.with_state(|s| s.config.daemon.auto_launch) {
            return Err(DaemonError::AutoLaunchDisabled);
        }
        let child = self.launch_daemon().await?;
        self.inform("Started the server successfully.");
        self.supervise(child);
        Ok(())
    }

    /// Launch the daemon detached and wait for the client to reach it.
    async fn launch_daemon(&self) -> Result<Child, DaemonError> {
        let (executable, configured) = self.with_state(|s| {
            s.config.validate_daemon_executable().map(|()| {
                (
                    s.config.daemon.executable.clone(),
                    s.config.daemon.arguments.clone(),
                )
            })
        })?;
        let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let args = daemon_arguments(&configured, cpus);
        tracing::info!(executable, ?args, "Launching daemon");

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Outlives the coordinator.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|source| DaemonError::Launch { executable, source })?;

        for _ in 0..CONNECT_ATTEMPTS {
            if self.is_connected().await {
                return Ok(child);
            }
            if let Ok(Some(status)) = child.try_wait() {
                return Err(DaemonError::Exited(status));
            }
            sleep(CONNECT_STEP).await;
        }
        if self.is_connected().await {
            Ok(child)
        } else {
            Err(DaemonError::NotConnected)
        }
    }

    /// Relaunch the daemon whenever the process we started exits.
    fn supervise(&self, child: Child) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut child = child;
            loop {
                match child.wait().await {
                    Ok(status) => tracing::warn!(%status, "Daemon exited"),
                    Err(e) => tracing::warn!("Failed to wait for the daemon: {e}"),
                }
                this.report("The server stopped running. Restarting it.");
                sleep(RESTART_BACKOFF).await;

                if this.is_connected().await {
                    tracing::info!("A daemon is already running; no longer supervising");
                    return;
                }
                match this.launch_daemon().await {
                    Ok(next) => {
                        this.inform("Started the server successfully.");
                        child = next;
                    }
                    Err(e) => {
                        this.report(e.to_string());
                        return;
                    }
                }
            }
        });
        self.with_state(|s| s.daemon_supervisor = Some(AbortOnDrop::new(handle)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_drops_database_component() {
        assert_eq!(Version::parse("2.38.130\n"), Some(Version::new(2, 38)));
        assert_eq!(Version::parse("2.18.1"), Some(Version::new(2, 18)));
        assert_eq!(Version::parse("3.5"), Some(Version::new(3, 0)));
        assert_eq!(Version::parse("2"), None);
        assert_eq!(Version::parse("unknown.1"), None);
    }

    #[test]
    fn test_versions_compare_numerically() {
        assert!(Version::new(2, 9) < MINIMUM_VERSION);
        assert!(Version::new(2, 100) > RECOMMENDED_VERSION);
        assert!(Version::new(3, 0) > Version::new(2, 40));
        assert_eq!(Version::new(2, 21).to_string(), "2.21");
    }

    #[test]
    fn test_job_count_added_when_missing() {
        let args = daemon_arguments(&["--verbose".to_string()], 8);
        assert_eq!(args, ["--verbose", "--job-count", "4"]);
        assert_eq!(daemon_arguments(&[], 1), ["--job-count", "1"]);
    }

    #[test]
    fn test_configured_job_count_is_kept() {
        for configured in ["-j", "-j4", "-j=4", "--job-count", "--job-count=2"] {
            let args = daemon_arguments(&[configured.to_string()], 8);
            assert_eq!(args, [configured], "{configured}");
        }
        // A job count value on its own is not a flag.
        assert!(!is_job_count_arg("4"));
        assert!(!is_job_count_arg("--job-counts"));
    }
}
