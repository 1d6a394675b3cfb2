//! Command gateway, the single primitive for talking to the daemon.
//!
//! Every daemon interaction is one short-lived client invocation, except the
//! diagnostics feed which is one long-lived client process streaming output.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use rtag_types::UnsavedFile;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

/// Client output above this size is treated as a failure.
const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{executable} not found in PATH")]
    NotFound { executable: String },
    #[error("command failed: {command}: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("{command} exited with status {}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Exit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("output of {command} exceeds {MAX_OUTPUT_BYTES} bytes")]
    OutputTooLarge { command: String },
    #[error("{command} has no output stream")]
    NoStream { command: String },
}

impl GatewayError {
    /// Text worth showing the user, or `None` when the client failed without
    /// saying anything meaningful (e.g. a query about an unindexed file).
    #[must_use]
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Exit { stdout, stderr, .. } => {
                let stderr = stderr.trim();
                let stdout = stdout.trim();
                if !stderr.is_empty() {
                    Some(format!("{self} (Client error: {stderr})"))
                } else if !stdout.is_empty() && stdout != "null" && stdout != "Not indexed" {
                    Some(format!("{self} (Client error: {stdout})"))
                } else {
                    None
                }
            }
            other => Some(other.to_string()),
        }
    }
}

/// Capability for invoking the daemon's command-line client.
pub trait CommandGateway: Send + Sync + 'static {
    /// Run the client with `args`, piping `unsaved` contents on stdin.
    ///
    /// Success returns stdout (possibly empty); a spawn failure or nonzero
    /// exit is an error.
    fn invoke(
        &self,
        args: Vec<String>,
        unsaved: Vec<UnsavedFile>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;

    /// Start a long-lived client process whose stdout is streamed.
    fn spawn_stream(&self, args: Vec<String>) -> Result<DaemonStream, GatewayError>;
}

/// Output of a long-lived client process.
pub struct DaemonStream {
    output: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
}

impl DaemonStream {
    /// Stream backed by an arbitrary reader; EOF is treated as process exit.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            output: Box::new(reader),
            child: None,
        }
    }

    fn from_child(output: impl AsyncRead + Send + Unpin + 'static, child: Child) -> Self {
        Self {
            output: Box::new(output),
            child: Some(child),
        }
    }

    pub(crate) async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.output.read(buf).await
    }

    pub(crate) async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut()
            && let Err(e) = child.kill().await
        {
            tracing::debug!("Failed to kill stream process: {e}");
        }
    }

    /// Wait for the process to exit after its output closed.
    pub(crate) async fn reap(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!("Failed to reap stream process: {e}");
                None
            }
        }
    }
}

/// Gateway backed by the real `rc` executable.
#[derive(Debug, Clone)]
pub struct RcGateway {
    executable: PathBuf,
}

impl RcGateway {
    /// Resolve `executable` (absolute path or name on the PATH).
    pub fn new(executable: &str) -> Result<Self, GatewayError> {
        let executable = which::which(executable).map_err(|_| GatewayError::NotFound {
            executable: executable.to_string(),
        })?;
        Ok(Self { executable })
    }

    fn describe(&self, args: &[String]) -> String {
        let mut command = self.executable.display().to_string();
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    async fn run(&self, args: Vec<String>, unsaved: Vec<UnsavedFile>) -> Result<String, GatewayError> {
        let mut full_args = args;
        for file in &unsaved {
            full_args.push("--unsaved-file".to_string());
            full_args.push(file.daemon_argument());
        }
        let command = self.describe(&full_args);
        tracing::trace!(%command, "Invoking client");

        let stdin = if unsaved.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        };
        let mut child = Command::new(&self.executable)
            .args(&full_args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GatewayError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Feed stdin concurrently with draining stdout so a chatty client
        // cannot deadlock against a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                for file in unsaved {
                    stdin.write_all(file.content.as_bytes()).await?;
                }
                stdin.shutdown().await
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| GatewayError::Spawn {
                command: command.clone(),
                source,
            })?;

        if let Some(writer) = writer
            && let Ok(Err(e)) = writer.await
        {
            tracing::debug!(%command, "Failed to write unsaved files: {e}");
        }

        if output.stdout.len() > MAX_OUTPUT_BYTES {
            return Err(GatewayError::OutputTooLarge { command });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(GatewayError::Exit {
                command,
                code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}

impl CommandGateway for RcGateway {
    fn invoke(
        &self,
        args: Vec<String>,
        unsaved: Vec<UnsavedFile>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send {
        self.run(args, unsaved)
    }

    fn spawn_stream(&self, args: Vec<String>) -> Result<DaemonStream, GatewayError> {
        let command = self.describe(&args);
        let mut child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GatewayError::Spawn {
                command: command.clone(),
                source,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(GatewayError::NoStream { command })?;
        Ok(DaemonStream::from_child(stdout, child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_error(stdout: &str, stderr: &str) -> GatewayError {
        GatewayError::Exit {
            command: "rc --diagnose /a.cpp".to_string(),
            code: Some(1),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_user_message_prefers_stderr() {
        let msg = exit_error("out", "bad project\n").user_message().unwrap();
        assert!(msg.contains("Client error: bad project"), "{msg}");
    }

    #[test]
    fn test_user_message_uses_stdout_without_stderr() {
        let msg = exit_error("Can't seem to connect to server", "")
            .user_message()
            .unwrap();
        assert!(msg.contains("Can't seem to connect to server"), "{msg}");
    }

    #[test]
    fn test_user_message_silent_for_uninformative_output() {
        assert!(exit_error("", "").user_message().is_none());
        assert!(exit_error("null\n", "").user_message().is_none());
        assert!(exit_error("Not indexed", "  ").user_message().is_none());
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let err = GatewayError::Spawn {
            command: "rc --project".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.user_message().unwrap().starts_with("command failed: rc --project"));
    }

    #[test]
    fn test_exit_status_display() {
        let err = GatewayError::Exit {
            command: "rc".to_string(),
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "rc exited with status signal");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rc_gateway_pipes_unsaved_files() {
        // `cat` ignores the arguments it cannot open only if they are flags;
        // use `sh -c` to echo stdin back and prove contents are piped in order.
        let Ok(gateway) = RcGateway::new("sh") else {
            return;
        };
        let out = gateway
            .run(
                vec!["-c".to_string(), "cat".to_string()],
                vec![
                    UnsavedFile::new("/repo/a.cpp", "int a;"),
                    UnsavedFile::new("/repo/b.cpp", "int b;"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(out, "int a;int b;");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rc_gateway_reports_nonzero_exit() {
        let Ok(gateway) = RcGateway::new("sh") else {
            return;
        };
        let err = gateway
            .run(
                vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()],
                Vec::new(),
            )
            .await
            .unwrap_err();
        match err {
            GatewayError::Exit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_daemon_stream_from_reader_reads_until_eof() {
        let mut stream = DaemonStream::from_reader(&b"{}\n"[..]);
        let mut buf = [0u8; 16];
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), 3);
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), 0);
        assert!(stream.reap().await.is_none());
    }
}
