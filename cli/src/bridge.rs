//! Newline-delimited JSON bridge between an editor and the coordinator.
//!
//! Each stdin line is one [`Request`]. Coordinator events and request
//! replies are written to stdout, one JSON object per line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use rtag_config::{ConfigError, RtagConfig};
use rtag_coordinator::{CommandGateway, Coordinator};
use rtag_types::CoordinatorEvent;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Start {
        #[serde(default)]
        folders: Vec<PathBuf>,
    },
    FoldersChanged {
        #[serde(default)]
        added: Vec<PathBuf>,
        #[serde(default)]
        removed: Vec<PathBuf>,
    },
    Opened {
        path: PathBuf,
        text: String,
    },
    Changed {
        path: PathBuf,
        text: String,
    },
    WillSave {
        path: PathBuf,
    },
    Saved {
        path: PathBuf,
    },
    Closed {
        path: PathBuf,
    },
    ReindexActive {
        path: PathBuf,
    },
    ReindexWorkspace,
    ReindexFile {
        path: PathBuf,
    },
    RequestDiagnostics {
        paths: Vec<PathBuf>,
    },
    /// Every file in the project rooted at `path`, open or not.
    RequestProjectDiagnostics {
        path: PathBuf,
    },
    ReloadConfig,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// The editor may write the file now.
    WillSaveDone { path: PathBuf },
}

/// Serve requests from `input` until EOF or a `shutdown` request.
pub async fn run<G, R, W>(
    coordinator: Coordinator<G>,
    events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    input: R,
    output: W,
    load_config: impl Fn() -> Result<RtagConfig, ConfigError>,
) -> Result<()>
where
    G: CommandGateway,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (replies, reply_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(output, events, reply_rx));

    let mut lines = BufReader::new(input).lines();
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Editor closed the connection");
                break Ok(());
            }
            Err(e) => break Err(e).context("failed to read a request"),
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Skipping malformed request: {e}");
                continue;
            }
        };
        tracing::debug!(?request, "Request");
        if request == Request::Shutdown {
            break Ok(());
        }
        dispatch(&coordinator, request, &replies, &load_config);
    };

    coordinator.shutdown();
    drop(replies);
    writer.await.context("output task panicked")??;
    read_result
}

fn dispatch<G: CommandGateway>(
    coordinator: &Coordinator<G>,
    request: Request,
    replies: &mpsc::UnboundedSender<Reply>,
    load_config: &impl Fn() -> Result<RtagConfig, ConfigError>,
) {
    match request {
        Request::Start { folders } => {
            coordinator.start(folders);
        }
        Request::FoldersChanged { added, removed } => {
            coordinator.folders_changed(added, removed);
        }
        Request::Opened { path, text } => {
            coordinator.document_opened(path, text);
        }
        Request::Changed { path, text } => coordinator.document_changed(path, text),
        Request::WillSave { path } => {
            let suspended = coordinator.will_save(path.clone());
            let replies = replies.clone();
            tokio::spawn(async move {
                if let Err(e) = suspended.await {
                    tracing::warn!("Will-save handling failed: {e}");
                }
                let _ = replies.send(Reply::WillSaveDone { path });
            });
        }
        Request::Saved { path } => {
            coordinator.did_save(path);
        }
        Request::Closed { path } => coordinator.document_closed(&path),
        Request::ReindexActive { path } => {
            if coordinator.reindex_active_project(&path).is_none() {
                tracing::info!(path = %path.display(), "No project to reindex");
            }
        }
        Request::ReindexWorkspace => {
            coordinator.reindex_workspace();
        }
        Request::ReindexFile { path } => {
            coordinator.reindex_file(path);
        }
        Request::RequestDiagnostics { paths } => {
            coordinator.request_diagnostics(paths);
        }
        Request::RequestProjectDiagnostics { path } => {
            coordinator.request_project_diagnostics(path);
        }
        Request::ReloadConfig => match load_config() {
            Ok(config) => coordinator.configuration_changed(config),
            Err(e) => tracing::warn!("Keeping the current configuration: {e}"),
        },
        // Handled by the read loop.
        Request::Shutdown => {}
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, value: &impl Serialize) -> Result<()> {
    let mut line = serde_json::to_vec(value).context("failed to encode output")?;
    line.push(b'\n');
    output.write_all(&line).await.context("failed to write output")?;
    output.flush().await.context("failed to flush output")?;
    Ok(())
}

/// Write events and replies until every reply sender is gone, then flush
/// events already queued.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut output: W,
    mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    mut replies: mpsc::UnboundedReceiver<Reply>,
) -> Result<()> {
    loop {
        tokio::select! {
            Some(event) = events.recv() => write_line(&mut output, &event).await?,
            reply = replies.recv() => match reply {
                Some(reply) => write_line(&mut output, &reply).await?,
                None => break,
            },
        }
    }
    while let Ok(event) = events.try_recv() {
        write_line(&mut output, &event).await?;
    }
    output.shutdown().await.context("failed to close output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rtag_coordinator::{DaemonStream, GatewayError, ReloadSet};
    use rtag_types::UnsavedFile;
    use tokio::io::AsyncReadExt;

    use super::*;

    /// A daemon that accepts everything and says nothing.
    struct QuietGateway;

    impl CommandGateway for QuietGateway {
        async fn invoke(
            &self,
            _args: Vec<String>,
            _unsaved: Vec<UnsavedFile>,
        ) -> Result<String, GatewayError> {
            Ok(String::new())
        }

        fn spawn_stream(&self, args: Vec<String>) -> Result<DaemonStream, GatewayError> {
            Err(GatewayError::NoStream {
                command: args.join(" "),
            })
        }
    }

    /// Records the arguments of every invocation.
    #[derive(Clone, Default)]
    struct RecordingGateway {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl CommandGateway for RecordingGateway {
        async fn invoke(
            &self,
            args: Vec<String>,
            _unsaved: Vec<UnsavedFile>,
        ) -> Result<String, GatewayError> {
            self.calls.lock().unwrap().push(args);
            Ok(String::new())
        }

        fn spawn_stream(&self, args: Vec<String>) -> Result<DaemonStream, GatewayError> {
            Err(GatewayError::NoStream {
                command: args.join(" "),
            })
        }
    }

    async fn serve(input: &str) -> Vec<serde_json::Value> {
        let (coordinator, events) =
            Coordinator::new(RtagConfig::default(), QuietGateway, ReloadSet::in_memory());
        let (output, mut reader) = tokio::io::duplex(64 * 1024);
        run(coordinator, events, input.as_bytes(), output, || {
            Ok(RtagConfig::default())
        })
        .await
        .unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_requests_decode_by_type_tag() {
        let request: Request =
            serde_json::from_str(r#"{"type":"will_save","path":"/repo/a.cpp"}"#).unwrap();
        assert_eq!(
            request,
            Request::WillSave {
                path: PathBuf::from("/repo/a.cpp")
            }
        );

        let request: Request =
            serde_json::from_str(r#"{"type":"folders_changed","added":["/repo"]}"#).unwrap();
        assert_eq!(
            request,
            Request::FoldersChanged {
                added: vec![PathBuf::from("/repo")],
                removed: Vec::new(),
            }
        );

        let request: Request = serde_json::from_str(r#"{"type":"reindex_workspace"}"#).unwrap();
        assert_eq!(request, Request::ReindexWorkspace);
        assert!(serde_json::from_str::<Request>(r#"{"type":"unknown"}"#).is_err());
    }

    #[tokio::test]
    async fn test_project_diagnostics_request_reaches_the_daemon() {
        let request: Request =
            serde_json::from_str(r#"{"type":"request_project_diagnostics","path":"/repo"}"#)
                .unwrap();
        assert_eq!(
            request,
            Request::RequestProjectDiagnostics {
                path: PathBuf::from("/repo")
            }
        );

        let gateway = RecordingGateway::default();
        let (coordinator, _events) =
            Coordinator::new(RtagConfig::default(), gateway.clone(), ReloadSet::in_memory());
        let (replies, _reply_rx) = mpsc::unbounded_channel();
        dispatch(&coordinator, request, &replies, &|| Ok(RtagConfig::default()));

        for _ in 0..10 {
            if !gateway.calls.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let calls = gateway.calls.lock().unwrap().clone();
        assert_eq!(calls, [["--project", "/repo/", "--diagnose-all"]]);
    }

    #[test]
    fn test_reply_encoding() {
        let reply = Reply::WillSaveDone {
            path: PathBuf::from("/repo/a.cpp"),
        };
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"type":"will_save_done","path":"/repo/a.cpp"}"#
        );
    }

    #[tokio::test]
    async fn test_will_save_is_acknowledged_and_bad_lines_skipped() {
        let request = serde_json::json!({"type": "will_save", "path": "/repo/a.cpp"});
        let input = format!("not json\n\n{request}\n");

        let output = serve(&input).await;
        assert_eq!(
            output,
            [serde_json::json!({"type": "will_save_done", "path": "/repo/a.cpp"})]
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_reading() {
        let input = concat!(
            r#"{"type":"shutdown"}"#,
            "\n",
            r#"{"type":"will_save","path":"/repo/b.cpp"}"#,
            "\n",
        );

        let output = serve(input).await;
        assert!(output.is_empty(), "{output:?}");
    }
}
