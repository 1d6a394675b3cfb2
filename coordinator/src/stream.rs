//! Diagnostics stream processor.
//!
//! One long-lived client process streams diagnostics units. Its output is
//! cut into objects by [`ObjectScanner`], decoded and published per file. The
//! process is restarted after [`RESTART_BACKOFF`] whenever it exits while
//! diagnostics are enabled.

use std::path::PathBuf;

use rtag_types::{CoordinatorEvent, Diagnostic};
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::codec::{ObjectScanner, Segment};
use crate::diagnostics::decode_unit;
use crate::gateway::{CommandGateway, DaemonStream};
use crate::manager::{Coordinator, RESTART_BACKOFF, State};
use crate::protocol;

const READ_CHUNK_BYTES: usize = 64 * 1024;
/// Longest excerpt of unparseable output shown to the user.
const MAX_REPORTED_CHARS: usize = 200;

/// Handle to the running stream loop.
pub(crate) struct StreamControl {
    generation: u64,
    stop: oneshot::Sender<()>,
}

fn is_current(state: &State, generation: u64) -> bool {
    state
        .stream
        .as_ref()
        .is_some_and(|control| control.generation == generation)
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(MAX_REPORTED_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

impl<G: CommandGateway> Coordinator<G> {
    /// Start the stream loop unless it is running, diagnostics are off or
    /// the daemon is not up yet.
    pub(crate) fn start_diagnostics(&self) {
        let started = self.with_state(|s| {
            if !s.diagnostics_enabled || !s.initialized || s.stream.is_some() {
                return None;
            }
            s.stream_generation += 1;
            let (stop, stopped) = oneshot::channel();
            s.stream = Some(StreamControl {
                generation: s.stream_generation,
                stop,
            });
            Some((s.stream_generation, stopped))
        });
        let Some((generation, stopped)) = started else {
            return;
        };
        tracing::info!(generation, "Starting diagnostics stream");
        let this = self.clone();
        tokio::spawn(async move { this.run_stream(generation, stopped).await });
    }

    /// Disable diagnostics: stop the stream and withdraw everything published.
    pub(crate) fn stop_diagnostics(&self) {
        let (control, had_diagnostics) = self.with_state(|s| {
            s.diagnostics_enabled = false;
            (s.stream.take(), s.diagnostics.clear())
        });
        if let Some(control) = control {
            tracing::info!(generation = control.generation, "Stopping diagnostics stream");
            // Already gone if the loop gave up on its own.
            let _ = control.stop.send(());
        }
        if had_diagnostics {
            self.emit(CoordinatorEvent::DiagnosticsCleared);
        }
    }

    async fn run_stream(&self, generation: u64, mut stopped: oneshot::Receiver<()>) {
        loop {
            let mut stream = match self
                .shared
                .gateway
                .spawn_stream(protocol::diagnostics_stream())
            {
                Ok(stream) => stream,
                Err(e) => {
                    self.report(format!("Could not start the diagnostics process: {e}"));
                    // Off until the configuration enables it again.
                    self.with_state(|s| {
                        if is_current(s, generation) {
                            s.stream = None;
                            s.diagnostics_enabled = false;
                        }
                    });
                    return;
                }
            };

            let was_stopped = self.pump(generation, &mut stream, &mut stopped).await;
            if was_stopped {
                stream.kill().await;
            }
            if let Some(status) = stream.reap().await {
                tracing::debug!(%status, "Diagnostics process exited");
            }
            if was_stopped || !self.with_state(|s| is_current(s, generation)) {
                return;
            }

            self.report("The diagnostics process stopped running. Restarting it.");
            tokio::select! {
                () = sleep(RESTART_BACKOFF) => {}
                _ = &mut stopped => return,
            }
            if !self.with_state(|s| is_current(s, generation)) {
                return;
            }
        }
    }

    /// Feed the process output through the scanner until it closes (`false`)
    /// or the loop is told to stop (`true`).
    async fn pump(
        &self,
        generation: u64,
        stream: &mut DaemonStream,
        stopped: &mut oneshot::Receiver<()>,
    ) -> bool {
        let mut scanner = ObjectScanner::new();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            tokio::select! {
                _ = &mut *stopped => return true,
                read = stream.read_chunk(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        scanner.push(&buf[..n]);
                        while let Some(segment) = scanner.next_segment() {
                            self.handle_segment(generation, segment);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read diagnostics output: {e}");
                        break;
                    }
                },
            }
        }
        scanner.clear();
        false
    }

    fn handle_segment(&self, generation: u64, segment: Segment) {
        match segment {
            Segment::Malformed(text) => {
                self.report(format!("Diagnostics parse error: {}", excerpt(&text)));
            }
            Segment::Object(bytes) => match decode_unit(&bytes) {
                Ok(files) => {
                    for (path, items) in files {
                        self.publish(generation, path, items);
                    }
                }
                Err(e) => {
                    let text = String::from_utf8_lossy(&bytes);
                    tracing::debug!("{e}");
                    self.report(format!("Diagnostics parse error: {}", excerpt(&text)));
                }
            },
        }
    }

    fn publish(&self, generation: u64, path: PathBuf, items: Vec<Diagnostic>) {
        self.with_state(|s| {
            if !is_current(s, generation) || !s.is_known_file(&path) {
                return;
            }
            if s.config.diagnostics.open_files_only
                && !(s.documents.is_open(&path) && s.config.is_source_file(&path))
            {
                return;
            }
            tracing::trace!(path = %path.display(), count = items.len(), "Publishing diagnostics");
            s.diagnostics.replace(path.clone(), items.clone());
            self.emit(CoordinatorEvent::Diagnostics { path, items });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_long_text() {
        assert_eq!(excerpt("short"), "short");
        let long = "x".repeat(MAX_REPORTED_CHARS + 10);
        let cut = excerpt(&long);
        assert_eq!(cut.len(), MAX_REPORTED_CHARS + 3);
        assert!(cut.ends_with("..."));
    }
}
