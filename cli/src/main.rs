//! rtag - editor bridge for the rtags project index coordinator.
//!
//! An editor spawns `rtag` and talks to it over stdio:
//!
//! ```text
//! editor --(JSON lines on stdin)--> bridge -> Coordinator -> rc / rdm
//! editor <-(JSON lines on stdout)-- bridge <- CoordinatorEvent
//! ```
//!
//! stdout carries only the protocol; logs go to a file.

mod bridge;

use std::fs::{self, OpenOptions};
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use rtag_config::RtagConfig;
use rtag_coordinator::{Coordinator, RcGateway, ReloadSet};
use rtag_types::CoordinatorEvent;

fn init_tracing(state_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file(state_dir);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than corrupt the protocol on stdout.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file(state_dir: &Path) -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates(state_dir) {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates(state_dir: &Path) -> Vec<PathBuf> {
    vec![
        state_dir.join("logs").join("rtag.log"),
        // Useful when the state directory is not writable.
        PathBuf::from(".rtag").join("logs").join("rtag.log"),
    ]
}

/// Tell the editor why we are exiting before any coordinator exists.
fn report_fatal(text: &str) {
    let event = CoordinatorEvent::error(text);
    if let Ok(line) = serde_json::to_string(&event) {
        let mut out = stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_error) = match RtagConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (RtagConfig::default(), Some(e)),
    };
    let state_dir = config.state_dir();
    init_tracing(&state_dir);
    if let Some(e) = config_error {
        tracing::warn!("Using the default configuration: {e}");
    }

    let gateway = match RcGateway::new(&config.rc.executable) {
        Ok(gateway) => gateway,
        Err(e) => {
            report_fatal(&e.to_string());
            return Err(e).context("cannot start without the rc client");
        }
    };

    let reload = ReloadSet::load(&state_dir);
    let (coordinator, events) = Coordinator::new(config, gateway, reload);

    let result = bridge::run(
        coordinator,
        events,
        tokio::io::stdin(),
        tokio::io::stdout(),
        RtagConfig::load,
    )
    .await;
    if let Err(e) = &result {
        tracing::error!("Bridge stopped: {e:#}");
    }
    tracing::info!("Exiting");
    result
}
