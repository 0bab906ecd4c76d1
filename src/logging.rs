//! Tracing setup for the `aethr` binary.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const DEFAULT_LOG_DIR: &str = "logs";

/// Debug log files written for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFiles {
    pub text: PathBuf,
    pub json: PathBuf,
}

impl LogFiles {
    /// `<dir>/<timestamp>-<id>.log` and the matching `.jsonl`.
    pub fn in_dir(dir: &Path) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let stem = format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), &id[..8]);
        Self {
            text: dir.join(format!("{stem}.log")),
            json: dir.join(format!("{stem}.jsonl")),
        }
    }
}

fn open_log_files(dir: &Path) -> io::Result<(LogFiles, File, File)> {
    fs::create_dir_all(dir)?;
    let files = LogFiles::in_dir(dir);
    let text = File::create(&files.text)?;
    let json = File::create(&files.json)?;
    Ok((files, text, json))
}

/// Installs the global subscriber: console output filtered by `RUST_LOG` (default `info`),
/// plus plain-text and JSON-lines debug logs under `log_dir`.
///
/// Falls back to console-only logging when the log files cannot be created.
pub fn init(log_dir: &Path) -> Option<LogFiles> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(console_filter);

    match open_log_files(log_dir) {
        Ok((files, text, json)) => {
            let text_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(text))
                .with_filter(LevelFilter::DEBUG);
            let json_layer = fmt::layer()
                .json()
                .with_writer(Mutex::new(json))
                .with_filter(LevelFilter::DEBUG);

            let installed = tracing_subscriber::registry()
                .with(console)
                .with(text_layer)
                .with(json_layer)
                .try_init()
                .is_ok();
            if !installed {
                return None;
            }
            info!("Debug log: {}", files.text.display());
            Some(files)
        }
        Err(err) => {
            let _ = tracing_subscriber::registry().with(console).try_init();
            tracing::warn!(
                dir = %log_dir.display(),
                error = %err,
                "debug log files unavailable, logging to console only"
            );
            None
        }
    }
}
