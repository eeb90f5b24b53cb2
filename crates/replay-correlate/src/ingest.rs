//! Trace directory ingestion

use crate::correlator::Correlator;
use crate::parser::read_trace_file;
use replay_core::config::IngestSettings;
use replay_core::events::RecordedInteraction;
use replay_core::store::{InteractionStore, SettingsStore, StoreError, LAST_LOADED_DIRECTORY_KEY};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ingestion errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// How existing rows of the target table are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestMode {
    /// Drop and recreate the table first
    #[default]
    Replace,
    /// Keep existing rows; duplicates are skipped
    Append,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub mode: IngestMode,

    /// Interactions buffered before a flush
    pub batch_size: usize,

    /// Only files whose name ends with this suffix are read
    pub file_suffix: String,
}

impl IngestOptions {
    pub fn from_settings(settings: &IngestSettings, mode: IngestMode) -> Self {
        Self {
            mode,
            batch_size: settings.batch_size.max(1),
            file_suffix: settings.file_suffix.clone(),
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_settings(&IngestSettings::default(), IngestMode::default())
    }
}

/// Summary of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_processed: usize,
    pub files_failed: usize,
    pub events_parsed: usize,
    pub documents_skipped: usize,
    pub interactions: usize,
    pub rows_inserted: usize,
}

/// Load every trace file of `dir` into `table`
pub fn ingest_directory(
    store: &dyn InteractionStore,
    settings: &dyn SettingsStore,
    dir: &Path,
    table: &str,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound(dir.to_path_buf()));
    }

    if options.mode == IngestMode::Replace {
        store.drop_table(table)?;
    }
    store.create_table(table)?;
    settings.set_setting(LAST_LOADED_DIRECTORY_KEY, &dir.to_string_lossy())?;

    let files = trace_files(dir, &options.file_suffix)?;
    info!(
        "Ingesting {} trace file(s) from {} into table '{}'",
        files.len(),
        dir.display(),
        table
    );

    let batch_size = options.batch_size.max(1);
    let mut report = IngestReport::default();
    let mut buffer: Vec<RecordedInteraction> = Vec::new();

    for path in &files {
        let trace = match read_trace_file(path) {
            Ok(trace) => trace,
            Err(e) => {
                warn!("Skipping trace file: {}", e);
                report.files_failed += 1;
                continue;
            }
        };

        report.files_processed += 1;
        report.events_parsed += trace.stats.events;
        report.documents_skipped += trace.stats.skipped;

        let mut correlator = Correlator::new();
        for event in trace.events {
            if let Some(interaction) = correlator.add_event(event) {
                buffer.push(interaction);
            }
        }
        let stats = correlator.finish();
        report.interactions += stats.interactions;
        debug!(
            "{}: {} interaction(s), {} dropped",
            path.display(),
            stats.interactions,
            stats.dropped
        );

        if buffer.len() >= batch_size {
            report.rows_inserted += store.append(table, &buffer)?;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        report.rows_inserted += store.append(table, &buffer)?;
    }

    info!(
        "Ingestion into '{}' finished: {} file(s), {} interaction(s), {} new row(s)",
        table, report.files_processed, report.interactions, report.rows_inserted
    );

    Ok(report)
}

/// Trace files of a directory in lexical order
fn trace_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, IngestError> {
    let io_err = |source: std::io::Error| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let selected = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix));
        if selected {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
