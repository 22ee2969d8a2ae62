use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::observability::{emit_counter, MetricName};
use crate::pipeline::processing::{DedupStats, JoinStats, NormalizeStats};
use crate::pipeline::training::TrainingOutcome;

/// Write `frame` as CSV with a header row. Nulls are empty cells.
#[instrument(skip(frame), fields(path = %path.display()))]
pub fn write_csv(frame: &DataFrame, path: &Path, delimiter: char) -> Result<()> {
    if !delimiter.is_ascii() {
        return Err(PipelineError::Config(format!(
            "delimiter '{}' must be a single ASCII character",
            delimiter
        )));
    }
    ensure_parent(path)?;
    let mut file = fs::File::create(path)?;
    let mut out = frame.clone();
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(delimiter as u8)
        .finish(&mut out)?;

    emit_counter(MetricName::RowsExported, frame.height() as u64);
    info!("💾 Wrote {} rows to {}", frame.height(), path.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Summary of one pipeline run, written next to the cleaned output
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_path: PathBuf,
    pub input_sha256: String,
    pub rows_loaded: usize,
    pub dedup: DedupStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeStats>,
    pub geo_joins: Vec<JoinStats>,
    pub rows_exported: usize,
    pub output_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingOutcome>,
}

impl RunReport {
    pub fn new(command: &str, input_path: &Path, input_sha256: String, rows_loaded: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            command: command.to_string(),
            started_at: now,
            finished_at: now,
            input_path: input_path.to_path_buf(),
            input_sha256,
            rows_loaded,
            dedup: DedupStats::default(),
            normalize: None,
            geo_joins: Vec::new(),
            rows_exported: 0,
            output_file: None,
            training: None,
        }
    }

    /// Stamp the finish time and write the report as pretty JSON
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        self.finished_at = Utc::now();
        ensure_parent(path)?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("📝 Run report {} written to {}", self.run_id, path.display());
        Ok(())
    }
}
