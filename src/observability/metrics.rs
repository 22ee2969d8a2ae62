//! Pipeline metrics.
//!
//! Stages record through the `metrics` facade; the binary installs a Prometheus
//! recorder and can write a text snapshot at the end of a run. Without an
//! installed recorder every call is a no-op, which is what library users and
//! tests get.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fs;
use std::path::Path;

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    // Loader
    RowsLoaded,
    LoadDuration,

    // Deduplicator
    DedupExactDuplicatesRemoved,
    DedupNearDuplicatesMerged,
    DedupIdsRenamed,
    DedupCanonicalRecords,

    // Normalizer
    NormalizeMissingTokensReplaced,
    NormalizeColumnsCoerced,
    NormalizeRowsOutOfRange,
    NormalizeRowsIncomplete,

    // Geo joiner
    GeoRowsMatched,
    GeoRowsUnmatched,

    // Features and training
    FeatureColumns,
    TrainingValidationRmse,
    TrainingValidationMae,

    // Whole run
    PipelineRuns,
    PipelineDuration,
    RowsExported,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RowsLoaded => "rent_panel_rows_loaded_total",
            MetricName::LoadDuration => "rent_panel_load_duration_seconds",

            MetricName::DedupExactDuplicatesRemoved => "rent_panel_dedup_exact_duplicates_removed_total",
            MetricName::DedupNearDuplicatesMerged => "rent_panel_dedup_near_duplicates_merged_total",
            MetricName::DedupIdsRenamed => "rent_panel_dedup_ids_renamed_total",
            MetricName::DedupCanonicalRecords => "rent_panel_dedup_canonical_records",

            MetricName::NormalizeMissingTokensReplaced => "rent_panel_normalize_missing_tokens_replaced_total",
            MetricName::NormalizeColumnsCoerced => "rent_panel_normalize_columns_coerced",
            MetricName::NormalizeRowsOutOfRange => "rent_panel_normalize_rows_out_of_range_total",
            MetricName::NormalizeRowsIncomplete => "rent_panel_normalize_rows_incomplete_total",

            MetricName::GeoRowsMatched => "rent_panel_geo_rows_matched_total",
            MetricName::GeoRowsUnmatched => "rent_panel_geo_rows_unmatched_total",

            MetricName::FeatureColumns => "rent_panel_feature_columns",
            MetricName::TrainingValidationRmse => "rent_panel_training_validation_rmse",
            MetricName::TrainingValidationMae => "rent_panel_training_validation_mae",

            MetricName::PipelineRuns => "rent_panel_pipeline_runs_total",
            MetricName::PipelineDuration => "rent_panel_pipeline_duration_seconds",
            MetricName::RowsExported => "rent_panel_rows_exported_total",
        }
    }
}

/// Install the global Prometheus recorder
pub fn init() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    Ok(handle)
}

pub fn emit_counter(name: MetricName, value: u64) {
    ::metrics::counter!(name.as_str()).increment(value);
}

pub fn emit_counter_labeled(name: MetricName, label: &'static str, label_value: String, value: u64) {
    ::metrics::counter!(name.as_str(), label => label_value).increment(value);
}

pub fn emit_gauge(name: MetricName, value: f64) {
    ::metrics::gauge!(name.as_str()).set(value);
}

pub fn emit_histogram(name: MetricName, value: f64) {
    ::metrics::histogram!(name.as_str()).record(value);
}

/// Render the current metric values in the Prometheus text format and write them out
pub fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, handle.render())
}
