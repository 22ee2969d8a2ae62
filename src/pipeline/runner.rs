use polars::prelude::*;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::Result;
use crate::observability::metrics::emit_counter_labeled;
use crate::observability::{emit_histogram, MetricName};
use crate::pipeline::export::{write_csv, RunReport};
use crate::pipeline::ingestion::{load_csv, ColumnSelector};
use crate::pipeline::processing::{DedupStats, Deduplicator, FeatureBuilder, GeoJoiner, Normalizer};
use crate::pipeline::training;

/// Output of the cleaning stages before anything is written
#[derive(Debug)]
pub struct CleanRun {
    pub frame: DataFrame,
    /// Raw input rows behind each canonical record, in deduplicated order
    pub lineage: Vec<Vec<usize>>,
    pub report: RunReport,
}

/// Drives the stages in order for one configuration
pub struct Pipeline<'a> {
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Load, select, deduplicate, normalize and geo-join the input
    #[instrument(skip(self), fields(input = %self.config.input.path.display()))]
    pub fn clean(&self, command: &str) -> Result<CleanRun> {
        let config = self.config;

        let loaded = load_csv(&config.input.path, config.input.delimiter)?;
        let mut report = RunReport::new(command, &config.input.path, loaded.sha256, loaded.frame.height());

        let selected = ColumnSelector::new(config).select(loaded.frame)?;

        info!("🔁 Reconciling repeated unit records...");
        let deduped = Deduplicator::from_config(config).deduplicate(selected)?;
        report.dedup = deduped.stats;

        let (normalized, normalize_stats) = Normalizer::from_config(config).normalize(deduped.frame)?;
        report.normalize = Some(normalize_stats);

        let (joined, join_stats) = GeoJoiner::from_config(config).join_all(normalized)?;
        report.geo_joins = join_stats;

        Ok(CleanRun {
            frame: joined,
            lineage: deduped.lineage,
            report,
        })
    }

    /// Clean the input, write the cleaned CSV and the run report
    pub fn run_clean(&self) -> Result<RunReport> {
        let started = Instant::now();
        emit_counter_labeled(MetricName::PipelineRuns, "command", "clean".to_string(), 1);
        println!("🚀 Cleaning {}", self.config.input.path.display());

        let CleanRun { frame, mut report, .. } = self.clean("clean")?;
        let output = self.config.cleaned_csv_path();
        write_csv(&frame, &output, self.config.input.delimiter)?;
        report.rows_exported = frame.height();
        report.output_file = Some(output);
        report.persist(&self.config.run_report_path())?;

        emit_histogram(MetricName::PipelineDuration, started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Clean the input, build features and train the rent model
    pub fn run_training(&self) -> Result<RunReport> {
        let started = Instant::now();
        emit_counter_labeled(MetricName::PipelineRuns, "command", "train".to_string(), 1);
        println!("🚀 Training on {}", self.config.input.path.display());

        let CleanRun { frame, mut report, .. } = self.clean("train")?;
        let features = FeatureBuilder::from_config(self.config).build(&frame)?;
        let outcome = training::train(&features, &self.config.training)?;
        report.training = Some(outcome);
        report.persist(&self.config.run_report_path())?;

        emit_histogram(MetricName::PipelineDuration, started.elapsed().as_secs_f64());
        Ok(report)
    }
}

/// Run the reconciliation passes alone on any delimited file
#[instrument(skip(dedup), fields(input = %input.display(), output = %output.display()))]
pub fn dedupe_file(input: &Path, output: &Path, dedup: &Deduplicator, delimiter: char) -> Result<DedupStats> {
    let started = Instant::now();
    emit_counter_labeled(MetricName::PipelineRuns, "command", "dedupe".to_string(), 1);

    let loaded = load_csv(input, delimiter)?;
    let outcome = dedup.deduplicate(loaded.frame)?;
    write_csv(&outcome.frame, output, delimiter)?;

    emit_histogram(MetricName::PipelineDuration, started.elapsed().as_secs_f64());
    Ok(outcome.stats)
}
