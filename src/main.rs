use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use rent_panel::observability::metrics;
use rent_panel::pipeline::{dedupe_file, Pipeline, RunReport};
use rent_panel::{constants, logging, Config, Deduplicator};

#[derive(Parser)]
#[command(name = "rent_panel")]
#[command(about = "Cleaning, deduplication and rent modelling for the municipal rental panel")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (TOML, or JSON by extension)
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Directory for the rolling JSON log file
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    /// Write a Prometheus text snapshot of the run's metrics to this file
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, deduplicate, normalize and geo-join the panel, then export it
    Clean {
        /// Override the input file from the config
        #[arg(long)]
        input: Option<PathBuf>,
        /// Override the output directory from the config
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run only the reconciliation passes on a delimited file
    Dedupe {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = constants::OBID_COL)]
        id_col: String,
        #[arg(long, default_value = constants::SPELL_COL)]
        sequence_col: String,
        #[arg(long, default_value = constants::DURATION_COL)]
        duration_col: String,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
    /// Clean the panel, build features and train the rent model
    Train {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn load_config(path: &Path, input: Option<PathBuf>, output: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config =
        Config::load(path).with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(input) = input {
        config.input.path = input;
    }
    if let Some(output) = output {
        config.output.dir = output;
    }
    Ok(config)
}

fn print_clean_summary(report: &RunReport) {
    println!("\n📊 Pipeline Results:");
    println!("   Rows loaded: {}", report.rows_loaded);
    println!("   Exact duplicates removed: {}", report.dedup.exact_duplicates_removed);
    println!("   Near duplicates merged: {}", report.dedup.near_duplicates_merged);
    println!("   Identifiers renamed: {}", report.dedup.ids_renamed);
    if let Some(normalize) = &report.normalize {
        println!("   Out of range rows dropped: {}", normalize.rows_out_of_range);
        println!("   Incomplete rows dropped: {}", normalize.rows_incomplete);
    }
    for join in &report.geo_joins {
        println!(
            "   Join {}: {} matched, {} unmatched",
            join.name, join.matched, join.unmatched
        );
    }
    println!("   Rows exported: {}", report.rows_exported);
    if let Some(output) = &report.output_file {
        println!("   Output file: {}", output.display());
    }
}

fn print_training_summary(report: &RunReport) {
    let Some(outcome) = &report.training else {
        return;
    };
    println!("\n📈 Validation ({} rows):", outcome.validation_rows);
    println!("   RMSE: {:.4}", outcome.metrics.rmse);
    println!("   MAE:  {:.4}", outcome.metrics.mae);
    println!("   Mean baseline RMSE: {:.4}", outcome.baseline.rmse);
    println!(
        "   Boosting rounds: {} (best {})",
        outcome.rounds_trained, outcome.best_iteration
    );
    if let Some(path) = &outcome.model_path {
        println!("   Model file: {}", path.display());
    }

    println!("\n🏆 Feature importance:");
    let width = outcome
        .importances
        .iter()
        .map(|f| f.feature.len())
        .max()
        .unwrap_or(0);
    for (rank, item) in outcome.importances.iter().enumerate() {
        println!(
            "   {:>3}. {:<width$}  {:.5}",
            rank + 1,
            item.feature,
            item.importance,
            width = width
        );
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Clean { input, output } => {
            let config = load_config(&cli.config, input, output)?;
            let report = Pipeline::new(&config).run_clean().context("clean run failed")?;
            print_clean_summary(&report);
            println!("✅ Clean run {} completed", report.run_id);
        }
        Commands::Dedupe {
            input,
            output,
            id_col,
            sequence_col,
            duration_col,
            delimiter,
        } => {
            println!("🔁 Deduplicating {}...", input.display());
            let dedup = Deduplicator::new(id_col, sequence_col, duration_col);
            let stats = dedupe_file(&input, &output, &dedup, delimiter)
                .with_context(|| format!("deduplicating {}", input.display()))?;
            println!("   Input rows: {}", stats.input_rows);
            println!("   Exact duplicates removed: {}", stats.exact_duplicates_removed);
            println!("   Near duplicates merged: {}", stats.near_duplicates_merged);
            println!("   Identifiers renamed: {}", stats.ids_renamed);
            println!("✅ Wrote {} canonical records to {}", stats.output_rows, output.display());
        }
        Commands::Train { input } => {
            let config = load_config(&cli.config, input, None)?;
            let report = Pipeline::new(&config).run_training().context("training run failed")?;
            print_training_summary(&report);
            println!("✅ Training run {} completed", report.run_id);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    let metrics_handle = match &cli.metrics_out {
        Some(_) => Some(metrics::init().map_err(|e| anyhow::anyhow!("installing metrics recorder: {}", e))?),
        None => None,
    };
    let metrics_out = cli.metrics_out.clone();

    let result = run(cli);
    if let Err(e) = &result {
        error!("Run failed: {:#}", e);
    }

    if let (Some(handle), Some(path)) = (metrics_handle, metrics_out) {
        metrics::write_snapshot(&handle, &path)
            .with_context(|| format!("writing metrics snapshot to {}", path.display()))?;
        info!("📊 Metrics snapshot written to {}", path.display());
    }
    result
}
