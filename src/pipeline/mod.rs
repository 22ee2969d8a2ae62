// Rental panel pipeline: ingestion, processing, training and export

pub mod export;
pub mod ingestion;
pub mod processing;
pub mod runner;
pub mod training;

// Re-export the entry points used by the binary and integration tests
pub use export::{write_csv, RunReport};
pub use runner::{dedupe_file, CleanRun, Pipeline};
pub use training::{FeatureImportance, Regressor, TrainingOutcome};
