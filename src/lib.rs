pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod logging;
pub mod observability;
pub mod pipeline;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::processing::{DedupOutcome, DedupStats, Deduplicator};
pub use pipeline::{dedupe_file, Pipeline, RunReport};
