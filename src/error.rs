use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data frame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error in {stage}: missing required columns: {}", columns.join(", "))]
    MissingColumns {
        stage: &'static str,
        columns: Vec<String>,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Row {row} has no value for identifier column '{column}'")]
    MissingIdentifier { column: String, row: usize },

    #[error("Reference table '{table}' contains key '{key}' more than once")]
    DuplicateReferenceKey { table: String, key: String },

    #[error("Column '{column}' holds non-numeric value '{value}' at row {row}")]
    NonNumericFeature {
        column: String,
        value: String,
        row: usize,
    },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("'{0}' requires the crate to be built with the `xgboost` feature")]
    FeatureDisabled(&'static str),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn missing_columns(stage: &'static str, columns: Vec<String>) -> Self {
        PipelineError::MissingColumns { stage, columns }
    }
}
