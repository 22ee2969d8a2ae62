use crate::constants;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Complete run configuration. Loaded once and handed to every stage by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

/// Semantic column groups used for selection and feature building
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub numerical_cols: Vec<String>,
    #[serde(default)]
    pub categorical_cols: Vec<String>,
    #[serde(default)]
    pub temporal_cols: Vec<String>,
    #[serde(default)]
    pub spatial_cols: Vec<String>,
    #[serde(default)]
    pub grid_col: Option<String>,
    #[serde(default = "default_id_col")]
    pub id_col: String,
}

/// Columns driving the reconciliation passes
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_sequence_col")]
    pub sequence_col: String,
    #[serde(default = "default_duration_col")]
    pub duration_col: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            sequence_col: default_sequence_col(),
            duration_col: default_duration_col(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default = "default_missing_tokens")]
    pub missing_tokens: Vec<String>,
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: f64,
    /// Columns never coerced to numbers (postal codes and the like)
    #[serde(default)]
    pub text_cols: Vec<String>,
    #[serde(default)]
    pub ranges: BTreeMap<String, ValueRange>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            missing_tokens: default_missing_tokens(),
            max_duration_days: default_max_duration_days(),
            text_cols: Vec::new(),
            ranges: BTreeMap::new(),
        }
    }
}

/// Inclusive bounds; either side may be open
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct ValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoConfig {
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
}

/// One reference-table join, applied in declaration order
#[derive(Debug, Clone, Deserialize)]
pub struct JoinConfig {
    pub name: String,
    pub path: PathBuf,
    pub left_key: String,
    pub right_key: String,
    #[serde(default)]
    pub how: JoinHow,
    /// Reference columns to bring in; empty means every non-key column
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    /// Drop rows without a reference match
    #[default]
    Inner,
    /// Keep rows without a match, brought-in columns are null
    Left,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    #[serde(default = "default_num_boost_round")]
    pub num_boost_round: u32,
    #[serde(default = "default_early_stopping_rounds")]
    pub early_stopping_rounds: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub params: ModelParams,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            random_state: default_random_state(),
            num_boost_round: default_num_boost_round(),
            early_stopping_rounds: default_early_stopping_rounds(),
            seed: None,
            params: ModelParams::default(),
            model_path: None,
        }
    }
}

/// Boosted-tree hyperparameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelParams {
    pub learning_rate: f32,
    pub max_depth: u32,
    pub min_child_weight: f32,
    pub subsample: f32,
    pub colsample_bytree: f32,
    pub lambda: f32,
    pub alpha: f32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            max_depth: 6,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            lambda: 1.0,
            alpha: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_cleaned_csv")]
    pub cleaned_csv: String,
    #[serde(default = "default_run_report")]
    pub run_report: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            cleaned_csv: default_cleaned_csv(),
            run_report: default_run_report(),
        }
    }
}

fn default_delimiter() -> char {
    ','
}
fn default_target() -> String {
    constants::RENT_SQM_COL.to_string()
}
fn default_id_col() -> String {
    constants::OBID_COL.to_string()
}
fn default_sequence_col() -> String {
    constants::SPELL_COL.to_string()
}
fn default_duration_col() -> String {
    constants::DURATION_COL.to_string()
}
fn default_missing_tokens() -> Vec<String> {
    constants::DEFAULT_MISSING_TOKENS.iter().map(|s| s.to_string()).collect()
}
fn default_max_duration_days() -> f64 {
    constants::MAX_DURATION_DAYS
}
fn default_test_size() -> f64 {
    0.2
}
fn default_random_state() -> u64 {
    42
}
fn default_num_boost_round() -> u32 {
    1000
}
fn default_early_stopping_rounds() -> u32 {
    50
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_cleaned_csv() -> String {
    constants::CLEANED_CSV_FILE.to_string()
}
fn default_run_report() -> String {
    constants::RUN_REPORT_FILE.to_string()
}

impl Config {
    /// Load a config file. `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration before any stage runs
    pub fn validate(&self) -> Result<()> {
        let pre = &self.preprocess;
        if pre.target.trim().is_empty() {
            return Err(PipelineError::Config("preprocess.target must not be empty".into()));
        }
        if pre.id_col == pre.target {
            return Err(PipelineError::Config(format!(
                "id column '{}' cannot also be the target",
                pre.id_col
            )));
        }
        if self.dedup.sequence_col == self.dedup.duration_col {
            return Err(PipelineError::Config(
                "dedup.sequence_col and dedup.duration_col must differ".into(),
            ));
        }
        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.test_size must be in (0, 1), got {}",
                self.training.test_size
            )));
        }
        if self.normalize.max_duration_days <= 0.0 {
            return Err(PipelineError::Config(
                "normalize.max_duration_days must be positive".into(),
            ));
        }
        for (column, range) in &self.normalize.ranges {
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(PipelineError::Config(format!(
                        "range for '{}' has min {} above max {}",
                        column, min, max
                    )));
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for join in &self.geo.joins {
            if !seen.insert(join.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "geo join '{}' is declared twice",
                    join.name
                )));
            }
        }

        Ok(())
    }

    /// Columns produced by geo joins, which the selector must not require
    pub fn joined_columns(&self) -> Vec<&str> {
        self.geo
            .joins
            .iter()
            .flat_map(|j| j.columns.iter().map(String::as_str))
            .collect()
    }

    /// Every column the pipeline needs from the raw input, without duplicates,
    /// in a stable order: id, sequence, duration, target, then the feature groups.
    pub fn model_columns(&self) -> Vec<&str> {
        let pre = &self.preprocess;
        let mut columns: Vec<&str> = vec![
            pre.id_col.as_str(),
            self.dedup.sequence_col.as_str(),
            self.dedup.duration_col.as_str(),
            pre.target.as_str(),
        ];
        let groups = pre
            .numerical_cols
            .iter()
            .chain(&pre.categorical_cols)
            .chain(&pre.temporal_cols)
            .chain(&pre.spatial_cols)
            .chain(pre.grid_col.iter())
            .chain(self.geo.joins.iter().map(|j| &j.left_key));
        columns.extend(groups.map(String::as_str));

        let joined = self.joined_columns();
        let mut unique = Vec::with_capacity(columns.len());
        for column in columns {
            if !unique.contains(&column) && !joined.contains(&column) {
                unique.push(column);
            }
        }
        unique
    }

    pub fn cleaned_csv_path(&self) -> PathBuf {
        self.output.dir.join(&self.output.cleaned_csv)
    }

    pub fn run_report_path(&self) -> PathBuf {
        self.output.dir.join(&self.output.run_report)
    }
}
