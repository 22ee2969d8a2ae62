use polars::prelude::*;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::frame::has_column;

const STAGE: &str = "selector";

/// Restricts the raw table to the columns the pipeline uses
pub struct ColumnSelector<'a> {
    config: &'a Config,
}

impl<'a> ColumnSelector<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Project the frame onto [`Config::model_columns`].
    ///
    /// Identifier, sequence, duration and target columns are always required. When a
    /// geo join brings in all of its reference columns, a feature column missing from
    /// the input may still come from that join, so it is skipped here and checked again
    /// by the feature builder.
    pub fn select(&self, frame: DataFrame) -> Result<DataFrame> {
        let wanted = self.config.model_columns();
        let has_wildcard_join = self.config.geo.joins.iter().any(|j| j.columns.is_empty());
        let always_required = [
            self.config.preprocess.id_col.as_str(),
            self.config.dedup.sequence_col.as_str(),
            self.config.dedup.duration_col.as_str(),
            self.config.preprocess.target.as_str(),
        ];

        let (present, absent): (Vec<&str>, Vec<&str>) =
            wanted.into_iter().partition(|c| has_column(&frame, c));

        if !absent.is_empty() {
            let strictly_missing: Vec<String> = absent
                .iter()
                .filter(|c| !has_wildcard_join || always_required.contains(c))
                .map(|c| c.to_string())
                .collect();
            if !strictly_missing.is_empty() {
                return Err(PipelineError::missing_columns(STAGE, strictly_missing));
            }
            warn!(
                "Columns {:?} are not in the input; expecting them from a geo join",
                absent
            );
        }

        let dropped = frame.width() - present.len();
        let selected = frame.select(present)?;
        info!(
            "🧮 Selected {} columns ({} dropped) for {} rows",
            selected.width(),
            dropped,
            selected.height()
        );
        Ok(selected)
    }
}
