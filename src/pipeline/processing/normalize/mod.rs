use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, NormalizeConfig};
use crate::error::Result;
use crate::frame::{column, column_names, float_values, parse_number, require_columns};
use crate::observability::{emit_counter, emit_gauge, MetricName};

const STAGE: &str = "normalize";

/// Cleans reconciled records: missing tokens to nulls, numeric coercion,
/// plausibility filters and removal of incomplete rows.
pub struct Normalizer<'a> {
    config: &'a NormalizeConfig,
    id_col: &'a str,
    duration_col: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeStats {
    pub input_rows: usize,
    pub missing_tokens_replaced: usize,
    /// Columns converted to numbers
    pub coerced_columns: Vec<String>,
    /// Columns left as text because at least one value is not a number
    pub text_columns: Vec<String>,
    pub rows_out_of_range: usize,
    pub rows_incomplete: usize,
    pub output_rows: usize,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a NormalizeConfig, id_col: &'a str, duration_col: &'a str) -> Self {
        Self {
            config,
            id_col,
            duration_col,
        }
    }

    pub fn from_config(config: &'a Config) -> Self {
        Self::new(
            &config.normalize,
            &config.preprocess.id_col,
            &config.dedup.duration_col,
        )
    }

    pub fn normalize(&self, mut frame: DataFrame) -> Result<(DataFrame, NormalizeStats)> {
        let mut required = vec![self.duration_col];
        required.extend(self.config.ranges.keys().map(String::as_str));
        require_columns(&frame, STAGE, &required)?;

        let mut stats = NormalizeStats {
            input_rows: frame.height(),
            ..Default::default()
        };

        stats.missing_tokens_replaced = self.replace_missing_tokens(&mut frame)?;
        self.coerce_columns(&mut frame, &mut stats)?;

        let max_duration = self.config.max_duration_days;
        let mut keep: Vec<bool> = float_values(column(&frame, STAGE, self.duration_col)?)?
            .into_iter()
            .map(|d| d.map_or(true, |d| d <= max_duration))
            .collect();
        for (name, range) in &self.config.ranges {
            let values = float_values(column(&frame, STAGE, name)?)?;
            for (kept, value) in keep.iter_mut().zip(values) {
                *kept &= value.map_or(true, |v| range.contains(v));
            }
        }
        let before = frame.height();
        frame = frame.filter(&BooleanChunked::new("in_range".into(), keep))?;
        stats.rows_out_of_range = before - frame.height();

        let mut complete = vec![true; frame.height()];
        for c in frame.get_columns() {
            let present = c.as_materialized_series().is_not_null();
            for (kept, value) in complete.iter_mut().zip(&present) {
                *kept &= value.unwrap_or(false);
            }
        }
        let before = frame.height();
        frame = frame.filter(&BooleanChunked::new("complete".into(), complete))?;
        stats.rows_incomplete = before - frame.height();
        stats.output_rows = frame.height();

        emit_counter(MetricName::NormalizeMissingTokensReplaced, stats.missing_tokens_replaced as u64);
        emit_gauge(MetricName::NormalizeColumnsCoerced, stats.coerced_columns.len() as f64);
        emit_counter(MetricName::NormalizeRowsOutOfRange, stats.rows_out_of_range as u64);
        emit_counter(MetricName::NormalizeRowsIncomplete, stats.rows_incomplete as u64);
        info!(
            "🧹 Normalized {} rows: {} missing tokens replaced, {} columns numeric, {} out of range, {} incomplete, {} kept",
            stats.input_rows,
            stats.missing_tokens_replaced,
            stats.coerced_columns.len(),
            stats.rows_out_of_range,
            stats.rows_incomplete,
            stats.output_rows
        );

        Ok((frame, stats))
    }

    fn is_missing_token(&self, value: &str) -> bool {
        let value = value.trim();
        self.config.missing_tokens.iter().any(|t| t == value)
    }

    fn replace_missing_tokens(&self, frame: &mut DataFrame) -> Result<usize> {
        let mut replaced = 0;
        for name in column_names(frame) {
            let series = column(frame, STAGE, &name)?;
            if series.dtype() != &DataType::String {
                continue;
            }
            let mut hits = 0;
            let cleaned: StringChunked = series
                .str()?
                .into_iter()
                .map(|value| match value {
                    Some(v) if self.is_missing_token(v) => {
                        hits += 1;
                        None
                    }
                    other => other,
                })
                .collect();
            if hits > 0 {
                replaced += hits;
                frame.with_column(cleaned.with_name(name.as_str().into()).into_series())?;
            }
        }
        Ok(replaced)
    }

    /// Convert a text column to numbers only when every non-null value parses;
    /// otherwise the column stays as it is.
    fn coerce_columns(&self, frame: &mut DataFrame, stats: &mut NormalizeStats) -> Result<()> {
        for name in column_names(frame) {
            if name == self.id_col || self.config.text_cols.contains(&name) {
                continue;
            }
            let series = column(frame, STAGE, &name)?;
            if series.dtype() != &DataType::String || series.null_count() == series.len() {
                continue;
            }
            let values = series.str()?;
            let offending = values
                .into_iter()
                .flatten()
                .find(|v| parse_number(v).is_none())
                .map(str::to_string);
            match offending {
                Some(sample) => {
                    debug!("Column '{}' left as text (value '{}' is not numeric)", name, sample);
                    stats.text_columns.push(name);
                }
                None => {
                    let numbers: Float64Chunked = values
                        .into_iter()
                        .map(|v| v.and_then(parse_number))
                        .collect();
                    frame.with_column(numbers.with_name(name.as_str().into()).into_series())?;
                    stats.coerced_columns.push(name);
                }
            }
        }
        Ok(())
    }
}
