use polars::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::config::{Config, JoinConfig, JoinHow};
use crate::error::{PipelineError, Result};
use crate::frame::{column, column_names, format_number, has_column, require_columns, text_values};
use crate::observability::metrics::emit_counter_labeled;
use crate::observability::MetricName;
use crate::pipeline::ingestion::parse_csv;

const STAGE: &str = "geo_join";
/// Helper columns that exist only for the duration of a join
const JOIN_KEY: &str = "__join_key";
const ROW_ORDER: &str = "__row_order";

/// Joins municipal and administrative reference tables onto the unit records
pub struct GeoJoiner<'a> {
    joins: &'a [JoinConfig],
    delimiter: char,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub name: String,
    pub matched: usize,
    pub unmatched: usize,
    /// Unmatched rows removed (inner joins only)
    pub dropped: usize,
}

impl<'a> GeoJoiner<'a> {
    pub fn new(joins: &'a [JoinConfig], delimiter: char) -> Self {
        Self { joins, delimiter }
    }

    pub fn from_config(config: &'a Config) -> Self {
        Self::new(&config.geo.joins, config.input.delimiter)
    }

    /// Apply every configured join in order
    pub fn join_all(&self, mut frame: DataFrame) -> Result<(DataFrame, Vec<JoinStats>)> {
        let mut all_stats = Vec::with_capacity(self.joins.len());
        for join in self.joins {
            let reference = load_reference(&join.path, self.delimiter)?;
            let (joined, stats) = join_reference(frame, &reference, join)?;
            frame = joined;
            all_stats.push(stats);
        }
        Ok((frame, all_stats))
    }
}

/// Load a reference table. `.json` files hold an array of flat objects; anything
/// else is read as delimited text. Either way every column comes in as text.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_reference(path: &Path, delimiter: char) -> Result<DataFrame> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let bytes = fs::read(path)?;
    let frame = if is_json {
        parse_json_records(&bytes)?
    } else {
        parse_csv(bytes, delimiter)?
    };
    info!("🗺️ Loaded reference table with {} rows from {}", frame.height(), path.display());
    Ok(frame)
}

fn parse_json_records(bytes: &[u8]) -> Result<DataFrame> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_slice(bytes)?;

    let mut names: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    let columns = names
        .iter()
        .map(|name| {
            let values: Vec<Option<String>> = records
                .iter()
                .map(|record| match record.get(name) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(serde_json::Value::Number(n)) => n.as_f64().map(format_number),
                    Some(serde_json::Value::String(s)) => {
                        Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
                    }
                    Some(other) => Some(other.to_string()),
                })
                .collect();
            Column::new(name.as_str().into(), values)
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// Normalized join key. All-digit codes compare as integers without leading
/// zeros, so `"01001000"` matches `1001000`.
pub fn join_key(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.chars().all(|c| c.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        Some(if stripped.is_empty() { "0" } else { stripped }.to_string())
    } else {
        Some(trimmed.to_string())
    }
}

fn key_column(series: &Series) -> Result<Vec<Option<String>>> {
    Ok(text_values(series)?
        .iter()
        .map(|v| join_key(v.as_deref()))
        .collect())
}

/// Join one reference table onto `frame`.
///
/// Reference keys must be unique. Rows without a match are dropped for inner joins
/// and kept with null reference columns for left joins. Row order is preserved.
pub fn join_reference(frame: DataFrame, reference: &DataFrame, join: &JoinConfig) -> Result<(DataFrame, JoinStats)> {
    require_columns(&frame, STAGE, &[join.left_key.as_str()])?;
    require_columns(reference, STAGE, &[join.right_key.as_str()])?;

    let brought: Vec<String> = if join.columns.is_empty() {
        column_names(reference)
            .into_iter()
            .filter(|c| *c != join.right_key)
            .collect()
    } else {
        join.columns.clone()
    };
    let brought_names: Vec<&str> = brought.iter().map(String::as_str).collect();
    require_columns(reference, STAGE, &brought_names)?;

    let clashes: Vec<&str> = brought_names
        .iter()
        .copied()
        .filter(|c| has_column(&frame, c))
        .collect();
    if !clashes.is_empty() {
        return Err(PipelineError::Schema(format!(
            "join '{}' would overwrite existing columns: {}",
            join.name,
            clashes.join(", ")
        )));
    }

    let right_keys = key_column(column(reference, STAGE, &join.right_key)?)?;
    let mut seen: HashSet<&str> = HashSet::with_capacity(right_keys.len());
    for key in right_keys.iter().flatten() {
        if !seen.insert(key.as_str()) {
            return Err(PipelineError::DuplicateReferenceKey {
                table: join.name.clone(),
                key: key.clone(),
            });
        }
    }

    let left_keys = key_column(column(&frame, STAGE, &join.left_key)?)?;
    let matched = left_keys
        .iter()
        .filter(|k| k.as_deref().is_some_and(|k| seen.contains(k)))
        .count();
    let mut stats = JoinStats {
        name: join.name.clone(),
        matched,
        unmatched: frame.height() - matched,
        dropped: 0,
    };
    if join.how == JoinHow::Inner {
        stats.dropped = stats.unmatched;
    }

    let mut right = reference.select(brought_names)?;
    right.with_column(Column::new(JOIN_KEY.into(), right_keys))?;
    let mut left = frame.with_row_index(ROW_ORDER.into(), None)?;
    left.with_column(Column::new(JOIN_KEY.into(), left_keys))?;

    let joined = match join.how {
        JoinHow::Inner => left.inner_join(&right, [JOIN_KEY], [JOIN_KEY])?,
        JoinHow::Left => left.left_join(&right, [JOIN_KEY], [JOIN_KEY])?,
    };
    let joined = joined
        .sort([ROW_ORDER], SortMultipleOptions::default())?
        .drop(ROW_ORDER)?
        .drop(JOIN_KEY)?;

    emit_counter_labeled(MetricName::GeoRowsMatched, "join", join.name.clone(), stats.matched as u64);
    emit_counter_labeled(MetricName::GeoRowsUnmatched, "join", join.name.clone(), stats.unmatched as u64);
    if stats.unmatched > 0 {
        warn!(
            "Join '{}' found no reference row for {} records ({} dropped)",
            join.name, stats.unmatched, stats.dropped
        );
    }
    info!(
        "📍 Join '{}' on {} = {}: {} matched, {} unmatched",
        join.name, join.left_key, join.right_key, stats.matched, stats.unmatched
    );

    Ok((joined, stats))
}
