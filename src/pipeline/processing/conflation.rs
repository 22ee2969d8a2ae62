use polars::prelude::*;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::Config;
use crate::constants::ID_SUFFIX_SEPARATOR;
use crate::error::{PipelineError, Result};
use crate::frame::{column_index, format_number, parse_number, require_columns, to_text_frame};
use crate::observability::{emit_counter, emit_gauge, MetricName};

const STAGE: &str = "dedup";

/// Collapses repeated observations of one physical unit into canonical records.
///
/// Three passes over the frame, in input order:
/// 1. rows identical on every column except the sequence marker keep only the first row;
/// 2. rows identical on every column except the sequence marker and the duration merge
///    into the first row, whose duration becomes the mean over the rows that survived
///    pass 1;
/// 3. ids still repeated get a `_<n>` suffix, starting at 2.
///
/// Cells are compared as text, so the output has every column as text too.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    id_col: String,
    sequence_col: String,
    duration_col: String,
}

/// Canonical records plus the raw rows each one was built from
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub frame: DataFrame,
    /// For every output row, the sorted indices of the input rows it absorbed
    pub lineage: Vec<Vec<usize>>,
    pub stats: DedupStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub input_rows: usize,
    pub exact_duplicates_removed: usize,
    pub near_duplicates_merged: usize,
    pub ids_renamed: usize,
    pub output_rows: usize,
}

/// A surviving row and the input rows folded into it
#[derive(Debug)]
struct Member {
    row: usize,
    sources: Vec<usize>,
    id: String,
    duration: Option<String>,
}

impl Deduplicator {
    pub fn new(
        id_col: impl Into<String>,
        sequence_col: impl Into<String>,
        duration_col: impl Into<String>,
    ) -> Self {
        Self {
            id_col: id_col.into(),
            sequence_col: sequence_col.into(),
            duration_col: duration_col.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.preprocess.id_col.clone(),
            config.dedup.sequence_col.clone(),
            config.dedup.duration_col.clone(),
        )
    }

    pub fn deduplicate(&self, frame: DataFrame) -> Result<DedupOutcome> {
        require_columns(
            &frame,
            STAGE,
            &[
                self.id_col.as_str(),
                self.sequence_col.as_str(),
                self.duration_col.as_str(),
            ],
        )?;
        let text = to_text_frame(&frame)?;
        let id_idx = column_index(&text, STAGE, &self.id_col)?;
        let seq_idx = column_index(&text, STAGE, &self.sequence_col)?;
        let dur_idx = column_index(&text, STAGE, &self.duration_col)?;

        let columns: Vec<&StringChunked> = text
            .get_columns()
            .iter()
            .map(|c| c.as_materialized_series().str())
            .collect::<PolarsResult<_>>()?;

        let input_rows = text.height();
        let mut members = Vec::with_capacity(input_rows);
        for (row, id) in columns[id_idx].into_iter().enumerate() {
            let Some(id) = id else {
                return Err(PipelineError::MissingIdentifier {
                    column: self.id_col.clone(),
                    row,
                });
            };
            members.push(Member {
                row,
                sources: vec![row],
                id: id.to_string(),
                duration: columns[dur_idx].get(row).map(str::to_string),
            });
        }

        // Pass 1: exact duplicates ignoring the sequence marker
        let survivors: Vec<Member> = group_members(members, &columns, &[seq_idx])
            .into_iter()
            .filter_map(fold_into_first)
            .collect();
        let after_exact = survivors.len();
        debug!("Pass 1 kept {} of {} rows", after_exact, input_rows);

        // Pass 2: near duplicates ignoring sequence marker and duration
        let mut canonical: Vec<Member> = group_members(survivors, &columns, &[seq_idx, dur_idx])
            .into_iter()
            .filter_map(reconcile_duration)
            .collect();
        debug!("Pass 2 kept {} of {} rows", canonical.len(), after_exact);

        // Pass 3: make ids unique
        let ids_renamed = disambiguate_ids(&mut canonical);

        let stats = DedupStats {
            input_rows,
            exact_duplicates_removed: input_rows - after_exact,
            near_duplicates_merged: after_exact - canonical.len(),
            ids_renamed,
            output_rows: canonical.len(),
        };

        let mut lineage = Vec::with_capacity(canonical.len());
        let mut rows = Vec::with_capacity(canonical.len());
        let mut ids = Vec::with_capacity(canonical.len());
        let mut durations = Vec::with_capacity(canonical.len());
        for mut member in canonical {
            member.sources.sort_unstable();
            lineage.push(member.sources);
            rows.push(member.row as IdxSize);
            ids.push(member.id);
            durations.push(member.duration);
        }

        let mut deduped = text.take(&IdxCa::from_vec("rows".into(), rows))?;
        deduped.with_column(Column::new(self.id_col.as_str().into(), ids))?;
        deduped.with_column(Column::new(self.duration_col.as_str().into(), durations))?;

        emit_counter(MetricName::DedupExactDuplicatesRemoved, stats.exact_duplicates_removed as u64);
        emit_counter(MetricName::DedupNearDuplicatesMerged, stats.near_duplicates_merged as u64);
        emit_counter(MetricName::DedupIdsRenamed, stats.ids_renamed as u64);
        emit_gauge(MetricName::DedupCanonicalRecords, stats.output_rows as f64);
        info!(
            "🔗 Deduplicated {} raw records into {} canonical records ({} exact duplicates, {} merged, {} ids renamed)",
            stats.input_rows,
            stats.output_rows,
            stats.exact_duplicates_removed,
            stats.near_duplicates_merged,
            stats.ids_renamed
        );

        Ok(DedupOutcome {
            frame: deduped,
            lineage,
            stats,
        })
    }
}

fn grouping_key<'a>(columns: &[&'a StringChunked], row: usize, excluded: &[usize]) -> Vec<Option<&'a str>> {
    columns
        .iter()
        .enumerate()
        .filter(|(i, _)| !excluded.contains(i))
        .map(|(_, column)| column.get(row))
        .collect()
}

/// Group members on every column except `excluded`. Groups come out in order of their
/// first member, and members keep their relative order inside a group.
fn group_members(members: Vec<Member>, columns: &[&StringChunked], excluded: &[usize]) -> Vec<Vec<Member>> {
    let mut index: HashMap<Vec<Option<&str>>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Member>> = Vec::new();

    for member in members {
        match index.entry(grouping_key(columns, member.row, excluded)) {
            Entry::Occupied(slot) => groups[*slot.get()].push(member),
            Entry::Vacant(slot) => {
                slot.insert(groups.len());
                groups.push(vec![member]);
            }
        }
    }

    groups
}

/// Keep the first member's row, absorb everyone's sources
fn fold_into_first(group: Vec<Member>) -> Option<Member> {
    group.into_iter().reduce(|mut first, other| {
        first.sources.extend(other.sources);
        first
    })
}

/// Fold a near-duplicate group, replacing the duration with the mean over its members.
/// Members without a numeric duration still fold in but do not count toward the mean;
/// with none numeric the first member's raw value stays.
fn reconcile_duration(group: Vec<Member>) -> Option<Member> {
    let (sum, count) = group
        .iter()
        .filter_map(|m| m.duration.as_deref().and_then(parse_number))
        .fold((0.0_f64, 0_usize), |(sum, count), d| (sum + d, count + 1));

    let mut merged = fold_into_first(group)?;
    if count > 0 {
        merged.duration = Some(format_number(sum / count as f64));
    }
    Some(merged)
}

/// Rename repeated ids to `<id>_<n>`. A generated id never equals any id already in
/// the frame; a taken suffix advances to the next free number.
fn disambiguate_ids(members: &mut [Member]) -> usize {
    let mut taken: HashSet<String> = members.iter().map(|m| m.id.clone()).collect();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut renamed = 0;

    for member in members.iter_mut() {
        match next_suffix.entry(member.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(2);
            }
            Entry::Occupied(mut slot) => {
                let base = slot.key().clone();
                let next = slot.get_mut();
                let mut candidate = format!("{}{}{}", base, ID_SUFFIX_SEPARATOR, next);
                while taken.contains(&candidate) {
                    *next += 1;
                    candidate = format!("{}{}{}", base, ID_SUFFIX_SEPARATOR, next);
                }
                *next += 1;

                debug!("Renaming repeated id {} to {}", base, candidate);
                taken.insert(candidate.clone());
                member.id = candidate;
                renamed += 1;
            }
        }
    }

    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{column, text_values};

    fn dedup() -> Deduplicator {
        Deduplicator::new("obid", "spell", "laufzeittage")
    }

    fn frame(rows: &[[&str; 4]]) -> DataFrame {
        let names = ["obid", "spell", "laufzeittage", "heizungsart"];
        let columns = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values: Vec<Option<&str>> = rows
                    .iter()
                    .map(|r| Some(r[i]).filter(|c| !c.is_empty()))
                    .collect();
                Column::new((*name).into(), values)
            })
            .collect();
        DataFrame::new(columns).unwrap()
    }

    fn cells(frame: &DataFrame, name: &str) -> Vec<Option<String>> {
        text_values(column(frame, "test", name).unwrap()).unwrap()
    }

    fn ids(frame: &DataFrame) -> Vec<String> {
        cells(frame, "obid").into_iter().flatten().collect()
    }

    fn some(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_exact_duplicates_keep_first_spell() {
        let outcome = dedup()
            .deduplicate(frame(&[["1", "1", "10", "A"], ["1", "2", "10", "A"]]))
            .unwrap();

        assert_eq!(outcome.frame.height(), 1);
        assert_eq!(cells(&outcome.frame, "obid"), some(&["1"]));
        assert_eq!(cells(&outcome.frame, "spell"), some(&["1"]));
        assert_eq!(cells(&outcome.frame, "laufzeittage"), some(&["10"]));
        assert_eq!(cells(&outcome.frame, "heizungsart"), some(&["A"]));
        assert_eq!(outcome.stats.exact_duplicates_removed, 1);
        assert_eq!(outcome.lineage, vec![vec![0, 1]]);
    }

    #[test]
    fn test_near_duplicates_average_duration() {
        let outcome = dedup()
            .deduplicate(frame(&[["2", "1", "10", "B"], ["2", "2", "20", "B"]]))
            .unwrap();

        assert_eq!(outcome.frame.height(), 1);
        assert_eq!(cells(&outcome.frame, "spell"), some(&["1"]));
        assert_eq!(cells(&outcome.frame, "laufzeittage"), some(&["15"]));
        assert_eq!(outcome.stats.near_duplicates_merged, 1);
    }

    #[test]
    fn test_duration_mean_counts_exact_duplicates_once() {
        // the first two rows collapse in pass 1, so the mean is (10 + 20) / 2
        let outcome = dedup()
            .deduplicate(frame(&[
                ["1", "1", "10", "A"],
                ["1", "2", "10", "A"],
                ["1", "3", "20", "A"],
            ]))
            .unwrap();

        assert_eq!(outcome.frame.height(), 1);
        assert_eq!(cells(&outcome.frame, "laufzeittage"), some(&["15"]));
        assert_eq!(outcome.stats.exact_duplicates_removed, 1);
        assert_eq!(outcome.stats.near_duplicates_merged, 1);
        assert_eq!(outcome.lineage, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_fractional_mean_keeps_full_precision() {
        let outcome = dedup()
            .deduplicate(frame(&[
                ["6", "1", "10", "A"],
                ["6", "2", "10.5", "A"],
                ["6", "3", "20", "A"],
            ]))
            .unwrap();
        let mean = cells(&outcome.frame, "laufzeittage")[0]
            .as_deref()
            .and_then(parse_number)
            .unwrap();
        assert!((mean - 40.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_conflicting_attributes_are_renamed_not_merged() {
        let outcome = dedup()
            .deduplicate(frame(&[["3", "1", "5", "C"], ["3", "2", "7", "D"]]))
            .unwrap();

        assert_eq!(outcome.frame.height(), 2);
        assert_eq!(ids(&outcome.frame), vec!["3", "3_2"]);
        assert_eq!(outcome.stats.ids_renamed, 1);
    }

    #[test]
    fn test_third_occurrence_gets_suffix_three() {
        let outcome = dedup()
            .deduplicate(frame(&[
                ["3", "1", "5", "C"],
                ["3", "1", "5", "D"],
                ["3", "1", "5", "E"],
            ]))
            .unwrap();
        assert_eq!(ids(&outcome.frame), vec!["3", "3_2", "3_3"]);
    }

    #[test]
    fn test_rename_skips_existing_suffixed_id() {
        let outcome = dedup()
            .deduplicate(frame(&[
                ["7", "1", "5", "C"],
                ["7", "1", "5", "D"],
                ["7_2", "1", "5", "C"],
            ]))
            .unwrap();
        assert_eq!(ids(&outcome.frame), vec!["7", "7_3", "7_2"]);
    }

    #[test]
    fn test_missing_durations_are_excluded_from_mean() {
        let outcome = dedup()
            .deduplicate(frame(&[
                ["4", "1", "", "A"],
                ["4", "2", "30", "A"],
                ["4", "3", "Other missing", "A"],
                ["4", "4", "10", "A"],
            ]))
            .unwrap();

        assert_eq!(outcome.frame.height(), 1);
        assert_eq!(cells(&outcome.frame, "laufzeittage"), some(&["20"]));
        assert_eq!(cells(&outcome.frame, "spell"), some(&["1"]));
        assert_eq!(outcome.lineage, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_group_without_any_duration_keeps_raw_value() {
        let outcome = dedup()
            .deduplicate(frame(&[["5", "1", "", "A"], ["5", "2", "", "A"]]))
            .unwrap();
        assert_eq!(outcome.frame.height(), 1);
        assert_eq!(cells(&outcome.frame, "laufzeittage"), vec![None]);

        let outcome = dedup()
            .deduplicate(frame(&[["5", "1", "n/a", "A"], ["5", "2", "unknown", "A"]]))
            .unwrap();
        assert_eq!(cells(&outcome.frame, "laufzeittage"), some(&["n/a"]));
    }

    #[test]
    fn test_numeric_columns_are_compared_as_text() {
        let input = df!(
            "obid" => ["1", "1"],
            "spell" => [1.0, 2.0],
            "laufzeittage" => [10.0, 20.0]
        )
        .unwrap();
        let outcome = dedup().deduplicate(input).unwrap();
        assert_eq!(outcome.frame.height(), 1);
        assert_eq!(cells(&outcome.frame, "laufzeittage"), some(&["15"]));
        assert_eq!(cells(&outcome.frame, "spell"), some(&["1"]));
    }

    #[test]
    fn test_empty_frame_is_not_an_error() {
        let outcome = dedup().deduplicate(frame(&[])).unwrap();
        assert_eq!(outcome.frame.height(), 0);
        assert_eq!(outcome.frame.width(), 4);
        assert!(outcome.lineage.is_empty());
        assert_eq!(outcome.stats, DedupStats::default());
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let input = df!("obid" => ["1"]).unwrap();
        match dedup().deduplicate(input).unwrap_err() {
            PipelineError::MissingColumns { stage, columns } => {
                assert_eq!(stage, "dedup");
                assert_eq!(columns, vec!["spell".to_string(), "laufzeittage".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_identifier_is_rejected() {
        let err = dedup()
            .deduplicate(frame(&[["1", "1", "10", "A"], ["", "1", "10", "A"]]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingIdentifier { row: 1, .. }));
    }

    #[test]
    fn test_output_order_follows_first_occurrence() {
        let outcome = dedup()
            .deduplicate(frame(&[
                ["9", "1", "10", "A"],
                ["8", "1", "10", "A"],
                ["9", "2", "20", "A"],
            ]))
            .unwrap();
        assert_eq!(ids(&outcome.frame), vec!["9", "8"]);
        assert_eq!(outcome.lineage, vec![vec![0, 2], vec![1]]);
    }
}
