use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use tracing::{debug, info};

use crate::config::{Config, PreprocessConfig};
use crate::constants::{GRID_EAST_COL, GRID_NORTH_COL, GRID_SEPARATOR, YEAR_SUFFIX};
use crate::error::{PipelineError, Result};
use crate::frame::{column, column_names, float_values, parse_number, require_columns, text_values};
use crate::observability::{emit_gauge, MetricName};

const STAGE: &str = "features";

/// Panel month encoding, e.g. `2019m5`
static PANEL_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})m(\d{1,2})$").expect("panel month pattern is valid"));

const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1800..=2100;

/// Numeric design frame with its label vector
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// One Float64 column per feature; missing values are NaN
    pub features: DataFrame,
    pub target: Vec<f64>,
}

impl FeatureMatrix {
    pub fn feature_names(&self) -> Vec<String> {
        column_names(&self.features)
    }

    pub fn n_rows(&self) -> usize {
        self.target.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.width()
    }

    /// Values of one feature, NaN where missing
    pub fn values(&self, name: &str) -> Result<Vec<f64>> {
        Ok(float_values(column(&self.features, STAGE, name)?)?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    /// Subset of rows, in the order given
    pub fn take(&self, indices: &[usize]) -> Result<FeatureMatrix> {
        let target = indices
            .iter()
            .map(|&i| {
                self.target.get(i).copied().ok_or_else(|| {
                    PipelineError::Training(format!("row {} is out of bounds for {} rows", i, self.n_rows()))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        let idx = IdxCa::from_vec("rows".into(), indices.iter().map(|&i| i as IdxSize).collect());
        Ok(FeatureMatrix {
            features: self.features.take(&idx)?,
            target,
        })
    }
}

/// Turns the cleaned frame into model inputs
pub struct FeatureBuilder<'a> {
    preprocess: &'a PreprocessConfig,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(preprocess: &'a PreprocessConfig) -> Self {
        Self { preprocess }
    }

    pub fn from_config(config: &'a Config) -> Self {
        Self::new(&config.preprocess)
    }

    /// Feature order: numerical and spatial columns, grid coordinates, years,
    /// then one-hot dummies per categorical column.
    pub fn build(&self, frame: &DataFrame) -> Result<FeatureMatrix> {
        let pre = self.preprocess;
        let mut required: Vec<&str> = vec![pre.target.as_str()];
        required.extend(
            pre.numerical_cols
                .iter()
                .chain(&pre.spatial_cols)
                .chain(&pre.temporal_cols)
                .chain(&pre.categorical_cols)
                .chain(pre.grid_col.iter())
                .map(String::as_str),
        );
        require_columns(frame, STAGE, &required)?;

        let mut names: Vec<String> = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        for name in pre.numerical_cols.iter().chain(&pre.spatial_cols) {
            if names.contains(name) || *name == pre.target || *name == pre.id_col {
                continue;
            }
            columns.push(numeric_column(frame, name)?);
            names.push(name.clone());
        }

        if let Some(grid) = &pre.grid_col {
            let (east, north): (Vec<f64>, Vec<f64>) = text_values(column(frame, STAGE, grid)?)?
                .iter()
                .map(|cell| split_grid_cell(cell.as_deref()))
                .unzip();
            for (name, values) in [(GRID_EAST_COL, east), (GRID_NORTH_COL, north)] {
                if names.iter().any(|n| n == name) {
                    debug!("Grid coordinate '{}' is already a feature; keeping the configured column", name);
                    continue;
                }
                names.push(name.to_string());
                columns.push(values);
            }
        }

        for name in &pre.temporal_cols {
            columns.push(year_column(column(frame, STAGE, name)?)?);
            names.push(format!("{}{}", name, YEAR_SUFFIX));
        }

        for name in &pre.categorical_cols {
            for (dummy_name, dummy) in one_hot_drop_first(column(frame, STAGE, name)?, name)? {
                names.push(dummy_name);
                columns.push(dummy);
            }
        }

        let target = numeric_column(frame, &pre.target)?;
        if let Some(row) = target.iter().position(|t| t.is_nan()) {
            return Err(PipelineError::NonNumericFeature {
                column: pre.target.clone(),
                value: String::new(),
                row,
            });
        }

        let features = DataFrame::new(
            names
                .iter()
                .zip(columns)
                .map(|(name, values)| Column::new(name.as_str().into(), values))
                .collect(),
        )?;

        emit_gauge(MetricName::FeatureColumns, features.width() as f64);
        info!("🧱 Built {} features for {} rows", features.width(), target.len());

        Ok(FeatureMatrix { features, target })
    }
}

/// Numeric column, null as NaN; any other non-numeric value is an error
fn numeric_column(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = column(frame, STAGE, name)?;
    if series.dtype() != &DataType::String {
        return Ok(float_values(series)?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect());
    }
    series
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            None => Ok(f64::NAN),
            Some(text) => parse_number(text).ok_or_else(|| PipelineError::NonNumericFeature {
                column: name.to_string(),
                value: text.to_string(),
                row,
            }),
        })
        .collect()
}

/// Split `<east>_<north>` into two numbers; unparseable parts are NaN
pub fn split_grid_cell(value: Option<&str>) -> (f64, f64) {
    let mut parts = value.unwrap_or_default().trim().splitn(2, GRID_SEPARATOR);
    let mut next = || parts.next().and_then(parse_number).unwrap_or(f64::NAN);
    let east = next();
    let north = next();
    (east, north)
}

fn year_column(series: &Series) -> Result<Vec<f64>> {
    let years: Vec<Option<i32>> = if series.dtype() == &DataType::String {
        series.str()?.into_iter().map(|v| v.and_then(parse_year)).collect()
    } else {
        float_values(series)?
            .into_iter()
            .map(|v| v.and_then(year_from_number))
            .collect()
    };
    Ok(years.into_iter().map(|y| y.map_or(f64::NAN, f64::from)).collect())
}

/// Year of a date-like text value. Returns `None` for anything that does not parse.
pub fn parse_year(value: &str) -> Option<i32> {
    parse_year_text(value.trim()).filter(|y| YEAR_RANGE.contains(y))
}

fn year_from_number(n: f64) -> Option<i32> {
    if n.fract() != 0.0 {
        return None;
    }
    Some(n as i32).filter(|y| YEAR_RANGE.contains(y))
}

fn parse_year_text(s: &str) -> Option<i32> {
    if let Some(caps) = PANEL_MONTH.captures(s) {
        let month: u32 = caps[2].parse().ok()?;
        return (1..=12).contains(&month).then(|| caps[1].parse().ok()).flatten();
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.year());
    }
    ["%Y-%m-%d", "%d.%m.%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(|d| d.year())
}

/// One 0/1 column per distinct value except the smallest. Levels sort by the
/// column's type, so numeric codes order as numbers. Null rows are zero in every dummy.
fn one_hot_drop_first(series: &Series, name: &str) -> Result<Vec<(String, Vec<f64>)>> {
    let levels = series.drop_nulls().unique()?.sort(SortOptions::default())?;
    let cells = text_values(series)?;

    Ok(text_values(&levels)?
        .into_iter()
        .flatten()
        .skip(1)
        .map(|level| {
            let dummy = cells
                .iter()
                .map(|cell| if cell.as_deref() == Some(level.as_str()) { 1.0 } else { 0.0 })
                .collect();
            (format!("{}_{}", name, level), dummy)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocess() -> PreprocessConfig {
        PreprocessConfig {
            target: "rent_sqm".into(),
            numerical_cols: vec!["wohnflaeche".into()],
            categorical_cols: vec!["heizungsart".into()],
            temporal_cols: vec!["adat".into()],
            spatial_cols: vec!["gid2019".into()],
            grid_col: Some("ergg_1km".into()),
            id_col: "obid".into(),
        }
    }

    fn frame() -> DataFrame {
        df!(
            "obid" => ["1", "2", "3"],
            "rent_sqm" => [8.5, 10.0, 12.0],
            "wohnflaeche" => [60.0, 75.0, 80.0],
            "heizungsart" => ["Gas", "Oil", "District"],
            "adat" => ["2019m5", "not a date", "2021-03-01"],
            "gid2019" => [1001000.0, 1001000.0, 2000000.0],
            "ergg_1km" => ["4334_3274", "4335_3275", "broken"]
        )
        .unwrap()
    }

    fn row(fm: &FeatureMatrix, i: usize) -> Vec<f64> {
        fm.feature_names()
            .iter()
            .map(|name| fm.values(name).unwrap()[i])
            .collect()
    }

    #[test]
    fn test_build_feature_matrix() {
        let cfg = preprocess();
        let fm = FeatureBuilder::new(&cfg).build(&frame()).unwrap();
        assert_eq!(
            fm.feature_names(),
            vec![
                "wohnflaeche",
                "gid2019",
                "east",
                "north",
                "adat_year",
                "heizungsart_Gas",
                "heizungsart_Oil",
            ]
        );
        assert_eq!(fm.target, vec![8.5, 10.0, 12.0]);
        assert_eq!(row(&fm, 0)[..4], [60.0, 1001000.0, 4334.0, 3274.0]);
        assert_eq!(row(&fm, 0)[4], 2019.0);
        assert!(row(&fm, 1)[4].is_nan());
        assert_eq!(row(&fm, 2)[4], 2021.0);
        // "District" sorts first and is dropped
        assert_eq!(row(&fm, 0)[5..], [1.0, 0.0]);
        assert_eq!(row(&fm, 2)[5..], [0.0, 0.0]);
        assert!(row(&fm, 2)[2].is_nan() && row(&fm, 2)[3].is_nan());
    }

    #[test]
    fn test_numeric_codes_drop_smallest_level() {
        let cfg = PreprocessConfig {
            target: "rent_sqm".into(),
            numerical_cols: vec![],
            categorical_cols: vec!["objektzustand".into()],
            temporal_cols: vec![],
            spatial_cols: vec![],
            grid_col: None,
            id_col: "obid".into(),
        };
        let input = df!(
            "rent_sqm" => [8.0, 9.0, 10.0, 11.0],
            "objektzustand" => [Some(10.0), Some(2.0), Some(3.0), None]
        )
        .unwrap();
        let fm = FeatureBuilder::new(&cfg).build(&input).unwrap();
        assert_eq!(fm.feature_names(), vec!["objektzustand_3", "objektzustand_10"]);
        assert_eq!(fm.values("objektzustand_10").unwrap(), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(fm.values("objektzustand_3").unwrap(), vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_configured_east_column_is_not_duplicated() {
        let mut cfg = preprocess();
        cfg.numerical_cols.push("east".into());
        let input = frame()
            .hstack(&[Column::new("east".into(), vec![1.0, 2.0, 3.0])])
            .unwrap();
        let fm = FeatureBuilder::new(&cfg).build(&input).unwrap();
        let names = fm.feature_names();
        assert_eq!(names.iter().filter(|n| *n == "east").count(), 1);
        assert_eq!(&names[..4], ["wohnflaeche", "east", "gid2019", "north"]);
        assert_eq!(fm.values("east").unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(fm.values("north").unwrap()[0], 3274.0);
    }

    #[test]
    fn test_non_numeric_feature_is_error() {
        let mut cfg = preprocess();
        cfg.numerical_cols.push("heizungsart".into());
        let err = FeatureBuilder::new(&cfg).build(&frame()).unwrap_err();
        assert!(matches!(err, PipelineError::NonNumericFeature { row: 0, .. }));
    }

    #[test]
    fn test_missing_feature_column_is_schema_error() {
        let mut cfg = preprocess();
        cfg.spatial_cols.push("kid2019".into());
        let err = FeatureBuilder::new(&cfg).build(&frame()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumns { stage: "features", .. }));
    }

    #[test]
    fn test_parse_year_formats() {
        assert_eq!(parse_year("2019m12"), Some(2019));
        assert_eq!(parse_year("2019m13"), None);
        assert_eq!(parse_year("2018"), Some(2018));
        assert_eq!(parse_year("15.06.2020"), Some(2020));
        assert_eq!(parse_year("2020-06-15 08:30:00"), Some(2020));
        assert_eq!(parse_year("Other missing"), None);
        assert_eq!(year_from_number(2017.0), Some(2017));
        assert_eq!(year_from_number(12.0), None);
    }

    #[test]
    fn test_split_grid_cell() {
        assert_eq!(split_grid_cell(Some("4334_3274")), (4334.0, 3274.0));
        let (east, north) = split_grid_cell(Some("4334"));
        assert_eq!(east, 4334.0);
        assert!(north.is_nan());
        assert!(split_grid_cell(None).0.is_nan());
    }

    #[test]
    fn test_take_rows() {
        let cfg = preprocess();
        let fm = FeatureBuilder::new(&cfg).build(&frame()).unwrap();
        let sub = fm.take(&[2, 0]).unwrap();
        assert_eq!(sub.target, vec![12.0, 8.5]);
        assert_eq!(sub.n_features(), fm.n_features());
        assert_eq!(sub.values("wohnflaeche").unwrap(), vec![80.0, 60.0]);
        assert!(fm.take(&[3]).is_err());
    }
}
