//! Column access helpers shared by the pipeline stages.
//!
//! Raw input is loaded with every column as text. Stages read cells either as
//! text or as floats through these helpers, so a column keeps working whether
//! the normalizer has already converted it to numbers or not.

use polars::prelude::*;

use crate::error::{PipelineError, Result};

pub fn has_column(frame: &DataFrame, name: &str) -> bool {
    frame.get_column_index(name).is_some()
}

/// Fail with every listed column that `frame` lacks
pub fn require_columns(frame: &DataFrame, stage: &'static str, names: &[&str]) -> Result<()> {
    let mut missing: Vec<String> = Vec::new();
    for name in names {
        if !has_column(frame, name) && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::missing_columns(stage, missing))
    }
}

pub fn column_index(frame: &DataFrame, stage: &'static str, name: &str) -> Result<usize> {
    frame
        .get_column_index(name)
        .ok_or_else(|| PipelineError::missing_columns(stage, vec![name.to_string()]))
}

pub fn column<'a>(frame: &'a DataFrame, stage: &'static str, name: &str) -> Result<&'a Series> {
    let idx = column_index(frame, stage, name)?;
    Ok(frame.get_columns()[idx].as_materialized_series())
}

pub fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

/// Trimmed, finite number
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Whole numbers below 1e15 print without a fraction
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Cells as floats. Text that does not parse reads as `None`.
pub fn float_values(series: &Series) -> Result<Vec<Option<f64>>> {
    if series.dtype() == &DataType::String {
        return Ok(series.str()?.into_iter().map(|v| v.and_then(parse_number)).collect());
    }
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|n| n.is_finite()))
        .collect())
}

/// Cells as text, with floats printed by [`format_number`]
pub fn text_values(series: &Series) -> Result<Vec<Option<String>>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()),
        DataType::Float32 | DataType::Float64 => Ok(float_values(series)?
            .into_iter()
            .map(|v| v.map(format_number))
            .collect()),
        _ => {
            let cast = series.cast(&DataType::String)?;
            Ok(cast.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
        }
    }
}

/// Copy of `frame` with every column as text
pub fn to_text_frame(frame: &DataFrame) -> Result<DataFrame> {
    let columns = frame
        .get_columns()
        .iter()
        .map(|c| {
            let series = c.as_materialized_series();
            if series.dtype() == &DataType::String {
                return Ok(c.clone());
            }
            Ok(Column::new(c.name().clone(), text_values(series)?))
        })
        .collect::<Result<Vec<Column>>>()?;
    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(15.0), "15");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(12.5), "12.5");
        assert_eq!(format_number(1e16), "10000000000000000");
    }

    #[test]
    fn test_float_and_text_views() {
        let text = Series::new("a".into(), &[Some(" 8.5 "), Some("Gas"), None, Some("inf")]);
        assert_eq!(float_values(&text).unwrap(), vec![Some(8.5), None, None, None]);

        let numbers = Series::new("b".into(), &[Some(1001000.0), None, Some(0.5)]);
        assert_eq!(
            text_values(&numbers).unwrap(),
            vec![Some("1001000".to_string()), None, Some("0.5".to_string())]
        );
    }

    #[test]
    fn test_require_columns_lists_all_missing() {
        let frame = df!("obid" => ["1"]).unwrap();
        match require_columns(&frame, "dedup", &["obid", "spell", "laufzeittage", "spell"]) {
            Err(PipelineError::MissingColumns { stage, columns }) => {
                assert_eq!(stage, "dedup");
                assert_eq!(columns, vec!["spell".to_string(), "laufzeittage".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_to_text_frame_keeps_names_and_nulls() {
        let frame = df!("obid" => ["1", "2"], "rent_sqm" => [Some(8.0), None]).unwrap();
        let text = to_text_frame(&frame).unwrap();
        assert_eq!(column_names(&text), vec!["obid", "rent_sqm"]);
        assert_eq!(
            text_values(column(&text, "test", "rent_sqm").unwrap()).unwrap(),
            vec![Some("8".to_string()), None]
        );
    }
}
