use polars::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::observability::{emit_counter, emit_histogram, MetricName};

/// A loaded input file together with its content fingerprint
#[derive(Debug, Clone)]
pub struct LoadedFrame {
    pub frame: DataFrame,
    /// Hex SHA-256 of the raw file bytes
    pub sha256: String,
}

/// Read a delimited file with a header row. Every column is loaded as text.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_csv(path: &Path, delimiter: char) -> Result<LoadedFrame> {
    let started = std::time::Instant::now();

    let bytes = fs::read(path)?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let frame = parse_csv(bytes, delimiter)?;

    emit_counter(MetricName::RowsLoaded, frame.height() as u64);
    emit_histogram(MetricName::LoadDuration, started.elapsed().as_secs_f64());
    info!(
        "📥 Loaded {} rows and {} columns from {}",
        frame.height(),
        frame.width(),
        path.display()
    );
    debug!("Input sha256 {}", sha256);

    Ok(LoadedFrame { frame, sha256 })
}

/// Parse delimited bytes. Empty cells become nulls; header names are trimmed.
pub fn parse_csv(bytes: Vec<u8>, delimiter: char) -> Result<DataFrame> {
    if !delimiter.is_ascii() {
        return Err(PipelineError::Config(format!(
            "delimiter '{}' must be a single ASCII character",
            delimiter
        )));
    }

    let mut frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|options| options.with_separator(delimiter as u8))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;

    let headers: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|h| h.as_str().trim().trim_start_matches('\u{feff}').to_string())
        .collect();
    frame.set_column_names(headers)?;

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{column, column_names, text_values};
    use std::io::Write;

    #[test]
    fn test_parse_csv_reads_text_and_nulls() {
        let frame = parse_csv(b"obid,spell,heizungsart\n1,1,Gas\n2,,Other missing\n".to_vec(), ',').unwrap();
        assert_eq!(column_names(&frame), vec!["obid", "spell", "heizungsart"]);
        assert_eq!(frame.height(), 2);
        assert!(frame.get_columns().iter().all(|c| c.dtype() == &DataType::String));
        assert_eq!(
            text_values(column(&frame, "test", "spell").unwrap()).unwrap(),
            vec![Some("1".to_string()), None]
        );
        assert_eq!(
            text_values(column(&frame, "test", "heizungsart").unwrap()).unwrap()[1].as_deref(),
            Some("Other missing")
        );
    }

    #[test]
    fn test_parse_csv_keeps_leading_zeros() {
        let frame = parse_csv(b"ags;rent_sqm\n01001000;8.5\n".to_vec(), ';').unwrap();
        let ags = text_values(column(&frame, "test", "ags").unwrap()).unwrap();
        assert_eq!(ags[0].as_deref(), Some("01001000"));
    }

    #[test]
    fn test_parse_csv_trims_header_names() {
        let frame = parse_csv(b" obid , spell\n1,1\n".to_vec(), ',').unwrap();
        assert_eq!(column_names(&frame), vec!["obid", "spell"]);
    }

    #[test]
    fn test_parse_csv_rejects_non_ascii_delimiter() {
        assert!(matches!(
            parse_csv(b"a\n1\n".to_vec(), '§'),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_load_csv_fingerprints_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "obid,spell\n1,1\n").unwrap();
        let loaded = load_csv(file.path(), ',').unwrap();
        assert_eq!(loaded.frame.height(), 1);
        assert_eq!(loaded.sha256.len(), 64);
        assert_eq!(loaded.sha256, hex::encode(Sha256::digest(b"obid,spell\n1,1\n")));
    }
}
