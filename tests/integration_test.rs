use anyhow::Result;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use rent_panel::frame::{column, column_names, float_values, text_values};
use rent_panel::pipeline::ingestion::load_csv;
use rent_panel::pipeline::{dedupe_file, Pipeline};
use rent_panel::{Config, Deduplicator, PipelineError};

const PANEL: &str = "\
obid,spell,laufzeittage,rent_sqm,wohnflaeche,heizungsart,gid2019,mietekalt
1,1,10,8.5,60,Gas,1001000,500
1,2,10,8.5,60,Gas,1001000,500
2,1,10,10,75,Oil,2000000,700
2,2,20,10,75,Oil,2000000,700
3,1,5,12,80,Gas,2000000,900
3,1,7,12,80,Other missing,2000000,900
4,1,400,9,50,Gas,1001000,450
5,1,30,11,70,Oil,9999999,800
";

const REGISTRY: &str = "\
ags,name,einwohner
01001000,Flensburg,89934
02000000,Hamburg,1852478
";

fn write_fixture(dir: &Path) -> Result<Config> {
    let panel = dir.join("panel.csv");
    let registry = dir.join("registry.csv");
    fs::write(&panel, PANEL)?;
    fs::write(&registry, REGISTRY)?;

    let toml = format!(
        r#"
[input]
path = '{panel}'

[preprocess]
target = "rent_sqm"
numerical_cols = ["wohnflaeche"]
categorical_cols = ["heizungsart"]
spatial_cols = ["gid2019"]

[[geo.joins]]
name = "municipal_registry"
path = '{registry}'
left_key = "gid2019"
right_key = "ags"
columns = ["einwohner"]

[output]
dir = '{out}'
"#,
        panel = panel.display(),
        registry = registry.display(),
        out = dir.join("out").display(),
    );
    let config_path = dir.join("config.toml");
    fs::write(&config_path, toml)?;
    Ok(Config::load(&config_path)?)
}

#[test]
fn test_clean_run_end_to_end() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = write_fixture(temp_dir.path())?;

    let report = Pipeline::new(&config).run_clean()?;

    assert_eq!(report.rows_loaded, 8);
    assert_eq!(report.dedup.exact_duplicates_removed, 1);
    assert_eq!(report.dedup.near_duplicates_merged, 1);
    assert_eq!(report.dedup.ids_renamed, 1);
    assert_eq!(report.dedup.output_rows, 6);
    let normalize = report.normalize.as_ref().expect("normalize stats");
    assert_eq!(normalize.missing_tokens_replaced, 1);
    assert_eq!(normalize.rows_out_of_range, 1);
    assert_eq!(normalize.rows_incomplete, 1);
    assert_eq!(report.geo_joins[0].matched, 3);
    assert_eq!(report.geo_joins[0].unmatched, 1);
    assert_eq!(report.rows_exported, 3);
    assert_eq!(report.input_sha256.len(), 64);

    let cleaned = load_csv(&config.cleaned_csv_path(), ',')?.frame;
    assert_eq!(
        column_names(&cleaned),
        vec!["obid", "spell", "laufzeittage", "rent_sqm", "wohnflaeche", "heizungsart", "gid2019", "einwohner"]
    );
    let text = |name: &str| -> Result<Vec<String>> {
        Ok(text_values(column(&cleaned, "test", name)?)?.into_iter().flatten().collect())
    };
    let numbers = |name: &str| -> Result<Vec<Option<f64>>> { Ok(float_values(column(&cleaned, "test", name)?)?) };
    assert_eq!(text("obid")?, vec!["1", "2", "3"]);
    assert_eq!(text("heizungsart")?, vec!["Gas", "Oil", "Gas"]);
    assert_eq!(text("einwohner")?, vec!["89934", "1852478", "1852478"]);
    assert_eq!(numbers("laufzeittage")?, vec![Some(10.0), Some(15.0), Some(5.0)]);
    assert_eq!(numbers("rent_sqm")?, vec![Some(8.5), Some(10.0), Some(12.0)]);
    assert_eq!(numbers("gid2019")?, vec![Some(1001000.0), Some(2000000.0), Some(2000000.0)]);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(config.run_report_path())?)?;
    assert_eq!(json["command"], "clean");
    assert_eq!(json["rows_exported"], 3);
    assert_eq!(json["geo_joins"][0]["name"], "municipal_registry");

    Ok(())
}

#[test]
fn test_clean_stages_report_lineage() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = write_fixture(temp_dir.path())?;

    let run = Pipeline::new(&config).clean("clean")?;
    assert_eq!(
        run.lineage,
        vec![vec![0, 1], vec![2, 3], vec![4], vec![5], vec![6], vec![7]]
    );
    // nothing is written before export
    assert!(!config.cleaned_csv_path().exists());
    Ok(())
}

#[test]
fn test_clean_fails_on_missing_required_column() -> Result<()> {
    let temp_dir = tempdir()?;
    let mut config = write_fixture(temp_dir.path())?;
    config.preprocess.numerical_cols.push("baujahr".into());

    let err = Pipeline::new(&config).run_clean().unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumns { stage: "selector", .. }));
    assert!(!config.run_report_path().exists());
    Ok(())
}

#[cfg(not(feature = "xgboost"))]
#[test]
fn test_training_requires_boosted_feature() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = write_fixture(temp_dir.path())?;

    let err = Pipeline::new(&config).run_training().unwrap_err();
    assert!(matches!(err, PipelineError::FeatureDisabled(_)));
    Ok(())
}

#[test]
fn test_dedupe_file_with_custom_columns() -> Result<()> {
    let temp_dir = tempdir()?;
    let input = temp_dir.path().join("listings.csv");
    let output = temp_dir.path().join("deduped").join("listings.csv");
    fs::write(
        &input,
        "unit;wave;days;kind\n7;1;10;A\n7;2;20;A\n7;1;5;B\n7_2;1;3;C\n",
    )?;

    let dedup = Deduplicator::new("unit", "wave", "days");
    let stats = dedupe_file(&input, &output, &dedup, ';')?;

    assert_eq!(stats.input_rows, 4);
    assert_eq!(stats.near_duplicates_merged, 1);
    assert_eq!(stats.ids_renamed, 1);
    assert_eq!(
        fs::read_to_string(&output)?,
        "unit;wave;days;kind\n7;1;15;A\n7_3;1;5;B\n7_2;1;3;C\n"
    );
    Ok(())
}
