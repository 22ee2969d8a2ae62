//! Model training and evaluation.
//!
//! Splitting, metrics and permutation importance work for any [`Regressor`].
//! The boosted-tree model itself lives behind the `xgboost` cargo feature.

#[cfg(feature = "xgboost")]
mod boosted;

#[cfg(feature = "xgboost")]
pub use boosted::BoostedModel;

use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::FeatureMatrix;

/// Anything that maps a frame of feature columns to one prediction per row
pub trait Regressor {
    fn predict(&self, features: &DataFrame) -> Result<Vec<f64>>;
}

/// Predicts the training-set mean for every row. Used as the reference score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanRegressor {
    mean: f64,
}

impl MeanRegressor {
    pub fn fit(target: &[f64]) -> Self {
        let mean = if target.is_empty() {
            0.0
        } else {
            target.iter().sum::<f64>() / target.len() as f64
        };
        Self { mean }
    }
}

impl Regressor for MeanRegressor {
    fn predict(&self, features: &DataFrame) -> Result<Vec<f64>> {
        Ok(vec![self.mean; features.height()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Shuffle `0..n` with a seeded generator and hold out `ceil(n * test_size)` rows.
/// The index vectors feed [`FeatureMatrix::take`].
pub fn train_validation_split(n: usize, test_size: f64, random_state: u64) -> Result<Split> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PipelineError::Training(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    let n_validation = (n as f64 * test_size).ceil() as usize;
    if n_validation == 0 || n_validation >= n {
        return Err(PipelineError::Training(format!(
            "cannot split {} rows with test_size {}",
            n, test_size
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(random_state);
    indices.shuffle(&mut rng);
    let train = indices.split_off(n_validation);
    Ok(Split {
        train,
        validation: indices,
    })
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    (sum / actual.len() as f64).sqrt()
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let sum: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
    sum / actual.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationMetrics {
    pub rmse: f64,
    pub mae: f64,
}

pub fn evaluate<R: Regressor + ?Sized>(model: &R, data: &FeatureMatrix) -> Result<ValidationMetrics> {
    let predicted = model.predict(&data.features)?;
    Ok(ValidationMetrics {
        rmse: rmse(&data.target, &predicted),
        mae: mae(&data.target, &predicted),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    /// Increase in RMSE when the feature is shuffled
    pub importance: f64,
}

/// Permutation importance on `data`: each feature column is shuffled in turn
/// and the RMSE increase over the unshuffled score is recorded.
pub fn permutation_importance<R: Regressor + ?Sized>(
    model: &R,
    data: &FeatureMatrix,
    seed: u64,
) -> Result<Vec<FeatureImportance>> {
    let baseline = rmse(&data.target, &model.predict(&data.features)?);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut importances = Vec::with_capacity(data.n_features());
    for feature in data.feature_names() {
        let mut values = data.values(&feature)?;
        values.shuffle(&mut rng);

        let mut permuted = data.features.clone();
        permuted.with_column(Column::new(feature.as_str().into(), values))?;
        let score = rmse(&data.target, &model.predict(&permuted)?);
        importances.push(FeatureImportance {
            feature,
            importance: score - baseline,
        });
    }
    Ok(rank_importances(importances))
}

/// Sort descending by importance, ties broken by feature name
pub fn rank_importances(mut importances: Vec<FeatureImportance>) -> Vec<FeatureImportance> {
    importances.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    importances
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
    pub train_rows: usize,
    pub validation_rows: usize,
    pub metrics: ValidationMetrics,
    /// Score of always predicting the training mean
    pub baseline: ValidationMetrics,
    pub importances: Vec<FeatureImportance>,
    pub rounds_trained: u32,
    pub best_iteration: u32,
    pub model_path: Option<PathBuf>,
}

/// Split, fit a boosted-tree regressor with early stopping, score it and rank features.
#[cfg(feature = "xgboost")]
pub fn train(features: &FeatureMatrix, config: &TrainingConfig) -> Result<TrainingOutcome> {
    use crate::observability::{emit_gauge, MetricName};
    use tracing::info;

    if features.n_features() == 0 {
        return Err(PipelineError::Training("no feature columns to train on".into()));
    }
    let split = train_validation_split(features.n_rows(), config.test_size, config.random_state)?;
    let train_set = features.take(&split.train)?;
    let validation_set = features.take(&split.validation)?;
    info!(
        "🏋️ Training on {} rows, validating on {} rows, {} features",
        train_set.n_rows(),
        validation_set.n_rows(),
        features.n_features()
    );

    let model = BoostedModel::fit(&train_set, &validation_set, config)?;
    let metrics = evaluate(&model, &validation_set)?;
    let baseline = evaluate(&MeanRegressor::fit(&train_set.target), &validation_set)?;
    let importances = permutation_importance(&model, &validation_set, config.random_state)?;

    let model_path = match &config.model_path {
        Some(path) => {
            model.save(path)?;
            info!("💾 Saved model to {}", path.display());
            Some(path.clone())
        }
        None => None,
    };

    let outcome = TrainingOutcome {
        train_rows: train_set.n_rows(),
        validation_rows: validation_set.n_rows(),
        metrics,
        baseline,
        importances,
        rounds_trained: model.rounds_trained,
        best_iteration: model.best_iteration,
        model_path,
    };
    emit_gauge(MetricName::TrainingValidationRmse, outcome.metrics.rmse);
    emit_gauge(MetricName::TrainingValidationMae, outcome.metrics.mae);
    info!(
        "📈 Validation RMSE {:.4}, MAE {:.4} (mean baseline RMSE {:.4})",
        outcome.metrics.rmse, outcome.metrics.mae, outcome.baseline.rmse
    );
    Ok(outcome)
}

#[cfg(not(feature = "xgboost"))]
pub fn train(_features: &FeatureMatrix, _config: &TrainingConfig) -> Result<TrainingOutcome> {
    Err(PipelineError::FeatureDisabled("xgboost"))
}
