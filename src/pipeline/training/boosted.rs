use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};
use xgboost::parameters::learning::{LearningTaskParametersBuilder, Objective};
use xgboost::parameters::tree::TreeBoosterParametersBuilder;
use xgboost::parameters::{BoosterParameters, BoosterParametersBuilder, BoosterType};
use xgboost::{Booster, DMatrix};

use super::{rmse, Regressor};
use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::FeatureMatrix;

fn training_error(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Training(err.to_string())
}

/// Gradient-boosted regression trees
pub struct BoostedModel {
    booster: Booster,
    pub rounds_trained: u32,
    /// Zero-based round with the lowest validation RMSE
    pub best_iteration: u32,
}

impl BoostedModel {
    /// Boost on `train` while watching RMSE on `validation`. Stops once
    /// `early_stopping_rounds` rounds pass without improvement, then refits
    /// up to the best round so the kept model matches the reported score.
    pub fn fit(train: &FeatureMatrix, validation: &FeatureMatrix, config: &TrainingConfig) -> Result<Self> {
        let params = booster_params(config)?;
        let dtrain = to_dmatrix(&train.features, Some(&train.target))?;
        let dvalid = to_dmatrix(&validation.features, None)?;

        let mut booster = Booster::new_with_cached_dmats(&params, &[&dtrain, &dvalid]).map_err(training_error)?;
        let mut best_score = f64::INFINITY;
        let mut best_iteration = 0u32;
        let mut rounds_trained = 0u32;

        for round in 0..config.num_boost_round {
            booster.update(&dtrain, round as i32).map_err(training_error)?;
            rounds_trained = round + 1;

            let predicted = widen(booster.predict(&dvalid).map_err(training_error)?);
            let score = rmse(&validation.target, &predicted);
            debug!("round {} validation rmse {:.5}", round, score);

            if score < best_score {
                best_score = score;
                best_iteration = round;
            } else if round - best_iteration >= config.early_stopping_rounds {
                info!(
                    "⏹️ Early stopping at round {} (best round {}, rmse {:.4})",
                    round, best_iteration, best_score
                );
                break;
            }
        }

        if best_iteration + 1 < rounds_trained {
            booster = Booster::new_with_cached_dmats(&params, &[&dtrain]).map_err(training_error)?;
            for round in 0..=best_iteration {
                booster.update(&dtrain, round as i32).map_err(training_error)?;
            }
        }

        Ok(Self {
            booster,
            rounds_trained,
            best_iteration,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.booster.save(path).map_err(training_error)
    }
}

impl Regressor for BoostedModel {
    fn predict(&self, features: &DataFrame) -> Result<Vec<f64>> {
        let dmat = to_dmatrix(features, None)?;
        Ok(widen(self.booster.predict(&dmat).map_err(training_error)?))
    }
}

fn booster_params(config: &TrainingConfig) -> Result<BoosterParameters> {
    let p = &config.params;
    let tree = TreeBoosterParametersBuilder::default()
        .eta(p.learning_rate)
        .max_depth(p.max_depth)
        .min_child_weight(p.min_child_weight)
        .subsample(p.subsample)
        .colsample_bytree(p.colsample_bytree)
        .lambda(p.lambda)
        .alpha(p.alpha)
        .build()
        .map_err(training_error)?;

    let mut learning = LearningTaskParametersBuilder::default();
    learning.objective(Objective::RegLinear);
    if let Some(seed) = config.seed {
        learning.seed(seed);
    }
    let learning = learning.build().map_err(training_error)?;

    BoosterParametersBuilder::default()
        .booster_type(BoosterType::Tree(tree))
        .learning_params(learning)
        .verbose(false)
        .build()
        .map_err(training_error)
}

/// Row-major f32 matrix; NaN marks a missing value
fn to_dmatrix(features: &DataFrame, labels: Option<&[f64]>) -> Result<DMatrix> {
    if features.height() == 0 {
        return Err(PipelineError::Training("cannot build a matrix with no rows".into()));
    }
    let array = features.to_ndarray::<Float32Type>(IndexOrder::C)?;
    let flat = array
        .as_slice()
        .ok_or_else(|| PipelineError::Training("feature matrix is not contiguous".into()))?;
    let mut dmat = DMatrix::from_dense(flat, features.height()).map_err(training_error)?;
    if let Some(labels) = labels {
        let labels: Vec<f32> = labels.iter().map(|&v| v as f32).collect();
        dmat.set_labels(&labels).map_err(training_error)?;
    }
    Ok(dmat)
}

fn widen(values: Vec<f32>) -> Vec<f64> {
    values.into_iter().map(f64::from).collect()
}
