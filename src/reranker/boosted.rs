//! Pairwise gradient-boosted ranking.
//!
//! Each hypothesis becomes one row `[parser_score, feature values…]` with
//! label 1 if correct, else 0. Rows are grouped per example: only
//! hypotheses of the same example compete against each other.
//!
//! ## Training
//!
//! LambdaRank-style boosting. Each round computes, per group, pairwise
//! RankNet gradients weighted by the NDCG change of swapping the pair:
//!
//! ```text
//! λᵢ += ρᵢⱼ · |ΔNDCGᵢⱼ|    λⱼ -= ρᵢⱼ · |ΔNDCGᵢⱼ|    for yᵢ > yⱼ
//! ρᵢⱼ = 1 / (1 + exp(sᵢ - sⱼ))
//! ```
//!
//! A single regression tree (from `gbdt`) is fit to the λ targets and
//! added to the ensemble with the learning rate. Scores only matter within
//! a group, so any per-tree constant offset is harmless.

use std::fmt;
use std::iter;

use gbdt::config::Config as GbdtConfig;
use gbdt::decision_tree::{Data, DataVec, ValueType};
use gbdt::gradient_boost::GBDT;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{RerankModel, Reranker, TrainReport};
use crate::error::{RerankError, Result};
use crate::evaluator::Evaluator;
use crate::types::{Example, Hypothesis};

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BoostParams {
    pub learning_rate: f64,
    pub max_depth: u32,
    pub n_estimators: usize,
    pub min_leaf_size: usize,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_depth: 4,
            n_estimators: 5,
            min_leaf_size: 1,
        }
    }
}

/// Training rows, labels and per-example group sizes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    /// Row count per non-empty example, in example order
    pub group: Vec<usize>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.x.len()
    }

    pub fn n_features(&self) -> usize {
        self.x.first().map_or(0, Vec::len)
    }
}

/// `[hyp.score] ++ feature values` for an initialized hypothesis.
pub fn feature_vector(hyp: &Hypothesis) -> Result<Vec<f64>> {
    let values = hyp
        .rerank_feature_values
        .as_ref()
        .ok_or(RerankError::Uninitialized)?;
    Ok(iter::once(hyp.score).chain(values.values()).collect())
}

/// Stack all hypotheses into a matrix. Empty examples add no rows and no
/// group entry.
pub fn get_feature_matrix(decode_results: &[Vec<Hypothesis>]) -> Result<FeatureMatrix> {
    let mut matrix = FeatureMatrix::default();
    for hyps in decode_results.iter().filter(|hyps| !hyps.is_empty()) {
        for hyp in hyps {
            matrix.x.push(feature_vector(hyp)?);
            matrix.y.push(if hyp.is_correct { 1.0 } else { 0.0 });
        }
        matrix.group.push(hyps.len());
    }
    Ok(matrix)
}

#[derive(Default, Serialize, Deserialize)]
pub struct BoostedRanker {
    params: BoostParams,
    n_features: usize,
    stages: Vec<GBDT>,
}

impl fmt::Debug for BoostedRanker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoostedRanker")
            .field("params", &self.params)
            .field("n_features", &self.n_features)
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl BoostedRanker {
    pub fn new(params: BoostParams) -> Self {
        Self {
            params,
            n_features: 0,
            stages: Vec::new(),
        }
    }

    pub fn params(&self) -> &BoostParams {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: BoostParams) {
        self.params = params;
    }

    pub fn is_fitted(&self) -> bool {
        !self.stages.is_empty()
    }

    fn stage_config(&self, n_features: usize) -> GbdtConfig {
        let mut cfg = GbdtConfig::new();
        cfg.set_feature_size(n_features);
        cfg.set_max_depth(self.params.max_depth);
        cfg.set_min_leaf_size(self.params.min_leaf_size);
        cfg.set_iterations(1);
        cfg.set_shrinkage(1.0);
        cfg.set_loss("SquaredError");
        cfg.set_data_sample_ratio(1.0);
        cfg.set_feature_sample_ratio(1.0);
        cfg.set_training_optimization_level(2);
        cfg
    }

    /// Fit the ensemble on a grouped matrix, replacing any previous fit.
    pub fn fit(&mut self, matrix: &FeatureMatrix) -> Result<()> {
        if matrix.n_rows() == 0 {
            return Err(RerankError::EmptyTrainingSet);
        }
        let n_features = matrix.n_features();
        let cfg = self.stage_config(n_features);
        let lr = self.params.learning_rate;

        let mut scores = vec![0.0; matrix.n_rows()];
        let mut stages = Vec::with_capacity(self.params.n_estimators);
        for round in 0..self.params.n_estimators {
            let lambdas = lambda_gradients(&scores, &matrix.y, &matrix.group);

            let mut data: DataVec = matrix
                .x
                .iter()
                .zip(&lambdas)
                .map(|(row, &g)| Data::new_training_data(to_values(row), 1.0, g as ValueType, None))
                .collect();

            let mut stage = GBDT::new(&cfg);
            stage.fit(&mut data);
            for (s, p) in scores.iter_mut().zip(stage.predict(&data)) {
                *s += lr * f64::from(p);
            }
            debug!(round, "fitted boosting stage");
            stages.push(stage);
        }

        self.n_features = n_features;
        self.stages = stages;
        Ok(())
    }

    /// Predict ranking scores for rows of the same layout as training.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(RerankError::Model("boosted ranker has not been fitted".to_string()));
        }
        if let Some(row) = x.iter().find(|row| row.len() != self.n_features) {
            return Err(RerankError::Model(format!(
                "expected {} columns, got {}",
                self.n_features,
                row.len()
            )));
        }

        let data: DataVec = x
            .iter()
            .map(|row| Data::new_test_data(to_values(row), None))
            .collect();

        let mut out = vec![0.0; x.len()];
        for stage in &self.stages {
            for (o, p) in out.iter_mut().zip(stage.predict(&data)) {
                *o += self.params.learning_rate * f64::from(p);
            }
        }
        Ok(out)
    }

    /// One-row prediction for a single hypothesis.
    pub fn score_hypothesis(&self, hyp: &Hypothesis) -> Result<f64> {
        let row = feature_vector(hyp)?;
        Ok(self.predict(&[row])?[0])
    }
}

fn to_values(row: &[f64]) -> Vec<ValueType> {
    row.iter().map(|&v| v as ValueType).collect()
}

fn gain(label: f64) -> f64 {
    2f64.powf(label) - 1.0
}

fn discount(position: usize) -> f64 {
    1.0 / ((position + 2) as f64).log2()
}

fn ideal_dcg(labels: &[f64]) -> f64 {
    let mut sorted = labels.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    sorted
        .iter()
        .enumerate()
        .map(|(pos, &y)| gain(y) * discount(pos))
        .sum()
}

/// Per-row λ gradients for the current scores.
fn lambda_gradients(scores: &[f64], labels: &[f64], group: &[usize]) -> Vec<f64> {
    let mut lambdas = vec![0.0; scores.len()];
    let mut start = 0;

    for &size in group {
        let end = start + size;
        let s = &scores[start..end];
        let y = &labels[start..end];

        let ideal = ideal_dcg(y);
        if ideal > 0.0 {
            let mut order: Vec<usize> = (0..size).collect();
            order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));
            let mut rank = vec![0; size];
            for (pos, &i) in order.iter().enumerate() {
                rank[i] = pos;
            }

            for i in 0..size {
                for j in 0..size {
                    if y[i] <= y[j] {
                        continue;
                    }
                    let delta = ((gain(y[i]) - gain(y[j])) * (discount(rank[i]) - discount(rank[j])))
                        .abs()
                        / ideal;
                    let rho = 1.0 / (1.0 + (s[i] - s[j]).exp());
                    lambdas[start + i] += rho * delta;
                    lambdas[start + j] -= rho * delta;
                }
            }
        }

        start = end;
    }

    lambdas
}

impl Reranker {
    /// Initialize features, fit the boosted ranker once, and report the
    /// fast-mode metric of the fitted model.
    pub fn train_boosted(
        &mut self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
    ) -> Result<TrainReport> {
        self.filter_hyps_and_initialize_features(examples, decode_results)?;
        let matrix = get_feature_matrix(decode_results)?;
        info!(
            rows = matrix.n_rows(),
            groups = matrix.group.len(),
            columns = matrix.n_features(),
            "fitting boosted ranker"
        );

        match &mut self.model {
            RerankModel::Boosted(ranker) => ranker.fit(&matrix)?,
            RerankModel::GridSearch { .. } => {
                return Err(RerankError::UnsupportedOperation {
                    op: "train_boosted",
                    target: "the grid search reranker".to_string(),
                });
            }
        }

        let score = self.evaluate_initialized(examples, decode_results, evaluator, None, true, false)?;
        info!(score, "boosted ranker fitted");
        Ok(TrainReport {
            best_score: score,
            evaluated: 1,
        })
    }
}
