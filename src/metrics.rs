//! Dataset-level metrics over reranked hypothesis lists.
//!
//! ## Metrics Overview
//!
//! | Metric          | What it measures                                   | Range   |
//! |-----------------|----------------------------------------------------|---------|
//! | Accuracy        | Top-ranked hypothesis is correct                   | 0.0-1.0 |
//! | Oracle accuracy | Any hypothesis in the list is correct              | 0.0-1.0 |
//! | MRR             | Reciprocal rank of the first correct hypothesis    | 0.0-1.0 |
//!
//! Accuracy is the number the grid search maximizes. Oracle accuracy is the
//! ceiling any reranker can reach on the same N-best lists; the gap between
//! the two is the headroom left for features.
//!
//! In fast mode each list holds only the selected hypothesis, so oracle
//! accuracy collapses to accuracy and MRR to accuracy as well.

use serde::{Deserialize, Serialize};

use crate::types::Hypothesis;

/// Aggregated metrics over a dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub accuracy: f64,
    pub oracle_accuracy: f64,
    pub mrr: f64,

    /// Number of examples evaluated (including empty lists)
    pub n_examples: usize,

    /// Standard deviation of per-example accuracy
    pub accuracy_std: f64,
}

impl EvalMetrics {
    /// Aggregate metrics from per-example results.
    pub fn aggregate(per_example: &[ExampleMetrics]) -> Self {
        if per_example.is_empty() {
            return Self::default();
        }

        let acc: Vec<_> = per_example.iter().map(|c| c.top1).collect();
        let oracle: Vec<_> = per_example.iter().map(|c| c.oracle).collect();
        let rr: Vec<_> = per_example.iter().map(|c| c.reciprocal_rank).collect();

        Self {
            accuracy: mean(&acc),
            oracle_accuracy: mean(&oracle),
            mrr: mean(&rr),
            n_examples: per_example.len(),
            accuracy_std: std_dev(&acc),
        }
    }
}

/// Metrics for one example's reranked list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleMetrics {
    pub top1: f64,
    pub oracle: f64,
    pub reciprocal_rank: f64,
}

impl ExampleMetrics {
    /// `ranking` is best-first. An empty list scores zero everywhere.
    pub fn compute(ranking: &[&Hypothesis]) -> Self {
        let first_correct = first_correct_rank(ranking);
        Self {
            top1: if first_correct == Some(0) { 1.0 } else { 0.0 },
            oracle: if first_correct.is_some() { 1.0 } else { 0.0 },
            reciprocal_rank: first_correct.map_or(0.0, |r| 1.0 / (r + 1) as f64),
        }
    }
}

/// Zero-based rank of the first correct hypothesis.
pub fn first_correct_rank(ranking: &[&Hypothesis]) -> Option<usize> {
    ranking.iter().position(|h| h.is_correct)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}
