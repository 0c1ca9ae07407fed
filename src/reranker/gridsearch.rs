//! Exhaustive grid search over linear feature weights.
//!
//! ## Parameter Space
//!
//! Each weight is drawn from a discretized range (`np.arange`-style:
//! `start, start + step, …` below `stop`). A parameter vector is one
//! *combination* of `feature_num` distinct values, in increasing order, not
//! a cartesian product. With 301 values and 3 features that is ~4.5M
//! vectors, so this is only tractable for small feature sets (≤3).
//!
//! | Mode        | Range           | Execution                          |
//! |-------------|-----------------|------------------------------------|
//! | Serial      | `[0, 3.01)` .01 | one thread, lazy enumeration       |
//! | Parallel    | `[0, 1)` .01    | rayon pool, contiguous segments    |
//!
//! ## Tie-breaking
//!
//! Serial search only replaces the best on a strictly greater metric, so
//! the earliest parameter wins ties. The parallel merge also accepts an
//! exactly equal metric when the candidate has a smaller L2 norm, preferring
//! smaller weights. Equality is exact float equality: metrics are ratios of
//! small integer counts, so equal accuracies compare equal bit for bit.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{RerankModel, Reranker, TrainReport};
use crate::error::{RerankError, Result};
use crate::evaluator::Evaluator;
use crate::types::{Example, Hypothesis};

/// Discretized value range for each weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub start: f64,
    /// Exclusive
    pub stop: f64,
    pub step: f64,
}

impl GridSpec {
    pub const fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// `[0, 3.01)` step 0.01
    pub const fn serial() -> Self {
        Self::new(0.0, 3.01, 0.01)
    }

    /// `[0, 1)` step 0.01
    pub const fn parallel() -> Self {
        Self::new(0.0, 1.0, 0.01)
    }

    /// Grid values, `start + i * step` for every value below `stop`.
    pub fn values(&self) -> Vec<f64> {
        if !(self.step > 0.0) || self.stop <= self.start {
            return Vec::new();
        }
        let n = ((self.stop - self.start) / self.step).ceil() as usize;
        (0..n).map(|i| self.start + i as f64 * self.step).collect()
    }

    /// Lazily enumerate all `k`-combinations of the grid values.
    pub fn combinations(&self, k: usize) -> ParamCombinations {
        ParamCombinations::new(self.values(), k)
    }

    /// Number of parameter vectors for `k` features: C(n, k).
    pub fn space_size(&self, k: usize) -> u128 {
        binomial(self.values().len(), k)
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self::serial()
    }
}

fn binomial(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    (0..k).fold(1u128, |acc, i| acc * (n - i) as u128 / (i + 1) as u128)
}

/// Iterator over k-combinations in lexicographic index order.
#[derive(Debug, Clone)]
pub struct ParamCombinations {
    values: Vec<f64>,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl ParamCombinations {
    fn new(values: Vec<f64>, k: usize) -> Self {
        let done = k > values.len();
        Self {
            values,
            indices: (0..k).collect(),
            started: false,
            done,
        }
    }

    fn current(&self) -> Vec<f64> {
        self.indices.iter().map(|&i| self.values[i]).collect()
    }
}

impl Iterator for ParamCombinations {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.current());
        }

        let n = self.values.len();
        let k = self.indices.len();
        // Rightmost index that can still move right
        let Some(i) = (0..k).rev().find(|&i| self.indices[i] != i + n - k) else {
            self.done = true;
            return None;
        };

        self.indices[i] += 1;
        for j in i + 1..k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        Some(self.current())
    }
}

/// `hyp.score + param · feature_values`, feature values in registration order.
pub fn linear_score(hyp: &Hypothesis, param: &[f64]) -> Result<f64> {
    let values = hyp
        .rerank_feature_values
        .as_ref()
        .ok_or(RerankError::Uninitialized)?;
    if values.len() != param.len() {
        return Err(RerankError::ParameterLength {
            expected: values.len(),
            got: param.len(),
        });
    }
    let dot: f64 = param.iter().zip(values.values()).map(|(p, v)| p * v).sum();
    Ok(hyp.score + dot)
}

/// Best parameter found by one worker over its segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    /// `None` if nothing in the segment scored above 0
    pub best_param: Option<Vec<f64>>,
    pub best_score: f64,
}

fn squared_norm(param: &[f64]) -> f64 {
    param.iter().map(|p| p * p).sum()
}

/// Merge worker results: higher score wins, equal score with a smaller
/// norm wins. Starts from all-zero weights at `initial_performance`.
pub fn merge_segment_results(
    initial_performance: f64,
    feature_num: usize,
    results: impl IntoIterator<Item = SegmentResult>,
) -> (Vec<f64>, f64) {
    let mut best_score = initial_performance;
    let mut best_param = vec![0.0; feature_num];

    for result in results {
        let Some(param) = result.best_param else {
            continue;
        };
        #[allow(clippy::float_cmp)]
        let tie_with_smaller_norm =
            result.best_score == best_score && squared_norm(&param) < squared_norm(&best_param);
        if result.best_score > best_score || tie_with_smaller_norm {
            info!(?param, score = result.best_score, "merged new best parameter");
            best_param = param;
            best_score = result.best_score;
        }
    }

    (best_param, best_score)
}

impl Reranker {
    fn ensure_linear(&self, op: &'static str) -> Result<()> {
        match self.model {
            RerankModel::GridSearch { .. } => Ok(()),
            RerankModel::Boosted(_) => Err(RerankError::UnsupportedOperation {
                op,
                target: "the boosted reranker".to_string(),
            }),
        }
    }

    /// Serial grid search; keeps the earliest parameter among ties.
    pub fn train_grid_search(
        &mut self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        initial_performance: f64,
        grid: &GridSpec,
    ) -> Result<TrainReport> {
        self.ensure_linear("train_grid_search")?;
        self.filter_hyps_and_initialize_features(examples, decode_results)?;

        let k = self.feature_num();
        info!(
            feature_num = k,
            space_size = %grid.space_size(k),
            "starting grid search"
        );

        let mut best_score = initial_performance;
        let mut best_param = vec![0.0; k];
        let mut evaluated = 0;

        for param in grid.combinations(k) {
            let score =
                self.evaluate_initialized(examples, decode_results, evaluator, Some(&param), true, false)?;
            evaluated += 1;
            if score > best_score {
                info!(?param, score, "new best parameter");
                best_param = param;
                best_score = score;
            }
        }

        self.set_parameter(best_param)?;
        Ok(TrainReport {
            best_score,
            evaluated,
        })
    }

    /// Parallel grid search over the configured parallel grid, on
    /// `config.num_workers` threads.
    pub fn train_multiprocess(
        &mut self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        initial_performance: f64,
    ) -> Result<TrainReport> {
        let grid = self.config.parallel_grid;
        let num_workers = self.config.num_workers;
        self.train_multiprocess_with_grid(
            examples,
            decode_results,
            evaluator,
            initial_performance,
            num_workers,
            &grid,
        )
    }

    /// Parallel grid search.
    ///
    /// The parameter space is cut into contiguous segments of
    /// `len / num_workers / 5` vectors, spread over a pool of `num_workers`
    /// threads. Every worker borrows the same read-only inputs and returns
    /// its segment's best; merging happens after the pool drains.
    pub fn train_multiprocess_with_grid(
        &mut self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        initial_performance: f64,
        num_workers: usize,
        grid: &GridSpec,
    ) -> Result<TrainReport> {
        self.ensure_linear("train_multiprocess")?;
        self.filter_hyps_and_initialize_features(examples, decode_results)?;

        let k = self.feature_num();
        let param_space: Vec<Vec<f64>> = grid.combinations(k).collect();
        let num_workers = num_workers.max(1);
        let segment_size = (param_space.len() / num_workers / 5).max(1);
        info!(
            params = param_space.len(),
            segments = param_space.len().div_ceil(segment_size),
            num_workers,
            "generated parameter segments"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()
            .map_err(|e| RerankError::Model(format!("failed to build worker pool: {e}")))?;

        let ranker: &Reranker = self;
        let decode_results: &[Vec<Hypothesis>] = decode_results;
        let results = pool.install(|| {
            param_space
                .par_chunks(segment_size)
                .map(|segment| ranker.search_segment(examples, decode_results, evaluator, segment))
                .collect::<Result<Vec<_>>>()
        })?;

        let (best_param, best_score) = merge_segment_results(initial_performance, k, results);
        self.set_parameter(best_param)?;
        Ok(TrainReport {
            best_score,
            evaluated: param_space.len(),
        })
    }

    /// Worker body: best (param, score) within one segment.
    fn search_segment(
        &self,
        examples: &[Example],
        decode_results: &[Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        segment: &[Vec<f64>],
    ) -> Result<SegmentResult> {
        debug!(
            first = ?segment.first(),
            last = ?segment.last(),
            len = segment.len(),
            "worker picked up parameter segment"
        );

        let mut best = SegmentResult {
            best_param: None,
            best_score: 0.0,
        };
        for param in segment {
            let score =
                self.evaluate_initialized(examples, decode_results, evaluator, Some(param), true, false)?;
            if score > best.best_score {
                debug!(?param, score, "worker found new best");
                best.best_param = Some(param.clone());
                best.best_score = score;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{dataset, tokenizer};
    use super::*;
    use crate::config::RerankConfig;
    use crate::evaluator::ExactMatchEvaluator;
    use crate::features::Feature;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Accuracy is 0.5 at weight 0, 1.0 at weight 1, 0.5 at weight 2.
    fn weight_one_dataset() -> (Vec<Example>, Vec<Vec<Hypothesis>>) {
        dataset(&[
            &[("a", 0.0, false), ("a b", -0.5, true)],
            &[("a", 0.0, true), ("a b", -1.5, false)],
        ])
    }

    fn token_count_reranker() -> Reranker {
        Reranker::grid_search(vec![Feature::CodeTokenCount], None, tokenizer()).unwrap()
    }

    #[test]
    fn test_grid_values() {
        assert_eq!(GridSpec::serial().values().len(), 301);
        assert_eq!(GridSpec::parallel().values().len(), 100);
        assert_eq!(GridSpec::new(0.0, 3.0, 1.0).values(), vec![0.0, 1.0, 2.0]);
        assert!(GridSpec::new(1.0, 0.0, 0.1).values().is_empty());
        assert!(GridSpec::new(0.0, 1.0, 0.0).values().is_empty());
    }

    #[test]
    fn test_combinations_without_repetition() {
        let combos: Vec<_> = GridSpec::new(0.0, 4.0, 1.0).combinations(2).collect();
        assert_eq!(
            combos,
            vec![
                vec![0.0, 1.0],
                vec![0.0, 2.0],
                vec![0.0, 3.0],
                vec![1.0, 2.0],
                vec![1.0, 3.0],
                vec![2.0, 3.0],
            ]
        );
        assert_eq!(GridSpec::new(0.0, 4.0, 1.0).space_size(2), 6);
    }

    #[test]
    fn test_combinations_edge_cases() {
        let grid = GridSpec::new(0.0, 2.0, 1.0);
        assert_eq!(grid.combinations(3).count(), 0);
        assert_eq!(grid.combinations(0).collect::<Vec<_>>(), vec![Vec::<f64>::new()]);
        assert_eq!(grid.combinations(2).count(), 1);
        assert_eq!(GridSpec::serial().space_size(3), 4_499_950);
    }

    #[test]
    fn test_linear_score() {
        let mut hyp = Hypothesis::new("x", -1.0);
        assert!(matches!(linear_score(&hyp, &[1.0]), Err(RerankError::Uninitialized)));

        let mut values = crate::types::FeatureValues::new();
        values.insert("a", 2.0);
        values.insert("b", 3.0);
        hyp.rerank_feature_values = Some(values);

        assert!((linear_score(&hyp, &[0.5, 1.0]).unwrap() - 3.0).abs() < 1e-9);
        assert!(linear_score(&hyp, &[0.5]).is_err());
    }

    #[test]
    fn test_train_finds_known_optimum() {
        let mut reranker = token_count_reranker();
        let (examples, mut decode_results) = weight_one_dataset();

        let report = reranker
            .train_grid_search(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                0.0,
                &GridSpec::new(0.0, 3.0, 1.0),
            )
            .unwrap();

        assert_eq!(reranker.parameter(), Some(&[1.0][..]));
        assert_eq!(report.best_score, 1.0);
        assert_eq!(report.evaluated, 3);
    }

    #[test]
    fn test_train_keeps_zero_when_nothing_beats_initial() {
        let mut reranker = token_count_reranker();
        let (examples, mut decode_results) = weight_one_dataset();

        reranker
            .train_grid_search(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                1.0,
                &GridSpec::new(0.0, 3.0, 1.0),
            )
            .unwrap();
        assert_eq!(reranker.parameter(), Some(&[0.0][..]));
    }

    #[test]
    fn test_train_multiprocess_finds_known_optimum() {
        let mut reranker = token_count_reranker();
        let (examples, mut decode_results) = weight_one_dataset();

        let report = reranker
            .train_multiprocess_with_grid(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                0.0,
                2,
                &GridSpec::new(0.0, 3.0, 1.0),
            )
            .unwrap();

        assert_eq!(reranker.parameter(), Some(&[1.0][..]));
        assert_eq!(report.best_score, 1.0);
        assert_eq!(report.evaluated, 3);
    }

    #[test]
    fn test_merge_prefers_smaller_norm_on_tie() {
        let a = SegmentResult {
            best_param: Some(vec![0.5]),
            best_score: 0.8,
        };
        let b = SegmentResult {
            best_param: Some(vec![0.2]),
            best_score: 0.8,
        };

        let (param, score) = merge_segment_results(0.0, 1, vec![a.clone(), b.clone()]);
        assert_eq!(param, vec![0.2]);
        assert_eq!(score, 0.8);

        // Arrival order does not matter
        let (param, _) = merge_segment_results(0.0, 1, vec![b, a]);
        assert_eq!(param, vec![0.2]);
    }

    #[test]
    fn test_merge_skips_empty_segments() {
        let empty = SegmentResult {
            best_param: None,
            best_score: 0.0,
        };
        let (param, score) = merge_segment_results(0.3, 2, vec![empty]);
        assert_eq!(param, vec![0.0, 0.0]);
        assert_eq!(score, 0.3);
    }

    #[test]
    fn test_boosted_model_rejects_grid_search() {
        let mut reranker = Reranker::boosted(vec![Feature::CodeTokenCount], tokenizer()).unwrap();
        let (examples, mut decode_results) = weight_one_dataset();
        let err = reranker
            .train_multiprocess(&examples, &mut decode_results, &ExactMatchEvaluator, 0.0)
            .unwrap_err();
        assert!(matches!(err, RerankError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_train_multiprocess_uses_configured_workers() {
        let mut reranker = token_count_reranker().with_config(RerankConfig {
            num_workers: 3,
            parallel_grid: GridSpec::new(0.0, 3.0, 1.0),
            ..RerankConfig::default()
        });
        let (examples, mut decode_results) = weight_one_dataset();

        let pool_size = AtomicUsize::new(0);
        let recording = |e: &[Example], r: &[Vec<&Hypothesis>], fast: bool| {
            pool_size.fetch_max(rayon::current_num_threads(), AtomicOrdering::SeqCst);
            ExactMatchEvaluator.evaluate_dataset(e, r, fast)
        };

        let report = reranker
            .train_multiprocess(&examples, &mut decode_results, &recording, 0.0)
            .unwrap();

        assert_eq!(pool_size.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(reranker.parameter(), Some(&[1.0][..]));
        assert_eq!(report.best_score, 1.0);
    }
}
