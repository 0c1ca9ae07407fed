//! The reranker: feature set + scoring model over N-best lists.
//!
//! ## Pipeline
//!
//! ```text
//! decode results ─► filter ─► init features ─► score ─► sort ─► evaluator
//!                   (drop      (batched pass,    (linear or
//!                   untokeniz-  then scalar      boosted)
//!                   able/empty) pass, cached)
//! ```
//!
//! Filtering and initialization run once per set of decode results. The
//! "already initialized" check looks at the first hypothesis; since
//! initialization commits all lists at once, the first hypothesis being
//! initialized means every hypothesis is.
//!
//! ## Models
//!
//! | Variant      | Score                                  | Training                  |
//! |--------------|----------------------------------------|---------------------------|
//! | `GridSearch` | `hyp.score + param · feature_values`   | exhaustive grid search    |
//! | `Boosted`    | boosted-tree prediction on `[score, features…]` | pairwise boosting |

pub mod boosted;
pub mod gridsearch;
pub mod persist;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::RerankConfig;
use crate::error::{RerankError, Result};
use crate::evaluator::Evaluator;
use crate::features::{Feature, FeatureContext};
use crate::transition::TransitionSystem;
use crate::types::{Example, FeatureValues, HypExample, Hypothesis};

pub use boosted::{BoostParams, BoostedRanker, FeatureMatrix, get_feature_matrix};
pub use gridsearch::{GridSpec, ParamCombinations, SegmentResult, merge_segment_results};

/// Scoring model owned by a reranker.
#[derive(Debug)]
pub enum RerankModel {
    /// Linear weights, one per feature in registration order
    GridSearch { parameter: Vec<f64> },
    Boosted(BoostedRanker),
}

impl RerankModel {
    pub fn kind(&self) -> &'static str {
        match self {
            RerankModel::GridSearch { .. } => "grid_search",
            RerankModel::Boosted(_) => "boosted",
        }
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainReport {
    /// Metric of the selected parameter (or fitted model) in fast mode
    pub best_score: f64,
    /// Number of parameter vectors / models evaluated
    pub evaluated: usize,
}

pub struct Reranker {
    features: Vec<Feature>,
    feat_map: HashMap<String, usize>,
    /// Indices into `features` of batched features, registration order
    batched: Vec<usize>,
    transition_system: Arc<dyn TransitionSystem>,
    model: RerankModel,
    config: RerankConfig,
}

impl fmt::Debug for Reranker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reranker")
            .field("features", &self.feature_names())
            .field("transition_system", &self.transition_system.name())
            .field("model", &self.model)
            .finish()
    }
}

impl Reranker {
    /// Linear reranker. `parameter` defaults to all zeros.
    pub fn grid_search(
        features: Vec<Feature>,
        parameter: Option<Vec<f64>>,
        transition_system: Arc<dyn TransitionSystem>,
    ) -> Result<Self> {
        let n = features.len();
        let parameter = parameter.unwrap_or_else(|| vec![0.0; n]);
        if parameter.len() != n {
            return Err(RerankError::ParameterLength {
                expected: n,
                got: parameter.len(),
            });
        }
        Self::build(features, transition_system, RerankModel::GridSearch { parameter })
    }

    /// Boosted-tree reranker, unfitted.
    pub fn boosted(
        features: Vec<Feature>,
        transition_system: Arc<dyn TransitionSystem>,
    ) -> Result<Self> {
        let config = RerankConfig::default();
        let model = RerankModel::Boosted(BoostedRanker::new(config.boost.clone()));
        Self::build(features, transition_system, model)
    }

    pub(crate) fn build(
        features: Vec<Feature>,
        transition_system: Arc<dyn TransitionSystem>,
        model: RerankModel,
    ) -> Result<Self> {
        let mut feat_map = HashMap::with_capacity(features.len());
        let mut batched = Vec::new();
        for (i, feat) in features.iter().enumerate() {
            let name = feat.feature_name().to_string();
            if feat_map.insert(name.clone(), i).is_some() {
                return Err(RerankError::DuplicateFeature(name));
            }
            if feat.is_batched() {
                batched.push(i);
            }
        }

        Ok(Self {
            features,
            feat_map,
            batched,
            transition_system,
            model,
            config: RerankConfig::default(),
        })
    }

    /// Apply batch size, grids, worker count, and (for an unfitted boosted
    /// model) boosting hyperparameters.
    pub fn with_config(mut self, config: RerankConfig) -> Self {
        if let RerankModel::Boosted(ranker) = &mut self.model {
            if !ranker.is_fitted() {
                ranker.set_params(config.boost.clone());
            }
        }
        self.config = config;
        self
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(Feature::feature_name).collect()
    }

    pub fn feature_num(&self) -> usize {
        self.features.len()
    }

    /// Look up a feature by name.
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.feat_map.get(name).map(|&i| &self.features[i])
    }

    pub fn batched_features(&self) -> impl Iterator<Item = &Feature> {
        self.batched.iter().map(|&i| &self.features[i])
    }

    pub fn transition_system(&self) -> &Arc<dyn TransitionSystem> {
        &self.transition_system
    }

    pub fn model(&self) -> &RerankModel {
        &self.model
    }

    /// Linear weights, `None` for the boosted model.
    pub fn parameter(&self) -> Option<&[f64]> {
        match &self.model {
            RerankModel::GridSearch { parameter } => Some(parameter),
            RerankModel::Boosted(_) => None,
        }
    }

    pub fn set_parameter(&mut self, parameter: Vec<f64>) -> Result<()> {
        let expected = self.feature_num();
        match &mut self.model {
            RerankModel::GridSearch { parameter: p } => {
                if parameter.len() != expected {
                    return Err(RerankError::ParameterLength {
                        expected,
                        got: parameter.len(),
                    });
                }
                *p = parameter;
                Ok(())
            }
            RerankModel::Boosted(_) => Err(RerankError::UnsupportedOperation {
                op: "set_parameter",
                target: "the boosted reranker".to_string(),
            }),
        }
    }

    /// Whether these decode results already carry feature values.
    pub fn is_initialized(decode_results: &[Vec<Hypothesis>]) -> bool {
        decode_results
            .iter()
            .flatten()
            .next()
            .is_some_and(Hypothesis::is_initialized)
    }

    /// Feature values for one hypothesis with batched slots left at
    /// `f64::INFINITY` (not yet computed).
    pub fn get_initial_reranking_feature_values(
        &self,
        example: &Example,
        hyp: &Hypothesis,
        ctx: &FeatureContext<'_>,
    ) -> Result<FeatureValues> {
        let mut values = FeatureValues::with_capacity(self.features.len());
        for feat in &self.features {
            let value = if feat.is_batched() {
                f64::INFINITY
            } else {
                feat.get_feat_value(example, hyp, ctx)?
            };
            values.insert(feat.feature_name(), value);
        }
        Ok(values)
    }

    /// Compute token counts and all feature values, once.
    ///
    /// Batched features run first over fixed-size batches spanning every
    /// example, so scalar features can read their results. All work happens
    /// on a staged copy that replaces `decode_results` only on success.
    pub fn initialize_rerank_features(
        &self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
    ) -> Result<()> {
        if examples.len() != decode_results.len() {
            return Err(RerankError::LengthMismatch {
                examples: examples.len(),
                decode_results: decode_results.len(),
            });
        }
        if Self::is_initialized(decode_results) {
            debug!("rerank features already initialized, skipping");
            return Ok(());
        }

        info!(
            n_examples = examples.len(),
            n_features = self.features.len(),
            "initializing rerank features"
        );

        let mut staged: Vec<Vec<Hypothesis>> = decode_results.to_vec();

        for hyp in staged.iter_mut().flatten() {
            hyp.code_token_count = Some(self.transition_system.tokenize_code(&hyp.code)?.len());
        }

        let batched_scores = self.score_batched(examples, &staged)?;

        let mut flat = 0;
        for hyp in staged.iter_mut().flatten() {
            let mut values = FeatureValues::with_capacity(self.features.len());
            let mut slot = 0;
            for feat in &self.features {
                if feat.is_batched() {
                    values.insert(feat.feature_name(), batched_scores[slot][flat]);
                    slot += 1;
                } else {
                    values.insert(feat.feature_name(), f64::INFINITY);
                }
            }
            hyp.rerank_feature_values = Some(values);
            flat += 1;
        }

        for (example, hyps) in examples.iter().zip(staged.iter_mut()) {
            let all_hyps: &[Hypothesis] = hyps;
            let computed = (0..all_hyps.len())
                .map(|hyp_id| {
                    let ctx = FeatureContext::new(hyp_id, all_hyps);
                    self.features
                        .iter()
                        .filter(|f| !f.is_batched())
                        .map(|f| {
                            f.get_feat_value(example, &all_hyps[hyp_id], &ctx)
                                .map(|value| (f, value))
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;

            for (hyp, values) in hyps.iter_mut().zip(computed) {
                let feat_values = hyp.rerank_feature_values.get_or_insert_with(FeatureValues::new);
                for (feat, value) in values {
                    feat_values.insert(feat.feature_name(), value);
                }
            }
        }

        for (dst, src) in decode_results.iter_mut().zip(staged) {
            *dst = src;
        }
        Ok(())
    }

    /// Run every batched feature over all hypotheses.
    ///
    /// Returns one column per batched feature, indexed by flat position
    /// (examples in order, hypotheses in order within each example).
    fn score_batched(
        &self,
        examples: &[Example],
        decode_results: &[Vec<Hypothesis>],
    ) -> Result<Vec<Vec<f64>>> {
        let pseudo: Vec<HypExample<'_>> = examples
            .iter()
            .zip(decode_results)
            .flat_map(|(example, hyps)| {
                hyps.iter().map(move |hyp| HypExample {
                    src_sent: &example.src_sent,
                    tgt_code: &hyp.code,
                })
            })
            .collect();

        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(pseudo.len()); self.batched.len()];
        if self.batched.is_empty() {
            return Ok(columns);
        }

        for batch in pseudo.chunks(self.config.batch_size.max(1)) {
            for (column, feat) in columns.iter_mut().zip(self.batched_features()) {
                column.extend(feat.score(batch)?);
            }
        }
        Ok(columns)
    }

    fn is_valid_hyp(&self, hyp: &Hypothesis) -> bool {
        match self.transition_system.tokenize_code(&hyp.code) {
            Ok(tokens) if !tokens.is_empty() => true,
            Ok(_) => {
                debug!(code = %hyp.code, "dropping hypothesis with no code tokens");
                false
            }
            Err(err) => {
                debug!(code = %hyp.code, %err, "dropping untokenizable hypothesis");
                false
            }
        }
    }

    /// Drop invalid hypotheses in place; returns how many were dropped.
    fn filter_hyps(&self, decode_results: &mut [Vec<Hypothesis>]) -> usize {
        let mut dropped = 0;
        for hyps in decode_results.iter_mut() {
            let before = hyps.len();
            hyps.retain(|hyp| self.is_valid_hyp(hyp));
            dropped += before - hyps.len();
        }
        dropped
    }

    /// Filter out untokenizable/empty hypotheses, then initialize features.
    /// No-op once the decode results are initialized.
    pub fn filter_hyps_and_initialize_features(
        &self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
    ) -> Result<()> {
        if Self::is_initialized(decode_results) {
            return Ok(());
        }

        let dropped = self.filter_hyps(decode_results);
        info!(dropped, "filtered invalid hypotheses");

        self.initialize_rerank_features(examples, decode_results)
    }

    /// Combined score of an initialized hypothesis.
    ///
    /// `param` overrides the stored linear weights; the boosted model
    /// ignores it.
    pub fn get_rerank_score(&self, hyp: &Hypothesis, param: Option<&[f64]>) -> Result<f64> {
        match &self.model {
            RerankModel::GridSearch { parameter } => {
                gridsearch::linear_score(hyp, param.unwrap_or(parameter))
            }
            RerankModel::Boosted(ranker) => ranker.score_hypothesis(hyp),
        }
    }

    /// Reorder initialized hypotheses by the current model, best first.
    pub fn rerank_hypotheses<'h>(&self, hyps: &'h [Hypothesis]) -> Result<Vec<&'h Hypothesis>> {
        Ok(self.rank(hyps, None, false)?.0)
    }

    /// Rank one list. Returns the ranked list and the selected index.
    fn rank<'h>(
        &self,
        hyps: &'h [Hypothesis],
        param: Option<&[f64]>,
        fast_mode: bool,
    ) -> Result<(Vec<&'h Hypothesis>, Option<usize>)> {
        let scores = hyps
            .iter()
            .map(|hyp| self.get_rerank_score(hyp, param))
            .collect::<Result<Vec<_>>>()?;

        let best = argmax_first(&scores);
        let ranked = if fast_mode {
            best.map(|i| vec![&hyps[i]]).unwrap_or_default()
        } else {
            stable_descending(&scores).into_iter().map(|i| &hyps[i]).collect()
        };
        Ok((ranked, best))
    }

    /// Filter/initialize if needed, rerank every example, and evaluate.
    pub fn compute_rerank_performance(
        &self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        param: Option<&[f64]>,
        fast_mode: bool,
        verbose: bool,
    ) -> Result<f64> {
        self.filter_hyps_and_initialize_features(examples, decode_results)?;
        self.evaluate_initialized(examples, decode_results, evaluator, param, fast_mode, verbose)
    }

    /// [`Reranker::compute_rerank_performance`] over decode results that are
    /// already filtered and initialized. Read-only, safe to share across
    /// search workers.
    pub fn evaluate_initialized(
        &self,
        examples: &[Example],
        decode_results: &[Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        param: Option<&[f64]>,
        fast_mode: bool,
        verbose: bool,
    ) -> Result<f64> {
        let mut reranked: Vec<Vec<&Hypothesis>> = Vec::with_capacity(decode_results.len());

        for (example, hyps) in examples.iter().zip(decode_results) {
            if hyps.is_empty() {
                reranked.push(Vec::new());
                continue;
            }

            let (ranked, best) = self.rank(hyps, param, fast_mode)?;
            if verbose {
                self.log_miss(example, hyps, best, param)?;
            }
            reranked.push(ranked);
        }

        Ok(evaluator.evaluate_dataset(examples, &reranked, fast_mode))
    }

    fn log_miss(
        &self,
        example: &Example,
        hyps: &[Hypothesis],
        best: Option<usize>,
        param: Option<&[f64]>,
    ) -> Result<()> {
        let Some(gold) = hyps.iter().position(|h| h.is_correct) else {
            return Ok(());
        };
        if Some(gold) == best {
            return Ok(());
        }

        info!(
            utterance = %example.src_sent.join(" "),
            gold_hyp_id = gold,
            selected_hyp_id = ?best,
            "reranker missed the gold hypothesis"
        );
        for (hyp_id, hyp) in hyps.iter().enumerate() {
            info!(
                hyp_id,
                code = %hyp.code,
                score = hyp.score,
                final_score = self.get_rerank_score(hyp, param)?,
                features = ?hyp.rerank_feature_values,
            );
        }
        Ok(())
    }

    /// Optimize the model on a dataset.
    ///
    /// Grid search uses the configured serial grid; the boosted model fits
    /// once and reports its metric.
    pub fn train(
        &mut self,
        examples: &[Example],
        decode_results: &mut [Vec<Hypothesis>],
        evaluator: &dyn Evaluator,
        initial_performance: f64,
    ) -> Result<TrainReport> {
        match self.model {
            RerankModel::GridSearch { .. } => {
                let grid = self.config.serial_grid;
                self.train_grid_search(examples, decode_results, evaluator, initial_performance, &grid)
            }
            RerankModel::Boosted(_) => self.train_boosted(examples, decode_results, evaluator),
        }
    }
}

/// Index of the maximum score; the first one wins ties.
fn argmax_first(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some(b) if s <= scores[b] || s.is_nan() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Indices sorted by descending score; equal scores keep input order.
/// `total_cmp` keeps the order total when a score is NaN.
fn stable_descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}


#[cfg(test)]
mod tests {
    use super::fixtures::{dataset, tokenizer};
    use super::*;
    use crate::evaluator::ExactMatchEvaluator;
    use crate::features::{BatchScorer, ParaphraseModel, PARAPHRASE_SCORE};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn scalar_reranker() -> Reranker {
        Reranker::grid_search(
            vec![
                Feature::NormalizedParserScore,
                Feature::CodeTokenCount,
                Feature::SecondHypScoreMargin,
            ],
            None,
            tokenizer(),
        )
        .unwrap()
    }

    #[test]
    fn test_filter_drops_empty_and_untokenizable() {
        let reranker = scalar_reranker();
        let (examples, mut decode_results) = dataset(&[&[
            ("x=1", -0.1, true),
            ("", -0.2, false),
            ("not valid python((", -0.3, false),
        ]]);

        reranker
            .filter_hyps_and_initialize_features(&examples, &mut decode_results)
            .unwrap();

        assert_eq!(decode_results[0].len(), 1);
        assert_eq!(decode_results[0][0].code, "x=1");
        assert_eq!(decode_results[0][0].code_token_count, Some(3));
    }

    #[test]
    fn test_initialization_is_idempotent() {
        let reranker = scalar_reranker();
        let (examples, mut decode_results) =
            dataset(&[&[("x = 1", -0.1, true), ("y = f(x)", -0.7, false)]]);

        reranker
            .initialize_rerank_features(&examples, &mut decode_results)
            .unwrap();
        let first = decode_results.clone();

        // Tamper with a score: a recomputation would change the margin feature.
        decode_results[0][0].score = 100.0;
        reranker
            .initialize_rerank_features(&examples, &mut decode_results)
            .unwrap();

        assert_eq!(
            decode_results[0][1].rerank_feature_values,
            first[0][1].rerank_feature_values
        );
    }

    #[test]
    fn test_feature_values_follow_registration_order() {
        let reranker = scalar_reranker();
        let (examples, mut decode_results) =
            dataset(&[&[("x = 1", -0.9, true), ("y = 2", -0.5, false)]]);
        reranker
            .initialize_rerank_features(&examples, &mut decode_results)
            .unwrap();

        let values = decode_results[0][1].rerank_feature_values.as_ref().unwrap();
        assert_eq!(values.names().collect::<Vec<_>>(), reranker.feature_names());
        assert!((values.get("normalized_parser_score").unwrap() + 0.5 / 3.0).abs() < 1e-9);
        assert!((values.get("is_2nd_hyp_and_margin_with_top_hyp").unwrap() + 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_initial_values_mark_batched_slots() {
        let model = ParaphraseModel::fit(&[Example::new(0, "set x", "x = 1")]);
        let reranker = Reranker::grid_search(
            vec![
                Feature::batched(PARAPHRASE_SCORE, Arc::new(model)),
                Feature::SecondHypScoreMargin,
            ],
            None,
            tokenizer(),
        )
        .unwrap();

        let hyps = vec![Hypothesis::new("x = 1", -0.1), Hypothesis::new("x = 2", -0.3)];
        let values = reranker
            .get_initial_reranking_feature_values(
                &Example::default(),
                &hyps[1],
                &FeatureContext::new(1, &hyps),
            )
            .unwrap();

        assert_eq!(values.get(PARAPHRASE_SCORE), Some(f64::INFINITY));
        assert!((values.get("is_2nd_hyp_and_margin_with_top_hyp").unwrap() - 0.2).abs() < 1e-9);
    }

    /// Scores each pseudo example by its global position and counts calls.
    #[derive(Debug, Default)]
    struct PositionScorer {
        calls: AtomicUsize,
        seen: AtomicUsize,
    }

    impl BatchScorer for PositionScorer {
        fn score(&self, batch: &[HypExample<'_>]) -> anyhow::Result<Vec<f64>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let start = self.seen.fetch_add(batch.len(), AtomicOrdering::SeqCst);
            Ok((0..batch.len()).map(|i| (start + i) as f64).collect())
        }

        fn save(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_batched_scores_written_back_by_position() {
        let scorer = Arc::new(PositionScorer::default());
        let reranker = Reranker::grid_search(
            vec![
                Feature::CodeTokenCount,
                Feature::batched(PARAPHRASE_SCORE, scorer.clone()),
                Feature::SecondHypParaphraseMargin,
            ],
            None,
            tokenizer(),
        )
        .unwrap()
        .with_config(RerankConfig {
            batch_size: 2,
            ..RerankConfig::default()
        });

        let (examples, mut decode_results) = dataset(&[
            &[("a", -0.1, false), ("b", -0.2, false), ("c", -0.3, false)],
            &[],
            &[("d", -0.1, false), ("e", -0.2, false)],
        ]);
        reranker
            .initialize_rerank_features(&examples, &mut decode_results)
            .unwrap();

        // 5 hypotheses in batches of 2 → 3 calls
        assert_eq!(scorer.calls.load(AtomicOrdering::SeqCst), 3);

        let paraphrase: Vec<Vec<f64>> = decode_results
            .iter()
            .map(|hyps| hyps.iter().map(|h| h.feature_value(PARAPHRASE_SCORE).unwrap()).collect())
            .collect();
        assert_eq!(paraphrase, vec![vec![0.0, 1.0, 2.0], vec![], vec![3.0, 4.0]]);

        // Margin reads the batched values: 1 - 0 and 4 - 3
        let margin = |e: usize, h: usize| {
            decode_results[e][h]
                .feature_value("is_2nd_hyp_and_paraphrase_score_margin_with_top_hyp")
                .unwrap()
        };
        assert_eq!(margin(0, 1), 1.0);
        assert_eq!(margin(2, 1), 1.0);
        assert_eq!(margin(0, 2), 0.0);

        let order: Vec<&str> = decode_results[0][0]
            .rerank_feature_values
            .as_ref()
            .unwrap()
            .names()
            .collect();
        assert_eq!(order, reranker.feature_names());
    }

    #[test]
    fn test_failed_initialization_leaves_input_untouched() {
        let reranker = scalar_reranker();
        let (examples, mut decode_results) =
            dataset(&[&[("x = 1", -0.1, true)], &[("f(", -0.2, false)]]);

        let err = reranker
            .initialize_rerank_features(&examples, &mut decode_results)
            .unwrap_err();
        assert!(matches!(err, RerankError::Untokenizable(_)));
        assert!(!Reranker::is_initialized(&decode_results));
        assert!(decode_results[0][0].code_token_count.is_none());
    }

    #[test]
    fn test_fast_mode_picks_first_of_ties() {
        let reranker = Reranker::grid_search(vec![Feature::CodeTokenCount], Some(vec![0.0]), tokenizer())
            .unwrap();
        let (examples, mut decode_results) = dataset(&[&[
            ("a", -0.5, false),
            ("b", -0.1, false),
            ("c", -0.1, true),
        ]]);
        reranker
            .filter_hyps_and_initialize_features(&examples, &mut decode_results)
            .unwrap();

        let (ranked, best) = reranker.rank(&decode_results[0], None, true).unwrap();
        assert_eq!(best, Some(1));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].code, "b");

        // Deterministic across repeated runs
        for _ in 0..5 {
            assert_eq!(reranker.rank(&decode_results[0], None, true).unwrap().1, Some(1));
        }
    }

    #[test]
    fn test_full_mode_sorts_descending_and_stable() {
        let reranker = Reranker::grid_search(vec![Feature::CodeTokenCount], Some(vec![0.0]), tokenizer())
            .unwrap();
        let (examples, mut decode_results) = dataset(&[&[
            ("a", -0.9, false),
            ("b", -0.1, false),
            ("c", -0.5, false),
            ("d", -0.1, false),
        ]]);
        reranker
            .filter_hyps_and_initialize_features(&examples, &mut decode_results)
            .unwrap();

        let ranked = reranker.rerank_hypotheses(&decode_results[0]).unwrap();
        let codes: Vec<&str> = ranked.iter().map(|h| h.code.as_str()).collect();
        assert_eq!(codes, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn test_performance_with_empty_example() {
        let reranker = scalar_reranker();
        let (examples, mut decode_results) = dataset(&[
            &[("x = 1", -0.1, true), ("x = 2", -0.2, false)],
            &[("((", -0.1, true)],
            &[],
        ]);

        let fast = reranker
            .compute_rerank_performance(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                None,
                true,
                true,
            )
            .unwrap();
        assert!((fast - 1.0 / 3.0).abs() < 1e-9);
        assert!(decode_results[1].is_empty());

        let full = reranker
            .compute_rerank_performance(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                None,
                false,
                false,
            )
            .unwrap();
        assert!((full - fast).abs() < 1e-9);
    }

    #[test]
    fn test_param_override_changes_selection() {
        let reranker = Reranker::grid_search(vec![Feature::CodeTokenCount], None, tokenizer()).unwrap();
        let (examples, mut decode_results) =
            dataset(&[&[("x", -0.1, false), ("x + y + z", -0.2, true)]]);

        let baseline = reranker
            .compute_rerank_performance(&examples, &mut decode_results, &ExactMatchEvaluator, None, true, false)
            .unwrap();
        let boosted = reranker
            .compute_rerank_performance(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                Some(&[1.0]),
                true,
                false,
            )
            .unwrap();
        assert_eq!(baseline, 0.0);
        assert_eq!(boosted, 1.0);
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let err = Reranker::grid_search(
            vec![Feature::CodeTokenCount, Feature::CodeTokenCount],
            None,
            tokenizer(),
        )
        .unwrap_err();
        assert!(matches!(err, RerankError::DuplicateFeature(_)));
    }

    #[test]
    fn test_parameter_length_checked() {
        let err = Reranker::grid_search(vec![Feature::CodeTokenCount], Some(vec![1.0, 2.0]), tokenizer())
            .unwrap_err();
        assert!(matches!(err, RerankError::ParameterLength { expected: 1, got: 2 }));
    }

    #[test]
    fn test_feature_lookup_by_name() {
        let reranker = scalar_reranker();
        assert!(reranker.feature("code_token_count").is_some());
        assert!(reranker.feature("paraphrase_score").is_none());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let reranker = scalar_reranker();
        let (examples, _) = dataset(&[&[("x", 0.0, true)]]);
        let mut decode_results: Vec<Vec<Hypothesis>> = Vec::new();
        let err = reranker
            .initialize_rerank_features(&examples, &mut decode_results)
            .unwrap_err();
        assert!(matches!(err, RerankError::LengthMismatch { .. }));
    }

    #[test]
    fn test_filter_drops_whitespace_only_code() {
        let reranker = scalar_reranker();
        let (examples, mut decode_results) = dataset(&[&[
            ("x = 1", -0.1, true),
            ("   ", -0.2, false),
            ("\t\n", -0.3, false),
        ]]);

        reranker
            .filter_hyps_and_initialize_features(&examples, &mut decode_results)
            .unwrap();

        assert_eq!(decode_results[0].len(), 1);
        let normalized = decode_results[0][0]
            .feature_value("normalized_parser_score")
            .unwrap();
        assert!(normalized.is_finite());
    }

    #[test]
    fn test_full_mode_ranks_long_lists() {
        let reranker = Reranker::grid_search(
            vec![Feature::NormalizedParserScore, Feature::CodeTokenCount],
            Some(vec![0.0, 0.0]),
            tokenizer(),
        )
        .unwrap();
        let codes: Vec<String> = (0..48)
            .map(|i| if i % 3 == 2 { " ".to_string() } else { format!("x = {i}") })
            .collect();
        let hyps: Vec<(&str, f64, bool)> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| (code.as_str(), -0.01 * i as f64, i == 0))
            .collect();
        let (examples, mut decode_results) = dataset(&[hyps.as_slice()]);

        let score = reranker
            .compute_rerank_performance(
                &examples,
                &mut decode_results,
                &ExactMatchEvaluator,
                None,
                false,
                false,
            )
            .unwrap();
        assert_eq!(score, 1.0);
        assert_eq!(decode_results[0].len(), 32);

        let ranked = reranker.rerank_hypotheses(&decode_results[0]).unwrap();
        assert_eq!(ranked.len(), 32);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_descending_order_is_total_with_nan() {
        let scores: Vec<f64> = (0..64)
            .map(|i| if i % 5 == 0 { f64::NAN } else { ((i * 37) % 64) as f64 })
            .collect();

        let order = stable_descending(&scores);

        let mut seen = order.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..64).collect::<Vec<_>>());
        let finite: Vec<f64> = order.iter().map(|&i| scores[i]).filter(|s| !s.is_nan()).collect();
        assert!(finite.windows(2).all(|w| w[0] >= w[1]));
    }
}
