//! Reranking features.
//!
//! A feature maps (example, hypothesis, context) to one float. Two kinds:
//!
//! - **Scalar** features are closed-form and computed per hypothesis.
//! - **Batched** features wrap a trained model ([`BatchScorer`]) and are
//!   computed over mini-batches of pseudo examples, once per hypothesis.
//!
//! Batched values are always computed before scalar ones, so a scalar
//! feature may read a batched value of any hypothesis in the same list
//! (see [`Feature::SecondHypParaphraseMargin`]).
//!
//! ## Margin Features
//!
//! The two `is_2nd_hyp_*` features only model the margin between the top
//! candidate and the runner-up. Every other position gets 0. Full pairwise
//! margins are not modeled.

pub mod paraphrase;
pub mod registry;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{RerankError, Result};
use crate::types::{Example, HypExample, Hypothesis};

pub use paraphrase::ParaphraseModel;
pub use registry::{artifact_path, construct, registered_names};

pub const NORMALIZED_PARSER_SCORE: &str = "normalized_parser_score";
pub const CODE_TOKEN_COUNT: &str = "code_token_count";
pub const SECOND_HYP_SCORE_MARGIN: &str = "is_2nd_hyp_and_margin_with_top_hyp";
pub const SECOND_HYP_PARAPHRASE_MARGIN: &str =
    "is_2nd_hyp_and_paraphrase_score_margin_with_top_hyp";
pub const PARAPHRASE_SCORE: &str = "paraphrase_score";

/// A model that scores pseudo examples in batches.
///
/// Implementations must return exactly one score per input, in input order.
pub trait BatchScorer: Send + Sync + fmt::Debug {
    fn score(&self, batch: &[HypExample<'_>]) -> anyhow::Result<Vec<f64>>;

    /// Persist trainable state to `path`.
    fn save(&self, path: &Path) -> anyhow::Result<()>;
}

/// Position of a hypothesis within its example's list.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub hyp_id: usize,
    pub all_hyps: &'a [Hypothesis],
}

impl<'a> FeatureContext<'a> {
    pub fn new(hyp_id: usize, all_hyps: &'a [Hypothesis]) -> Self {
        Self { hyp_id, all_hyps }
    }

    fn is_second(&self) -> bool {
        self.hyp_id == 1 && !self.all_hyps.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BatchedFeature {
    name: String,
    scorer: Arc<dyn BatchScorer>,
}

#[derive(Debug, Clone)]
pub enum Feature {
    /// Parser log-score divided by the code's token count
    NormalizedParserScore,
    /// Token count of the generated code
    CodeTokenCount,
    /// `top.score - hyp.score` for the runner-up, 0 elsewhere
    SecondHypScoreMargin,
    /// `hyp.paraphrase_score - top.paraphrase_score` for the runner-up, 0 elsewhere
    SecondHypParaphraseMargin,
    /// Model-backed feature scored in batches
    Batched(BatchedFeature),
}

impl Feature {
    pub fn batched(name: impl Into<String>, scorer: Arc<dyn BatchScorer>) -> Self {
        Feature::Batched(BatchedFeature {
            name: name.into(),
            scorer,
        })
    }

    pub fn feature_name(&self) -> &str {
        match self {
            Feature::NormalizedParserScore => NORMALIZED_PARSER_SCORE,
            Feature::CodeTokenCount => CODE_TOKEN_COUNT,
            Feature::SecondHypScoreMargin => SECOND_HYP_SCORE_MARGIN,
            Feature::SecondHypParaphraseMargin => SECOND_HYP_PARAPHRASE_MARGIN,
            Feature::Batched(b) => &b.name,
        }
    }

    pub fn is_batched(&self) -> bool {
        matches!(self, Feature::Batched(_))
    }

    /// Value of a scalar feature. Batched features must go through [`Feature::score`].
    pub fn get_feat_value(
        &self,
        _example: &Example,
        hyp: &Hypothesis,
        ctx: &FeatureContext<'_>,
    ) -> Result<f64> {
        match self {
            Feature::NormalizedParserScore => {
                let count = token_count(self, hyp)?;
                Ok(hyp.score / count as f64)
            }
            Feature::CodeTokenCount => Ok(token_count(self, hyp)? as f64),
            Feature::SecondHypScoreMargin => {
                if ctx.is_second() {
                    Ok(ctx.all_hyps[0].score - hyp.score)
                } else {
                    Ok(0.0)
                }
            }
            Feature::SecondHypParaphraseMargin => {
                if !ctx.is_second() {
                    return Ok(0.0);
                }
                let this = paraphrase_value(self, hyp)?;
                let top = paraphrase_value(self, &ctx.all_hyps[0])?;
                Ok(this - top)
            }
            Feature::Batched(b) => Err(RerankError::UnsupportedOperation {
                op: "get_feat_value",
                target: format!("batched feature `{}`", b.name),
            }),
        }
    }

    /// Score a batch with a batched feature's model.
    pub fn score(&self, batch: &[HypExample<'_>]) -> Result<Vec<f64>> {
        let Feature::Batched(b) = self else {
            return Err(RerankError::UnsupportedOperation {
                op: "score",
                target: format!("scalar feature `{}`", self.feature_name()),
            });
        };

        let scores = b.scorer.score(batch).map_err(RerankError::Scorer)?;
        if scores.len() != batch.len() {
            return Err(RerankError::BatchSizeMismatch {
                feature: b.name.clone(),
                expected: batch.len(),
                got: scores.len(),
            });
        }
        Ok(scores)
    }

    /// Batched features own a model and persist it to `path`; scalar
    /// features have nothing to save.
    pub(crate) fn save_artifact(&self, path: &Path) -> Result<()> {
        if let Feature::Batched(b) = self {
            b.scorer.save(path).map_err(RerankError::Scorer)?;
        }
        Ok(())
    }
}

fn token_count(feature: &Feature, hyp: &Hypothesis) -> Result<usize> {
    hyp.code_token_count
        .ok_or_else(|| RerankError::MissingFeatureValue {
            feature: feature.feature_name().to_string(),
            missing: CODE_TOKEN_COUNT.to_string(),
        })
}

fn paraphrase_value(feature: &Feature, hyp: &Hypothesis) -> Result<f64> {
    hyp.feature_value(PARAPHRASE_SCORE)
        .ok_or_else(|| RerankError::MissingFeatureValue {
            feature: feature.feature_name().to_string(),
            missing: PARAPHRASE_SCORE.to_string(),
        })
}
