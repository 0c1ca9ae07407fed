//! Dataset evaluation seam.
//!
//! The reranker never decides what "correct" means. It hands the reordered
//! lists to an [`Evaluator`] and treats the returned number as the quantity
//! to maximize.

use crate::metrics::{EvalMetrics, ExampleMetrics};
use crate::types::{Example, Hypothesis};

pub trait Evaluator: Send + Sync {
    /// Score reranked lists against gold references.
    ///
    /// `reranked[i]` belongs to `examples[i]` and is best-first. In fast mode
    /// each non-empty list holds exactly the selected hypothesis.
    fn evaluate_dataset(
        &self,
        examples: &[Example],
        reranked: &[Vec<&Hypothesis>],
        fast_mode: bool,
    ) -> f64;
}

/// Top-1 exact-match accuracy from the `is_correct` flags set upstream.
///
/// Examples whose list is empty count as misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatchEvaluator;

impl ExactMatchEvaluator {
    /// Full metric breakdown, for reporting rather than optimization.
    pub fn evaluate_detailed(&self, reranked: &[Vec<&Hypothesis>]) -> EvalMetrics {
        let per_example: Vec<_> = reranked
            .iter()
            .map(|hyps| ExampleMetrics::compute(hyps))
            .collect();
        EvalMetrics::aggregate(&per_example)
    }
}

impl Evaluator for ExactMatchEvaluator {
    fn evaluate_dataset(
        &self,
        _examples: &[Example],
        reranked: &[Vec<&Hypothesis>],
        _fast_mode: bool,
    ) -> f64 {
        self.evaluate_detailed(reranked).accuracy
    }
}

impl<F> Evaluator for F
where
    F: Fn(&[Example], &[Vec<&Hypothesis>], bool) -> f64 + Send + Sync,
{
    fn evaluate_dataset(
        &self,
        examples: &[Example],
        reranked: &[Vec<&Hypothesis>],
        fast_mode: bool,
    ) -> f64 {
        self(examples, reranked, fast_mode)
    }
}
