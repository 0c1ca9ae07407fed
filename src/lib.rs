//! nbest-rerank - Feature-based reranking of semantic parser N-best lists
//!
//! A parser emits several candidate programs per utterance, each with a
//! model score. The reranker computes extra features per candidate, combines
//! them into a new score, reorders the list, and hands the result to an
//! evaluator.
//!
//! # Architecture
//!
//! ```text
//! Decode results → Filter → Feature Init → Scoring → Sort → Evaluator
//!       ↓            ↓           ↓            ↓               ↓
//!   Vec<Vec<Hyp>>  tokenize   batched +    linear or     accuracy
//!                  + empty    scalar pass  boosted trees
//! ```
//!
//! # Training
//!
//! - Grid search: exhaustive over weight combinations, serial or on a
//!   rayon pool with a deterministic merge
//! - Boosted: pairwise LambdaRank-style boosting of regression trees
//!
//! A trained reranker saves to one JSON bundle plus per-feature artifacts
//! and reloads by feature name through a static registry.

pub mod config;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod metrics;
pub mod reranker;
pub mod transition;
pub mod types;

pub use config::RerankConfig;
pub use error::{RerankError, Result};
pub use evaluator::{Evaluator, ExactMatchEvaluator};
pub use features::{BatchScorer, Feature, FeatureContext, ParaphraseModel};
pub use metrics::{EvalMetrics, ExampleMetrics};
pub use reranker::{
    BoostParams, BoostedRanker, GridSpec, RerankModel, Reranker, TrainReport,
};
pub use transition::{SimpleCodeTokenizer, TokenizeError, TransitionSystem};
pub use types::{Example, FeatureValues, HypExample, Hypothesis};
