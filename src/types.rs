//! Core data types for nbest-rerank.
//!
//! These types are designed for:
//! - Cheap in-place mutation: the reranker attaches token counts and feature
//!   values to hypotheses produced elsewhere, exactly once
//! - Stable ordering: feature values keep registration order, which is the
//!   order the linear parameter vector is aligned to
//! - Serde support, so decoded N-best lists can be cached as JSON

use serde::{Deserialize, Serialize};

/// One input utterance of the parsing dataset.
///
/// The parser, dataset loader and gold annotations live outside this crate;
/// the reranker only reads the source tokens (for batched features) and
/// hands examples back to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub idx: Option<usize>,
    /// Tokenized source utterance
    pub src_sent: Vec<String>,
    /// Gold target code
    pub tgt_code: String,
}

impl Example {
    pub fn new(idx: usize, src_sent: &str, tgt_code: impl Into<String>) -> Self {
        Self {
            idx: Some(idx),
            src_sent: src_sent.split_whitespace().map(str::to_string).collect(),
            tgt_code: tgt_code.into(),
        }
    }
}

/// A candidate program decoded by the parser for one example.
///
/// `code_token_count` and `rerank_feature_values` are owned by the reranker:
/// both are `None` until feature initialization runs, and are never
/// recomputed afterwards for the same instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub code: String,
    /// Parser log-probability
    pub score: f64,
    /// Set by the evaluator / oracle
    pub is_correct: bool,
    #[serde(default)]
    pub code_token_count: Option<usize>,
    #[serde(default)]
    pub rerank_feature_values: Option<FeatureValues>,
}

impl Hypothesis {
    pub fn new(code: impl Into<String>, score: f64) -> Self {
        Self {
            code: code.into(),
            score,
            ..Default::default()
        }
    }

    pub fn correct(mut self, is_correct: bool) -> Self {
        self.is_correct = is_correct;
        self
    }

    /// True once feature initialization has attached values.
    pub fn is_initialized(&self) -> bool {
        self.rerank_feature_values.is_some()
    }

    /// Cached value of a feature, if initialized and present.
    pub fn feature_value(&self, name: &str) -> Option<f64> {
        self.rerank_feature_values.as_ref()?.get(name)
    }
}

/// Ordered mapping from feature name to value.
///
/// Insertion order is preserved and re-inserting an existing name updates
/// the value in place, so the layout always matches the reranker's
/// registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureValues {
    entries: Vec<(String, f64)>,
}

impl FeatureValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    /// Insert or update a value, keeping the original position on update.
    pub fn insert(&mut self, name: &str, value: f64) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pseudo example handed to batched feature scorers: the source utterance
/// paired with a hypothesis' code in place of the gold target.
#[derive(Debug, Clone, Copy)]
pub struct HypExample<'a> {
    pub src_sent: &'a [String],
    pub tgt_code: &'a str,
}
