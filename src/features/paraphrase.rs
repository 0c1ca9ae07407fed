//! `paraphrase_score`: how much of the utterance a hypothesis "talks about".
//!
//! A lightweight stand-in for a neural paraphrase model. Utterance tokens
//! and code word pieces share a vocabulary; the score is the IDF-weighted
//! fraction of utterance tokens that reappear in the code:
//!
//! ```text
//! score = Σ idf(t) for t ∈ src ∩ code  /  Σ idf(t) for t ∈ src
//! ```
//!
//! IDF is fit on a training set of (utterance, gold code) pairs, so words
//! that appear everywhere ("the", "list") count for little and rare
//! argument names count for a lot.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::BatchScorer;
use crate::types::{Example, HypExample};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+|\d+").expect("word regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParaphraseModel {
    idf: HashMap<String, f64>,
    /// IDF assigned to tokens never seen during fitting
    unseen_idf: f64,
}

impl ParaphraseModel {
    /// Fit document frequencies over (utterance, gold code) pairs.
    pub fn fit(examples: &[Example]) -> Self {
        let mut df: HashMap<String, usize> = HashMap::new();
        for example in examples {
            let mut doc: HashSet<String> = utterance_tokens(&example.src_sent);
            doc.extend(code_words(&example.tgt_code));
            for tok in doc {
                *df.entry(tok).or_insert(0) += 1;
            }
        }

        let n = examples.len() as f64;
        let idf = df
            .into_iter()
            .map(|(tok, count)| (tok, ((n + 1.0) / (count as f64 + 1.0)).ln() + 1.0))
            .collect();

        Self {
            idf,
            unseen_idf: (n + 1.0).ln() + 1.0,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.idf.len()
    }

    fn idf(&self, tok: &str) -> f64 {
        self.idf.get(tok).copied().unwrap_or(self.unseen_idf)
    }

    /// Score one (utterance, code) pair. Empty utterances score 0.
    pub fn score_one(&self, src_sent: &[String], code: &str) -> f64 {
        let src = utterance_tokens(src_sent);
        let total: f64 = src.iter().map(|t| self.idf(t)).sum();
        if total <= 0.0 {
            return 0.0;
        }

        let code = code_words(code);
        let covered: f64 = src
            .iter()
            .filter(|t| code.contains(*t))
            .map(|t| self.idf(t))
            .sum();

        covered / total
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;
        }
        let json = serde_json::to_string(self).context("Failed to serialize paraphrase model")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write paraphrase model: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read paraphrase model: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Corrupt paraphrase model: {}", path.display()))
    }
}

impl BatchScorer for ParaphraseModel {
    fn score(&self, batch: &[HypExample<'_>]) -> Result<Vec<f64>> {
        Ok(batch
            .iter()
            .map(|e| self.score_one(e.src_sent, e.tgt_code))
            .collect())
    }

    fn save(&self, path: &Path) -> Result<()> {
        ParaphraseModel::save(self, path)
    }
}

fn utterance_tokens(src_sent: &[String]) -> HashSet<String> {
    src_sent
        .iter()
        .flat_map(|w| WORD.find_iter(w).map(|m| m.as_str().to_lowercase()))
        .collect()
}

/// Word pieces of code: identifiers split on `_`, punctuation dropped.
fn code_words(code: &str) -> HashSet<String> {
    WORD.find_iter(code)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}
