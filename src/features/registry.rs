//! Name → constructor table used to rebuild feature sets on load.
//!
//! Feature identity across save/load is by name only: a saved reranker
//! lists its feature names, and each name is resolved here. Changing what a
//! registered name constructs silently changes every reranker saved with it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::paraphrase::ParaphraseModel;
use super::{
    Feature, CODE_TOKEN_COUNT, NORMALIZED_PARSER_SCORE, PARAPHRASE_SCORE,
    SECOND_HYP_PARAPHRASE_MARGIN, SECOND_HYP_SCORE_MARGIN,
};
use crate::error::{RerankError, Result};

/// Builds a feature given the base path of the reranker bundle.
/// Scalar features ignore the path; trainable ones load their artifact.
pub type FeatureCtor = fn(&Path) -> Result<Feature>;

static REGISTRY: Lazy<BTreeMap<&'static str, FeatureCtor>> = Lazy::new(|| {
    let mut table: BTreeMap<&'static str, FeatureCtor> = BTreeMap::new();
    table.insert(NORMALIZED_PARSER_SCORE, |_| Ok(Feature::NormalizedParserScore));
    table.insert(CODE_TOKEN_COUNT, |_| Ok(Feature::CodeTokenCount));
    table.insert(SECOND_HYP_SCORE_MARGIN, |_| Ok(Feature::SecondHypScoreMargin));
    table.insert(SECOND_HYP_PARAPHRASE_MARGIN, |_| {
        Ok(Feature::SecondHypParaphraseMargin)
    });
    table.insert(PARAPHRASE_SCORE, |base| {
        let model = ParaphraseModel::load(&artifact_path(base, PARAPHRASE_SCORE))
            .map_err(RerankError::Scorer)?;
        Ok(Feature::batched(PARAPHRASE_SCORE, Arc::new(model)))
    });
    table
});

/// Construct a registered feature. Unknown names are fatal.
pub fn construct(name: &str, base_path: &Path) -> Result<Feature> {
    let ctor = REGISTRY
        .get(name)
        .ok_or_else(|| RerankError::UnknownFeature(name.to_string()))?;
    ctor(base_path)
}

pub fn registered_names() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

/// `<base_path>.<feature_name>`
pub fn artifact_path(base_path: &Path, feature_name: &str) -> PathBuf {
    let mut s = base_path.as_os_str().to_owned();
    s.push(".");
    s.push(feature_name);
    PathBuf::from(s)
}
