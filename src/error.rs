//! Error types for reranking.

use thiserror::Error;

use crate::transition::TokenizeError;

#[derive(Debug, Error)]
pub enum RerankError {
    #[error(transparent)]
    Untokenizable(#[from] TokenizeError),

    #[error("unknown feature `{0}`")]
    UnknownFeature(String),

    #[error("feature `{0}` is registered twice")]
    DuplicateFeature(String),

    #[error("unknown transition system `{0}`")]
    UnknownTransitionSystem(String),

    #[error("batched feature `{feature}` returned {got} scores for a batch of {expected}")]
    BatchSizeMismatch {
        feature: String,
        expected: usize,
        got: usize,
    },

    #[error("feature `{feature}` needs `{missing}` to be computed first")]
    MissingFeatureValue { feature: String, missing: String },

    #[error("{examples} examples but {decode_results} decode result lists")]
    LengthMismatch {
        examples: usize,
        decode_results: usize,
    },

    #[error("hypothesis features have not been initialized")]
    Uninitialized,

    #[error("parameter has {got} entries but the reranker has {expected} features")]
    ParameterLength { expected: usize, got: usize },

    #[error("no hypotheses to train on")]
    EmptyTrainingSet,

    #[error("{op} is not supported by {target}")]
    UnsupportedOperation { op: &'static str, target: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("batched scorer failed")]
    Scorer(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RerankError>;
