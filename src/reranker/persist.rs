//! Save/load of a reranker bundle.
//!
//! A bundle is one JSON file at `path` holding the feature names, the
//! transition system name, and the model (linear parameter or fitted
//! boosted ranker). Features that own a model write it beside the bundle
//! at `<path>.<feature_name>`; on load every name goes back through the
//! feature registry.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BoostedRanker, RerankModel, Reranker};
use crate::error::{RerankError, Result};
use crate::features::{artifact_path, construct};
use crate::transition::{transition_system_by_name, TransitionSystem};

#[derive(Serialize)]
struct BundleRef<'a> {
    parameter: Option<&'a [f64]>,
    feature_names: Vec<&'a str>,
    transition_system: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    boosted: Option<&'a BoostedRanker>,
}

#[derive(Deserialize)]
struct Bundle {
    parameter: Option<Vec<f64>>,
    feature_names: Vec<String>,
    transition_system: String,
    #[serde(default)]
    boosted: Option<BoostedRanker>,
}

impl Reranker {
    /// Write the bundle and every batched feature's model artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        for feat in self.features.iter().filter(|f| f.is_batched()) {
            feat.save_artifact(&artifact_path(path, feat.feature_name()))?;
        }

        let boosted = match &self.model {
            RerankModel::Boosted(ranker) => Some(ranker),
            RerankModel::GridSearch { .. } => None,
        };
        let bundle = BundleRef {
            parameter: self.parameter(),
            feature_names: self.feature_names(),
            transition_system: self.transition_system.name(),
            boosted,
        };

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &bundle)?;
        writer.flush()?;

        info!(path = %path.display(), model = self.model.kind(), "saved reranker");
        Ok(())
    }

    /// Load a bundle, resolving the transition system by its saved name.
    pub fn load(path: &Path) -> Result<Self> {
        let bundle = read_bundle(path)?;
        let ts = transition_system_by_name(&bundle.transition_system)
            .ok_or_else(|| RerankError::UnknownTransitionSystem(bundle.transition_system.clone()))?;
        Self::from_bundle(path, bundle, ts)
    }

    /// Load a bundle with an explicit transition system.
    pub fn load_with(path: &Path, transition_system: Arc<dyn TransitionSystem>) -> Result<Self> {
        let bundle = read_bundle(path)?;
        Self::from_bundle(path, bundle, transition_system)
    }

    fn from_bundle(path: &Path, bundle: Bundle, ts: Arc<dyn TransitionSystem>) -> Result<Self> {
        if bundle.transition_system != ts.name() {
            warn!(
                saved = %bundle.transition_system,
                given = ts.name(),
                "transition system differs from the one the reranker was saved with"
            );
        }

        let features = bundle
            .feature_names
            .iter()
            .map(|name| construct(name, path))
            .collect::<Result<Vec<_>>>()?;

        let reranker = match bundle.boosted {
            Some(ranker) => Self::build(features, ts, RerankModel::Boosted(ranker))?,
            None => Self::grid_search(features, bundle.parameter, ts)?,
        };
        info!(
            path = %path.display(),
            model = reranker.model.kind(),
            features = reranker.feature_num(),
            "loaded reranker"
        );
        Ok(reranker)
    }
}

fn read_bundle(path: &Path) -> Result<Bundle> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
