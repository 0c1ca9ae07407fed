//! Configuration loading from nbest-rerank.toml and pyproject.toml.
//!
//! Follows the usual Python tooling conventions:
//! - Standalone `nbest-rerank.toml` in the directory
//! - `[tool.nbest-rerank]` section in pyproject.toml, walking up parents
//!
//! ## Example
//!
//! ```toml
//! [tool.nbest-rerank]
//! batch-size = 64
//! num-workers = 4
//!
//! [tool.nbest-rerank.serial-grid]
//! start = 0.0
//! stop = 2.01
//! step = 0.05
//!
//! [tool.nbest-rerank.boost]
//! learning-rate = 0.05
//! n-estimators = 20
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::reranker::{BoostParams, GridSpec};

pub const CONFIG_FILE: &str = "nbest-rerank.toml";

/// Reranker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankConfig {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,

    /// Pseudo examples per call to a batched feature.
    pub batch_size: usize,

    /// Worker threads for the parallel grid search.
    pub num_workers: usize,

    /// Grid for single-threaded search.
    pub serial_grid: GridSpec,

    /// Grid for the parallel search.
    pub parallel_grid: GridSpec,

    /// Hyperparameters for the boosted ranker.
    pub boost: BoostParams,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            source: None,
            batch_size: 128,
            num_workers: 8,
            serial_grid: GridSpec::serial(),
            parallel_grid: GridSpec::parallel(),
            boost: BoostParams::default(),
        }
    }
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    batch_size: Option<usize>,
    num_workers: Option<usize>,
    serial_grid: Option<GridSpec>,
    parallel_grid: Option<GridSpec>,
    boost: Option<BoostParams>,
}

/// Wrapper for pyproject.toml structure.
#[derive(Debug, Deserialize)]
struct PyProject {
    tool: Option<PyProjectTool>,
}

#[derive(Debug, Deserialize)]
struct PyProjectTool {
    #[serde(rename = "nbest-rerank")]
    nbest_rerank: Option<RawConfig>,
}

impl RerankConfig {
    /// Load configuration for the given directory.
    ///
    /// Search order:
    /// 1. nbest-rerank.toml in directory
    /// 2. pyproject.toml [tool.nbest-rerank] in directory
    /// 3. Walk up to find pyproject.toml
    /// 4. Default config if nothing found
    ///
    /// Unreadable or invalid files are skipped with a warning.
    pub fn load(directory: &Path) -> Self {
        let standalone = directory.join(CONFIG_FILE);
        if standalone.exists() {
            match Self::from_file(&standalone) {
                Ok(config) => return config,
                Err(err) => warn!(path = %standalone.display(), "skipping config: {err:#}"),
            }
        }

        for dir in directory.ancestors() {
            let pyproject = dir.join("pyproject.toml");
            if !pyproject.exists() {
                continue;
            }
            match Self::load_pyproject(&pyproject) {
                Ok(Some(config)) => return config,
                Ok(None) => debug!(path = %pyproject.display(), "no [tool.nbest-rerank] section"),
                Err(err) => warn!(path = %pyproject.display(), "skipping config: {err:#}"),
            }
        }

        Self::default()
    }

    /// Parse a standalone config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(Self::from_raw(raw, path.to_path_buf()))
    }

    fn load_pyproject(path: &Path) -> Result<Option<Self>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let pyproject: PyProject = toml::from_str(&content)
            .with_context(|| format!("Invalid pyproject: {}", path.display()))?;
        Ok(pyproject
            .tool
            .and_then(|tool| tool.nbest_rerank)
            .map(|raw| Self::from_raw(raw, path.to_path_buf())))
    }

    fn from_raw(raw: RawConfig, source: PathBuf) -> Self {
        let defaults = Self::default();
        Self {
            source: Some(source),
            batch_size: raw.batch_size.unwrap_or(defaults.batch_size),
            num_workers: raw.num_workers.unwrap_or(defaults.num_workers),
            serial_grid: raw.serial_grid.unwrap_or(defaults.serial_grid),
            parallel_grid: raw.parallel_grid.unwrap_or(defaults.parallel_grid),
            boost: raw.boost.unwrap_or(defaults.boost),
        }
    }

    /// Format config for verbose display.
    pub fn display_summary(&self) -> String {
        let mut lines = Vec::new();

        if let Some(ref source) = self.source {
            lines.push(format!("   Config: {}", source.display()));
        } else {
            lines.push("   Config: (defaults)".to_string());
        }

        lines.push(format!("   Batch size: {}", self.batch_size));
        lines.push(format!("   Workers: {}", self.num_workers));
        for (label, grid) in [("Serial grid", &self.serial_grid), ("Parallel grid", &self.parallel_grid)] {
            lines.push(format!(
                "   {label}: [{}, {}) step {}",
                grid.start, grid.stop, grid.step
            ));
        }
        lines.push(format!(
            "   Boost: lr={} depth={} rounds={}",
            self.boost.learning_rate, self.boost.max_depth, self.boost.n_estimators
        ));

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = RerankConfig::default();
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.serial_grid, GridSpec::serial());
        assert_eq!(config.parallel_grid, GridSpec::parallel());
    }

    #[test]
    fn test_standalone_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "batch-size = 16\n").unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.nbest-rerank]\nbatch-size = 32\n",
        )
        .unwrap();

        let config = RerankConfig::load(dir.path());
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.source, Some(dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn test_pyproject_found_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.nbest-rerank]\nnum-workers = 2\n\n[tool.nbest-rerank.boost]\nn-estimators = 9\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let config = RerankConfig::load(&nested);
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.boost.n_estimators, 9);
        assert_eq!(config.boost.learning_rate, 0.1);
    }

    #[test]
    fn test_grid_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[serial-grid]\nstart = 0.0\nstop = 1.0\nstep = 0.5\n").unwrap();

        let config = RerankConfig::from_file(&path).unwrap();
        assert_eq!(config.serial_grid.values(), vec![0.0, 0.5]);
        assert_eq!(config.parallel_grid, GridSpec::parallel());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "batch-size = \"many\"\n").unwrap();
        assert!(RerankConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_summary_mentions_source() {
        let summary = RerankConfig::default().display_summary();
        assert!(summary.contains("(defaults)"));
        assert!(summary.contains("Batch size: 128"));
    }
}
