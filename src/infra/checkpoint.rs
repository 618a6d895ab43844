// ============================================================
// Layer 6 — Archive Manager
// ============================================================
// A model archive is a folder holding everything prediction
// needs to rebuild the pipeline:
//
//   archive/
//     config.json      ← ArchiveConfig (architecture + labels)
//     model.mpk        ← weights, Burn CompactRecorder
//     tokenizer.json   ← word-level vocabulary
//     metrics.json     ← validation metrics, incl. the best
//                        link threshold
//
// The config is stored separately from the weights because the
// model has to be rebuilt with the same architecture before a
// record can be loaded into it.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::domain::labels::LabelSpace;
use crate::infra::metrics::MetricMap;
use crate::ml::model::{JointModel, JointModelConfig};

/// Key under which `metrics.json` stores the tuned link threshold.
pub const THRESHOLD_KEY: &str = "best_validation__span_threshold";

/// Everything about an archive except its weights and vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub model: JointModelConfig,
    pub labels: LabelSpace,
    #[serde(default)]
    pub display_metrics: Option<Vec<String>>,
    pub link_threshold: f64,
    /// Words of context on each side of a segment.
    pub context_width: usize,
    pub max_relation_candidates: usize,
}

pub struct ArchiveManager {
    dir: PathBuf,
}

impl ArchiveManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the archive folder (and parents) if it is missing.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("Cannot create archive '{}'", self.dir.display()))
    }

    pub fn save_config(&self, cfg: &ArchiveConfig) -> Result<()> {
        let path = self.dir.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved archive config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<ArchiveConfig> {
        let path = self.dir.join("config.json");
        let json = fs::read_to_string(&path).with_context(|| {
            format!("Cannot read config from '{}'. Is this an archive folder?", path.display())
        })?;
        serde_json::from_str(&json).with_context(|| format!("Malformed archive config '{}'", path.display()))
    }

    /// Write the weights to `model.mpk` (the recorder adds the extension).
    pub fn save_model<B: Backend>(&self, model: &JointModel<B>) -> Result<()> {
        let path = self.dir.join("model");
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save weights to '{}'", path.display()))?;
        tracing::debug!("Saved weights to '{}.mpk'", path.display());
        Ok(())
    }

    /// Load the archived weights into `model`, which must have been built
    /// from the archived config.
    pub fn load_model<B: Backend>(&self, model: JointModel<B>, device: &B::Device) -> Result<JointModel<B>> {
        let path = self.dir.join("model");
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load weights '{}.mpk'", path.display()))?;
        Ok(model.load_record(record))
    }

    pub fn write_metrics(&self, metrics: &MetricMap) -> Result<()> {
        let path = self.dir.join("metrics.json");
        fs::write(&path, serde_json::to_string_pretty(metrics)?)
            .with_context(|| format!("Cannot write metrics to '{}'", path.display()))
    }

    /// The tuned link threshold from `metrics.json`.
    pub fn load_threshold(&self) -> Result<f64> {
        let path = self.dir.join("metrics.json");
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read metrics from '{}'", path.display()))?;
        let metrics: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&json)?;
        metrics
            .get(THRESHOLD_KEY)
            .and_then(serde_json::Value::as_f64)
            .with_context(|| format!("'{}' has no numeric '{THRESHOLD_KEY}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tensor_ops::float_values;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn config() -> ArchiveConfig {
        let labels = LabelSpace::default();
        ArchiveConfig {
            model: JointModelConfig::new(12, labels.num_tags(), labels.num_entity_labels())
                .with_embedding_dim(4)
                .with_residual_embedding_dim(4)
                .with_d_model(8)
                .with_num_heads(2)
                .with_num_layers(1)
                .with_d_ff(8)
                .with_hidden_dim(4)
                .with_feature_size(2),
            labels,
            display_metrics: Some(vec!["span_f1".to_string()]),
            link_threshold: 0.4,
            context_width: 5,
            max_relation_candidates: 50,
        }
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveManager::new(dir.path());
        archive.save_config(&config()).unwrap();

        let loaded = archive.load_config().unwrap();
        assert_eq!(loaded.labels, LabelSpace::default());
        assert_eq!(loaded.model.d_model, 8);
        assert_eq!(loaded.context_width, 5);
        assert_eq!(loaded.display_metrics, Some(vec!["span_f1".to_string()]));
    }

    #[test]
    fn test_weights_round_trip() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveManager::new(dir.path());
        let cfg = config();

        let saved = cfg.model.init::<TB>(&device);
        archive.save_model(&saved).unwrap();
        let loaded = archive.load_model(cfg.model.init::<TB>(&device), &device).unwrap();

        let a = float_values(saved.link_classifier.scorer.hidden.weight.val()).unwrap();
        let b = float_values(loaded.link_classifier.scorer.hidden.weight.val()).unwrap();
        // CompactRecorder stores half precision
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-2));
    }

    #[test]
    fn test_threshold_is_read_from_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveManager::new(dir.path());
        assert!(archive.load_threshold().is_err());

        archive
            .write_metrics(&MetricMap::from([(THRESHOLD_KEY.to_string(), 0.35)]))
            .unwrap();
        assert_eq!(archive.load_threshold().unwrap(), 0.35);

        archive.write_metrics(&MetricMap::new()).unwrap();
        assert!(archive.load_threshold().is_err());
    }
}
