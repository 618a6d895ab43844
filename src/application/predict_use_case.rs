// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Runs link prediction over a SciREX file:
//
//   Step 1: Load archive config, weights,   (Layer 6 - infra)
//           vocabulary and best threshold
//   Step 2: Load test documents             (Layer 4 - data)
//   Step 3: One batch per document →        (Layer 5 - ml)
//           per-cluster linked-span counts
//   Step 4: Aggregate counts per document
//   Step 5: Write the aggregated counts and a copy of the test
//           file whose coreference clusters without any linked
//           span are removed (`<test_file>.linked_ss`)

use anyhow::{Context, Result};
use burn::{data::dataset::Dataset, prelude::*};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

use crate::data::batcher::JointBatcher;
use crate::data::dataset::DocumentDataset;
use crate::data::loader::{write_jsonl, JsonlDocumentSource};
use crate::domain::document::Document;
use crate::domain::traits::DocumentSource;
use crate::error::PredictError;
use crate::infra::checkpoint::ArchiveManager;
use crate::infra::metrics::PipelineMetrics;
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::model::{JointPipeline, LinkPrediction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    pub archive_folder: PathBuf,
    pub test_file: PathBuf,
    pub output_file: PathBuf,
    /// Negative selects the CPU adapter.
    pub cuda_device: i32,
}

impl PredictConfig {
    pub fn linked_output(&self) -> PathBuf {
        let mut name = self.test_file.clone().into_os_string();
        name.push(".linked_ss");
        PathBuf::from(name)
    }
}

/// Linked-span counts of one document, by cluster name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedDocument {
    pub doc_id: String,
    pub linked_clusters: BTreeMap<String, usize>,
}

/// Sums per-batch cluster counts into per-document counts, keeping
/// documents in the order they were first seen.
#[derive(Debug, Default)]
pub struct LinkAggregator {
    documents: Vec<LinkedDocument>,
    index: BTreeMap<String, usize>,
}

impl LinkAggregator {
    pub fn add(&mut self, prediction: &LinkPrediction) -> Result<(), PredictError> {
        let meta = &prediction.document_metadata;
        let at = match self.index.get(&prediction.doc_key) {
            Some(&at) => at,
            None => {
                self.documents.push(LinkedDocument {
                    doc_id: prediction.doc_key.clone(),
                    linked_clusters: meta.cluster_name_to_id.keys().map(|k| (k.clone(), 0)).collect(),
                });
                self.index.insert(prediction.doc_key.clone(), self.documents.len() - 1);
                self.documents.len() - 1
            }
        };

        let names = meta.cluster_names();
        let doc = &mut self.documents[at];
        for (cluster_id, &count) in prediction.cluster_sizes.iter().enumerate() {
            let name = names.get(&cluster_id).ok_or_else(|| PredictError::UnknownClusterId {
                doc_id: doc.doc_id.clone(),
                cluster_id,
            })?;
            *doc.linked_clusters.entry(name.clone()).or_default() += count;
        }
        Ok(())
    }

    /// Drop the clusters of `doc` that no linked span belongs to.
    pub fn prune(&self, doc: &mut Document) -> Result<(), PredictError> {
        let linked = self
            .index
            .get(&doc.doc_id)
            .map(|&at| &self.documents[at])
            .ok_or_else(|| PredictError::MissingDocument(doc.doc_id.clone()))?;

        if let Some(missing) = doc.coref.keys().find(|k| !linked.linked_clusters.contains_key(*k)) {
            return Err(PredictError::MissingCluster {
                doc_id: doc.doc_id.clone(),
                cluster: missing.clone(),
            });
        }
        doc.coref.retain(|name, _| linked.linked_clusters[name] > 0);
        Ok(())
    }

    pub fn into_documents(self) -> Vec<LinkedDocument> {
        self.documents
    }
}

pub struct PredictUseCase {
    config: PredictConfig,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Self {
        Self { config }
    }

    pub fn execute<B: Backend>(&self, device: &B::Device) -> Result<Vec<LinkedDocument>> {
        let cfg = &self.config;

        // ── Step 1: Archive ───────────────────────────────────────────────────
        tracing::info!("Loading model from '{}'", cfg.archive_folder.display());
        let archive = ArchiveManager::new(&cfg.archive_folder);
        let archive_cfg = archive.load_config()?;
        let threshold = archive.load_threshold()?;
        let vocab = TokenizerStore::new(&cfg.archive_folder).load()?;
        let model = archive.load_model(archive_cfg.model.init::<B>(device), device)?;
        let pipeline = JointPipeline::new(model, archive_cfg.labels.clone(), archive_cfg.display_metrics.clone())?;
        let batcher = JointBatcher::<B>::new(device.clone(), archive_cfg.labels.clone());
        tracing::info!("Link threshold {:.3}", threshold);

        // ── Step 2-4: Predict and aggregate ───────────────────────────────────
        let mut docs = JsonlDocumentSource::new(&cfg.test_file).load_all()?;
        let dataset = DocumentDataset::from_documents(
            &docs,
            &vocab,
            &archive_cfg.labels,
            archive_cfg.context_width,
            archive_cfg.max_relation_candidates,
        );
        let mut metrics = PipelineMetrics::new();
        let mut aggregator = LinkAggregator::default();
        for sample in dataset.iter() {
            if sample.sentences.is_empty() {
                tracing::warn!("Document '{}' has no text to predict on", sample.doc_key);
                continue;
            }
            let batch = batcher
                .batch(&sample)
                .with_context(|| format!("Cannot batch document '{}'", sample.doc_key))?;
            let prediction = pipeline
                .decode_links(&batch, threshold, &mut metrics)
                .with_context(|| format!("Link prediction failed for '{}'", sample.doc_key))?;
            aggregator.add(&prediction)?;
        }
        for (name, value) in pipeline.get_metrics(&mut metrics, true)? {
            tracing::info!("{name}: {value:.4}");
        }

        // ── Step 5: Write ─────────────────────────────────────────────────────
        for doc in &mut docs {
            aggregator.prune(doc)?;
        }
        let linked = aggregator.into_documents();
        write_jsonl(&cfg.output_file, &linked)?;
        write_jsonl(&cfg.linked_output(), &docs)?;
        tracing::info!(
            "Wrote link predictions for {} documents to '{}'",
            linked.len(),
            cfg.output_file.display()
        );
        Ok(linked)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::DocumentMetadata;
    use std::sync::Arc;

    fn prediction(doc: &str, sizes: Vec<usize>) -> LinkPrediction {
        LinkPrediction {
            doc_key: doc.to_string(),
            cluster_sizes: sizes,
            document_metadata: Arc::new(DocumentMetadata {
                doc_id: doc.to_string(),
                doc_length: 10,
                cluster_name_to_id: BTreeMap::from([("A".to_string(), 0), ("B".to_string(), 1)]),
            }),
        }
    }

    fn document(doc_id: &str, clusters: &[&str]) -> Document {
        let coref: BTreeMap<&str, Vec<[usize; 2]>> = clusters.iter().map(|c| (*c, vec![[0, 1]])).collect();
        serde_json::from_value(serde_json::json!({ "doc_id": doc_id, "coref": coref })).unwrap()
    }

    #[test]
    fn test_counts_accumulate_per_document() {
        let mut agg = LinkAggregator::default();
        agg.add(&prediction("d1", vec![1, 0])).unwrap();
        agg.add(&prediction("d2", vec![0, 0])).unwrap();
        agg.add(&prediction("d1", vec![2, 0])).unwrap();

        let docs = agg.into_documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "d1");
        assert_eq!(docs[0].linked_clusters["A"], 3);
        assert_eq!(docs[0].linked_clusters["B"], 0);
    }

    #[test]
    fn test_prune_keeps_linked_clusters() {
        let mut agg = LinkAggregator::default();
        agg.add(&prediction("d1", vec![1, 0])).unwrap();

        let mut doc = document("d1", &["A", "B"]);
        agg.prune(&mut doc).unwrap();
        assert_eq!(doc.coref.keys().collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn test_missing_document_and_cluster_are_errors() {
        let mut agg = LinkAggregator::default();
        agg.add(&prediction("d1", vec![1, 0])).unwrap();

        let err = agg.prune(&mut document("d9", &[])).unwrap_err();
        assert_eq!(err, PredictError::MissingDocument("d9".to_string()));

        let err = agg.prune(&mut document("d1", &["C"])).unwrap_err();
        assert!(matches!(err, PredictError::MissingCluster { ref cluster, .. } if cluster == "C"));
    }

    #[test]
    fn test_unknown_cluster_id_is_an_error() {
        let mut agg = LinkAggregator::default();
        let err = agg.add(&prediction("d1", vec![1, 0, 4])).unwrap_err();
        assert!(matches!(err, PredictError::UnknownClusterId { cluster_id: 2, .. }));
    }

    #[test]
    fn test_linked_output_appends_suffix() {
        let cfg = PredictConfig {
            archive_folder: "a".into(),
            test_file: "data/test.jsonl".into(),
            output_file: "out.jsonl".into(),
            cuda_device: -1,
        };
        assert_eq!(cfg.linked_output(), PathBuf::from("data/test.jsonl.linked_ss"));
    }
}
