// ============================================================
// Layer 2 — Init Use Case
// ============================================================
// Creates a fresh model archive from a corpus:
//
//   Step 1: Load corpus documents         (Layer 4 - data)
//   Step 2: Build the word vocabulary     (Layer 6 - infra)
//   Step 3: Resolve the label space       (Layer 3 - domain)
//   Step 4: Save config + fresh weights   (Layer 6 - infra)
//   Step 5: Save metrics.json with the default link threshold

use anyhow::Result;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::loader::JsonlDocumentSource;
use crate::domain::labels::{LabelSpace, NerLabelKind, ENTITY_TYPES};
use crate::domain::traits::DocumentSource;
use crate::infra::checkpoint::{ArchiveConfig, ArchiveManager, THRESHOLD_KEY};
use crate::infra::metrics::MetricMap;
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::model::JointModelConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    pub archive_folder: PathBuf,
    pub corpus: PathBuf,
    pub vocab_size: usize,
    pub ner_label_kind: NerLabelKind,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub d_ff: usize,
    pub hidden_dim: usize,
    pub feature_size: usize,
    pub max_span_width: usize,
    pub dropout: f64,
    pub use_attentive_span_extractor: bool,
    pub use_entity_classifier: bool,
    pub context_width: usize,
    pub max_relation_candidates: usize,
    pub link_threshold: f64,
    pub display_metrics: Option<Vec<String>>,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            archive_folder: PathBuf::from("archive"),
            corpus: PathBuf::from("data/train.jsonl"),
            vocab_size: 30000,
            ner_label_kind: NerLabelKind::Ner,
            d_model: 128,
            num_heads: 4,
            num_layers: 2,
            d_ff: 256,
            hidden_dim: 150,
            feature_size: 20,
            max_span_width: 20,
            dropout: 0.1,
            use_attentive_span_extractor: true,
            use_entity_classifier: true,
            context_width: 0,
            max_relation_candidates: 1000,
            link_threshold: 0.5,
            display_metrics: None,
        }
    }
}

pub struct InitUseCase {
    config: InitConfig,
}

impl InitUseCase {
    pub fn new(config: InitConfig) -> Self {
        Self { config }
    }

    pub fn execute<B: Backend>(&self, device: &B::Device) -> Result<ArchiveConfig> {
        let cfg = &self.config;
        let archive = ArchiveManager::new(&cfg.archive_folder);
        archive.create()?;

        // ── Step 1-2: Corpus and vocabulary ───────────────────────────────────
        let docs = JsonlDocumentSource::new(&cfg.corpus).load_all()?;
        let words = docs.iter().flat_map(|d| d.words.iter().map(String::as_str));
        let vocab = TokenizerStore::new(&cfg.archive_folder).build_and_save(words, cfg.vocab_size)?;

        // ── Step 3: Labels ────────────────────────────────────────────────────
        let labels = LabelSpace::new(cfg.ner_label_kind, ENTITY_TYPES.iter().map(|s| s.to_string()).collect());
        tracing::info!("NER namespace '{}' with {} tags", labels.ner_label_kind, labels.num_tags());

        // ── Step 4: Config and weights ────────────────────────────────────────
        let model = JointModelConfig::new(vocab.size(), labels.num_tags(), labels.num_entity_labels())
            .with_d_model(cfg.d_model)
            .with_num_heads(cfg.num_heads)
            .with_num_layers(cfg.num_layers)
            .with_d_ff(cfg.d_ff)
            .with_hidden_dim(cfg.hidden_dim)
            .with_feature_size(cfg.feature_size)
            .with_max_span_width(cfg.max_span_width)
            .with_dropout(cfg.dropout)
            .with_use_attentive_span_extractor(cfg.use_attentive_span_extractor)
            .with_use_entity_classifier(cfg.use_entity_classifier);
        let archive_cfg = ArchiveConfig {
            model,
            labels,
            display_metrics: cfg.display_metrics.clone(),
            link_threshold: cfg.link_threshold,
            context_width: cfg.context_width,
            max_relation_candidates: cfg.max_relation_candidates,
        };
        archive.save_config(&archive_cfg)?;
        archive.save_model(&archive_cfg.model.init::<B>(device))?;

        // ── Step 5: Metrics ───────────────────────────────────────────────────
        archive.write_metrics(&MetricMap::from([(THRESHOLD_KEY.to_string(), cfg.link_threshold)]))?;

        tracing::info!(
            "Initialised archive '{}' from {} documents",
            cfg.archive_folder.display(),
            docs.len()
        );
        Ok(archive_cfg)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::predict_use_case::{LinkedDocument, PredictConfig, PredictUseCase};
    use crate::data::loader::read_jsonl;
    use crate::domain::document::Document;
    use burn::backend::NdArray;
    use std::fs;

    type TB = NdArray;

    const CORPUS: &str = concat!(
        r#"{"doc_id": "p1", "words": ["we","use","bert","for","ner","and","bert","again"], "#,
        r#""paragraphs": [[0, 4], [4, 8]], "#,
        r#""ner": [[2, 3, "Method"], [4, 5, "Task"], [6, 7, "Method"]], "#,
        r#""coref": {"BERT": [[2, 3], [6, 7]], "NER": [[4, 5]], "Unused": []}, "#,
        r#""n_ary_relations": []}"#,
        "\n",
        r#"{"doc_id": "p2", "words": ["plain","text"]}"#,
        "\n"
    );

    fn small(dir: &std::path::Path, link_threshold: f64) -> InitConfig {
        InitConfig {
            archive_folder: dir.join("archive"),
            corpus: dir.join("corpus.jsonl"),
            vocab_size: 50,
            d_model: 8,
            num_heads: 2,
            num_layers: 1,
            d_ff: 16,
            hidden_dim: 8,
            feature_size: 4,
            max_span_width: 4,
            context_width: 2,
            link_threshold,
            ..InitConfig::default()
        }
    }

    #[test]
    fn test_init_writes_every_archive_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("corpus.jsonl"), CORPUS).unwrap();

        let cfg = InitUseCase::new(small(dir.path(), 0.5)).execute::<TB>(&Default::default()).unwrap();
        assert_eq!(cfg.model.vocab_size, 2 + 9);

        let archive = dir.path().join("archive");
        for file in ["config.json", "model.mpk", "tokenizer.json", "metrics.json"] {
            assert!(archive.join(file).exists(), "missing {file}");
        }
        assert_eq!(ArchiveManager::new(&archive).load_threshold().unwrap(), 0.5);
    }

    #[test]
    fn test_predict_links_with_fresh_archive() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.jsonl");
        fs::write(&corpus, CORPUS).unwrap();
        // Threshold 0 links every candidate span
        InitUseCase::new(small(dir.path(), 0.0)).execute::<TB>(&Default::default()).unwrap();

        let predict = PredictConfig {
            archive_folder: dir.path().join("archive"),
            test_file: corpus.clone(),
            output_file: dir.path().join("links.jsonl"),
            cuda_device: -1,
        };
        let linked = PredictUseCase::new(predict.clone()).execute::<TB>(&Default::default()).unwrap();

        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].linked_clusters["BERT"], 2);
        assert_eq!(linked[0].linked_clusters["NER"], 1);
        assert_eq!(linked[0].linked_clusters["Unused"], 0);
        assert!(linked[1].linked_clusters.is_empty());

        let pruned: Vec<Document> = read_jsonl(&predict.linked_output()).unwrap();
        assert_eq!(pruned[0].coref.keys().collect::<Vec<_>>(), vec!["BERT", "NER"]);
        let written: Vec<LinkedDocument> = read_jsonl(&predict.output_file).unwrap();
        assert_eq!(written, linked);
    }
}
