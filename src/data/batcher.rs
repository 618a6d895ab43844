// ============================================================
// Layer 4 — Joint Batcher
// ============================================================
// Converts one DocumentSample into device tensors. Every
// segment of the document is one row of the batch.
//
// How batching works here:
//   Input:  DocumentSample with N segments
//   Output: JointBatch with
//     text                [N, ctx_len]      word ids, 0-padded
//     ner tags            [N, max_len]      one namespace, 0 = O
//     spans               [N, n, 2]         segment-relative, -1 padded
//     span labels         [N, n]            entity id / linked flag
//     span_coref_labels   [N, n, clusters]  cluster membership
//     relation_index      [r, roles]        candidate cluster tuples
//
// Rows are padded to the longest row, so a document whose
// segments carry no mentions still produces a [N, 1, 2] span
// tensor made of padding only.

use burn::prelude::*;

use crate::data::dataset::DocumentSample;
use crate::domain::document::SentenceMetadata;
use crate::domain::labels::{LabelSpace, NerLabelKind};
use crate::error::PipelineError;
use crate::ml::relation::RelationCandidates;
use crate::ml::tensor_ops::int_tensor;

// ─── NerLabelSet ──────────────────────────────────────────────────────────────
/// Gold tag tensors, one optional slot per label namespace.
#[derive(Debug, Clone)]
pub struct NerLabelSet<B: Backend> {
    pub ner: Option<Tensor<B, 2, Int>>,
    pub entity: Option<Tensor<B, 2, Int>>,
    pub link: Option<Tensor<B, 2, Int>>,
    pub is_entity: Option<Tensor<B, 2, Int>>,
}

impl<B: Backend> Default for NerLabelSet<B> {
    fn default() -> Self {
        Self { ner: None, entity: None, link: None, is_entity: None }
    }
}

impl<B: Backend> NerLabelSet<B> {
    pub fn select(&self, kind: NerLabelKind) -> Option<&Tensor<B, 2, Int>> {
        match kind {
            NerLabelKind::Ner => self.ner.as_ref(),
            NerLabelKind::Entity => self.entity.as_ref(),
            NerLabelKind::Link => self.link.as_ref(),
            NerLabelKind::IsEntity => self.is_entity.as_ref(),
        }
    }

    fn slot(&mut self, kind: NerLabelKind) -> &mut Option<Tensor<B, 2, Int>> {
        match kind {
            NerLabelKind::Ner => &mut self.ner,
            NerLabelKind::Entity => &mut self.entity,
            NerLabelKind::Link => &mut self.link,
            NerLabelKind::IsEntity => &mut self.is_entity,
        }
    }
}

// ─── JointBatch ───────────────────────────────────────────────────────────────
/// One document's worth of model input. All tensors have the segment
/// count as their first dimension except `relation_index`.
#[derive(Debug, Clone)]
pub struct JointBatch<B: Backend> {
    pub text: Tensor<B, 2, Int>,
    pub ner_labels: NerLabelSet<B>,
    /// `None` makes the model fall back to its own predicted spans.
    pub spans: Option<Tensor<B, 3, Int>>,
    /// `None` when the document has no coreference clusters.
    pub span_coref_labels: Option<Tensor<B, 3, Int>>,
    pub span_link_labels: Option<Tensor<B, 2, Int>>,
    pub span_entity_labels: Option<Tensor<B, 2, Int>>,
    pub relation_index: Option<RelationCandidates<B>>,
    pub metadata: Vec<SentenceMetadata>,
}

// ─── JointBatcher ─────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct JointBatcher<B: Backend> {
    pub device: B::Device,
    pub labels: LabelSpace,
}

impl<B: Backend> JointBatcher<B> {
    pub fn new(device: B::Device, labels: LabelSpace) -> Self {
        Self { device, labels }
    }

    pub fn batch(&self, sample: &DocumentSample) -> Result<JointBatch<B>, PipelineError> {
        let rows = sample.sentences.len();
        if rows == 0 {
            return Err(PipelineError::invalid_batch(format!(
                "document '{}' has no segments to batch",
                sample.doc_key
            )));
        }

        // ── Text ──────────────────────────────────────────────────────────────
        let ctx_len = sample.sentences.iter().map(|s| s.word_ids.len()).max().unwrap_or(0).max(1);
        let text = sample
            .sentences
            .iter()
            .flat_map(|s| padded(s.word_ids.iter().map(|&id| i64::from(id)), ctx_len, 0))
            .collect();
        let text = int_tensor::<B, 2>(text, [rows, ctx_len], &self.device);

        // ── Tags ──────────────────────────────────────────────────────────────
        let max_len = sample.sentences.iter().map(|s| s.sentence_len()).max().unwrap_or(0).max(1);
        let tags = sample
            .sentences
            .iter()
            .flat_map(|s| padded(s.tag_ids.iter().map(|&t| t as i64), max_len, 0))
            .collect();
        let mut ner_labels = NerLabelSet::default();
        *ner_labels.slot(self.labels.ner_label_kind) = Some(int_tensor(tags, [rows, max_len], &self.device));

        // ── Spans ─────────────────────────────────────────────────────────────
        let n = sample.sentences.iter().map(|s| s.spans.len()).max().unwrap_or(0).max(1);
        let mut spans = Vec::with_capacity(rows * n * 2);
        let mut entity = Vec::with_capacity(rows * n);
        let mut link = Vec::with_capacity(rows * n);
        for sentence in &sample.sentences {
            for slot in 0..n {
                match sentence.spans.get(slot) {
                    Some(s) => {
                        spans.extend([s.span.start as i64, s.span.end as i64]);
                        entity.push(s.entity as i64);
                        link.push(i64::from(s.linked()));
                    }
                    None => {
                        spans.extend([-1, -1]);
                        entity.push(0);
                        link.push(0);
                    }
                }
            }
        }

        let clusters = sample.num_clusters();
        let span_coref_labels = (clusters > 0).then(|| {
            let membership = sample
                .sentences
                .iter()
                .flat_map(|sentence| {
                    (0..n).flat_map(move |slot| {
                        let members = sentence.spans.get(slot).map(|s| s.clusters.as_slice()).unwrap_or(&[]);
                        (0..clusters).map(move |c| i64::from(members.contains(&c)))
                    })
                })
                .collect();
            int_tensor::<B, 3>(membership, [rows, n, clusters], &self.device)
        });

        // ── Relations ─────────────────────────────────────────────────────────
        let arity = self.labels.num_entity_labels();
        let relation_index = match (&span_coref_labels, sample.relations.is_empty()) {
            (Some(_), false) => {
                if let Some(bad) = sample.relations.iter().find(|r| r.clusters.len() != arity) {
                    return Err(PipelineError::invalid_batch(format!(
                        "relation candidate {:?} of '{}' does not have {arity} roles",
                        bad.clusters, sample.doc_key
                    )));
                }
                let count = sample.relations.len();
                let tuples = sample
                    .relations
                    .iter()
                    .flat_map(|r| r.clusters.iter().map(|&c| c as i64))
                    .collect();
                let gold = sample.relations.iter().map(|r| i64::from(r.gold)).collect();
                Some(RelationCandidates {
                    tuples: int_tensor(tuples, [count, arity], &self.device),
                    labels: Some(int_tensor(gold, [count], &self.device)),
                })
            }
            _ => None,
        };

        Ok(JointBatch {
            text,
            ner_labels,
            spans: Some(int_tensor(spans, [rows, n, 2], &self.device)),
            span_coref_labels,
            span_link_labels: Some(int_tensor(link, [rows, n], &self.device)),
            span_entity_labels: Some(int_tensor(entity, [rows, n], &self.device)),
            relation_index,
            metadata: sample.sentence_metadata(),
        })
    }
}

/// `values` followed by `fill` up to `len` items.
fn padded(values: impl Iterator<Item = i64>, len: usize, fill: i64) -> impl Iterator<Item = i64> {
    values.chain(std::iter::repeat(fill)).take(len)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::Document;
    use crate::domain::traits::WordIndexer;
    use crate::ml::tensor_ops::int_values;
    use burn::backend::NdArray;

    type TB = NdArray;

    struct FixedIndexer;

    impl WordIndexer for FixedIndexer {
        fn word_id(&self, _word: &str) -> u32 {
            7
        }
    }

    fn sample(json: &str) -> DocumentSample {
        let doc: Document = serde_json::from_str(json).unwrap();
        DocumentSample::from_document(&doc, &FixedIndexer, &LabelSpace::default(), 0, 10)
    }

    fn batcher() -> JointBatcher<TB> {
        JointBatcher::new(Default::default(), LabelSpace::default())
    }

    #[test]
    fn test_batch_shapes_and_padding() {
        let sample = sample(
            r#"{"doc_id": "d", "words": ["a","b","c","d","e"],
                "paragraphs": [[0, 3], [3, 5]],
                "ner": [[0, 1, "Task"], [1, 3, "Method"], [3, 4, "Task"]],
                "coref": {"X": [[0, 1], [3, 4]]}}"#,
        );
        let batch = batcher().batch(&sample).unwrap();

        assert_eq!(batch.text.dims(), [2, 3]);
        assert_eq!(int_values(batch.text.clone()).unwrap(), vec![7, 7, 7, 7, 7, 0]);
        assert_eq!(batch.ner_labels.select(NerLabelKind::Ner).map(|t| t.dims()), Some([2, 3]));
        assert!(batch.ner_labels.select(NerLabelKind::Entity).is_none());

        let spans = batch.spans.unwrap();
        assert_eq!(int_values(spans).unwrap(), vec![0, 1, 1, 3, 0, 1, -1, -1]);
        assert_eq!(int_values(batch.span_link_labels.unwrap()).unwrap(), vec![1, 0, 1, 0]);
        assert_eq!(int_values(batch.span_coref_labels.unwrap()).unwrap(), vec![1, 0, 1, 0]);
        assert_eq!(batch.metadata[1].start_pos_in_doc, 3);
    }

    #[test]
    fn test_mentionless_document_is_all_padding() {
        let sample = sample(r#"{"doc_id": "d", "words": ["a","b"]}"#);
        let batch = batcher().batch(&sample).unwrap();

        assert_eq!(int_values(batch.spans.unwrap()).unwrap(), vec![-1, -1]);
        assert!(batch.span_coref_labels.is_none());
        assert!(batch.relation_index.is_none());
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let sample = sample(r#"{"doc_id": "empty"}"#);
        assert!(matches!(batcher().batch(&sample), Err(PipelineError::InvalidBatch(_))));
    }
}
