// ============================================================
// Layer 4 — Document Samples
// ============================================================
// Converts one SciREX document into the plain-Rust sample the
// batcher turns into tensors. One segment (paragraph, section
// or the whole document) becomes one batch element; its text
// row is the segment plus `context_width` words on each side.
//
//   words:    ... w40 w41 [w42 ... w90) w90 w91 ...
//                 └ ctx ┘ └─ segment ─┘ └ ctx ┘
//   start_ix = 42 - 40 = 2,   end_ix = 90 - 40 = 50
//
// Gold mentions are kept when they lie inside the segment, have
// a type from the entity vocabulary and do not overlap an earlier
// kept mention. The same set drives the BIO tags, the gold
// mention dict and the span labels, so the three always agree.

use burn::data::dataset::Dataset;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::domain::document::{Document, DocumentMetadata, SentenceMetadata};
use crate::domain::labels::{LabelSpace, MENTION_LABEL, OUTSIDE_TAG};
use crate::domain::mentions::MentionDict;
use crate::domain::span::Span;
use crate::domain::traits::WordIndexer;

/// A gold mention inside one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanSample {
    /// Segment-relative, half-open.
    pub span: Span,
    pub entity: usize,
    /// Ids of the coreference clusters containing this exact span.
    pub clusters: Vec<usize>,
}

impl SpanSample {
    pub fn linked(&self) -> bool {
        !self.clusters.is_empty()
    }
}

/// One batch element: a segment and its surrounding context.
#[derive(Debug, Clone)]
pub struct SentenceSample {
    pub word_ids: Vec<u32>,
    pub start_ix: usize,
    pub end_ix: usize,
    pub start_pos_in_doc: usize,
    /// One tag id per segment token, in the configured label namespace.
    pub tag_ids: Vec<usize>,
    pub spans: Vec<SpanSample>,
    pub ner_dict: MentionDict,
}

impl SentenceSample {
    pub fn sentence_len(&self) -> usize {
        self.end_ix - self.start_ix
    }
}

/// A candidate relation: one cluster id per entity role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSample {
    pub clusters: Vec<usize>,
    pub gold: bool,
}

/// Everything the batcher needs for one document.
#[derive(Debug, Clone)]
pub struct DocumentSample {
    pub doc_key: String,
    pub document_metadata: Arc<DocumentMetadata>,
    pub sentences: Vec<SentenceSample>,
    pub relations: Vec<RelationSample>,
}

impl DocumentSample {
    pub fn from_document(
        doc: &Document,
        indexer: &impl WordIndexer,
        labels: &LabelSpace,
        context_width: usize,
        max_relation_candidates: usize,
    ) -> Self {
        let document_metadata = Arc::new(DocumentMetadata::from_document(doc));
        let cluster_ids = &document_metadata.cluster_name_to_id;
        let word_ids: Vec<u32> = doc.words.iter().map(|w| indexer.word_id(w)).collect();

        let sentences = doc
            .model_segments()
            .iter()
            .filter(|segment| !segment.is_empty() && segment.end <= doc.words.len())
            .map(|segment| {
                let ctx_start = segment.start.saturating_sub(context_width);
                let ctx_end = (segment.end + context_width).min(doc.words.len());
                let mentions = segment_mentions(doc, segment, labels);

                let mut tags = vec![OUTSIDE_TAG.to_string(); segment.len()];
                let mut spans = Vec::with_capacity(mentions.len());
                let mut ner_dict = MentionDict::new();
                for (span, entity_type) in mentions {
                    let clusters: Vec<usize> = doc
                        .clusters_of(&span)
                        .iter()
                        .filter_map(|name| cluster_ids.get(*name).copied())
                        .collect();
                    let label = labels.ner_label_kind.mention_label(
                        entity_type,
                        !clusters.is_empty(),
                        &labels.entity_labels,
                    );
                    let local = Span::new(span.start - segment.start, span.end - segment.start);
                    tags[local.start] = format!("B-{label}");
                    for tag in &mut tags[local.start + 1..local.end] {
                        *tag = format!("I-{label}");
                    }
                    ner_dict.insert(span, vec![MENTION_LABEL.to_string(), entity_type.to_string()]);
                    // Types outside the vocabulary are tagged but never classified
                    if let Some(entity) = labels.entity_index(entity_type) {
                        spans.push(SpanSample { span: local, entity, clusters });
                    }
                }

                SentenceSample {
                    word_ids: word_ids[ctx_start..ctx_end].to_vec(),
                    start_ix: segment.start - ctx_start,
                    end_ix: segment.end - ctx_start,
                    start_pos_in_doc: segment.start,
                    tag_ids: tags.iter().map(|t| labels.tag_index(t).unwrap_or(0)).collect(),
                    spans,
                    ner_dict,
                }
            })
            .collect();

        Self {
            doc_key: doc.doc_id.clone(),
            relations: relation_candidates(doc, labels, max_relation_candidates),
            document_metadata,
            sentences,
        }
    }

    pub fn sentence_metadata(&self) -> Vec<SentenceMetadata> {
        self.sentences
            .iter()
            .map(|s| SentenceMetadata {
                doc_key: self.doc_key.clone(),
                start_ix: s.start_ix,
                end_ix: s.end_ix,
                start_pos_in_doc: s.start_pos_in_doc,
                ner_dict: s.ner_dict.clone(),
                document_metadata: Arc::clone(&self.document_metadata),
            })
            .collect()
    }

    pub fn num_clusters(&self) -> usize {
        self.document_metadata.cluster_name_to_id.len()
    }
}

/// Taggable, non-overlapping mentions inside `segment`, in order.
/// Longer mentions win ties at the same start.
fn segment_mentions<'a>(doc: &'a Document, segment: &Span, labels: &LabelSpace) -> Vec<(Span, &'a str)> {
    let mut candidates: Vec<(Span, &str)> = doc
        .ner
        .iter()
        .filter(|m| !m.span.is_empty() && segment.contains(&m.span))
        .filter(|m| labels.tags_type(&m.label))
        .map(|m| (m.span, m.label.as_str()))
        .collect();
    candidates.sort_by_key(|(span, _)| (span.start, std::cmp::Reverse(span.end)));

    let mut kept = Vec::with_capacity(candidates.len());
    let mut last_end = segment.start;
    for (span, label) in candidates {
        if span.start >= last_end {
            last_end = span.end;
            kept.push((span, label));
        }
    }
    kept
}

/// Majority mention type of every cluster, by cluster id.
fn cluster_types(doc: &Document) -> Vec<Option<String>> {
    doc.coref
        .values()
        .map(|spans| {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for mention in doc.ner.iter().filter(|m| spans.contains(&m.span)) {
                *counts.entry(mention.label.as_str()).or_default() += 1;
            }
            counts
                .into_iter()
                .max_by_key(|(_, n)| *n)
                .map(|(label, _)| label.to_string())
        })
        .collect()
}

/// Gold relation tuples first, then type-consistent negatives from the
/// Cartesian product of clusters per role, up to `cap` candidates.
fn relation_candidates(doc: &Document, labels: &LabelSpace, cap: usize) -> Vec<RelationSample> {
    let roles = &labels.entity_labels;
    let ids = doc.cluster_name_to_id();
    if ids.is_empty() || roles.is_empty() {
        return Vec::new();
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tuple in doc.relation_tuples(roles) {
        let clusters: Vec<usize> = tuple.iter().filter_map(|name| ids.get(name).copied()).collect();
        if out.len() < cap && seen.insert(clusters.clone()) {
            out.push(RelationSample { clusters, gold: true });
        }
    }

    let types = cluster_types(doc);
    let per_role: Vec<Vec<usize>> = roles
        .iter()
        .map(|role| {
            types
                .iter()
                .enumerate()
                .filter(|(_, t)| t.as_deref() == Some(role.as_str()))
                .map(|(id, _)| id)
                .collect()
        })
        .collect();
    if per_role.iter().any(Vec::is_empty) {
        return out;
    }

    // Odometer walk over the product
    let mut cursor = vec![0usize; roles.len()];
    'walk: while out.len() < cap {
        let clusters: Vec<usize> = cursor.iter().zip(&per_role).map(|(&i, ids)| ids[i]).collect();
        if seen.insert(clusters.clone()) {
            out.push(RelationSample { clusters, gold: false });
        }
        for pos in (0..cursor.len()).rev() {
            cursor[pos] += 1;
            if cursor[pos] < per_role[pos].len() {
                continue 'walk;
            }
            cursor[pos] = 0;
        }
        break;
    }
    out
}

// ─── DocumentDataset ──────────────────────────────────────────────────────────
pub struct DocumentDataset {
    samples: Vec<DocumentSample>,
}

impl DocumentDataset {
    pub fn new(samples: Vec<DocumentSample>) -> Self {
        Self { samples }
    }

    pub fn from_documents(
        docs: &[Document],
        indexer: &impl WordIndexer,
        labels: &LabelSpace,
        context_width: usize,
        max_relation_candidates: usize,
    ) -> Self {
        Self::new(
            docs.iter()
                .map(|d| DocumentSample::from_document(d, indexer, labels, context_width, max_relation_candidates))
                .collect(),
        )
    }
}

impl Dataset<DocumentSample> for DocumentDataset {
    fn get(&self, index: usize) -> Option<DocumentSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
