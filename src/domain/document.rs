// ============================================================
// Layer 3 — Document Domain Types
// ============================================================
// A SciREX-style document as stored in JSON-lines files, plus
// the read-only metadata records the model sees per batch
// element.
//
// Example line (abridged):
//   {"doc_id": "paper-1",
//    "words": ["We", "propose", ...],
//    "sections": [[0, 120], [120, 480]],
//    "sentences": [[0, 14], [14, 40], ...],
//    "ner": [[3, 5, "Method"], ...],
//    "coref": {"BERT": [[3, 5], [90, 91]]},
//    "n_ary_relations": [{"Method": "BERT", "Task": "NER", ...}]}
//
// Unknown fields are carried through untouched so rewritten
// documents keep everything the input had.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

use crate::domain::mentions::MentionDict;
use crate::domain::span::Span;

/// One typed NER mention, serialised as `[start, end, label]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(usize, usize, String)", into = "(usize, usize, String)")]
pub struct Mention {
    pub span: Span,
    pub label: String,
}

impl From<(usize, usize, String)> for Mention {
    fn from((start, end, label): (usize, usize, String)) -> Self {
        Self { span: Span::new(start, end), label }
    }
}

impl From<Mention> for (usize, usize, String) {
    fn from(m: Mention) -> Self {
        (m.span.start, m.span.end, m.label)
    }
}

/// A full document with its annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,

    #[serde(default)]
    pub words: Vec<String>,

    #[serde(default)]
    pub sections: Vec<Span>,

    /// Flat, document-absolute sentence spans in reading order.
    #[serde(default)]
    pub sentences: Vec<Span>,

    #[serde(default)]
    pub ner: Vec<Mention>,

    /// Cluster name → mention spans.
    #[serde(default)]
    pub coref: BTreeMap<String, Vec<Span>>,

    /// Relation tuples: entity role → cluster name (plus optional extras
    /// such as `score`).
    #[serde(default)]
    pub n_ary_relations: Vec<BTreeMap<String, Value>>,

    /// Model-sized segments written by the `segment` command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraphs: Option<Vec<Span>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    pub fn doc_length(&self) -> usize {
        self.words.len()
    }

    /// Sentences grouped by the section that contains them.
    ///
    /// Without sections every sentence belongs to one group. A sentence
    /// that no section contains forms its own group, so order and
    /// coverage are never lost. Without sentences each section (or the
    /// whole document) counts as a single sentence.
    pub fn sentences_by_section(&self) -> Vec<Vec<Span>> {
        if self.sentences.is_empty() {
            return self.model_segments().into_iter().map(|s| vec![s]).collect();
        }
        if self.sections.is_empty() {
            return vec![self.sentences.clone()];
        }

        let mut groups: Vec<Vec<Span>> = Vec::new();
        let mut current: Option<usize> = None;
        for sentence in &self.sentences {
            let owner = self.sections.iter().position(|sec| sec.contains(sentence));
            match (owner, current) {
                (Some(o), Some(c)) if o == c => {
                    if let Some(group) = groups.last_mut() {
                        group.push(*sentence);
                    }
                }
                _ => groups.push(vec![*sentence]),
            }
            current = owner;
        }
        groups
    }

    /// Segments the model consumes: paragraphs when present, else sections,
    /// else the whole document.
    pub fn model_segments(&self) -> Vec<Span> {
        match &self.paragraphs {
            Some(p) if !p.is_empty() => p.clone(),
            _ if !self.sections.is_empty() => self.sections.clone(),
            _ if !self.words.is_empty() => vec![Span::new(0, self.words.len())],
            _ => Vec::new(),
        }
    }

    pub fn mention_spans(&self) -> Vec<Span> {
        self.ner.iter().map(|m| m.span).collect()
    }

    /// Stable numeric ids for the coreference clusters (name order).
    pub fn cluster_name_to_id(&self) -> BTreeMap<String, usize> {
        self.coref.keys().enumerate().map(|(i, k)| (k.clone(), i)).collect()
    }

    /// Names of the clusters that contain exactly this mention span.
    pub fn clusters_of(&self, span: &Span) -> Vec<&str> {
        self.coref
            .iter()
            .filter(|(_, spans)| spans.contains(span))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Relation tuples as cluster names in `roles` order.
    ///
    /// Tuples missing a role, or naming a cluster the document does not
    /// define, are dropped.
    pub fn relation_tuples(&self, roles: &[String]) -> Vec<Vec<String>> {
        self.n_ary_relations
            .iter()
            .filter_map(|rel| {
                roles
                    .iter()
                    .map(|role| {
                        rel.get(role)
                            .and_then(Value::as_str)
                            .filter(|name| self.coref.contains_key(*name))
                            .map(str::to_string)
                    })
                    .collect::<Option<Vec<_>>>()
            })
            .collect()
    }
}

/// Words covered by `span`, joined with `sep`. Ends past the text are
/// clipped.
pub fn phrase(words: &[String], span: &Span, sep: &str) -> String {
    let end = span.end.min(words.len());
    let start = span.start.min(end);
    words[start..end].join(sep)
}

/// Document-level metadata shared by every batch element of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: String,
    pub doc_length: usize,
    pub cluster_name_to_id: BTreeMap<String, usize>,
}

impl DocumentMetadata {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            doc_id: doc.doc_id.clone(),
            doc_length: doc.doc_length(),
            cluster_name_to_id: doc.cluster_name_to_id(),
        }
    }

    /// Inverse of `cluster_name_to_id`.
    pub fn cluster_names(&self) -> BTreeMap<usize, String> {
        self.cluster_name_to_id.iter().map(|(k, v)| (*v, k.clone())).collect()
    }
}

/// Per batch element metadata.
///
/// `start_ix..end_ix` locates the sentence inside the context window
/// carried by the text tensor; `start_pos_in_doc` is the sentence's
/// absolute token offset in the document.
#[derive(Debug, Clone)]
pub struct SentenceMetadata {
    pub doc_key: String,
    pub start_ix: usize,
    pub end_ix: usize,
    pub start_pos_in_doc: usize,
    /// Gold mentions, document-absolute span → `[mention_label, entity_type]`.
    pub ner_dict: MentionDict,
    pub document_metadata: Arc<DocumentMetadata>,
}

impl SentenceMetadata {
    pub fn sentence_len(&self) -> usize {
        self.end_ix.saturating_sub(self.start_ix)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        serde_json::from_str(
            r#"{
                "doc_id": "d1",
                "words": ["a","b","c","d","e","f","g","h"],
                "sections": [[0, 5], [5, 8]],
                "sentences": [[0, 2], [2, 5], [5, 8]],
                "ner": [[0, 2, "Method"], [5, 7, "Task"]],
                "coref": {"M": [[0, 2]], "T": [[5, 7]]},
                "n_ary_relations": [{"Method": "M", "Task": "T", "score": 1.0},
                                    {"Method": "M", "Task": "X"}],
                "method_subrelations": {"M": []}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_sentences_grouped_by_section() {
        let doc = sample();
        let groups = doc.sentences_by_section();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![Span::new(0, 2), Span::new(2, 5)]);
        assert_eq!(groups[1], vec![Span::new(5, 8)]);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let doc = sample();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("method_subrelations").is_some());
        assert!(json.get("paragraphs").is_none());
    }

    #[test]
    fn test_relation_tuples_drop_unknown_clusters() {
        let doc = sample();
        let roles = vec!["Method".to_string(), "Task".to_string()];
        assert_eq!(doc.relation_tuples(&roles), vec![vec!["M".to_string(), "T".to_string()]]);
    }

    #[test]
    fn test_phrase_clips_to_text() {
        let doc = sample();
        assert_eq!(phrase(&doc.words, &Span::new(5, 7), "_"), "f_g");
        assert_eq!(phrase(&doc.words, &Span::new(6, 20), " "), "g h");
    }

    #[test]
    fn test_cluster_ids_follow_name_order() {
        let meta = DocumentMetadata::from_document(&sample());
        assert_eq!(meta.cluster_name_to_id["M"], 0);
        assert_eq!(meta.cluster_names()[&1], "T");
        assert_eq!(meta.doc_length, 8);
    }
}
