// ============================================================
// Layer 2 — Segment Use Case
// ============================================================
// Rewrites a SciREX file with model-sized paragraphs:
//
//   Step 1: Load documents             (Layer 4 - data)
//   Step 2: Merge sentences into       (Layer 4 - segmentation)
//           paragraphs per section
//   Step 3: Move boundaries so no NER  (Layer 4 - segmentation)
//           mention is split
//   Step 4: Log padding wastage
//   Step 5: Write documents back with a `paragraphs` field

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::loader::{write_jsonl, JsonlDocumentSource};
use crate::data::segmentation::{
    break_and_collapse_sections, break_paragraphs, collapse_paragraphs, get_wastage, lengths_of,
    move_boundaries, spans_from_lengths,
};
use crate::domain::document::Document;
use crate::domain::span::Span;
use crate::domain::traits::DocumentSource;

/// How sentences are merged into paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStrategy {
    /// Sentence-aware merge with section boundaries.
    #[default]
    Sentences,
    /// Length-only collapse then break, per section.
    Lengths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub min_len: usize,
    pub max_len: usize,
    pub strategy: SegmentStrategy,
}

pub struct SegmentUseCase {
    config: SegmentConfig,
}

impl SegmentUseCase {
    pub fn new(config: SegmentConfig) -> Self {
        Self { config }
    }

    /// Returns the padding wastage percentage over all documents.
    pub fn execute(&self) -> Result<f64> {
        let cfg = &self.config;
        let mut docs = JsonlDocumentSource::new(&cfg.input).load_all()?;

        let mut groups = Vec::with_capacity(docs.len());
        for doc in &mut docs {
            let paragraphs = self
                .paragraphs(doc)
                .with_context(|| format!("Cannot segment document '{}'", doc.doc_id))?;
            tracing::debug!("'{}': {} paragraphs", doc.doc_id, paragraphs.len());
            groups.push(lengths_of(&paragraphs));
            doc.paragraphs = Some(paragraphs);
        }

        let wastage = get_wastage(&groups);
        tracing::info!("Segmented {} documents, padding wastage {:.2}%", docs.len(), wastage);

        write_jsonl(&cfg.output, &docs)?;
        Ok(wastage)
    }

    fn paragraphs(&self, doc: &Document) -> Result<Vec<Span>> {
        let cfg = &self.config;
        let sections = doc.sentences_by_section();
        let paragraphs = match cfg.strategy {
            SegmentStrategy::Sentences => break_and_collapse_sections(&sections, cfg.min_len, cfg.max_len)?,
            SegmentStrategy::Lengths => {
                let mut spans = Vec::new();
                for section in sections.iter().filter(|s| !s.is_empty()) {
                    let collapsed = collapse_paragraphs(&lengths_of(section), cfg.min_len, cfg.max_len)?;
                    let broken = break_paragraphs(&collapsed, cfg.max_len)?;
                    spans.extend(spans_from_lengths(&broken, section[0].start));
                }
                spans
            }
        };
        Ok(move_boundaries(&paragraphs, &doc.mention_spans())?)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::read_jsonl;
    use std::fs;

    fn run(strategy: SegmentStrategy, line: &str) -> Result<Vec<Document>> {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        fs::write(&input, line).unwrap();

        SegmentUseCase::new(SegmentConfig {
            input,
            output: output.clone(),
            min_len: 100,
            max_len: 400,
            strategy,
        })
        .execute()?;
        read_jsonl(&output)
    }

    fn words(n: usize) -> String {
        serde_json::to_string(&vec!["w"; n]).unwrap()
    }

    #[test]
    fn test_sections_are_hard_boundaries() {
        let line = format!(
            r#"{{"doc_id": "d", "words": {}, "sections": [[0, 90], [90, 300]],
                "sentences": [[0, 50], [50, 90], [90, 300]]}}"#,
            words(300)
        );
        let docs = run(SegmentStrategy::Sentences, &line).unwrap();
        assert_eq!(docs[0].paragraphs, Some(vec![Span::new(0, 90), Span::new(90, 300)]));
    }

    #[test]
    fn test_mentions_are_not_split() {
        let line = format!(
            r#"{{"doc_id": "d", "words": {}, "sections": [[0, 90], [90, 300]],
                "sentences": [[0, 50], [50, 90], [90, 300]], "ner": [[85, 95, "Task"]]}}"#,
            words(300)
        );
        let docs = run(SegmentStrategy::Lengths, &line).unwrap();
        let paragraphs = docs[0].paragraphs.clone().unwrap();
        assert!(paragraphs.iter().any(|p| p.contains(&Span::new(85, 95))));
        assert_eq!(paragraphs.first().map(|p| p.start), Some(0));
        assert_eq!(paragraphs.last().map(|p| p.end), Some(300));
    }

    #[test]
    fn test_mention_outside_text_fails_with_doc_id() {
        let line = format!(r#"{{"doc_id": "bad", "words": {}, "ner": [[8, 12, "Task"]]}}"#, words(10));
        let err = run(SegmentStrategy::Sentences, &line).unwrap_err();
        assert!(format!("{err:#}").contains("'bad'"));
    }
}
