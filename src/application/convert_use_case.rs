// ============================================================
// Layer 2 — Convert Use Case
// ============================================================
// Turns the per-sentence records of a parsed paper into one
// SciREX document that `segment` and `predict` can read:
//
//   Step 1: Load sentence records        (Layer 4 - data)
//   Step 2: Tokenise on whitespace and lay words, sentences and
//           sections out with contiguous offsets
//   Step 3: Write a single-line JSON-lines file
//
// A new section starts whenever `section_id` differs from the
// previous record's, so a section id that comes back later opens
// a new section.
//
// Example record:
//   {"section_id": 2, "sentence": "We evaluate on SQuAD ."}

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, path::PathBuf};

use crate::data::loader::{read_jsonl, write_jsonl};
use crate::domain::document::Document;
use crate::domain::span::Span;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub doc_id: String,
}

/// One sentence of a parsed paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRecord {
    /// Any JSON scalar; only changes between records matter.
    pub section_id: Value,
    pub sentence: String,
}

pub struct ConvertUseCase {
    config: ConvertConfig,
}

impl ConvertUseCase {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Document> {
        let cfg = &self.config;

        // ── Step 1: Records ───────────────────────────────────────────────────
        let records: Vec<SentenceRecord> = read_jsonl(&cfg.input)?;
        tracing::info!("Loaded {} sentence records from '{}'", records.len(), cfg.input.display());

        // ── Step 2: Layout ────────────────────────────────────────────────────
        let doc = to_prediction_input(&cfg.doc_id, &records);
        if doc.words.is_empty() {
            bail!("'{}' has no words to convert", cfg.input.display());
        }
        tracing::info!(
            "'{}': {} words, {} sentences, {} sections",
            doc.doc_id,
            doc.words.len(),
            doc.sentences.len(),
            doc.sections.len()
        );

        // ── Step 3: Write ─────────────────────────────────────────────────────
        write_jsonl(&cfg.output, std::slice::from_ref(&doc))?;
        Ok(doc)
    }
}

/// Lay sentence records out as a document. Sentences without any token
/// are dropped, so no sentence or section is empty.
pub fn to_prediction_input(doc_id: &str, records: &[SentenceRecord]) -> Document {
    let mut words: Vec<String> = Vec::new();
    let mut sentences = Vec::with_capacity(records.len());
    let mut sections: Vec<Span> = Vec::new();
    let mut current: Option<&Value> = None;

    for record in records {
        let tokens: Vec<String> = record.sentence.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            tracing::debug!("'{doc_id}': skipping an empty sentence");
            continue;
        }
        let offset = words.len();
        words.extend(tokens);
        let sentence = Span::new(offset, words.len());
        sentences.push(sentence);

        if current == Some(&record.section_id) {
            if let Some(section) = sections.last_mut() {
                section.end = sentence.end;
            }
        } else {
            sections.push(sentence);
            current = Some(&record.section_id);
        }
    }

    Document {
        doc_id: doc_id.to_string(),
        words,
        sections,
        sentences,
        ner: Vec::new(),
        coref: BTreeMap::new(),
        n_ary_relations: Vec::new(),
        paragraphs: None,
        extra: Map::new(),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::segment_use_case::{SegmentConfig, SegmentStrategy, SegmentUseCase};
    use serde_json::json;
    use std::fs;

    fn record(section_id: Value, sentence: &str) -> SentenceRecord {
        SentenceRecord { section_id, sentence: sentence.to_string() }
    }

    fn s(start: usize, end: usize) -> Span {
        Span::new(start, end)
    }

    #[test]
    fn test_sections_open_on_id_change() {
        let records = vec![
            record(json!(0), "Deep nets ."),
            record(json!(0), "They  work\twell ."),
            record(json!(1), "Results ."),
            record(json!(0), "Back again ."),
        ];
        let doc = to_prediction_input("paper", &records);

        assert_eq!(doc.words.len(), 12);
        assert_eq!(doc.words[3..7], ["They", "work", "well", "."]);
        assert_eq!(doc.sentences, vec![s(0, 3), s(3, 7), s(7, 9), s(9, 12)]);
        // The id 0 coming back after 1 is a new section
        assert_eq!(doc.sections, vec![s(0, 7), s(7, 9), s(9, 12)]);
    }

    #[test]
    fn test_empty_sentences_dropped() {
        let records = vec![
            record(json!("intro"), "   "),
            record(json!("intro"), "A b ."),
            record(json!("method"), ""),
            record(json!("method"), "C ."),
        ];
        let doc = to_prediction_input("paper", &records);
        assert_eq!(doc.sentences, vec![s(0, 3), s(3, 5)]);
        assert_eq!(doc.sections, vec![s(0, 3), s(3, 5)]);
    }

    #[test]
    fn test_converted_file_segments() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sentences.jsonl");
        let converted = dir.path().join("paper.jsonl");
        fs::write(
            &input,
            "{\"section_id\": 1, \"sentence\": \"a b c\"}\n{\"section_id\": 2, \"sentence\": \"d e\"}\n",
        )
        .unwrap();

        let doc = ConvertUseCase::new(ConvertConfig {
            input,
            output: converted.clone(),
            doc_id: "paper".to_string(),
        })
        .execute()
        .unwrap();
        assert_eq!(doc.sections, vec![s(0, 3), s(3, 5)]);

        let segmented = dir.path().join("segmented.jsonl");
        SegmentUseCase::new(SegmentConfig {
            input: converted,
            output: segmented.clone(),
            min_len: 1,
            max_len: 10,
            strategy: SegmentStrategy::Sentences,
        })
        .execute()
        .unwrap();
        let docs: Vec<Document> = read_jsonl(&segmented).unwrap();
        assert_eq!(docs[0].doc_id, "paper");
        assert_eq!(docs[0].paragraphs, Some(vec![s(0, 3), s(3, 5)]));
    }

    #[test]
    fn test_no_words_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sentences.jsonl");
        fs::write(&input, "{\"section_id\": 1, \"sentence\": \"  \"}\n").unwrap();
        let result = ConvertUseCase::new(ConvertConfig {
            input,
            output: dir.path().join("out.jsonl"),
            doc_id: "paper".to_string(),
        })
        .execute();
        assert!(result.is_err());
    }
}
