// ============================================================
// Layer 4 — JSON-Lines Loader
// ============================================================
// Every file this tool reads or writes is JSON-lines: one JSON
// object per line. Blank lines are skipped; a line that does
// not parse fails the whole read with its line number.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::domain::document::Document;
use crate::domain::traits::DocumentSource;

/// Loads SciREX documents from a JSON-lines file.
/// Implements the DocumentSource trait from Layer 3.
pub struct JsonlDocumentSource {
    path: PathBuf,
}

impl JsonlDocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DocumentSource for JsonlDocumentSource {
    fn load_all(&self) -> Result<Vec<Document>> {
        let docs: Vec<Document> = read_jsonl(&self.path)?;
        tracing::info!("Loaded {} documents from '{}'", docs.len(), self.path.display());
        Ok(docs)
    }
}

/// Parse every non-blank line of `path` as a `T`.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Bad JSON on line {} of '{}'", i + 1, path.display()))
        })
        .collect()
}

/// Write one compact JSON object per line, replacing `path`.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut out = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.write_all(b"\n")?;
    }
    out.flush().with_context(|| format!("Cannot write '{}'", path.display()))?;
    tracing::debug!("Wrote {} records to '{}'", items.len(), path.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_documents_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.jsonl");
        fs::write(
            &path,
            "{\"doc_id\": \"a\", \"words\": [\"x\"]}\n\n{\"doc_id\": \"b\", \"extra_field\": 3}\n",
        )
        .unwrap();

        let docs = JsonlDocumentSource::new(&path).load_all().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].doc_id, "b");

        let out = dir.path().join("out.jsonl");
        write_jsonl(&out, &docs).unwrap();
        let values: Vec<Value> = read_jsonl(&out).unwrap();
        assert_eq!(values[1]["extra_field"], json!(3));
    }

    #[test]
    fn test_bad_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"doc_id\": \"a\"}\nnot json\n").unwrap();

        let err = read_jsonl::<Value>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(JsonlDocumentSource::new("/nonexistent/docs.jsonl").load_all().is_err());
    }
}
