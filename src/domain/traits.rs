// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer reads documents through a trait so the
// JSON-lines reader can be swapped for another source without
// touching the use cases.

use anyhow::Result;

use crate::domain::document::Document;

/// Any component that can load documents from a source.
///
/// Implementations:
///   - JsonlDocumentSource → one SciREX document per line
pub trait DocumentSource {
    /// Load all available documents from this source, in order.
    fn load_all(&self) -> Result<Vec<Document>>;
}

// ─── WordIndexer ──────────────────────────────────────────────────────────────
/// Maps a surface word to the embedding row the model looks up.
///
/// Implementations:
///   - Vocabulary → word-level tokenizer stored in the archive
pub trait WordIndexer {
    /// Row for `word`; unknown words map to the unknown-token row.
    fn word_id(&self, word: &str) -> u32;
}
