// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between SciREX JSON-lines files and model-ready
// tensor batches, plus the pure segmentation engine that
// decides how documents are cut into model-sized paragraphs.
//
//   documents.jsonl
//       │
//       ▼
//   JsonlDocumentSource  → parsed Documents
//       │
//       ▼
//   segmentation         → paragraphs (segment command)
//       │
//       ▼
//   DocumentSample       → word ids, tags, span labels per segment
//       │
//       ▼
//   JointBatcher         → one JointBatch per document

/// JSON-lines reading and writing
pub mod loader;

/// Interval segmentation engine: paragraph merging and boundary repair
pub mod segmentation;

/// Per-document samples and Burn's Dataset implementation
pub mod dataset;

/// Sample → JointBatch tensor conversion
pub mod batcher;
