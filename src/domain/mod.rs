// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs and traits that define the core concepts
// of the system: spans, documents, label spaces and mention
// dictionaries.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

/// Half-open token intervals
pub mod span;

/// SciREX documents and per-batch metadata records
pub mod document;

/// NER tag namespaces and the entity vocabulary
pub mod labels;

/// Per-sentence mention dictionaries and the aligned-append contract
pub mod mentions;

/// Core abstractions (traits) that other layers implement
pub mod traits;
