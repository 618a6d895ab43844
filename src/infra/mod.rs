// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several layers:
//
//   checkpoint.rs      — Model archives
//                        Config, weights (CompactRecorder) and
//                        validation metrics of one trained model.
//
//   tokenizer_store.rs — Word vocabulary persistence
//                        Builds a word-level tokenizer from a
//                        corpus or loads the archived one.
//
//   metrics.rs         — Metric accumulators
//                        Mention, entity, link and relation
//                        scores plus name merging and display.

/// Model archive saving and loading
pub mod checkpoint;

/// Word-level tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Pipeline metric accumulators
pub mod metrics;
