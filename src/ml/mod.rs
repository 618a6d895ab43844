// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All neural code lives here. Outside this layer only the
// batcher (which creates tensors) and the archive manager
// (which records weights) touch burn.
//
// What's in this layer:
//
//   tensor_ops.rs      — host ⇄ device helpers, masks, losses,
//                        batched index selection
//   feedforward.rs     — two-layer scorer used by every head
//   encoder.rs         — transformer context encoder
//   embedder.rs        — word embeddings + sentence windows
//   ner.rs             — BIO tagger and span decoding
//   span_extractor.rs  — endpoint and self-attentive span
//                        representations
//   span_classifier.rs — entity-type and link heads
//   relation.rs        — n-ary relation scoring over clusters
//   model.rs           — the joint model and its pipeline
//
// Reference: Burn Book §3 (Building Blocks)
//            Lee et al. (2017) End-to-end Neural Coreference Resolution
//            Jain et al. (2020) SciREX

pub mod tensor_ops;

pub mod feedforward;

/// Transformer encoder blocks
pub mod encoder;

pub mod embedder;

/// Token tagging over the configured NER namespace
pub mod ner;

pub mod span_extractor;

/// Entity and link classifiers over span embeddings
pub mod span_classifier;

pub mod relation;

/// Joint model, forward/decode pipeline and metric reporting
pub mod model;
