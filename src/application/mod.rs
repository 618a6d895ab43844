// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// command each.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - No direct tensor work (that's Layer 5)
//   - Only workflow coordination

// Parsed-paper sentences → SciREX document
pub mod convert_use_case;

// Paragraph segmentation of SciREX files
pub mod segment_use_case;

// Fresh archive creation
pub mod init_use_case;

// Link prediction and cluster pruning
pub mod predict_use_case;

// Cluster-key → phrase resolution of predicted relations
pub mod resolve_use_case;
