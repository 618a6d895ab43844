// ============================================================
// Typed Errors
// ============================================================
// The core layers (segmentation, pipeline, metrics) report
// contract violations as typed values. None of them is
// recovered inside the core: they travel up to the CLI and
// terminate the command.
//
// The application and CLI layers wrap these in anyhow with
// file and document context.

use thiserror::Error;

use crate::domain::span::Span;

/// Failures of the interval segmentation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    /// Limits that make the merge policy meaningless.
    #[error("invalid limits: min_len={min_len}, max_len={max_len}")]
    InvalidLimits { min_len: usize, max_len: usize },

    /// An internal merge/split invariant did not hold.
    #[error("segmentation invariant violated: {0}")]
    InvariantViolated(String),

    /// Paragraph spans handed to `move_boundaries` are not contiguous.
    #[error("paragraphs are not contiguous at {left} / {right}")]
    NotContiguous { left: Span, right: Span },

    /// A protected span cannot be contained by any paragraph.
    #[error("protected span {span} lies outside the paragraph range {covered}")]
    ProtectedSpanOutOfRange { span: Span, covered: Span },
}

/// Contract failures inside the joint span-labeling pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Predicted and gold (or NER and classifier) mention dictionaries
    /// have desynchronised.
    #[error("alignment mismatch: {0}")]
    AlignmentMismatch(String),

    /// The model was built for a different label space than it is run with.
    #[error("label space mismatch: {0}")]
    LabelSpaceMismatch(String),

    /// A batch is missing data the configured stages need.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Reading a tensor back to the host failed.
    #[error("tensor read-back failed: {0}")]
    TensorData(String),
}

impl PipelineError {
    pub fn alignment(msg: impl Into<String>) -> Self {
        PipelineError::AlignmentMismatch(msg.into())
    }

    pub fn invalid_batch(msg: impl Into<String>) -> Self {
        PipelineError::InvalidBatch(msg.into())
    }
}

/// Metric registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// Two modules reported a metric under the same name.
    #[error("duplicate metric name '{0}'")]
    DuplicateMetric(String),
}

/// Failures while aggregating link predictions per document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictError {
    /// A document from the input file never produced a prediction batch.
    #[error("document '{0}' has no link predictions")]
    MissingDocument(String),

    /// A coreference cluster of the input file is unknown to the aggregation.
    #[error("document '{doc_id}' has no aggregated count for cluster '{cluster}'")]
    MissingCluster { doc_id: String, cluster: String },

    /// The model produced counts for a cluster id with no name.
    #[error("document '{doc_id}' has no cluster with id {cluster_id}")]
    UnknownClusterId { doc_id: String, cluster_id: usize },
}
