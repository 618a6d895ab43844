// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the five subcommands and their flags. Each Args
// struct converts into its application-layer config with a
// From impl, so the application layer never sees clap types.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::{
    convert_use_case::ConvertConfig, init_use_case::InitConfig, predict_use_case::PredictConfig,
    resolve_use_case::ResolveConfig,
    segment_use_case::{SegmentConfig, SegmentStrategy},
};
use crate::domain::labels::NerLabelKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a SciREX document from per-sentence records of a parsed paper
    Convert(ConvertArgs),

    /// Add model-sized paragraphs to a SciREX JSON-lines file
    Segment(SegmentArgs),

    /// Create a fresh model archive from a corpus
    Init(InitArgs),

    /// Predict linked coreference clusters with an archived model
    Predict(PredictArgs),

    /// Resolve predicted relations to readable phrases
    Resolve(ResolveArgs),
}

// ─── convert ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// JSON-lines file of `{"section_id", "sentence"}` records
    pub input: PathBuf,

    /// Where to write the single-document SciREX file
    pub output: PathBuf,

    /// Document id of the converted paper
    pub doc_id: String,
}

impl From<ConvertArgs> for ConvertConfig {
    fn from(a: ConvertArgs) -> Self {
        ConvertConfig { input: a.input, output: a.output, doc_id: a.doc_id }
    }
}

// ─── segment ──────────────────────────────────────────────────────────────────
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StrategyArg {
    /// Merge whole sentences inside each section
    Sentences,
    /// Merge by length only, then split long runs
    Lengths,
}

#[derive(Args, Debug)]
pub struct SegmentArgs {
    /// SciREX JSON-lines input
    pub input: PathBuf,

    /// Where to write the documents with paragraphs
    pub output: PathBuf,

    /// Paragraphs shorter than this are merged with their neighbour
    #[arg(long, default_value_t = 100)]
    pub min_len: usize,

    /// Paragraphs longer than this are split again
    #[arg(long, default_value_t = 400)]
    pub max_len: usize,

    #[arg(long, value_enum, default_value = "sentences")]
    pub strategy: StrategyArg,
}

impl From<SegmentArgs> for SegmentConfig {
    fn from(a: SegmentArgs) -> Self {
        SegmentConfig {
            input: a.input,
            output: a.output,
            min_len: a.min_len,
            max_len: a.max_len,
            strategy: match a.strategy {
                StrategyArg::Sentences => SegmentStrategy::Sentences,
                StrategyArg::Lengths => SegmentStrategy::Lengths,
            },
        }
    }
}

// ─── init ─────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Folder to create the archive in
    pub archive_folder: PathBuf,

    /// SciREX JSON-lines corpus the vocabulary is built from
    pub corpus: PathBuf,

    /// Maximum vocabulary size, [PAD] and [UNK] included
    #[arg(long, default_value_t = 30000)]
    pub vocab_size: usize,

    /// Tag namespace: ner, entity, link or is_entity
    #[arg(long, default_value = "ner")]
    pub ner_label_kind: NerLabelKind,

    /// Width of the contextual token representations
    #[arg(long, default_value_t = 128)]
    pub d_model: usize,

    /// Attention heads; must divide d_model
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 256)]
    pub d_ff: usize,

    /// Hidden width of every scoring head
    #[arg(long, default_value_t = 150)]
    pub hidden_dim: usize,

    /// Span width embedding size
    #[arg(long, default_value_t = 20)]
    pub feature_size: usize,

    #[arg(long, default_value_t = 20)]
    pub max_span_width: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Represent spans by their endpoints only
    #[arg(long)]
    pub no_attentive_span_extractor: bool,

    /// Build the model without the entity-type classifier
    #[arg(long)]
    pub no_entity_classifier: bool,

    /// Words of context on each side of a paragraph
    #[arg(long, default_value_t = 0)]
    pub context_width: usize,

    #[arg(long, default_value_t = 1000)]
    pub max_relation_candidates: usize,

    /// Link threshold stored in metrics.json
    #[arg(long, default_value_t = 0.5)]
    pub link_threshold: f64,

    /// Metrics to report without a leading `_` (repeatable)
    #[arg(long = "display-metric")]
    pub display_metrics: Vec<String>,
}

impl From<InitArgs> for InitConfig {
    fn from(a: InitArgs) -> Self {
        InitConfig {
            archive_folder: a.archive_folder,
            corpus: a.corpus,
            vocab_size: a.vocab_size,
            ner_label_kind: a.ner_label_kind,
            d_model: a.d_model,
            num_heads: a.num_heads,
            num_layers: a.num_layers,
            d_ff: a.d_ff,
            hidden_dim: a.hidden_dim,
            feature_size: a.feature_size,
            max_span_width: a.max_span_width,
            dropout: a.dropout,
            use_attentive_span_extractor: !a.no_attentive_span_extractor,
            use_entity_classifier: !a.no_entity_classifier,
            context_width: a.context_width,
            max_relation_candidates: a.max_relation_candidates,
            link_threshold: a.link_threshold,
            display_metrics: (!a.display_metrics.is_empty()).then_some(a.display_metrics),
        }
    }
}

// ─── predict ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Archive folder written by `init` (or by training)
    pub archive_folder: PathBuf,

    /// SciREX JSON-lines documents to predict on
    pub test_file: PathBuf,

    /// Where to write the per-document linked cluster counts
    pub output_file: PathBuf,

    /// GPU index; a negative value runs on the CPU
    #[arg(allow_hyphen_values = true)]
    pub cuda_device: i32,
}

impl From<PredictArgs> for PredictConfig {
    fn from(a: PredictArgs) -> Self {
        PredictConfig {
            archive_folder: a.archive_folder,
            test_file: a.test_file,
            output_file: a.output_file,
            cuda_device: a.cuda_device,
        }
    }
}

// ─── resolve ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// JSON with the document words
    pub ner_predictions: PathBuf,

    /// JSON with the predicted clusters
    pub cluster_predictions: PathBuf,

    /// JSON with the predicted relations
    pub relation_predictions: PathBuf,

    /// Where to write the resolved relations
    pub output: PathBuf,

    /// Paper id recorded in the output
    pub paper_id: String,
}

impl From<ResolveArgs> for ResolveConfig {
    fn from(a: ResolveArgs) -> Self {
        ResolveConfig {
            ner_predictions: a.ner_predictions,
            cluster_predictions: a.cluster_predictions,
            relation_predictions: a.relation_predictions,
            output: a.output,
            paper_id: a.paper_id,
        }
    }
}
