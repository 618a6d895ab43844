// ============================================================
// Layer 5 — Text Embedding & Sentence Windows
// ============================================================
// Turns the word-id tensor of a batch into contextualised token
// representations, one row per sentence:
//
//   word ids [batch, ctx]
//       │  primary + residual embedding lookups, concatenated,
//       │  lexical dropout
//       ▼
//   [batch, ctx, d_embed]
//       │  cut each row's sentence window [start_ix, end_ix)
//       ▼
//   [batch, max_len, d_embed]   + mask [batch, max_len]
//       │  pack only the real tokens, encode once, unpack
//       ▼
//   [batch, max_len, d_model]   (padding rows are exact zeros)

use burn::{
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig},
    prelude::*,
};

use crate::domain::document::SentenceMetadata;
use crate::error::PipelineError;
use crate::ml::encoder::ContextEncoder;
use crate::ml::tensor_ops::{batched_index_select, int_tensor, sequence_mask};

#[derive(Config, Debug)]
pub struct TextEmbedderConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub residual_embedding_dim: usize,
    #[config(default = 0.2)]
    pub lexical_dropout: f64,
}

impl TextEmbedderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TextEmbedder<B> {
        TextEmbedder {
            primary: EmbeddingConfig::new(self.vocab_size, self.embedding_dim).init(device),
            residual: EmbeddingConfig::new(self.vocab_size, self.residual_embedding_dim).init(device),
            lexical_dropout: DropoutConfig::new(self.lexical_dropout).init(),
        }
    }

    pub fn output_dim(&self) -> usize {
        self.embedding_dim + self.residual_embedding_dim
    }
}

#[derive(Module, Debug)]
pub struct TextEmbedder<B: Backend> {
    pub primary: Embedding<B>,
    pub residual: Embedding<B>,
    pub lexical_dropout: Dropout,
}

impl<B: Backend> TextEmbedder<B> {
    /// [batch, ctx] word ids → [batch, ctx, embedding_dim + residual_embedding_dim]
    pub fn forward(&self, text: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let primary = self.lexical_dropout.forward(self.primary.forward(text.clone()));
        let residual = self.lexical_dropout.forward(self.residual.forward(text));
        Tensor::cat(vec![primary, residual], 2)
    }
}

// ─── SentenceWindow ───────────────────────────────────────────────────────────
/// The sentence part of every context row, left-aligned and zero padded.
#[derive(Debug, Clone)]
pub struct SentenceWindow<B: Backend> {
    /// [batch, max_len, dim]
    pub embeddings: Tensor<B, 3>,
    /// [batch, max_len], 1.0 for real tokens.
    pub mask: Tensor<B, 2>,
    pub lengths: Vec<usize>,
}

/// Cut each row's `[start_ix, end_ix)` window out of its context.
///
/// Indices past the context are clamped to the last position; the mask,
/// not the clamped value, decides what counts.
pub fn extract_sentences<B: Backend>(
    embeddings: Tensor<B, 3>,
    metadata: &[SentenceMetadata],
) -> Result<SentenceWindow<B>, PipelineError> {
    let [batch, ctx, _] = embeddings.dims();
    if batch != metadata.len() {
        return Err(PipelineError::invalid_batch(format!(
            "{batch} text rows but {} metadata records",
            metadata.len()
        )));
    }
    if let Some(bad) = metadata.iter().find(|m| m.start_ix > m.end_ix || m.end_ix > ctx) {
        return Err(PipelineError::invalid_batch(format!(
            "sentence window [{}, {}) of '{}' does not fit a context of {ctx} tokens",
            bad.start_ix, bad.end_ix, bad.doc_key
        )));
    }

    let lengths: Vec<usize> = metadata.iter().map(SentenceMetadata::sentence_len).collect();
    let max_len = lengths.iter().copied().max().unwrap_or(0).max(1);
    let last = ctx.saturating_sub(1) as i64;

    let indices = metadata
        .iter()
        .flat_map(|m| (0..max_len).map(move |j| ((m.start_ix + j) as i64).min(last)))
        .collect();
    let device = embeddings.device();
    let indices = int_tensor::<B, 2>(indices, [batch, max_len], &device);
    let mask = sequence_mask::<B>(&lengths, max_len, &device);

    let dim = embeddings.dims()[2];
    let selected = batched_index_select(embeddings, indices);
    let embeddings = selected * mask.clone().unsqueeze_dim::<3>(2).expand([batch, max_len, dim]);
    Ok(SentenceWindow { embeddings, mask, lengths })
}

/// Run the encoder over the real tokens of every sentence at once and
/// scatter the result back into a padded `[batch, max_len, d_model]` tensor.
pub fn contextualize<B: Backend>(encoder: &ContextEncoder<B>, window: &SentenceWindow<B>) -> Tensor<B, 3> {
    let [batch, max_len, dim] = window.embeddings.dims();
    let d_model = encoder.d_model;
    let device = window.embeddings.device();
    let total: usize = window.lengths.iter().sum();
    if total == 0 {
        return Tensor::zeros([batch, max_len, d_model], &device);
    }

    let mut pieces = Vec::new();
    let mut positions = Vec::with_capacity(total);
    for (row, &len) in window.lengths.iter().enumerate() {
        if len == 0 {
            continue;
        }
        pieces.push(window.embeddings.clone().slice([row..row + 1, 0..len, 0..dim]));
        positions.extend((0..len).map(|p| p as i64));
    }
    let packed = Tensor::cat(pieces, 1);
    let positions = int_tensor::<B, 2>(positions, [1, total], &device);
    let encoded = encoder.forward(packed, positions);

    let mut rows = Vec::with_capacity(batch);
    let mut offset = 0;
    for &len in &window.lengths {
        let row = if len == 0 {
            Tensor::zeros([1, max_len, d_model], &device)
        } else {
            let real = encoded.clone().slice([0..1, offset..offset + len, 0..d_model]);
            offset += len;
            if len < max_len {
                Tensor::cat(vec![real, Tensor::zeros([1, max_len - len, d_model], &device)], 1)
            } else {
                real
            }
        };
        rows.push(row);
    }
    Tensor::cat(rows, 0)
}
