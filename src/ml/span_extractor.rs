// ============================================================
// Layer 5 — Span Extractors
// ============================================================
// Fixed-size representations for variable-length spans.
//
// Spans arrive as [batch, n, 2] half-open sentence-relative
// pairs that have already been clipped to >= 0. Padding rows
// therefore look like [0, 0]; callers keep a separate span mask.
//
//   EndpointSpanExtractor       [x_start ; x_{end-1} ; w(width)]
//   SelfAttentiveSpanExtractor  Σ softmax(a·x_i) x_i  over span tokens

use burn::{
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation,
};

use crate::ml::tensor_ops::batched_index_select;

// ─── Endpoint ─────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct EndpointSpanExtractorConfig {
    pub d_input: usize,
    pub max_span_width: usize,
    pub width_embedding_dim: usize,
}

impl EndpointSpanExtractorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EndpointSpanExtractor<B> {
        EndpointSpanExtractor {
            width_embedding: EmbeddingConfig::new(self.max_span_width.max(1), self.width_embedding_dim)
                .init(device),
            max_span_width: self.max_span_width.max(1),
        }
    }

    pub fn output_dim(&self) -> usize {
        2 * self.d_input + self.width_embedding_dim
    }
}

#[derive(Module, Debug)]
pub struct EndpointSpanExtractor<B: Backend> {
    pub width_embedding: Embedding<B>,
    pub max_span_width: usize,
}

impl<B: Backend> EndpointSpanExtractor<B> {
    /// sequence: [batch, seq, d], spans: [batch, n, 2] → [batch, n, 2d + width_dim]
    ///
    /// Widths beyond the embedding table share its last row.
    pub fn forward(&self, sequence: Tensor<B, 3>, spans: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch, n, _] = spans.dims();
        let starts = spans.clone().slice([0..batch, 0..n, 0..1]).reshape([batch, n]);
        let last = spans
            .slice([0..batch, 0..n, 1..2])
            .reshape([batch, n])
            .sub_scalar(1)
            .clamp_min(0);

        let widths = (last.clone() - starts.clone()).clamp(0, self.max_span_width as i64 - 1);
        let start_emb = batched_index_select(sequence.clone(), starts);
        let end_emb = batched_index_select(sequence, last);
        let width_emb = self.width_embedding.forward(widths);

        Tensor::cat(vec![start_emb, end_emb, width_emb], 2)
    }
}

// ─── Self-Attentive ───────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct SelfAttentiveSpanExtractorConfig {
    pub d_input: usize,
}

impl SelfAttentiveSpanExtractorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SelfAttentiveSpanExtractor<B> {
        SelfAttentiveSpanExtractor {
            global_attention: LinearConfig::new(self.d_input, 1).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct SelfAttentiveSpanExtractor<B: Backend> {
    pub global_attention: Linear<B>,
}

impl<B: Backend> SelfAttentiveSpanExtractor<B> {
    /// sequence: [batch, seq, d], spans: [batch, n, 2] → [batch, n, d]
    pub fn forward(&self, sequence: Tensor<B, 3>, spans: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch, seq, d] = sequence.dims();
        let [_, n, _] = spans.dims();
        let device = sequence.device();

        let starts = spans.clone().slice([0..batch, 0..n, 0..1]);
        let ends = spans.slice([0..batch, 0..n, 1..2]);
        let widths = (ends - starts.clone()).clamp_min(0);
        let window = (widths.clone().max().into_scalar().elem::<i64>()).max(1) as usize;

        // [batch, n, window] token positions and their validity
        let offsets = Tensor::<B, 1, Int>::arange(0..window as i64, &device)
            .reshape([1, 1, window])
            .expand([batch, n, window]);
        let valid = offsets.clone().lower(widths.expand([batch, n, window]));
        let positions = (starts.expand([batch, n, window]) + offsets).clamp(0, seq as i64 - 1);
        let flat_positions = positions.reshape([batch, n * window]);

        let tokens = batched_index_select(sequence.clone(), flat_positions.clone()).reshape([batch, n, window, d]);
        let logits = batched_index_select(self.global_attention.forward(sequence), flat_positions)
            .reshape([batch, n, window])
            .mask_fill(valid.clone().bool_not(), -1e9);
        let weights = activation::softmax(logits, 2) * valid.float();

        (tokens * weights.unsqueeze_dim::<4>(3).expand([batch, n, window, d]))
            .sum_dim(2)
            .reshape([batch, n, d])
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tensor_ops::{float_tensor, float_values, int_tensor};
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn test_endpoint_picks_first_and_last_token() {
        let device = Default::default();
        let extractor = EndpointSpanExtractorConfig::new(1, 3, 2).init::<TB>(&device);
        let sequence = float_tensor::<TB, 3>(vec![10.0, 11.0, 12.0, 13.0], [1, 4, 1], &device);
        let spans = int_tensor::<TB, 3>(vec![1, 4, 0, 0], [1, 2, 2], &device);

        let out = extractor.forward(sequence, spans);
        assert_eq!(out.dims(), [1, 2, 4]);
        let values = float_values(out.slice([0..1, 0..2, 0..2])).unwrap();
        // [1, 4) → tokens 1 and 3 ; padding [0, 0) → token 0 twice
        assert_eq!(values, vec![11.0, 13.0, 10.0, 10.0]);
    }

    #[test]
    fn test_attention_of_constant_span_is_the_constant() {
        let device = Default::default();
        let extractor = SelfAttentiveSpanExtractorConfig::new(2).init::<TB>(&device);
        let sequence = Tensor::<TB, 3>::ones([1, 5, 2], &device).mul_scalar(3.0);
        let spans = int_tensor::<TB, 3>(vec![1, 4, 2, 3], [1, 2, 2], &device);

        let out = float_values(extractor.forward(sequence, spans)).unwrap();
        for v in out {
            assert!((v - 3.0).abs() < 1e-4);
        }
    }
}
