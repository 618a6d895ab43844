// ============================================================
// Layer 5 — Contextual Encoder
// ============================================================
// The swappable context layer: an input projection followed by
// stacked transformer encoder blocks and a final layer norm.
//
// The encoder only ever sees real tokens. The embedder packs
// the valid tokens of every sentence in the batch into one
// [1, total_tokens, d_input] sequence; positions restart at 0
// for each sentence so order inside a sentence is preserved.
//
// Each block is post-norm:
//   x = LayerNorm(x + Dropout(SelfAttention(x)))
//   x = LayerNorm(x + Dropout(FFN(x)))     FFN = Linear → GELU → Linear

use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
        LinearConfig,
    },
    prelude::*,
    tensor::activation,
};

#[derive(Config, Debug)]
pub struct ContextEncoderConfig {
    pub d_input: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub d_ff: usize,
    #[config(default = 512)]
    pub max_positions: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl ContextEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ContextEncoder<B> {
        let layers = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        ContextEncoder {
            input_proj: LinearConfig::new(self.d_input, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_positions, self.d_model).init(device),
            layers,
            final_norm: LayerNormConfig::new(self.d_model).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            d_model: self.d_model,
            max_positions: self.max_positions,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1 = LayerNormConfig::new(self.d_model).init(device);
        let norm2 = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn: MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1: LayerNorm<B>,
    pub norm2: LayerNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let attn_output = self.self_attn.forward(MhaInput::self_attn(x.clone())).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self
            .ffn_linear2
            .forward(activation::gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct ContextEncoder<B: Backend> {
    pub input_proj: Linear<B>,
    pub position_embedding: Embedding<B>,
    pub layers: Vec<EncoderBlock<B>>,
    pub final_norm: LayerNorm<B>,
    pub dropout: Dropout,
    pub d_model: usize,
    pub max_positions: usize,
}

impl<B: Backend> ContextEncoder<B> {
    /// x: [1, tokens, d_input], positions: [1, tokens] → [1, tokens, d_model]
    ///
    /// Positions past `max_positions - 1` share the last position row.
    pub fn forward(&self, x: Tensor<B, 3>, positions: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let positions = positions.clamp_max(self.max_positions as i64 - 1);
        let mut x = self.dropout.forward(self.input_proj.forward(x) + self.position_embedding.forward(positions));
        for layer in &self.layers {
            x = layer.forward(x);
        }
        self.final_norm.forward(x)
    }
}
