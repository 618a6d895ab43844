// ============================================================
// Layer 5 — Feed-Forward Scorer
// ============================================================
// Two-layer scorer shared by every classification head:
//   Linear(d_input → d_hidden) → ReLU → Dropout → Linear(→ d_output)

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation,
};

#[derive(Config, Debug)]
pub struct FeedForwardConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    pub d_output: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl FeedForwardConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeedForward<B> {
        FeedForward {
            hidden: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            output: LinearConfig::new(self.d_hidden, self.d_output).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub hidden: Linear<B>,
    pub output: Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    /// [..., d_input] → [..., d_output]
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let h = self.dropout.forward(activation::relu(self.hidden.forward(x)));
        self.output.forward(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_output_width() {
        let device = Default::default();
        let ff = FeedForwardConfig::new(6, 4, 3).init::<NdArray>(&device);
        let out = ff.forward(Tensor::<NdArray, 3>::ones([2, 5, 6], &device));
        assert_eq!(out.dims(), [2, 5, 3]);
    }
}
