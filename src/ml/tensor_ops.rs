// ============================================================
// Layer 5 — Tensor Helpers
// ============================================================
// Small building blocks shared by the pipeline stages:
//
//   • host ⇄ device conversion (with typed read-back errors)
//   • sequence masks from per-row lengths
//   • batched index selection over [batch, seq, dim] tensors
//   • masked losses (cross-entropy, binary cross-entropy)
//   • one-hot encoding of label ids
//
// Int read-back always goes through i64 and float read-back
// through f32 so the same code works on Wgpu (i32 ints) and
// NdArray (i64 ints).

use burn::{
    prelude::*,
    tensor::{activation, TensorData},
};

use crate::domain::span::Span;
use crate::error::PipelineError;

// ─── Host ⇄ Device ────────────────────────────────────────────────────────────
pub fn int_tensor<B: Backend, const D: usize>(
    values: Vec<i64>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

pub fn float_tensor<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Read an int tensor back to the host, row-major.
pub fn int_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>,
) -> Result<Vec<i64>, PipelineError> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| PipelineError::TensorData(format!("{e:?}")))
}

/// Read a float tensor back to the host, row-major.
pub fn float_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, PipelineError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PipelineError::TensorData(format!("{e:?}")))
}

pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.sum().into_scalar().elem::<f64>()
}

/// A one-element zero loss on `device`.
pub fn zero_loss<B: Backend>(device: &B::Device) -> Tensor<B, 1> {
    Tensor::zeros([1], device)
}

// ─── Masks ────────────────────────────────────────────────────────────────────
/// `[rows, max_len]` float mask: 1.0 where `col < lengths[row]`.
pub fn sequence_mask<B: Backend>(
    lengths: &[usize],
    max_len: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values = lengths
        .iter()
        .flat_map(|&len| (0..max_len).map(move |col| if col < len { 1.0 } else { 0.0 }))
        .collect();
    float_tensor(values, [lengths.len(), max_len], device)
}

// ─── Index Selection ──────────────────────────────────────────────────────────
/// Select rows of `target` per batch element.
///
/// target:  [batch, seq, dim]
/// indices: [batch, n]   (each in `0..seq`)
/// returns: [batch, n, dim]
pub fn batched_index_select<B: Backend>(
    target: Tensor<B, 3>,
    indices: Tensor<B, 2, Int>,
) -> Tensor<B, 3> {
    let [batch, seq, dim] = target.dims();
    let [_, n] = indices.dims();
    let device = target.device();

    // Shift every row's indices into the flattened [batch * seq] space
    let offsets = Tensor::<B, 1, Int>::arange(0..batch as i64, &device)
        .mul_scalar(seq as i64)
        .reshape([batch, 1])
        .expand([batch, n]);
    let flat_indices = (indices + offsets).reshape([batch * n]);

    target
        .reshape([batch * seq, dim])
        .select(0, flat_indices)
        .reshape([batch, n, dim])
}

// ─── Losses ───────────────────────────────────────────────────────────────────
/// Mean token cross-entropy over positions where `mask` is 1.
///
/// logits: [batch, seq, classes], labels/mask: [batch, seq]
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    labels: Tensor<B, 2, Int>,
    mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [batch, seq, _] = logits.dims();
    let log_probs = activation::log_softmax(logits, 2);
    let picked = log_probs
        .gather(2, labels.reshape([batch, seq, 1]))
        .reshape([batch, seq]);
    let count = mask.clone().sum().clamp_min(1.0);
    (picked * mask).sum().neg() / count
}

/// Mean binary cross-entropy with logits over positions where `mask` is 1.
///
/// Uses the stable form `max(x, 0) - x·y + log(1 + e^{-|x|})`.
pub fn masked_bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
    mask: Tensor<B, D>,
) -> Tensor<B, 1> {
    let per_item = activation::relu(logits.clone()) - logits.clone() * targets
        + logits.abs().neg().exp().add_scalar(1.0).log();
    let count = mask.clone().sum().clamp_min(1.0);
    (per_item * mask).sum() / count
}

// ─── Encoding ─────────────────────────────────────────────────────────────────
/// One-hot encode `labels` ([batch, n]) into [batch, n, classes].
pub fn one_hot<B: Backend>(labels: Tensor<B, 2, Int>, classes: usize) -> Tensor<B, 3> {
    let [batch, n] = labels.dims();
    let device = labels.device();
    let range = Tensor::<B, 1, Int>::arange(0..classes as i64, &device)
        .reshape([1, 1, classes])
        .expand([batch, n, classes]);
    labels
        .reshape([batch, n, 1])
        .expand([batch, n, classes])
        .equal(range)
        .float()
}

/// Read `[batch, n, 2]` span rows back as `Some(span)` for valid rows
/// (`start >= 0`) and `None` for padding.
pub fn span_rows<B: Backend>(spans: Tensor<B, 3, Int>) -> Result<Vec<Vec<Option<Span>>>, PipelineError> {
    let [batch, n, _] = spans.dims();
    let values = int_values(spans)?;
    Ok((0..batch)
        .map(|b| {
            (0..n)
                .map(|i| {
                    let at = (b * n + i) * 2;
                    let (start, end) = (values[at], values[at + 1]);
                    (start >= 0 && end > start).then(|| Span::new(start as usize, end as usize))
                })
                .collect()
        })
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_sequence_mask() {
        let device = Default::default();
        let mask = sequence_mask::<TestBackend>(&[2, 0, 3], 3, &device);
        assert_eq!(
            float_values(mask).unwrap(),
            vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_batched_index_select_uses_row_offsets() {
        let device = Default::default();
        // [2, 3, 1]: row 0 = 0,1,2 ; row 1 = 10,11,12
        let target = float_tensor::<TestBackend, 3>(
            vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0],
            [2, 3, 1],
            &device,
        );
        let indices = int_tensor::<TestBackend, 2>(vec![2, 0, 1, 1], [2, 2], &device);
        let picked = batched_index_select(target, indices);
        assert_eq!(picked.dims(), [2, 2, 1]);
        assert_eq!(float_values(picked).unwrap(), vec![2.0, 0.0, 11.0, 11.0]);
    }

    #[test]
    fn test_masked_cross_entropy_ignores_padding() {
        let device = Default::default();
        // Uniform logits over 2 classes → ln 2 per real token
        let logits = Tensor::<TestBackend, 3>::zeros([1, 3, 2], &device);
        let labels = int_tensor::<TestBackend, 2>(vec![0, 1, 1], [1, 3], &device);
        let mask = float_tensor::<TestBackend, 2>(vec![1.0, 1.0, 0.0], [1, 3], &device);
        let loss = scalar(masked_cross_entropy(logits, labels, mask));
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_masked_bce_at_zero_logit() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::zeros([2], &device);
        let targets = float_tensor::<TestBackend, 1>(vec![1.0, 0.0], [2], &device);
        let mask = float_tensor::<TestBackend, 1>(vec![1.0, 1.0], [2], &device);
        let loss = scalar(masked_bce_with_logits(logits, targets, mask));
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_one_hot_and_span_rows() {
        let device = Default::default();
        let labels = int_tensor::<TestBackend, 2>(vec![2, 0], [1, 2], &device);
        assert_eq!(
            float_values(one_hot(labels, 3)).unwrap(),
            vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]
        );

        let spans = int_tensor::<TestBackend, 3>(vec![0, 2, -1, -1], [1, 2, 2], &device);
        assert_eq!(span_rows(spans).unwrap(), vec![vec![Some(Span::new(0, 2)), None]]);
    }
}
