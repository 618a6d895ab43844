// ============================================================
// Layer 5 — Span Classifiers
// ============================================================
//   EntityClassifier  span → one of the entity vocabulary labels
//   LinkClassifier    span → P(span belongs to a salient cluster)
//
// Both score only the rows the span mask marks as real; padding
// rows never reach a loss or a metric.

use burn::{prelude::*, tensor::activation};
use std::collections::BTreeMap;

use crate::domain::document::SentenceMetadata;
use crate::domain::labels::LabelSpace;
use crate::domain::span::Span;
use crate::error::PipelineError;
use crate::infra::metrics::{EntityMetrics, LinkMetrics};
use crate::ml::feedforward::{FeedForward, FeedForwardConfig};
use crate::ml::tensor_ops::{
    float_values, int_values, masked_bce_with_logits, masked_cross_entropy, span_rows, zero_loss,
};

// ─── EntityClassifier ─────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct EntityClassifierConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    pub num_labels: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl EntityClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EntityClassifier<B> {
        EntityClassifier {
            scorer: FeedForwardConfig::new(self.d_input, self.d_hidden, self.num_labels)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct EntityClassifier<B: Backend> {
    pub scorer: FeedForward<B>,
}

#[derive(Debug, Clone)]
pub struct EntityOutput<B: Backend> {
    /// [batch, n, num_labels]
    pub logits: Tensor<B, 3>,
    /// [batch, n] argmax label ids
    pub predicted: Tensor<B, 2, Int>,
    pub loss: Tensor<B, 1>,
}

impl<B: Backend> EntityClassifier<B> {
    /// Score every span; with gold labels also compute the loss and
    /// update the accuracy accumulator.
    pub fn forward(
        &self,
        span_embeddings: Tensor<B, 3>,
        span_mask: Tensor<B, 2>,
        labels: Option<Tensor<B, 2, Int>>,
        metrics: &mut EntityMetrics,
    ) -> Result<EntityOutput<B>, PipelineError> {
        let logits = self.scorer.forward(span_embeddings);
        let [batch, n, _] = logits.dims();
        let predicted = logits.clone().argmax(2).reshape([batch, n]);

        let loss = match labels {
            Some(labels) => {
                if labels.dims() != [batch, n] {
                    return Err(PipelineError::invalid_batch(format!(
                        "entity labels {:?} do not match {} spans per row",
                        labels.dims(),
                        n
                    )));
                }
                let correct = predicted.clone().equal(labels.clone()).float() * span_mask.clone();
                metrics.update(
                    correct.sum().into_scalar().elem::<f64>().round() as usize,
                    span_mask.clone().sum().into_scalar().elem::<f64>().round() as usize,
                );
                masked_cross_entropy(logits.clone(), labels, span_mask)
            }
            None => zero_loss(&logits.device()),
        };
        Ok(EntityOutput { logits, predicted, loss })
    }

    /// Predicted label per real span, keyed by document-absolute span.
    pub fn decode(
        &self,
        output: &EntityOutput<B>,
        spans: Tensor<B, 3, Int>,
        metadata: &[SentenceMetadata],
        labels: &LabelSpace,
    ) -> Result<Vec<BTreeMap<Span, String>>, PipelineError> {
        let [_, n] = output.predicted.dims();
        let predicted = int_values(output.predicted.clone())?;
        let rows = span_rows(spans)?;

        rows.iter()
            .zip(metadata)
            .enumerate()
            .map(|(b, (row, meta))| {
                row.iter()
                    .enumerate()
                    .filter_map(|(i, span)| span.map(|s| (i, s)))
                    .map(|(i, span)| {
                        let id = predicted[b * n + i] as usize;
                        let label = labels.entity_label(id).ok_or_else(|| {
                            PipelineError::invalid_batch(format!("entity label id {id} is out of range"))
                        })?;
                        Ok((span.shift(meta.start_pos_in_doc), label.to_string()))
                    })
                    .collect::<Result<BTreeMap<_, _>, PipelineError>>()
            })
            .collect()
    }
}

// ─── LinkClassifier ───────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct LinkClassifierConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl LinkClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinkClassifier<B> {
        LinkClassifier {
            scorer: FeedForwardConfig::new(self.d_input, self.d_hidden, 1)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct LinkClassifier<B: Backend> {
    pub scorer: FeedForward<B>,
}

#[derive(Debug, Clone)]
pub struct LinkOutput<B: Backend> {
    /// [batch, n] link probabilities
    pub probs: Tensor<B, 2>,
    /// [batch, n, 2] clipped spans the scores belong to
    pub spans: Tensor<B, 3, Int>,
    /// [batch, n]
    pub mask: Tensor<B, 2>,
    pub loss: Tensor<B, 1>,
}

impl<B: Backend> LinkOutput<B> {
    /// [batch, n] 1.0 where a real span scores at or above `threshold`.
    pub fn linked_mask(&self, threshold: f64) -> Tensor<B, 2> {
        self.probs.clone().greater_equal_elem(threshold).float() * self.mask.clone()
    }
}

impl<B: Backend> LinkClassifier<B> {
    pub fn forward(
        &self,
        spans: Tensor<B, 3, Int>,
        span_mask: Tensor<B, 2>,
        embeddings: Tensor<B, 3>,
        labels: Option<Tensor<B, 2, Int>>,
        metrics: &mut LinkMetrics,
    ) -> Result<LinkOutput<B>, PipelineError> {
        let [batch, n, _] = embeddings.dims();
        let logits = self.scorer.forward(embeddings).reshape([batch, n]);
        let probs = activation::sigmoid(logits.clone());

        let loss = match labels {
            Some(labels) => {
                if labels.dims() != [batch, n] {
                    return Err(PipelineError::invalid_batch(format!(
                        "link labels {:?} do not match {} spans per row",
                        labels.dims(),
                        n
                    )));
                }
                let mask = float_values(span_mask.clone())?;
                let scores = float_values(probs.clone())?;
                let gold = int_values(labels.clone())?;
                let (scores, gold): (Vec<f32>, Vec<bool>) = mask
                    .iter()
                    .zip(scores.iter().zip(&gold))
                    .filter(|(m, _)| **m > 0.5)
                    .map(|(_, (s, g))| (*s, *g > 0))
                    .unzip();
                metrics.update(&scores, &gold);

                masked_bce_with_logits(logits, labels.float(), span_mask.clone())
            }
            None => zero_loss(&logits.device()),
        };
        Ok(LinkOutput { probs, spans, mask: span_mask, loss })
    }

    /// Real spans scoring at or above `threshold`, document-absolute, with
    /// their probability.
    pub fn decode(
        &self,
        output: &LinkOutput<B>,
        threshold: f64,
        metadata: &[SentenceMetadata],
    ) -> Result<Vec<Vec<(Span, f32)>>, PipelineError> {
        let [_, n] = output.probs.dims();
        let probs = float_values(output.probs.clone())?;
        let mask = float_values(output.mask.clone())?;
        let rows = span_rows(output.spans.clone())?;

        Ok(rows
            .iter()
            .zip(metadata)
            .enumerate()
            .map(|(b, (row, meta))| {
                row.iter()
                    .enumerate()
                    .filter_map(|(i, span)| {
                        let at = b * n + i;
                        let span = (*span)?;
                        (mask[at] > 0.5 && f64::from(probs[at]) >= threshold)
                            .then(|| (span.shift(meta.start_pos_in_doc), probs[at]))
                    })
                    .collect()
            })
            .collect())
    }
}
