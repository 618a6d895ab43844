// ============================================================
// Layer 5 — NER Tagger
// ============================================================
// Token classifier over the BIO tag vocabulary of the active
// label namespace.
//
// forward: contextualised tokens → tag logits (+ masked loss when
//          gold tags are supplied)
// decode:  argmax tags → BIO spans per sentence, emitted as
//            • a [batch, n, 2] span tensor (sentence-relative,
//              half-open, -1 padded) for the span stages
//            • decoded / gold mention dicts keyed by the span's
//              document-absolute position
//
// Decoding is lenient: an `I-x` that does not continue an `x`
// mention opens a new one.

use burn::prelude::*;
use std::collections::BTreeMap;

use crate::domain::document::SentenceMetadata;
use crate::domain::labels::{LabelSpace, OUTSIDE_TAG};
use crate::domain::mentions::MentionDict;
use crate::domain::span::Span;
use crate::error::PipelineError;
use crate::ml::feedforward::{FeedForward, FeedForwardConfig};
use crate::ml::tensor_ops::{int_tensor, int_values, masked_cross_entropy, zero_loss};

#[derive(Config, Debug)]
pub struct NerTaggerConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    pub num_tags: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl NerTaggerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> NerTagger<B> {
        NerTagger {
            scorer: FeedForwardConfig::new(self.d_input, self.d_hidden, self.num_tags)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct NerTagger<B: Backend> {
    pub scorer: FeedForward<B>,
}

/// Raw tagger output for one batch.
#[derive(Debug, Clone)]
pub struct NerOutput<B: Backend> {
    /// [batch, max_len, num_tags]
    pub logits: Tensor<B, 3>,
    /// [batch, max_len]
    pub mask: Tensor<B, 2>,
    pub gold_tags: Option<Tensor<B, 2, Int>>,
    pub loss: Tensor<B, 1>,
}

/// Tagger output after BIO decoding.
#[derive(Debug, Clone)]
pub struct NerDecoded<B: Backend> {
    /// [batch, n, 2] predicted spans; `None` when nothing was predicted.
    pub spans: Option<Tensor<B, 3, Int>>,
    /// Predicted mentions: absolute span → `[tag label]`.
    pub decoded_ner: Vec<MentionDict>,
    /// Gold mentions decoded from the gold tags, same layout.
    pub gold_ner: Option<Vec<MentionDict>>,
    pub loss: Tensor<B, 1>,
}

impl<B: Backend> NerTagger<B> {
    pub fn forward(
        &self,
        contextualized: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        gold_tags: Option<Tensor<B, 2, Int>>,
    ) -> Result<NerOutput<B>, PipelineError> {
        let logits = self.scorer.forward(contextualized);
        let loss = match &gold_tags {
            Some(tags) => {
                if tags.dims() != mask.dims() {
                    return Err(PipelineError::invalid_batch(format!(
                        "gold tags {:?} do not match the sentence mask {:?}",
                        tags.dims(),
                        mask.dims()
                    )));
                }
                masked_cross_entropy(logits.clone(), tags.clone(), mask.clone())
            }
            None => zero_loss(&logits.device()),
        };
        Ok(NerOutput { logits, mask, gold_tags, loss })
    }

    pub fn decode(
        &self,
        output: NerOutput<B>,
        metadata: &[SentenceMetadata],
        labels: &LabelSpace,
    ) -> Result<NerDecoded<B>, PipelineError> {
        let [batch, max_len, _] = output.logits.dims();
        let device = output.logits.device();

        let predicted = int_values(output.logits.argmax(2).reshape([batch, max_len]))?;
        let predicted_rows = tag_rows(&predicted, metadata, max_len, labels);
        let span_lists: Vec<Vec<Span>> = predicted_rows
            .iter()
            .map(|row| row.iter().map(|(span, _)| *span).collect())
            .collect();
        let decoded_ner = mention_dicts(&predicted_rows, metadata);

        let gold_ner = match output.gold_tags {
            Some(tags) => {
                let gold = int_values(tags)?;
                Some(mention_dicts(&tag_rows(&gold, metadata, max_len, labels), metadata))
            }
            None => None,
        };

        Ok(NerDecoded {
            spans: spans_tensor(&span_lists, &device),
            decoded_ner,
            gold_ner,
            loss: output.loss,
        })
    }
}

/// BIO-decode every row of a flat `[batch, max_len]` tag-id buffer,
/// reading only each sentence's real tokens.
fn tag_rows(
    ids: &[i64],
    metadata: &[SentenceMetadata],
    max_len: usize,
    labels: &LabelSpace,
) -> Vec<Vec<(Span, String)>> {
    metadata
        .iter()
        .enumerate()
        .map(|(row, meta)| {
            let len = meta.sentence_len().min(max_len);
            let tags: Vec<&str> = ids[row * max_len..row * max_len + len]
                .iter()
                .map(|&id| labels.tag(id as usize).unwrap_or(OUTSIDE_TAG))
                .collect();
            bio_to_spans(&tags)
        })
        .collect()
}

fn mention_dicts(rows: &[Vec<(Span, String)>], metadata: &[SentenceMetadata]) -> Vec<MentionDict> {
    rows.iter()
        .zip(metadata)
        .map(|(row, meta)| {
            row.iter()
                .map(|(span, label)| (span.shift(meta.start_pos_in_doc), vec![label.clone()]))
                .collect::<BTreeMap<_, _>>()
        })
        .collect()
}

/// Decode BIO tags into `(span, label)` pairs, half-open and in order.
pub fn bio_to_spans<S: AsRef<str>>(tags: &[S]) -> Vec<(Span, String)> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, String)> = None;

    for (i, tag) in tags.iter().enumerate() {
        let tag = tag.as_ref();
        let (prefix, label) = match tag.split_once('-') {
            Some((p, l)) if p == "B" || p == "I" => (p, l),
            _ => ("O", ""),
        };

        let continues = prefix == "I" && open.as_ref().is_some_and(|(_, l)| l == label);
        if continues {
            continue;
        }
        if let Some((start, l)) = open.take() {
            spans.push((Span::new(start, i), l));
        }
        if prefix != "O" {
            open = Some((i, label.to_string()));
        }
    }
    if let Some((start, l)) = open {
        spans.push((Span::new(start, tags.len()), l));
    }
    spans
}

/// Pack per-row span lists into a `[batch, n, 2]` tensor padded with -1.
pub fn spans_tensor<B: Backend>(span_lists: &[Vec<Span>], device: &B::Device) -> Option<Tensor<B, 3, Int>> {
    let width = span_lists.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return None;
    }
    let values = span_lists
        .iter()
        .flat_map(|row| {
            (0..width).flat_map(move |i| match row.get(i) {
                Some(span) => [span.start as i64, span.end as i64],
                None => [-1, -1],
            })
        })
        .collect();
    Some(int_tensor(values, [span_lists.len(), width, 2], device))
}
