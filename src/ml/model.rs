// ============================================================
// Layer 5 — Joint Span-Labeling Model
// ============================================================
// One forward call runs the stages in a fixed order:
//
//   1. embed + contextualise     text → [batch, max_len, d_model]
//   2. NER tagging + BIO decode  → predicted spans, mention dicts
//   3. span embeddings           endpoint (+ attentive) per span
//   4. entity classification     predicted spans → types, merged
//                                into the decoded mention dicts
//   5. augmentation              + document position + type one-hot
//   6. link classification       span → linked probability
//   7. relation extraction       cluster tuples → relation score
//   8. loss = ner + entity + link + relation
//
// Stages 3–7 need at least one real candidate span. Without one
// they are skipped, their outputs are `None`, and they add zero
// to the loss.

use burn::prelude::*;
use std::{collections::BTreeMap, sync::Arc};

use crate::data::batcher::JointBatch;
use crate::domain::document::{DocumentMetadata, SentenceMetadata};
use crate::domain::labels::LabelSpace;
use crate::domain::mentions::{append_aligned_labels, nth_labels, MentionDict};
use crate::domain::span::Span;
use crate::error::{MetricsError, PipelineError};
use crate::infra::metrics::{apply_display, merge_metrics, prefixed, MetricMap, PipelineMetrics};
use crate::ml::embedder::{contextualize, extract_sentences, TextEmbedder, TextEmbedderConfig};
use crate::ml::encoder::{ContextEncoder, ContextEncoderConfig};
use crate::ml::ner::{NerDecoded, NerTagger, NerTaggerConfig};
use crate::ml::relation::{PredictedRelation, RelationExtractor, RelationExtractorConfig, RelationOutput};
use crate::ml::span_classifier::{
    EntityClassifier, EntityClassifierConfig, EntityOutput, LinkClassifier, LinkClassifierConfig, LinkOutput,
};
use crate::ml::span_extractor::{
    EndpointSpanExtractor, EndpointSpanExtractorConfig, SelfAttentiveSpanExtractor,
    SelfAttentiveSpanExtractorConfig,
};
use crate::ml::tensor_ops::{float_tensor, float_values, one_hot, scalar, zero_loss};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct JointModelConfig {
    pub vocab_size: usize,
    pub num_tags: usize,
    pub num_entity_labels: usize,
    #[config(default = 64)]
    pub embedding_dim: usize,
    #[config(default = 64)]
    pub residual_embedding_dim: usize,
    #[config(default = 128)]
    pub d_model: usize,
    #[config(default = 4)]
    pub num_heads: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 256)]
    pub d_ff: usize,
    #[config(default = 512)]
    pub max_positions: usize,
    /// Width-embedding size.
    #[config(default = 20)]
    pub feature_size: usize,
    #[config(default = 150)]
    pub hidden_dim: usize,
    #[config(default = 20)]
    pub max_span_width: usize,
    #[config(default = 0.2)]
    pub lexical_dropout: f64,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = true)]
    pub use_attentive_span_extractor: bool,
    #[config(default = true)]
    pub use_entity_classifier: bool,
}

impl JointModelConfig {
    /// Width of a span embedding before augmentation.
    pub fn span_dim(&self) -> usize {
        let attentive = if self.use_attentive_span_extractor { self.d_model } else { 0 };
        2 * self.d_model + self.feature_size + attentive
    }

    /// Span embedding + position feature + entity one-hot.
    pub fn augmented_dim(&self) -> usize {
        self.span_dim() + 1 + self.num_entity_labels
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> JointModel<B> {
        let embedder_cfg = TextEmbedderConfig::new(self.vocab_size, self.embedding_dim, self.residual_embedding_dim)
            .with_lexical_dropout(self.lexical_dropout);
        let encoder = ContextEncoderConfig::new(
            embedder_cfg.output_dim(),
            self.d_model,
            self.num_heads,
            self.num_layers,
            self.d_ff,
        )
        .with_max_positions(self.max_positions)
        .with_dropout(self.dropout)
        .init(device);

        JointModel {
            embedder: embedder_cfg.init(device),
            encoder,
            ner: NerTaggerConfig::new(self.d_model, self.hidden_dim, self.num_tags)
                .with_dropout(self.dropout)
                .init(device),
            endpoint: EndpointSpanExtractorConfig::new(self.d_model, self.max_span_width, self.feature_size)
                .init(device),
            attentive: self
                .use_attentive_span_extractor
                .then(|| SelfAttentiveSpanExtractorConfig::new(self.d_model).init(device)),
            entity_classifier: self.use_entity_classifier.then(|| {
                EntityClassifierConfig::new(self.span_dim(), self.hidden_dim, self.num_entity_labels)
                    .with_dropout(self.dropout)
                    .init(device)
            }),
            link_classifier: LinkClassifierConfig::new(self.augmented_dim(), self.hidden_dim)
                .with_dropout(self.dropout)
                .init(device),
            relation: RelationExtractorConfig::new(self.augmented_dim(), self.hidden_dim, self.num_entity_labels)
                .with_dropout(self.dropout)
                .init(device),
            num_entity_labels: self.num_entity_labels,
        }
    }
}

#[derive(Module, Debug)]
pub struct JointModel<B: Backend> {
    pub embedder: TextEmbedder<B>,
    pub encoder: ContextEncoder<B>,
    pub ner: NerTagger<B>,
    pub endpoint: EndpointSpanExtractor<B>,
    pub attentive: Option<SelfAttentiveSpanExtractor<B>>,
    pub entity_classifier: Option<EntityClassifier<B>>,
    pub link_classifier: LinkClassifier<B>,
    pub relation: RelationExtractor<B>,
    pub num_entity_labels: usize,
}

/// Span representations for one span set.
#[derive(Debug, Clone)]
pub struct SpanEmbeddings<B: Backend> {
    /// [batch, n, 2] with padding rows clipped to [0, 0]
    pub spans: Tensor<B, 3, Int>,
    /// [batch, n] 1.0 for real spans (`start >= 0` before clipping)
    pub mask: Tensor<B, 2>,
    /// [batch, n, span_dim]
    pub embeddings: Tensor<B, 3>,
}

impl<B: Backend> JointModel<B> {
    /// Stage 1: word ids → contextualised sentence tokens and their mask.
    pub fn contextualize(
        &self,
        text: Tensor<B, 2, Int>,
        metadata: &[SentenceMetadata],
    ) -> Result<(Tensor<B, 3>, Tensor<B, 2>), PipelineError> {
        let window = extract_sentences(self.embedder.forward(text), metadata)?;
        let contextualized = contextualize(&self.encoder, &window);
        Ok((contextualized, window.mask))
    }

    /// Stage 3: endpoint (+ attentive) embeddings for `spans` ([batch, n, 2],
    /// -1 padded). The mask comes from the raw start; lookups use the
    /// clipped spans.
    pub fn generate_span_embeddings(
        &self,
        contextualized: Tensor<B, 3>,
        spans: Tensor<B, 3, Int>,
    ) -> SpanEmbeddings<B> {
        let [batch, n, _] = spans.dims();
        let mask = spans
            .clone()
            .slice([0..batch, 0..n, 0..1])
            .reshape([batch, n])
            .greater_equal_elem(0)
            .float();
        let spans = spans.clamp_min(0);

        let endpoint = self.endpoint.forward(contextualized.clone(), spans.clone());
        let embeddings = match &self.attentive {
            Some(attentive) => {
                let attended = attentive.forward(contextualized, spans.clone());
                Tensor::cat(vec![endpoint, attended], 2)
            }
            None => endpoint,
        };
        SpanEmbeddings { spans, mask, embeddings }
    }
}

// ─── Outputs ──────────────────────────────────────────────────────────────────
/// Everything one forward call produced. Created per call, never reused.
#[derive(Debug, Clone)]
pub struct JointOutput<B: Backend> {
    pub ner: NerDecoded<B>,
    pub relation: Option<RelationOutput<B>>,
    pub linked: Option<LinkOutput<B>>,
    pub entity: Option<EntityOutput<B>>,
    pub loss: Tensor<B, 1>,
    pub metadata: Vec<SentenceMetadata>,
}

/// Per-stage loss values read back to the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLosses {
    pub ner: f64,
    pub entity: f64,
    pub linked: f64,
    pub relation: f64,
}

impl<B: Backend> JointOutput<B> {
    pub fn stage_losses(&self) -> StageLosses {
        StageLosses {
            ner: scalar(self.ner.loss.clone()),
            entity: self.entity.as_ref().map_or(0.0, |e| scalar(e.loss.clone())),
            linked: self.linked.as_ref().map_or(0.0, |l| scalar(l.loss.clone())),
            relation: self.relation.as_ref().map_or(0.0, |r| scalar(r.loss.clone())),
        }
    }
}

/// Result of `JointPipeline::decode`.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub ner: Vec<MentionDict>,
    pub relation: Vec<PredictedRelation>,
    /// Linked spans per batch element, document-absolute, with probability.
    pub linked: Vec<Vec<(Span, f32)>>,
}

/// Per-cluster counts of linked spans for one document batch.
#[derive(Debug, Clone)]
pub struct LinkPrediction {
    pub doc_key: String,
    /// Indexed by cluster id.
    pub cluster_sizes: Vec<usize>,
    pub document_metadata: Arc<DocumentMetadata>,
}

#[derive(Debug)]
struct SpanStages<B: Backend> {
    entity: Option<EntityOutput<B>>,
    linked: Option<LinkOutput<B>>,
    relation: Option<RelationOutput<B>>,
}

impl<B: Backend> SpanStages<B> {
    fn skipped() -> Self {
        Self { entity: None, linked: None, relation: None }
    }
}

/// Per-span inputs of stages 4 to 7, row-aligned with the span set they are
/// scored with. Gold supervision only exists for the batch's own spans.
struct SpanTargets<B: Backend> {
    /// Types appended during augmentation.
    types: Option<Tensor<B, 2, Int>>,
    entity: Option<Tensor<B, 2, Int>>,
    link: Option<Tensor<B, 2, Int>>,
    coref: Option<Tensor<B, 3, Int>>,
}

impl<B: Backend> SpanTargets<B> {
    fn gold(batch: &JointBatch<B>) -> Self {
        Self {
            types: batch.span_entity_labels.clone(),
            entity: batch.span_entity_labels.clone(),
            link: batch.span_link_labels.clone(),
            coref: batch.span_coref_labels.clone(),
        }
    }

    /// NER-predicted spans: only the classifier's own types travel along.
    fn predicted(types: Option<Tensor<B, 2, Int>>) -> Self {
        Self { types, entity: None, link: None, coref: None }
    }

    fn check(&self, rows: usize, n: usize) -> Result<(), PipelineError> {
        let per_span = [("span entity labels", &self.types), ("span link labels", &self.link)];
        for (name, labels) in per_span {
            if let Some(labels) = labels {
                if labels.dims() != [rows, n] {
                    return Err(PipelineError::alignment(format!(
                        "{name} {:?} do not match {rows}x{n} spans",
                        labels.dims()
                    )));
                }
            }
        }
        if let Some(coref) = &self.coref {
            let [coref_rows, coref_n, _] = coref.dims();
            if [coref_rows, coref_n] != [rows, n] {
                return Err(PipelineError::alignment(format!(
                    "coreference labels {:?} do not match {rows}x{n} spans",
                    coref.dims()
                )));
            }
        }
        Ok(())
    }
}

// ─── JointPipeline ────────────────────────────────────────────────────────────
/// The model plus the label vocabularies and metric display settings it
/// was configured with.
#[derive(Debug)]
pub struct JointPipeline<B: Backend> {
    pub model: JointModel<B>,
    pub labels: LabelSpace,
    pub display_metrics: Option<Vec<String>>,
}

impl<B: Backend> JointPipeline<B> {
    pub fn new(
        model: JointModel<B>,
        labels: LabelSpace,
        display_metrics: Option<Vec<String>>,
    ) -> Result<Self, PipelineError> {
        if model.num_entity_labels != labels.num_entity_labels() {
            return Err(PipelineError::LabelSpaceMismatch(format!(
                "model has {} entity labels, label space has {}",
                model.num_entity_labels,
                labels.num_entity_labels()
            )));
        }
        Ok(Self { model, labels, display_metrics })
    }

    pub fn forward(
        &self,
        batch: &JointBatch<B>,
        metrics: &mut PipelineMetrics,
    ) -> Result<JointOutput<B>, PipelineError> {
        let metadata = &batch.metadata;
        let (contextualized, text_mask) = self.model.contextualize(batch.text.clone(), metadata)?;

        // ── NER ───────────────────────────────────────────────────────────────
        let gold_tags = batch.ner_labels.select(self.labels.ner_label_kind).cloned();
        let ner_output = self.model.ner.forward(contextualized.clone(), text_mask, gold_tags)?;
        let mut ner = self.model.ner.decode(ner_output, metadata, &self.labels)?;

        // ── Entity types of the predicted spans ───────────────────────────────
        let mut predicted_entity_labels = None;
        if let (Some(classifier), Some(predicted_spans)) = (&self.model.entity_classifier, &ner.spans) {
            let span_emb = self
                .model
                .generate_span_embeddings(contextualized.clone(), predicted_spans.clone());
            let output = classifier.forward(span_emb.embeddings, span_emb.mask, None, &mut metrics.entity)?;
            let types = classifier.decode(&output, span_emb.spans, metadata, &self.labels)?;
            append_aligned_labels(&mut ner.decoded_ner, &types)?;
            predicted_entity_labels = Some(output.predicted);
        }

        if let Some(gold_ner) = ner.gold_ner.as_mut() {
            let gold_dicts: Vec<MentionDict> = metadata.iter().map(|m| m.ner_dict.clone()).collect();
            append_aligned_labels(gold_ner, &nth_labels(&gold_dicts, 1))?;

            metrics
                .mention
                .update(&nth_labels(&ner.decoded_ner, 0), &nth_labels(gold_ner, 0));
            metrics.typed.update(&nth_labels(&ner.decoded_ner, 1), &nth_labels(gold_ner, 1));
        }

        // ── Span stages ───────────────────────────────────────────────────────
        let stages = match (&batch.spans, ner.spans.clone()) {
            (Some(spans), _) => {
                self.span_stages(contextualized, spans.clone(), SpanTargets::gold(batch), batch, metrics)?
            }
            (None, Some(predicted)) => {
                tracing::debug!("scoring predicted spans without per-span gold labels");
                let targets = SpanTargets::predicted(predicted_entity_labels);
                self.span_stages(contextualized, predicted, targets, batch, metrics)?
            }
            (None, None) => {
                tracing::debug!("no candidate spans, span stages skipped");
                SpanStages::skipped()
            }
        };

        let device = batch.text.device();
        let loss = ner.loss.clone()
            + stages.entity.as_ref().map_or_else(|| zero_loss(&device), |e| e.loss.clone())
            + stages.linked.as_ref().map_or_else(|| zero_loss(&device), |l| l.loss.clone())
            + stages.relation.as_ref().map_or_else(|| zero_loss(&device), |r| r.loss.clone());

        Ok(JointOutput {
            ner,
            relation: stages.relation,
            linked: stages.linked,
            entity: stages.entity,
            loss,
            metadata: metadata.clone(),
        })
    }

    /// Stages 3 to 7 over one candidate span set.
    fn span_stages(
        &self,
        contextualized: Tensor<B, 3>,
        spans: Tensor<B, 3, Int>,
        targets: SpanTargets<B>,
        batch: &JointBatch<B>,
        metrics: &mut PipelineMetrics,
    ) -> Result<SpanStages<B>, PipelineError> {
        let SpanEmbeddings { spans, mask, embeddings } =
            self.model.generate_span_embeddings(contextualized, spans);
        if scalar(mask.clone().sum()) == 0.0 {
            tracing::debug!("all candidate spans are padding, span stages skipped");
            return Ok(SpanStages::skipped());
        }
        let [rows, n, _] = embeddings.dims();
        targets.check(rows, n)?;

        let entity = match (&self.model.entity_classifier, &targets.entity) {
            (Some(classifier), Some(labels)) => Some(classifier.forward(
                embeddings.clone(),
                mask.clone(),
                Some(labels.clone()),
                &mut metrics.entity,
            )?),
            _ => None,
        };

        let augmented = self.augment(embeddings, &spans, &mask, targets.types, &batch.metadata);

        let linked = self.model.link_classifier.forward(
            spans,
            mask.clone(),
            augmented.clone(),
            targets.link,
            &mut metrics.link,
        )?;

        let relation = match (targets.coref, &batch.relation_index) {
            (Some(coref), Some(candidates)) => {
                let names = batch
                    .metadata
                    .first()
                    .map(|m| m.document_metadata.cluster_names())
                    .unwrap_or_default();
                Some(self.model.relation.forward(
                    augmented,
                    mask,
                    coref,
                    candidates,
                    names,
                    &mut metrics.relation,
                )?)
            }
            _ => {
                tracing::debug!("no clusters or relation candidates, relation stage skipped");
                None
            }
        };

        Ok(SpanStages { entity, linked: Some(linked), relation })
    }

    /// Stage 5: append the span's document-relative midpoint and its entity
    /// type one-hot (zeros when no types are known).
    fn augment(
        &self,
        embeddings: Tensor<B, 3>,
        spans: &Tensor<B, 3, Int>,
        mask: &Tensor<B, 2>,
        span_entity_labels: Option<Tensor<B, 2, Int>>,
        metadata: &[SentenceMetadata],
    ) -> Tensor<B, 3> {
        let [batch, n, _] = embeddings.dims();
        let k = self.model.num_entity_labels;
        let device = embeddings.device();

        let offsets = metadata.iter().map(|m| m.start_pos_in_doc as f32).collect();
        let offsets = float_tensor::<B, 3>(offsets, [batch, 1, 1], &device).expand([batch, n, 2]);
        let row_mask = mask.clone().unsqueeze_dim::<3>(2);
        let absolute = spans.clone().float() + offsets * row_mask.clone().expand([batch, n, 2]);
        let doc_length = metadata
            .first()
            .map_or(1, |m| m.document_metadata.doc_length)
            .max(1);
        let position = absolute.mean_dim(2).div_scalar(doc_length as f32);

        let types = match span_entity_labels {
            Some(labels) => one_hot(labels, k) * row_mask.expand([batch, n, k]),
            None => Tensor::zeros([batch, n, k], &device),
        };

        Tensor::cat(vec![embeddings, position, types], 2)
    }

    /// Re-decode relation and link outputs; NER is already decoded.
    pub fn decode(&self, output: &JointOutput<B>, link_threshold: f64) -> Result<Decoded, PipelineError> {
        let relation = match &output.relation {
            Some(r) => self.model.relation.decode(r)?,
            None => Vec::new(),
        };
        let linked = match &output.linked {
            Some(l) => self.model.link_classifier.decode(l, link_threshold, &output.metadata)?,
            None => vec![Vec::new(); output.metadata.len()],
        };
        Ok(Decoded { ner: output.ner.decoded_ner.clone(), relation, linked })
    }

    /// Count, per coreference cluster, the spans of this batch whose link
    /// score reaches `threshold`. Gold labels in the batch still feed
    /// `metrics`.
    pub fn decode_links(
        &self,
        batch: &JointBatch<B>,
        threshold: f64,
        metrics: &mut PipelineMetrics,
    ) -> Result<LinkPrediction, PipelineError> {
        let first = batch
            .metadata
            .first()
            .ok_or_else(|| PipelineError::invalid_batch("batch without metadata"))?;
        let clusters = first.document_metadata.cluster_name_to_id.len();
        if batch.spans.is_none() {
            return Err(PipelineError::invalid_batch(
                "link counting needs the batch's own spans to read their clusters",
            ));
        }

        let output = self.forward(batch, metrics)?;
        tracing::debug!("Stage losses for '{}': {:?}", first.doc_key, output.stage_losses());

        let cluster_sizes = match (&output.linked, &batch.span_coref_labels) {
            (Some(linked), Some(coref)) => {
                let [rows, n, c] = coref.dims();
                if c != clusters {
                    return Err(PipelineError::invalid_batch(format!(
                        "coreference labels have {c} clusters, metadata names {clusters}"
                    )));
                }
                let linked_mask = linked.linked_mask(threshold).unsqueeze_dim::<3>(2).expand([rows, n, c]);
                let counts = (coref.clone().float() * linked_mask).reshape([rows * n, c]).sum_dim(0);
                float_values(counts)?.iter().map(|v| v.round() as usize).collect()
            }
            _ => vec![0; clusters],
        };

        Ok(LinkPrediction {
            doc_key: first.doc_key.clone(),
            cluster_sizes,
            document_metadata: Arc::clone(&first.document_metadata),
        })
    }

    /// Every stage's metrics in one flat map. Names outside the display
    /// allow-list come back with a leading `_`.
    pub fn get_metrics(&self, metrics: &mut PipelineMetrics, reset: bool) -> Result<MetricMap, MetricsError> {
        let mut groups = vec![
            prefixed("ner_", metrics.typed.get_metric(reset)),
            prefixed("ner_mention_", metrics.mention.get_metric(reset)),
        ];
        if self.model.entity_classifier.is_some() {
            groups.push(metrics.entity.get_metric(reset));
        }
        groups.push(metrics.relation.get_metric(reset));
        groups.push(metrics.link.get_metric(reset));

        let all: BTreeMap<String, f64> = merge_metrics(groups)?;
        Ok(apply_display(all, self.display_metrics.as_deref()))
    }
}
