// ============================================================
// Layer 5 — Relation Extractor
// ============================================================
// Scores n-ary relations between coreference clusters.
//
//   1. Cluster representation = mean of the augmented embeddings
//      of the real spans that belong to the cluster:
//        reps[c] = Σ_s member[s, c] · emb[s] / max(1, Σ_s member[s, c])
//   2. Each candidate tuple (one cluster id per role) gathers its
//      cluster representations and concatenates them.
//   3. A feed-forward scorer gives one logit per tuple.

use burn::{prelude::*, tensor::activation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::infra::metrics::RelationMetrics;
use crate::ml::feedforward::{FeedForward, FeedForwardConfig};
use crate::ml::tensor_ops::{float_values, int_values, masked_bce_with_logits, zero_loss};

/// Probability at which a candidate tuple counts as a relation.
pub const RELATION_THRESHOLD: f64 = 0.5;

#[derive(Config, Debug)]
pub struct RelationExtractorConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    pub arity: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl RelationExtractorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RelationExtractor<B> {
        RelationExtractor {
            scorer: FeedForwardConfig::new(self.arity * self.d_input, self.d_hidden, 1)
                .with_dropout(self.dropout)
                .init(device),
            arity: self.arity,
        }
    }
}

#[derive(Module, Debug)]
pub struct RelationExtractor<B: Backend> {
    pub scorer: FeedForward<B>,
    pub arity: usize,
}

/// Candidate relation tuples for one document.
#[derive(Debug, Clone)]
pub struct RelationCandidates<B: Backend> {
    /// [candidates, arity] cluster ids, one per role
    pub tuples: Tensor<B, 2, Int>,
    /// [candidates] 1 for gold relations; absent at prediction time
    pub labels: Option<Tensor<B, 1, Int>>,
}

#[derive(Debug, Clone)]
pub struct RelationOutput<B: Backend> {
    /// [candidates]
    pub probs: Tensor<B, 1>,
    pub tuples: Vec<Vec<usize>>,
    pub cluster_names: BTreeMap<usize, String>,
    pub loss: Tensor<B, 1>,
}

/// A scored relation, serialised as `[[cluster, ...], score, label]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Vec<String>, f32, u8)", into = "(Vec<String>, f32, u8)")]
pub struct PredictedRelation {
    pub clusters: Vec<String>,
    pub score: f32,
    pub label: u8,
}

impl From<(Vec<String>, f32, u8)> for PredictedRelation {
    fn from((clusters, score, label): (Vec<String>, f32, u8)) -> Self {
        Self { clusters, score, label }
    }
}

impl From<PredictedRelation> for (Vec<String>, f32, u8) {
    fn from(r: PredictedRelation) -> Self {
        (r.clusters, r.score, r.label)
    }
}

impl<B: Backend> RelationExtractor<B> {
    /// embeddings: [batch, n, d], span_mask: [batch, n],
    /// coref_labels: [batch, n, clusters] (1 = span is in cluster)
    pub fn forward(
        &self,
        embeddings: Tensor<B, 3>,
        span_mask: Tensor<B, 2>,
        coref_labels: Tensor<B, 3, Int>,
        candidates: &RelationCandidates<B>,
        cluster_names: BTreeMap<usize, String>,
        metrics: &mut RelationMetrics,
    ) -> Result<RelationOutput<B>, PipelineError> {
        let [batch, n, d] = embeddings.dims();
        let [_, n_labels, clusters] = coref_labels.dims();
        let [count, arity] = candidates.tuples.dims();
        if n_labels != n {
            return Err(PipelineError::invalid_batch(format!(
                "coreference labels cover {n_labels} spans but {n} spans were embedded"
            )));
        }
        if arity != self.arity {
            return Err(PipelineError::invalid_batch(format!(
                "relation tuples have arity {arity}, the extractor expects {}",
                self.arity
            )));
        }

        let ids = int_values(candidates.tuples.clone())?;
        if let Some(bad) = ids.iter().find(|&&id| id < 0 || id as usize >= clusters) {
            return Err(PipelineError::invalid_batch(format!(
                "relation tuple names cluster {bad}, the document has {clusters}"
            )));
        }
        let tuples: Vec<Vec<usize>> = ids
            .chunks(arity)
            .map(|t| t.iter().map(|&id| id as usize).collect())
            .collect();

        // Mean-pool span embeddings into cluster representations
        let member = coref_labels.float().reshape([batch * n, clusters])
            * span_mask.reshape([batch * n, 1]).expand([batch * n, clusters]);
        let counts = member
            .clone()
            .sum_dim(0)
            .reshape([clusters, 1])
            .clamp_min(1.0)
            .expand([clusters, d]);
        let reps = member.transpose().matmul(embeddings.reshape([batch * n, d])) / counts;

        let gathered = reps
            .select(0, candidates.tuples.clone().reshape([count * arity]))
            .reshape([count, arity * d]);
        let logits = self.scorer.forward(gathered).reshape([count]);
        let probs = activation::sigmoid(logits.clone());

        let loss = match &candidates.labels {
            Some(labels) => {
                let gold: Vec<bool> = int_values(labels.clone())?.iter().map(|&l| l > 0).collect();
                let predicted: Vec<bool> = float_values(probs.clone())?
                    .iter()
                    .map(|&p| f64::from(p) >= RELATION_THRESHOLD)
                    .collect();
                metrics.update(&predicted, &gold);
                let mask = Tensor::ones([count], &logits.device());
                masked_bce_with_logits(logits, labels.clone().float(), mask)
            }
            None => zero_loss(&logits.device()),
        };

        Ok(RelationOutput { probs, tuples, cluster_names, loss })
    }

    /// Name every candidate's clusters and attach its score and decision.
    pub fn decode(&self, output: &RelationOutput<B>) -> Result<Vec<PredictedRelation>, PipelineError> {
        let probs = float_values(output.probs.clone())?;
        output
            .tuples
            .iter()
            .zip(probs)
            .map(|(tuple, score)| {
                let clusters = tuple
                    .iter()
                    .map(|id| {
                        output.cluster_names.get(id).cloned().ok_or_else(|| {
                            PipelineError::invalid_batch(format!("no cluster name for id {id}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let label = u8::from(f64::from(score) >= RELATION_THRESHOLD);
                Ok(PredictedRelation { clusters, score, label })
            })
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tensor_ops::{float_tensor, int_tensor, scalar};
    use burn::backend::NdArray;

    type TB = NdArray;

    fn names() -> BTreeMap<usize, String> {
        BTreeMap::from([(0, "A".to_string()), (1, "B".to_string())])
    }

    #[test]
    fn test_scores_each_candidate() {
        let device = Default::default();
        let extractor = RelationExtractorConfig::new(2, 4, 2).init::<TB>(&device);
        let embeddings = float_tensor::<TB, 3>(vec![1.0, 0.0, 0.0, 1.0, 5.0, 5.0], [1, 3, 2], &device);
        let mask = float_tensor::<TB, 2>(vec![1.0, 1.0, 0.0], [1, 3], &device);
        // span 0 → A, span 1 → B, padding row claims A but is masked
        let coref = int_tensor::<TB, 3>(vec![1, 0, 0, 1, 1, 0], [1, 3, 2], &device);
        let candidates = RelationCandidates {
            tuples: int_tensor::<TB, 2>(vec![0, 1, 1, 0], [2, 2], &device),
            labels: Some(int_tensor::<TB, 1>(vec![1, 0], [2], &device)),
        };
        let mut metrics = RelationMetrics::default();

        let output = extractor
            .forward(embeddings, mask, coref, &candidates, names(), &mut metrics)
            .unwrap();
        assert_eq!(output.probs.dims(), [2]);
        assert!(scalar(output.loss.clone()) > 0.0);

        let decoded = extractor.decode(&output).unwrap();
        assert_eq!(decoded[0].clusters, vec!["A", "B"]);
        assert_eq!(decoded[1].clusters, vec!["B", "A"]);
    }

    #[test]
    fn test_rejects_unknown_cluster_id() {
        let device = Default::default();
        let extractor = RelationExtractorConfig::new(2, 4, 2).init::<TB>(&device);
        let candidates = RelationCandidates {
            tuples: int_tensor::<TB, 2>(vec![0, 7], [1, 2], &device),
            labels: None,
        };
        let result = extractor.forward(
            Tensor::ones([1, 2, 2], &device),
            Tensor::ones([1, 2], &device),
            int_tensor::<TB, 3>(vec![1, 0, 0, 1], [1, 2, 2], &device),
            &candidates,
            names(),
            &mut RelationMetrics::default(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidBatch(_))));
    }

    #[test]
    fn test_predicted_relation_wire_format() {
        let r = PredictedRelation { clusters: vec!["A".into(), "B".into()], score: 0.5, label: 1 };
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"[["A","B"],0.5,1]"#);
    }
}
