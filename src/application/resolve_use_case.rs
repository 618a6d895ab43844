// ============================================================
// Layer 2 — Resolve Use Case
// ============================================================
// Turns predicted relations over cluster keys into relations
// over readable phrases. A cluster is named after its first
// mention: the mention's words joined with `_`.
//
// Inputs are single JSON objects:
//   ner predictions      {"words": [...]}
//   cluster predictions  {"clusters": {"key": [[s, e], ...]}}
//   relation predictions {"predicted_relations": [[[keys], score, label], ...]}

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use crate::domain::document::phrase;
use crate::domain::span::Span;
use crate::ml::relation::PredictedRelation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    pub ner_predictions: PathBuf,
    pub cluster_predictions: PathBuf,
    pub relation_predictions: PathBuf,
    pub output: PathBuf,
    pub paper_id: String,
}

#[derive(Debug, Deserialize)]
struct NerPredictions {
    words: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterPredictions {
    clusters: BTreeMap<String, Vec<Span>>,
}

#[derive(Debug, Deserialize)]
struct RelationPredictions {
    predicted_relations: Vec<PredictedRelation>,
}

/// Output record: relations as phrase tuples with their score, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRelations {
    pub doc_id: String,
    pub sorted_predicted_relations: Vec<(Vec<String>, f32)>,
}

pub struct ResolveUseCase {
    config: ResolveConfig,
}

impl ResolveUseCase {
    pub fn new(config: ResolveConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ResolvedRelations> {
        let cfg = &self.config;
        let ner: NerPredictions = read_json(&cfg.ner_predictions)?;
        let clusters: ClusterPredictions = read_json(&cfg.cluster_predictions)?;
        let relations: RelationPredictions = read_json(&cfg.relation_predictions)?;

        let resolved = resolve(&ner.words, &clusters.clusters, &relations.predicted_relations)?;
        tracing::info!(
            "Resolved {} of {} predicted relations for '{}'",
            resolved.len(),
            relations.predicted_relations.len(),
            cfg.paper_id
        );

        let out = ResolvedRelations { doc_id: cfg.paper_id.clone(), sorted_predicted_relations: resolved };
        fs::write(&cfg.output, serde_json::to_string(&out)?)
            .with_context(|| format!("Cannot write '{}'", cfg.output.display()))?;
        Ok(out)
    }
}

/// Name the clusters of every positive relation and sort by score, highest
/// first. Relations with equal scores keep their input order.
pub fn resolve(
    words: &[String],
    clusters: &BTreeMap<String, Vec<Span>>,
    relations: &[PredictedRelation],
) -> Result<Vec<(Vec<String>, f32)>> {
    let mut resolved = relations
        .iter()
        .filter(|r| r.label != 0)
        .map(|r| {
            let names = r
                .clusters
                .iter()
                .map(|key| cluster_phrase(key, clusters, words))
                .collect::<Result<Vec<_>>>()?;
            Ok((names, r.score))
        })
        .collect::<Result<Vec<_>>>()?;
    resolved.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(resolved)
}

fn cluster_phrase(key: &str, clusters: &BTreeMap<String, Vec<Span>>, words: &[String]) -> Result<String> {
    let first = clusters
        .get(key)
        .with_context(|| format!("Relation names unknown cluster '{key}'"))?
        .first()
        .with_context(|| format!("Cluster '{key}' has no mentions"))?;
    Ok(phrase(words, first, "_"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Bad JSON in '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn words() -> Vec<String> {
        ["we", "train", "deep", "nets", "on", "image", "net"].iter().map(|s| s.to_string()).collect()
    }

    fn clusters() -> BTreeMap<String, Vec<Span>> {
        BTreeMap::from([
            ("0".to_string(), vec![Span::new(2, 4), Span::new(0, 1)]),
            ("1".to_string(), vec![Span::new(5, 7)]),
        ])
    }

    fn relation(keys: &[&str], score: f32, label: u8) -> PredictedRelation {
        PredictedRelation { clusters: keys.iter().map(|k| k.to_string()).collect(), score, label }
    }

    #[test]
    fn test_positive_relations_sorted_by_score() {
        let relations = vec![
            relation(&["0", "1"], 0.6, 1),
            relation(&["1", "0"], 0.9, 0),
            relation(&["1", "1"], 0.8, 1),
        ];
        let resolved = resolve(&words(), &clusters(), &relations).unwrap();
        assert_eq!(
            resolved,
            vec![
                (vec!["image_net".to_string(), "image_net".to_string()], 0.8),
                (vec!["deep_nets".to_string(), "image_net".to_string()], 0.6),
            ]
        );
    }

    #[test]
    fn test_unknown_cluster_is_an_error() {
        let err = resolve(&words(), &clusters(), &[relation(&["7"], 0.5, 1)]).unwrap_err();
        assert!(err.to_string().contains("'7'"));
    }

    #[test]
    fn test_execute_reads_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name);
        fs::write(path("ner.json"), r#"{"words": ["a", "b", "c"]}"#).unwrap();
        fs::write(path("clusters.json"), r#"{"clusters": {"k": [[1, 3]]}}"#).unwrap();
        fs::write(path("relations.json"), r#"{"predicted_relations": [[["k", "k"], 0.7, 1]]}"#).unwrap();

        let out = ResolveUseCase::new(ResolveConfig {
            ner_predictions: path("ner.json"),
            cluster_predictions: path("clusters.json"),
            relation_predictions: path("relations.json"),
            output: path("out.json"),
            paper_id: "paper".to_string(),
        })
        .execute()
        .unwrap();

        let written: ResolvedRelations = read_json(&path("out.json")).unwrap();
        assert_eq!(written, out);
        assert_eq!(written.sorted_predicted_relations[0].0, vec!["b_c", "b_c"]);
    }
}
