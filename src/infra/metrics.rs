// ============================================================
// Layer 6 — Metric Accumulators
// ============================================================
// Running counters the pipeline updates on every forward call.
// They are plain values owned by the caller and passed into the
// pipeline by `&mut`; nothing here is global. The caller resets
// them between evaluation epochs with `reset()` or by reading
// them with `reset = true`.
//
// Metric names reported by the different stages are merged into
// one flat map. Two stages reporting the same name is a
// configuration bug and fails loudly instead of overwriting.

use std::collections::BTreeMap;

use crate::domain::labels::{ENTITY_TYPES, MENTION_LABEL};
use crate::domain::span::Span;
use crate::error::MetricsError;

pub type MetricMap = BTreeMap<String, f64>;

/// Precision, recall and F1 from raw counts. Empty denominators give 0.
pub fn precision_recall_f1(matched: usize, predicted: usize, gold: usize) -> (f64, f64, f64) {
    let precision = if predicted > 0 { matched as f64 / predicted as f64 } else { 0.0 };
    let recall = if gold > 0 { matched as f64 / gold as f64 } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

// ─── MentionMetrics ───────────────────────────────────────────────────────────
/// Mention-level detection scores restricted to a closed label set.
///
/// A predicted mention counts when its label is in the set; it matches
/// when the gold dict has the same span with the same label.
#[derive(Debug, Clone)]
pub struct MentionMetrics {
    labels: Vec<String>,
    predicted: usize,
    gold: usize,
    matched: usize,
}

impl MentionMetrics {
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.as_ref().to_string()).collect(),
            predicted: 0,
            gold: 0,
            matched: 0,
        }
    }

    fn tracks(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Zip predicted and gold dicts positionally (one pair per sentence).
    pub fn update(&mut self, predicted: &[BTreeMap<Span, String>], gold: &[BTreeMap<Span, String>]) {
        for (pred, gold) in predicted.iter().zip(gold) {
            for (span, label) in pred {
                if !self.tracks(label) {
                    continue;
                }
                self.predicted += 1;
                if gold.get(span) == Some(label) {
                    self.matched += 1;
                }
            }
            self.gold += gold.values().filter(|l| self.tracks(l)).count();
        }
    }

    pub fn get_metric(&mut self, reset: bool) -> MetricMap {
        let (p, r, f1) = precision_recall_f1(self.matched, self.predicted, self.gold);
        if reset {
            self.reset();
        }
        BTreeMap::from([
            ("precision".to_string(), p),
            ("recall".to_string(), r),
            ("f1".to_string(), f1),
        ])
    }

    pub fn reset(&mut self) {
        self.predicted = 0;
        self.gold = 0;
        self.matched = 0;
    }
}

// ─── EntityMetrics ────────────────────────────────────────────────────────────
/// Accuracy of the entity classifier over valid gold spans.
#[derive(Debug, Clone, Default)]
pub struct EntityMetrics {
    correct: usize,
    total: usize,
}

impl EntityMetrics {
    pub fn update(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn get_metric(&mut self, reset: bool) -> MetricMap {
        let accuracy = if self.total > 0 { self.correct as f64 / self.total as f64 } else { 0.0 };
        if reset {
            *self = Self::default();
        }
        BTreeMap::from([("entity_accuracy".to_string(), accuracy)])
    }
}

// ─── LinkMetrics ──────────────────────────────────────────────────────────────
/// Link scores with gold decisions; reports the F1-maximising threshold.
///
/// `span_threshold` is what the archive stores as
/// `best_validation__span_threshold` for prediction.
#[derive(Debug, Clone, Default)]
pub struct LinkMetrics {
    scored: Vec<(f32, bool)>,
}

impl LinkMetrics {
    pub const DEFAULT_THRESHOLD: f64 = 0.5;

    pub fn update(&mut self, scores: &[f32], gold: &[bool]) {
        self.scored.extend(scores.iter().copied().zip(gold.iter().copied()));
    }

    pub fn get_metric(&mut self, reset: bool) -> MetricMap {
        let gold_total = self.scored.iter().filter(|(_, g)| *g).count();

        let mut best = (Self::DEFAULT_THRESHOLD, 0.0, 0.0, 0.0);
        if gold_total > 0 {
            // Scanning scores high to low admits one more prediction per step
            let mut sorted = self.scored.clone();
            sorted.sort_by(|a, b| b.0.total_cmp(&a.0));

            let mut matched = 0usize;
            for (i, (score, gold)) in sorted.iter().enumerate() {
                if *gold {
                    matched += 1;
                }
                // Ties must be admitted together
                if sorted.get(i + 1).is_some_and(|next| next.0 == *score) {
                    continue;
                }
                let (p, r, f1) = precision_recall_f1(matched, i + 1, gold_total);
                if f1 > best.3 {
                    best = (*score as f64, p, r, f1);
                }
            }
        }

        if reset {
            self.scored.clear();
        }
        BTreeMap::from([
            ("span_threshold".to_string(), best.0),
            ("span_precision".to_string(), best.1),
            ("span_recall".to_string(), best.2),
            ("span_f1".to_string(), best.3),
        ])
    }
}

// ─── RelationMetrics ──────────────────────────────────────────────────────────
/// Binary relation decisions against gold candidate labels.
#[derive(Debug, Clone, Default)]
pub struct RelationMetrics {
    matched: usize,
    predicted: usize,
    gold: usize,
}

impl RelationMetrics {
    pub fn update(&mut self, predicted: &[bool], gold: &[bool]) {
        for (p, g) in predicted.iter().zip(gold) {
            self.predicted += usize::from(*p);
            self.gold += usize::from(*g);
            self.matched += usize::from(*p && *g);
        }
    }

    pub fn get_metric(&mut self, reset: bool) -> MetricMap {
        let (p, r, f1) = precision_recall_f1(self.matched, self.predicted, self.gold);
        if reset {
            *self = Self::default();
        }
        BTreeMap::from([
            ("relation_precision".to_string(), p),
            ("relation_recall".to_string(), r),
            ("relation_f1".to_string(), f1),
        ])
    }
}

// ─── PipelineMetrics ──────────────────────────────────────────────────────────
/// Every accumulator the joint pipeline updates, owned by the caller.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Generic mention detection (`Entity`).
    pub mention: MentionMetrics,
    /// Typed mention detection over the closed entity-type set.
    pub typed: MentionMetrics,
    pub entity: EntityMetrics,
    pub link: LinkMetrics,
    pub relation: RelationMetrics,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            mention: MentionMetrics::new(&[MENTION_LABEL]),
            typed: MentionMetrics::new(&ENTITY_TYPES),
            entity: EntityMetrics::default(),
            link: LinkMetrics::default(),
            relation: RelationMetrics::default(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix every metric name in `metrics`.
pub fn prefixed(prefix: &str, metrics: MetricMap) -> MetricMap {
    metrics.into_iter().map(|(k, v)| (format!("{prefix}{k}"), v)).collect()
}

/// Merge metric groups, failing on the first name reported twice.
pub fn merge_metrics(groups: Vec<MetricMap>) -> Result<MetricMap, MetricsError> {
    let mut all = MetricMap::new();
    for group in groups {
        for (name, value) in group {
            if all.contains_key(&name) {
                return Err(MetricsError::DuplicateMetric(name));
            }
            all.insert(name, value);
        }
    }
    Ok(all)
}

/// Keep allow-listed names as they are; hide the rest behind a `_` prefix.
/// Without an allow-list every metric is displayed.
pub fn apply_display(all: MetricMap, display: Option<&[String]>) -> MetricMap {
    let Some(display) = display else {
        return all;
    };
    all.into_iter()
        .map(|(k, v)| {
            if display.contains(&k) {
                (k, v)
            } else {
                (format!("_{k}"), v)
            }
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn labels(entries: &[(usize, usize, &str)]) -> BTreeMap<Span, String> {
        entries.iter().map(|(s, e, l)| (Span::new(*s, *e), l.to_string())).collect()
    }

    #[test]
    fn test_mention_metrics_counts() {
        let mut m = MentionMetrics::new(&ENTITY_TYPES);
        let pred = vec![labels(&[(0, 2, "Task"), (4, 5, "Method"), (7, 9, "Other")])];
        let gold = vec![labels(&[(0, 2, "Task"), (4, 5, "Material"), (10, 12, "Metric")])];
        m.update(&pred, &gold);

        let scores = m.get_metric(true);
        // 1 matched of 2 tracked predictions and 3 gold mentions
        assert!((scores["precision"] - 0.5).abs() < 1e-9);
        assert!((scores["recall"] - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.get_metric(false)["f1"], 0.0);
    }

    #[test]
    fn test_duplicate_metric_is_fatal() {
        let a = BTreeMap::from([("f1".to_string(), 0.5)]);
        let b = BTreeMap::from([("f1".to_string(), 0.7)]);
        assert_eq!(
            merge_metrics(vec![a, b]),
            Err(MetricsError::DuplicateMetric("f1".to_string()))
        );
    }

    #[test]
    fn test_display_allow_list() {
        let all = BTreeMap::from([("ner_f1".to_string(), 0.4), ("span_f1".to_string(), 0.2)]);
        let shown = apply_display(all.clone(), Some(&["ner_f1".to_string()]));
        assert!(shown.contains_key("ner_f1"));
        assert!(shown.contains_key("_span_f1"));
        assert_eq!(apply_display(all.clone(), None), all);
    }

    #[test]
    fn test_link_threshold_search() {
        let mut m = LinkMetrics::default();
        m.update(&[0.9, 0.8, 0.3, 0.1], &[true, true, false, false]);
        let scores = m.get_metric(true);
        assert!((scores["span_threshold"] - 0.8).abs() < 1e-6);
        assert_eq!(scores["span_f1"], 1.0);

        // Nothing recorded → default threshold, zero scores
        let empty = m.get_metric(false);
        assert_eq!(empty["span_threshold"], LinkMetrics::DEFAULT_THRESHOLD);
        assert_eq!(empty["span_f1"], 0.0);
    }

    #[test]
    fn test_relation_and_entity_metrics() {
        let mut r = RelationMetrics::default();
        r.update(&[true, true, false], &[true, false, true]);
        let scores = r.get_metric(false);
        assert_eq!(scores["relation_precision"], 0.5);
        assert_eq!(scores["relation_recall"], 0.5);

        let mut e = EntityMetrics::default();
        e.update(3, 4);
        assert_eq!(e.get_metric(true)["entity_accuracy"], 0.75);
        assert_eq!(e.get_metric(false)["entity_accuracy"], 0.0);
    }

    #[test]
    fn test_pipeline_metrics_reset() {
        let mut metrics = PipelineMetrics::new();
        metrics.entity.update(1, 1);
        metrics.reset();
        assert_eq!(metrics.entity.get_metric(false)["entity_accuracy"], 0.0);
    }
}
