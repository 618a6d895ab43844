// ============================================================
// Layer 3 — Mention Dictionaries
// ============================================================
// Every decode stage reports, per sentence, a mapping from a
// document-absolute mention span to the labels assigned to it:
//
//   { [12, 15) => ["Entity", "Task"], ... }
//
// Position 0 is the tagger's label, position 1 the entity type
// appended by the entity classifier (predictions) or read from
// the document (gold). The append step is the only place two
// stages meet, so it refuses to run on misaligned inputs.

use std::collections::BTreeMap;

use crate::domain::span::Span;
use crate::error::PipelineError;

/// Per-sentence mapping from mention span to its label list.
pub type MentionDict = BTreeMap<Span, Vec<String>>;

/// Append one label per mention from `sources` onto `targets`.
///
/// `targets[i]` and `sources[i]` describe the same sentence. Both
/// sequences must have the same length, each pair must have the same
/// number of keys, and every target key must be present in the source.
/// Any mismatch means the upstream and downstream spans have
/// desynchronised and is returned as `AlignmentMismatch`.
pub fn append_aligned_labels(
    targets: &mut [MentionDict],
    sources: &[BTreeMap<Span, String>],
) -> Result<(), PipelineError> {
    if targets.len() != sources.len() {
        return Err(PipelineError::alignment(format!(
            "{} mention dicts but {} label dicts",
            targets.len(),
            sources.len()
        )));
    }

    // Validate everything before mutating so a failure leaves targets intact
    for (i, (target, source)) in targets.iter().zip(sources).enumerate() {
        if target.len() != source.len() {
            return Err(PipelineError::alignment(format!(
                "sentence {i}: {} mentions but {} labels",
                target.len(),
                source.len()
            )));
        }
        if let Some(missing) = target.keys().find(|k| !source.contains_key(*k)) {
            return Err(PipelineError::alignment(format!(
                "sentence {i}: no label for mention {missing}"
            )));
        }
    }

    for (target, source) in targets.iter_mut().zip(sources) {
        for (span, labels) in target.iter_mut() {
            labels.push(source[span].clone());
        }
    }
    Ok(())
}

/// Project every dict onto the label at position `n`.
///
/// Mentions whose label list is shorter than `n + 1` are left out.
pub fn nth_labels(dicts: &[MentionDict], n: usize) -> Vec<BTreeMap<Span, String>> {
    dicts
        .iter()
        .map(|d| {
            d.iter()
                .filter_map(|(span, labels)| labels.get(n).map(|l| (*span, l.clone())))
                .collect()
        })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: &[(Span, &[&str])]) -> MentionDict {
        entries
            .iter()
            .map(|(s, ls)| (*s, ls.iter().map(|l| l.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_append_matching_keys() {
        let e1 = Span::new(0, 2);
        let mut targets = vec![dict(&[(e1, &["Task"])])];
        let sources = vec![BTreeMap::from([(e1, "Task".to_string())])];

        append_aligned_labels(&mut targets, &sources).unwrap();
        assert_eq!(targets[0][&e1], vec!["Task", "Task"]);
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let e1 = Span::new(0, 2);
        let mut targets = vec![dict(&[(e1, &["Task"])])];
        let sources = vec![BTreeMap::from([(Span::new(5, 6), "Task".to_string())])];

        let err = append_aligned_labels(&mut targets, &sources).unwrap_err();
        assert!(matches!(err, PipelineError::AlignmentMismatch(_)));
        // Nothing was appended
        assert_eq!(targets[0][&e1], vec!["Task"]);
    }

    #[test]
    fn test_length_mismatch_is_fatal() {
        let mut targets = vec![MentionDict::new(), MentionDict::new()];
        let sources = vec![BTreeMap::new()];
        assert!(append_aligned_labels(&mut targets, &sources).is_err());

        let e1 = Span::new(0, 2);
        let mut targets = vec![MentionDict::new()];
        let sources = vec![BTreeMap::from([(e1, "Task".to_string())])];
        assert!(append_aligned_labels(&mut targets, &sources).is_err());
    }

    #[test]
    fn test_nth_labels_skips_short_lists() {
        let a = Span::new(0, 1);
        let b = Span::new(3, 4);
        let dicts = vec![dict(&[(a, &["Entity", "Method"]), (b, &["Entity"])])];

        let second = nth_labels(&dicts, 1);
        assert_eq!(second[0].len(), 1);
        assert_eq!(second[0][&a], "Method");
        assert_eq!(nth_labels(&dicts, 0)[0].len(), 2);
    }
}
