// ============================================================
// Layer 4 — Interval Segmentation Engine
// ============================================================
// Turns a fine sentence segmentation into model-sized
// paragraphs, then nudges paragraph boundaries so that no
// protected entity span is cut in two.
//
// Merge policy (shared by the span and the length variants):
//   - a running chunk longer than max_len is flushed first
//   - a unit shorter than min_len joins the running chunk
//   - a unit of at least min_len is flushed together with it
//
// Example (min_len=100, max_len=400):
//   sections: [[0,50) [50,90)]  [[90,300)]
//   section 1: 50 + 40 tokens, both short → one chunk [0,90)
//   section 2: 210 tokens, long enough   → chunk [90,300)
//   result:    [0,90) [90,300)   (section break preserved)
//
// Every operation checks its postconditions and reports a
// broken invariant as SegmentationError::InvariantViolated.
// That is a bug, not a user error: callers propagate it.

use std::collections::VecDeque;

use crate::domain::span::Span;
use crate::error::SegmentationError;

type Result<T> = std::result::Result<T, SegmentationError>;

/// Merge sentences into paragraphs of roughly `[min_len, max_len]` tokens.
///
/// `sections` are hard boundaries: sentences from different sections never
/// share a paragraph. Any merged chunk longer than `max_len` is split again
/// sentence by sentence; a single sentence longer than `max_len` becomes a
/// paragraph of its own.
pub fn break_and_collapse_sections(
    sections: &[Vec<Span>],
    min_len: usize,
    max_len: usize,
) -> Result<Vec<Span>> {
    if min_len > max_len {
        return Err(SegmentationError::InvalidLimits { min_len, max_len });
    }

    let sections: Vec<&Vec<Span>> = sections.iter().filter(|s| !s.is_empty()).collect();
    if sections.is_empty() {
        return Ok(Vec::new());
    }

    // ── Pass 1: collapse short sentences inside each section ──────────────────
    let mut collapsed: Vec<Vec<Span>> = Vec::new();
    for section in &sections {
        let mut current: Vec<Span> = Vec::new();
        let mut current_len = 0usize;

        for sentence in section.iter() {
            if current_len > max_len {
                collapsed.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(*sentence);
            if sentence.len() < min_len {
                current_len += sentence.len();
            } else {
                collapsed.push(std::mem::take(&mut current));
                current_len = 0;
            }
        }

        if !current.is_empty() {
            collapsed.push(current);
        }
    }

    let input: Vec<Span> = sections.iter().flat_map(|s| s.iter().copied()).collect();
    let merged: Vec<Span> = collapsed.iter().flatten().copied().collect();
    if merged != input {
        return Err(SegmentationError::InvariantViolated(
            "collapsed paragraphs do not reproduce the sentence sequence".into(),
        ));
    }

    // ── Pass 2: re-split anything still over budget ───────────────────────────
    let mut broken: Vec<Vec<Span>> = Vec::new();
    for chunk in collapsed {
        let chunk_len: usize = chunk.iter().map(Span::len).sum();
        if chunk_len <= max_len {
            broken.push(chunk);
            continue;
        }

        let mut current: Vec<Span> = Vec::new();
        let mut current_len = 0usize;
        for sentence in chunk {
            if current_len + sentence.len() > max_len && !current.is_empty() {
                broken.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(sentence);
            current_len += sentence.len();
        }
        if !current.is_empty() {
            broken.push(current);
        }
    }

    let paragraphs: Vec<Span> = broken
        .iter()
        .filter_map(|chunk| Some(Span::new(chunk.first()?.start, chunk.last()?.end)))
        .collect();

    let first_ok = paragraphs.first().map(|p| p.start) == input.first().map(|s| s.start);
    let last_ok = paragraphs.last().map(|p| p.end) == input.last().map(|s| s.end);
    if !first_ok || !last_ok || paragraphs.len() != broken.len() {
        return Err(SegmentationError::InvariantViolated(
            "paragraph edges moved during re-splitting".into(),
        ));
    }

    tracing::debug!(
        "Collapsed {} sentences in {} sections into {} paragraphs",
        input.len(),
        sections.len(),
        paragraphs.len()
    );
    Ok(paragraphs)
}

/// The merge policy of `break_and_collapse_sections` on bare lengths.
///
/// There are no section boundaries here. The total is preserved exactly;
/// a zero-length remainder is not emitted.
pub fn collapse_paragraphs(lengths: &[usize], min_len: usize, max_len: usize) -> Result<Vec<usize>> {
    if min_len > max_len {
        return Err(SegmentationError::InvalidLimits { min_len, max_len });
    }

    let mut collapsed = Vec::new();
    let mut current = 0usize;
    for &len in lengths {
        if current > max_len {
            collapsed.push(current);
            current = 0;
        }
        if len < min_len {
            current += len;
        } else {
            collapsed.push(current + len);
            current = 0;
        }
    }
    if current > 0 {
        collapsed.push(current);
    }

    check_sum(lengths, &collapsed)?;
    Ok(collapsed)
}

/// Split every length above `max_len` into `max_len`-sized pieces plus a
/// non-zero remainder. Zero lengths are dropped.
pub fn break_paragraphs(lengths: &[usize], max_len: usize) -> Result<Vec<usize>> {
    if max_len == 0 {
        return Err(SegmentationError::InvalidLimits { min_len: 0, max_len });
    }

    let mut broken = Vec::with_capacity(lengths.len());
    for &len in lengths {
        if len == 0 {
            continue;
        }
        if len <= max_len {
            broken.push(len);
            continue;
        }
        broken.extend(std::iter::repeat(max_len).take(len / max_len));
        if len % max_len > 0 {
            broken.push(len % max_len);
        }
    }

    check_sum(lengths, &broken)?;
    Ok(broken)
}

/// Shift paragraph boundaries so that every protected span sits inside a
/// single paragraph.
///
/// Paragraphs are consumed front to back from a queue while a cursor walks
/// the protected spans in `(start, end)` order. A protected span that
/// starts inside the front paragraph but ends past it extends that
/// paragraph to the span's end (and to the end of any other protected span
/// starting before the new end). The paragraphs the extension reaches are
/// absorbed and whatever is left of the last one goes back on the queue.
///
/// Paragraphs must be contiguous. A protected span that is not inside the
/// overall paragraph range cannot be contained by any paragraph and is
/// rejected with `ProtectedSpanOutOfRange`.
pub fn move_boundaries(paragraphs: &[Span], protected: &[Span]) -> Result<Vec<Span>> {
    let mut protected: Vec<Span> = protected.iter().copied().filter(|s| !s.is_empty()).collect();
    protected.sort();

    let (Some(first), Some(last)) = (paragraphs.first(), paragraphs.last()) else {
        return match protected.first() {
            Some(span) => Err(SegmentationError::ProtectedSpanOutOfRange {
                span: *span,
                covered: Span::new(0, 0),
            }),
            None => Ok(Vec::new()),
        };
    };

    for pair in paragraphs.windows(2) {
        if pair[0].end != pair[1].start {
            return Err(SegmentationError::NotContiguous { left: pair[0], right: pair[1] });
        }
    }

    let covered = Span::new(first.start, last.end);
    if let Some(span) = protected.iter().find(|s| !covered.contains(s)) {
        return Err(SegmentationError::ProtectedSpanOutOfRange { span: *span, covered });
    }

    let mut queue: VecDeque<Span> = paragraphs.iter().copied().collect();
    let mut moved: Vec<Span> = Vec::with_capacity(paragraphs.len());
    let mut eix = 0usize;

    while let Some(paragraph) = queue.pop_front() {
        loop {
            let Some(entity) = protected.get(eix) else {
                moved.push(paragraph);
                break;
            };

            if paragraph.contains(entity) {
                eix += 1;
                continue;
            }

            if entity.start >= paragraph.end {
                moved.push(paragraph);
                break;
            }

            if entity.start < paragraph.start {
                return Err(SegmentationError::InvariantViolated(format!(
                    "protected span {entity} was passed before paragraph {paragraph}"
                )));
            }

            // Straddles the right edge: extend to cover it and anything
            // that starts before the new edge.
            let mut new_end = entity.end;
            eix += 1;
            while let Some(next) = protected.get(eix) {
                if next.start >= new_end {
                    break;
                }
                new_end = new_end.max(next.end);
                eix += 1;
            }

            let mut tail_end = paragraph.end;
            while tail_end < new_end {
                match queue.pop_front() {
                    Some(next) => tail_end = next.end,
                    None => {
                        return Err(SegmentationError::ProtectedSpanOutOfRange {
                            span: Span::new(entity.start, new_end),
                            covered,
                        })
                    }
                }
            }

            moved.push(Span::new(paragraph.start, new_end));
            if tail_end > new_end {
                queue.push_front(Span::new(new_end, tail_end));
            }
            break;
        }
    }

    check_moved(&moved, &covered, &protected)?;
    Ok(moved)
}

/// Percentage of padding if every group were padded to its own longest
/// member. Purely diagnostic.
pub fn get_wastage(groups: &[Vec<usize>]) -> f64 {
    let padded: usize = groups
        .iter()
        .map(|g| g.iter().copied().max().unwrap_or(0) * g.len())
        .sum();
    let total: usize = groups.iter().map(|g| g.iter().sum::<usize>()).sum();

    if padded == 0 {
        return 0.0;
    }
    (padded - total) as f64 / padded as f64 * 100.0
}

/// Contiguous spans starting at `offset` with the given lengths.
pub fn spans_from_lengths(lengths: &[usize], offset: usize) -> Vec<Span> {
    let mut start = offset;
    lengths
        .iter()
        .map(|&len| {
            let span = Span::new(start, start + len);
            start += len;
            span
        })
        .collect()
}

pub fn lengths_of(spans: &[Span]) -> Vec<usize> {
    spans.iter().map(Span::len).collect()
}

fn check_sum(before: &[usize], after: &[usize]) -> Result<()> {
    let (a, b) = (before.iter().sum::<usize>(), after.iter().sum::<usize>());
    if a != b {
        return Err(SegmentationError::InvariantViolated(format!(
            "token total changed from {a} to {b}"
        )));
    }
    Ok(())
}

fn check_moved(moved: &[Span], covered: &Span, protected: &[Span]) -> Result<()> {
    let first = moved.first().map(|p| p.start);
    let last = moved.last().map(|p| p.end);
    if first != Some(covered.start) || last != Some(covered.end) {
        return Err(SegmentationError::InvariantViolated(format!(
            "moved paragraphs no longer cover {covered}"
        )));
    }
    if let Some(pair) = moved.windows(2).find(|w| w[0].end != w[1].start) {
        return Err(SegmentationError::InvariantViolated(format!(
            "gap between {} and {}",
            pair[0], pair[1]
        )));
    }
    for entity in protected {
        if let Some(paragraph) = moved.iter().find(|p| p.straddles(entity)) {
            return Err(SegmentationError::InvariantViolated(format!(
                "protected span {entity} straddles paragraph {paragraph}"
            )));
        }
        let holders = moved.iter().filter(|p| p.contains(entity)).count();
        if holders != 1 {
            return Err(SegmentationError::InvariantViolated(format!(
                "protected span {entity} is contained in {holders} paragraphs"
            )));
        }
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn s(start: usize, end: usize) -> Span {
        Span::new(start, end)
    }

    #[test]
    fn test_section_break_is_preserved() {
        let sections = vec![vec![s(0, 50), s(50, 90)], vec![s(90, 300)]];
        let paragraphs = break_and_collapse_sections(&sections, 100, 400).unwrap();
        assert_eq!(paragraphs, vec![s(0, 90), s(90, 300)]);
    }

    #[test]
    fn test_long_sentence_stays_whole() {
        let sections = vec![vec![s(0, 10), s(10, 600), s(600, 620)]];
        let paragraphs = break_and_collapse_sections(&sections, 100, 400).unwrap();
        // [0,10) joins the long sentence, which then has to be split off again
        assert_eq!(paragraphs, vec![s(0, 10), s(10, 600), s(600, 620)]);
    }

    #[test]
    fn test_oversized_chunk_is_resplit() {
        // Many short sentences accumulate past max_len before a flush
        let section: Vec<Span> = (0..12).map(|i| s(i * 40, (i + 1) * 40)).collect();
        let paragraphs = break_and_collapse_sections(&[section], 100, 200).unwrap();
        assert!(paragraphs.iter().all(|p| p.len() <= 200));
        assert_eq!(paragraphs.first().unwrap().start, 0);
        assert_eq!(paragraphs.last().unwrap().end, 480);
    }

    #[test]
    fn test_invalid_limits() {
        let err = break_and_collapse_sections(&[vec![s(0, 5)]], 10, 5).unwrap_err();
        assert_eq!(err, SegmentationError::InvalidLimits { min_len: 10, max_len: 5 });
        assert!(break_paragraphs(&[5], 0).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(break_and_collapse_sections(&[], 100, 400).unwrap().is_empty());
        assert!(break_and_collapse_sections(&[vec![]], 100, 400).unwrap().is_empty());
        assert!(collapse_paragraphs(&[], 100, 400).unwrap().is_empty());
        assert!(break_paragraphs(&[], 400).unwrap().is_empty());
        assert!(move_boundaries(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_collapse_paragraphs() {
        assert_eq!(collapse_paragraphs(&[30, 40, 150, 20], 100, 400).unwrap(), vec![220, 20]);
    }

    #[test]
    fn test_break_paragraphs() {
        assert_eq!(break_paragraphs(&[900, 100, 800], 400).unwrap(), vec![400, 400, 100, 100, 400, 400]);
    }

    #[test]
    fn test_move_boundaries_extends_over_entity() {
        let paragraphs = vec![s(0, 10), s(10, 20), s(20, 30)];
        let protected = vec![s(2, 4), s(8, 12)];
        let moved = move_boundaries(&paragraphs, &protected).unwrap();
        assert_eq!(moved, vec![s(0, 12), s(12, 20), s(20, 30)]);
    }

    #[test]
    fn test_move_boundaries_chained_overlaps() {
        let paragraphs = vec![s(0, 10), s(10, 20), s(20, 30)];
        // The second span starts inside the first and ends beyond the next boundary
        let protected = vec![s(5, 15), s(8, 25)];
        let moved = move_boundaries(&paragraphs, &protected).unwrap();
        assert_eq!(moved, vec![s(0, 25), s(25, 30)]);
    }

    #[test]
    fn test_move_boundaries_exact_absorb() {
        let paragraphs = vec![s(0, 10), s(10, 20), s(20, 30)];
        let moved = move_boundaries(&paragraphs, &[s(9, 20)]).unwrap();
        assert_eq!(moved, vec![s(0, 20), s(20, 30)]);
    }

    #[test]
    fn test_move_boundaries_rejects_uncontainable() {
        let paragraphs = vec![s(0, 10), s(10, 20)];
        let err = move_boundaries(&paragraphs, &[s(15, 25)]).unwrap_err();
        assert!(matches!(err, SegmentationError::ProtectedSpanOutOfRange { .. }));
    }

    #[test]
    fn test_move_boundaries_rejects_gaps() {
        let err = move_boundaries(&[s(0, 10), s(11, 20)], &[]).unwrap_err();
        assert!(matches!(err, SegmentationError::NotContiguous { .. }));
    }

    #[test]
    fn test_wastage() {
        // [10, 5] pads to 20 → 5 wasted; [8] pads to 8 → 0 wasted
        let waste = get_wastage(&[vec![10, 5], vec![8]]);
        assert!((waste - 5.0 / 28.0 * 100.0).abs() < 1e-9);
        assert_eq!(get_wastage(&[]), 0.0);
    }

    #[test]
    fn test_spans_from_lengths() {
        assert_eq!(spans_from_lengths(&[3, 0, 2], 10), vec![s(10, 13), s(13, 13), s(13, 15)]);
        assert_eq!(lengths_of(&[s(1, 4), s(4, 9)]), vec![3, 5]);
    }

    // ── Properties ────────────────────────────────────────────────────────────

    fn sections_strategy() -> impl Strategy<Value = Vec<Vec<Span>>> {
        prop::collection::vec(prop::collection::vec(1usize..120, 1..8), 1..6).prop_map(|lens| {
            let mut start = 0;
            lens.into_iter()
                .map(|section| {
                    section
                        .into_iter()
                        .map(|len| {
                            let span = Span::new(start, start + len);
                            start += len;
                            span
                        })
                        .collect()
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_sections_cover_input(
            sections in sections_strategy(),
            min_len in 0usize..200,
            extra in 0usize..300,
        ) {
            let max_len = min_len + extra;
            let paragraphs = break_and_collapse_sections(&sections, min_len, max_len).unwrap();
            let flat: Vec<Span> = sections.iter().flatten().copied().collect();

            prop_assert_eq!(paragraphs.first().unwrap().start, flat.first().unwrap().start);
            prop_assert_eq!(paragraphs.last().unwrap().end, flat.last().unwrap().end);
            for pair in paragraphs.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            // Every sentence lies in exactly one paragraph
            for sentence in &flat {
                prop_assert_eq!(paragraphs.iter().filter(|p| p.contains(sentence)).count(), 1);
            }
            // No paragraph crosses a section boundary
            for section in &sections {
                let bound = Span::new(section[0].start, section[section.len() - 1].end);
                prop_assert!(paragraphs.iter().all(|p| !bound.straddles(p)));
            }
        }

        #[test]
        fn prop_length_ops_preserve_sum(
            lengths in prop::collection::vec(0usize..1500, 0..30),
            min_len in 0usize..200,
            extra in 1usize..400,
        ) {
            let max_len = min_len + extra;
            let total: usize = lengths.iter().sum();
            prop_assert_eq!(collapse_paragraphs(&lengths, min_len, max_len).unwrap().iter().sum::<usize>(), total);

            let broken = break_paragraphs(&lengths, max_len).unwrap();
            prop_assert_eq!(broken.iter().sum::<usize>(), total);
            prop_assert!(broken.iter().all(|&l| l > 0 && l <= max_len));
        }

        #[test]
        fn prop_moved_boundaries_contain_entities(
            lengths in prop::collection::vec(1usize..40, 1..12),
            raw in prop::collection::vec((0usize..1000, 1usize..30), 0..15),
        ) {
            let paragraphs = spans_from_lengths(&lengths, 0);
            let total: usize = lengths.iter().sum();
            let protected: Vec<Span> = raw
                .into_iter()
                .map(|(start, len)| {
                    let start = start % total;
                    Span::new(start, (start + len).min(total))
                })
                .filter(|e| !e.is_empty())
                .collect();

            let moved = move_boundaries(&paragraphs, &protected).unwrap();
            prop_assert_eq!(moved.first().unwrap().start, 0);
            prop_assert_eq!(moved.last().unwrap().end, total);
            for e in &protected {
                prop_assert!(moved.iter().all(|p| !p.straddles(e)));
                prop_assert_eq!(moved.iter().filter(|p| p.contains(e)).count(), 1);
            }
        }
    }
}
