// ============================================================
// Layer 3 — Span Domain Type
// ============================================================
// A half-open token interval [start, end) over a document's
// token stream. Sentences, sections, paragraphs, mentions and
// protected entity spans are all Spans.
//
// On disk a Span is a two-element JSON array `[start, end]`,
// matching the SciREX document format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open token interval `[start, end)`.
///
/// Ordering is lexicographic on `(start, end)`, which is the order
/// protected spans are processed in by the segmentation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of tokens covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Span) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// True when `other` crosses one of `self`'s edges.
    pub fn straddles(&self, other: &Span) -> bool {
        let overlaps = other.start < self.end && other.end > self.start;
        overlaps && !self.contains(other)
    }

    /// The same interval moved right by `offset` tokens.
    pub fn shift(&self, offset: usize) -> Span {
        Span::new(self.start + offset, self.end + offset)
    }

    /// Midpoint of the interval, used for document-position features.
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) as f64 / 2.0
    }
}

impl From<(usize, usize)> for Span {
    fn from((start, end): (usize, usize)) -> Self {
        Span::new(start, end)
    }
}

impl From<Span> for (usize, usize) {
    fn from(s: Span) -> Self {
        (s.start, s.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_straddles() {
        let p = Span::new(10, 20);
        assert!(p.contains(&Span::new(10, 20)));
        assert!(p.contains(&Span::new(12, 15)));
        assert!(!p.contains(&Span::new(18, 22)));
        assert!(p.straddles(&Span::new(18, 22)));
        assert!(p.straddles(&Span::new(5, 11)));
        // Touching at the boundary is not straddling
        assert!(!p.straddles(&Span::new(20, 25)));
        assert!(!p.straddles(&Span::new(0, 10)));
    }

    #[test]
    fn test_serde_as_pair() {
        let s: Span = serde_json::from_str("[3, 7]").unwrap();
        assert_eq!(s, Span::new(3, 7));
        assert_eq!(serde_json::to_string(&s).unwrap(), "[3,7]");
    }

    #[test]
    fn test_len_and_midpoint() {
        let s = Span::new(4, 10);
        assert_eq!(s.len(), 6);
        assert_eq!(s.midpoint(), 7.0);
        assert_eq!(s.shift(100), Span::new(104, 110));
    }
}
