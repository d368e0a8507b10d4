//! Confidence gate over retrieval hits.
//!
//! A hit is confident when it has either meaningful lexical overlap with
//! the question or a high enough semantic similarity. Hits that clear
//! neither bar are dropped before answering, so the assistant refuses
//! instead of citing passages it only weakly matched.

use crate::retriever::ScoredCitation;

/// Minimum keyword-overlap ratio for a hit to count as confident.
pub const MIN_KEYWORD_RATIO: f64 = 0.15;
/// Minimum cosine similarity for a hit to count as confident.
pub const MIN_COSINE: f64 = 0.20;

/// Whether a single hit clears the confidence bar.
pub fn is_confident(hit: &ScoredCitation) -> bool {
    hit.keyword_ratio >= MIN_KEYWORD_RATIO || hit.cosine >= MIN_COSINE
}

/// Keep only confident hits, preserving their relative order.
pub fn filter_confident(hits: Vec<ScoredCitation>) -> Vec<ScoredCitation> {
    hits.into_iter().filter(is_confident).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(keyword_ratio: f64, cosine: f64) -> ScoredCitation {
        ScoredCitation {
            source_file: "book.md".to_string(),
            anchor: "0000000000".to_string(),
            section_title: "Глава".to_string(),
            quote: "цитата".to_string(),
            score: 0.5,
            keyword_ratio,
            cosine,
            bm25: 0.0,
        }
    }

    #[test]
    fn test_keyword_ratio_alone_passes() {
        assert!(is_confident(&hit(0.15, 0.0)));
        assert!(is_confident(&hit(0.5, 0.0)));
    }

    #[test]
    fn test_cosine_alone_passes() {
        assert!(is_confident(&hit(0.0, 0.20)));
        assert!(is_confident(&hit(0.0, 0.9)));
    }

    #[test]
    fn test_below_both_thresholds_fails() {
        assert!(!is_confident(&hit(0.14, 0.19)));
        assert!(!is_confident(&hit(0.0, 0.0)));
    }

    #[test]
    fn test_filter_preserves_order() {
        let hits = vec![hit(0.5, 0.0), hit(0.0, 0.0), hit(0.0, 0.5)];
        let kept = filter_confident(hits);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].keyword_ratio - 0.5).abs() < 1e-9);
        assert!((kept[1].cosine - 0.5).abs() < 1e-9);
    }
}
