//! Hybrid passage retriever: semantic + lexical ranking with
//! domain-specific re-ranking rules.
//!
//! # Scoring Algorithm
//!
//! 1. Empty store → empty result, without calling the embedding provider.
//! 2. Restrict candidates to `sequence <= max_sequence` when a boundary
//!    is given.
//! 3. Embed the query (one provider call).
//! 4. Tokenize the query: split on non-alphanumeric boundaries
//!    (Unicode-aware, so Cyrillic words survive), keep tokens longer
//!    than 2 characters, case-folded.
//! 5. BM25 (k1 = 1.5, b = 0.75) over each candidate's title + quote.
//!    Document frequency and average length are computed over the
//!    restricted candidate set, so lexical scores are boundary-aware and
//!    recomputed per query.
//! 6. Min-max normalize BM25 to `[0, 1]` (equal scores normalize to the
//!    raw value with range treated as 1).
//! 7. Keyword-overlap ratio: fraction of distinct query tokens appearing
//!    as substrings of title + quote.
//! 8. Cosine similarity against the stored embedding (0 for zero
//!    vectors).
//! 9. `score = 0.6·cosine + 0.3·bm25 + 0.1·keyword`.
//! 10. Apply [`RankingRules`]: strong-term and focus-entity filters with
//!     fallbacks, plus a title bonus for the focus entity.
//! 11. Sort descending, take `max(1, top_k)`.
//!
//! Ranking is fully deterministic for a fixed store, query, and provider.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::providers::{cosine_similarity, EmbeddingProvider};
use crate::store::{IndexStore, IndexedPassage};

const WEIGHT_COSINE: f64 = 0.6;
const WEIGHT_BM25: f64 = 0.3;
const WEIGHT_KEYWORD: f64 = 0.1;

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

/// A reference to an indexed passage, attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(rename = "file")]
    pub source_file: String,
    pub anchor: String,
    #[serde(rename = "title")]
    pub section_title: String,
    #[serde(default)]
    pub quote: String,
}

/// A ranked retrieval hit with its score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCitation {
    #[serde(rename = "file")]
    pub source_file: String,
    pub anchor: String,
    #[serde(rename = "title")]
    pub section_title: String,
    pub quote: String,
    /// Combined hybrid score.
    pub score: f64,
    /// Fraction of distinct query tokens found in title + quote.
    pub keyword_ratio: f64,
    /// Cosine similarity of query and passage embeddings.
    pub cosine: f64,
    /// Min-max normalized BM25 score.
    pub bm25: f64,
}

impl From<&ScoredCitation> for Citation {
    fn from(hit: &ScoredCitation) -> Self {
        Citation {
            source_file: hit.source_file.clone(),
            anchor: hit.anchor.clone(),
            section_title: hit.section_title.clone(),
            quote: hit.quote.clone(),
        }
    }
}

/// Book-specific re-ranking vocabulary.
///
/// `strong_terms` are named entities or concepts central to the book;
/// when a query token matches one exactly, candidates with zero keyword
/// overlap are dropped (if any keyword-positive candidate exists).
/// `focus` handles one recurring entity with its own hard filter.
#[derive(Debug, Clone, Default)]
pub struct RankingRules {
    pub strong_terms: Vec<String>,
    pub focus: Option<FocusEntity>,
}

/// Hard-filter rule for one recurring named entity.
#[derive(Debug, Clone)]
pub struct FocusEntity {
    /// Stems matched against query tokens (substring match).
    pub query_stems: Vec<String>,
    /// Stems matched against candidate title + quote (substring match);
    /// usually includes spelling variants.
    pub doc_stems: Vec<String>,
    /// Added to the combined score when a doc stem appears in the title.
    pub title_bonus: f64,
}

impl RankingRules {
    /// Rules for Plato's Symposium (Russian edition): Pausanias gets the
    /// dedicated focus rule, since questions about his speech kept
    /// drifting to other speakers' passages.
    pub fn symposium() -> Self {
        Self {
            strong_terms: ["павсаний", "паусаний", "эрот", "эроты", "число"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            focus: Some(FocusEntity {
                query_stems: vec!["павсан".to_string()],
                doc_stems: vec!["павсан".to_string(), "паусан".to_string()],
                title_bonus: 0.15,
            }),
        }
    }
}

/// Tokenize for lexical scoring: split on anything that is not a Unicode
/// alphanumeric or underscore, drop tokens of 2 characters or fewer,
/// lowercase the rest.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_string())
        .collect()
}

fn distinct(tokens: &[String]) -> Vec<&String> {
    let mut seen = HashSet::new();
    tokens.iter().filter(|t| seen.insert(t.as_str())).collect()
}

fn haystack(item: &IndexedPassage) -> String {
    format!("{} {}", item.section_title, item.quote).to_lowercase()
}

/// Rank the indexed passages against a query and return the top hits.
///
/// `max_sequence` restricts the candidate corpus to passages at or
/// before the reading boundary; lexical corpus statistics are computed
/// over the restricted set only.
pub async fn retrieve_top(
    query: &str,
    store: &IndexStore,
    provider: &dyn EmbeddingProvider,
    rules: &RankingRules,
    top_k: usize,
    max_sequence: Option<u64>,
) -> Result<Vec<ScoredCitation>> {
    if store.is_empty() {
        return Ok(Vec::new());
    }

    let corpus: Vec<&IndexedPassage> = store
        .all()
        .iter()
        .filter(|it| max_sequence.map_or(true, |m| it.sequence <= m))
        .collect();
    if corpus.is_empty() {
        return Ok(Vec::new());
    }

    let query_texts = [query.to_string()];
    let query_embedding = provider
        .embed(&query_texts)
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    let q_tokens = tokenize(query);
    let q_distinct = distinct(&q_tokens);

    // BM25 statistics over the restricted candidate set.
    let doc_tokens: Vec<Vec<String>> = corpus.iter().map(|it| tokenize(&haystack(it))).collect();
    let n_docs = doc_tokens.len().max(1) as f64;
    let mut df: HashMap<&str, usize> = HashMap::new();
    for toks in &doc_tokens {
        let mut seen = HashSet::new();
        for t in toks {
            if seen.insert(t.as_str()) {
                *df.entry(t.as_str()).or_insert(0) += 1;
            }
        }
    }
    let avgdl = {
        let total: usize = doc_tokens.iter().map(|t| t.len()).sum();
        let avg = total as f64 / n_docs;
        if avg == 0.0 {
            1.0
        } else {
            avg
        }
    };

    let bm25_raw: Vec<f64> = doc_tokens
        .iter()
        .map(|toks| bm25_score(&q_distinct, toks, &df, n_docs, avgdl))
        .collect();
    let bm25_norm = normalize_scores(&bm25_raw);

    struct RawHit<'a> {
        item: &'a IndexedPassage,
        score: f64,
        keyword_ratio: f64,
        cosine: f64,
        bm25: f64,
    }

    let mut raw: Vec<RawHit> = corpus
        .iter()
        .enumerate()
        .map(|(idx, it)| {
            let cosine = cosine_similarity(&query_embedding, &it.embedding) as f64;
            let keyword_ratio = keyword_overlap(&q_distinct, &haystack(it));
            let bm25 = bm25_norm[idx];
            RawHit {
                item: it,
                score: WEIGHT_COSINE * cosine + WEIGHT_BM25 * bm25 + WEIGHT_KEYWORD * keyword_ratio,
                keyword_ratio,
                cosine,
                bm25,
            }
        })
        .collect();

    // Domain-specific re-ranking rules.
    let focus_rule = rules.focus.as_ref().filter(|f| {
        q_tokens
            .iter()
            .any(|t| f.query_stems.iter().any(|stem| t.contains(stem.as_str())))
    });
    let strong = q_tokens
        .iter()
        .any(|t| rules.strong_terms.iter().any(|s| s == t));

    if let Some(focus) = focus_rule {
        let mentions_focus = |it: &IndexedPassage| {
            let hay = haystack(it);
            focus.doc_stems.iter().any(|stem| hay.contains(stem.as_str()))
        };

        // Hard filter; fall back to keyword-positive candidates, then to
        // the unfiltered pool, whenever a filter empties it.
        let filtered: Vec<usize> = raw
            .iter()
            .enumerate()
            .filter(|(_, h)| mentions_focus(h.item))
            .map(|(i, _)| i)
            .collect();
        let keep: Vec<usize> = if !filtered.is_empty() {
            filtered
        } else {
            let kw_positive: Vec<usize> = raw
                .iter()
                .enumerate()
                .filter(|(_, h)| h.keyword_ratio > 0.0)
                .map(|(i, _)| i)
                .collect();
            if kw_positive.is_empty() {
                (0..raw.len()).collect()
            } else {
                kw_positive
            }
        };
        let keep: HashSet<usize> = keep.into_iter().collect();
        let mut kept: Vec<RawHit> = Vec::new();
        for (i, mut hit) in raw.into_iter().enumerate() {
            if keep.contains(&i) {
                if focus
                    .doc_stems
                    .iter()
                    .any(|stem| hit.item.section_title.to_lowercase().contains(stem.as_str()))
                {
                    hit.score += focus.title_bonus;
                }
                kept.push(hit);
            }
        }
        raw = kept;
    } else if strong {
        let kw_positive: Vec<bool> = raw.iter().map(|h| h.keyword_ratio > 0.0).collect();
        if kw_positive.iter().any(|&b| b) {
            raw = raw
                .into_iter()
                .zip(kw_positive)
                .filter(|(_, positive)| *positive)
                .map(|(h, _)| h)
                .collect();
        }
    }

    raw.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    raw.truncate(top_k.max(1));

    Ok(raw
        .into_iter()
        .map(|h| ScoredCitation {
            source_file: h.item.source_file.clone(),
            anchor: h.item.anchor.clone(),
            section_title: h.item.section_title.clone(),
            quote: h.item.quote.clone(),
            score: h.score,
            keyword_ratio: h.keyword_ratio,
            cosine: h.cosine,
            bm25: h.bm25,
        })
        .collect())
}

/// BM25 score of one document against the distinct query tokens, using
/// corpus statistics computed over the restricted candidate set.
fn bm25_score(
    q_distinct: &[&String],
    doc: &[String],
    df: &HashMap<&str, usize>,
    n_docs: f64,
    avgdl: f64,
) -> f64 {
    if q_distinct.is_empty() || doc.is_empty() {
        return 0.0;
    }
    let mut tf: HashMap<&str, f64> = HashMap::new();
    for t in doc {
        *tf.entry(t.as_str()).or_insert(0.0) += 1.0;
    }
    let dl = doc.len() as f64;

    let mut score = 0.0;
    for q in q_distinct {
        let n = df.get(q.as_str()).copied().unwrap_or(0) as f64;
        if n == 0.0 {
            continue;
        }
        let idf = ((n_docs - n + 0.5) / (n + 0.5)).ln().max(0.0);
        let f = tf.get(q.as_str()).copied().unwrap_or(0.0);
        let denom = f + BM25_K1 * (1.0 - BM25_B + BM25_B * (dl / avgdl));
        let denom = if denom == 0.0 { 1.0 } else { denom };
        score += idf * (f * (BM25_K1 + 1.0)) / denom;
    }
    score
}

/// Min-max normalize raw scores to `[0, 1]`. When all scores are equal
/// the range is treated as 1 so no division by zero occurs.
fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = if (max - min).abs() < f64::EPSILON {
        1.0
    } else {
        max - min
    };
    raw.iter().map(|s| (s - min) / range).collect()
}

/// Fraction of distinct query tokens that appear as substrings of the
/// candidate's lowercased title + quote.
fn keyword_overlap(q_distinct: &[&String], hay: &str) -> f64 {
    if q_distinct.is_empty() {
        return 0.0;
    }
    let hits = q_distinct.iter().filter(|t| hay.contains(t.as_str())).count();
    hits as f64 / q_distinct.len() as f64
}
