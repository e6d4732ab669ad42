//! Keyword heuristics over citizen reports and field text.
//!
//! Per-document classifiers (language, sentiment, failure category) are cheap
//! keyword scans. Corpus-level aggregation covers TF-IDF topic clustering and
//! keyword surges between two periods.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TextConfig;
use crate::error::{EngineError, Result};

/// Tamil Unicode block. Any character in it marks a document as Tamil.
pub const TAMIL_RANGE: (char, char) = ('\u{0B80}', '\u{0BFF}');
pub const TAMIL: &str = "ta";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const OTHER_CATEGORY: &str = "other";

const MIN_DOC_FREQ: usize = 2;
const MAX_DOC_FREQ_RATIO: f64 = 0.5;
const MAX_FEATURES: usize = 1000;
const TOP_TERMS: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me",
    "more", "most", "my", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "out", "over", "own", "same", "she", "should", "so", "some",
    "such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "you", "your", "yours",
];

// ── Lexicon ───────────────────────────────────────────────────

/// A failure category and the keywords that select it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCategory {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Keyword lists driving sentiment and failure categorization.
///
/// `categories` is ordered: the first category with a matching keyword wins,
/// so overlapping keywords are resolved by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lexicon {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub categories: Vec<FailureCategory>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for Lexicon {
    fn default() -> Self {
        let category = |name: &str, keywords: &[&str]| FailureCategory {
            name: name.to_string(),
            keywords: words(keywords),
        };

        Self {
            positive: words(&["good", "great", "fast", "thanks", "resolved", "நன்று", "நன்றி", "விரைவு"]),
            negative: words(&["bad", "worst", "slow", "angry", "fail", "மோசம்", "கோபம்", "தோல்வி"]),
            categories: vec![
                category("delay", &["late", "wait", "delay", "pending", "slow", "தாமதம்", "காத்திரு", "மெதுவாக"]),
                category("denial", &["reject", "deny", "denied", "refuse", "no", "மறுப்பு", "நிராகரி"]),
                category("quality", &["broken", "bad", "poor", "damage", "leak", "மோசமான", "உடைந்தது", "கசிவு"]),
                category("access", &["road", "closed", "remote", "reach", "way", "access", "வழி", "சாலை", "தூரம்"]),
                category("awareness", &["know", "info", "information", "aware", "details", "தகவல்", "தெரியாது"]),
                category("corruption", &["bribe", "money", "pay", "cash", "commission", "ஊழல்", "லஞ்சம்", "பணம்"]),
            ],
        }
    }
}

impl Lexicon {
    /// Loads a lexicon from JSON, lower-casing every keyword.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read lexicon {}: {e}", path.display())))?;
        let lexicon: Lexicon = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("invalid lexicon {}: {e}", path.display())))?;
        Ok(lexicon.normalized())
    }

    fn normalized(self) -> Self {
        let lower = |list: Vec<String>| -> Vec<String> { list.into_iter().map(|w| w.to_lowercase()).collect() };
        Self {
            positive: lower(self.positive),
            negative: lower(self.negative),
            categories: self
                .categories
                .into_iter()
                .map(|c| FailureCategory {
                    name: c.name,
                    keywords: lower(c.keywords),
                })
                .collect(),
        }
    }
}

// ── Per-document classification ───────────────────────────────

/// Coarse script check, not language identification: any Tamil code point
/// yields `"ta"`, everything else (including empty text) is `"en"`.
pub fn detect_language(text: &str) -> &'static str {
    let (lo, hi) = TAMIL_RANGE;
    if text.chars().any(|c| (lo..=hi).contains(&c)) {
        TAMIL
    } else {
        DEFAULT_LANGUAGE
    }
}

/// Keyword polarity in [-1, 1]. Each listed keyword present in the text
/// counts once. Exactly 0.0 when nothing matched.
pub fn sentiment(text: &str, lexicon: &Lexicon) -> f64 {
    let lower = text.to_lowercase();
    let hits = |list: &[String]| list.iter().filter(|w| lower.contains(w.as_str())).count();

    let pos = hits(&lexicon.positive);
    let neg = hits(&lexicon.negative);
    let total = pos + neg;
    if total == 0 {
        return 0.0;
    }
    (pos as f64 - neg as f64) / total as f64
}

/// First category, in lexicon order, whose keywords occur in the text.
pub fn categorize<'a>(text: &str, lexicon: &'a Lexicon) -> &'a str {
    let lower = text.to_lowercase();
    lexicon
        .categories
        .iter()
        .find(|c| c.keywords.iter().any(|k| lower.contains(k.as_str())))
        .map(|c| c.name.as_str())
        .unwrap_or(OTHER_CATEGORY)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentClassification {
    pub language: String,
    pub sentiment: f64,
    pub failure_category: String,
}

pub fn classify(text: &str, lexicon: &Lexicon) -> DocumentClassification {
    DocumentClassification {
        language: detect_language(text).to_string(),
        sentiment: sentiment(text, lexicon),
        failure_category: categorize(text, lexicon).to_string(),
    }
}

// ── Topic clustering ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicCluster {
    pub cluster_id: usize,
    pub top_terms: Vec<String>,
    pub count: usize,
}

/// Groups documents into `k` topics via TF-IDF and k-means.
///
/// Returns nothing when the corpus is smaller than `k`. When the corpus is
/// too sparse to vectorize or the time budget runs out, returns one
/// placeholder cluster covering every document.
pub fn cluster_topics(texts: &[String], k: usize, config: &TextConfig) -> Vec<TopicCluster> {
    if k == 0 || texts.len() < k {
        return Vec::new();
    }

    let deadline = Instant::now() + Duration::from_millis(config.cluster_budget_ms);
    match try_cluster(texts, k, config.cluster_max_iterations, deadline) {
        Some(clusters) => clusters,
        None => {
            debug!(documents = texts.len(), k, "topic clustering fell back to placeholder");
            vec![TopicCluster {
                cluster_id: 0,
                top_terms: vec!["insufficient".to_string(), "data".to_string()],
                count: texts.len(),
            }]
        }
    }
}

fn try_cluster(
    texts: &[String],
    k: usize,
    max_iterations: usize,
    deadline: Instant,
) -> Option<Vec<TopicCluster>> {
    let (vocabulary, rows) = tfidf(texts)?;
    let (centroids, assignments) = kmeans(&rows, k, max_iterations, deadline)?;

    let clusters = centroids
        .iter()
        .enumerate()
        .map(|(cluster_id, centroid)| {
            let mut ranked: Vec<(usize, f64)> = centroid
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, w)| *w > 0.0)
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            TopicCluster {
                cluster_id,
                top_terms: ranked
                    .iter()
                    .take(TOP_TERMS)
                    .map(|(i, _)| vocabulary[*i].clone())
                    .collect(),
                count: assignments.iter().filter(|&&a| a == cluster_id).count(),
            }
        })
        .collect();

    Some(clusters)
}

fn tfidf_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Vocabulary (sorted) and L2-normalized TF-IDF rows, or `None` when no term
/// survives the document-frequency filters.
fn tfidf(texts: &[String]) -> Option<(Vec<String>, Vec<Vec<f64>>)> {
    let n = texts.len();
    let docs: Vec<Vec<String>> = texts.iter().map(|t| tfidf_tokens(t)).collect();

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    let mut term_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
        for term in &seen {
            *term_freq.entry(*term).or_insert(0) += 1;
        }
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }

    let max_doc_count = MAX_DOC_FREQ_RATIO * n as f64;
    let mut kept: Vec<(&str, usize)> = doc_freq
        .iter()
        .filter(|&(_, &df)| df >= MIN_DOC_FREQ && df as f64 <= max_doc_count)
        .map(|(term, _)| (*term, term_freq[term]))
        .collect();
    if kept.is_empty() {
        return None;
    }

    kept.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    kept.truncate(MAX_FEATURES);
    let mut vocabulary: Vec<String> = kept.iter().map(|(t, _)| t.to_string()).collect();
    vocabulary.sort();

    let index: HashMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    let idf: Vec<f64> = vocabulary
        .iter()
        .map(|t| ((1.0 + n as f64) / (1.0 + doc_freq[t.as_str()] as f64)).ln() + 1.0)
        .collect();

    let mut any_nonzero = false;
    let rows: Vec<Vec<f64>> = docs
        .iter()
        .map(|doc| {
            let mut row = vec![0.0; vocabulary.len()];
            for term in doc {
                if let Some(&i) = index.get(term.as_str()) {
                    row[i] += 1.0;
                }
            }
            for (value, weight) in row.iter_mut().zip(&idf) {
                *value *= weight;
            }
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                any_nonzero = true;
                row.iter_mut().for_each(|v| *v /= norm);
            }
            row
        })
        .collect();

    any_nonzero.then_some((vocabulary, rows))
}

/// Lloyd's k-means with greedy farthest-point seeding. `None` once the
/// deadline passes.
fn kmeans(
    points: &[Vec<f64>],
    k: usize,
    max_iterations: usize,
    deadline: Instant,
) -> Option<(Vec<Vec<f64>>, Vec<usize>)> {
    let dim = points.first()?.len();
    let mut centroids = seed_centroids(points, k);
    let mut assignments = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations.max(1) {
        if Instant::now() >= deadline {
            return None;
        }

        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = nearest_centroid(point, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(&assignments) {
            counts[cluster] += 1;
            for (acc, v) in sums[cluster].iter_mut().zip(point) {
                *acc += v;
            }
        }
        for (c, sum) in sums.into_iter().enumerate() {
            // Empty clusters keep their previous centroid.
            if counts[c] > 0 {
                centroids[c] = sum.into_iter().map(|v| v / counts[c] as f64).collect();
            }
        }
    }

    Some((centroids, assignments))
}

fn seed_centroids(points: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[points.len() / 2].clone());

    for _ in 1..k {
        let mut best_idx = 0;
        let mut best_dist = f64::NEG_INFINITY;
        for (i, point) in points.iter().enumerate() {
            let min_dist = centroids
                .iter()
                .map(|c| squared_euclidean(point, c))
                .fold(f64::MAX, f64::min);
            if min_dist > best_dist {
                best_dist = min_dist;
                best_idx = i;
            }
        }
        centroids.push(points[best_idx].clone());
    }

    centroids
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f64::MAX;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = squared_euclidean(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

#[inline]
fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

// ── Keyword surges ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordSurge {
    pub keyword: String,
    pub current_count: usize,
    pub previous_count: usize,
    pub growth_percent: f64,
}

fn word_counts(texts: &[String], min_len: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for text in texts {
        for word in text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty() && w.chars().count() >= min_len)
        {
            *counts.entry(word.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Words whose frequency grew by more than the configured percentage between
/// the previous and current periods, strongest growth first.
pub fn keyword_surges(current: &[String], previous: &[String], config: &TextConfig) -> Vec<KeywordSurge> {
    let current_counts = word_counts(current, config.surge_min_word_len);
    let previous_counts = word_counts(previous, config.surge_min_word_len);

    let mut candidates: Vec<(&String, usize)> = current_counts.iter().map(|(w, &c)| (w, c)).collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    candidates.truncate(config.surge_candidates);

    let mut surges: Vec<(f64, KeywordSurge)> = candidates
        .into_iter()
        .filter_map(|(word, count)| {
            let prev = previous_counts.get(word).copied().unwrap_or(0);
            let growth = (count as f64 - prev as f64) / prev.max(1) as f64 * 100.0;
            (growth > config.surge_growth_percent).then(|| {
                (
                    growth,
                    KeywordSurge {
                        keyword: word.clone(),
                        current_count: count,
                        previous_count: prev,
                        growth_percent: (growth * 10.0).round() / 10.0,
                    },
                )
            })
        })
        .collect();

    surges.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then(b.1.current_count.cmp(&a.1.current_count))
            .then(a.1.keyword.cmp(&b.1.keyword))
    });
    surges
        .into_iter()
        .take(config.surge_top_n)
        .map(|(_, surge)| surge)
        .collect()
}

// ── Corpus insights ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CorpusInsights {
    pub total_documents: usize,
    pub average_sentiment: f64,
    pub failure_distribution: BTreeMap<String, usize>,
    pub topic_clusters: Vec<TopicCluster>,
    pub keyword_surges: Vec<KeywordSurge>,
}

/// Aggregates the current period's documents and compares them with the
/// previous period. `None` when the current period has no documents.
pub fn corpus_insights(current: &[String], previous: &[String], config: &TextConfig) -> Option<CorpusInsights> {
    if current.is_empty() {
        return None;
    }

    let lexicon = &config.lexicon;
    let mut failure_distribution = BTreeMap::new();
    let mut sentiment_total = 0.0;
    for text in current {
        *failure_distribution
            .entry(categorize(text, lexicon).to_string())
            .or_insert(0) += 1;
        sentiment_total += sentiment(text, lexicon);
    }

    let k = config.cluster_count.min(current.len());
    Some(CorpusInsights {
        total_documents: current.len(),
        average_sentiment: sentiment_total / current.len() as f64,
        failure_distribution,
        topic_clusters: cluster_topics(current, k, config),
        keyword_surges: keyword_surges(current, previous, config),
    })
}
