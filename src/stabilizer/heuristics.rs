//! Sequence-level scoring for the stabilization heuristics.
//!
//! Each heuristic reduces the current interim (plus tracker state) to a score
//! in [0, 1]. The confident-prefix scan multiplies per-token word-stability
//! confidence by this score for every mode except `WordStability` itself,
//! whose per-token values are already the signal.

use crate::settings::ConfidenceHeuristic;

use super::{TrackedToken, WordDetail};

/// Seconds of observed word lifetime that count as fully stable.
const FULL_DURATION_S: f64 = 1.0;

/// Compute the sequence-level score for the selected heuristic.
///
/// `tokens` are the current interim's tracked tokens (with their per-token
/// word-stability confidence already computed), `previous` is the prior
/// interim snapshot, `details` the live word-detail buffer.
pub(super) fn sequence_score(
    heuristic: ConfidenceHeuristic,
    current: &str,
    previous: Option<&str>,
    tokens: &[TrackedToken],
    details: &[WordDetail],
) -> f64 {
    match heuristic {
        ConfidenceHeuristic::None => 1.0,
        ConfidenceHeuristic::WordStability => word_stability(tokens),
        ConfidenceHeuristic::PrefixRetention => prefix_retention(current, previous),
        ConfidenceHeuristic::EditDistance => edit_distance_score(current, previous),
        ConfidenceHeuristic::WordDuration => word_duration(tokens, details),
        ConfidenceHeuristic::TrailingWordDecay => trailing_word_decay(tokens.len()),
        ConfidenceHeuristic::Hybrid => {
            let score = 0.4 * word_stability(tokens)
                + 0.3 * prefix_retention(current, previous)
                + 0.2 * edit_distance_score(current, previous)
                + 0.1 * trailing_word_decay(tokens.len());
            score.clamp(0.0, 1.0)
        }
    }
}

/// Mean per-token word-stability confidence.
fn word_stability(tokens: &[TrackedToken]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    tokens.iter().map(|t| t.confidence).sum::<f64>() / tokens.len() as f64
}

/// Longest common prefix with the previous interim, normalized by current length.
fn prefix_retention(current: &str, previous: Option<&str>) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let current_len = current.chars().count();
    if current_len == 0 {
        return 0.0;
    }
    let common = current
        .chars()
        .zip(previous.chars())
        .take_while(|(a, b)| a == b)
        .count();
    common as f64 / current_len as f64
}

/// `1 − levenshtein(cur, prev) / max(len, 1)`.
fn edit_distance_score(current: &str, previous: Option<&str>) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let max_len = current.chars().count().max(previous.chars().count()).max(1);
    let distance = levenshtein(current, previous);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// Average observed word lifetime weighted by stability, capped at 1 s.
fn word_duration(tokens: &[TrackedToken], details: &[WordDetail]) -> f64 {
    let mut weighted = 0.0;
    let mut weight = 0.0;
    for token in tokens {
        let Some(detail) = details.get(token.detail) else {
            continue;
        };
        let lifetime = detail
            .last_seen
            .saturating_duration_since(detail.first_seen)
            .as_secs_f64();
        weighted += lifetime * detail.stable_count;
        weight += detail.stable_count;
    }
    if weight <= 0.0 {
        return 0.0;
    }
    ((weighted / weight) / FULL_DURATION_S).clamp(0.0, 1.0)
}

/// Mean of `(i + 1) / n` across token positions.
fn trailing_word_decay(n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (1..=n).map(|i| i as f64 / n as f64).sum::<f64>() / n as f64
}

/// Character-level word similarity: `(commonPrefix + commonSuffix) / max(len)`.
///
/// Identical words score 1.0; the prefix/suffix sum is clamped so overlapping
/// runs cannot push the ratio above 1.
pub(super) fn word_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 0.0;
    }
    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let common = (prefix + suffix).min(max_len);
    common as f64 / max_len as f64
}

/// Classic two-row Levenshtein distance over characters.
pub(super) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
