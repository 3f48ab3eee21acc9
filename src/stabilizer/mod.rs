//! Interim stabilization: turns oscillating partial translations into a
//! non-shrinking confident prefix.
//!
//! The tracker observes every interim, maintains a decaying word-detail
//! buffer, and extracts the longest left-anchored run of tokens whose
//! confidence meets the acceptance threshold. The emitted prefix never gets
//! shorter between two finals; the memory resets on finals and on language
//! changes.

mod heuristics;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::settings::ConfidenceHeuristic;

/// Rolling interim snapshots kept for prefix/edit-distance heuristics.
const MAX_HISTORY: usize = 20;
/// Positions remembered per tracked word.
const MAX_POSITION_HISTORY: usize = 5;
/// Stability assigned to a word on first sighting (≙ confidence 0.2).
const NEW_WORD_STABILITY: f64 = 0.6;
/// Matches needed for full per-token confidence.
const STABLE_DIVISOR: f64 = 3.0;
/// Minimum word similarity for an incoming token to claim a prior detail.
const SIMILARITY_GATE: f64 = 0.8;
/// Absence grace period before a word starts decaying.
const DECAY_GRACE: Duration = Duration::from_secs(2);
/// Window over which a decaying word fades toward the floor.
const DECAY_WINDOW_S: f64 = 5.0;
/// Decay multiplier floor.
const DECAY_FLOOR: f64 = 0.1;
/// Words decayed below this stability are dropped from the buffer.
const DISCARD_BELOW: f64 = 0.5;
/// Position-proximity horizon for match scoring.
const PROXIMITY_HORIZON: f64 = 10.0;

/// One tracked word in the detail buffer.
#[derive(Debug, Clone)]
pub(crate) struct WordDetail {
    /// Latest surface form of the word.
    pub(crate) word: String,
    /// Normalized form used for matching.
    pub(crate) normalized: String,
    /// Match count, fractionally seeded and decayed on absence.
    pub(crate) stable_count: f64,
    pub(crate) first_seen: Instant,
    pub(crate) last_seen: Instant,
    /// Most recent position the word appeared at.
    pub(crate) best_position: usize,
    /// Last few observed positions (cap 5).
    pub(crate) position_history: VecDeque<usize>,
}

impl WordDetail {
    fn position_consistency(&self) -> f64 {
        if self.position_history.len() < 2 {
            return 1.0;
        }
        let n = self.position_history.len() as f64;
        let mean = self.position_history.iter().map(|&p| p as f64).sum::<f64>() / n;
        let variance = self
            .position_history
            .iter()
            .map(|&p| {
                let d = p as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        (1.0 - variance.sqrt() / 2.0).max(0.0)
    }

    fn confidence(&self) -> f64 {
        (self.stable_count / STABLE_DIVISOR).min(1.0) * self.position_consistency()
    }
}

/// A token of the current interim bound to its word detail.
#[derive(Debug, Clone)]
pub(crate) struct TrackedToken {
    pub(crate) text: String,
    /// Index into the detail buffer.
    pub(crate) detail: usize,
    /// Per-token word-stability confidence.
    pub(crate) confidence: f64,
}

/// Per-user, per-direction interim stabilization state.
pub struct ConfidenceTracker {
    heuristic: ConfidenceHeuristic,
    threshold: f64,
    is_cjk: bool,
    details: Vec<WordDetail>,
    history: VecDeque<String>,
    last_interim_len: usize,
    /// Non-shrinking memory: token count and text of the last emitted prefix.
    last_prefix: Option<(usize, String)>,
}

impl ConfidenceTracker {
    /// Create a tracker for the given heuristic, threshold and script class.
    #[must_use]
    pub fn new(heuristic: ConfidenceHeuristic, threshold: f64, is_cjk: bool) -> Self {
        Self {
            heuristic,
            threshold,
            is_cjk,
            details: Vec::new(),
            history: VecDeque::new(),
            last_interim_len: 0,
            last_prefix: None,
        }
    }

    /// Switch heuristics without losing accumulated word details.
    pub fn set_heuristic(&mut self, heuristic: ConfidenceHeuristic) {
        self.heuristic = heuristic;
    }

    /// Drop all accumulated state. Called on finals and language changes.
    pub fn reset(&mut self) {
        self.details.clear();
        self.history.clear();
        self.last_interim_len = 0;
        self.last_prefix = None;
    }

    /// Observe an interim and return the non-shrinking confident prefix.
    ///
    /// Pure with respect to the clock: callers pass `now` so behavior is
    /// reproducible under test.
    pub fn stabilize(&mut self, text: &str, now: Instant) -> String {
        if text.is_empty() {
            return String::new();
        }
        if self.heuristic == ConfidenceHeuristic::None {
            return text.to_owned();
        }

        let tokens = tokenize(text, self.is_cjk);
        if tokens.is_empty() {
            return String::new();
        }
        if tokens.len() < self.last_interim_len {
            trace!(
                previous = self.last_interim_len,
                current = tokens.len(),
                "interim shrank; relying on prefix memory"
            );
        }

        let tracked = self.observe(&tokens, now);
        let previous = self.history.back().map(String::as_str);
        let sequence_score =
            heuristics::sequence_score(self.heuristic, text, previous, &tracked, &self.details);

        // Left-to-right scan; stop at the first token below threshold.
        let mut confident = 0usize;
        for token in &tracked {
            let effective = if self.heuristic == ConfidenceHeuristic::WordStability {
                token.confidence
            } else {
                token.confidence * sequence_score
            };
            if effective < self.threshold {
                break;
            }
            confident += 1;
        }

        self.history.push_back(text.to_owned());
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        self.last_interim_len = tokens.len();

        let prefix = self.join(&tokens[..confident]);

        // Never emit fewer tokens than the last prefix.
        if let Some((last_len, last_text)) = &self.last_prefix
            && confident < *last_len
        {
            return last_text.clone();
        }
        self.last_prefix = Some((confident, prefix.clone()));
        prefix
    }

    /// Update the word-detail buffer against the current tokens.
    fn observe(&mut self, tokens: &[String], now: Instant) -> Vec<TrackedToken> {
        let mut claimed = vec![false; self.details.len()];
        let mut tracked = Vec::with_capacity(tokens.len());

        for (position, token) in tokens.iter().enumerate() {
            let normalized = normalize(token);
            let mut best: Option<(usize, f64)> = None;
            for (idx, detail) in self.details.iter().enumerate() {
                if claimed[idx] {
                    continue;
                }
                let similarity = heuristics::word_similarity(&normalized, &detail.normalized);
                if similarity < SIMILARITY_GATE {
                    continue;
                }
                let delta = position.abs_diff(detail.best_position) as f64;
                let proximity = (1.0 - delta / PROXIMITY_HORIZON).max(0.0);
                let score = 0.7 * similarity + 0.3 * proximity;
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((idx, score));
                }
            }

            let detail_idx = match best {
                Some((idx, _)) => {
                    claimed[idx] = true;
                    let detail = &mut self.details[idx];
                    detail.stable_count += 1.0;
                    detail.last_seen = now;
                    detail.best_position = position;
                    detail.word = token.clone();
                    detail.normalized = normalized;
                    detail.position_history.push_back(position);
                    if detail.position_history.len() > MAX_POSITION_HISTORY {
                        detail.position_history.pop_front();
                    }
                    idx
                }
                None => {
                    self.details.push(WordDetail {
                        word: token.clone(),
                        normalized,
                        stable_count: NEW_WORD_STABILITY,
                        first_seen: now,
                        last_seen: now,
                        best_position: position,
                        position_history: VecDeque::from([position]),
                    });
                    claimed.push(true);
                    self.details.len() - 1
                }
            };

            tracked.push(TrackedToken {
                text: token.clone(),
                detail: detail_idx,
                confidence: self.details[detail_idx].confidence(),
            });
        }

        self.decay_absent(&claimed, now);

        // Decay may remove details; rebind indices for survivors.
        for token in &mut tracked {
            if let Some(idx) = self
                .details
                .iter()
                .position(|d| d.normalized == normalize(&token.text) && d.last_seen == now)
            {
                token.detail = idx;
                token.confidence = self.details[idx].confidence();
            }
        }

        tracked
    }

    /// Absent words decay rather than being removed outright.
    fn decay_absent(&mut self, claimed: &[bool], now: Instant) {
        for (idx, detail) in self.details.iter_mut().enumerate() {
            if claimed.get(idx).copied().unwrap_or(false) {
                continue;
            }
            let age = now.saturating_duration_since(detail.last_seen);
            if age <= DECAY_GRACE {
                continue;
            }
            let overshoot = (age - DECAY_GRACE).as_secs_f64();
            let factor = (1.0 - overshoot / DECAY_WINDOW_S).max(DECAY_FLOOR);
            detail.stable_count *= factor;
        }
        self.details.retain(|d| d.stable_count >= DISCARD_BELOW);
    }

    fn join(&self, tokens: &[String]) -> String {
        if self.is_cjk {
            tokens.concat()
        } else {
            tokens.join(" ")
        }
    }
}

/// Split text into stabilization units: characters for CJK scripts,
/// whitespace-delimited tokens otherwise.
#[must_use]
pub fn tokenize(text: &str, is_cjk: bool) -> Vec<String> {
    if is_cjk {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .map(String::from)
            .collect()
    } else {
        text.split_whitespace().map(str::to_owned).collect()
    }
}

/// Lowercase and strip punctuation for matching.
#[must_use]
pub fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
