//! Per-user conversation log with interim-to-final promotion.
//!
//! The log distinguishes "the same utterance being refined" from "a new
//! utterance": while an interim entry is open, further interims update it in
//! place and the final promotes it under the same id. Storage is bounded with
//! FIFO eviction.

use std::collections::HashMap;

use chrono::Utc;

use crate::events::{ConversationEntry, LanguagePair};

/// Default cap on retained entries.
pub const MAX_LOG_ENTRIES: usize = 500;

/// Ordered, bounded log of translation entries.
pub struct ConversationLog {
    /// Insertion order of entry ids.
    order: Vec<String>,
    entries: HashMap<String, ConversationEntry>,
    /// Id of the open (non-final) entry currently being refined, if any.
    current_interim_id: Option<String>,
    /// Strictly increasing; survives `clear()` so ids stay unique.
    entry_counter: u64,
    language_pair: LanguagePair,
    max_entries: usize,
}

impl ConversationLog {
    /// Create an empty log with the given capacity.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
            current_interim_id: None,
            entry_counter: 0,
            language_pair: LanguagePair::default(),
            max_entries: max_entries.max(1),
        }
    }

    /// Record a translation, returning the new or updated entry.
    ///
    /// Returns `None` only for blank input, which must not advance any state.
    pub fn add_translation(
        &mut self,
        original_text: &str,
        translated_text: &str,
        original_language: &str,
        translated_language: &str,
        is_final: bool,
    ) -> Option<ConversationEntry> {
        if original_text.trim().is_empty() && translated_text.trim().is_empty() {
            return None;
        }
        let timestamp = Utc::now().timestamp_millis();

        if let Some(id) = self.current_interim_id.clone() {
            let entry = self.entries.get_mut(&id)?;
            entry.original_text = original_text.to_owned();
            entry.translated_text = translated_text.to_owned();
            entry.original_language = original_language.to_owned();
            entry.translated_language = translated_language.to_owned();
            entry.timestamp = timestamp;
            if is_final {
                // Promote: same id, frozen from here on.
                entry.is_final = true;
                entry.is_new_utterance = true;
                self.current_interim_id = None;
            }
            return Some(entry.clone());
        }

        self.entry_counter += 1;
        let id = format!("entry-{}", self.entry_counter);
        let entry = ConversationEntry {
            id: id.clone(),
            timestamp,
            original_text: original_text.to_owned(),
            translated_text: translated_text.to_owned(),
            original_language: original_language.to_owned(),
            translated_language: translated_language.to_owned(),
            is_final,
            is_new_utterance: is_final,
        };
        self.order.push(id.clone());
        self.entries.insert(id.clone(), entry.clone());
        if !is_final {
            self.current_interim_id = Some(id);
        }
        self.evict_over_capacity();
        Some(entry)
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn all_entries(&self) -> Vec<ConversationEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop every entry. The id counter is not reset.
    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.current_interim_id = None;
    }

    /// Record the active language pair.
    pub fn set_language_pair(&mut self, from: &str, to: &str) {
        self.language_pair = LanguagePair {
            from: from.to_owned(),
            to: to.to_owned(),
        };
    }

    /// The active language pair.
    #[must_use]
    pub fn language_pair(&self) -> &LanguagePair {
        &self.language_pair
    }

    fn evict_over_capacity(&mut self) {
        while self.order.len() > self.max_entries {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
            if self.current_interim_id.as_deref() == Some(oldest.as_str()) {
                self.current_interim_id = None;
            }
        }
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(MAX_LOG_ENTRIES)
    }
}
