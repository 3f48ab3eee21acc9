//! Message types flowing through the relay.
//!
//! `TranslationEvent` is what the upstream source delivers; `ConversationEntry`
//! is what the log stores and viewers render; `ViewerEvent` is the typed
//! fan-out envelope pushed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single incremental translation result from the upstream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationEvent {
    /// Upstream session this event belongs to.
    pub session_id: String,
    /// User the session is bound to.
    pub user_id: String,
    /// Recognized text in the speaker's language.
    pub original_text: String,
    /// Translated text (equals `original_text` when `did_translate` is false).
    pub translated_text: String,
    /// BCP-47 locale the speech was recognized in.
    pub source_locale: String,
    /// BCP-47 locale the text was translated into.
    pub target_locale: String,
    /// Whether the upstream actually translated (false = passthrough).
    pub did_translate: bool,
    /// Whether this is the terminal event for the utterance.
    pub is_final: bool,
    /// When the relay received the event.
    pub received_at: DateTime<Utc>,
}

/// A logged utterance, updated in place while interim and frozen on final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    /// Stable entry identifier (`entry-<n>`, monotonic within a user).
    pub id: String,
    /// Epoch milliseconds of the last update.
    pub timestamp: i64,
    /// Source-language text.
    pub original_text: String,
    /// Target-language text.
    pub translated_text: String,
    /// Human-readable source language name (e.g. "English").
    pub original_language: String,
    /// Human-readable target language name (e.g. "Chinese").
    pub translated_language: String,
    /// Monotone: once true it never returns to false for this id.
    pub is_final: bool,
    /// True on the event that completed an utterance (or a standalone final).
    pub is_new_utterance: bool,
}

/// Source/target language pair a user is currently translating between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    /// Human-readable source language name.
    pub from: String,
    /// Human-readable target language name.
    pub to: String,
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self {
            from: "English".to_owned(),
            to: "English".to_owned(),
        }
    }
}

/// Typed event broadcast to viewer subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ViewerEvent {
    /// Synthetic first event after a subscriber joins.
    Connected {
        /// User the stream is scoped to.
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// A new or updated conversation entry.
    Translation(ConversationEntry),
    /// The user's language pair changed.
    LanguageChange(LanguagePair),
    /// The conversation was cleared (inactivity or lifecycle).
    Clear {},
}

impl ViewerEvent {
    /// SSE event name for this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Translation(_) => "translation",
            Self::LanguageChange(_) => "languageChange",
            Self::Clear {} => "clear",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn viewer_event_types() {
        let entry = ConversationEntry {
            id: "entry-1".to_owned(),
            timestamp: 0,
            original_text: "hola".to_owned(),
            translated_text: "hello".to_owned(),
            original_language: "Spanish".to_owned(),
            translated_language: "English".to_owned(),
            is_final: true,
            is_new_utterance: true,
        };
        assert!(ViewerEvent::Translation(entry).event_type() == "translation");
        assert!(ViewerEvent::Clear {}.event_type() == "clear");
        assert!(
            ViewerEvent::Connected {
                user_id: "u".to_owned()
            }
            .event_type()
                == "connected"
        );
    }

    #[test]
    fn conversation_entry_serializes_camel_case() {
        let entry = ConversationEntry {
            id: "entry-7".to_owned(),
            timestamp: 1234,
            original_text: "bonjour".to_owned(),
            translated_text: "hello".to_owned(),
            original_language: "French".to_owned(),
            translated_language: "English".to_owned(),
            is_final: false,
            is_new_utterance: false,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("originalText").is_some());
        assert!(json.get("isFinal").is_some());
        assert!(json.get("is_final").is_none());
    }
}
