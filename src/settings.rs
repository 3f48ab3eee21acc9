//! Per-user display and stabilization settings.
//!
//! Settings arrive from the upstream cloud as partial JSON payloads; missing
//! fields fall back to the descriptor-provided (or built-in) defaults, so
//! every field is serde-defaulted.

use serde::{Deserialize, Serialize};

use crate::locale;

/// Glasses line width presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineWidth {
    Small,
    Medium,
    Large,
}

impl LineWidth {
    /// Effective character columns for non-CJK text at this width.
    ///
    /// CJK glyphs are double-width; the caption formatter accounts for that
    /// per glyph, so the column budget here is script-independent.
    #[must_use]
    pub fn columns(self) -> usize {
        match self {
            Self::Small => 30,
            Self::Medium => 40,
            Self::Large => 50,
        }
    }
}

/// What the glasses show: everything spoken, or translated lines only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Show passthrough (untranslated) lines as well as translations.
    Everything,
    /// Show only lines the upstream actually translated.
    Translations,
}

/// Interim stabilization algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceHeuristic {
    /// Stabilization disabled; interims pass through unmodified.
    None,
    WordStability,
    PrefixRetention,
    EditDistance,
    WordDuration,
    TrailingWordDecay,
    Hybrid,
}

/// Bounds for `number_of_lines`.
pub const MIN_LINES: u8 = 1;
pub const MAX_LINES: u8 = 5;

/// A user's current settings, as applied to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    /// BCP-47 locale speech is recognized in.
    pub source_language: String,
    /// BCP-47 locale translations are rendered in. May carry the pinyin
    /// display marker (`zh-CN-x-pinyin`).
    pub target_language: String,
    /// Glasses line width preset.
    pub line_width: LineWidth,
    /// Visible caption lines on the glasses (clamped to 1..=5).
    pub number_of_lines: u8,
    /// Which lines the glasses show.
    pub display_mode: DisplayMode,
    /// Interim stabilization algorithm.
    pub confidence_heuristic: ConfidenceHeuristic,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            source_language: "en-US".to_owned(),
            target_language: "es-ES".to_owned(),
            line_width: LineWidth::Medium,
            number_of_lines: 3,
            display_mode: DisplayMode::Everything,
            confidence_heuristic: ConfidenceHeuristic::WordStability,
        }
    }
}

impl UserSettings {
    /// Clamp out-of-range values to their documented bounds.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.number_of_lines = self.number_of_lines.clamp(MIN_LINES, MAX_LINES);
        self
    }

    /// Whether the configured target is character-tokenized.
    #[must_use]
    pub fn target_is_cjk(&self) -> bool {
        locale::is_cjk(&self.target_language)
    }

    /// Whether glasses text must be routed through the pinyin transliterator.
    #[must_use]
    pub fn target_is_pinyin(&self) -> bool {
        locale::is_pinyin_target(&self.target_language)
    }
}

/// Merge a partial settings payload over `current`.
///
/// Unknown keys are ignored; a payload that does not merge into valid
/// settings leaves `current` untouched (logged once by the caller's tracing
/// span, not fatal).
#[must_use]
pub fn merge_settings(current: &UserSettings, payload: &serde_json::Value) -> UserSettings {
    let mut base = match serde_json::to_value(current) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => return current.clone(),
    };
    let Some(overrides) = payload.as_object() else {
        return current.clone();
    };
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    match serde_json::from_value(serde_json::Value::Object(base)) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!("settings payload did not merge cleanly, keeping current: {err}");
            current.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Unsupported (device, target language) combinations
// ---------------------------------------------------------------------------

/// Target languages whose scripts a given device model cannot render.
///
/// Keys are lowercase substrings matched against the reported device model;
/// values are primary language subtags. Chinese is rendered via the pinyin
/// variant on these displays and is therefore not listed.
const UNSUPPORTED_COMBINATIONS: &[(&str, &[&str])] = &[(
    "even realities g1",
    &["ja", "ko", "th", "ru", "ar", "he", "hi"],
)];

/// How long the unsupported-combination warning stays on the glasses.
pub const WARNING_DURATION_MS: u64 = 10_000;

/// Warning caption for an unsupported (device, target) pair, if any.
///
/// `None` means the combination is fine and the session should subscribe.
#[must_use]
pub fn unsupported_warning(device_model: &str, target_language: &str) -> Option<String> {
    let model = device_model.to_lowercase();
    let subtag = locale::primary_subtag(target_language);
    for (device, languages) in UNSUPPORTED_COMBINATIONS {
        if model.contains(device) && languages.contains(&subtag.as_str()) {
            let name = locale::display_name(target_language);
            return Some(format!(
                "{name} captions aren't supported on this display yet. \
                 Please choose a different target language in settings."
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn partial_payload_fills_defaults() {
        let settings: UserSettings =
            serde_json::from_str(r#"{"targetLanguage": "fr-FR"}"#).unwrap();
        assert!(settings.target_language == "fr-FR");
        assert!(settings.source_language == "en-US");
        assert!(settings.number_of_lines == 3);
    }

    #[test]
    fn enum_wire_names() {
        let settings: UserSettings = serde_json::from_str(
            r#"{
                "lineWidth": "large",
                "displayMode": "translations",
                "confidenceHeuristic": "prefixRetention"
            }"#,
        )
        .unwrap();
        assert!(settings.line_width == LineWidth::Large);
        assert!(settings.display_mode == DisplayMode::Translations);
        assert!(settings.confidence_heuristic == ConfidenceHeuristic::PrefixRetention);
    }

    #[test]
    fn lines_clamped() {
        let settings: UserSettings = serde_json::from_str(r#"{"numberOfLines": 9}"#).unwrap();
        assert!(settings.normalized().number_of_lines == MAX_LINES);
        let settings: UserSettings = serde_json::from_str(r#"{"numberOfLines": 0}"#).unwrap();
        assert!(settings.normalized().number_of_lines == MIN_LINES);
    }

    #[test]
    fn unsupported_table_matches_device_and_language() {
        assert!(unsupported_warning("Even Realities G1", "ja-JP").is_some());
        assert!(unsupported_warning("Even Realities G1", "fr-FR").is_none());
        // Chinese goes through pinyin, so it stays supported.
        assert!(unsupported_warning("Even Realities G1", "zh-CN-x-pinyin").is_none());
        assert!(unsupported_warning("Some Other Device", "ja-JP").is_none());
    }

    #[test]
    fn merge_overrides_only_named_fields() {
        let current = UserSettings::default();
        let payload = serde_json::json!({"targetLanguage": "fr-FR", "numberOfLines": 4});
        let merged = merge_settings(&current, &payload);
        assert!(merged.target_language == "fr-FR");
        assert!(merged.number_of_lines == 4);
        assert!(merged.source_language == current.source_language);
    }

    #[test]
    fn merge_rejects_invalid_payloads_wholesale() {
        let current = UserSettings::default();
        let payload = serde_json::json!({"lineWidth": "gigantic"});
        assert!(merge_settings(&current, &payload) == current);
        assert!(merge_settings(&current, &serde_json::json!(42)) == current);
    }

    #[test]
    fn line_width_columns_are_ordered() {
        assert!(LineWidth::Small.columns() < LineWidth::Medium.columns());
        assert!(LineWidth::Medium.columns() < LineWidth::Large.columns());
    }
}
