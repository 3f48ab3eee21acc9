//! BCP-47 locale handling: subtag matching, display names, CJK detection.
//!
//! Locales arrive as opaque BCP-47-shaped strings (`en-US`, `zh-CN`,
//! `zh-CN-x-pinyin`). The relay only ever inspects the primary language
//! subtag; everything after the first `-` is preserved but not interpreted,
//! with the exception of the pinyin display marker.

use isolang::Language;

/// Fallback locale for unknown or malformed language codes.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Marker that selects the romanized Chinese display variant.
const PINYIN_MARKER: &str = "pinyin";

/// The primary language subtag (text before the first `-`), lowercased.
#[must_use]
pub fn primary_subtag(locale: &str) -> String {
    locale
        .split('-')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Whether two locales name the same language (primary subtags match).
#[must_use]
pub fn same_language(a: &str, b: &str) -> bool {
    let (a, b) = (primary_subtag(a), primary_subtag(b));
    !a.is_empty() && a == b
}

/// Human-readable English name for a locale ("en-US" → "English").
///
/// Unknown codes route through [`DEFAULT_LOCALE`] rather than failing.
#[must_use]
pub fn display_name(locale: &str) -> String {
    let subtag = primary_subtag(locale);
    let language = match subtag.len() {
        2 => Language::from_639_1(&subtag),
        3 => Language::from_639_3(&subtag),
        _ => None,
    };
    match language {
        Some(lang) => lang.to_name().to_owned(),
        None => display_name_or_english(DEFAULT_LOCALE),
    }
}

fn display_name_or_english(locale: &str) -> String {
    Language::from_639_1(&primary_subtag(locale))
        .map(|l| l.to_name().to_owned())
        .unwrap_or_else(|| "English".to_owned())
}

/// Whether the locale's script is character-tokenized (no word spacing).
///
/// The pinyin display variant renders as spaced Latin words, so it is not
/// CJK for tokenization or wrapping purposes.
#[must_use]
pub fn is_cjk(locale: &str) -> bool {
    if is_pinyin_target(locale) {
        return false;
    }
    matches!(primary_subtag(locale).as_str(), "zh" | "ja" | "ko" | "yue")
}

/// Whether the target locale selects the Chinese-Pinyin display variant.
#[must_use]
pub fn is_pinyin_target(locale: &str) -> bool {
    primary_subtag(locale) == "zh" && locale.to_lowercase().contains(PINYIN_MARKER)
}

/// Seam for the external hanzi→pinyin conversion.
///
/// The conversion algorithm itself lives outside this crate; sessions route
/// glasses text through whichever implementation the embedder installs.
pub trait Transliterator: Send + Sync {
    /// Convert display text to its romanized form.
    fn transliterate(&self, text: &str) -> String;
}

/// Default transliterator: passes text through unchanged.
pub struct NoopTransliterator;

impl Transliterator for NoopTransliterator {
    fn transliterate(&self, text: &str) -> String {
        text.to_owned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn subtag_matching_ignores_region() {
        assert!(same_language("en-US", "en-GB"));
        assert!(same_language("zh-CN", "zh"));
        assert!(!same_language("en-US", "fr-FR"));
        assert!(!same_language("", "en"));
    }

    #[test]
    fn display_names() {
        assert!(display_name("en-US") == "English");
        assert!(display_name("zh-CN") == "Chinese");
        assert!(display_name("fr") == "French");
        // Unknown codes fall back to the default locale's name.
        assert!(display_name("xx-XX") == "English");
        assert!(display_name("") == "English");
    }

    #[test]
    fn cjk_detection() {
        assert!(is_cjk("zh-CN"));
        assert!(is_cjk("ja-JP"));
        assert!(is_cjk("ko-KR"));
        assert!(!is_cjk("en-US"));
        // Pinyin renders as Latin words.
        assert!(!is_cjk("zh-CN-x-pinyin"));
    }

    #[test]
    fn pinyin_marker() {
        assert!(is_pinyin_target("zh-CN-x-pinyin"));
        assert!(is_pinyin_target("zh-Pinyin"));
        assert!(!is_pinyin_target("zh-CN"));
        assert!(!is_pinyin_target("en-US-x-pinyin"));
    }
}
