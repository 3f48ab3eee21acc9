//! Caption formatting for the glasses text wall.
//!
//! Wraps text into a fixed rectangle of `columns × lines` and composes the
//! visible frame from the most recent wrapped finals plus (for interims) the
//! wrapped interim. Wide glyphs count two columns, so CJK targets fit fewer
//! characters per line for the same preset.

use std::collections::VecDeque;

use unicode_width::UnicodeWidthChar;
use unicode_width::UnicodeWidthStr;

use crate::settings::LineWidth;

/// Default cap on retained final captions.
pub const MAX_FINAL_CAPTIONS: usize = 100;

/// A final caption: the raw text plus its current wrapping.
#[derive(Debug, Clone)]
struct FinalCaption {
    raw: String,
    lines: Vec<String>,
}

/// Per-user caption state and frame composer.
pub struct CaptionFormatter {
    columns: usize,
    max_lines: usize,
    is_cjk: bool,
    max_finals: usize,
    finals: VecDeque<FinalCaption>,
}

impl CaptionFormatter {
    /// Create a formatter for the given width preset and line count.
    #[must_use]
    pub fn new(width: LineWidth, lines: u8, is_cjk: bool, max_finals: usize) -> Self {
        Self {
            columns: width.columns(),
            max_lines: lines.max(1) as usize,
            is_cjk,
            max_finals: max_finals.max(1),
            finals: VecDeque::new(),
        }
    }

    /// Process one caption and return the frame to display.
    ///
    /// Finals are appended to the bounded history; interims only shape the
    /// returned frame and never mutate history.
    pub fn process(&mut self, text: &str, is_final: bool) -> String {
        if is_final {
            let lines = wrap(text, self.columns, self.is_cjk);
            self.finals.push_back(FinalCaption {
                raw: text.to_owned(),
                lines,
            });
            if self.finals.len() > self.max_finals {
                self.finals.pop_front();
            }
            self.compose(&[])
        } else {
            let interim_lines = wrap(text, self.columns, self.is_cjk);
            self.compose(&interim_lines)
        }
    }

    /// Forget all finals (inactivity clear, language change).
    pub fn clear(&mut self) {
        self.finals.clear();
    }

    /// Apply a new width/line configuration, re-wrapping retained finals.
    pub fn reconfigure(&mut self, width: LineWidth, lines: u8) {
        self.columns = width.columns();
        self.max_lines = lines.max(1) as usize;
        for caption in &mut self.finals {
            caption.lines = wrap(&caption.raw, self.columns, self.is_cjk);
        }
    }

    /// Number of retained finals.
    #[must_use]
    pub fn final_count(&self) -> usize {
        self.finals.len()
    }

    /// Most recent lines first dropped off the top when over budget.
    fn compose(&self, interim_lines: &[String]) -> String {
        let mut lines: Vec<&str> = Vec::new();
        for caption in &self.finals {
            lines.extend(caption.lines.iter().map(String::as_str));
        }
        lines.extend(interim_lines.iter().map(String::as_str));

        let start = lines.len().saturating_sub(self.max_lines);
        lines[start..].join("\n")
    }
}

/// Greedy wrap to a display-column budget.
///
/// Non-CJK text wraps at word boundaries (overlong words hard-split); CJK
/// text wraps per glyph. Returns no lines for blank input.
#[must_use]
pub fn wrap(text: &str, columns: usize, is_cjk: bool) -> Vec<String> {
    let columns = columns.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if is_cjk {
        wrap_chars(text, columns)
    } else {
        wrap_words(text, columns)
    }
}

fn wrap_words(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_width = 0usize;

    for word in text.split_whitespace() {
        let word_width = word.width();
        if word_width > columns {
            // Hard-split a word that cannot fit on any line.
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
                line_width = 0;
            }
            for piece in split_to_width(word, columns) {
                lines.push(piece);
            }
            if let Some(last) = lines.pop() {
                line_width = last.width();
                line = last;
            }
            continue;
        }

        let needed = if line.is_empty() {
            word_width
        } else {
            word_width + 1
        };
        if line_width + needed > columns {
            lines.push(std::mem::take(&mut line));
            line_width = 0;
        }
        if !line.is_empty() {
            line.push(' ');
            line_width += 1;
        }
        line.push_str(word);
        line_width += word_width;
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn wrap_chars(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_width = 0usize;

    for c in text.chars().filter(|c| !c.is_whitespace()) {
        let w = c.width().unwrap_or(1);
        if line_width + w > columns && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line_width = 0;
        }
        line.push(c);
        line_width += w;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn split_to_width(word: &str, columns: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut width = 0usize;
    for c in word.chars() {
        let w = c.width().unwrap_or(1);
        if width + w > columns && !piece.is_empty() {
            pieces.push(std::mem::take(&mut piece));
            width = 0;
        }
        piece.push(c);
        width += w;
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}
