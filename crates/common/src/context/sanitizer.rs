//! Prompt-safe text normalization
//!
//! Output is restricted to printable ASCII plus newline and tab. Text is
//! compatibility-decomposed first so accented letters keep their base
//! character. Spacing, bullet and box-drawing artifacts common in extracted
//! documents are mapped to a space or hyphen; every other non-ASCII code
//! point, typographic dashes and quotes included, is dropped.

use unicode_normalization::UnicodeNormalization;

/// Sanitize text for inclusion in a prompt. Idempotent.
pub fn sanitize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    text.nfkd()
        .map(replace_layout_char)
        .filter(|c| matches!(c, ' '..='~' | '\n' | '\t'))
        .collect()
}

fn replace_layout_char(c: char) -> char {
    match c {
        // no-break and narrow spaces, line/paragraph separators
        '\u{00A0}' | '\u{2007}' | '\u{202F}' | '\u{2028}' | '\u{2029}' => ' ',
        // bullets and squares
        '\u{2022}' | '\u{2023}' | '\u{2043}' | '\u{25A0}' | '\u{25AA}' | '\u{25CF}'
        | '\u{25E6}' => '-',
        // box drawing
        '\u{2500}'..='\u{257F}' => '-',
        other => other,
    }
}
