//! Cell normalisation: deterministic cleanup of extracted cell text.
//!
//! Table extractors hand back cell text with artefacts of the page layout:
//! hard line breaks where a long name wrapped, zero-width characters and soft
//! hyphens copied out of the PDF text layer, and irregular runs of spaces
//! where two columns were merged. Identifier and subject-code scanning runs
//! on the normalised text only.
//!
//! ## Rule Order
//!
//! Line breaks become spaces before invisible characters are removed, and
//! whitespace is collapsed last so that neither earlier rule leaves doubled
//! spaces behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to one cell. Idempotent.
///
/// Rules (applied in order):
/// 1. Replace CR/LF with a space (wrapped cell text)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 3. Collapse whitespace runs to a single space and trim
pub fn clean_cell(input: &str) -> String {
    let s = flatten_line_breaks(input);
    let s = remove_invisible_chars(&s);
    collapse_whitespace(&s)
}

/// `true` when the cell holds nothing once normalised.
pub fn is_blank(input: &str) -> bool {
    input
        .chars()
        .all(|c| c.is_whitespace() || is_invisible(c))
}

// ── Rule 1: Flatten line breaks ──────────────────────────────────────────────

fn flatten_line_breaks(input: &str) -> String {
    input.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

// ── Rule 2: Strip invisible Unicode ──────────────────────────────────────────

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' // zero-width space
            | '\u{200C}' // zero-width non-joiner
            | '\u{200D}' // zero-width joiner
            | '\u{2060}' // word joiner
            | '\u{FEFF}' // BOM
            | '\u{00AD}' // soft hyphen
    )
}

fn remove_invisible_chars(input: &str) -> String {
    input.chars().filter(|c| !is_invisible(*c)).collect()
}

// ── Rule 3: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_line_breaks() {
        assert_eq!(flatten_line_breaks("John\nDoe\r\nX\rY"), "John Doe X Y");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "MU\u{200B}0000\u{FEFF}00\u{00AD}01";
        assert_eq!(remove_invisible_chars(input), "MU00000001");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  10411   78\t "), "10411 78");
    }

    #[test]
    fn test_clean_cell_full_pipeline() {
        let input = " John\n\u{200B}Doe   \r\n";
        assert_eq!(clean_cell(input), "John Doe");
    }

    #[test]
    fn test_clean_cell_idempotent() {
        let once = clean_cell("  A \n B\u{2060} ");
        assert_eq!(clean_cell(&once), once);
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank(" \n\u{200B} "));
        assert!(!is_blank(" x "));
    }
}
