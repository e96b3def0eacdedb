// TableSleuth - core/text.rs
//
// Text helpers shared by normalization, search and reconciliation.
// Core layer: pure functions.

use unicode_normalization::UnicodeNormalization;

/// The one normalisation applied to project names and reference names
/// before they are compared.
///
/// - NFKC folding: full-width Latin letters, digits and punctuation become
///   half-width (`ＡＩ` -> `AI`, `（` -> `(`), half-width katakana becomes
///   full-width.
/// - Whitespace runs (including U+3000 ideographic space) collapse to a
///   single ASCII space; leading and trailing whitespace is dropped.
///
/// Case is preserved: official project names are case-stable and the
/// reference list is copied from the same system.
pub fn normalize_name(s: &str) -> String {
    let folded: String = s.nfkc().collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Width-fold and trim a key cell (`　１２３　` -> `123`).
pub fn fold_key_text(s: &str) -> String {
    let folded: String = s.nfkc().collect();
    folded.trim().to_string()
}

/// True when the byte range `start..end` of `text` has no alphanumeric
/// character immediately before or after it.
///
/// Alphanumeric is Unicode-wide: kanji and kana count, so `生成AIを` does
/// not contain an isolated `AI`, while `AI、` and `(AI)` do.
pub fn is_isolated(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

/// Up to `max_chars` characters of `text` around the byte range
/// `start..end`, split as evenly as the text allows on either side.
///
/// The matched range is always included whole, even when it alone is longer
/// than `max_chars`.
pub fn excerpt_around(text: &str, start: usize, end: usize, max_chars: usize) -> String {
    let spare = max_chars.saturating_sub(text[start..end].chars().count());
    let before_avail = text[..start].chars().count();
    let after_avail = text[end..].chars().count();

    let after = (spare - (spare / 2).min(before_avail)).min(after_avail);
    let before = (spare - after).min(before_avail);

    let from = text[..start]
        .char_indices()
        .nth(before_avail - before)
        .map_or(start, |(idx, _)| idx);
    let to = text[end..]
        .char_indices()
        .nth(after)
        .map_or(text.len(), |(idx, _)| end + idx);
    text[from..to].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_width_and_whitespace() {
        assert_eq!(normalize_name("  ＡＩ　基盤  整備 "), "AI 基盤 整備");
        assert_eq!(normalize_name("事業（令和６年度）"), "事業(令和6年度)");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_name("ＤＸ推進　事業");
        assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn test_fold_key_text() {
        assert_eq!(fold_key_text(" １２３４ "), "1234");
    }

    #[test]
    fn test_isolated_rejects_kanji_neighbours() {
        let text = "生成AIを活用";
        let start = text.find("AI").unwrap();
        assert!(!is_isolated(text, start, start + 2));
    }

    #[test]
    fn test_isolated_accepts_punctuation_neighbours() {
        let text = "（AI）の導入";
        let start = text.find("AI").unwrap();
        assert!(is_isolated(text, start, start + 2));
        assert!(is_isolated("AI", 0, 2));
    }

    #[test]
    fn test_isolated_rejects_latin_neighbours() {
        assert!(!is_isolated("email", 1, 3));
    }

    #[test]
    fn test_excerpt_centres_on_late_match() {
        let text = format!("{}AI{}", "あ".repeat(400), "い".repeat(5));
        let start = text.find("AI").unwrap();
        let out = excerpt_around(&text, start, start + 2, 20);
        assert_eq!(out.chars().count(), 20);
        assert_eq!(out, format!("{}AI{}", "あ".repeat(13), "い".repeat(5)));
    }

    #[test]
    fn test_excerpt_short_text_is_whole() {
        let text = "人工知能AI";
        let start = text.find("AI").unwrap();
        assert_eq!(excerpt_around(text, start, start + 2, 300), text);
        assert_eq!(excerpt_around("AI", 0, 2, 1), "AI");
    }

    #[test]
    fn test_excerpt_splits_evenly() {
        let text = "一二三四五AI六七八九十";
        let start = text.find("AI").unwrap();
        assert_eq!(excerpt_around(text, start, start + 2, 6), "四五AI六七");
    }
}
