//! Small text helpers shared by the expander, classifier, and scorer.
//!
//! Everything here works on lowercase text and treats any
//! non-alphanumeric character as a word separator.

/// Words ignored when picking the "major" words of a query.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does",
    "for", "from", "get", "how", "i", "in", "into", "is", "it", "of", "on",
    "or", "the", "to", "use", "using", "what", "when", "where", "which",
    "why", "with",
];

/// Lowercase, trim, and collapse runs of whitespace to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split into lowercase alphanumeric tokens.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Query tokens longer than two characters that are not stop words.
pub fn major_words(query: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens(query) {
        if token.chars().count() > 2
            && !STOP_WORDS.contains(&token.as_str())
            && !out.contains(&token)
        {
            out.push(token);
        }
    }
    out
}

/// Replace punctuation with spaces and collapse whitespace.
pub fn strip_punctuation(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    normalize(&replaced)
}

/// Join the whitespace-separated words of `text` with hyphens.
pub fn hyphenate(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Whether `needle` occurs in `haystack` on word boundaries.
///
/// Both arguments are expected to be lowercase already. An empty needle
/// never matches.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = haystack[..begin]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        // Advance by one character, not one byte.
        start = begin
            + haystack[begin..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Smart   Table\t"), "smart table");
    }

    #[test]
    fn tokens_split_on_punctuation() {
        assert_eq!(tokens("sap.m.Button"), vec!["sap", "m", "button"]);
        assert_eq!(tokens("LOOP AT itab"), vec!["loop", "at", "itab"]);
    }

    #[test]
    fn major_words_drop_short_and_stop_words() {
        assert_eq!(
            major_words("how to use the Wizard in UI5"),
            vec!["wizard", "ui5"]
        );
    }

    #[test]
    fn major_words_are_unique() {
        assert_eq!(major_words("table table"), vec!["table"]);
    }

    #[test]
    fn strip_punctuation_keeps_words() {
        assert_eq!(strip_punctuation("sap.m.Table!"), "sap m table");
    }

    #[test]
    fn hyphenate_joins_words() {
        assert_eq!(hyphenate("smart table"), "smart-table");
    }

    #[test]
    fn contains_phrase_respects_word_boundaries() {
        assert!(contains_phrase("the ui toolkit", "ui"));
        assert!(!contains_phrase("build guide", "ui"));
        assert!(contains_phrase("ui", "ui"));
        assert!(contains_phrase("guide, ui.", "ui"));
    }

    #[test]
    fn contains_phrase_finds_later_occurrence() {
        assert!(contains_phrase("guide ui", "ui"));
    }

    #[test]
    fn contains_phrase_empty_needle() {
        assert!(!contains_phrase("anything", ""));
    }
}
