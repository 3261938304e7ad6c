use std::collections::HashSet;

/// Maximum number of characters shown for a text preview in terminal output.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 160;

/// Split text into lowercase alphanumeric tokens of at least two characters.
///
/// # Examples
///
/// ```
/// use pagebert::text_util::tokenize;
///
/// assert_eq!(tokenize("Q3 revenue-growth, a"), vec!["q3", "revenue", "growth"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Query tokens that also occur in `text`, deduplicated, in query order.
pub fn highlights(query: &str, text: &str) -> Vec<String> {
    let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let mut seen = HashSet::new();

    tokenize(query)
        .into_iter()
        .filter(|t| text_tokens.contains(t) && seen.insert(t.clone()))
        .collect()
}

/// Shorten `text` to at most `max_chars` characters on a char boundary,
/// appending `...` when anything was cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flattened.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flattened[..cut]),
        None => flattened,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_punctuation_and_short_tokens() {
        assert_eq!(
            tokenize("The quarterly-revenue (Q3) grew 5%!"),
            vec!["the", "quarterly", "revenue", "q3", "grew"]
        );
        assert!(tokenize("  ,. ").is_empty());
    }

    #[test]
    fn highlights_follow_query_order_without_duplicates() {
        let text = "Growth in revenue was strong. Revenue growth beat targets.";
        assert_eq!(
            highlights("quarterly revenue growth revenue", text),
            vec!["revenue", "growth"]
        );
    }

    #[test]
    fn highlights_are_case_insensitive() {
        assert_eq!(highlights("EBITDA", "ebitda margin"), vec!["ebitda"]);
        assert!(highlights("pasta", "gardening tips").is_empty());
    }

    #[test]
    fn truncate_preview_respects_char_boundaries() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("ééééé", 3), "ééé...");
        assert_eq!(truncate_preview("a\n  b", 10), "a b");
    }
}
