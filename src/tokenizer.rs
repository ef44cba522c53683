/// Deterministic text -> token-sequence normalization shared by the index
/// and query paths (§4.2). A pure function: same `(text, options)` always
/// yields the same token sequence, on any platform.
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct TokenizerOptions {
    pub min_token_length: usize,
    pub stopwords: &'static HashSet<&'static str>,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            min_token_length: 2,
            stopwords: stopwords(),
        }
    }
}

/// Normalize `text` into lowercase, space-separated words: underscore/hyphen
/// runs become a single space, camelCase and letter<->digit boundaries are
/// split, and anything outside `[a-z0-9]` collapses to a single space.
///
/// Known limitation (preserved, not a bug): non-ASCII input — including CJK
/// — normalizes to an empty string, because step 5 strips everything
/// outside `[a-z0-9]`.
pub fn normalize(text: &str) -> String {
    // Step 1: underscore/hyphen runs -> single space.
    let mut s = String::with_capacity(text.len());
    let mut prev_was_sep = false;
    for c in text.chars() {
        if c == '_' || c == '-' {
            if !prev_was_sep {
                s.push(' ');
            }
            prev_was_sep = true;
        } else {
            s.push(c);
            prev_was_sep = false;
        }
    }

    // Steps 2-3: insert a boundary space at camelCase and letter<->digit
    // transitions, in both directions.
    let chars: Vec<char> = s.chars().collect();
    let mut boundaried = String::with_capacity(chars.len() + 16);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 {
            let prev = chars[i - 1];
            let camel_split = (prev.is_lowercase() || prev.is_ascii_digit()) && c.is_uppercase();
            let letter_to_digit = prev.is_alphabetic() && c.is_ascii_digit();
            let digit_to_letter = prev.is_ascii_digit() && c.is_alphabetic();
            if camel_split || letter_to_digit || digit_to_letter {
                boundaried.push(' ');
            }
        }
        boundaried.push(c);
    }

    // Step 4: lowercase.
    let lowered = boundaried.to_lowercase();

    // Step 5: collapse any run outside [a-z0-9] to a single space.
    let mut collapsed = String::with_capacity(lowered.len());
    let mut in_run = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            collapsed.push(c);
            in_run = false;
        } else if !in_run {
            collapsed.push(' ');
            in_run = true;
        }
    }

    // Step 6: trim.
    collapsed.trim().to_string()
}

/// Normalized text with all internal spaces removed. Used only for
/// exact/prefix name-boost comparisons, never for tokenization.
pub fn normalize_for_match(text: &str) -> String {
    normalize(text).chars().filter(|c| !c.is_whitespace()).collect()
}

/// Tokenize `text` with the given options: normalize, split on whitespace,
/// drop tokens shorter than `min_token_length` and tokens in `stopwords`.
pub fn tokenize_with(text: &str, options: &TokenizerOptions) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|t| t.len() >= options.min_token_length && !options.stopwords.contains(t))
        .map(|t| t.to_string())
        .collect()
}

pub fn tokenize(text: &str) -> Vec<String> {
    tokenize_with(text, &TokenizerOptions::default())
}

fn stopwords() -> &'static HashSet<&'static str> {
    static STOPWORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOPWORDS.get_or_init(|| {
        [
            "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has",
            "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "can",
            "shall", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into",
            "through", "during", "before", "after", "above", "below", "between", "under",
            "again", "further", "then", "once", "here", "there", "when", "where", "why", "how",
            "all", "each", "every", "both", "few", "more", "most", "other", "some", "such", "no",
            "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just", "or", "and",
            "but", "if", "it", "its", "this", "that", "these", "those", "me", "my", "we", "our",
            "you", "your", "he", "him", "his", "she", "her", "they", "them", "their", "what",
            "which", "who", "whom", "am", "off", "out", "up", "down", "about", "over",
        ]
        .iter()
        .copied()
        .collect()
    })
}
