// src/matching/normalize.rs

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Legal-entity and generic business suffix words removed from business names.
static BUSINESS_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(llc|pllc|llp|lp|inc|incorporated|corp|corporation|co|company|ltd|limited|plc|holdings|group|enterprises|services|solutions)\b",
    )
    .expect("business suffix pattern is valid")
});

static NON_ALPHANUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("non-alphanumeric pattern is valid"));

/// Punctuation that joins the surrounding letters instead of splitting them ("l.l.c", "joe's").
static JOINING_PUNCTUATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.'’]").expect("joining punctuation pattern is valid"));

pub const MIN_TOKEN_LENGTH: usize = 3;

pub const STOPWORDS: [&str; 40] = [
    "the", "and", "for", "with", "from", "into", "onto", "over", "under", "near", "this", "that",
    "these", "those", "are", "was", "were", "has", "have", "had", "its", "our", "your", "their",
    "you", "all", "any", "business", "businesses", "sale", "sold", "selling", "listing",
    "opportunity", "available", "established", "located", "owner", "price", "reduced",
];

static STOPWORD_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| STOPWORDS.iter().copied().collect());

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cases, folds every run of non-alphanumeric characters to one space and trims.
///
/// Output is ASCII-only: letters outside `a-z` (accented or non-Latin) are treated
/// as separators, so "Café" becomes "caf".
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let joined = JOINING_PUNCTUATION_RE.replace_all(&lowered, "");
    collapse_whitespace(&NON_ALPHANUMERIC_RE.replace_all(&joined, " "))
}

/// Canonical business name: lower-case, entity suffixes removed, no punctuation.
pub fn normalize_business_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let joined = JOINING_PUNCTUATION_RE.replace_all(&lowered, "");
    let folded = NON_ALPHANUMERIC_RE.replace_all(&joined, " ");
    let stripped = BUSINESS_SUFFIX_RE.replace_all(&folded, " ");
    collapse_whitespace(&stripped)
}

/// Significant tokens of a title or description.
pub fn tokenize(text: &str) -> HashSet<String> {
    normalize_text(text)
        .split_whitespace()
        .filter(|token| token.len() >= MIN_TOKEN_LENGTH && !STOPWORD_SET.contains(token))
        .map(str::to_string)
        .collect()
}

pub fn normalize_state(state: &str) -> String {
    state.trim().to_lowercase()
}

/// Five-digit zip prefix, so "80202-1234" and "80202" share a block.
pub fn normalize_zip(zip: &str) -> String {
    zip.trim().chars().take(5).collect()
}

/// Optional-field helper: normalized value or `None` when nothing is left.
pub fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_name_suffix_stripping() {
        assert_eq!(normalize_business_name("Denver Electrical Co."), "denver electrical");
        assert_eq!(normalize_business_name("Denver Electrical Company"), "denver electrical");
        assert_eq!(normalize_business_name("ACME Holdings, L.L.C."), "acme");
        assert_eq!(normalize_business_name("Joe's Pizza,  Inc"), "joes pizza");
        assert_eq!(
            normalize_business_name("Rocky Mountain Solutions Group"),
            "rocky mountain"
        );
        // Suffix words only match on word boundaries.
        assert_eq!(normalize_business_name("Cobalt Incline Fitness"), "cobalt incline fitness");
    }

    #[test]
    fn test_normalize_text_folds_punctuation() {
        assert_eq!(
            normalize_text("Denver Electrical Company — For Sale!"),
            "denver electrical company for sale"
        );
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_tokenize_filters_short_and_stop_words() {
        let tokens = tokenize("Profitable HVAC Business for Sale in Denver, CO");
        let expected: HashSet<String> = ["profitable", "hvac", "denver"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
        assert!(tokenize("a an of to").is_empty());
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let input = "Sunrise Bakery & Café, LLC";
        assert_eq!(normalize_business_name(input), normalize_business_name(input));
        assert_eq!(tokenize(input), tokenize(input));
    }

    #[test]
    fn test_non_ascii_letters_act_as_separators() {
        assert_eq!(normalize_text("Café Olé"), "caf ol");
        assert_eq!(normalize_business_name("Müller Bäckerei GmbH"), "m ller b ckerei gmbh");
    }

    #[test]
    fn test_zip_and_state() {
        assert_eq!(normalize_zip(" 80202-1234 "), "80202");
        assert_eq!(normalize_state(" CO "), "co");
        assert_eq!(non_empty(String::new()), None);
    }
}
