// src/matching/similarity.rs
//
// Field-level similarity functions. All of them are pure, symmetric and return a value in [0, 1].

use std::collections::HashSet;

use crate::matching::normalize::tokenize;

const WINKLER_SCALING_FACTOR: f64 = 0.1;
const WINKLER_MAX_PREFIX: usize = 4;

fn jaro_chars(s1: &[char], s2: &[char]) -> f64 {
    let len1 = s1.len();
    let len2 = s2.len();
    if len1 == 0 || len2 == 0 {
        return 0.0;
    }
    if s1 == s2 {
        return 1.0;
    }

    // Match window: floor(max(len1, len2) / 2) - 1
    let window = (len1.max(len2) / 2).saturating_sub(1);

    let mut s1_matched = vec![false; len1];
    let mut s2_matched = vec![false; len2];
    let mut matches = 0usize;

    for i in 0..len1 {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(len2);
        for j in start..end {
            if s2_matched[j] || s1[i] != s2[j] {
                continue;
            }
            s1_matched[i] = true;
            s2_matched[j] = true;
            matches += 1;
            break;
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut half_transpositions = 0usize;
    let mut k = 0usize;
    for i in 0..len1 {
        if !s1_matched[i] {
            continue;
        }
        while !s2_matched[k] {
            k += 1;
        }
        if s1[i] != s2[k] {
            half_transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let t = half_transpositions as f64 / 2.0;
    (m / len1 as f64 + m / len2 as f64 + (m - t) / m) / 3.0
}

/// Orders the arguments so greedy matching sees the same pair regardless of call order.
fn ordered<'a>(s1: &'a str, s2: &'a str) -> (Vec<char>, Vec<char>) {
    let (a, b) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
    (a.chars().collect(), b.chars().collect())
}

/// Jaro similarity. 0.0 when either string is empty or nothing matches.
pub fn jaro(s1: &str, s2: &str) -> f64 {
    let (a, b) = ordered(s1, s2);
    jaro_chars(&a, &b)
}

/// Jaro similarity boosted by up to four leading characters in common,
/// each adding `0.1 * (1 - jaro)`.
pub fn jaro_winkler(s1: &str, s2: &str) -> f64 {
    let (a, b) = ordered(s1, s2);
    let jaro = jaro_chars(&a, &b);
    if jaro == 0.0 {
        return 0.0;
    }
    let prefix = a
        .iter()
        .zip(b.iter())
        .take(WINKLER_MAX_PREFIX)
        .take_while(|(c1, c2)| c1 == c2)
        .count();
    (jaro + prefix as f64 * WINKLER_SCALING_FACTOR * (1.0 - jaro)).min(1.0)
}

/// Jaccard similarity of two token sets. 0.0 when either set is empty.
pub fn jaccard(tokens1: &HashSet<String>, tokens2: &HashSet<String>) -> f64 {
    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }
    let intersection = tokens1.intersection(tokens2).count();
    let union = tokens1.len() + tokens2.len() - intersection;
    intersection as f64 / union as f64
}

/// Jaccard similarity of the significant tokens of two texts.
pub fn token_overlap(text1: &str, text2: &str) -> f64 {
    jaccard(&tokenize(text1), &tokenize(text2))
}

/// 1.0 when the relative difference `|a-b| / mean(|a|, |b|)` is within `tolerance`.
/// Missing or zero values never match.
pub fn numeric_match(a: Option<f64>, b: Option<f64>, tolerance: f64) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if a != 0.0 && b != 0.0 && a.is_finite() && b.is_finite() => {
            if relative_gap(a, b) <= tolerance {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Relative difference of two amounts against their mean magnitude.
pub fn relative_gap(a: f64, b: f64) -> f64 {
    let mean = (a.abs() + b.abs()) / 2.0;
    if mean == 0.0 {
        return 0.0;
    }
    (a - b).abs() / mean
}

/// Case-insensitive equality of two trimmed, non-empty values.
pub fn exact_match(a: Option<&str>, b: Option<&str>) -> f64 {
    match (a.map(str::trim), b.map(str::trim)) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
            if a.to_lowercase() == b.to_lowercase() {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_jaro_reference_values() {
        assert!(approx(jaro("MARTHA", "MARHTA"), 0.944));
        assert!(approx(jaro("DIXON", "DICKSONX"), 0.767));
        assert!(approx(jaro("JELLYFISH", "SMELLYFISH"), 0.896));
    }

    #[test]
    fn test_jaro_winkler_reference_values() {
        assert!(approx(jaro_winkler("MARTHA", "MARHTA"), 0.961));
        assert!(approx(jaro_winkler("DIXON", "DICKSONX"), 0.813));
        assert!(approx(jaro_winkler("DWAYNE", "DUANE"), 0.840));
    }

    #[test]
    fn test_jaro_winkler_identity_and_empty() {
        for s in ["a", "denver electrical", "Ωmega", "hvac service"] {
            assert_eq!(jaro_winkler(s, s), 1.0);
        }
        assert_eq!(jaro_winkler("", "abc"), 0.0);
        assert_eq!(jaro_winkler("abc", ""), 0.0);
        assert_eq!(jaro_winkler("", ""), 0.0);
        assert_eq!(jaro_winkler("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_jaro_winkler_is_symmetric() {
        let samples = [
            "denver electrical co for sale",
            "denver electrical company for sale",
            "boulder plumbing",
            "crabtree",
            "abcab",
            "bacba",
        ];
        for a in samples {
            for b in samples {
                assert_eq!(jaro_winkler(a, b), jaro_winkler(b, a), "{} / {}", a, b);
            }
        }
    }

    #[test]
    fn test_token_overlap() {
        assert!(approx(
            token_overlap("Denver HVAC contractor", "HVAC contractor Denver metro"),
            0.75
        ));
        assert_eq!(token_overlap("", "hvac"), 0.0);
        assert_eq!(token_overlap("for sale", "business for sale"), 0.0);
    }

    #[test]
    fn test_numeric_match_tolerance() {
        assert_eq!(numeric_match(Some(500_000.0), Some(510_000.0), 0.05), 1.0);
        assert_eq!(numeric_match(Some(500_000.0), Some(600_000.0), 0.05), 0.0);
        assert_eq!(numeric_match(Some(100.0), Some(109.0), 0.10), 1.0);
        assert_eq!(numeric_match(None, Some(1.0), 0.10), 0.0);
        assert_eq!(numeric_match(Some(0.0), Some(0.0), 0.10), 0.0);
        assert_eq!(
            numeric_match(Some(510_000.0), Some(500_000.0), 0.05),
            numeric_match(Some(500_000.0), Some(510_000.0), 0.05)
        );
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(exact_match(Some("Denver"), Some(" denver ")), 1.0);
        assert_eq!(exact_match(Some("Denver"), Some("Boulder")), 0.0);
        assert_eq!(exact_match(Some(""), Some("")), 0.0);
        assert_eq!(exact_match(None, Some("Denver")), 0.0);
    }
}
