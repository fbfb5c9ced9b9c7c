//! Utilities shared by pack implementations: tokenization, keyword overlap,
//! reference extraction, and evidence construction.

use crate::schemas::{Evidence, EvidenceType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
        "by", "from", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might",
        "must", "shall", "can", "need", "this", "that", "these", "those", "it", "its",
        "as", "per", "all",
    ]
    .into_iter()
    .collect()
});

static DRAWING_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{1,3}[-/]?\d{2,4}(?:[-/][A-Z]?\d{1,3})?)\b").unwrap());
static SPEC_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Section|Spec|Specification)\s*(\d{5})\b").unwrap());
static CLAUSE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Clause|Article|Section)\s*(\d+(?:\.\d+)*)\b").unwrap());
static SECTION_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Section|Part)\s*(\d+(?:\.\d+)*)\b").unwrap());

/// Lowercased, stopword-filtered tokens of minimum length 2.
pub fn tokenize(text: &str) -> HashSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() >= 2 && !STOPWORDS.contains(w.as_str()))
        .collect()
}

/// Keyword overlap between two texts: Jaccard similarity, blended with a
/// domain-keyword hit rate when a keyword set is supplied (domain weighted
/// higher). Returns the score and up to ten matched keywords.
pub fn keyword_match(
    source_text: &str,
    target_text: &str,
    domain_keywords: Option<&HashSet<String>>,
) -> (f64, Vec<String>) {
    let source_words = tokenize(source_text);
    let target_words = tokenize(target_text);
    if source_words.is_empty() || target_words.is_empty() {
        return (0.0, Vec::new());
    }

    let common: HashSet<&String> = source_words.intersection(&target_words).collect();
    let union_len = source_words.union(&target_words).count();
    let jaccard = if union_len == 0 {
        0.0
    } else {
        common.len() as f64 / union_len as f64
    };

    let (score, matched) = match domain_keywords {
        Some(keywords) if !keywords.is_empty() => {
            let domain_matches: Vec<String> = common
                .iter()
                .filter(|w| keywords.contains(w.as_str()))
                .map(|w| w.to_string())
                .collect();
            let domain_weight = domain_matches.len() as f64 / keywords.len() as f64;
            let matched = if domain_matches.is_empty() {
                common.iter().map(|w| w.to_string()).collect()
            } else {
                domain_matches
            };
            ((jaccard * 0.4) + (domain_weight * 0.6), matched)
        }
        _ => (jaccard, common.iter().map(|w| w.to_string()).collect()),
    };

    let mut matched: Vec<String> = matched;
    matched.sort();
    matched.truncate(10);
    (score.min(1.0), matched)
}

/// Extract codes matching `pattern` (first capture group, or whole match).
pub fn extract_codes(text: &str, pattern: &str) -> Vec<String> {
    let regex = match Regex::new(&format!("(?i){pattern}")) {
        Ok(regex) => regex,
        Err(err) => {
            warn!(target: "warden::ule", pattern, error = %err, "invalid code pattern");
            return Vec::new();
        }
    };
    regex
        .captures_iter(text)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        })
        .filter(|code| !code.is_empty())
        .collect()
}

/// Common reference families pulled from free text.
pub fn extract_references(text: &str) -> BTreeMap<&'static str, Vec<String>> {
    let mut refs = BTreeMap::new();
    refs.insert(
        "drawing",
        DRAWING_REF
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
    );
    refs.insert(
        "specification",
        SPEC_REF
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
    );
    refs.insert(
        "clause",
        CLAUSE_REF
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
    );
    refs.insert(
        "section",
        SECTION_REF
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
    );
    refs
}

/// Evidence constructor shared by packs.
pub fn build_evidence(
    evidence_type: EvidenceType,
    value: serde_json::Value,
    weight: f64,
    source_text: Option<&str>,
    target_text: Option<&str>,
) -> Evidence {
    Evidence {
        evidence_type,
        value,
        weight,
        source_text: source_text.map(str::to_string),
        target_text: target_text.map(str::to_string),
        metadata: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_filters_stopwords_and_short_words() {
        let tokens = tokenize("Supply and pour of the concrete to slab S1");
        assert!(tokens.contains("concrete"));
        assert!(tokens.contains("slab"));
        assert!(tokens.contains("s1"));
        assert!(!tokens.contains("of"));
        assert!(!tokens.contains("a"));
    }

    #[test]
    fn keyword_match_prefers_domain_hits() {
        let keywords: HashSet<String> =
            ["concrete".to_string(), "rebar".to_string()].into_iter().collect();
        let (with_domain, matched) = keyword_match(
            "supply concrete grade 40",
            "concrete works for columns",
            Some(&keywords),
        );
        let (plain, _) = keyword_match(
            "supply concrete grade 40",
            "concrete works for columns",
            None,
        );
        assert!(with_domain > plain);
        assert!(matched.contains(&"concrete".to_string()));
    }

    #[test]
    fn keyword_match_of_disjoint_texts_is_zero() {
        let (score, matched) = keyword_match("alpha bravo", "charlie delta", None);
        assert_eq!(score, 0.0);
        assert!(matched.is_empty());
    }

    #[test]
    fn references_find_drawings_specs_and_clauses() {
        let text = "Refer to DWG-001 and Section 03300, per Clause 4.1.2";
        let refs = extract_references(text);
        assert!(refs["drawing"].contains(&"DWG-001".to_string()));
        assert!(refs["specification"].contains(&"03300".to_string()));
        assert!(refs["clause"].iter().any(|c| c == "4.1.2"));
    }

    #[test]
    fn extract_codes_tolerates_invalid_patterns() {
        assert!(extract_codes("anything", r"([unclosed").is_empty());
        let codes = extract_codes("items CC-1001 and CC-2002", r"\b(CC-\d{4})\b");
        assert_eq!(codes, vec!["CC-1001", "CC-2002"]);
    }
}
