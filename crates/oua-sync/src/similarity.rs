//! String similarity primitives used by the matcher and backfill passes.

use std::collections::HashSet;

use oua_adapters::normalize::collapse_alnum;

/// Jaccard similarity of the normalized token sets. Two blank inputs score 1.
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let a = collapse_alnum(a);
    let b = collapse_alnum(b);
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / union as f64
}

/// `1 - distance / longer length`, over chars. Two empty inputs score 1.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64
}
