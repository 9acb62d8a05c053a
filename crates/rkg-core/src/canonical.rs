//! Concept name canonicalization.
//!
//! A canonical name is the input trimmed, with internal whitespace collapsed to single
//! spaces and the first letter of every word uppercased. Remaining letters are preserved,
//! so acronyms ("GNN") and mixed-case product names ("PyTorch") display unchanged.
//!
//! Identity is decided by [`concept_key`], the case-folded canonical form: "GNN", "gnn"
//! and "Gnn" are one concept. Plural and abbreviation variants are not folded here.

/// Canonicalize a raw concept name. Returns an empty string for blank input.
pub fn canonical_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-folded lookup key. Two names denote the same concept iff their keys are equal.
pub fn concept_key(raw: &str) -> String {
    canonical_name(raw).to_lowercase()
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split a name like `Graph Neural Network (GNN)` into its base name and the
/// parenthetical alias. Names without a trailing parenthetical are returned as-is.
pub fn split_parenthetical(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();
    if let (Some(open), true) = (trimmed.rfind('('), trimmed.ends_with(')')) {
        let base = trimmed[..open].trim();
        let inner = trimmed[open + 1..trimmed.len() - 1].trim();
        if !base.is_empty() && !inner.is_empty() {
            return (canonical_name(base), Some(canonical_name(inner)));
        }
    }
    (canonical_name(trimmed), None)
}
