//! String-similarity scorers on a 0-100 scale.
//!
//! All four build on the normalized indel similarity from `rapidfuzz`.
//! The token scorers split on whitespace, which is safe because inputs
//! are already normalized.

use std::collections::BTreeSet;

use crm_geocode_matcher_models::Scorer;

/// Plain similarity of two strings.
#[must_use]
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    rapidfuzz::fuzz::ratio(a.chars(), b.chars()) * 100.0
}

/// Best similarity of the shorter string against every window of the
/// longer string with the same length.
#[must_use]
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if shorter.is_empty() {
        return 0.0;
    }

    let mut best = 0.0_f64;
    for window in longer.windows(shorter.len()) {
        let score =
            rapidfuzz::fuzz::ratio(shorter.iter().copied(), window.iter().copied()) * 100.0;
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

/// Similarity after sorting each side's tokens.
#[must_use]
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Similarity built from the shared token set and each side's leftover
/// tokens. Scores 100 when one side's tokens are a subset of the other's.
#[must_use]
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let shared = join(tokens_a.intersection(&tokens_b));
    let only_a = join(tokens_a.difference(&tokens_b));
    let only_b = join(tokens_b.difference(&tokens_a));

    let combined_a = join_nonempty(&shared, &only_a);
    let combined_b = join_nonempty(&shared, &only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !shared.is_empty() {
        best = best
            .max(ratio(&shared, &combined_a))
            .max(ratio(&shared, &combined_b));
    }
    best
}

/// Dispatches to the scorer's function.
#[must_use]
pub fn score(scorer: Scorer, a: &str, b: &str) -> f64 {
    match scorer {
        Scorer::TokenSort => token_sort_ratio(a, b),
        Scorer::TokenSet => token_set_ratio(a, b),
        Scorer::Partial => partial_ratio(a, b),
        Scorer::Ratio => ratio(a, b),
    }
}

/// Highest-scoring candidate, first in order on ties.
#[must_use]
pub fn best_match<'a>(
    scorer: Scorer,
    query: &str,
    candidates: &'a [String],
) -> Option<(&'a str, f64)> {
    let mut best: Option<(&'a str, f64)> = None;
    for candidate in candidates {
        let s = score(scorer, query, candidate);
        if best.is_none_or(|(_, top)| s > top) {
            best = Some((candidate.as_str(), s));
        }
    }
    best
}

/// Rounds a 0-100 score for use in a tag.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn round_score(score: f64) -> u8 {
    score.round().clamp(0.0, 100.0) as u8
}

fn sorted_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join<'a, 'b: 'a>(tokens: impl Iterator<Item = &'a &'b str>) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}
