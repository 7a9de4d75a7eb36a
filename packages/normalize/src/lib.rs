#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Place-name normalization for CRM and gazetteer text.
//!
//! Provides a deterministic normalization pipeline applied symmetrically
//! to CRM place fields and to the reference gazetteer, so that
//! `"Comune di Treviso (TV)"` and `"TREVISO"` produce the same key.
//!
//! The pipeline, in order:
//! 1. Empty input becomes the [`UNSPECIFIED`] sentinel
//! 2. Lowercase and strip diacritics
//! 3. Strip leading administrative/ecclesiastical prefixes
//! 4. Strip punctuation
//! 5. Strip trailing province codes and isolated letters/numbers
//! 6. Remove stopwords
//! 7. Apply phrase substitutions, then known exceptions
//! 8. Collapse whitespace
//! 9. Empty or null-like results become the sentinel
//!
//! Steps 3-8 repeat until the text stops changing, which makes
//! [`Normalizer::normalize`] idempotent.

pub mod tables;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use crm_geocode_matcher_models::config::NormalizerConfig;
use crm_geocode_matcher_models::{NormalizedPlaceKey, RawPlaceReference, UNSPECIFIED};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use tables::{KnownExceptions, NormalizationTables};

/// Regex matching runs of characters that are neither letters, digits
/// nor whitespace.
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid regex"));

/// Upper bound on rule passes. Well-formed tables converge in two.
const MAX_PASSES: usize = 8;

/// The normalizer built from the embedded tables.
static EMBEDDED: LazyLock<Normalizer> = LazyLock::new(|| {
    Normalizer::new(&NormalizationTables::embedded(), &KnownExceptions::embedded())
        .unwrap_or_else(|e| panic!("Failed to build embedded normalizer: {e}"))
});

/// Errors from loading normalization tables.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Table file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Table file is not valid TOML for its schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A prefix could not be compiled into a pattern.
    #[error("Invalid prefix pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A phrase correction, stored as token lists.
#[derive(Debug, Clone)]
struct Substitution {
    phrase: Vec<String>,
    replacement: Vec<String>,
}

/// Compiled normalization rules.
#[derive(Debug, Clone)]
pub struct Normalizer {
    null_tokens: BTreeSet<String>,
    prefix_re: Option<Regex>,
    stopwords: BTreeSet<String>,
    province_codes: BTreeSet<String>,
    /// First token → candidate phrases, longest first.
    substitutions: BTreeMap<String, Vec<Substitution>>,
    exceptions: BTreeMap<String, String>,
}

impl Normalizer {
    /// Compiles a normalizer from its tables.
    ///
    /// Table entries are folded (lowercased, accents stripped) on the way
    /// in, so hand-edited files may use any case.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::Pattern`] if the prefix list cannot be
    /// compiled.
    pub fn new(
        tables: &NormalizationTables,
        exceptions: &KnownExceptions,
    ) -> Result<Self, NormalizeError> {
        let prefix_re = build_prefix_regex(&tables.prefixes)?;

        let mut substitutions: BTreeMap<String, Vec<Substitution>> = BTreeMap::new();
        for (phrase, replacement) in &tables.substitutions {
            let phrase = tokens_of(phrase);
            let Some(first) = phrase.first().cloned() else {
                log::warn!("Ignoring empty substitution key");
                continue;
            };
            substitutions.entry(first).or_default().push(Substitution {
                phrase,
                replacement: tokens_of(replacement),
            });
        }
        for candidates in substitutions.values_mut() {
            candidates.sort_by(|a, b| b.phrase.len().cmp(&a.phrase.len()));
        }

        let exceptions = exceptions
            .exceptions
            .iter()
            .map(|e| (tokens_of(&e.input).join(" "), e.municipality.clone()))
            .collect();

        Ok(Self {
            null_tokens: tables.null_tokens.iter().map(|t| fold(t)).collect(),
            prefix_re,
            stopwords: tables.stopwords.iter().map(|t| fold(t)).collect(),
            province_codes: tables.province_codes.iter().map(|t| fold(t)).collect(),
            substitutions,
            exceptions,
        })
    }

    /// Returns the normalizer built from the embedded tables.
    ///
    /// # Panics
    ///
    /// Panics if the embedded tables are malformed (covered by tests).
    #[must_use]
    pub fn embedded() -> &'static Self {
        &EMBEDDED
    }

    /// Builds a normalizer from the `[normalizer]` settings section,
    /// using the embedded table for any path left unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured table cannot be read or parsed.
    pub fn from_config(config: &NormalizerConfig) -> Result<Self, NormalizeError> {
        let tables = match &config.tables_path {
            Some(path) => {
                log::info!("Loading normalization tables from {path}");
                NormalizationTables::from_path(Path::new(path))?
            }
            None => NormalizationTables::embedded(),
        };
        let exceptions = match &config.exceptions_path {
            Some(path) => {
                log::info!("Loading known exceptions from {path}");
                KnownExceptions::from_path(Path::new(path))?
            }
            None => KnownExceptions::embedded(),
        };
        Self::new(&tables, &exceptions)
    }

    /// Normalizes free text. Never returns an empty string.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        let mut current = fold(raw).split_whitespace().collect::<Vec<_>>().join(" ");

        let mut converged = false;
        for _ in 0..MAX_PASSES {
            let next = self.pass(&current);
            if next == current {
                converged = true;
                break;
            }
            current = next;
        }
        if !converged {
            log::debug!("Normalization of {raw:?} did not converge, using {current:?}");
        }

        if current.is_empty() || self.null_tokens.contains(&current) {
            return UNSPECIFIED.to_string();
        }
        current
    }

    /// Normalizes an optional field; `None` becomes the sentinel.
    #[must_use]
    pub fn normalize_opt(&self, raw: Option<&str>) -> String {
        raw.map_or_else(|| UNSPECIFIED.to_string(), |text| self.normalize(text))
    }

    /// Normalizes a `(place, province)` pair into a lookup key.
    #[must_use]
    pub fn normalize_key(&self, place: Option<&str>, province: Option<&str>) -> NormalizedPlaceKey {
        NormalizedPlaceKey::new(self.normalize_opt(place), self.normalize_opt(province))
    }

    /// Normalizes a CRM place reference into a lookup key.
    #[must_use]
    pub fn normalize_reference(&self, reference: &RawPlaceReference) -> NormalizedPlaceKey {
        self.normalize_key(reference.place.as_deref(), reference.province.as_deref())
    }

    /// One application of steps 3-8. A text that is nothing but a
    /// province code is kept as is: several codes (`al`, `le`, `lo`,
    /// `ss`) double as stopwords or prefixes.
    fn pass(&self, text: &str) -> String {
        if let Some(code) = self.sole_province_code(text) {
            return code;
        }

        let stripped = self.strip_prefixes(text);
        let no_punct = PUNCTUATION_RE.replace_all(&stripped, " ");
        let mut tokens: Vec<&str> = no_punct.split_whitespace().collect();

        while tokens.len() > 1
            && tokens
                .last()
                .is_some_and(|last| self.province_codes.contains(*last))
        {
            tokens.pop();
        }
        tokens.retain(|t| !is_isolated_noise(t));
        tokens.retain(|t| !self.stopwords.contains(*t));

        let joined = self.substitute(&tokens).join(" ");
        match self.exceptions.get(&joined) {
            Some(municipality) => municipality.clone(),
            None => joined,
        }
    }

    /// Returns the code if `text` is a single province-code token.
    fn sole_province_code(&self, text: &str) -> Option<String> {
        let cleaned = PUNCTUATION_RE.replace_all(text, " ");
        let mut tokens = cleaned.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(only), None) if self.province_codes.contains(only) => Some(only.to_string()),
            _ => None,
        }
    }

    /// Strips leading prefixes while one still matches.
    fn strip_prefixes(&self, text: &str) -> String {
        let mut current = text.trim().to_string();
        let Some(re) = &self.prefix_re else {
            return current;
        };
        while let Some(m) = re.find(&current) {
            if m.end() == 0 {
                break;
            }
            current = current[m.end()..].trim_start().to_string();
        }
        current
    }

    /// Replaces phrases word by word, longest phrase first.
    fn substitute(&self, tokens: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let matched = self.substitutions.get(tokens[i]).and_then(|candidates| {
                candidates.iter().find(|sub| {
                    let end = i + sub.phrase.len();
                    end <= tokens.len()
                        && sub
                            .phrase
                            .iter()
                            .zip(&tokens[i..end])
                            .all(|(a, b)| a == b)
                })
            });
            if let Some(sub) = matched {
                out.extend(sub.replacement.iter().cloned());
                i += sub.phrase.len();
            } else {
                out.push(tokens[i].to_string());
                i += 1;
            }
        }
        out
    }
}

/// Normalizes text with the embedded tables.
#[must_use]
pub fn normalize(raw: &str) -> String {
    Normalizer::embedded().normalize(raw)
}

/// Lowercases and strips diacritics (`"Forlì"` → `"forli"`).
#[must_use]
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Folds and splits a table entry into tokens.
fn tokens_of(text: &str) -> Vec<String> {
    fold(text).split_whitespace().map(str::to_string).collect()
}

/// Single characters and bare numbers carry no place information.
fn is_isolated_noise(token: &str) -> bool {
    token.chars().count() == 1 || token.chars().all(|c| c.is_ascii_digit())
}

/// Builds `^(?:prefix|...)` followed by a separator or end of text.
/// Longer prefixes are tried first so `santa` wins over `san`.
fn build_prefix_regex(prefixes: &[String]) -> Result<Option<Regex>, regex::Error> {
    let mut folded: Vec<String> = prefixes
        .iter()
        .map(|p| fold(p).split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect();
    if folded.is_empty() {
        return Ok(None);
    }
    folded.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    folded.dedup();

    let alternatives = folded
        .iter()
        .map(|p| regex::escape(p).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"^(?:{alternatives})(?:\s*[.'’]\s*|\s+|$)")).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comune_prefix() {
        assert_eq!(normalize("Comune di Treviso"), "treviso");
    }

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize("FORLÌ"), "forli");
        assert_eq!(normalize("Cantù"), "cantu");
        assert_eq!(fold("Città"), "citta");
    }

    #[test]
    fn strips_parenthesized_province_code() {
        assert_eq!(normalize("Treviso (TV)"), "treviso");
        assert_eq!(normalize("Montebelluna TV"), "montebelluna");
    }

    #[test]
    fn keeps_bare_province_code() {
        assert_eq!(normalize("TV"), "tv");
        assert_eq!(normalize(" tv "), "tv");
    }

    #[test]
    fn province_codes_shared_with_stopwords_or_prefixes_survive() {
        assert_eq!(normalize("AL"), "al");
        assert_eq!(normalize("(LE)"), "le");
        assert_eq!(normalize("Lo"), "lo");
        assert_eq!(normalize("SS"), "ss");
        // Only a sole token is protected
        assert_eq!(normalize("Comune di Treviso (SS)"), "treviso");
    }

    #[test]
    fn every_embedded_province_code_normalizes_to_itself() {
        let normalizer = Normalizer::embedded();
        for code in NormalizationTables::embedded().province_codes {
            assert_eq!(normalizer.normalize(&code), code);
            assert_eq!(normalizer.normalize(&code.to_uppercase()), code);
        }
    }

    #[test]
    fn strips_isolated_numbers_and_letters() {
        assert_eq!(normalize("Treviso 31100"), "treviso");
        assert_eq!(normalize("Castelfranco V."), "castelfranco");
    }

    #[test]
    fn strips_saint_prefixes_and_stopwords() {
        assert_eq!(normalize("San Donà di Piave"), "dona piave");
        assert_eq!(normalize("S. Donà di Piave"), "dona piave");
        assert_eq!(normalize("Sant'Angelo di Piove"), "angelo piove");
    }

    #[test]
    fn strips_repeated_prefixes() {
        assert_eq!(normalize("Parrocchia San Giovanni XYZ123"), "giovanni xyz123");
        assert_eq!(normalize("Comune di San Vendemiano"), "vendemiano");
    }

    #[test]
    fn applies_substitutions() {
        assert_eq!(normalize("Mestre"), "venezia");
        assert_eq!(normalize("Lido di Venezia"), "venezia");
        assert_eq!(normalize("Bolzano - Bozen"), "bolzano");
        assert_eq!(normalize("Trevisio"), "treviso");
    }

    #[test]
    fn applies_known_exceptions_to_whole_text_only() {
        assert_eq!(normalize("Zanatta"), "treviso");
        assert_eq!(normalize("Zanatta Costruzioni"), "zanatta costruzioni");
    }

    #[test]
    fn empty_and_null_like_inputs_become_sentinel() {
        for input in ["", "   ", "nan", "None", "N/A", "-", "non specificato"] {
            assert_eq!(normalize(input), UNSPECIFIED, "input {input:?}");
        }
    }

    #[test]
    fn prefixes_and_stopwords_alone_become_sentinel() {
        assert_eq!(normalize("Comune di"), UNSPECIFIED);
        assert_eq!(normalize("Parrocchia di San"), UNSPECIFIED);
        assert_eq!(normalize("di la"), UNSPECIFIED);
    }

    #[test]
    fn missing_field_becomes_sentinel() {
        let normalizer = Normalizer::embedded();
        assert_eq!(normalizer.normalize_opt(None), UNSPECIFIED);
        let key = normalizer.normalize_key(None, Some("TV"));
        assert_eq!(key, NormalizedPlaceKey::new(UNSPECIFIED, "tv"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "Comune di Treviso",
            "Treviso (TV)",
            "San Donà di Piave",
            "Parrocchia San Giovanni XYZ123",
            "Lido di Venezia",
            "Reggio nell'Emilia",
            "Sant'Angelo di Piove",
            "di San Marco",
            "Comune di None",
            "Zanatta",
            "",
            "unspecified",
            "TV",
            "Città di Castello",
            "İstanbul",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn embedded_substitutions_are_stable() {
        let normalizer = Normalizer::embedded();
        for canonical in NormalizationTables::embedded().substitutions.values() {
            assert_eq!(
                &normalizer.normalize(canonical),
                canonical,
                "substitution target '{canonical}' is not in normalized form"
            );
        }
    }

    #[test]
    fn embedded_substitution_keys_are_reachable() {
        let tables = NormalizationTables::embedded();
        let stopwords: BTreeSet<String> = tables.stopwords.iter().cloned().collect();
        let codes: BTreeSet<String> = tables.province_codes.iter().cloned().collect();
        for key in tables.substitutions.keys() {
            let tokens: Vec<&str> = key.split_whitespace().collect();
            for token in &tokens {
                assert!(
                    !stopwords.contains(*token) && !is_isolated_noise(token),
                    "substitution key '{key}' contains a token removed before substitution"
                );
            }
            if tokens.len() > 1 {
                assert!(
                    !codes.contains(*tokens.last().unwrap()),
                    "substitution key '{key}' ends with a province code"
                );
            }
        }
    }

    #[test]
    fn embedded_exception_targets_are_stable() {
        let normalizer = Normalizer::embedded();
        for entry in KnownExceptions::embedded().exceptions {
            assert_eq!(normalizer.normalize(&entry.municipality), entry.municipality);
        }
    }

    #[test]
    fn custom_tables_replace_embedded_rules() {
        let tables = NormalizationTables::from_toml_str(
            "prefixes = [\"borgo\"]\nstopwords = [\"sul\"]\n[substitutions]\n\"vecchio\" = \"nuovo\"\n",
        )
        .unwrap();
        let normalizer = Normalizer::new(&tables, &KnownExceptions::default()).unwrap();
        assert_eq!(normalizer.normalize("Borgo Vecchio sul Mare"), "nuovo mare");
        // "comune di" is not a prefix in these tables, only "di" is kept
        assert_eq!(normalizer.normalize("Comune di Treviso"), "comune di treviso");
    }
}
