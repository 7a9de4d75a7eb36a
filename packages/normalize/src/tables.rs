//! Externalized normalization tables.
//!
//! The tables ship embedded in the binary (`tables/*.toml`) and can be
//! replaced at runtime by files named in the `[normalizer]` settings
//! section, so corrections can be edited without a rebuild.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::NormalizeError;

/// Embedded prefix, stopword, province-code and substitution tables.
const NORMALIZATION_TOML: &str = include_str!("../tables/normalization.toml");

/// Embedded known-exception table.
const KNOWN_EXCEPTIONS_TOML: &str = include_str!("../tables/known_exceptions.toml");

/// General normalization rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizationTables {
    /// Whole results that mean "nothing was typed".
    #[serde(default)]
    pub null_tokens: Vec<String>,
    /// Administrative and ecclesiastical prefixes.
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Prepositions and articles removed as whole words.
    #[serde(default)]
    pub stopwords: Vec<String>,
    /// Two-letter province codes stripped from the end of the text.
    #[serde(default)]
    pub province_codes: Vec<String>,
    /// Phrase to canonical-form corrections.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
}

impl NormalizationTables {
    /// Parses tables from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::Toml`] if the text is not a valid table
    /// file.
    pub fn from_toml_str(text: &str) -> Result<Self, NormalizeError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads tables from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::Io`] if the file cannot be read or
    /// [`NormalizeError::Toml`] if it cannot be parsed.
    pub fn from_path(path: &Path) -> Result<Self, NormalizeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Returns the tables compiled into the binary.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed (covered by tests).
    #[must_use]
    pub fn embedded() -> Self {
        Self::from_toml_str(NORMALIZATION_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded normalization.toml: {e}"))
    }
}

/// A value typed into the place field that is not a place name but was
/// traced to a municipality.
#[derive(Debug, Clone, Deserialize)]
pub struct KnownException {
    /// Fully normalized input text.
    pub input: String,
    /// Normalized municipality the input stands for.
    pub municipality: String,
    /// Why the entry exists.
    pub reason: String,
}

/// The known-exception table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnownExceptions {
    /// All exceptions.
    #[serde(default)]
    pub exceptions: Vec<KnownException>,
}

impl KnownExceptions {
    /// Parses exceptions from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::Toml`] if the text cannot be parsed.
    pub fn from_toml_str(text: &str) -> Result<Self, NormalizeError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads exceptions from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::Io`] if the file cannot be read or
    /// [`NormalizeError::Toml`] if it cannot be parsed.
    pub fn from_path(path: &Path) -> Result<Self, NormalizeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Returns the exceptions compiled into the binary.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed (covered by tests).
    #[must_use]
    pub fn embedded() -> Self {
        Self::from_toml_str(KNOWN_EXCEPTIONS_TOML)
            .unwrap_or_else(|e| panic!("Failed to parse embedded known_exceptions.toml: {e}"))
    }
}
