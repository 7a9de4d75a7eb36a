#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Settings loading for the geocoding toolchain.
//!
//! Settings come from one TOML file. The defaults are embedded at
//! compile time; a file given with `--config` or named by
//! `CRM_GEOCODE_CONFIG` replaces them, with any missing key falling back
//! to its default. Connector credentials are read from the environment
//! (`BITRIX_BI_URL`, `BITRIX_BI_TOKEN`), after loading `.env` if present.

pub mod paths;

use std::fmt;
use std::path::{Path, PathBuf};

use crm_geocode_matcher_models::config::Settings;

/// Environment variable naming an alternative settings file.
pub const CONFIG_ENV: &str = "CRM_GEOCODE_CONFIG";

/// Environment variable overriding `[connector] base_url`.
pub const URL_ENV: &str = "BITRIX_BI_URL";

/// Environment variable holding the connector access key.
pub const TOKEN_ENV: &str = "BITRIX_BI_TOKEN";

const DEFAULT_SETTINGS: &str = include_str!("../crm_geocode.toml");

/// Errors that can occur while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Settings file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Settings file is not valid TOML or has wrongly typed keys.
    #[error("Invalid settings in {path}: {source}")]
    Toml {
        /// File being parsed.
        path: String,
        /// Underlying parse error.
        source: toml::de::Error,
    },
}

/// Loaded settings plus the connector token.
#[derive(Clone)]
pub struct Config {
    /// Pipeline settings with every relative path resolved.
    pub settings: Settings,
    /// Connector access key, if configured.
    pub token: Option<String>,
    /// File the settings were read from; `None` for the embedded defaults.
    pub origin: Option<PathBuf>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("settings", &self.settings)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("origin", &self.origin)
            .finish()
    }
}

impl Config {
    /// Loads settings from `path`, else from `CRM_GEOCODE_CONFIG`, else
    /// the embedded defaults, then applies environment overrides and
    /// resolves relative paths under [`paths::data_dir`].
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Io`] if the settings file cannot be read
    /// * [`ConfigError::Toml`] if it cannot be parsed
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_dotenv();

        let origin = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut settings = match &origin {
            Some(file) => {
                log::info!("Loading settings from {}", file.display());
                read_settings(file)?
            }
            None => {
                log::debug!("Using embedded default settings");
                embedded_settings()?
            }
        };

        let token = apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        resolve_paths(&mut settings, &paths::data_dir());

        Ok(Self {
            settings,
            token,
            origin,
        })
    }
}

/// Loads `.env` from the current directory or its ancestors, if present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Ignoring unreadable .env file: {e}"),
    }
}

/// Parses the embedded default settings.
///
/// # Errors
///
/// Returns [`ConfigError::Toml`] if the embedded file is invalid.
pub fn embedded_settings() -> Result<Settings, ConfigError> {
    parse_settings(DEFAULT_SETTINGS, "<embedded crm_geocode.toml>")
}

/// Reads and parses a settings file.
///
/// # Errors
///
/// * [`ConfigError::Io`] if the file cannot be read
/// * [`ConfigError::Toml`] if it cannot be parsed
pub fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_settings(&text, &path.display().to_string())
}

fn parse_settings(text: &str, origin: &str) -> Result<Settings, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Toml {
        path: origin.to_string(),
        source: e,
    })
}

/// Applies `BITRIX_BI_URL` to the connector settings and returns the
/// `BITRIX_BI_TOKEN` value. Blank values count as unset.
pub fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = present(URL_ENV) {
        log::debug!("Connector URL taken from {URL_ENV}");
        settings.connector.base_url = url.trim().to_string();
    }

    let token = present(TOKEN_ENV);
    if token.is_some() {
        log::debug!("Connector token taken from {TOKEN_ENV}");
    }
    token
}

/// Resolves every relative file path in `settings` against `base`.
pub fn resolve_paths(settings: &mut Settings, base: &Path) {
    let gazetteer = &mut settings.gazetteer;
    gazetteer.municipalities_path = paths::resolve(base, &gazetteer.municipalities_path);
    gazetteer.coordinates_path = paths::resolve(base, &gazetteer.coordinates_path);

    let optional = [
        &mut settings.normalizer.tables_path,
        &mut settings.normalizer.exceptions_path,
        &mut settings.matcher.corrections_path,
    ];
    for path in optional.into_iter().flatten() {
        *path = paths::resolve(base, path);
    }

    let export = &mut settings.export;
    export.unmatched_path = paths::resolve(base, &export.unmatched_path);
    export.geocoded_path = paths::resolve(base, &export.geocoded_path);
}
