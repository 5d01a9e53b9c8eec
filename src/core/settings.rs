// src/core/settings.rs

//! # Settings
//!
//! Application-level configuration for a compiled tree, loaded from TOML:
//!
//! ```toml
//! help_flags = ["-h", "--help"]
//! abbreviations = true
//! auto_envvar_prefix = "DEMO"
//! show_defaults = false
//!
//! [defaults]
//! profile = "staging"
//!
//! [defaults.config]
//! config_dir = "/etc/demo"
//! ```
//!
//! `defaults` is keyed by child names relative to the root; leaf keys are
//! parameter names. A value found there sits between the environment and the
//! declared default in precedence.

use crate::constants::{DEFAULT_HELP_FLAGS, SETTINGS_FILENAME, SETTINGS_PATH_ENV};
use crate::models::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Settings must declare at least one help flag.")]
    NoHelpFlags,
}

fn default_help_flags() -> Vec<String> {
    DEFAULT_HELP_FLAGS.iter().map(|f| f.to_string()).collect()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Spellings of the eager help option compiled into every node.
    #[serde(default = "default_help_flags")]
    pub help_flags: Vec<String>,
    /// Resolve unambiguous prefixes of child names.
    #[serde(default = "default_true")]
    pub abbreviations: bool,
    /// Derives `PREFIX[_SUBPATH...]_PARAM` environment variables for every parameter.
    pub auto_envvar_prefix: Option<String>,
    pub show_defaults: bool,
    pub defaults: BTreeMap<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            help_flags: default_help_flags(),
            abbreviations: true,
            auto_envvar_prefix: None,
            show_defaults: false,
            defaults: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Self::parse(content, "<inline>")
    }

    /// Reads and parses a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::parse(&content, &path.display().to_string())?;
        log::debug!("Loaded settings from '{}'", path.display());
        Ok(settings)
    }

    /// Finds the settings for `app`: the file named by `$CMDTREE_CONFIG`, else
    /// `<config dir>/<app>/cmdtree.toml`, else the defaults.
    pub fn discover(app: &str) -> Result<Self, SettingsError> {
        match Self::discover_path(app, &Environment::Process) {
            Some(path) => Self::load(&path),
            None => {
                log::debug!("No settings file found for '{}', using defaults", app);
                Ok(Self::default())
            }
        }
    }

    /// The settings file `discover` would load, if any exists.
    pub fn discover_path(app: &str, env: &Environment) -> Option<PathBuf> {
        if let Some(explicit) = env.var(SETTINGS_PATH_ENV) {
            let path = PathBuf::from(shellexpand::tilde(&explicit).into_owned());
            // An explicit path is returned even if missing so `load` reports it.
            return Some(path);
        }
        let candidate = dirs::config_dir()?.join(app).join(SETTINGS_FILENAME);
        candidate.is_file().then_some(candidate)
    }

    fn parse(content: &str, origin: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: origin.to_string(),
            source,
        })?;
        if settings.help_flags.is_empty() {
            return Err(SettingsError::NoHelpFlags);
        }
        Ok(settings)
    }

    /// The `defaults` entry for `param` on the node reached by `subpath`
    /// (child names below the root).
    pub fn default_for(&self, subpath: &[String], param: &str) -> Option<&Value> {
        let mut table = &self.defaults;
        for segment in subpath {
            table = table.get(segment)?.as_map()?;
        }
        table.get(param).filter(|v| v.as_map().is_none())
    }

    /// The automatic environment variable for `param`, if a prefix is configured.
    pub fn auto_envvar(&self, subpath: &[String], param: &str) -> Option<String> {
        let prefix = self.auto_envvar_prefix.as_deref()?;
        let mut parts = vec![prefix.to_string()];
        parts.extend(subpath.iter().cloned());
        parts.push(param.to_string());
        Some(parts.join("_").replace('-', "_").to_uppercase())
    }
}

/// Source of environment variables during binding.
#[derive(Debug, Clone, Default)]
pub enum Environment {
    /// The real process environment.
    #[default]
    Process,
    /// A fixed set of variables, for tests and embedding.
    Fixed(BTreeMap<String, String>),
}

impl Environment {
    pub fn fixed<K: Into<String>, V: Into<String>>(vars: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Fixed(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// The value of `key`; unset and empty variables both read as `None`.
    pub fn var(&self, key: &str) -> Option<String> {
        let value = match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(vars) => vars.get(key).cloned(),
        };
        value.filter(|v| !v.is_empty())
    }
}
