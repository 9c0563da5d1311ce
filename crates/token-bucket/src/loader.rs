//! Layered bucket settings: defaults, then a YAML file, then environment.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::bucket::{validate, TokenBucket};
use crate::config::BucketConfig;
use crate::error::BucketError;

/// Environment variable names.
pub mod vars {
    pub const CAPACITY: &str = "TOKEN_BUCKET_CAPACITY";
    pub const REFILL_AMOUNT: &str = "TOKEN_BUCKET_REFILL_AMOUNT";
    pub const REFILL_INTERVAL_MS: &str = "TOKEN_BUCKET_REFILL_INTERVAL_MS";
    pub const DEFAULT_COST: &str = "TOKEN_BUCKET_DEFAULT_COST";
}

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error("invalid value for {var}: expected integer, got {value:?}")]
    InvalidEnvValue { var: String, value: String },

    #[error("validation error: {0}")]
    ValidationError(#[from] BucketError),
}

/// Everything needed to build a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSettings {
    /// Maximum tokens.
    pub capacity: u64,
    /// Tokens added per refill tick.
    pub refill_amount: u64,
    #[serde(flatten)]
    pub config: BucketConfig,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            capacity: 1,
            refill_amount: 1,
            config: BucketConfig::default(),
        }
    }
}

impl BucketSettings {
    /// Check the settings without building a bucket.
    pub fn validate(&self) -> Result<(), BucketError> {
        validate(self.capacity, self.refill_amount, &self.config).map(|_| ())
    }

    /// Build a full bucket from these settings.
    pub fn build(&self) -> Result<TokenBucket, BucketError> {
        TokenBucket::new(self.capacity, self.refill_amount, self.config.clone())
    }
}

/// Settings loader.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader with no file; only defaults and environment apply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the given YAML file, if it exists, between defaults and
    /// environment.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load and validate settings from the process environment.
    pub fn load(&self) -> Result<BucketSettings, ConfigError> {
        self.load_with(|var| std::env::var(var).ok())
    }

    /// Load and validate settings, resolving variables through `lookup`.
    pub fn load_with<F>(&self, lookup: F) -> Result<BucketSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match &self.file {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading bucket settings");
                let contents = std::fs::read_to_string(path)?;
                parse_yaml(&contents, &lookup)?
            }
            Some(path) => {
                debug!(path = %path.display(), "settings file missing, using defaults");
                BucketSettings::default()
            }
            None => BucketSettings::default(),
        };

        apply_env(&mut settings, &lookup)?;
        settings.validate()?;

        Ok(settings)
    }
}

/// Parse YAML settings after expanding `${VAR}` and `${VAR:-default}`.
pub fn parse_yaml<F>(contents: &str, lookup: F) -> Result<BucketSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = expand_env_vars(contents, &lookup)?;

    serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("placeholder pattern is valid")
    })
}

fn expand_env_vars<F>(content: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = content.to_string();

    for cap in placeholder().captures_iter(content) {
        let var_name = &cap[1];
        let value = match (lookup(var_name), cap.get(2)) {
            (Some(v), _) => v,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                return Err(ConfigError::EnvVarNotFound {
                    var: var_name.to_string(),
                })
            }
        };

        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

fn apply_env<F>(settings: &mut BucketSettings, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env_u64(vars::CAPACITY, lookup)? {
        settings.capacity = v;
    }
    if let Some(v) = env_u64(vars::REFILL_AMOUNT, lookup)? {
        settings.refill_amount = v;
    }
    if let Some(v) = env_u64(vars::REFILL_INTERVAL_MS, lookup)? {
        settings.config.refill_interval = Duration::from_millis(v);
    }
    if let Some(v) = env_u64(vars::DEFAULT_COST, lookup)? {
        settings.config.default_cost = v;
    }
    Ok(())
}

fn env_u64<F>(var: &str, lookup: &F) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
