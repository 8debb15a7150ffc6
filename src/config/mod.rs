//! Application configuration.
//!
//! Layers, lowest priority first: built-in defaults, a TOML file
//! (`draftpilot.toml` or an explicit path), then `DRAFTPILOT__*` environment
//! variables with `__` between nested keys, e.g.
//! `DRAFTPILOT__BUDGET__MONTHLY_LIMIT=25`.
//!
//! Credentials never live in the file; see [`Secrets`].

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::{BudgetConfig, ModelTier, TierSet};
use crate::contacts::ColumnMapping;
use crate::generation::DEFAULT_INFERENCE_ENDPOINT;
use crate::pipeline::PipelineConfig;

/// Config file read from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "draftpilot.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DRAFTPILOT";

pub const HUGGINGFACE_API_KEY_ENV: &str = "HUGGINGFACE_API_KEY";
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const GOOGLE_ACCESS_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

/// Errors raised while loading or writing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("{} already exists (use --force to overwrite)", .0.display())]
    AlreadyExists(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum contacts processed per run; unlimited when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Where durable state lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub ledger: PathBuf,
    pub cache: PathBuf,
    pub outbox: PathBuf,
    pub runs: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ledger: PathBuf::from("api_usage.json"),
            cache: PathBuf::from(".draftpilot/content_cache.json"),
            outbox: PathBuf::from(".draftpilot/outbox.jsonl"),
            runs: PathBuf::from(".draftpilot/runs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INFERENCE_ENDPOINT.to_string(),
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    pub range: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            range: "Sheet1!A1:D".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub subject_prefix: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "Email".to_string(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub budget: BudgetConfig,
    pub tiers: TierSet,
    pub batch: BatchConfig,
    pub paths: PathsConfig,
    pub backend: BackendConfig,
    pub sheets: SheetsConfig,
    pub email: EmailConfig,
    pub columns: ColumnMapping,
}

impl AppConfig {
    /// Load configuration from `path` (required) or `draftpilot.toml`
    /// (optional), with environment overrides applied last.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make budget enforcement meaningless.
    pub fn validate(&self) -> ConfigResult<()> {
        let budget = &self.budget;
        if !budget.monthly_limit.is_finite() || budget.monthly_limit < 0.0 {
            return Err(invalid("budget.monthly_limit must be a non-negative amount"));
        }
        for (name, value) in [
            ("budget.warning_threshold", budget.warning_threshold),
            ("budget.critical_threshold", budget.critical_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("{} must be between 0 and 1", name)));
            }
        }
        if budget.warning_threshold > budget.critical_threshold {
            return Err(invalid(
                "budget.warning_threshold must not exceed budget.critical_threshold",
            ));
        }

        validate_tier("tiers.standard", &self.tiers.standard)?;
        validate_tier("tiers.premium", &self.tiers.premium)?;

        if self.batch.limit == Some(0) {
            return Err(invalid("batch.limit must be at least 1"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(invalid("backend.timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            tiers: self.tiers.clone(),
            on_degrade: self.budget.on_degrade,
            temperature: self.backend.temperature,
            subject_prefix: self.email.subject_prefix.clone(),
            batch_limit: self.batch.limit,
        }
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the default configuration to `path`.
    pub fn write_default(path: &Path, force: bool) -> ConfigResult<()> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, AppConfig::default().to_toml()?)?;
        Ok(())
    }
}

fn validate_tier(name: &str, tier: &ModelTier) -> ConfigResult<()> {
    if tier.model.trim().is_empty() {
        return Err(invalid(&format!("{}.model must not be empty", name)));
    }
    let costs = [
        tier.request_cost,
        tier.token_cost,
        tier.estimated_cost.unwrap_or(0.0),
    ];
    if costs.iter().any(|c| !c.is_finite() || *c < 0.0) {
        return Err(invalid(&format!("{} costs must be non-negative", name)));
    }
    if tier.max_new_tokens == 0 {
        return Err(invalid(&format!("{}.max_new_tokens must be at least 1", name)));
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Credentials, read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub huggingface_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub google_access_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            huggingface_api_key: non_empty_env(HUGGINGFACE_API_KEY_ENV),
            google_api_key: non_empty_env(GOOGLE_API_KEY_ENV),
            google_access_token: non_empty_env(GOOGLE_ACCESS_TOKEN_ENV),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "<set>").unwrap_or("<unset>");
        f.debug_struct("Secrets")
            .field("huggingface_api_key", &mask(&self.huggingface_api_key))
            .field("google_api_key", &mask(&self.google_api_key))
            .field("google_access_token", &mask(&self.google_access_token))
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
