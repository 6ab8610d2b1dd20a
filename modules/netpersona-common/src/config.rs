use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::NetPersonaError;
use crate::types::Platform;

pub const DEFAULT_JUDGE_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_GHOSTWRITER_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_DAILY_INTERACTION_LIMIT: u32 = 15;
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 70;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: Option<String>,

    // AI provider
    pub anthropic_api_key: String,
    pub judge_model: String,
    pub ghostwriter_model: String,

    // Budget / gate
    pub daily_interaction_limit: u32,
    /// Per-platform overrides of `daily_interaction_limit`.
    pub platform_limits: HashMap<Platform, u32>,
    pub confidence_threshold: u8,

    // Stage timeouts
    pub filter_timeout: Duration,
    pub profile_timeout: Duration,
    pub generator_timeout: Duration,

    // Persona
    pub persona_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration for a pipeline run. Requires ANTHROPIC_API_KEY.
    pub fn from_env() -> Result<Self, NetPersonaError> {
        Ok(Self {
            anthropic_api_key: required_env("ANTHROPIC_API_KEY")?,
            ..Self::store_from_env()?
        })
    }

    /// Load a config for storage-only commands (migrate, budget). No AI keys needed.
    pub fn store_from_env() -> Result<Self, NetPersonaError> {
        let confidence_threshold: u8 =
            parsed_env("CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD)?;
        if confidence_threshold > 100 {
            return Err(NetPersonaError::Config(format!(
                "CONFIDENCE_THRESHOLD must be within 0..=100, got {confidence_threshold}"
            )));
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            anthropic_api_key: String::new(),
            judge_model: env::var("JUDGE_MODEL").unwrap_or_else(|_| DEFAULT_JUDGE_MODEL.into()),
            ghostwriter_model: env::var("GHOSTWRITER_MODEL")
                .unwrap_or_else(|_| DEFAULT_GHOSTWRITER_MODEL.into()),
            daily_interaction_limit: parsed_env(
                "DAILY_INTERACTION_LIMIT",
                DEFAULT_DAILY_INTERACTION_LIMIT,
            )?,
            platform_limits: platform_limits()?,
            confidence_threshold,
            filter_timeout: Duration::from_secs(parsed_env("FILTER_TIMEOUT_SECS", 20)?),
            profile_timeout: Duration::from_secs(parsed_env("PROFILE_TIMEOUT_SECS", 30)?),
            generator_timeout: Duration::from_secs(parsed_env("GENERATOR_TIMEOUT_SECS", 60)?),
            persona_path: env::var("PERSONA_PATH").ok().map(PathBuf::from),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, NetPersonaError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| NetPersonaError::Config("DATABASE_URL environment variable is required".into()))
    }

    /// Log the loaded configuration without secrets.
    pub fn log_redacted(&self) {
        info!(
            database = self.database_url.is_some(),
            anthropic_key = !self.anthropic_api_key.is_empty(),
            judge_model = self.judge_model.as_str(),
            ghostwriter_model = self.ghostwriter_model.as_str(),
            daily_interaction_limit = self.daily_interaction_limit,
            platform_limits = ?self.platform_limits,
            confidence_threshold = self.confidence_threshold,
            filter_timeout_secs = self.filter_timeout.as_secs(),
            profile_timeout_secs = self.profile_timeout.as_secs(),
            generator_timeout_secs = self.generator_timeout.as_secs(),
            persona = ?self.persona_path,
            "Config loaded"
        );
    }
}

/// `DAILY_INTERACTION_LIMIT_<PLATFORM>`, e.g. `DAILY_INTERACTION_LIMIT_LINKEDIN=5`.
pub fn platform_limit_key(platform: Platform) -> String {
    format!("DAILY_INTERACTION_LIMIT_{}", platform.as_str().to_uppercase())
}

fn platform_limits() -> Result<HashMap<Platform, u32>, NetPersonaError> {
    let mut limits = HashMap::new();
    for platform in Platform::ALL {
        let key = platform_limit_key(platform);
        if env::var(&key).is_ok() {
            limits.insert(platform, parsed_env(&key, 0)?);
        }
    }
    Ok(limits)
}

fn required_env(key: &str) -> Result<String, NetPersonaError> {
    env::var(key).map_err(|_| NetPersonaError::Config(format!("{key} environment variable is required")))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, NetPersonaError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| NetPersonaError::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
