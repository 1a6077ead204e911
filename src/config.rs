//! Runtime configuration loaded from the environment.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::{EngineConfig, RetryPolicy};
use crate::images::{BackgroundRequest, SeedMode, SEED_RANGE};
use crate::llm::gemini;
use crate::prompts::Prompts;

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Clone)]
pub struct Config {
    /// Model credential. Only read from the environment, never defaulted.
    pub api_key: Option<String>,
    /// Model identifier for the remote backend.
    pub model: String,
    /// Gemini API base URL.
    pub gemini_url: String,
    pub temperature: f32,
    /// Upper bound on a single model request.
    pub timeout: Duration,
    pub max_retries: u32,
    pub image_seed: SeedMode,
    /// Replaces the built-in governing prompt when set.
    pub prompt_file: Option<PathBuf>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("gemini_url", &self.gemini_url)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("image_seed", &self.image_seed)
            .field("prompt_file", &self.prompt_file)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let temperature: f32 = parse_or(&get, "NOVELLA_TEMPERATURE", 0.9)?;
        anyhow::ensure!(
            (0.0..=2.0).contains(&temperature),
            "NOVELLA_TEMPERATURE must be between 0 and 2"
        );

        let timeout_secs: u64 = parse_or(&get, "NOVELLA_TIMEOUT_SECS", 60)?;
        anyhow::ensure!(timeout_secs > 0, "NOVELLA_TIMEOUT_SECS must be positive");

        let max_retries: u32 = parse_or(&get, "NOVELLA_MAX_RETRIES", 2)?;
        anyhow::ensure!(
            max_retries <= MAX_RETRIES_LIMIT,
            "NOVELLA_MAX_RETRIES must be at most {MAX_RETRIES_LIMIT}"
        );

        let image_seed = match get("NOVELLA_IMAGE_SEED") {
            Some(raw) => {
                let seed: u32 = raw
                    .trim()
                    .parse()
                    .context("NOVELLA_IMAGE_SEED must be a whole number")?;
                anyhow::ensure!(
                    SEED_RANGE.contains(&seed),
                    "NOVELLA_IMAGE_SEED must be below {}",
                    SEED_RANGE.end
                );
                SeedMode::Fixed(seed)
            }
            None => SeedMode::Random,
        };

        Ok(Self {
            api_key: get(API_KEY_VAR).filter(|k| !k.trim().is_empty()),
            model: get("NOVELLA_MODEL").unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string()),
            gemini_url: get("NOVELLA_GEMINI_URL")
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string()),
            temperature,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            image_seed,
            prompt_file: get("NOVELLA_PROMPT_FILE").map(PathBuf::from),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .with_context(|| format!("{API_KEY_VAR} environment variable is required"))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            temperature: self.temperature,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn prompts(&self) -> Result<Prompts> {
        match &self.prompt_file {
            Some(path) => Prompts::with_governing_file(path),
            None => Ok(Prompts::default()),
        }
    }

    pub fn background(&self) -> BackgroundRequest {
        BackgroundRequest {
            seed: self.image_seed,
            ..BackgroundRequest::default()
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.model, gemini::DEFAULT_MODEL);
        assert!((config.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.image_seed, SeedMode::Random);
        assert!(config.require_api_key().is_err());
        assert_eq!(config.prompts().unwrap(), Prompts::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("GEMINI_API_KEY", "secret"),
            ("NOVELLA_MODEL", "gemini-2.0-flash"),
            ("NOVELLA_TEMPERATURE", "0.4"),
            ("NOVELLA_TIMEOUT_SECS", "15"),
            ("NOVELLA_MAX_RETRIES", "0"),
            ("NOVELLA_IMAGE_SEED", "7"),
        ])
        .unwrap();
        assert_eq!(config.require_api_key().unwrap(), "secret");
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.engine_config().retry.max_retries, 0);
        assert_eq!(config.background().seed, SeedMode::Fixed(7));
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("NOVELLA_TEMPERATURE", "hot")]).is_err());
        assert!(load(&[("NOVELLA_TEMPERATURE", "3.5")]).is_err());
        assert!(load(&[("NOVELLA_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("NOVELLA_IMAGE_SEED", "1000")]).is_err());
        assert!(load(&[("NOVELLA_MAX_RETRIES", "11")]).is_err());
        assert!(load(&[("NOVELLA_MAX_RETRIES", "-1")]).is_err());
    }

    #[test]
    fn test_retry_limit_is_inclusive() {
        let config = load(&[("NOVELLA_MAX_RETRIES", "10")]).unwrap();
        assert_eq!(config.engine_config().retry.max_retries, 10);
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let config = load(&[("GEMINI_API_KEY", "  ")]).unwrap();
        assert!(config.require_api_key().is_err());
    }
}
