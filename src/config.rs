//! Configuration loading for cartographe.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `./cartographe.toml` (working directory)
//! 3. `~/.cartographe/config.toml` (user)
//!
//! Secrets are loaded separately with mandatory permission checks from
//! `~/.cartographe/secrets.toml` (must be 0600 or 0400), falling back to the
//! `GEMINI_API_KEYS` / `GEMINI_API_KEY` environment variables.
//!
//! Every tunable of a run is a required key. Only transport details of the
//! `[model]` section have defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::{GeminiClient, GenerationSettings, RetryConfig};
use crate::table::is_workbook;
use crate::{CartographeError, Result};

const CONFIG_FILE: &str = "cartographe.toml";
const USER_DIR: &str = ".cartographe";

/// Run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub model: ModelConfig,
    pub files: FilesConfig,
    pub retry: RetrySection,
    pub rate_limit: RateLimitConfig,
    pub workers: WorkersConfig,
    pub reprocess: ReprocessConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Remote model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier, e.g. `gemini-2.0-flash`.
    pub name: String,
    /// API base URL override.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Attach the web search grounding tool to each request.
    #[serde(default)]
    pub search_grounding: bool,
}

/// Table and store locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesConfig {
    /// Already-catalogued companies.
    pub existing: PathBuf,
    /// Candidate companies to classify.
    pub new: PathBuf,
    /// Accepted companies are appended here.
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    pub errors: PathBuf,
}

/// Backoff policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Total attempts per company, the first one included.
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub backoff_multiplier: f64,
    #[serde(default)]
    pub max_delay_secs: Option<f64>,
}

/// Static throttling.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Calls between two pauses in a sequential run.
    pub batch_size: u32,
    pub pause_secs: f64,
    /// Calls per minute shared by all workers of a parallel run.
    pub quota_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReprocessConfig {
    pub max_per_run: usize,
}

/// Output table persistence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Save the table after this many accepted rows. Unset means after
    /// every accepted row.
    #[serde(default)]
    pub save_every: Option<usize>,
}

impl Config {
    /// Load and validate configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Load and validate one configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CartographeError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CartographeError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(CartographeError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(USER_DIR).join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        Err(CartographeError::Configuration(format!(
            "No config file found. Create ./{CONFIG_FILE} or ~/{USER_DIR}/config.toml"
        )))
    }

    /// Reject values that would stall or disable the run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CartographeError::Configuration(msg.to_string()));

        if self.model.name.trim().is_empty() {
            return invalid("model.name must not be empty");
        }
        if self.retry.max_retries == 0 {
            return invalid("retry.max_retries must be at least 1");
        }
        if seconds(self.retry.base_delay_secs).is_none() {
            return invalid("retry.base_delay_secs must be a non-negative number of seconds");
        }
        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            return invalid("retry.backoff_multiplier must be at least 1");
        }
        if let Some(max) = self.retry.max_delay_secs {
            if seconds(max).is_none() {
                return invalid("retry.max_delay_secs must be a non-negative number of seconds");
            }
        }
        if self.rate_limit.batch_size == 0 {
            return invalid("rate_limit.batch_size must be at least 1");
        }
        if seconds(self.rate_limit.pause_secs).is_none() {
            return invalid("rate_limit.pause_secs must be a non-negative number of seconds");
        }
        if self.rate_limit.quota_per_minute == 0 {
            return invalid("rate_limit.quota_per_minute must be at least 1");
        }
        if self.workers.count == 0 {
            return invalid("workers.count must be at least 1");
        }
        if self.reprocess.max_per_run == 0 {
            return invalid("reprocess.max_per_run must be at least 1");
        }
        if self.output.save_every == Some(0) {
            return invalid("output.save_every must be at least 1 when set");
        }
        if is_workbook(&self.files.output) {
            return invalid("files.output must be a CSV file");
        }
        Ok(())
    }

    /// Backoff policy for [`RetryingClassifyProvider`](crate::RetryingClassifyProvider).
    pub fn retry_config(&self) -> RetryConfig {
        let config = RetryConfig::new(
            self.retry.max_retries,
            seconds(self.retry.base_delay_secs).unwrap_or(Duration::MAX),
        )
        .multiplier(self.retry.backoff_multiplier);
        match self.retry.max_delay_secs {
            Some(max) => config.max_delay(seconds(max).unwrap_or(Duration::MAX)),
            None => config,
        }
    }

    /// Generation settings for the Gemini client.
    pub fn generation_settings(&self) -> GenerationSettings {
        let defaults = GenerationSettings::default();
        GenerationSettings {
            temperature: self.model.temperature.unwrap_or(defaults.temperature),
            max_output_tokens: self
                .model
                .max_output_tokens
                .unwrap_or(defaults.max_output_tokens),
            search_grounding: self.model.search_grounding,
        }
    }

    /// Client for the configured model, bound to one key.
    pub fn gemini_client(&self, api_key: &str) -> GeminiClient {
        let client = match &self.model.base_url {
            Some(url) => GeminiClient::with_base_url(api_key, &self.model.name, url),
            None => GeminiClient::new(api_key, &self.model.name),
        };
        client.settings(self.generation_settings())
    }

    pub fn batch_pause(&self) -> Duration {
        seconds(self.rate_limit.pause_secs).unwrap_or(Duration::MAX)
    }
}

/// `None` for negative, non-finite or out-of-range second counts.
fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Environment variable holding a comma-separated list of keys.
pub const KEYS_ENV_VAR: &str = "GEMINI_API_KEYS";
/// Environment variable holding a single key.
pub const KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub gemini: Option<GeminiSecret>,
}

/// Gemini credentials. Either a single key or a list for parallel runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiSecret {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Secrets {
    /// Load `~/.cartographe/secrets.toml` if it exists, with permission checks.
    ///
    /// Returns empty secrets if no file exists (keys may come from env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(USER_DIR).join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }
        Ok(Secrets::default())
    }

    /// Load one secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            CartographeError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            CartographeError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            CartographeError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(CartographeError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// All configured keys, deduplicated, falling back to the environment.
    pub fn api_keys(&self) -> Vec<String> {
        self.api_keys_with(|var| std::env::var(var).ok())
    }

    fn api_keys_with(&self, env: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let from_file: Vec<String> = self
            .gemini
            .iter()
            .flat_map(|g| g.api_key.iter().chain(g.api_keys.iter()))
            .cloned()
            .collect();
        let keys = if from_file.iter().any(|k| !k.trim().is_empty()) {
            from_file
        } else if let Some(list) = env(KEYS_ENV_VAR) {
            list.split(',').map(str::to_string).collect()
        } else {
            env(KEY_ENV_VAR).into_iter().collect()
        };

        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.trim();
            if !key.is_empty() && !unique.iter().any(|k| k == key) {
                unique.push(key.to_string());
            }
        }
        unique
    }

    /// Keys, or [`CartographeError::NoCredentials`] if there are none.
    pub fn require_api_keys(&self) -> Result<Vec<String>> {
        let keys = self.api_keys();
        if keys.is_empty() {
            return Err(CartographeError::NoCredentials);
        }
        Ok(keys)
    }
}
