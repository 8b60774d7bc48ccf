//! Runtime configuration.
//!
//! Settings come from a TOML file (every key optional) and are then
//! overridden by environment variables, so credentials can live in `.env`
//! instead of the checked-in file:
//!
//! ```toml
//! [llm]
//! api_key = "sk-or-..."
//! model = "openai/gpt-4o-mini"
//!
//! [search]
//! api_login = "me@example.com"
//! api_password = "..."
//! max_urls = 10
//!
//! [pipeline]
//! fetch_concurrency = 5
//! summarize_concurrency = 5
//!
//! [storage]
//! data_dir = "data"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "overwatch.toml";
pub const CONFIG_PATH_ENV: &str = "OVERWATCH_CONFIG";

const DEFAULT_LLM_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_SEARCH_ENDPOINT: &str =
    "https://api.dataforseo.com/v3/serp/google/organic/live/advanced";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("failed to parse env var {key}={value}: {message}")]
    InvalidEnv {
        key: String,
        value: String,
        message: String,
    },
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid setting {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OverwatchConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub pipeline: PipelineSettings,
    pub storage: StorageConfig,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Token budget for the final report completion
    pub report_max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "openai/gpt-4o-mini".to_string(),
            base_url: DEFAULT_LLM_ENDPOINT.to_string(),
            report_max_tokens: 4000,
            request_timeout_secs: 120,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("report_max_tokens", &self.report_max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub api_login: Option<String>,
    pub api_password: Option<String>,
    pub endpoint: String,
    pub location_code: u32,
    pub language_code: String,
    pub max_urls: usize,
    /// Hosts never handed to the pipeline (matched as substrings of the host)
    pub excluded_domains: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_login: None,
            api_password: None,
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            location_code: 2840,
            language_code: "en".to_string(),
            max_urls: 10,
            excluded_domains: [
                "twitter.com",
                "x.com",
                "facebook.com",
                "instagram.com",
                "linkedin.com",
                "pinterest.com",
                "reddit.com",
                "tiktok.com",
                "youtube.com",
                "whatsapp.com",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_login", &self.api_login)
            .field("api_password", &redact(&self.api_password))
            .field("endpoint", &self.endpoint)
            .field("location_code", &self.location_code)
            .field("language_code", &self.language_code)
            .field("max_urls", &self.max_urls)
            .field("excluded_domains", &self.excluded_domains)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    pub fetch_concurrency: usize,
    pub summarize_concurrency: usize,
    pub fetch_timeout_secs: u64,
    /// Page text beyond this many characters is not sent to the model
    pub max_content_chars: usize,
    pub user_agent: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_concurrency: 5,
            summarize_concurrency: 5,
            fetch_timeout_secs: 10,
            max_content_chars: 5000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_file: "evidence.db".to_string(),
        }
    }
}

impl OverwatchConfig {
    /// Load from `path`, else `$OVERWATCH_CONFIG`, else `./overwatch.toml`,
    /// then apply environment overrides.
    ///
    /// An explicitly requested file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::info!(
                        path = DEFAULT_CONFIG_PATH,
                        "No config file found; using defaults and environment"
                    );
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&raw, &path.display().to_string())?;
        tracing::info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Apply environment-style overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = non_empty("OPENROUTER_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = non_empty("DATAFORSEO_LOGIN") {
            self.search.api_login = Some(v);
        }
        if let Some(v) = non_empty("DATAFORSEO_PASSWORD") {
            self.search.api_password = Some(v);
        }
        if let Some(v) = non_empty("OVERWATCH_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_override(&non_empty, "OVERWATCH_FETCH_CONCURRENCY")? {
            self.pipeline.fetch_concurrency = v;
        }
        if let Some(v) = parse_override(&non_empty, "OVERWATCH_SUMMARIZE_CONCURRENCY")? {
            self.pipeline.summarize_concurrency = v;
        }
        if let Some(v) = parse_override(&non_empty, "OVERWATCH_MAX_URLS")? {
            self.search.max_urls = v;
        }
        Ok(())
    }

    /// Check settings every command depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.fetch_concurrency == 0 {
            return Err(invalid("pipeline.fetch_concurrency", "must be at least 1"));
        }
        if self.pipeline.summarize_concurrency == 0 {
            return Err(invalid(
                "pipeline.summarize_concurrency",
                "must be at least 1",
            ));
        }
        if self.search.max_urls == 0 {
            return Err(invalid("search.max_urls", "must be at least 1"));
        }
        if self.pipeline.max_content_chars == 0 {
            return Err(invalid("pipeline.max_content_chars", "must be at least 1"));
        }
        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::Missing("storage.database_file".to_string()));
        }
        Ok(())
    }

    pub fn require_llm_key(&self) -> Result<&str, ConfigError> {
        self.llm
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing("llm.api_key (OPENROUTER_API_KEY)".to_string()))
    }

    pub fn require_search_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let login = self
            .search
            .api_login
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Missing("search.api_login (DATAFORSEO_LOGIN)".to_string())
            })?;
        let password = self
            .search
            .api_password
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Missing("search.api_password (DATAFORSEO_PASSWORD)".to_string())
            })?;
        Ok((login, password))
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database_file)
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_pipeline_contract() {
        let config = OverwatchConfig::default();
        assert_eq!(config.pipeline.fetch_concurrency, 5);
        assert_eq!(config.pipeline.summarize_concurrency, 5);
        assert_eq!(config.pipeline.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.search.max_urls, 10);
        assert!(config.search.excluded_domains.contains(&"reddit.com".to_string()));
        assert_eq!(config.database_path(), PathBuf::from("data/evidence.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [llm]
            api_key = "sk-test"

            [pipeline]
            fetch_concurrency = 2
        "#;
        let config = OverwatchConfig::from_toml_str(raw, "inline").unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
        assert_eq!(config.pipeline.fetch_concurrency, 2);
        assert_eq!(config.pipeline.summarize_concurrency, 5);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = OverwatchConfig::from_toml_str("[llm\napi_key=", "bad.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "bad.toml"));
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let mut config = OverwatchConfig::from_toml_str(
            "[search]\napi_login = \"file-login\"\nmax_urls = 3\n",
            "inline",
        )
        .unwrap();
        config
            .apply_overrides(lookup_from(&[
                ("DATAFORSEO_LOGIN", "env-login"),
                ("DATAFORSEO_PASSWORD", "env-pass"),
                ("OVERWATCH_MAX_URLS", "7"),
                ("OPENROUTER_MODEL", "  "),
            ]))
            .unwrap();
        assert_eq!(
            config.require_search_credentials().unwrap(),
            ("env-login", "env-pass")
        );
        assert_eq!(config.search.max_urls, 7);
        // blank values do not clobber
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
    }

    #[test]
    fn test_bad_numeric_override_is_rejected() {
        let mut config = OverwatchConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("OVERWATCH_FETCH_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "OVERWATCH_FETCH_CONCURRENCY"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = OverwatchConfig::default();
        config.pipeline.summarize_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "pipeline.summarize_concurrency"
        ));
    }

    #[test]
    fn test_missing_credentials_are_reported() {
        let config = OverwatchConfig::default();
        assert!(matches!(
            config.require_llm_key(),
            Err(ConfigError::Missing(_))
        ));
        assert!(matches!(
            config.require_search_credentials(),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let mut config = OverwatchConfig::default();
        config.llm.api_key = Some("sk-secret".to_string());
        config.search.api_password = Some("hunter2".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
