//! Service configuration, read from a TOML file given on the command line.
//!
//! Sources are mandatory, so a missing file is an error. Every other section
//! is optional and falls back to the defaults below. Unknown keys are
//! accepted but logged, since they are usually typos.
use crate::cache::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::content::{
    ChatSummarizerConfig, DEFAULT_ENDPOINT, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
use crate::item::Source;
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerConfig;
use crate::storage::{StoreConfig, DEFAULT_CONCURRENCY};
use crate::util::validate_source_url;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `[summarizer] api_key`.
pub const API_KEY_ENV: &str = "FEEDKEEPER_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSection {
    pub update_interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            update_interval_secs: defaults.update_interval.as_secs(),
            max_retries: defaults.retry.max_retries,
            retry_delay_secs: defaults.retry.delay.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSection {
    /// Maximum in-flight backend operations per fan-out.
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: retry.max_retries,
            retry_delay_ms: retry.delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl_secs: DEFAULT_TTL.as_secs(),
        }
    }
}

/// Settings for the chat-completions summarizer.
///
/// Custom Debug impl masks `api_key`.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarizerSection {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Overridden by `FEEDKEEPER_API_KEY` when that is set.
    pub api_key: Option<String>,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for SummarizerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizerSection")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub cache: CacheSection,

    /// Annotation is disabled when this section is absent.
    #[serde(default)]
    pub summarizer: Option<SummarizerSection>,
}

fn default_database_path() -> String {
    "feedkeeper.db".to_string()
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "sources",
        "scheduler",
        "store",
        "cache",
        "summarizer",
    ];

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing or unreadable file → `Err(ConfigError::Io)`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Failed validation → `Err(ConfigError::Invalid)`
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never loaded
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            summarizer = config.summarizer.is_some(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(invalid("at least one [[sources]] entry is required"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            let name = source.name.trim();
            if name.is_empty() {
                return Err(invalid("source name must not be empty"));
            }
            if name.contains(['/', '\\']) {
                return Err(invalid(format!(
                    "source name '{name}' must not contain path separators"
                )));
            }
            if !seen.insert(name) {
                return Err(invalid(format!("duplicate source name '{name}'")));
            }
            validate_source_url(&source.url)
                .map_err(|e| invalid(format!("source '{name}': {e}")))?;
        }

        if self.database_path.trim().is_empty() {
            return Err(invalid("database_path must not be empty"));
        }
        if self.scheduler.update_interval_secs == 0 {
            return Err(invalid("scheduler.update_interval_secs must be greater than 0"));
        }
        if self.store.concurrency == 0 {
            return Err(invalid("store.concurrency must be greater than 0"));
        }
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries must be greater than 0"));
        }
        if let Some(summarizer) = &self.summarizer {
            if summarizer.max_tokens == 0 {
                return Err(invalid("summarizer.max_tokens must be greater than 0"));
            }
            if !(0.0..=2.0).contains(&summarizer.temperature) {
                return Err(invalid("summarizer.temperature must be between 0 and 2"));
            }
        }
        Ok(())
    }

    pub fn sources(&self) -> Vec<Source> {
        self.sources
            .iter()
            .map(|s| Source::new(s.name.trim(), s.url.trim()))
            .collect()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            update_interval: Duration::from_secs(self.scheduler.update_interval_secs),
            retry: RetryPolicy::new(
                self.scheduler.max_retries,
                Duration::from_secs(self.scheduler.retry_delay_secs),
            ),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            concurrency: self.store.concurrency.max(1),
            retry: RetryPolicy::new(
                self.store.max_retries,
                Duration::from_millis(self.store.retry_delay_ms),
            ),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: NonZeroUsize::new(self.cache.max_entries).unwrap_or(NonZeroUsize::MIN),
            ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }

    /// Summarizer settings, if annotation is enabled. `env_key` (normally
    /// the value of `FEEDKEEPER_API_KEY`) wins over the file's `api_key`.
    pub fn summarizer_config(&self, env_key: Option<String>) -> Option<ChatSummarizerConfig> {
        let section = self.summarizer.as_ref()?;
        let api_key = env_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| section.api_key.clone())
            .map(SecretString::from);

        Some(ChatSummarizerConfig {
            endpoint: section.endpoint.clone(),
            model: section.model.clone(),
            max_tokens: section.max_tokens,
            temperature: section.temperature,
            api_key,
        })
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const MINIMAL: &str = r#"
[[sources]]
name = "tech-news"
url = "https://example.com/feed.xml"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.database_path, "feedkeeper.db");
        assert_eq!(config.sources().len(), 1);
        assert!(config.summarizer.is_none());

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler, SchedulerConfig::default());
        assert_eq!(scheduler.update_interval, Duration::from_secs(3600));

        let store = config.store_config();
        assert_eq!(store.concurrency, 16);
        assert_eq!(store.retry, RetryPolicy::new(3, Duration::from_secs(5)));

        assert_eq!(config.cache_config(), CacheConfig::default());
        assert!(config.summarizer_config(None).is_none());
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedkeeper/items.db"

[[sources]]
name = "tech-news"
url = "https://example.com/feed.xml"

[[sources]]
name = "science"
url = "https://science.example.org/atom"

[scheduler]
update_interval_secs = 900
max_retries = 1
retry_delay_secs = 30

[store]
concurrency = 4
max_retries = 2
retry_delay_ms = 250

[cache]
max_entries = 10
ttl_secs = 60

[summarizer]
endpoint = "https://llm.example.com/v1"
model = "small"
max_tokens = 200
temperature = 0.2
api_key = "file-key"
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.database_path, "/var/lib/feedkeeper/items.db");
        assert_eq!(
            config.sources(),
            vec![
                Source::new("tech-news", "https://example.com/feed.xml"),
                Source::new("science", "https://science.example.org/atom"),
            ]
        );
        assert_eq!(
            config.scheduler_config(),
            SchedulerConfig {
                update_interval: Duration::from_secs(900),
                retry: RetryPolicy::new(1, Duration::from_secs(30)),
            }
        );
        let store = config.store_config();
        assert_eq!(store.concurrency, 4);
        assert_eq!(store.retry, RetryPolicy::new(2, Duration::from_millis(250)));
        assert_eq!(config.cache_config().max_entries.get(), 10);
        assert_eq!(config.cache_config().ttl, Duration::from_secs(60));

        let summarizer = config.summarizer_config(None).unwrap();
        assert_eq!(summarizer.endpoint, "https://llm.example.com/v1");
        assert_eq!(summarizer.model, "small");
        assert_eq!(summarizer.max_tokens, 200);
        assert_eq!(
            summarizer.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("file-key".to_string())
        );
    }

    #[test]
    fn test_env_key_takes_precedence() {
        let config = Config::parse(&format!("{MINIMAL}\n[summarizer]\napi_key = \"file-key\"\n")).unwrap();

        let from_env = config.summarizer_config(Some("env-key".into())).unwrap();
        assert_eq!(from_env.api_key.unwrap().expose_secret(), "env-key");

        let blank_env = config.summarizer_config(Some("  ".into())).unwrap();
        assert_eq!(blank_env.api_key.unwrap().expose_secret(), "file-key");
    }

    #[test]
    fn test_summarizer_section_defaults() {
        let config = Config::parse(&format!("{MINIMAL}\n[summarizer]\n")).unwrap();
        let summarizer = config.summarizer_config(None).unwrap();
        assert_eq!(summarizer.model, DEFAULT_MODEL);
        assert_eq!(summarizer.endpoint, DEFAULT_ENDPOINT);
        assert!(summarizer.api_key.is_none());
    }

    #[test]
    fn test_no_sources_rejected() {
        let err = Config::parse("database_path = \"x.db\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let content = r#"
[[sources]]
name = "a"
url = "https://example.com/1"

[[sources]]
name = "a"
url = "https://example.com/2"
"#;
        let err = Config::parse(content).unwrap_err();
        assert!(err.to_string().contains("duplicate source name 'a'"));
    }

    #[test]
    fn test_bad_names_rejected() {
        for name in ["", "   ", "a/b", "a\\b"] {
            let content =
                format!("[[sources]]\nname = \"{}\"\nurl = \"https://example.com/\"\n", name.replace('\\', "\\\\"));
            assert!(
                matches!(Config::parse(&content), Err(ConfigError::Invalid(_))),
                "name {name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_private_url_rejected() {
        let content = "[[sources]]\nname = \"internal\"\nurl = \"http://192.168.1.10/rss\"\n";
        let err = Config::parse(content).unwrap_err();
        assert!(err.to_string().contains("source 'internal'"));
    }

    #[test]
    fn test_zero_values_rejected() {
        for section in [
            "[scheduler]\nupdate_interval_secs = 0\n",
            "[store]\nconcurrency = 0\n",
            "[cache]\nmax_entries = 0\n",
            "[summarizer]\nmax_tokens = 0\n",
        ] {
            let content = format!("{MINIMAL}\n{section}");
            assert!(
                matches!(Config::parse(&content), Err(ConfigError::Invalid(_))),
                "{section} should be rejected"
            );
        }
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = format!("totally_fake_key = \"should not fail\"\n{MINIMAL}");
        assert!(Config::parse(&content).is_ok());
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let content = format!("{MINIMAL}\n[scheduler]\nupdate_interval_secs = \"soon\"\n");
        assert!(matches!(Config::parse(&content), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = std::env::temp_dir().join("feedkeeper_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sources[0].name, "tech-news");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = Path::new("/tmp/feedkeeper_test_nonexistent_config.toml");
        assert!(matches!(Config::load(path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("feedkeeper_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedkeeper_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config =
            Config::parse(&format!("{MINIMAL}\n[summarizer]\napi_key = \"super-secret-key-12345\"\n"))
                .unwrap();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
