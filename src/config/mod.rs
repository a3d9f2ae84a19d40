//! Configuration management for podmirror

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::TtlPolicy;
use crate::error::{ConfigError, Result};
use crate::refresh_log::SweepPolicy;

/// Environment variable overriding `provider.base_url`
pub const ENV_PROVIDER_URL: &str = "PODMIRROR_PROVIDER_URL";
/// Environment variable overriding `provider.api_key`
pub const ENV_PROVIDER_KEY: &str = "PODMIRROR_PROVIDER_KEY";
/// Environment variable overriding `notifier.webhook_url`
pub const ENV_WEBHOOK_URL: &str = "PODMIRROR_WEBHOOK_URL";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ttl: TtlConfig,
    pub refresh: RefreshConfig,
    pub refresh_log: RefreshLogConfig,
    pub provider: ProviderConfig,
    pub notifier: NotifierConfig,

    /// External ids of followed shows and episodes, refreshed eagerly
    pub followed: Vec<String>,
}

/// Entity and search TTLs, in minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub show_minutes: u64,
    pub episode_minutes: u64,
    pub search_minutes: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            show_minutes: 7 * 24 * 60,
            episode_minutes: 360,
            search_minutes: 1440,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Followed entities expiring within this window are refreshed eagerly
    pub lead_window_minutes: u64,
    pub fetch_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Upstream calls per minute spent on eager refresh
    pub priority_per_minute: u32,
    pub priority_concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            lead_window_minutes: 60,
            fetch_timeout_secs: 15,
            backoff_base_secs: 60,
            backoff_max_secs: 3600,
            priority_per_minute: 30,
            priority_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshLogConfig {
    pub min_age_hours: u64,
    pub batch_limit: usize,
    pub max_attempts: u32,
    pub lease_secs: u64,
}

impl Default for RefreshLogConfig {
    fn default() -> Self {
        Self {
            min_age_hours: 24,
            batch_limit: 100,
            max_attempts: 5,
            lease_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub requests_per_second: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            requests_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Absent means follow-ups are only logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or(ConfigError::Invalid(
            "Could not determine config directory".to_string(),
        ))?;

        Ok(base.join("podmirror").join("config.yaml"))
    }

    /// Load configuration.
    ///
    /// With no explicit path a missing default file yields defaults; an
    /// explicit path must exist. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::load_from(&default)?
                } else {
                    log::debug!("No config at {}, using defaults", default.display());
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty file deserializes to unit, not a mapping
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(contents).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        // The file may hold the provider API key
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Apply environment overrides, reading variables through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_PROVIDER_URL) {
            self.provider.base_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_PROVIDER_KEY) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = non_empty(ENV_WEBHOOK_URL) {
            self.notifier.webhook_url = Some(url);
        }
    }

    /// Reject settings that would disable caching or refresh entirely
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.ttl.show_minutes == 0, "ttl.show_minutes must be positive"),
            (self.ttl.episode_minutes == 0, "ttl.episode_minutes must be positive"),
            (
                self.refresh.fetch_timeout_secs == 0,
                "refresh.fetch_timeout_secs must be positive",
            ),
            (
                self.refresh.backoff_base_secs > self.refresh.backoff_max_secs,
                "refresh.backoff_base_secs exceeds refresh.backoff_max_secs",
            ),
            (
                self.refresh_log.batch_limit == 0,
                "refresh_log.batch_limit must be positive",
            ),
            (
                self.refresh_log.max_attempts == 0,
                "refresh_log.max_attempts must be positive",
            ),
            (
                self.refresh_log.lease_secs < self.refresh.fetch_timeout_secs,
                "refresh_log.lease_secs must be at least refresh.fetch_timeout_secs",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(ConfigError::Invalid(msg.to_string()).into()),
            None => Ok(()),
        }
    }

    /// Provider base URL, required by commands that reach upstream
    pub fn provider_url(&self) -> Result<&str> {
        self.provider
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingProvider.into())
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            show: minutes(self.ttl.show_minutes),
            episode: minutes(self.ttl.episode_minutes),
            search: minutes(self.ttl.search_minutes),
        }
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            min_age: Duration::from_secs(self.refresh_log.min_age_hours * 60 * 60),
            batch_limit: self.refresh_log.batch_limit,
            max_attempts: self.refresh_log.max_attempts,
            lease_ttl: Duration::from_secs(self.refresh_log.lease_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.fetch_timeout_secs)
    }

    pub fn lead_window(&self) -> Duration {
        minutes(self.refresh.lead_window_minutes)
    }

    pub fn backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.refresh.backoff_base_secs),
            Duration::from_secs(self.refresh.backoff_max_secs),
        )
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.provider.base_url.is_none());
        assert!(config.notifier.webhook_url.is_none());
        assert!(config.followed.is_empty());
        assert_eq!(config.ttl_policy(), TtlPolicy::default());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
ttl:
  episode_minutes: 30
provider:
  base_url: https://catalog.example.com
followed:
  - show-1
  - ep-2
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.ttl.episode_minutes, 30);
        assert_eq!(config.ttl.show_minutes, 7 * 24 * 60);
        assert_eq!(config.provider.requests_per_second, 5);
        assert_eq!(config.followed, vec!["show-1", "ep-2"]);
        assert_eq!(config.ttl_policy().episode, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_yaml("  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        match Config::from_yaml("ttl: [oops") {
            Err(Error::Config(ConfigError::ParseError(_))) => (),
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_explicit_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.yaml");
        let result = Config::load(Some(path.as_path()));
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::NotFound(_)))
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.provider.base_url = Some("https://catalog.example.com".to_string());
        config.followed = vec!["show-1".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PROVIDER_URL, "https://override.example.com"),
            (ENV_PROVIDER_KEY, "secret"),
            (ENV_WEBHOOK_URL, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.notifier.webhook_url = Some("https://hooks.example.com".to_string());
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.provider_url().unwrap(),
            "https://override.example.com"
        );
        assert_eq!(config.provider.api_key.as_deref(), Some("secret"));
        // Blank values do not clear what the file set
        assert_eq!(
            config.notifier.webhook_url.as_deref(),
            Some("https://hooks.example.com")
        );
    }

    #[test]
    fn test_missing_provider() {
        let config = Config::default();
        assert!(matches!(
            config.provider_url(),
            Err(Error::Config(ConfigError::MissingProvider))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.refresh.backoff_base_secs = 7200;
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_validate_rejects_lease_shorter_than_fetch() {
        let mut config = Config::default();
        config.refresh_log.lease_secs = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refresh_log.lease_secs"));
    }

    #[test]
    fn test_sweep_policy_conversion() {
        let mut config = Config::default();
        config.refresh_log.min_age_hours = 2;
        config.refresh_log.max_attempts = 3;

        let policy = config.sweep_policy();
        assert_eq!(policy.min_age, Duration::from_secs(2 * 60 * 60));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.batch_limit, 100);
    }
}
