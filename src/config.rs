use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use url::Url;

use crate::models::{BaselineRule, DropTrigger, ThresholdPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetcher: FetcherConfig,
    pub checker: CheckerConfig,
    pub analysis: AnalysisConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Total attempts per fetch, including the first one.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_redirects: usize,
    /// Replaces the built-in user-agent pool when non-empty.
    pub user_agents: Vec<String>,
    /// Extra or overriding request headers sent with every fetch.
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub max_concurrent_checks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Threshold given to products added without one, e.g. `"5%"` or `"10.00"`.
    pub default_threshold: String,
    /// `previous`, `initial` or `rolling:<n>`.
    pub default_baseline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub retain_history_on_remove: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
    pub include_summaries: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 20,
            connect_timeout_secs: 10,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            max_redirects: 10,
            user_agents: Vec::new(),
            headers: HashMap::new(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 4,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_threshold: "5%".to_string(),
            default_baseline: "previous".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/prices.db".to_string(),
            max_connections: 5,
            acquire_timeout: 30,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: "Price Drop Watcher".to_string(),
            avatar_url: None,
            include_summaries: true,
            timeout_secs: 15,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "price-drop-watcher.log".to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl AnalysisConfig {
    pub fn default_policy(&self) -> Result<ThresholdPolicy, ConfigError> {
        let trigger: DropTrigger = self
            .default_threshold
            .parse()
            .map_err(|e: crate::utils::error::AppError| ConfigError::Message(e.to_string()))?;
        let baseline: BaselineRule = self
            .default_baseline
            .parse()
            .map_err(|e: crate::utils::error::AppError| ConfigError::Message(e.to_string()))?;

        let policy = ThresholdPolicy::new(trigger, baseline);
        policy
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid default threshold: {}", e)))?;
        Ok(policy)
    }
}

impl AppConfig {
    /// Loads configuration from built-in defaults, optional files under
    /// `config/`, an optional explicit file and `PRICEDROP__*` environment
    /// variables, in increasing order of precedence.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides (ignored by git)
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path));
        }

        let s = builder
            .add_source(Environment::with_prefix("PRICEDROP").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Fetcher
        if self.fetcher.retry_attempts == 0 {
            return Err(ConfigError::Message("Fetcher retry_attempts must be at least 1".into()));
        }

        if self.fetcher.request_timeout_secs == 0 {
            return Err(ConfigError::Message("Fetcher request_timeout_secs must be greater than 0".into()));
        }

        if self.fetcher.retry_base_delay_ms > self.fetcher.retry_max_delay_ms {
            return Err(ConfigError::Message(
                "Fetcher retry_base_delay_ms cannot exceed retry_max_delay_ms".into(),
            ));
        }

        if self.fetcher.user_agents.iter().any(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Message("Fetcher user_agents cannot contain empty entries".into()));
        }

        // Checker
        if self.checker.max_concurrent_checks == 0 {
            return Err(ConfigError::Message("Checker max_concurrent_checks must be greater than 0".into()));
        }

        self.analysis.default_policy()?;

        // Database
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(ConfigError::Message("Database url must be a sqlite: URL".into()));
        }

        // Notifications
        if let Some(webhook) = &self.notifications.webhook_url {
            match Url::parse(webhook) {
                Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
                _ => return Err(ConfigError::Message("Invalid notifications webhook_url".into())),
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Message("Logging level cannot be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_config_validation_valid() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetcher.retry_attempts, 3);
        assert_eq!(config.checker.max_concurrent_checks, 4);
        assert!(!config.store.retain_history_on_remove);
    }

    #[test]
    fn test_config_validation_zero_retry_attempts() {
        let mut config = valid_config();
        config.fetcher.retry_attempts = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("retry_attempts must be at least 1"));
    }

    #[test]
    fn test_config_validation_backoff_bounds() {
        let mut config = valid_config();
        config.fetcher.retry_base_delay_ms = 60_000;
        config.fetcher.retry_max_delay_ms = 1_000;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cannot exceed retry_max_delay_ms"));
    }

    #[test]
    fn test_config_validation_zero_concurrency() {
        let mut config = valid_config();
        config.checker.max_concurrent_checks = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_concurrent_checks must be greater than 0"));
    }

    #[test]
    fn test_config_validation_invalid_default_threshold() {
        let mut config = valid_config();
        config.analysis.default_threshold = "lots".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.analysis.default_threshold = "0%".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid default threshold"));
    }

    #[test]
    fn test_config_validation_invalid_webhook() {
        let mut config = valid_config();
        config.notifications.webhook_url = Some("not-a-valid-url".to_string());

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("webhook_url"));
    }

    #[test]
    fn test_config_validation_non_sqlite_database() {
        let mut config = valid_config();
        config.database.url = "postgres://localhost/prices".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("sqlite"));
    }

    #[test]
    fn test_default_policy_from_config() {
        let mut config = valid_config();
        config.analysis.default_threshold = "10%".to_string();
        config.analysis.default_baseline = "rolling:3".to_string();

        let policy = config.analysis.default_policy().unwrap();
        assert_eq!(policy.trigger, DropTrigger::Percent(Decimal::new(10, 2)));
        assert_eq!(policy.baseline, BaselineRule::RollingMinimum { window: 3 });
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watcher.toml");
        std::fs::write(
            &path,
            "[fetcher]\nretry_attempts = 5\n\n[checker]\nmax_concurrent_checks = 2\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.fetcher.retry_attempts, 5);
        assert_eq!(config.checker.max_concurrent_checks, 2);
        // Untouched sections keep their defaults
        assert_eq!(config.analysis.default_threshold, "5%");
    }

    fn valid_config() -> AppConfig {
        AppConfig {
            fetcher: FetcherConfig {
                request_timeout_secs: 20,
                connect_timeout_secs: 10,
                retry_attempts: 3,
                retry_base_delay_ms: 500,
                retry_max_delay_ms: 10_000,
                max_redirects: 10,
                user_agents: vec!["PriceDropWatcher/1.0".to_string()],
                headers: HashMap::new(),
            },
            checker: CheckerConfig {
                max_concurrent_checks: 4,
            },
            analysis: AnalysisConfig {
                default_threshold: "5%".to_string(),
                default_baseline: "previous".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/test.db".to_string(),
                max_connections: 5,
                acquire_timeout: 30,
            },
            store: StoreConfig {
                retain_history_on_remove: false,
            },
            notifications: NotificationsConfig {
                webhook_url: Some("https://discord.com/api/webhooks/1/abc".to_string()),
                username: "Price Drop Watcher".to_string(),
                avatar_url: None,
                include_summaries: true,
                timeout_secs: 15,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                directory: None,
                file_prefix: "price-drop-watcher.log".to_string(),
            },
        }
    }
}
