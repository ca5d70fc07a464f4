//! Configuration loader and validator for the digest service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub lock: Lock,
    #[serde(default)]
    pub updates: Updates,
    pub mailer: Mailer,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Root used to build links in outgoing emails.
    pub base_url: String,
}

/// Digest mutex retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lock {
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for Lock {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            backoff_min_ms: 100,
            backoff_max_ms: 200,
        }
    }
}

impl Lock {
    pub fn backoff_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

/// Periodic updates job settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Updates {
    /// Cron expression (seconds first), evaluated in UTC.
    pub schedule: String,
    pub item_trim_length: usize,
    pub organisation_trim_length: usize,
    /// Organisations skipped by name in addition to those flagged as demo.
    #[serde(default)]
    pub demo_org_names: Vec<String>,
}

impl Default for Updates {
    fn default() -> Self {
        Self {
            schedule: "0 0 0 * * *".into(),
            item_trim_length: 500,
            organisation_trim_length: 50,
            demo_org_names: vec!["DEMO".into()],
        }
    }
}

/// Mail relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mailer {
    pub endpoint: String,
    pub token: String,
    pub from: String,
    pub subject: String,
    /// Prefix subject and sender with "TEST " (non-production deployments).
    #[serde(default)]
    pub test_mode: bool,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/digest.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.base_url must be non-empty"));
    }

    if cfg.lock.max_attempts == 0 {
        return Err(ConfigError::Invalid("lock.max_attempts must be > 0"));
    }
    if cfg.lock.backoff_max_ms <= cfg.lock.backoff_min_ms {
        return Err(ConfigError::Invalid(
            "lock.backoff_max_ms must be greater than lock.backoff_min_ms",
        ));
    }

    if cron::Schedule::from_str(&cfg.updates.schedule).is_err() {
        return Err(ConfigError::Invalid("updates.schedule must be a valid cron expression"));
    }
    if cfg.updates.item_trim_length == 0 {
        return Err(ConfigError::Invalid("updates.item_trim_length must be > 0"));
    }
    if cfg.updates.organisation_trim_length == 0 {
        return Err(ConfigError::Invalid("updates.organisation_trim_length must be > 0"));
    }

    if cfg.mailer.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("mailer.endpoint must be non-empty"));
    }
    if cfg.mailer.token.trim().is_empty() {
        return Err(ConfigError::Invalid("mailer.token must be non-empty"));
    }
    if cfg.mailer.from.trim().is_empty() {
        return Err(ConfigError::Invalid("mailer.from must be non-empty"));
    }

    Ok(())
}

/// Example YAML accepted by `load`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  base_url: "https://app.salpulse.com"

lock:
  max_attempts: 100
  backoff_min_ms: 100
  backoff_max_ms: 200

updates:
  # Every day at 00:00 UTC
  schedule: "0 0 0 * * *"
  item_trim_length: 500
  organisation_trim_length: 50
  demo_org_names:
    - "DEMO"

mailer:
  endpoint: "https://mail-relay.example.com/v1/send"
  token: "YOUR_MAIL_RELAY_TOKEN"
  from: "Salpulse <notifications@salpulse.com>"
  subject: "What's been happening on Salpulse"
  test_mode: false
"#
}
