//! Configuration types for the Tripwire sensor

use crate::stats::Cadence;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TripwireConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Aggregation and rollover settings
    #[serde(default)]
    pub stats: StatsConfig,

    /// Periodic summary reporting
    #[serde(default)]
    pub report: ReportConfig,

    /// Per-request detail notifications
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Server listening configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable access logging
    #[serde(default = "default_true")]
    pub access_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            access_log: true,
        }
    }
}

/// Statistics aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Rollover cadence
    ///
    /// ```toml
    /// [stats]
    /// cadence = "debug"  # or "production" (hourly)
    /// ```
    #[serde(default)]
    pub cadence: Cadence,

    /// Entries shown per ranked table in the summary
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Persisted snapshot of the running cycle
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory receiving one snapshot per completed cycle
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            top_n: default_top_n(),
            state_file: default_state_file(),
            archive_dir: default_archive_dir(),
        }
    }
}

/// Summary report sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Webhook receiving the summary; reporting is disabled when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Embed title
    #[serde(default = "default_report_title")]
    pub title: String,

    /// Embed colour marker
    #[serde(default = "default_color")]
    pub color: u32,

    /// Delivery timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            title: default_report_title(),
            color: default_color(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Per-request notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook receiving one embed per request
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// File mirroring the log output
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Delivery timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            log_file: None,
            timeout_secs: default_timeout(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_top_n() -> usize {
    5
}

fn default_state_file() -> PathBuf {
    PathBuf::from("stats.json")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("stats_archive")
}

fn default_report_title() -> String {
    "Honeypot Stats".to_string()
}

fn default_color() -> u32 {
    0x3498db
}

fn default_timeout() -> u64 {
    10
}

impl TripwireConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply environment-style overrides from `lookup`
    ///
    /// `DISCORD_WEBHOOK_URL` fills whichever webhook the file left unset,
    /// `STATS_WEBHOOK_URL` targets the summary sink only, `LOG_FILE` sets the
    /// log mirror and `DEBUG_STATS` forces the minutely cadence.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DISCORD_WEBHOOK_URL") {
            self.report.webhook_url.get_or_insert_with(|| url.clone());
            self.notify.webhook_url.get_or_insert(url);
        }
        if let Some(url) = non_empty("STATS_WEBHOOK_URL") {
            self.report.webhook_url = Some(url);
        }
        if let Some(file) = non_empty("LOG_FILE") {
            self.notify.log_file = Some(PathBuf::from(file));
        }
        if let Some(flag) = non_empty("DEBUG_STATS") {
            if matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                self.stats.cadence = Cadence::Debug;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.stats.top_n == 0 {
            return Err(ConfigError::ValidationError(
                "stats.top_n must be at least 1".to_string(),
            ));
        }

        if self.stats.state_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "stats.state_file cannot be empty".to_string(),
            ));
        }

        for (name, url) in [
            ("report.webhook_url", &self.report.webhook_url),
            ("notify.webhook_url", &self.notify.webhook_url),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::ValidationError(format!(
                        "{} must be an http(s) URL, got '{}'",
                        name, url
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = TripwireConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.stats.cadence, Cadence::Production);
        assert_eq!(config.stats.top_n, 5);
        assert!(config.report.webhook_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind_address = "127.0.0.1"
port = 3000

[stats]
cadence = "debug"
top_n = 10
state_file = "/var/lib/tripwire/stats.json"
archive_dir = "/var/lib/tripwire/archive"

[report]
webhook_url = "https://discord.example/api/webhooks/1/abc"
color = 15158332
"#;

        let config = TripwireConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.stats.cadence, Cadence::Debug);
        assert_eq!(config.stats.top_n, 10);
        assert_eq!(
            config.stats.archive_dir,
            PathBuf::from("/var/lib/tripwire/archive")
        );
        assert_eq!(config.report.color, 15158332);
        assert_eq!(config.report.title, "Honeypot Stats");
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DISCORD_WEBHOOK_URL", "https://hooks.example/shared"),
            ("LOG_FILE", "honeypot.log"),
            ("DEBUG_STATS", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = TripwireConfig::default();
        config.notify.webhook_url = Some("https://hooks.example/detail".to_string());
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.report.webhook_url.as_deref(),
            Some("https://hooks.example/shared")
        );
        assert_eq!(
            config.notify.webhook_url.as_deref(),
            Some("https://hooks.example/detail")
        );
        assert_eq!(config.notify.log_file, Some(PathBuf::from("honeypot.log")));
        assert_eq!(config.stats.cadence, Cadence::Debug);
    }

    #[test]
    fn test_stats_webhook_wins_for_reports() {
        let mut config = TripwireConfig::default();
        config.apply_overrides(|key| match key {
            "DISCORD_WEBHOOK_URL" => Some("https://hooks.example/shared".to_string()),
            "STATS_WEBHOOK_URL" => Some("https://hooks.example/stats".to_string()),
            "DEBUG_STATS" => Some("0".to_string()),
            _ => None,
        });

        assert_eq!(
            config.report.webhook_url.as_deref(),
            Some("https://hooks.example/stats")
        );
        assert_eq!(config.stats.cadence, Cadence::Production);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TripwireConfig::default();
        config.stats.top_n = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = TripwireConfig::default();
        config.report.webhook_url = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());
    }
}
