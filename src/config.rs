//! Runtime configuration, driven by flags with environment fallbacks.
//!
//! Every knob the service reads lives here; components receive the values
//! they need through the orchestrator context rather than reading the
//! environment themselves.

use clap::Parser;
use std::time::Duration;
use thiserror::Error;

/// Hard ceiling on articles per feed, regardless of configuration.
pub const MAX_ARTICLES_CEILING: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration. Flags win over environment variables, which win
/// over the defaults.
#[derive(Parser, Debug, Clone)]
#[command(name = "feedforge", about = "RSS feed generation service", version)]
pub struct Config {
    /// Port the HTTP adapter listens on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// External base URL, used for self-referencing feed links
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:3000")]
    pub base_url: String,

    /// Content-cache TTL in seconds; also the channel TTL and max-age
    #[arg(long, env = "CACHE_DURATION", default_value_t = 3600)]
    pub cache_duration_secs: u64,

    /// Maximum articles per generated feed (hard ceiling 50)
    #[arg(long, env = "MAX_ARTICLES", default_value_t = 20)]
    pub max_articles: usize,

    /// Per-request origin fetch timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// Client-facing rate-limit window in seconds (admission layer)
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = 900)]
    pub rate_limit_window_secs: u64,

    /// Client-facing rate-limit ceiling per window (admission layer)
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = 100)]
    pub rate_limit_max: u32,

    /// Override the outbound User-Agent
    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Mask internal error details in client responses
    #[arg(long, env = "PRODUCTION", default_value_t = false)]
    pub production: bool,

    /// Permit fetching private/loopback hosts. Never enable outside tests.
    #[arg(long, env = "ALLOW_PRIVATE_NETWORKS", hide = true, default_value_t = false)]
    pub allow_private_networks: bool,
}

impl Config {
    /// Validates cross-field constraints after parsing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_articles == 0 || self.max_articles > MAX_ARTICLES_CEILING {
            return Err(ConfigError::Invalid(format!(
                "max_articles must be 1..={MAX_ARTICLES_CEILING}, got {}",
                self.max_articles
            )));
        }
        if self.cache_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache_duration_secs must be positive".into(),
            ));
        }
        if self.request_timeout_ms < 100 {
            return Err(ConfigError::Invalid(format!(
                "request_timeout_ms too small: {}",
                self.request_timeout_ms
            )));
        }
        if self.base_url.is_empty()
            || !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "base_url must be absolute http(s), got {:?}",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    /// Channel `<ttl>` in minutes, floor of the cache duration.
    pub fn ttl_minutes(&self) -> u64 {
        self.cache_duration_secs / 60
    }

    /// Defaults without touching the process environment; test constructor.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            base_url: "http://localhost:3000".into(),
            cache_duration_secs: 3600,
            max_articles: 20,
            request_timeout_ms: 10_000,
            rate_limit_window_secs: 900,
            rate_limit_max: 100,
            user_agent: None,
            production: false,
            allow_private_networks: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_and_validate() {
        let config = Config::parse_from(["feedforge"]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_duration_secs, 3600);
        assert_eq!(config.max_articles, 20);
        assert!(!config.production);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::parse_from([
            "feedforge",
            "--port",
            "8080",
            "--max-articles",
            "5",
            "--production",
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_articles, 5);
        assert!(config.production);
    }

    #[test]
    fn test_max_articles_bounds() {
        let mut config = Config::for_tests();
        config.max_articles = 0;
        assert!(config.validate().is_err());
        config.max_articles = MAX_ARTICLES_CEILING + 1;
        assert!(config.validate().is_err());
        config.max_articles = MAX_ARTICLES_CEILING;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_must_be_absolute() {
        let mut config = Config::for_tests();
        config.base_url = "not-a-url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_minutes_floors() {
        let mut config = Config::for_tests();
        config.cache_duration_secs = 3599;
        assert_eq!(config.ttl_minutes(), 59);
        config.cache_duration_secs = 3600;
        assert_eq!(config.ttl_minutes(), 60);
    }
}
