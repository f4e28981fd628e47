//! Configuration types for a Conduit process.

use crate::policy::ErrorPolicy;
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `~/.conduit/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Subject domain for message-bus routes (`{domain}.{service}.request`).
    pub domain: String,
    /// Policy used when an envelope does not declare its own.
    pub default_error_policy: ErrorPolicy,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
    /// Known downstream services.
    pub services: Vec<ServiceConfig>,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            domain: "mcp".to_string(),
            default_error_policy: ErrorPolicy::default(),
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
            services: Vec::new(),
        }
    }
}

impl ConduitConfig {
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Backoff timing for retries. The count comes from each call's `ErrorPolicy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Delay before the first retry.
    pub min_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// 0.0 = exact doubling, 1.0 = up to +100%.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 200,
            max_delay_ms: 10_000,
            jitter: 0.0,
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One downstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub transport: TransportKind,
    /// Built-in injector: "default", "database", "filesystem" or "http".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injector: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ErrorMode;

    #[test]
    fn test_defaults() {
        let c = ConduitConfig::default();
        assert_eq!(c.domain, "mcp");
        assert_eq!(c.default_error_policy.mode, ErrorMode::FailFast);
        assert_eq!(c.retry.min_delay_ms, 200);
        assert_eq!(c.logging.level, "info");
        assert!(c.services.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            domain = "acme"

            [default_error_policy]
            mode = "allow_partial"
            retry_count = 2

            [retry]
            min_delay_ms = 50

            [[services]]
            name = "database"
            transport = "rpc"
            injector = "database"

            [[services]]
            name = "search"
            transport = "http"
        "#;
        let c: ConduitConfig = toml::from_str(raw).unwrap();
        assert_eq!(c.domain, "acme");
        assert_eq!(c.default_error_policy.mode, ErrorMode::AllowPartial);
        assert_eq!(c.default_error_policy.retry_count, 2);
        assert_eq!(c.retry.min_delay_ms, 50);
        assert_eq!(c.retry.max_delay_ms, 10_000);
        assert_eq!(c.services.len(), 2);
        assert_eq!(c.service("database").unwrap().transport, TransportKind::Rpc);
        assert!(c.service("search").unwrap().injector.is_none());
        assert!(c.service("missing").is_none());
    }
}
