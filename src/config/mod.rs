//! # Configuration
//!
//! Engine and collaborator settings loaded from environment variables.
//! Every value has a default from [`crate::constants`]; the CLI may override
//! the engine settings with flags.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;

/// How a failed SLO query affects the trigger being gated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SloFailurePolicy {
    /// Treat the failure as a breach and drop the trigger
    #[default]
    FailClosed,
    /// Treat the failure as no breach and keep the trigger
    FailOpen,
}

impl FromStr for SloFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-closed" | "closed" => Ok(Self::FailClosed),
            "fail-open" | "open" => Ok(Self::FailOpen),
            other => Err(anyhow!("unknown SLO failure policy '{other}'")),
        }
    }
}

/// Settings consumed by the engine itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HerderSettings {
    /// Upper bound of concurrent collaborator lookups
    pub thread_pool_size: usize,
    /// Commit prefix length used as image tag
    pub hash_length: usize,
    /// Fill `reason` on trigger specs
    pub include_trigger_trace: bool,
    pub slo_failure_policy: SloFailurePolicy,
}

impl Default for HerderSettings {
    fn default() -> Self {
        Self {
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            hash_length: DEFAULT_HASH_LENGTH,
            include_trigger_trace: false,
            slo_failure_policy: SloFailurePolicy::default(),
        }
    }
}

/// Process-level configuration
///
/// Tokens are optional; collaborators without credentials send anonymous
/// requests.
#[derive(Debug, Clone)]
pub struct HerderConfig {
    pub thread_pool_size: usize,
    pub hash_length: usize,
    pub include_trigger_trace: bool,
    pub slo_failure_policy: SloFailurePolicy,
    /// Root directory of the file-backed state store
    pub state_dir: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,
    pub github_api_url: String,
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
    pub jenkins_user: Option<String>,
    pub jenkins_token: Option<String>,
    pub registry_token: Option<String>,
    /// Prometheus endpoint for SLO queries
    pub prometheus_url: Option<String>,
    pub prometheus_token: Option<String>,
    /// Directory holding secrets as `{path}/{field}` files
    pub secrets_dir: Option<String>,
    pub feature_toggle_url: Option<String>,
    pub feature_toggle_token: Option<String>,
    pub feature_toggle_refresh_secs: u64,
}

impl Default for HerderConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            hash_length: DEFAULT_HASH_LENGTH,
            include_trigger_trace: false,
            slo_failure_policy: SloFailurePolicy::default(),
            state_dir: DEFAULT_STATE_DIR.to_string(),
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_max_retries: DEFAULT_HTTP_MAX_RETRIES,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_token: None,
            gitlab_token: None,
            jenkins_user: None,
            jenkins_token: None,
            registry_token: None,
            prometheus_url: None,
            prometheus_token: None,
            secrets_dir: None,
            feature_toggle_url: None,
            feature_toggle_token: None,
            feature_toggle_refresh_secs: DEFAULT_FEATURE_TOGGLE_REFRESH_SECS,
        }
    }
}

impl HerderConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            thread_pool_size: env_var_or_default(
                "SAASHERDER_THREAD_POOL_SIZE",
                DEFAULT_THREAD_POOL_SIZE,
            ),
            hash_length: env_var_or_default("SAASHERDER_HASH_LENGTH", DEFAULT_HASH_LENGTH),
            include_trigger_trace: env_var_or_default_bool("SAASHERDER_INCLUDE_TRIGGER_TRACE", false),
            slo_failure_policy: env_var_or_default(
                "SAASHERDER_SLO_FAILURE_POLICY",
                SloFailurePolicy::default(),
            ),
            state_dir: env_var_or_default_str("SAASHERDER_STATE_DIR", DEFAULT_STATE_DIR),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            http_timeout_secs: env_var_or_default("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            http_max_retries: env_var_or_default("HTTP_MAX_RETRIES", DEFAULT_HTTP_MAX_RETRIES),
            github_api_url: env_var_or_default_str("GITHUB_API", DEFAULT_GITHUB_API_URL),
            github_token: env_var_opt("GITHUB_TOKEN"),
            gitlab_token: env_var_opt("GITLAB_TOKEN"),
            jenkins_user: env_var_opt("JENKINS_USER"),
            jenkins_token: env_var_opt("JENKINS_TOKEN"),
            registry_token: env_var_opt("REGISTRY_TOKEN"),
            prometheus_url: env_var_opt("PROMETHEUS_URL"),
            prometheus_token: env_var_opt("PROMETHEUS_TOKEN"),
            secrets_dir: env_var_opt("SAASHERDER_SECRETS_DIR"),
            feature_toggle_url: env_var_opt("UNLEASH_API_URL"),
            feature_toggle_token: env_var_opt("UNLEASH_CLIENT_ACCESS_TOKEN"),
            feature_toggle_refresh_secs: env_var_or_default(
                "UNLEASH_REFRESH_INTERVAL_SECS",
                DEFAULT_FEATURE_TOGGLE_REFRESH_SECS,
            ),
        }
    }

    /// Engine subset of the configuration
    #[must_use]
    pub fn herder_settings(&self) -> HerderSettings {
        HerderSettings {
            thread_pool_size: self.thread_pool_size.max(1),
            hash_length: self.hash_length,
            include_trigger_trace: self.include_trigger_trace,
            slo_failure_policy: self.slo_failure_policy,
        }
    }

    /// Get HTTP request timeout duration
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Get feature toggle refresh interval
    #[must_use]
    pub fn feature_toggle_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.feature_toggle_refresh_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HerderConfig::default();
        assert_eq!(config.thread_pool_size, DEFAULT_THREAD_POOL_SIZE);
        assert_eq!(config.hash_length, DEFAULT_HASH_LENGTH);
        assert_eq!(config.slo_failure_policy, SloFailurePolicy::FailClosed);
        assert_eq!(config.herder_settings(), HerderSettings::default());
    }

    #[test]
    fn test_slo_failure_policy_from_str() {
        assert_eq!(
            "fail_open".parse::<SloFailurePolicy>().unwrap(),
            SloFailurePolicy::FailOpen
        );
        assert_eq!(
            "FAIL-CLOSED".parse::<SloFailurePolicy>().unwrap(),
            SloFailurePolicy::FailClosed
        );
        assert!("maybe".parse::<SloFailurePolicy>().is_err());
    }

    #[test]
    fn test_thread_pool_size_is_at_least_one() {
        let config = HerderConfig {
            thread_pool_size: 0,
            ..HerderConfig::default()
        };
        assert_eq!(config.herder_settings().thread_pool_size, 1);
    }
}
