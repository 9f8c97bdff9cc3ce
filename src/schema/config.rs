//! Configuration types for the optimization client.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BoundsError, MethodParams, MethodTab, ParamError, RunSettings, SearchBounds};
use crate::expr::{SandboxError, validate};

fn default_backend_url() -> String {
    "ws://localhost:9000".to_string()
}
fn default_max_active_sessions() -> usize {
    5
}
fn default_function() -> String {
    "cos(x^2+y^2)".to_string()
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the optimization backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Cap on sessions that are connecting or running at the same time.
    #[serde(default = "default_max_active_sessions")]
    pub max_active_sessions: usize,
    /// Retries applied while opening a transport.
    #[serde(default)]
    pub open_retry: RetryPolicy,
    /// Objective every tab starts with.
    #[serde(default = "default_function")]
    pub default_function: String,
    /// Search box every tab starts with.
    #[serde(default)]
    pub default_bounds: SearchBounds,
    /// Iteration budget and population size every tab starts with.
    #[serde(default)]
    pub run_settings: RunSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            max_active_sessions: default_max_active_sessions(),
            open_retry: RetryPolicy::default(),
            default_function: default_function(),
            default_bounds: SearchBounds::default(),
            run_settings: RunSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_url.trim().is_empty() {
            return Err(ConfigError::EmptyBackendUrl);
        }
        if self.max_active_sessions == 0 {
            return Err(ConfigError::InvalidSessionCap);
        }
        validate(&self.default_function)?;
        self.default_bounds.validate()?;
        self.run_settings.validate()?;
        Ok(())
    }
}

/// How often, and after which delays, a failed transport open is retried.
///
/// Retries apply only before the transport has ever signalled open. A session
/// whose connection drops after opening is never resumed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional open attempts after the first one fails.
    #[serde(default)]
    pub max_attempts: u32,
    /// Delay before each retry in milliseconds. The last entry repeats.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self::default()
    }

    /// Three retries after 1s, 2s and 4s.
    pub fn reconnect_table() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![1000, 2000, 4000],
        }
    }

    /// Whether retry number `attempt` (1-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        let ms = self
            .backoff_ms
            .get(index)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// A single optimization run, as read by the command-line client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub client: ClientConfig,
    pub method: MethodTab,
    pub function: String,
    #[serde(default)]
    pub bounds: SearchBounds,
    #[serde(default)]
    pub settings: RunSettings,
    #[serde(default)]
    pub params: MethodParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            method: MethodTab::Bbo,
            function: "(1-x)^2 + 100*(y - x^2)^2".to_string(),
            bounds: SearchBounds::default(),
            settings: RunSettings::default(),
            params: MethodTab::Bbo.default_params(),
        }
    }
}

impl RunConfig {
    /// Read and validate a run file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every part of the run without contacting the backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        validate(&self.function)?;
        self.bounds.validate()?;
        super::validate_params(self.method, &self.params, &self.settings)?;
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Backend URL must not be empty")]
    EmptyBackendUrl,
    #[error("Active session cap must be at least 1")]
    InvalidSessionCap,
    #[error("Invalid function: {0}")]
    Function(#[from] SandboxError),
    #[error("Invalid bounds: {0}")]
    Bounds(#[from] BoundsError),
    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamError),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(ClientConfig::default().validate().is_ok());
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.max_active_sessions, 5);
        assert_eq!(config.open_retry, RetryPolicy::none());
    }

    #[test]
    fn test_invalid_client_config() {
        let config = ClientConfig {
            max_active_sessions: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSessionCap)));

        let config = ClientConfig {
            default_function: "shell(x)".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Function(_))));
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy::reconnect_table();
        assert!(!policy.allows(0));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(4000));
        assert_eq!(policy.delay(7), Duration::from_millis(4000));
        assert_eq!(RetryPolicy::none().delay(1), Duration::ZERO);
    }

    #[test]
    fn test_run_config_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "method": "harmony",
                "function": "x^2 + y^2",
                "bounds": {{ "lower_x": 5, "upper_x": -5, "lower_y": -2, "upper_y": 2 }},
                "params": {{ "hmcr": 0.95 }}
            }}"#
        )
        .unwrap();

        let run = RunConfig::from_path(file.path()).unwrap();
        assert_eq!(run.method, MethodTab::Harmony);
        assert_eq!(run.bounds.lower_bounds(), [-5.0, -2.0]);
        assert_eq!(run.client.backend_url, "ws://localhost:9000");
    }

    #[test]
    fn test_run_config_rejects_unsafe_function() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "method": "bbo", "function": "exec(x)" }}"#).unwrap();
        assert!(matches!(
            RunConfig::from_path(file.path()),
            Err(ConfigError::Function(_))
        ));
    }

    #[test]
    fn test_run_config_missing_file() {
        assert!(matches!(
            RunConfig::from_path("/nonexistent/run.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
