use std::{env, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Configuration for the gateway and the automation client it drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Session name under which the client persists its credentials.
    pub client_id: String,
    /// Directory the client stores its authentication data in.
    pub auth_data_path: String,
    /// Browser binary to launch; `None` lets the client pick its bundled one.
    pub browser_executable: Option<String>,
    pub headless: bool,
    pub browser_args: Vec<String>,
    /// Pause between tearing a session down and constructing the next one.
    pub quiescence_delay_ms: u64,
    /// Retries granted to a send hitting the transient fault.
    pub max_send_retries: u32,
    /// Backoff unit; the n-th retry waits `n * retry_step_ms`.
    pub retry_step_ms: u64,
    /// Error fragment identifying the retryable send fault.
    pub transient_fault_signature: String,
    /// Error fragments after which the session is considered dead.
    pub unrecoverable_fault_signatures: Vec<String>,
    /// How many recent messages are searched when locating one by id.
    pub message_window: usize,
    /// Window used when downloading a message's media.
    pub media_window: usize,
    /// Overall ceiling for the welcome-message send.
    pub welcome_timeout_secs: u64,
    pub default_app_link: String,
    /// Buffered lifecycle events per subscriber before it starts losing them.
    pub event_capacity: usize,
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_id: "main-session".into(),
            auth_data_path: "./.wwebjs_auth".into(),
            browser_executable: None,
            headless: true,
            browser_args: [
                "--no-sandbox",
                "--disable-setuid-sandbox",
                "--disable-dev-shm-usage",
                "--disable-accelerated-2d-canvas",
                "--no-first-run",
                "--disable-gpu",
                "--disable-extensions",
                "--disable-background-networking",
                "--disable-default-apps",
                "--disable-sync",
                "--metrics-recording-only",
                "--mute-audio",
                "--no-default-browser-check",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
            quiescence_delay_ms: 2_000,
            max_send_retries: 3,
            retry_step_ms: 2_000,
            transient_fault_signature: "markedUnread".into(),
            unrecoverable_fault_signatures: vec!["Session closed".into(), "Browser closed".into()],
            message_window: 50,
            media_window: 200,
            welcome_timeout_secs: 30,
            default_app_link: "https://x.com".into(),
            event_capacity: 256,
            log_level: "info".into(),
        }
    }
}

impl GatewayConfig {
    /// Load a JSON config file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))
    }

    /// Apply `GATEWAY_AUTH_PATH`, `GATEWAY_BROWSER_PATH` and `GATEWAY_LOG_LEVEL`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup("GATEWAY_AUTH_PATH").filter(|v| !v.is_empty()) {
            self.auth_data_path = path;
        }
        if let Some(browser) = lookup("GATEWAY_BROWSER_PATH").filter(|v| !v.is_empty()) {
            self.browser_executable = Some(browser);
        }
        if let Some(level) = lookup("GATEWAY_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        self
    }

    /// Override the session name.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Override the authentication data directory.
    pub fn with_auth_data_path(mut self, path: impl Into<String>) -> Self {
        self.auth_data_path = path.into();
        self
    }

    /// Override the pause before a new session is constructed.
    pub fn with_quiescence_delay(mut self, delay: Duration) -> Self {
        self.quiescence_delay_ms = millis(delay);
        self
    }

    /// Override the send retry budget.
    pub fn with_max_send_retries(mut self, retries: u32) -> Self {
        self.max_send_retries = retries;
        self
    }

    /// Override the backoff unit.
    pub fn with_retry_step(mut self, step: Duration) -> Self {
        self.retry_step_ms = millis(step);
        self
    }

    /// Override the message lookup window.
    pub fn with_message_window(mut self, window: usize) -> Self {
        self.message_window = window;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn quiescence_delay(&self) -> Duration {
        Duration::from_millis(self.quiescence_delay_ms)
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }

    pub fn welcome_timeout(&self) -> Duration {
        Duration::from_secs(self.welcome_timeout_secs)
    }

    /// Whether a collaborator error message means the session is gone.
    pub fn is_unrecoverable(&self, message: &str) -> bool {
        self.unrecoverable_fault_signatures
            .iter()
            .any(|signature| !signature.is_empty() && message.contains(signature.as_str()))
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.quiescence_delay(), Duration::from_secs(2));
        assert_eq!(config.max_send_retries, 3);
        assert_eq!(config.retry_step(), Duration::from_secs(2));
        assert_eq!(config.message_window, 50);
        assert_eq!(config.welcome_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"client_id":"crm","max_send_retries":5}"#).unwrap();
        assert_eq!(config.client_id, "crm");
        assert_eq!(config.max_send_retries, 5);
        assert_eq!(config.transient_fault_signature, "markedUnread");
    }

    #[test]
    fn environment_overrides_apply_when_set() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_AUTH_PATH", "/data/auth"),
            ("GATEWAY_BROWSER_PATH", ""),
            ("GATEWAY_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let config = GatewayConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.auth_data_path, "/data/auth");
        assert_eq!(config.browser_executable, None);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn recognizes_unrecoverable_faults() {
        let config = GatewayConfig::default();
        assert!(config.is_unrecoverable("Protocol error: Session closed. Most likely the page has been closed."));
        assert!(!config.is_unrecoverable("Evaluation failed"));
    }

    #[test]
    fn oversized_durations_saturate() {
        let config = GatewayConfig::default()
            .with_quiescence_delay(Duration::MAX)
            .with_retry_step(Duration::from_millis(1_500));
        assert_eq!(config.quiescence_delay_ms, u64::MAX);
        assert_eq!(config.retry_step(), Duration::from_millis(1_500));
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = GatewayConfig::from_json_file("/nonexistent/gateway.json").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
