//! Configuration types

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Broker endpoint configuration
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Broker credentials available to this process
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    /// Scheduler and worker tuning
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Broker endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Base URL for the broker REST API
    #[serde(default = "default_broker_rest_url")]
    pub rest_url: String,
    /// WebSocket URL for the broker streaming API
    #[serde(default = "default_broker_stream_url")]
    pub stream_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            rest_url: default_broker_rest_url(),
            stream_url: default_broker_stream_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_broker_rest_url() -> String {
    "https://demo-api-capital.backend-capital.com/api/v1".to_string()
}

fn default_broker_stream_url() -> String {
    "wss://api-streaming-capital.backend-capital.com/connect".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// One broker credential usable for sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Stable identifier used for pool bookkeeping
    pub id: String,
    /// Broker this credential belongs to
    #[serde(default = "default_broker_name")]
    pub broker: String,
    /// API key issued by the broker
    pub api_key: String,
    /// Account identifier (login)
    pub identifier: String,
    /// Account password / API secret used for request signing
    pub password: String,
    /// Demo account flag
    #[serde(default)]
    pub demo: bool,
    /// Broker-imposed concurrent session limit for this credential
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
}

fn default_broker_name() -> String {
    "capital".to_string()
}

fn default_max_sessions() -> u32 {
    // Brokers typically allow a single concurrent session per API key
    1
}

/// Scheduler and evaluation-worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Hard deadline for one bot evaluation in seconds
    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_seconds: u64,
    /// Safety-net dispatch interval in milliseconds
    ///
    /// Dispatch is normally event-driven off credential releases; this timer
    /// only guards against a missed wakeup.
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_ms: u64,
    /// Maximum retries for transient order-placement failures
    #[serde(default = "default_max_order_retries")]
    pub max_order_retries: u32,
    /// Initial backoff between order retries in milliseconds (doubles per attempt)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// TTL for cached dealing rules in seconds
    #[serde(default = "default_dealing_rules_ttl")]
    pub dealing_rules_ttl_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            evaluation_timeout_seconds: default_evaluation_timeout(),
            dispatch_interval_ms: default_dispatch_interval(),
            max_order_retries: default_max_order_retries(),
            retry_backoff_ms: default_retry_backoff(),
            dealing_rules_ttl_seconds: default_dealing_rules_ttl(),
        }
    }
}

fn default_evaluation_timeout() -> u64 {
    120
}

fn default_dispatch_interval() -> u64 {
    1000
}

fn default_max_order_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_dealing_rules_ttl() -> u64 {
    600
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Delay between feed reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Heartbeat/ping interval for the streaming connection in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconnect_delay_ms: default_reconnect_delay(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_defaults() {
        let cred: CredentialConfig = serde_json::from_value(serde_json::json!({
            "id": "cred-1",
            "api_key": "key",
            "identifier": "user@example.com",
            "password": "secret"
        }))
        .unwrap();
        assert_eq!(cred.max_sessions, 1);
        assert_eq!(cred.broker, "capital");
        assert!(!cred.demo);
    }

    #[test]
    fn test_scheduler_defaults() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.evaluation_timeout_seconds, 120);
        assert_eq!(settings.max_order_retries, 3);
    }
}
