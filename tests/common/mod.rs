//! Common test utilities and fixtures

use bot_coordinator::common::types::{PriceTick, Resolution};
use bot_coordinator::config::types::{CredentialConfig, SchedulerSettings};
use bot_coordinator::scheduler::BotConfig;
use rust_decimal_macros::dec;

/// Create a demo credential for testing
pub fn credential(id: &str, max_sessions: u32) -> CredentialConfig {
    CredentialConfig {
        id: id.to_string(),
        broker: "capital".to_string(),
        api_key: "test-api-key".to_string(),
        identifier: "test-user@example.com".to_string(),
        password: "test-password".to_string(),
        demo: true,
        max_sessions,
    }
}

/// Create a bot configuration for testing
pub fn bot_config(id: &str, symbol: &str) -> BotConfig {
    BotConfig {
        id: id.to_string(),
        name: format!("test bot {}", id),
        symbol: symbol.to_string(),
        resolution: Resolution::Minute,
        preferred_broker: None,
        ai_trading_enabled: true,
        deal_size: dec!(0.01),
    }
}

/// Scheduler settings tuned for fast tests: short deadline, quick dispatch
pub fn fast_scheduler_settings() -> SchedulerSettings {
    SchedulerSettings {
        evaluation_timeout_seconds: 1,
        dispatch_interval_ms: 20,
        max_order_retries: 2,
        retry_backoff_ms: 10,
        dealing_rules_ttl_seconds: 600,
    }
}

/// Create a sample price tick for testing
pub fn sample_tick(symbol: &str, resolution: Resolution) -> PriceTick {
    PriceTick {
        symbol: symbol.to_string(),
        resolution,
        bid: dec!(42000.5),
        ask: dec!(42001.5),
        timestamp: chrono::Utc::now(),
    }
}

/// Sample broker API response bodies for wiremock-backed tests
pub mod broker_responses {
    use serde_json::{json, Value};

    /// Market details for BTCUSD with realistic dealing rules
    pub fn market_details() -> Value {
        json!({
            "instrument": {
                "epic": "BTCUSD",
                "name": "Bitcoin",
                "currency": "USD",
                "lotSize": 1,
                "type": "CRYPTOCURRENCIES"
            },
            "dealingRules": {
                "minDealSize": { "unit": "AMOUNT", "value": 0.001 },
                "maxDealSize": { "unit": "AMOUNT", "value": 100 },
                "minStepDistance": { "unit": "AMOUNT", "value": 0.001 }
            },
            "snapshot": {
                "bid": 42000.5,
                "offer": 42001.5,
                "marketStatus": "TRADEABLE",
                "updateTime": "2024-01-15T10:30:00"
            }
        })
    }

    /// A single-entry prices response
    pub fn latest_price() -> Value {
        json!({
            "prices": [
                {
                    "snapshotTime": "2024-01-15T10:30:00",
                    "closePrice": { "bid": 42000.5, "ask": 42001.5 }
                }
            ]
        })
    }

    /// Deal reference returned by position creation
    pub fn deal_reference(reference: &str) -> Value {
        json!({ "dealReference": reference })
    }

    /// Accepted deal confirmation
    pub fn confirmation_accepted(reference: &str) -> Value {
        json!({
            "dealStatus": "ACCEPTED",
            "dealId": format!("deal-{}", reference),
            "level": 42001.5
        })
    }

    /// Rejected deal confirmation with the broker's reason
    pub fn confirmation_rejected(reason: &str) -> Value {
        json!({
            "dealStatus": "REJECTED",
            "reason": reason
        })
    }
}
