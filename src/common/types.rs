//! Unified types shared across the coordinator

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of a trading bot
pub type BotId = String;

/// Identifier of a broker credential
pub type CredentialId = String;

/// Identifier of a dashboard connection
pub type ConnectionId = String;

/// Candle/tick resolution understood by the broker feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Minute,
    #[serde(rename = "MINUTE_5")]
    Minute5,
    #[serde(rename = "MINUTE_15")]
    Minute15,
    #[serde(rename = "MINUTE_30")]
    Minute30,
    Hour,
    #[serde(rename = "HOUR_4")]
    Hour4,
    Day,
}

impl Resolution {
    /// String form used on the broker wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Minute => "MINUTE",
            Resolution::Minute5 => "MINUTE_5",
            Resolution::Minute15 => "MINUTE_15",
            Resolution::Minute30 => "MINUTE_30",
            Resolution::Hour => "HOUR",
            Resolution::Hour4 => "HOUR_4",
            Resolution::Day => "DAY",
        }
    }

    /// Parse a wire string; unknown values return None
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "MINUTE" | "M1" => Some(Resolution::Minute),
            "MINUTE_5" | "M5" => Some(Resolution::Minute5),
            "MINUTE_15" | "M15" => Some(Resolution::Minute15),
            "MINUTE_30" | "M30" => Some(Resolution::Minute30),
            "HOUR" | "H1" => Some(Resolution::Hour),
            "HOUR_4" | "H4" => Some(Resolution::Hour4),
            "DAY" | "D1" => Some(Resolution::Day),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order direction (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "BUY"),
            TradeDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// Key identifying one deduplicated upstream feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Standard (dashboard-facing) symbol, e.g. "BTC/USD"
    pub symbol: String,
    /// Feed resolution
    pub resolution: Resolution,
}

impl SubscriptionKey {
    pub fn new(symbol: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            symbol: symbol.into(),
            resolution,
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.resolution)
    }
}

/// A single live price tick from the upstream feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Standard symbol this tick belongs to
    pub symbol: String,
    /// Resolution of the feed the tick arrived on
    pub resolution: Resolution,
    /// Best bid price
    pub bid: Decimal,
    /// Best ask/offer price
    pub ask: Decimal,
    /// Timestamp of the tick
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    /// Calculate the midpoint price
    pub fn midpoint(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    /// Subscription key this tick routes on
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.symbol.clone(), self.resolution)
    }
}

/// Message delivered to a dashboard connection's channel
///
/// Ticks and `{type, symbol}` acks share one channel per connection so the
/// transport adapter can frame them however it likes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributorMessage {
    /// Live price tick
    Tick(PriceTick),
    /// Subscription confirmed
    Subscribed {
        symbol: String,
        resolution: Resolution,
    },
    /// Unsubscription confirmed
    Unsubscribed {
        symbol: String,
        resolution: Resolution,
    },
    /// Subscription failed (e.g. upstream feed could not be opened)
    SubscriptionError { symbol: String, reason: String },
}
