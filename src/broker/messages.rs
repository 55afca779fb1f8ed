//! Broker-specific wire message types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// REST API
// ============================================================================

/// Session creation request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub identifier: String,
    pub password: String,
}

// The session tokens arrive in the `CST` and `X-SECURITY-TOKEN` response
// headers; the session response body is ignored.

/// Market details response (`GET /markets/{epic}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetailsResponse {
    pub instrument: InstrumentDto,
    pub dealing_rules: DealingRulesDto,
    pub snapshot: SnapshotDto,
}

/// Instrument metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentDto {
    pub epic: String,
    pub name: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub lot_size: Option<Decimal>,
    #[serde(rename = "type", default)]
    pub instrument_type: Option<String>,
}

/// Dealing rules for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealingRulesDto {
    pub min_deal_size: RuleValueDto,
    #[serde(default)]
    pub max_deal_size: Option<RuleValueDto>,
    #[serde(default)]
    pub min_step_distance: Option<RuleValueDto>,
}

/// A single dealing-rule value with its unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleValueDto {
    #[serde(default)]
    pub unit: Option<String>,
    pub value: Decimal,
}

/// Market snapshot embedded in the details response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDto {
    pub bid: Decimal,
    pub offer: Decimal,
    #[serde(default)]
    pub market_status: Option<String>,
    #[serde(default)]
    pub update_time: Option<String>,
}

/// Latest prices response (`GET /prices/{epic}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricesResponse {
    pub prices: Vec<PriceDto>,
}

/// A single historical/latest price entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceDto {
    #[serde(default)]
    pub snapshot_time: Option<String>,
    pub close_price: PricePointDto,
}

/// Bid/ask pair inside a price entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePointDto {
    pub bid: Decimal,
    #[serde(alias = "ofr")]
    pub ask: Decimal,
}

/// Position creation request (`POST /positions`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePositionRequest {
    pub epic: String,
    pub direction: String,
    pub size: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_level: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_level: Option<Decimal>,
}

/// Deal reference returned by position creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealReferenceResponse {
    pub deal_reference: String,
}

/// Deal confirmation (`GET /confirms/{dealReference}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealConfirmationResponse {
    pub deal_status: String,
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub level: Option<Decimal>,
}

/// Error body returned by the broker on 4xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerErrorResponse {
    pub error_code: String,
}

// ============================================================================
// Streaming API
// ============================================================================

/// Outgoing streaming subscription message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSubscribeMessage {
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_token: Option<String>,
    pub payload: StreamSubscribePayload,
}

/// Payload naming the epics and resolution to stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSubscribePayload {
    pub epics: Vec<String>,
    pub resolution: String,
}

impl StreamSubscribeMessage {
    pub fn subscribe(epic: &str, resolution: &str) -> Self {
        Self {
            destination: "marketData.subscribe".to_string(),
            cst: None,
            security_token: None,
            payload: StreamSubscribePayload {
                epics: vec![epic.to_string()],
                resolution: resolution.to_string(),
            },
        }
    }

    pub fn unsubscribe(epic: &str, resolution: &str) -> Self {
        Self {
            destination: "marketData.unsubscribe".to_string(),
            cst: None,
            security_token: None,
            payload: StreamSubscribePayload {
                epics: vec![epic.to_string()],
                resolution: resolution.to_string(),
            },
        }
    }
}

/// Incoming streaming quote message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuoteMessage {
    pub destination: String,
    pub payload: StreamQuotePayload,
}

/// Quote payload with bid/offer for one epic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuotePayload {
    pub epic: String,
    pub bid: Decimal,
    #[serde(alias = "ofr")]
    pub offer: Decimal,
    #[serde(default)]
    pub timestamp: Option<i64>,
}
