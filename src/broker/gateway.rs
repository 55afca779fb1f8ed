//! REST gateway bound to one broker credential
//!
//! One `BrokerGateway` serves exactly one credential for the duration of a
//! reservation: session tokens, dealing-rule cache and retry policy are all
//! per-credential state.

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::auth::{AuthHeaders, SessionTokens};
use super::messages::*;
use super::symbols::to_broker_symbol;
use crate::common::errors::{CoordinatorError, Result};
use crate::common::types::TradeDirection;
use crate::config::types::{CredentialConfig, SchedulerSettings};

/// Dealing rules for an instrument, normalized from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct DealingRules {
    pub min_deal_size: Decimal,
    pub max_deal_size: Option<Decimal>,
    pub min_step_distance: Option<Decimal>,
}

/// Instrument metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub epic: String,
    pub name: String,
    pub currency: Option<String>,
    pub lot_size: Option<Decimal>,
}

/// Point-in-time market snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub bid: Decimal,
    pub ask: Decimal,
    pub market_status: Option<String>,
}

/// Full market details for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDetails {
    pub instrument: Instrument,
    pub dealing_rules: DealingRules,
    pub snapshot: MarketSnapshot,
}

/// Latest price for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    /// Standard (dashboard-facing) symbol
    pub symbol: String,
    /// Broker-side symbol the price was fetched under
    pub broker_symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PriceSnapshot {
    pub fn midpoint(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }
}

/// An order to be placed at the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    /// Standard symbol; normalized before hitting the wire
    pub symbol: String,
    pub direction: TradeDirection,
    pub size: Decimal,
    pub stop_level: Option<Decimal>,
    pub profit_level: Option<Decimal>,
}

/// Successful order placement
#[derive(Debug, Clone, PartialEq)]
pub struct OrderConfirmation {
    pub deal_reference: String,
    pub deal_id: Option<String>,
    pub level: Option<Decimal>,
}

/// Order placement failure taxonomy
///
/// `Rejected` is a business-rule refusal and is never retried;
/// `TransientFailure` has already exhausted the gateway's bounded retries;
/// `AuthExpired` means re-authentication failed or expired twice in a row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("order rejected by broker: {0}")]
    Rejected(String),
    #[error("transient order failure: {0}")]
    TransientFailure(String),
    #[error("broker session expired")]
    AuthExpired,
}

struct CachedRules {
    details: MarketDetails,
    fetched_at: Instant,
}

/// Authenticated REST client for one broker credential
pub struct BrokerGateway {
    client: Client,
    base_url: String,
    credential: CredentialConfig,
    tokens: RwLock<Option<SessionTokens>>,
    rules_cache: Mutex<HashMap<String, CachedRules>>,
    rules_ttl: Duration,
    max_order_retries: u32,
    retry_backoff: Duration,
}

impl BrokerGateway {
    /// Create a new gateway for one credential
    pub fn new(
        base_url: &str,
        credential: CredentialConfig,
        settings: &SchedulerSettings,
    ) -> Result<Self> {
        Self::with_timeout(base_url, credential, settings, Duration::from_secs(30))
    }

    /// Create a new gateway with a custom request timeout
    pub fn with_timeout(
        base_url: &str,
        credential: CredentialConfig,
        settings: &SchedulerSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            tokens: RwLock::new(None),
            rules_cache: Mutex::new(HashMap::new()),
            rules_ttl: Duration::from_secs(settings.dealing_rules_ttl_seconds),
            max_order_retries: settings.max_order_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    /// Identifier of the credential this gateway is bound to
    pub fn credential_id(&self) -> &str {
        &self.credential.id
    }

    /// Authenticate against the broker and store the session tokens
    #[instrument(skip(self), fields(credential = %self.credential.id))]
    pub async fn authenticate(&self) -> Result<()> {
        let url = format!("{}/session", self.base_url);
        let body = CreateSessionRequest {
            identifier: self.credential.identifier.clone(),
            password: self.credential.password.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("X-CAP-API-KEY", &self.credential.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::Authentication(format!(
                "session creation returned {}: {}",
                status, text
            )));
        }

        let cst = header_value(&response, "CST")?;
        let security_token = header_value(&response, "X-SECURITY-TOKEN")?;

        let mut tokens = self.tokens.write().await;
        *tokens = Some(SessionTokens {
            cst,
            security_token,
        });

        info!(credential = %self.credential.id, "broker session established");
        Ok(())
    }

    /// Whether a session is currently held
    pub async fn has_session(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    async fn ensure_session(&self) -> Result<SessionTokens> {
        if let Some(tokens) = self.tokens.read().await.clone() {
            return Ok(tokens);
        }
        self.authenticate().await?;
        self.tokens
            .read()
            .await
            .clone()
            .ok_or_else(|| CoordinatorError::Authentication("no session after login".to_string()))
    }

    async fn signed_get(&self, path: &str) -> Result<reqwest::Response> {
        let tokens = self.ensure_session().await?;
        let headers = AuthHeaders::build(
            &self.credential.api_key,
            &self.credential.password,
            &tokens,
            "GET",
            path,
            "",
        )?;

        let url = format!("{}{}", self.base_url, path);
        let request = headers.apply_to_request(self.client.get(&url));
        let response = request.send().await?;

        // Expired sessions get exactly one re-authentication, then a replay
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(path, "session expired, re-authenticating");
            self.authenticate().await?;
            let tokens = self.ensure_session().await?;
            let headers = AuthHeaders::build(
                &self.credential.api_key,
                &self.credential.password,
                &tokens,
                "GET",
                path,
                "",
            )?;
            let retry = headers.apply_to_request(self.client.get(&url));
            return Ok(retry.send().await?);
        }

        Ok(response)
    }

    /// Get market details for a standard symbol
    ///
    /// The symbol is normalized first; dealing rules change rarely and
    /// upstream rate limits are tight, so details are cached per broker
    /// symbol for a bounded TTL.
    #[instrument(skip(self))]
    pub async fn get_market_details(&self, symbol: &str) -> Result<MarketDetails> {
        let mapped = to_broker_symbol(symbol);
        if mapped.fallback {
            warn!(symbol, broker_symbol = %mapped.symbol, "symbol not in mapping table, using fallback");
        }

        {
            let cache = self.rules_cache.lock().await;
            if let Some(cached) = cache.get(&mapped.symbol) {
                if cached.fetched_at.elapsed() < self.rules_ttl {
                    debug!(broker_symbol = %mapped.symbol, "dealing rules served from cache");
                    return Ok(cached.details.clone());
                }
            }
        }

        let path = format!("/markets/{}", mapped.symbol);
        let response = self.signed_get(&path).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CoordinatorError::MarketNotFound(symbol.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::InvalidResponse(format!(
                "market details returned {}: {}",
                status, body
            )));
        }

        let dto: MarketDetailsResponse = response.json().await?;
        let details = convert_market_details(dto);

        let mut cache = self.rules_cache.lock().await;
        cache.insert(
            mapped.symbol.clone(),
            CachedRules {
                details: details.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(details)
    }

    /// Get the latest price for a standard symbol
    #[instrument(skip(self))]
    pub async fn get_latest_price(&self, symbol: &str) -> Result<PriceSnapshot> {
        let mapped = to_broker_symbol(symbol);
        if mapped.fallback {
            warn!(symbol, broker_symbol = %mapped.symbol, "symbol not in mapping table, using fallback");
        }

        let path = format!("/prices/{}?max=1", mapped.symbol);
        let response = self.signed_get(&path).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CoordinatorError::MarketNotFound(symbol.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::InvalidResponse(format!(
                "prices returned {}: {}",
                status, body
            )));
        }

        let prices: PricesResponse = response.json().await?;
        let latest = prices
            .prices
            .last()
            .ok_or_else(|| CoordinatorError::InvalidResponse("empty prices response".to_string()))?;

        Ok(PriceSnapshot {
            symbol: symbol.to_string(),
            broker_symbol: mapped.symbol,
            bid: latest.close_price.bid,
            ask: latest.close_price.ask,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Place an order at the broker
    ///
    /// Validates the spec against cached dealing rules, then places and
    /// confirms the deal. Transient upstream failures are retried with
    /// exponential backoff up to the configured cap; rejections carry the
    /// broker's stated reason verbatim and are never retried.
    #[instrument(skip(self, spec), fields(symbol = %spec.symbol, direction = %spec.direction))]
    pub async fn place_order(
        &self,
        spec: &OrderSpec,
    ) -> std::result::Result<OrderConfirmation, OrderError> {
        let details = match self.get_market_details(&spec.symbol).await {
            Ok(details) => details,
            // A missing market is a permanent refusal, not a retryable fault
            Err(CoordinatorError::MarketNotFound(symbol)) => {
                return Err(OrderError::Rejected(format!(
                    "MARKET_NOT_FOUND: no instrument for symbol {}",
                    symbol
                )));
            }
            Err(e) => return Err(OrderError::TransientFailure(e.to_string())),
        };

        if spec.size < details.dealing_rules.min_deal_size {
            return Err(OrderError::Rejected(format!(
                "MINIMUM_DEAL_SIZE: size {} is below the minimum deal size {}",
                spec.size, details.dealing_rules.min_deal_size
            )));
        }
        if let Some(max) = details.dealing_rules.max_deal_size {
            if spec.size > max {
                return Err(OrderError::Rejected(format!(
                    "MAXIMUM_DEAL_SIZE: size {} exceeds the maximum deal size {}",
                    spec.size, max
                )));
            }
        }

        let request = CreatePositionRequest {
            epic: details.instrument.epic.clone(),
            direction: spec.direction.to_string(),
            size: spec.size,
            stop_level: spec.stop_level,
            profit_level: spec.profit_level,
        };

        let mut reauthenticated = false;
        let mut attempt: u32 = 0;
        loop {
            match self.try_place(&request).await {
                Ok(confirmation) => return Ok(confirmation),
                Err(OrderError::AuthExpired) if !reauthenticated => {
                    debug!("session expired during order placement, re-authenticating once");
                    reauthenticated = true;
                    if self.authenticate().await.is_err() {
                        return Err(OrderError::AuthExpired);
                    }
                }
                Err(OrderError::TransientFailure(detail)) if attempt < self.max_order_retries => {
                    let backoff = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(attempt, %detail, backoff_ms = backoff.as_millis() as u64, "transient order failure, retrying");
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_place(
        &self,
        request: &CreatePositionRequest,
    ) -> std::result::Result<OrderConfirmation, OrderError> {
        let tokens = self
            .ensure_session()
            .await
            .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        let path = "/positions";
        let body = serde_json::to_string(request)
            .map_err(|e| OrderError::TransientFailure(e.to_string()))?;
        let headers = AuthHeaders::build(
            &self.credential.api_key,
            &self.credential.password,
            &tokens,
            "POST",
            path,
            &body,
        )
        .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let response = headers
            .apply_to_request(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(OrderError::AuthExpired);
        }
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrderError::TransientFailure(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<BrokerErrorResponse>(&text)
                .map(|e| e.error_code)
                .unwrap_or(text);
            return Err(OrderError::Rejected(reason));
        }

        let reference: DealReferenceResponse = response
            .json()
            .await
            .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        self.confirm_deal(&reference.deal_reference, &tokens).await
    }

    async fn confirm_deal(
        &self,
        deal_reference: &str,
        tokens: &SessionTokens,
    ) -> std::result::Result<OrderConfirmation, OrderError> {
        let path = format!("/confirms/{}", deal_reference);
        let headers = AuthHeaders::build(
            &self.credential.api_key,
            &self.credential.password,
            tokens,
            "GET",
            &path,
            "",
        )
        .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let response = headers
            .apply_to_request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(OrderError::AuthExpired);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrderError::TransientFailure(format!("{}: {}", status, text)));
        }

        let confirmation: DealConfirmationResponse = response
            .json()
            .await
            .map_err(|e| OrderError::TransientFailure(e.to_string()))?;

        if confirmation.deal_status.eq_ignore_ascii_case("rejected") {
            return Err(OrderError::Rejected(
                confirmation
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        Ok(OrderConfirmation {
            deal_reference: deal_reference.to_string(),
            deal_id: confirmation.deal_id,
            level: confirmation.level,
        })
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Result<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| {
            CoordinatorError::Authentication(format!("missing {} header in session response", name))
        })
}

fn convert_market_details(dto: MarketDetailsResponse) -> MarketDetails {
    MarketDetails {
        instrument: Instrument {
            epic: dto.instrument.epic,
            name: dto.instrument.name,
            currency: dto.instrument.currency,
            lot_size: dto.instrument.lot_size,
        },
        dealing_rules: DealingRules {
            min_deal_size: dto.dealing_rules.min_deal_size.value,
            max_deal_size: dto.dealing_rules.max_deal_size.map(|r| r.value),
            min_step_distance: dto.dealing_rules.min_step_distance.map(|r| r.value),
        },
        snapshot: MarketSnapshot {
            bid: dto.snapshot.bid,
            ask: dto.snapshot.offer,
            market_status: dto.snapshot.market_status,
        },
    }
}
