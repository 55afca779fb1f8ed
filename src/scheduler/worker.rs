//! Evaluation worker: the unit of work run by the scheduler for one bot
//!
//! Fetches market context through the gateway bound to the leased
//! credential, asks the decision layer, possibly places an order, and
//! returns a summary. All gateway failures are normalized into the result,
//! nothing is thrown past the scheduler boundary.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use super::pool::CredentialLease;
use super::types::{EvaluationOutcome, EvaluationSummary};
use crate::broker::gateway::{BrokerGateway, MarketDetails, OrderError, OrderSpec, PriceSnapshot};
use crate::common::errors::{CoordinatorError, Result};
use crate::common::types::{Resolution, TradeDirection};

/// Bot configuration read from the repository at evaluation time
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub id: String,
    pub name: String,
    /// Standard symbol the bot trades
    pub symbol: String,
    pub resolution: Resolution,
    /// Broker this bot's credential belongs to; constrains pool acquisition
    pub preferred_broker: Option<String>,
    /// Bot-level trading toggle; false moves the bot to Disabled
    pub ai_trading_enabled: bool,
    /// Deal size for opened positions
    pub deal_size: Decimal,
}

/// Narrow persistence seam; the schema is owned elsewhere
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn load_bot_config(&self, bot_id: &str) -> Result<Option<BotConfig>>;
    async fn save_evaluation_result(&self, bot_id: &str, outcome: &EvaluationOutcome)
        -> Result<()>;
}

/// Market context handed to the decision layer
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub bot: BotConfig,
    pub details: MarketDetails,
    pub price: PriceSnapshot,
}

/// What the decision layer wants done
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionAction {
    Hold,
    Open(TradeDirection),
}

/// A trading decision with its rationale
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDecision {
    pub action: DecisionAction,
    pub rationale: String,
}

/// Opaque strategy/AI seam: one attempt per evaluation, no retries here
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, context: &EvaluationContext) -> Result<TradeDecision>;
}

/// The unit of work the scheduler runs for one bot
#[async_trait]
pub trait EvaluationWorker: Send + Sync {
    /// Evaluate one bot using the credential named by the lease
    async fn evaluate(&self, bot_id: &str, lease: &CredentialLease) -> Result<EvaluationSummary>;
}

/// Production worker wired to one gateway per credential
pub struct LiveEvaluationWorker {
    gateways: HashMap<String, Arc<BrokerGateway>>,
    repository: Arc<dyn BotRepository>,
    decider: Arc<dyn DecisionEngine>,
}

impl LiveEvaluationWorker {
    pub fn new(
        gateways: HashMap<String, Arc<BrokerGateway>>,
        repository: Arc<dyn BotRepository>,
        decider: Arc<dyn DecisionEngine>,
    ) -> Self {
        Self {
            gateways,
            repository,
            decider,
        }
    }

    fn gateway_for(&self, lease: &CredentialLease) -> Result<&Arc<BrokerGateway>> {
        self.gateways.get(&lease.credential_id).ok_or_else(|| {
            CoordinatorError::Internal(format!(
                "no gateway configured for credential {}",
                lease.credential_id
            ))
        })
    }
}

#[async_trait]
impl EvaluationWorker for LiveEvaluationWorker {
    #[instrument(skip(self, lease), fields(credential = %lease.credential_id))]
    async fn evaluate(&self, bot_id: &str, lease: &CredentialLease) -> Result<EvaluationSummary> {
        let gateway = self.gateway_for(lease)?;

        let bot = self
            .repository
            .load_bot_config(bot_id)
            .await?
            .ok_or_else(|| CoordinatorError::BotNotFound(bot_id.to_string()))?;

        let details = gateway.get_market_details(&bot.symbol).await?;
        let price = gateway.get_latest_price(&bot.symbol).await?;
        let symbol = bot.symbol.clone();
        let deal_size = bot.deal_size;

        let context = EvaluationContext {
            bot,
            details,
            price,
        };
        let decision = self.decider.decide(&context).await?;

        match decision.action {
            DecisionAction::Hold => {
                info!(bot_id, rationale = %decision.rationale, "holding, no order placed");
                Ok(EvaluationSummary {
                    symbol,
                    decision: format!("hold: {}", decision.rationale),
                    order_reference: None,
                    evaluated_at: Utc::now(),
                })
            }
            DecisionAction::Open(direction) => {
                let spec = OrderSpec {
                    symbol: symbol.clone(),
                    direction,
                    size: deal_size,
                    stop_level: None,
                    profit_level: None,
                };

                match gateway.place_order(&spec).await {
                    Ok(confirmation) => {
                        info!(bot_id, %direction, reference = %confirmation.deal_reference, "order placed");
                        Ok(EvaluationSummary {
                            symbol,
                            decision: format!("opened {} {}", direction, deal_size),
                            order_reference: Some(confirmation.deal_reference),
                            evaluated_at: Utc::now(),
                        })
                    }
                    // Business-rule refusal: surfaced in the summary with the
                    // broker's reason, not treated as a worker failure
                    Err(OrderError::Rejected(reason)) => {
                        warn!(bot_id, %reason, "order rejected by broker");
                        Ok(EvaluationSummary {
                            symbol,
                            decision: format!("rejected: {}", reason),
                            order_reference: None,
                            evaluated_at: Utc::now(),
                        })
                    }
                    Err(e) => Err(CoordinatorError::Internal(e.to_string())),
                }
            }
        }
    }
}

/// Decision engine that always holds
///
/// Stands in for the external AI layer in wiring and tests.
pub struct PassiveDecisionEngine;

#[async_trait]
impl DecisionEngine for PassiveDecisionEngine {
    async fn decide(&self, _context: &EvaluationContext) -> Result<TradeDecision> {
        Ok(TradeDecision {
            action: DecisionAction::Hold,
            rationale: "passive engine never trades".to_string(),
        })
    }
}

/// In-memory repository for wiring and tests
#[derive(Default)]
pub struct InMemoryBotRepository {
    bots: RwLock<HashMap<String, BotConfig>>,
    results: RwLock<Vec<(String, EvaluationOutcome)>>,
}

impl InMemoryBotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_bot(&self, config: BotConfig) {
        self.bots.write().await.insert(config.id.clone(), config);
    }

    pub async fn recorded_results(&self) -> Vec<(String, EvaluationOutcome)> {
        self.results.read().await.clone()
    }
}

#[async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn load_bot_config(&self, bot_id: &str) -> Result<Option<BotConfig>> {
        Ok(self.bots.read().await.get(bot_id).cloned())
    }

    async fn save_evaluation_result(
        &self,
        bot_id: &str,
        outcome: &EvaluationOutcome,
    ) -> Result<()> {
        self.results
            .write()
            .await
            .push((bot_id.to_string(), outcome.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bot_config(id: &str) -> BotConfig {
        BotConfig {
            id: id.to_string(),
            name: format!("bot {}", id),
            symbol: "BTC/USD".to_string(),
            resolution: Resolution::Minute,
            preferred_broker: None,
            ai_trading_enabled: true,
            deal_size: dec!(0.01),
        }
    }

    #[tokio::test]
    async fn test_in_memory_repository_round_trip() {
        let repo = InMemoryBotRepository::new();
        repo.insert_bot(bot_config("bot-1")).await;

        let loaded = repo.load_bot_config("bot-1").await.unwrap();
        assert_eq!(loaded, Some(bot_config("bot-1")));
        assert!(repo.load_bot_config("missing").await.unwrap().is_none());

        repo.save_evaluation_result("bot-1", &EvaluationOutcome::TimedOut)
            .await
            .unwrap();
        let results = repo.recorded_results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, EvaluationOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_mock_repository_seam() {
        let mut repo = MockBotRepository::new();
        repo.expect_load_bot_config()
            .returning(|id| Ok(Some(BotConfig {
                id: id.to_string(),
                name: "mocked".to_string(),
                symbol: "EUR/USD".to_string(),
                resolution: Resolution::Hour,
                preferred_broker: Some("capital".to_string()),
                ai_trading_enabled: true,
                deal_size: dec!(1),
            })));

        let config = repo.load_bot_config("bot-9").await.unwrap().unwrap();
        assert_eq!(config.symbol, "EUR/USD");
    }

    #[tokio::test]
    async fn test_passive_engine_always_holds() {
        let engine = PassiveDecisionEngine;
        let context = EvaluationContext {
            bot: bot_config("bot-1"),
            details: crate::broker::gateway::MarketDetails {
                instrument: crate::broker::gateway::Instrument {
                    epic: "BTCUSD".to_string(),
                    name: "Bitcoin".to_string(),
                    currency: None,
                    lot_size: None,
                },
                dealing_rules: crate::broker::gateway::DealingRules {
                    min_deal_size: dec!(0.001),
                    max_deal_size: None,
                    min_step_distance: None,
                },
                snapshot: crate::broker::gateway::MarketSnapshot {
                    bid: dec!(42000),
                    ask: dec!(42001),
                    market_status: None,
                },
            },
            price: PriceSnapshot {
                symbol: "BTC/USD".to_string(),
                broker_symbol: "BTCUSD".to_string(),
                bid: dec!(42000),
                ask: dec!(42001),
                timestamp: Utc::now(),
            },
        };

        let decision = engine.decide(&context).await.unwrap();
        assert_eq!(decision.action, DecisionAction::Hold);
    }
}
