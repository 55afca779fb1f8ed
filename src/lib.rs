//! BotCoordinator Library
//!
//! A Rust library coordinating automated trading bots against a shared
//! broker account: credential pooling, evaluation scheduling, an
//! authenticated broker gateway and a market data distributor.

pub mod broker;
pub mod common;
pub mod config;
pub mod distributor;
pub mod scheduler;

// Re-export commonly used types
pub use common::errors::{CoordinatorError, Result};
pub use common::types::{
    BotId, ConnectionId, CredentialId, DistributorMessage, PriceTick, Resolution, SubscriptionKey,
    TradeDirection,
};
pub use config::types::AppConfig;

pub use broker::{
    BrokerGateway, BrokerStreamOpener, DealingRules, MarketDetails, OrderConfirmation, OrderError,
    OrderSpec, PriceSnapshot,
};
pub use distributor::{FeedHandle, FeedOpener, MarketDataDistributor};
pub use scheduler::{
    AcquireOutcome, BotConfig, BotRepository, BotStatus, CredentialLease, CredentialPool,
    DecisionEngine, EvaluationOutcome, EvaluationScheduler, EvaluationSummary, EvaluationWorker,
    InMemoryBotRepository, LiveEvaluationWorker, PassiveDecisionEngine, RequestOutcome,
    SchedulerStatus,
};
