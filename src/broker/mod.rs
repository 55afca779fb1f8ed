//! Broker module - authenticated gateway, symbol mapping and streaming feed

pub mod auth;
pub mod gateway;
pub mod messages;
pub mod stream;
pub mod symbols;

pub use gateway::{
    BrokerGateway, DealingRules, Instrument, MarketDetails, MarketSnapshot, OrderConfirmation,
    OrderError, OrderSpec, PriceSnapshot,
};
pub use stream::BrokerStreamOpener;
pub use symbols::{to_broker_symbol, MappedSymbol};
