//! Channel type definitions for inter-task communication

use tokio::sync::mpsc;

use super::types::{DistributorMessage, PriceTick};

/// Default channel buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Create the intake channel carrying upstream ticks into the distributor
pub fn create_tick_channel() -> (mpsc::Sender<PriceTick>, mpsc::Receiver<PriceTick>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}

/// Create a per-connection channel for tick and ack delivery
pub fn create_connection_channel(
) -> (mpsc::Sender<DistributorMessage>, mpsc::Receiver<DistributorMessage>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}
