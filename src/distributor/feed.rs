//! Upstream feed seam for the market data distributor

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::common::errors::Result;
use crate::common::types::{PriceTick, SubscriptionKey};

/// Handle owning one open upstream feed
///
/// Closing the handle (or dropping it) tells the feed task to unsubscribe
/// and shut down. The distributor holds exactly one handle per active key.
#[derive(Debug)]
pub struct FeedHandle {
    shutdown: Option<oneshot::Sender<()>>,
}

impl FeedHandle {
    pub fn new(shutdown: oneshot::Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// Close the upstream feed
    pub fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Opens upstream feeds on demand
///
/// Implemented by the broker streaming client in production and by
/// counting fakes in tests.
#[async_trait]
pub trait FeedOpener: Send + Sync {
    /// Open one upstream feed for the given key
    ///
    /// Ticks for the key are pushed into `ticks` until the returned handle
    /// is closed.
    async fn open(&self, key: &SubscriptionKey, ticks: mpsc::Sender<PriceTick>)
        -> Result<FeedHandle>;
}
