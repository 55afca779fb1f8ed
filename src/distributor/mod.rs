//! Market data distributor
//!
//! Deduplicates subscription requests per (symbol, resolution) across many
//! dashboard connections: one upstream feed per unique key, fanned out to
//! every current subscriber. Upstream broker feeds are metered per session,
//! so N dashboard tabs watching the same symbol must share one feed.

pub mod feed;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::common::channels::create_tick_channel;
use crate::common::errors::{CoordinatorError, Result};
use crate::common::types::{ConnectionId, DistributorMessage, PriceTick, Resolution, SubscriptionKey};

pub use feed::{FeedHandle, FeedOpener};

/// Per-key feed state: exists if and only if the subscriber set is non-empty
struct FeedState {
    subscribers: HashMap<ConnectionId, mpsc::Sender<DistributorMessage>>,
    handle: FeedHandle,
    last_tick: Option<PriceTick>,
}

/// Fans one upstream feed per unique key out to N dashboard connections
pub struct MarketDataDistributor {
    feeds: Mutex<HashMap<SubscriptionKey, FeedState>>,
    opener: Arc<dyn FeedOpener>,
    tick_tx: mpsc::Sender<PriceTick>,
}

impl MarketDataDistributor {
    /// Create the distributor and spawn its tick intake task
    pub fn start(opener: Arc<dyn FeedOpener>) -> Arc<Self> {
        let (tick_tx, mut tick_rx) = create_tick_channel();

        let distributor = Arc::new(Self {
            feeds: Mutex::new(HashMap::new()),
            opener,
            tick_tx,
        });

        // Intake loop holds a weak reference so shutdown is just dropping
        // the last Arc.
        let weak = Arc::downgrade(&distributor);
        tokio::spawn(async move {
            while let Some(tick) = tick_rx.recv().await {
                match weak.upgrade() {
                    Some(dist) => dist.on_upstream_tick(tick).await,
                    None => break,
                }
            }
            debug!("distributor tick intake stopped");
        });

        distributor
    }

    /// Subscribe a connection to a (symbol, resolution) key
    ///
    /// The first subscriber for a key opens exactly one upstream feed; the
    /// key map's lock is held across the open so concurrent first
    /// subscribers cannot race a second feed into existence. A `Subscribed`
    /// ack (or `SubscriptionError`) is pushed down the connection's channel.
    #[instrument(skip(self, sender))]
    pub async fn subscribe(
        &self,
        connection_id: &str,
        sender: mpsc::Sender<DistributorMessage>,
        symbol: &str,
        resolution: Resolution,
    ) -> Result<()> {
        let key = SubscriptionKey::new(symbol, resolution);
        let mut feeds = self.feeds.lock().await;

        if let Some(state) = feeds.get_mut(&key) {
            state
                .subscribers
                .insert(connection_id.to_string(), sender.clone());
            debug!(%key, connection_id, subscribers = state.subscribers.len(), "joined existing feed");
        } else {
            let handle = match self.opener.open(&key, self.tick_tx.clone()).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(%key, error = %e, "failed to open upstream feed");
                    let _ = sender.try_send(DistributorMessage::SubscriptionError {
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            };

            let mut subscribers = HashMap::new();
            subscribers.insert(connection_id.to_string(), sender.clone());
            feeds.insert(
                key.clone(),
                FeedState {
                    subscribers,
                    handle,
                    last_tick: None,
                },
            );
            info!(%key, connection_id, "opened upstream feed");
        }

        let _ = sender.try_send(DistributorMessage::Subscribed {
            symbol: symbol.to_string(),
            resolution,
        });
        Ok(())
    }

    /// Unsubscribe a connection from one key
    ///
    /// The last unsubscribe closes the upstream feed immediately; idle
    /// feeds are never left open.
    #[instrument(skip(self))]
    pub async fn unsubscribe(
        &self,
        connection_id: &str,
        symbol: &str,
        resolution: Resolution,
    ) -> Result<()> {
        let key = SubscriptionKey::new(symbol, resolution);
        let mut feeds = self.feeds.lock().await;

        let state = feeds
            .get_mut(&key)
            .ok_or_else(|| CoordinatorError::Internal(format!("no feed for {}", key)))?;

        if let Some(sender) = state.subscribers.remove(connection_id) {
            let _ = sender.try_send(DistributorMessage::Unsubscribed {
                symbol: symbol.to_string(),
                resolution,
            });
        }

        if state.subscribers.is_empty() {
            if let Some(state) = feeds.remove(&key) {
                state.handle.close();
                info!(%key, "closed upstream feed, no subscribers left");
            }
        }

        Ok(())
    }

    /// Remove a connection from every key it subscribes to
    ///
    /// Called by the transport adapter on disconnect.
    #[instrument(skip(self))]
    pub async fn unsubscribe_all(&self, connection_id: &str) {
        let mut feeds = self.feeds.lock().await;
        let mut emptied = Vec::new();

        for (key, state) in feeds.iter_mut() {
            if state.subscribers.remove(connection_id).is_some() && state.subscribers.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in emptied {
            if let Some(state) = feeds.remove(&key) {
                state.handle.close();
                info!(%key, connection_id, "closed upstream feed after disconnect");
            }
        }
    }

    /// Broadcast a tick to every current subscriber of its key
    ///
    /// Delivery is best effort per subscriber: the sender set is snapshotted
    /// under the lock and sends happen outside it, so a slow or disconnected
    /// subscriber never blocks delivery to others.
    pub async fn on_upstream_tick(&self, tick: PriceTick) {
        let targets: Vec<(ConnectionId, mpsc::Sender<DistributorMessage>)> = {
            let mut feeds = self.feeds.lock().await;
            match feeds.get_mut(&tick.key()) {
                Some(state) => {
                    state.last_tick = Some(tick.clone());
                    state
                        .subscribers
                        .iter()
                        .map(|(id, tx)| (id.clone(), tx.clone()))
                        .collect()
                }
                // Tick raced a feed close; nothing to deliver.
                None => return,
            }
        };

        for (connection_id, sender) in targets {
            if let Err(e) = sender.try_send(DistributorMessage::Tick(tick.clone())) {
                debug!(connection_id, error = %e, "dropping tick for slow or closed subscriber");
            }
        }
    }

    /// Currently active feed keys
    pub async fn active_feeds(&self) -> Vec<SubscriptionKey> {
        self.feeds.lock().await.keys().cloned().collect()
    }

    /// Number of subscribers for one key
    pub async fn subscriber_count(&self, symbol: &str, resolution: Resolution) -> usize {
        let key = SubscriptionKey::new(symbol, resolution);
        self.feeds
            .lock()
            .await
            .get(&key)
            .map(|s| s.subscribers.len())
            .unwrap_or(0)
    }

    /// Last tick seen for one key, if any
    pub async fn last_tick(&self, symbol: &str, resolution: Resolution) -> Option<PriceTick> {
        let key = SubscriptionKey::new(symbol, resolution);
        self.feeds
            .lock()
            .await
            .get(&key)
            .and_then(|s| s.last_tick.clone())
    }
}
