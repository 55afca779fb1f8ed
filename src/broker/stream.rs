//! Streaming client for live broker quotes
//!
//! Implements the distributor's `FeedOpener` seam: one websocket
//! subscription per unique (symbol, resolution) key, parsed into
//! `PriceTick`s and pushed into the distributor's intake channel. The feed
//! task keeps the connection alive with periodic pings and survives
//! upstream drops through a bounded reconnect loop.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{StreamQuoteMessage, StreamSubscribeMessage};
use super::symbols::to_broker_symbol;
use crate::common::errors::{CoordinatorError, Result};
use crate::common::types::{PriceTick, SubscriptionKey};
use crate::config::types::AppSettings;
use crate::distributor::feed::{FeedHandle, FeedOpener};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Reconnect attempts per disconnection before the feed gives up
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Opens one broker websocket per subscription key
pub struct BrokerStreamOpener {
    /// WebSocket URL of the broker streaming API
    url: String,
    /// Delay between reconnection attempts
    reconnect_delay: Duration,
    /// Interval between keep-alive pings
    heartbeat_interval: Duration,
}

impl BrokerStreamOpener {
    pub fn new(url: &str, settings: &AppSettings) -> Self {
        Self {
            url: url.to_string(),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_seconds),
        }
    }

    /// Parse an incoming streaming message into a PriceTick for `key`
    ///
    /// Quotes arrive under the broker symbol; the tick is stamped with the
    /// key's standard symbol so the distributor can route it without a
    /// reverse mapping.
    fn parse_quote(text: &str, key: &SubscriptionKey) -> Result<Option<PriceTick>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        match value.get("destination").and_then(|v| v.as_str()) {
            Some("quote") => {
                let quote: StreamQuoteMessage = serde_json::from_value(value)?;
                Ok(Some(PriceTick {
                    symbol: key.symbol.clone(),
                    resolution: key.resolution,
                    bid: quote.payload.bid,
                    ask: quote.payload.offer,
                    timestamp: quote
                        .payload
                        .timestamp
                        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                        .unwrap_or_else(chrono::Utc::now),
                }))
            }
            // Subscription acks, pings and other control frames
            _ => Ok(None),
        }
    }

    /// Connect and send the subscribe frame for one key
    async fn dial(url: &str, epic: &str, resolution: &str) -> Result<(WsWrite, WsRead)> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| CoordinatorError::WebSocketConnection(e.to_string()))?;

        let (mut write, read) = ws_stream.split();

        let subscribe_msg = StreamSubscribeMessage::subscribe(epic, resolution);
        let msg_json = serde_json::to_string(&subscribe_msg)?;
        debug!("Sending subscription message: {}", msg_json);
        write.send(Message::Text(msg_json)).await?;

        Ok((write, read))
    }

    /// Re-dial after a lost connection, up to the attempt budget
    async fn reconnect(
        url: &str,
        epic: &str,
        resolution: &str,
        delay: Duration,
        key: &SubscriptionKey,
    ) -> Option<(WsWrite, WsRead)> {
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            tokio::time::sleep(delay).await;
            match Self::dial(url, epic, resolution).await {
                Ok(pair) => {
                    info!(%key, attempt, "broker stream reconnected");
                    return Some(pair);
                }
                Err(e) => {
                    warn!(%key, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
        None
    }
}

#[async_trait]
impl FeedOpener for BrokerStreamOpener {
    #[instrument(skip(self, ticks), fields(key = %key))]
    async fn open(
        &self,
        key: &SubscriptionKey,
        ticks: mpsc::Sender<PriceTick>,
    ) -> Result<FeedHandle> {
        info!("Connecting to broker stream: {}", self.url);

        let mapped = to_broker_symbol(&key.symbol);
        if mapped.fallback {
            warn!(symbol = %key.symbol, broker_symbol = %mapped.symbol, "symbol not in mapping table, using fallback");
        }

        // The first dial fails the subscribe call; reconnects are the
        // feed task's own problem.
        let (mut write, mut read) =
            Self::dial(&self.url, &mapped.symbol, key.resolution.as_str()).await?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task_key = key.clone();
        let broker_symbol = mapped.symbol;
        let resolution = key.resolution;
        let url = self.url.clone();
        let reconnect_delay = self.reconnect_delay;
        let heartbeat_interval = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut heartbeat = interval(heartbeat_interval);
            loop {
                let mut connection_lost = false;

                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match Self::parse_quote(&text, &task_key) {
                                    Ok(Some(tick)) => {
                                        if ticks.send(tick).await.is_err() {
                                            debug!(key = %task_key, "tick intake closed, stopping feed");
                                            return;
                                        }
                                    }
                                    Ok(None) => {}
                                    Err(e) => {
                                        warn!(key = %task_key, error = %e, "failed to parse stream message");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                debug!(key = %task_key, "heartbeat");
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(key = %task_key, "broker stream closed: {:?}", frame);
                                connection_lost = true;
                            }
                            Some(Err(e)) => {
                                error!(key = %task_key, "broker stream error: {}", e);
                                connection_lost = true;
                            }
                            None => {
                                info!(key = %task_key, "broker stream ended");
                                connection_lost = true;
                            }
                            _ => {}
                        }
                    }
                    _ = heartbeat.tick() => {
                        if write.send(Message::Ping(Vec::new())).await.is_err() {
                            warn!(key = %task_key, "keep-alive ping failed");
                            connection_lost = true;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        let unsubscribe =
                            StreamSubscribeMessage::unsubscribe(&broker_symbol, resolution.as_str());
                        if let Ok(json) = serde_json::to_string(&unsubscribe) {
                            let _ = write.send(Message::Text(json)).await;
                        }
                        let _ = write.send(Message::Close(None)).await;
                        info!(key = %task_key, "unsubscribed from broker stream");
                        return;
                    }
                }

                if connection_lost {
                    match Self::reconnect(
                        &url,
                        &broker_symbol,
                        resolution.as_str(),
                        reconnect_delay,
                        &task_key,
                    )
                    .await
                    {
                        Some((new_write, new_read)) => {
                            write = new_write;
                            read = new_read;
                            heartbeat.reset();
                        }
                        None => {
                            error!(
                                key = %task_key,
                                attempts = MAX_RECONNECT_ATTEMPTS,
                                "broker stream lost and reconnect budget exhausted, feed is dead"
                            );
                            return;
                        }
                    }
                }
            }
        });

        Ok(FeedHandle::new(shutdown_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Resolution;
    use rust_decimal_macros::dec;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    fn settings(reconnect_delay_ms: u64, heartbeat_interval_seconds: u64) -> AppSettings {
        AppSettings {
            log_level: "info".to_string(),
            reconnect_delay_ms,
            heartbeat_interval_seconds,
        }
    }

    fn quote_frame(bid: &str) -> String {
        format!(
            r#"{{"destination":"quote","payload":{{"epic":"BTCUSD","bid":{bid},"ofr":{bid},"timestamp":1704067200000}}}}"#
        )
    }

    #[test]
    fn test_parse_quote() {
        let key = SubscriptionKey::new("BTC/USD", Resolution::Minute);
        let json = r#"{
            "destination": "quote",
            "payload": {"epic": "BTCUSD", "bid": 42000.1, "ofr": 42001.5, "timestamp": 1704067200000}
        }"#;

        let tick = BrokerStreamOpener::parse_quote(json, &key).unwrap().unwrap();
        assert_eq!(tick.symbol, "BTC/USD");
        assert_eq!(tick.bid, dec!(42000.1));
        assert_eq!(tick.ask, dec!(42001.5));
    }

    #[test]
    fn test_control_frames_are_skipped() {
        let key = SubscriptionKey::new("BTC/USD", Resolution::Minute);
        let json = r#"{"destination": "marketData.subscribe", "status": "OK"}"#;

        let result = BrokerStreamOpener::parse_quote(json, &key).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_garbage_is_an_error_not_a_panic() {
        let key = SubscriptionKey::new("BTC/USD", Resolution::Minute);
        assert!(BrokerStreamOpener::parse_quote("not json", &key).is_err());
    }

    #[tokio::test]
    async fn test_feed_reconnects_after_upstream_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // First connection sends one quote and drops dead; the second stays
        // up. A reconnecting client sees both quotes.
        tokio::spawn(async move {
            for (bid, keep_open) in [("42000.1", false), ("43000.9", true)] {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                // Subscribe frame arrives first
                let _ = ws.next().await;
                ws.send(Message::Text(quote_frame(bid))).await.unwrap();
                if keep_open {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            }
        });

        let opener = BrokerStreamOpener::new(&format!("ws://{}", addr), &settings(10, 60));
        let key = SubscriptionKey::new("BTC/USD", Resolution::Minute);
        let (tick_tx, mut tick_rx) = mpsc::channel(16);

        let handle = opener.open(&key, tick_tx).await.unwrap();

        let first = timeout(Duration::from_secs(5), tick_rx.recv())
            .await
            .expect("first tick before timeout")
            .expect("feed open");
        assert_eq!(first.bid, dec!(42000.1));

        let second = timeout(Duration::from_secs(5), tick_rx.recv())
            .await
            .expect("tick from reconnected feed before timeout")
            .expect("feed reconnected");
        assert_eq!(second.bid, dec!(43000.9));

        handle.close();
    }

    #[tokio::test]
    async fn test_heartbeat_pings_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (ping_tx, ping_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut ping_tx = Some(ping_tx);
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Ping(_)) {
                    if let Some(tx) = ping_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        });

        let opener = BrokerStreamOpener::new(&format!("ws://{}", addr), &settings(10, 1));
        let key = SubscriptionKey::new("BTC/USD", Resolution::Minute);
        let (tick_tx, _tick_rx) = mpsc::channel(16);

        let handle = opener.open(&key, tick_tx).await.unwrap();

        timeout(Duration::from_secs(3), ping_rx)
            .await
            .expect("ping within the heartbeat interval")
            .expect("server saw the ping");

        handle.close();
    }
}
