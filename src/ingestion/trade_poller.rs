use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::interval;

use super::forwarder::{Forwarded, Forwarder};
use super::frame::{parse_timestamp, FeedEvent};
use super::ws_listener::FeedActivity;
use crate::models::{Side, TradeEvent};
use crate::polymarket::types::ApiTrade;
use crate::polymarket::DataClient;

/// Convert a data-API trade. Trades without an asset or side are skipped.
pub fn api_trade_to_event(trade: &ApiTrade, received_at: DateTime<Utc>) -> Option<TradeEvent> {
    let asset_id = trade.asset.as_deref().filter(|a| !a.is_empty())?.to_string();
    let side = Side::from_api_str(trade.side.as_deref()?)?;
    let price = trade.price.unwrap_or(Decimal::ZERO);
    let size = trade.size.unwrap_or(Decimal::ZERO);
    let timestamp = trade
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let transaction_id = trade
        .transaction_hash
        .clone()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| {
            format!("{}:{}:{}:{}", asset_id, timestamp.timestamp_millis(), price, size)
        });

    Some(TradeEvent {
        asset_id,
        market_id: trade.condition_id.clone().unwrap_or_default(),
        side,
        price,
        size,
        wallet: trade
            .proxy_wallet
            .as_deref()
            .unwrap_or_default()
            .to_lowercase(),
        timestamp,
        transaction_id,
        outcome: trade.outcome.clone(),
    })
}

/// High-water mark over the trade tape. Trades sharing the newest timestamp
/// are told apart by transaction id.
#[derive(Debug, Default)]
pub struct PollCursor {
    last_seen: Option<DateTime<Utc>>,
    ids_at_last_seen: HashSet<String>,
}

impl PollCursor {
    /// Start after everything up to `at`.
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            last_seen: Some(at),
            ids_at_last_seen: HashSet::new(),
        }
    }

    /// Keep only trades not seen before, oldest first, and advance.
    pub fn accept(&mut self, mut trades: Vec<TradeEvent>) -> Vec<TradeEvent> {
        trades.sort_by_key(|t| t.timestamp);

        let mut fresh = Vec::new();
        for trade in trades {
            match self.last_seen {
                Some(last) if trade.timestamp < last => continue,
                Some(last) if trade.timestamp == last => {
                    if !self.ids_at_last_seen.insert(trade.transaction_id.clone()) {
                        continue;
                    }
                }
                _ => {
                    self.last_seen = Some(trade.timestamp);
                    self.ids_at_last_seen.clear();
                    self.ids_at_last_seen.insert(trade.transaction_id.clone());
                }
            }
            fresh.push(trade);
        }
        fresh
    }
}

/// Poll the public trade tape and forward new trades into the monitor queue.
pub async fn run_trade_poller(
    client: DataClient,
    forwarder: Forwarder<FeedEvent>,
    activity: Arc<FeedActivity>,
    interval_secs: u64,
    limit: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs, limit, "Trade poller started");

    let mut cursor = PollCursor::starting_at(Utc::now());
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!("Trade poller shutting down");
                return;
            }
        }

        let trades = match client.recent_trades(limit).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Trade poll failed, retrying next tick");
                counter!("poll_errors_total").increment(1);
                continue;
            }
        };

        let now = Utc::now();
        activity.record(now);
        let events: Vec<TradeEvent> = trades
            .iter()
            .filter_map(|t| api_trade_to_event(t, now))
            .collect();
        let fresh = cursor.accept(events);

        let count = fresh.len();
        for trade in fresh {
            if forwarder.forward(FeedEvent::Trade(trade)) == Forwarded::Closed {
                tracing::warn!("Monitor queue closed, stopping trade poller");
                return;
            }
        }
        if count > 0 {
            tracing::debug!(new_trades = count, "Polled trades forwarded");
        }
    }
}
