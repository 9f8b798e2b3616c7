use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::frame::FeedEvent;
use crate::config::DetectionConfig;
use crate::enrichment::{EnrichmentClient, PriceBook, ProfileService, RateLimiter};
use crate::intelligence::{evaluate_simple, Trackers, VerifyContext};
use crate::models::{AlertReason, TradeAlert, TradeEvent};
use crate::services::notifier::NotifierSet;

/// Transaction ids seen within the dedup TTL, oldest first.
#[derive(Debug, Default)]
struct SeenSet {
    order: VecDeque<(DateTime<Utc>, String)>,
    ids: HashSet<String>,
}

impl SeenSet {
    /// False when `id` was already seen inside the TTL.
    fn insert(&mut self, id: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
        let cutoff = now - ttl;
        while let Some((at, _)) = self.order.front() {
            if *at > cutoff {
                break;
            }
            if let Some((_, old)) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }

        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back((now, id.to_string()));
        true
    }
}

/// Per-trade orchestrator: filter, enrich, run every rule and tracker,
/// compose the alert and hand it to the notifiers.
pub struct TradeMonitor {
    config: DetectionConfig,
    client: Arc<dyn EnrichmentClient>,
    limiter: Arc<RateLimiter>,
    profiles: ProfileService,
    trackers: Trackers,
    prices: Arc<PriceBook>,
    notifiers: NotifierSet,
    seen: Mutex<SeenSet>,
}

impl TradeMonitor {
    pub fn new(
        config: DetectionConfig,
        client: Arc<dyn EnrichmentClient>,
        limiter: Arc<RateLimiter>,
        trackers: Trackers,
        notifiers: NotifierSet,
    ) -> Self {
        let profiles = ProfileService::new(
            client.clone(),
            limiter.clone(),
            trackers.contrarian.clone(),
            StdDuration::from_secs(config.engine.profile_cache_ttl_secs),
            StdDuration::from_secs(config.engine.enrichment_timeout_secs),
        );
        Self {
            config,
            client,
            limiter,
            profiles,
            trackers,
            prices: Arc::new(PriceBook::new()),
            notifiers,
            seen: Mutex::new(SeenSet::default()),
        }
    }

    pub fn trackers(&self) -> &Trackers {
        &self.trackers
    }

    pub fn prices(&self) -> Arc<PriceBook> {
        self.prices.clone()
    }

    /// Everything a background verifier needs, sharing this monitor's
    /// client, limiter and price book.
    pub fn verify_context(&self) -> VerifyContext {
        VerifyContext {
            client: self.client.clone(),
            limiter: self.limiter.clone(),
            prices: self.prices.clone(),
            timeout: StdDuration::from_secs(self.config.engine.enrichment_timeout_secs),
        }
    }

    /// Why a trade is skipped before any rule runs, if it is.
    fn filter_reason(&self, trade: &TradeEvent) -> Option<&'static str> {
        let filter = &self.config.filter;
        if trade.wallet.is_empty() {
            Some("no_wallet")
        } else if filter.ignored_wallets.contains(&trade.wallet) {
            Some("ignored_wallet")
        } else if trade.notional() < filter.min_notional {
            Some("below_min_notional")
        } else if trade.price >= filter.obvious_price {
            Some("obvious_price")
        } else {
            None
        }
    }

    pub async fn process(&self, trade: TradeEvent) -> Option<TradeAlert> {
        self.process_at(trade, Utc::now()).await
    }

    /// Run one trade through the monitor with an explicit clock.
    pub async fn process_at(&self, trade: TradeEvent, now: DateTime<Utc>) -> Option<TradeAlert> {
        let start = Instant::now();
        counter!("trade_events_total").increment(1);

        self.prices.record(&trade);

        if let Some(reason) = self.filter_reason(&trade) {
            tracing::debug!(
                wallet = %trade.wallet,
                notional = %trade.notional(),
                price = %trade.price,
                reason,
                "Trade filtered"
            );
            counter!("trades_filtered_total", "reason" => reason).increment(1);
            return None;
        }

        let ttl = Duration::seconds(self.config.filter.dedup_ttl_secs as i64);
        if !self.seen.lock().insert(&trade.transaction_id, now, ttl) {
            tracing::debug!(tx = %trade.transaction_id, "Duplicate trade skipped");
            counter!("trades_filtered_total", "reason" => "duplicate").increment(1);
            return None;
        }

        let profile = match self.profiles.lookup(&trade.wallet, &trade.market_id).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::debug!(
                    wallet = %trade.wallet,
                    error = %e,
                    "Profile unavailable, profile rules skipped"
                );
                None
            }
        };
        let profile_ref = profile.as_deref();

        let mut reasons = evaluate_simple(&trade, profile_ref, &self.config.rules);

        let contrarian_winner = self.trackers.contrarian.contains(&trade.wallet);
        if contrarian_winner {
            reasons.push(AlertReason::ContrarianWinner);
        }

        if self.trackers.frequency.record(&trade.wallet, trade.timestamp) {
            reasons.push(AlertReason::HighFrequency);
        }

        let leader = self.trackers.copy.is_leader(profile_ref, contrarian_winner);
        let copy_cluster = self.trackers.copy.observe(&trade, leader);
        if copy_cluster.is_some() {
            reasons.push(AlertReason::CopyTrader);
        }

        let hedge = self.trackers.hedge.observe(&trade, profile_ref, now);
        reasons.extend(hedge.reasons);

        reasons.extend(self.trackers.patterns.observe(&trade, profile_ref, now));

        gauge!("contrarian_winners").set(self.trackers.contrarian.len() as f64);
        histogram!("pipeline_latency_seconds").record(start.elapsed().as_secs_f64());

        if reasons.is_empty() {
            return None;
        }

        let mut alert = TradeAlert::new(trade, profile.map(|p| p.summary()));
        for reason in reasons {
            alert.push_reason(reason);
        }
        alert.copy_cluster = copy_cluster;
        alert.hedge = hedge.removal;

        tracing::info!(
            alert_id = %alert.id,
            title = alert.title(),
            wallet = %alert.trade.wallet,
            market = %alert.trade.market_id,
            side = %alert.trade.side,
            notional = %alert.trade.notional(),
            reasons = alert.reasons.len(),
            "Alert raised"
        );

        self.notifiers.dispatch(alert.clone());
        Some(alert)
    }
}

/// Drain the event queue until it closes or shutdown is signalled.
pub async fn run_trade_monitor(
    monitor: Arc<TradeMonitor>,
    mut rx: mpsc::Receiver<FeedEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Trade monitor started");

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = shutdown.changed() => {
                tracing::info!("Trade monitor shutting down");
                return;
            }
        };

        match event {
            Some(FeedEvent::Trade(trade)) => {
                monitor.process(trade).await;
            }
            Some(FeedEvent::Unrecognized { .. }) => {}
            None => {
                tracing::warn!("Event queue closed, trade monitor stopping");
                return;
            }
        }
    }
}
