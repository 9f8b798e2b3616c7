use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use polysentry::config::DetectionConfig;
use polysentry::enrichment::{EnrichmentClient, EnrichmentError, PriceBook, RateLimiter};
use polysentry::ingestion::TradeMonitor;
use polysentry::intelligence::{Trackers, VerifyContext};
use polysentry::models::{Side, TradeAlert, TradeEvent};
use polysentry::polymarket::types::{ApiActivity, ApiClosedPosition, ApiPosition};
use polysentry::services::{AlertNotifier, NotifierSet, NotifyError};

#[allow(dead_code)]
pub const MARKET: &str = "0xmarket";
#[allow(dead_code)]
pub const YES_TOKEN: &str = "tok-yes";
#[allow(dead_code)]
pub const NO_TOKEN: &str = "tok-no";

static TX_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Scripted enrichment client. Unknown wallets get empty lists.
#[derive(Default)]
pub struct MockEnrichment {
    positions: Mutex<HashMap<String, Vec<ApiPosition>>>,
    closed: Mutex<HashMap<String, Vec<ApiClosedPosition>>>,
    activity: Mutex<HashMap<String, Vec<ApiActivity>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockEnrichment {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_positions(&self, wallet: &str, positions: Vec<ApiPosition>) {
        self.positions.lock().insert(wallet.to_string(), positions);
    }

    pub fn set_closed(&self, wallet: &str, closed: Vec<ApiClosedPosition>) {
        self.closed.lock().insert(wallet.to_string(), closed);
    }

    pub fn set_activity(&self, wallet: &str, activity: Vec<ApiActivity>) {
        self.activity.lock().insert(wallet.to_string(), activity);
    }

    /// Make every call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EnrichmentError::Unexpected("scripted failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EnrichmentClient for MockEnrichment {
    async fn positions(
        &self,
        wallet: &str,
        _market: Option<&str>,
    ) -> Result<Vec<ApiPosition>, EnrichmentError> {
        self.check()?;
        Ok(self.positions.lock().get(wallet).cloned().unwrap_or_default())
    }

    async fn closed_positions(
        &self,
        wallet: &str,
    ) -> Result<Vec<ApiClosedPosition>, EnrichmentError> {
        self.check()?;
        Ok(self.closed.lock().get(wallet).cloned().unwrap_or_default())
    }

    async fn activity(&self, wallet: &str) -> Result<Vec<ApiActivity>, EnrichmentError> {
        self.check()?;
        Ok(self.activity.lock().get(wallet).cloned().unwrap_or_default())
    }
}

/// Notifier that keeps every alert it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<TradeAlert>>,
}

#[async_trait]
impl AlertNotifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_trade_alert(&self, alert: &TradeAlert) -> Result<(), NotifyError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal")
}

/// A trade on the shared test market with a unique transaction id.
pub fn trade_at(
    wallet: &str,
    asset_id: &str,
    side: Side,
    price: &str,
    size: i64,
    at: DateTime<Utc>,
) -> TradeEvent {
    let seq = TX_SEQ.fetch_add(1, Ordering::SeqCst);
    TradeEvent {
        asset_id: asset_id.to_string(),
        market_id: MARKET.to_string(),
        side,
        price: dec(price),
        size: Decimal::from(size),
        wallet: wallet.to_string(),
        timestamp: at,
        transaction_id: format!("0xtx{seq}"),
        outcome: None,
    }
}

#[allow(dead_code)]
pub fn position(asset: &str, outcome: &str, size: i64, cur_price: &str) -> ApiPosition {
    let cur_price = dec(cur_price);
    ApiPosition {
        asset: asset.to_string(),
        condition_id: MARKET.to_string(),
        size: Decimal::from(size),
        avg_price: Decimal::new(5, 1),
        cur_price,
        current_value: cur_price * Decimal::from(size),
        outcome: outcome.to_string(),
        ..Default::default()
    }
}

/// `wins` profitable and `losses` losing closed positions, each in its own
/// market, entered at 0.60.
#[allow(dead_code)]
pub fn track_record(wins: usize, losses: usize) -> Vec<ApiClosedPosition> {
    (0..wins + losses)
        .map(|i| ApiClosedPosition {
            condition_id: format!("0xclosed{i}"),
            avg_price: Decimal::new(60, 2),
            total_bought: Decimal::from(100),
            realized_pnl: if i < wins {
                Decimal::from(100)
            } else {
                Decimal::from(-100)
            },
            ..Default::default()
        })
        .collect()
}

#[allow(dead_code)]
pub fn monitor(
    config: DetectionConfig,
    client: Arc<MockEnrichment>,
    notifiers: NotifierSet,
) -> TradeMonitor {
    let trackers = Trackers::from_config(&config);
    TradeMonitor::new(
        config,
        client,
        Arc::new(RateLimiter::per_minute(100_000)),
        trackers,
        notifiers,
    )
}

#[allow(dead_code)]
pub fn verify_context(client: Arc<MockEnrichment>) -> VerifyContext {
    VerifyContext {
        client,
        limiter: Arc::new(RateLimiter::per_minute(100_000)),
        prices: Arc::new(PriceBook::new()),
        timeout: StdDuration::from_secs(5),
    }
}
