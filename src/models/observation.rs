use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Side, TradeEvent};

/// Outcome of verifying a pending observation against delayed ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationResult {
    pub favorable: bool,
    /// Signed relative price move since the recorded price.
    pub move_pct: Decimal,
    pub score: Decimal,
    pub verified_at: DateTime<Utc>,
}

/// A recorded trade awaiting a delayed re-check.
///
/// Lifecycle: recorded -> verified (favorable or not) or expired. The result
/// is written once; later verification attempts are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingObservation {
    pub id: String,
    pub wallet: String,
    pub market: String,
    pub asset_id: String,
    #[serde(default)]
    pub outcome: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
    pub verify_after: DateTime<Utc>,
    pub verified: bool,
    #[serde(default)]
    pub result: Option<ObservationResult>,
}

impl PendingObservation {
    pub fn observation_id(wallet: &str, market: &str, at: DateTime<Utc>) -> String {
        format!("{}:{}:{}", wallet, market, at.timestamp_millis())
    }

    /// Build an observation straight from a trade, verifiable after `delay`.
    pub fn from_trade(trade: &TradeEvent, delay: Duration) -> Self {
        Self {
            id: Self::observation_id(&trade.wallet, &trade.market_id, trade.timestamp),
            wallet: trade.wallet.clone(),
            market: trade.market_id.clone(),
            asset_id: trade.asset_id.clone(),
            outcome: trade.outcome.clone(),
            side: trade.side,
            price: trade.price,
            size: trade.size,
            value: trade.notional(),
            recorded_at: trade.timestamp,
            verify_after: trade.timestamp + delay,
            verified: false,
            result: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.verified && now >= self.verify_after
    }

    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        !self.verified && now - self.recorded_at > retention
    }

    /// Rebuild the trade this observation was recorded from.
    pub fn to_trade(&self) -> TradeEvent {
        TradeEvent {
            asset_id: self.asset_id.clone(),
            market_id: self.market.clone(),
            side: self.side,
            price: self.price,
            size: self.size,
            wallet: self.wallet.clone(),
            timestamp: self.recorded_at,
            transaction_id: self.id.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Per-wallet accumulators kept by each tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub observed: u32,
    pub verified: u32,
    pub favorable: u32,
    /// Rolling mean of |move| across verified observations.
    pub avg_move: Decimal,
    #[serde(default)]
    pub last_alert_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl WalletStats {
    /// Alpha score: favorable over verified.
    pub fn success_rate(&self) -> Decimal {
        if self.verified == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.favorable) / Decimal::from(self.verified)
    }

    pub fn record_observed(&mut self, at: DateTime<Utc>) {
        self.observed += 1;
        self.touch(at);
    }

    pub fn record_result(&mut self, result: &ObservationResult) {
        let n = Decimal::from(self.verified);
        self.avg_move = (self.avg_move * n + result.move_pct.abs()) / (n + Decimal::ONE);
        self.verified += 1;
        if result.favorable {
            self.favorable += 1;
        }
        self.touch(result.verified_at);
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_seen.map_or(true, |seen| at > seen) {
            self.last_seen = Some(at);
        }
    }
}
