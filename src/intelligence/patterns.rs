use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::observation::{
    judge_price_move, AlertPolicy, GroundTruth, ObservationTracker, PatternRule, TrackerSnapshot,
    Verifiable,
};
use crate::config::{DetectionConfig, PatternConfig};
use crate::models::{
    AlertReason, ObservationResult, PendingObservation, Side, TradeEvent, WalletProfile,
    WalletStats,
};
use crate::store::{decode_snapshot, encode_snapshot, Persistable, StoreError};

pub const PATTERN_SNAPSHOT_KEY: &str = "pattern_tracker.json";

/// Open stealth windows kept before stale ones are swept.
const MAX_STEALTH_WINDOWS: usize = 50_000;

fn secs(s: u64) -> Duration {
    Duration::seconds(s as i64)
}

// ---------------------------------------------------------------------------
// Conviction doubling
// ---------------------------------------------------------------------------

/// Adding to a losing position instead of cutting it.
#[derive(Debug, Clone)]
pub struct ConvictionRule {
    pub min_position: Decimal,
    pub min_add_value: Decimal,
    pub min_loss_pct: Decimal,
    pub min_move: Decimal,
}

impl PatternRule for ConvictionRule {
    type Scratch = ();

    fn name(&self) -> &'static str {
        "conviction_doubling"
    }

    fn reason(&self) -> AlertReason {
        AlertReason::ConvictionDoubling
    }

    fn entry(
        &self,
        trade: &TradeEvent,
        profile: Option<&WalletProfile>,
        _scratch: &mut (),
        verify_delay: Duration,
    ) -> Option<PendingObservation> {
        if trade.side != Side::Buy || trade.notional() < self.min_add_value {
            return None;
        }
        let position = profile?.position_for_asset(&trade.asset_id)?;
        if position.size < self.min_position || position.avg_price <= Decimal::ZERO {
            return None;
        }
        let underwater = (position.avg_price - trade.price) / position.avg_price;
        if underwater < self.min_loss_pct {
            return None;
        }
        Some(PendingObservation::from_trade(trade, verify_delay))
    }

    fn judge(
        &self,
        obs: &PendingObservation,
        truth: &GroundTruth,
        now: DateTime<Utc>,
    ) -> Option<ObservationResult> {
        judge_price_move(obs, truth, self.min_move, now)
    }
}

// ---------------------------------------------------------------------------
// Perfect exit timing
// ---------------------------------------------------------------------------

/// Large sells that turn out to precede a price drop.
#[derive(Debug, Clone)]
pub struct PerfectExitRule {
    pub min_notional: Decimal,
    pub min_move: Decimal,
}

impl PatternRule for PerfectExitRule {
    type Scratch = ();

    fn name(&self) -> &'static str {
        "perfect_exit_timing"
    }

    fn reason(&self) -> AlertReason {
        AlertReason::PerfectExitTiming
    }

    fn entry(
        &self,
        trade: &TradeEvent,
        _profile: Option<&WalletProfile>,
        _scratch: &mut (),
        verify_delay: Duration,
    ) -> Option<PendingObservation> {
        (trade.side == Side::Sell && trade.notional() >= self.min_notional)
            .then(|| PendingObservation::from_trade(trade, verify_delay))
    }

    fn judge(
        &self,
        obs: &PendingObservation,
        truth: &GroundTruth,
        now: DateTime<Utc>,
    ) -> Option<ObservationResult> {
        judge_price_move(obs, truth, self.min_move, now)
    }
}

// ---------------------------------------------------------------------------
// Stealth accumulation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    at: DateTime<Utc>,
    size: Decimal,
    value: Decimal,
}

/// One open window in snapshot form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedWindow {
    pub wallet: String,
    pub asset_id: String,
    pub fills: Vec<Fill>,
}

/// Rolling windows of small buys, keyed by wallet and asset.
#[derive(Debug, Default)]
pub struct StealthWindows {
    windows: HashMap<(String, String), VecDeque<Fill>>,
}

impl StealthWindows {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn export(&self) -> Vec<SavedWindow> {
        self.windows
            .iter()
            .filter(|(_, fills)| !fills.is_empty())
            .map(|((wallet, asset_id), fills)| SavedWindow {
                wallet: wallet.clone(),
                asset_id: asset_id.clone(),
                fills: fills.iter().cloned().collect(),
            })
            .collect()
    }

    /// Add saved windows. A window already open in memory is kept as is.
    pub fn merge(&mut self, saved: Vec<SavedWindow>) -> usize {
        let mut merged = 0;
        for window in saved {
            if window.fills.is_empty() {
                continue;
            }
            let key = (window.wallet, window.asset_id);
            if self.windows.contains_key(&key) {
                continue;
            }
            let mut fills: Vec<Fill> = window.fills;
            fills.sort_by_key(|f| f.at);
            self.windows.insert(key, fills.into());
            merged += 1;
        }
        merged
    }
}

/// Many small buys into one asset that add up to a real position.
#[derive(Debug, Clone)]
pub struct StealthRule {
    pub max_trade: Decimal,
    pub min_trades: usize,
    pub min_total: Decimal,
    pub window: Duration,
    pub min_move: Decimal,
}

impl PatternRule for StealthRule {
    type Scratch = StealthWindows;

    fn name(&self) -> &'static str {
        "stealth_accumulation"
    }

    fn reason(&self) -> AlertReason {
        AlertReason::StealthAccumulation
    }

    fn entry(
        &self,
        trade: &TradeEvent,
        _profile: Option<&WalletProfile>,
        scratch: &mut StealthWindows,
        verify_delay: Duration,
    ) -> Option<PendingObservation> {
        let notional = trade.notional();
        if trade.side != Side::Buy || notional <= Decimal::ZERO || notional > self.max_trade {
            return None;
        }

        let cutoff = trade.timestamp - self.window;
        if scratch.windows.len() >= MAX_STEALTH_WINDOWS {
            scratch
                .windows
                .retain(|_, fills| fills.back().is_some_and(|f| f.at > cutoff));
        }

        let key = (trade.wallet.clone(), trade.asset_id.clone());
        let fills = scratch.windows.entry(key.clone()).or_default();
        fills.push_back(Fill {
            at: trade.timestamp,
            size: trade.size,
            value: notional,
        });
        while fills.front().is_some_and(|f| f.at <= cutoff) {
            fills.pop_front();
        }

        let total: Decimal = fills.iter().map(|f| f.value).sum();
        if fills.len() < self.min_trades || total < self.min_total {
            return None;
        }
        let size: Decimal = fills.iter().map(|f| f.size).sum();
        scratch.windows.remove(&key);

        let mut obs = PendingObservation::from_trade(trade, verify_delay);
        obs.size = size;
        obs.value = total;
        if size > Decimal::ZERO {
            obs.price = total / size;
        }
        Some(obs)
    }

    fn judge(
        &self,
        obs: &PendingObservation,
        truth: &GroundTruth,
        now: DateTime<Utc>,
    ) -> Option<ObservationResult> {
        judge_price_move(obs, truth, self.min_move, now)
    }
}

// ---------------------------------------------------------------------------
// Pre-move positioning
// ---------------------------------------------------------------------------

/// Large trades placed just before the price moves their way.
#[derive(Debug, Clone)]
pub struct PreMoveRule {
    pub min_notional: Decimal,
    pub min_move: Decimal,
}

impl PatternRule for PreMoveRule {
    type Scratch = ();

    fn name(&self) -> &'static str {
        "pre_move_positioning"
    }

    fn reason(&self) -> AlertReason {
        AlertReason::PreMovePositioning
    }

    fn entry(
        &self,
        trade: &TradeEvent,
        _profile: Option<&WalletProfile>,
        _scratch: &mut (),
        verify_delay: Duration,
    ) -> Option<PendingObservation> {
        (trade.notional() >= self.min_notional)
            .then(|| PendingObservation::from_trade(trade, verify_delay))
    }

    fn judge(
        &self,
        obs: &PendingObservation,
        truth: &GroundTruth,
        now: DateTime<Utc>,
    ) -> Option<ObservationResult> {
        judge_price_move(obs, truth, self.min_move, now)
    }
}

// ---------------------------------------------------------------------------
// PatternTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternSnapshot {
    #[serde(default)]
    conviction: TrackerSnapshot,
    #[serde(default)]
    perfect_exit: TrackerSnapshot,
    #[serde(default)]
    stealth: TrackerSnapshot,
    #[serde(default)]
    pre_move: TrackerSnapshot,
    /// Partial stealth accumulation not yet turned into an observation.
    #[serde(default)]
    stealth_windows: Vec<SavedWindow>,
}

/// The four price-verified pattern engines, each behind its own lock.
pub struct PatternTracker {
    pub conviction: Arc<ObservationTracker<ConvictionRule>>,
    pub perfect_exit: Arc<ObservationTracker<PerfectExitRule>>,
    pub stealth: Arc<ObservationTracker<StealthRule>>,
    pub pre_move: Arc<ObservationTracker<PreMoveRule>>,
}

impl PatternTracker {
    pub fn new(patterns: &PatternConfig, retention: Duration, max_wallets: usize) -> Self {
        let policy = AlertPolicy::from_config(&patterns.policy);
        let min_move = patterns.min_move;

        Self {
            conviction: Arc::new(ObservationTracker::new(
                ConvictionRule {
                    min_position: patterns.conviction_min_position,
                    min_add_value: patterns.conviction_min_add_value,
                    min_loss_pct: patterns.conviction_min_loss_pct,
                    min_move,
                },
                secs(patterns.conviction_verify_delay_secs),
                policy.clone(),
                retention,
                max_wallets,
            )),
            perfect_exit: Arc::new(ObservationTracker::new(
                PerfectExitRule {
                    min_notional: patterns.exit_min_notional,
                    min_move,
                },
                secs(patterns.exit_verify_delay_secs),
                policy.clone(),
                retention,
                max_wallets,
            )),
            stealth: Arc::new(ObservationTracker::new(
                StealthRule {
                    max_trade: patterns.stealth_max_trade,
                    min_trades: patterns.stealth_min_trades,
                    min_total: patterns.stealth_min_total,
                    window: secs(patterns.stealth_window_secs),
                    min_move,
                },
                secs(patterns.stealth_verify_delay_secs),
                policy.clone(),
                retention,
                max_wallets,
            )),
            pre_move: Arc::new(ObservationTracker::new(
                PreMoveRule {
                    min_notional: patterns.premove_min_notional,
                    min_move,
                },
                secs(patterns.premove_verify_delay_secs),
                policy,
                retention,
                max_wallets,
            )),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(
            &config.patterns,
            secs(config.engine.retention_secs),
            config.engine.max_wallets,
        )
    }

    /// Record whatever this trade opens and return the reasons for wallets
    /// whose verified record already meets the policy.
    pub fn observe(
        &self,
        trade: &TradeEvent,
        profile: Option<&WalletProfile>,
        now: DateTime<Utc>,
    ) -> Vec<AlertReason> {
        let mut reasons = Vec::new();

        if self.conviction.observe(trade, profile).is_some()
            && self.conviction.try_claim_alert(&trade.wallet, now)
        {
            reasons.push(AlertReason::ConvictionDoubling);
        }
        if self.perfect_exit.observe(trade, profile).is_some()
            && self.perfect_exit.try_claim_alert(&trade.wallet, now)
        {
            reasons.push(AlertReason::PerfectExitTiming);
        }
        if self.stealth.observe(trade, profile).is_some()
            && self.stealth.try_claim_alert(&trade.wallet, now)
        {
            reasons.push(AlertReason::StealthAccumulation);
        }
        if self.pre_move.observe(trade, profile).is_some()
            && self.pre_move.try_claim_alert(&trade.wallet, now)
        {
            reasons.push(AlertReason::PreMovePositioning);
        }

        reasons
    }

    pub fn verifiers(&self) -> Vec<Arc<dyn Verifiable>> {
        vec![
            self.conviction.clone() as Arc<dyn Verifiable>,
            self.perfect_exit.clone() as Arc<dyn Verifiable>,
            self.stealth.clone() as Arc<dyn Verifiable>,
            self.pre_move.clone() as Arc<dyn Verifiable>,
        ]
    }

    /// Per-engine stats for one wallet, skipping engines that never saw it.
    pub fn wallet_stats(&self, wallet: &str) -> Vec<(&'static str, WalletStats)> {
        [
            (self.conviction.name(), self.conviction.stats(wallet)),
            (self.perfect_exit.name(), self.perfect_exit.stats(wallet)),
            (self.stealth.name(), self.stealth.stats(wallet)),
            (self.pre_move.name(), self.pre_move.stats(wallet)),
        ]
        .into_iter()
        .filter_map(|(name, stats)| stats.map(|s| (name, s)))
        .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.conviction.pending_len()
            + self.perfect_exit.pending_len()
            + self.stealth.pending_len()
            + self.pre_move.pending_len()
    }
}

impl Persistable for PatternTracker {
    fn snapshot_key(&self) -> &'static str {
        PATTERN_SNAPSHOT_KEY
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode_snapshot(&PatternSnapshot {
            conviction: self.conviction.snapshot(),
            perfect_exit: self.perfect_exit.snapshot(),
            stealth: self.stealth.snapshot(),
            pre_move: self.pre_move.snapshot(),
            stealth_windows: self.stealth.with_scratch(|w| w.export()),
        })
    }

    fn restore(&self, bytes: &[u8]) -> Result<usize, StoreError> {
        let snapshot: PatternSnapshot = decode_snapshot(bytes)?;
        let windows = snapshot.stealth_windows;
        let windows = self.stealth.with_scratch(|w| w.merge(windows));
        if windows > 0 {
            tracing::debug!(windows, "Restored open stealth windows");
        }
        Ok(self.conviction.restore(snapshot.conviction)
            + self.perfect_exit.restore(snapshot.perfect_exit)
            + self.stealth.restore(snapshot.stealth)
            + self.pre_move.restore(snapshot.pre_move))
    }

    fn evict_for_space(&self) -> usize {
        self.conviction.evict(self.conviction.wallet_count() / 2)
            + self.perfect_exit.evict(self.perfect_exit.wallet_count() / 2)
            + self.stealth.evict(self.stealth.wallet_count() / 2)
            + self.pre_move.evict(self.pre_move.wallet_count() / 2)
    }
}
