use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use super::observation::{
    AlertPolicy, GroundTruth, ObservationTracker, PatternRule, TrackerSnapshot, Verifiable,
};
use crate::config::DetectionConfig;
use crate::models::{
    AlertReason, HedgePosition, HedgeRemoval, ObservationResult, PendingObservation, Side,
    TradeEvent, WalletProfile, WalletStats,
};
use crate::store::{decode_snapshot, encode_snapshot, Persistable, StoreError};

pub const HEDGE_SNAPSHOT_KEY: &str = "hedge_tracker.json";

/// Reconstruct the wallet's Yes/No inventory around a SELL and report a
/// significant one-sided removal out of a two-sided position.
///
/// The profile is read after the trade: `after` is its current inventory and
/// `before` adds the sold size back onto the sold outcome.
pub fn detect_hedge_removal(
    trade: &TradeEvent,
    profile: &WalletProfile,
    significant_sell_pct: Decimal,
) -> Option<HedgeRemoval> {
    if trade.side != Side::Sell || trade.size <= Decimal::ZERO {
        return None;
    }

    let sold_label = sold_outcome_label(trade, profile)?;
    let held = |label: &str| {
        profile
            .position_for_outcome(label)
            .map_or(Decimal::ZERO, |p| p.size)
    };
    let yes_after = held("Yes");
    let no_after = held("No");

    let (yes_before, no_before) = if sold_label == "Yes" {
        (yes_after + trade.size, no_after)
    } else {
        (yes_after, no_after + trade.size)
    };

    let position = HedgePosition {
        wallet: trade.wallet.clone(),
        market: trade.market_id.clone(),
        yes_before,
        yes_after,
        no_before,
        no_after,
    };

    if !position.was_two_sided() || !position.kept_other_side() {
        return None;
    }
    let sold_pct = position.sold_pct();
    if sold_pct < significant_sell_pct {
        return None;
    }
    let sold_outcome = position.sold_outcome()?.to_string();

    Some(HedgeRemoval {
        position,
        sold_outcome,
        sold_pct,
    })
}

/// "Yes" or "No" for the sold asset, from the trade itself or the profile.
fn sold_outcome_label(trade: &TradeEvent, profile: &WalletProfile) -> Option<&'static str> {
    let label = trade.outcome.clone().or_else(|| {
        profile
            .position_for_asset(&trade.asset_id)
            .map(|p| p.outcome.clone())
    });

    if let Some(label) = label {
        return normalize_binary(&label);
    }

    // Sold out completely: the only remaining binary position is the other side.
    let mut others = profile
        .market_positions
        .iter()
        .filter(|p| p.asset_id != trade.asset_id && p.size > Decimal::ZERO)
        .filter_map(|p| normalize_binary(&p.outcome));
    match (others.next(), others.next()) {
        (Some(other), None) => super::observation::opposite_binary_outcome(other),
        _ => None,
    }
}

fn normalize_binary(label: &str) -> Option<&'static str> {
    if label.eq_ignore_ascii_case("yes") {
        Some("Yes")
    } else if label.eq_ignore_ascii_case("no") {
        Some("No")
    } else {
        None
    }
}

/// Hedge removals are confirmed when the market resolves against the side
/// that was dropped.
#[derive(Debug, Clone)]
pub struct HedgeRule {
    pub significant_sell_pct: Decimal,
}

impl HedgeRule {
    pub fn observation(
        trade: &TradeEvent,
        removal: &HedgeRemoval,
        verify_delay: Duration,
    ) -> PendingObservation {
        let mut obs = PendingObservation::from_trade(trade, verify_delay);
        obs.outcome = Some(removal.sold_outcome.clone());
        obs
    }
}

impl PatternRule for HedgeRule {
    type Scratch = ();

    fn name(&self) -> &'static str {
        "hedge_removal"
    }

    fn reason(&self) -> AlertReason {
        AlertReason::HedgeRemovalConfirmed
    }

    fn entry(
        &self,
        trade: &TradeEvent,
        profile: Option<&WalletProfile>,
        _scratch: &mut (),
        verify_delay: Duration,
    ) -> Option<PendingObservation> {
        let removal = detect_hedge_removal(trade, profile?, self.significant_sell_pct)?;
        Some(Self::observation(trade, &removal, verify_delay))
    }

    fn judge(
        &self,
        obs: &PendingObservation,
        truth: &GroundTruth,
        now: DateTime<Utc>,
    ) -> Option<ObservationResult> {
        let winner = truth.winning_outcome.as_deref()?;
        let sold = obs.outcome.as_deref()?;
        let favorable = !winner.eq_ignore_ascii_case(sold);

        let move_pct = match truth.current_price {
            Some(current) if obs.price > Decimal::ZERO => (current - obs.price) / obs.price,
            _ => Decimal::ZERO,
        };
        Some(ObservationResult {
            favorable,
            move_pct,
            score: if favorable { Decimal::ONE } else { Decimal::ZERO },
            verified_at: now,
        })
    }

    fn alert_on_favorable(&self) -> bool {
        true
    }
}

/// What a trade produced in the hedge tracker.
#[derive(Debug, Default)]
pub struct HedgeCheck {
    pub removal: Option<HedgeRemoval>,
    pub reasons: Vec<AlertReason>,
}

pub struct HedgeTracker {
    engine: Arc<ObservationTracker<HedgeRule>>,
    significant_sell_pct: Decimal,
    verify_delay: Duration,
}

impl HedgeTracker {
    pub fn from_config(config: &DetectionConfig) -> Self {
        let verify_delay = Duration::seconds(config.hedge.verify_delay_secs as i64);
        let significant_sell_pct = config.hedge.significant_sell_pct;
        Self {
            engine: Arc::new(ObservationTracker::new(
                HedgeRule {
                    significant_sell_pct,
                },
                verify_delay,
                AlertPolicy::from_config(&config.hedge.policy),
                Duration::seconds(config.engine.retention_secs as i64),
                config.engine.max_wallets,
            )),
            significant_sell_pct,
            verify_delay,
        }
    }

    /// Detect a removal on this trade and record it for verification. A
    /// removal by a wallet with a qualifying record also gets the confirmed
    /// reason. Trades without a removal get nothing.
    pub fn observe(
        &self,
        trade: &TradeEvent,
        profile: Option<&WalletProfile>,
        now: DateTime<Utc>,
    ) -> HedgeCheck {
        let mut check = HedgeCheck::default();

        if let Some(removal) =
            profile.and_then(|p| detect_hedge_removal(trade, p, self.significant_sell_pct))
        {
            tracing::info!(
                wallet = %trade.wallet,
                market = %trade.market_id,
                sold = %removal.sold_outcome,
                sold_pct = %removal.sold_pct,
                "Hedge removal detected"
            );
            self.engine
                .record(HedgeRule::observation(trade, &removal, self.verify_delay));
            check.reasons.push(AlertReason::HedgeRemoval);
            check.removal = Some(removal);

            // Only a removal on this trade can carry the wallet's record
            if self.engine.try_claim_alert(&trade.wallet, now) {
                check.reasons.push(AlertReason::HedgeRemovalConfirmed);
            }
        }

        check
    }

    pub fn engine(&self) -> &Arc<ObservationTracker<HedgeRule>> {
        &self.engine
    }

    pub fn verifier(&self) -> Arc<dyn Verifiable> {
        self.engine.clone()
    }

    pub fn wallet_stats(&self, wallet: &str) -> Option<WalletStats> {
        self.engine.stats(wallet)
    }
}

impl Persistable for HedgeTracker {
    fn snapshot_key(&self) -> &'static str {
        HEDGE_SNAPSHOT_KEY
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode_snapshot(&self.engine.snapshot())
    }

    fn restore(&self, bytes: &[u8]) -> Result<usize, StoreError> {
        let snapshot: TrackerSnapshot = decode_snapshot(bytes)?;
        Ok(self.engine.restore(snapshot))
    }

    fn evict_for_space(&self) -> usize {
        self.engine.evict(self.engine.wallet_count() / 2)
    }
}
