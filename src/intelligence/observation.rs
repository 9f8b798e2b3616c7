use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::AlertPolicyConfig;
use crate::enrichment::{with_deadline, EnrichmentClient, EnrichmentError, PriceBook, RateLimiter};
use crate::models::{
    AlertReason, ObservationResult, PendingObservation, Side, TradeAlert, TradeEvent,
    WalletProfile, WalletStats,
};
use crate::polymarket::types::ApiPosition;

/// Price at or above which a redeemable position counts as the winner.
const RESOLVED_WIN_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);
/// Price at or below which a redeemable position counts as the loser.
const RESOLVED_LOSS_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

// ---------------------------------------------------------------------------
// Policy and ground truth
// ---------------------------------------------------------------------------

/// When a wallet's verified track record is strong enough to alert on.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    pub min_trades: u32,
    pub min_success_rate: Decimal,
    pub cooldown: Duration,
}

impl AlertPolicy {
    pub fn from_config(config: &AlertPolicyConfig) -> Self {
        Self {
            min_trades: config.min_trades,
            min_success_rate: config.min_success_rate,
            cooldown: Duration::seconds(config.cooldown_secs as i64),
        }
    }

    /// Track record is good enough, ignoring the cooldown.
    pub fn qualifies(&self, stats: &WalletStats) -> bool {
        stats.verified >= self.min_trades && stats.success_rate() >= self.min_success_rate
    }

    pub fn cooled_down(&self, stats: &WalletStats, now: DateTime<Utc>) -> bool {
        stats
            .last_alert_at
            .map_or(true, |last| now - last >= self.cooldown)
    }

    pub fn allows(&self, stats: &WalletStats, now: DateTime<Utc>) -> bool {
        self.qualifies(stats) && self.cooled_down(stats, now)
    }
}

/// What the market says now about an observation's asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundTruth {
    pub current_price: Option<Decimal>,
    /// Set once the market has resolved.
    pub winning_outcome: Option<String>,
}

impl GroundTruth {
    /// Read the asset's price and any resolution from the wallet's positions
    /// in the market, falling back to the last traded price.
    pub fn from_positions(
        positions: &[ApiPosition],
        asset_id: &str,
        fallback_price: Option<Decimal>,
    ) -> Self {
        let current_price = positions
            .iter()
            .find(|p| p.asset == asset_id && p.cur_price > Decimal::ZERO)
            .map(|p| p.cur_price)
            .or(fallback_price);

        let winning_outcome = positions
            .iter()
            .filter(|p| p.redeemable)
            .find_map(|p| {
                if p.cur_price >= RESOLVED_WIN_PRICE {
                    Some(p.outcome.clone())
                } else if p.cur_price <= RESOLVED_LOSS_PRICE {
                    opposite_binary_outcome(&p.outcome).map(str::to_string)
                } else {
                    None
                }
            });

        Self {
            current_price,
            winning_outcome,
        }
    }
}

pub(crate) fn opposite_binary_outcome(outcome: &str) -> Option<&'static str> {
    if outcome.eq_ignore_ascii_case("yes") {
        Some("No")
    } else if outcome.eq_ignore_ascii_case("no") {
        Some("Yes")
    } else {
        None
    }
}

/// Judge a price-based observation: BUYs want the price up, SELLs want it
/// down, by at least `min_move` relative to the recorded price.
pub fn judge_price_move(
    obs: &PendingObservation,
    truth: &GroundTruth,
    min_move: Decimal,
    now: DateTime<Utc>,
) -> Option<ObservationResult> {
    let current = truth.current_price?;
    if obs.price <= Decimal::ZERO {
        return None;
    }
    let move_pct = (current - obs.price) / obs.price;
    let directional = match obs.side {
        Side::Buy => move_pct,
        Side::Sell => -move_pct,
    };
    Some(ObservationResult {
        favorable: directional >= min_move,
        move_pct,
        score: directional,
        verified_at: now,
    })
}

// ---------------------------------------------------------------------------
// Pattern rule seam
// ---------------------------------------------------------------------------

/// One delayed-verification pattern: what gets recorded and how it is judged.
pub trait PatternRule: Send + Sync + 'static {
    /// Per-tracker working state kept alongside the observations.
    type Scratch: Default + Send;

    fn name(&self) -> &'static str;

    /// Reason attached when the wallet's record meets the policy.
    fn reason(&self) -> AlertReason;

    /// Decide whether `trade` opens an observation. Called under the tracker
    /// lock; must not block.
    fn entry(
        &self,
        trade: &TradeEvent,
        profile: Option<&WalletProfile>,
        scratch: &mut Self::Scratch,
        verify_delay: Duration,
    ) -> Option<PendingObservation>;

    /// `None` means not determinable yet; retried on the next pass.
    fn judge(
        &self,
        obs: &PendingObservation,
        truth: &GroundTruth,
        now: DateTime<Utc>,
    ) -> Option<ObservationResult>;

    /// Alert on every favorable verification instead of only when the policy
    /// allows.
    fn alert_on_favorable(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Serializable state of one tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    #[serde(default)]
    pub pending: Vec<PendingObservation>,
    /// Recently verified observations, kept until retention for idempotence.
    #[serde(default)]
    pub verified: Vec<PendingObservation>,
    #[serde(default)]
    pub stats: HashMap<String, WalletStats>,
}

struct Book<S> {
    pending: HashMap<String, PendingObservation>,
    verified: HashMap<String, PendingObservation>,
    stats: HashMap<String, WalletStats>,
    scratch: S,
}

impl<S: Default> Default for Book<S> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            verified: HashMap::new(),
            stats: HashMap::new(),
            scratch: S::default(),
        }
    }
}

/// Everything a verify pass needs besides the tracker itself.
#[derive(Clone)]
pub struct VerifyContext {
    pub client: Arc<dyn EnrichmentClient>,
    pub limiter: Arc<RateLimiter>,
    pub prices: Arc<PriceBook>,
    pub timeout: StdDuration,
}

#[derive(Debug, Default)]
pub struct VerifyOutcome {
    pub verified: usize,
    pub favorable: usize,
    /// Due but not settled this pass: limiter, fetch error or undecidable.
    pub deferred: usize,
    pub alerts: Vec<TradeAlert>,
}

/// Generic record-then-verify engine behind every delayed tracker.
pub struct ObservationTracker<R: PatternRule> {
    rule: R,
    verify_delay: Duration,
    policy: AlertPolicy,
    retention: Duration,
    max_wallets: usize,
    book: Mutex<Book<R::Scratch>>,
}

impl<R: PatternRule> ObservationTracker<R> {
    pub fn new(
        rule: R,
        verify_delay: Duration,
        policy: AlertPolicy,
        retention: Duration,
        max_wallets: usize,
    ) -> Self {
        Self {
            rule,
            verify_delay,
            policy,
            retention,
            max_wallets: max_wallets.max(1),
            book: Mutex::new(Book::default()),
        }
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn name(&self) -> &'static str {
        self.rule.name()
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Run the rule's entry check and record what it produces.
    pub fn observe(
        &self,
        trade: &TradeEvent,
        profile: Option<&WalletProfile>,
    ) -> Option<PendingObservation> {
        let mut book = self.book.lock();
        let obs = self
            .rule
            .entry(trade, profile, &mut book.scratch, self.verify_delay)?;
        if self.insert(&mut book, obs.clone()) {
            Some(obs)
        } else {
            None
        }
    }

    /// Record an observation. Duplicate ids are ignored.
    pub fn record(&self, obs: PendingObservation) -> bool {
        let mut book = self.book.lock();
        self.insert(&mut book, obs)
    }

    fn insert(&self, book: &mut Book<R::Scratch>, obs: PendingObservation) -> bool {
        if book.pending.contains_key(&obs.id) || book.verified.contains_key(&obs.id) {
            return false;
        }
        book.stats
            .entry(obs.wallet.clone())
            .or_default()
            .record_observed(obs.recorded_at);
        counter!("observations_recorded_total", "tracker" => self.rule.name()).increment(1);
        tracing::debug!(tracker = self.rule.name(), id = %obs.id, "Observation recorded");
        book.pending.insert(obs.id.clone(), obs);

        if book.stats.len() > self.max_wallets {
            // Shed a little extra so this does not run on every insert.
            let target = self.max_wallets - self.max_wallets / 20;
            Self::evict_to(book, target);
        }
        true
    }

    /// Unverified observations whose delay has elapsed.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<PendingObservation> {
        let book = self.book.lock();
        let mut due: Vec<PendingObservation> =
            book.pending.values().filter(|o| o.is_due(now)).cloned().collect();
        due.sort_by_key(|o| o.verify_after);
        due
    }

    /// Fold a verification result in. No-op for ids already verified or
    /// unknown; returns the wallet's stats after the update otherwise.
    pub fn apply_result(&self, id: &str, result: ObservationResult) -> Option<WalletStats> {
        let mut book = self.book.lock();
        let mut obs = book.pending.remove(id)?;
        obs.verified = true;
        obs.result = Some(result.clone());

        let stats = book.stats.entry(obs.wallet.clone()).or_default();
        stats.record_result(&result);
        let snapshot = stats.clone();

        book.verified.insert(obs.id.clone(), obs);
        Some(snapshot)
    }

    /// Drop unverified observations past retention, and verified history past
    /// retention. Stats are left alone.
    pub fn expire(&self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let mut book = self.book.lock();
        let before = book.pending.len();
        book.pending.retain(|_, o| !o.is_expired(now, retention));
        let expired = before - book.pending.len();
        book.verified.retain(|_, o| now - o.recorded_at <= retention);
        if expired > 0 {
            counter!("observations_expired_total", "tracker" => self.rule.name())
                .increment(expired as u64);
        }
        expired
    }

    /// Check the policy for `wallet` and stamp `last_alert_at` when it allows
    /// an alert, so trade-time and verify-time alerts share one cooldown.
    pub fn try_claim_alert(&self, wallet: &str, now: DateTime<Utc>) -> bool {
        let mut book = self.book.lock();
        match book.stats.get_mut(wallet) {
            Some(stats) if self.policy.allows(stats, now) => {
                stats.last_alert_at = Some(now);
                true
            }
            _ => false,
        }
    }

    fn claim_after_cooldown(&self, wallet: &str, now: DateTime<Utc>) -> bool {
        let mut book = self.book.lock();
        let stats = book.stats.entry(wallet.to_string()).or_default();
        if self.policy.cooled_down(stats, now) {
            stats.last_alert_at = Some(now);
            true
        } else {
            false
        }
    }

    pub fn stats(&self, wallet: &str) -> Option<WalletStats> {
        self.book.lock().stats.get(wallet).cloned()
    }

    /// Run `f` against the rule's working state under the tracker lock.
    pub fn with_scratch<T>(&self, f: impl FnOnce(&mut R::Scratch) -> T) -> T {
        f(&mut self.book.lock().scratch)
    }

    pub fn pending_len(&self) -> usize {
        self.book.lock().pending.len()
    }

    pub fn verified_len(&self) -> usize {
        self.book.lock().verified.len()
    }

    pub fn wallet_count(&self) -> usize {
        self.book.lock().stats.len()
    }

    /// Evict least-recently-seen wallets until at most `keep` remain.
    pub fn evict(&self, keep: usize) -> usize {
        let mut book = self.book.lock();
        Self::evict_to(&mut book, keep)
    }

    fn evict_to(book: &mut Book<R::Scratch>, keep: usize) -> usize {
        if book.stats.len() <= keep {
            return 0;
        }
        let mut by_age: Vec<(Option<DateTime<Utc>>, String)> = book
            .stats
            .iter()
            .map(|(wallet, s)| (s.last_seen, wallet.clone()))
            .collect();
        by_age.sort();

        let excess = book.stats.len() - keep;
        let evicted: HashSet<String> = by_age.into_iter().take(excess).map(|(_, w)| w).collect();
        book.stats.retain(|wallet, _| !evicted.contains(wallet));
        book.pending.retain(|_, o| !evicted.contains(&o.wallet));
        book.verified.retain(|_, o| !evicted.contains(&o.wallet));
        counter!("tracker_wallets_evicted_total").increment(excess as u64);
        excess
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let book = self.book.lock();
        TrackerSnapshot {
            pending: book.pending.values().cloned().collect(),
            verified: book.verified.values().cloned().collect(),
            stats: book.stats.clone(),
        }
    }

    /// Merge a snapshot into live state. Live records win on conflict.
    pub fn restore(&self, snapshot: TrackerSnapshot) -> usize {
        let mut book = self.book.lock();
        let mut merged = 0;
        for obs in snapshot.pending {
            if obs.verified {
                if !book.verified.contains_key(&obs.id) {
                    book.verified.insert(obs.id.clone(), obs);
                    merged += 1;
                }
            } else if !book.pending.contains_key(&obs.id) && !book.verified.contains_key(&obs.id)
            {
                book.pending.insert(obs.id.clone(), obs);
                merged += 1;
            }
        }
        for obs in snapshot.verified {
            if !book.verified.contains_key(&obs.id) {
                book.pending.remove(&obs.id);
                book.verified.insert(obs.id.clone(), obs);
                merged += 1;
            }
        }
        for (wallet, stats) in snapshot.stats {
            book.stats.entry(wallet).or_insert(stats);
        }
        merged
    }

    async fn ground_truth(
        &self,
        ctx: &VerifyContext,
        obs: &PendingObservation,
    ) -> Result<GroundTruth, EnrichmentError> {
        let positions = with_deadline(
            ctx.timeout,
            ctx.client.positions(&obs.wallet, Some(&obs.market)),
        )
        .await?;
        Ok(GroundTruth::from_positions(
            &positions,
            &obs.asset_id,
            ctx.prices.latest(&obs.asset_id),
        ))
    }

    /// Verify every due observation. Stops early when the limiter runs dry;
    /// whatever is left is picked up by the next pass.
    pub async fn verify_due(&self, ctx: &VerifyContext, now: DateTime<Utc>) -> VerifyOutcome {
        let due = self.due(now);
        let mut outcome = VerifyOutcome::default();
        let name = self.rule.name();

        for (idx, obs) in due.iter().enumerate() {
            if !ctx.limiter.try_acquire() {
                outcome.deferred += due.len() - idx;
                counter!("verifications_deferred_total", "tracker" => name)
                    .increment((due.len() - idx) as u64);
                tracing::debug!(tracker = name, remaining = due.len() - idx, "Rate limited, deferring verification");
                break;
            }

            let truth = match self.ground_truth(ctx, obs).await {
                Ok(truth) => truth,
                Err(e) => {
                    tracing::warn!(tracker = name, id = %obs.id, error = %e, "Ground truth fetch failed");
                    outcome.deferred += 1;
                    continue;
                }
            };

            let Some(result) = self.rule.judge(obs, &truth, now) else {
                outcome.deferred += 1;
                continue;
            };
            let favorable = result.favorable;

            if self.apply_result(&obs.id, result).is_none() {
                continue;
            }
            outcome.verified += 1;
            counter!("verifications_total", "tracker" => name).increment(1);

            if favorable {
                outcome.favorable += 1;
            }

            let alert = if self.rule.alert_on_favorable() {
                favorable && self.claim_after_cooldown(&obs.wallet, now)
            } else {
                self.try_claim_alert(&obs.wallet, now)
            };
            if alert {
                let mut trade_alert = TradeAlert::new(obs.to_trade(), None);
                trade_alert.push_reason(self.rule.reason());
                outcome.alerts.push(trade_alert);
            }
        }

        if outcome.verified > 0 || outcome.deferred > 0 {
            tracing::info!(
                tracker = name,
                verified = outcome.verified,
                favorable = outcome.favorable,
                deferred = outcome.deferred,
                alerts = outcome.alerts.len(),
                "Verification pass complete"
            );
        }
        outcome
    }
}

/// Object-safe view of a tracker for the background verifier.
#[async_trait]
pub trait Verifiable: Send + Sync {
    fn name(&self) -> &'static str;

    fn expire(&self, now: DateTime<Utc>) -> usize;

    fn pending_len(&self) -> usize;

    async fn verify_due(&self, ctx: &VerifyContext, now: DateTime<Utc>) -> VerifyOutcome;
}

#[async_trait]
impl<R: PatternRule> Verifiable for ObservationTracker<R> {
    fn name(&self) -> &'static str {
        self.rule.name()
    }

    fn expire(&self, now: DateTime<Utc>) -> usize {
        ObservationTracker::expire(self, now)
    }

    fn pending_len(&self) -> usize {
        ObservationTracker::pending_len(self)
    }

    async fn verify_due(&self, ctx: &VerifyContext, now: DateTime<Utc>) -> VerifyOutcome {
        ObservationTracker::verify_due(self, ctx, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EveryBuy;

    impl PatternRule for EveryBuy {
        type Scratch = ();

        fn name(&self) -> &'static str {
            "every_buy"
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
            (trade.side == Side::Buy).then(|| PendingObservation::from_trade(trade, verify_delay))
        }

        fn judge(
            &self,
            obs: &PendingObservation,
            truth: &GroundTruth,
            now: DateTime<Utc>,
        ) -> Option<ObservationResult> {
            judge_price_move(obs, truth, Decimal::new(10, 2), now)
        }
    }

    fn tracker() -> ObservationTracker<EveryBuy> {
        ObservationTracker::new(
            EveryBuy,
            Duration::hours(1),
            AlertPolicy {
                min_trades: 2,
                min_success_rate: Decimal::new(5, 1),
                cooldown: Duration::hours(6),
            },
            Duration::days(7),
            100,
        )
    }

    fn trade(wallet: &str, at: DateTime<Utc>) -> TradeEvent {
        TradeEvent {
            asset_id: "asset".into(),
            market_id: "market".into(),
            side: Side::Buy,
            price: Decimal::new(40, 2),
            size: Decimal::from(1_000),
            wallet: wallet.into(),
            timestamp: at,
            transaction_id: format!("tx-{}", at.timestamp_millis()),
            outcome: None,
        }
    }

    fn favorable(now: DateTime<Utc>) -> ObservationResult {
        ObservationResult {
            favorable: true,
            move_pct: Decimal::new(3, 1),
            score: Decimal::new(3, 1),
            verified_at: now,
        }
    }

    #[test]
    fn test_duplicate_record_ignored() {
        let t = tracker();
        let now = Utc::now();
        assert!(t.observe(&trade("0xa", now), None).is_some());
        assert!(t.observe(&trade("0xa", now), None).is_none());
        assert_eq!(t.pending_len(), 1);
        assert_eq!(t.stats("0xa").map(|s| s.observed), Some(1));
    }

    #[test]
    fn test_apply_result_is_idempotent() {
        let t = tracker();
        let now = Utc::now();
        let obs = t.observe(&trade("0xa", now), None).expect("recorded");

        let first = t.apply_result(&obs.id, favorable(now)).expect("applied");
        assert_eq!(first.verified, 1);
        assert!(t.apply_result(&obs.id, favorable(now)).is_none());

        let stats = t.stats("0xa").expect("stats");
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.favorable, 1);
        assert_eq!(t.pending_len(), 0);
        assert_eq!(t.verified_len(), 1);

        // re-recording a verified id is also ignored
        assert!(!t.record(obs));
    }

    #[test]
    fn test_due_and_expire() {
        let t = tracker();
        let t0 = Utc::now() - Duration::days(8);
        t.observe(&trade("0xa", t0), None);
        t.observe(&trade("0xb", Utc::now()), None);

        assert_eq!(t.due(t0 + Duration::minutes(30)).len(), 0);
        assert_eq!(t.due(Utc::now()).len(), 1);

        assert_eq!(t.expire(Utc::now()), 1);
        assert_eq!(t.pending_len(), 1);
        assert_eq!(t.stats("0xa").map(|s| s.observed), Some(1));
    }

    #[test]
    fn test_policy_and_cooldown() {
        let t = tracker();
        let now = Utc::now();
        for i in 0..2 {
            let obs = t
                .observe(&trade("0xa", now + Duration::seconds(i)), None)
                .expect("recorded");
            t.apply_result(&obs.id, favorable(now));
        }
        assert!(t.try_claim_alert("0xa", now));
        assert!(!t.try_claim_alert("0xa", now + Duration::hours(1)));
        assert!(t.try_claim_alert("0xa", now + Duration::hours(7)));
        assert!(!t.try_claim_alert("0xunknown", now));
    }

    #[test]
    fn test_evicts_least_recently_seen() {
        let t = ObservationTracker::new(
            EveryBuy,
            Duration::hours(1),
            AlertPolicy::from_config(&AlertPolicyConfig::default()),
            Duration::days(7),
            2,
        );
        let now = Utc::now();
        t.observe(&trade("0xold", now - Duration::hours(3)), None);
        t.observe(&trade("0xmid", now - Duration::hours(2)), None);
        t.observe(&trade("0xnew", now), None);

        assert!(t.stats("0xold").is_none());
        assert!(t.stats("0xnew").is_some());
        assert!(t.wallet_count() <= 2);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let t = tracker();
        let now = Utc::now();
        let a = t.observe(&trade("0xa", now), None).expect("recorded");
        t.observe(&trade("0xb", now), None);
        t.apply_result(&a.id, favorable(now));

        let snapshot = t.snapshot();
        let fresh = tracker();
        assert_eq!(fresh.restore(snapshot.clone()), 2);
        assert_eq!(fresh.pending_len(), 1);
        assert_eq!(fresh.verified_len(), 1);
        assert_eq!(fresh.stats("0xa"), t.stats("0xa"));

        // restoring twice merges nothing new
        assert_eq!(fresh.restore(snapshot), 0);
    }

    #[test]
    fn test_ground_truth_from_positions() {
        let positions = vec![
            ApiPosition {
                asset: "yes".into(),
                outcome: "Yes".into(),
                cur_price: Decimal::ZERO,
                redeemable: true,
                ..Default::default()
            },
            ApiPosition {
                asset: "no".into(),
                outcome: "No".into(),
                cur_price: Decimal::ONE,
                redeemable: true,
                ..Default::default()
            },
        ];
        let truth = GroundTruth::from_positions(&positions, "yes", Some(Decimal::new(3, 1)));
        assert_eq!(truth.current_price, Some(Decimal::new(3, 1)));
        assert_eq!(truth.winning_outcome.as_deref(), Some("No"));

        let truth = GroundTruth::from_positions(&positions, "no", None);
        assert_eq!(truth.current_price, Some(Decimal::ONE));
    }

    #[test]
    fn test_judge_price_move_directions() {
        let now = Utc::now();
        let mut obs = PendingObservation::from_trade(&trade("0xa", now), Duration::hours(1));
        let truth = GroundTruth {
            current_price: Some(Decimal::new(52, 2)),
            winning_outcome: None,
        };
        let result = judge_price_move(&obs, &truth, Decimal::new(10, 2), now).expect("judged");
        assert!(result.favorable);
        assert_eq!(result.move_pct, Decimal::new(3, 1));

        obs.side = Side::Sell;
        let result = judge_price_move(&obs, &truth, Decimal::new(10, 2), now).expect("judged");
        assert!(!result.favorable);

        assert!(judge_price_move(&obs, &GroundTruth::default(), Decimal::new(10, 2), now).is_none());
    }
}
