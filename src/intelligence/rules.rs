use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::config::RuleThresholds;
use crate::models::{AlertReason, Side, TradeEvent, WalletProfile};

/// Evaluate the stateless rules for one trade.
///
/// Rules that need a profile stay silent when `profile` is `None`. Reasons
/// come back in a fixed order so alerts read the same way every time.
pub fn evaluate_simple(
    trade: &TradeEvent,
    profile: Option<&WalletProfile>,
    rules: &RuleThresholds,
) -> Vec<AlertReason> {
    let mut reasons = Vec::new();

    if is_massive_trade(trade, rules) {
        reasons.push(AlertReason::MassiveTrade);
    }
    if is_contrarian_bet(trade, rules) {
        reasons.push(AlertReason::ContrarianBet);
    }

    let Some(profile) = profile else {
        return reasons;
    };

    if is_fresh_wallet(trade, profile, rules) {
        reasons.push(AlertReason::FreshWallet);
    }
    if is_high_win_rate(trade, profile, rules) {
        reasons.push(AlertReason::HighWinRate);
    }
    if is_whale_position(profile, rules) {
        reasons.push(AlertReason::WhalePosition);
    }
    if is_proven_profiter(profile, rules) {
        reasons.push(AlertReason::ProvenProfiter);
    }
    if is_size_spike(trade, profile, rules) {
        reasons.push(AlertReason::SizeSpike);
    }

    reasons
}

// ---------------------------------------------------------------------------
// Trade-only rules
// ---------------------------------------------------------------------------

/// Large notional at a price that still carries real risk.
pub fn is_massive_trade(trade: &TradeEvent, rules: &RuleThresholds) -> bool {
    trade.notional() >= rules.massive_min_notional && trade.price <= rules.massive_max_price
}

/// Buying a longshot with real money.
pub fn is_contrarian_bet(trade: &TradeEvent, rules: &RuleThresholds) -> bool {
    trade.side == Side::Buy
        && trade.price > Decimal::ZERO
        && trade.price <= rules.contrarian_max_price
        && trade.notional() >= rules.contrarian_min_notional
}

// ---------------------------------------------------------------------------
// Profile rules
// ---------------------------------------------------------------------------

pub fn is_fresh_wallet(
    trade: &TradeEvent,
    profile: &WalletProfile,
    rules: &RuleThresholds,
) -> bool {
    profile.unique_markets <= rules.fresh_max_markets
        && trade.notional() >= rules.fresh_min_notional
}

pub fn is_high_win_rate(
    trade: &TradeEvent,
    profile: &WalletProfile,
    rules: &RuleThresholds,
) -> bool {
    profile.resolved() >= rules.win_rate_min_resolved
        && profile.win_rate() >= rules.win_rate_min
        && trade.notional() >= rules.win_rate_min_notional
}

pub fn is_whale_position(profile: &WalletProfile, rules: &RuleThresholds) -> bool {
    profile.market_value() >= rules.whale_position_min_value
}

pub fn is_proven_profiter(profile: &WalletProfile, rules: &RuleThresholds) -> bool {
    profile.realized_pnl >= rules.profiter_min_realized_pnl
}

/// Trade far larger than the wallet's usual size. Needs some history to
/// compare against.
pub fn is_size_spike(trade: &TradeEvent, profile: &WalletProfile, rules: &RuleThresholds) -> bool {
    if profile.activity_count < rules.spike_min_history
        || profile.avg_activity_notional <= Decimal::ZERO
    {
        return false;
    }
    trade.notional() >= rules.spike_multiplier * profile.avg_activity_notional
}

// ---------------------------------------------------------------------------
// Frequency counter
// ---------------------------------------------------------------------------

/// Recent trade timestamps per wallet for the high-frequency rule.
#[derive(Debug)]
pub struct FrequencyCounter {
    window: Duration,
    min_trades: usize,
    max_wallets: usize,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl FrequencyCounter {
    pub fn new(window: Duration, min_trades: usize, max_wallets: usize) -> Self {
        Self {
            window,
            min_trades,
            max_wallets,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_rules(rules: &RuleThresholds, max_wallets: usize) -> Self {
        Self::new(
            Duration::seconds(rules.frequency_window_secs as i64),
            rules.frequency_min_trades,
            max_wallets,
        )
    }

    /// Count this trade and report whether the wallet is now trading at or
    /// above the threshold within the window.
    pub fn record(&self, wallet: &str, at: DateTime<Utc>) -> bool {
        let mut hits = self.hits.lock();

        if hits.len() >= self.max_wallets && !hits.contains_key(wallet) {
            let cutoff = at - self.window;
            hits.retain(|_, times| times.back().is_some_and(|t| *t > cutoff));
        }

        let times = hits.entry(wallet.to_string()).or_default();
        times.push_back(at);
        let cutoff = at - self.window;
        while times.front().is_some_and(|t| *t <= cutoff) {
            times.pop_front();
        }

        times.len() >= self.min_trades
    }

    pub fn tracked_wallets(&self) -> usize {
        self.hits.lock().len()
    }
}
