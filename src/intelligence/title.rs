use std::collections::BTreeSet;

use crate::models::AlertReason;
use crate::models::AlertReason::*;

pub const MULTIPLE_TRIGGERS_TITLE: &str = "Multiple Triggers";
pub const FALLBACK_TITLE: &str = "Trade Alert";
const CONFIRMED_HEDGE_TITLE: &str = "Resolution-Confirmed Hedge Removal";

/// Two-reason combinations, most significant first.
const PAIR_TITLES: [(AlertReason, AlertReason, &str); 12] = [
    (PreMovePositioning, CopyTrader, "Informed Flow Being Copied"),
    (HedgeRemoval, PerfectExitTiming, "Insider Exit Pattern"),
    (ContrarianWinner, MassiveTrade, "Contrarian Whale Strike"),
    (FreshWallet, MassiveTrade, "Fresh Wallet Whale"),
    (PreMovePositioning, StealthAccumulation, "Stealth Pre-Move Accumulation"),
    (ConvictionDoubling, HighWinRate, "Proven Trader Doubling Down"),
    (ContrarianBet, HighWinRate, "Sharp Contrarian Bet"),
    (FreshWallet, ContrarianBet, "Fresh Wallet Longshot"),
    (CopyTrader, MassiveTrade, "Large Copy Trade"),
    (SizeSpike, WhalePosition, "Whale Size Spike"),
    (HighFrequency, StealthAccumulation, "Split-Order Accumulation"),
    (ProvenProfiter, MassiveTrade, "Profitable Whale Entry"),
];

/// Single reasons in priority order.
const SINGLE_TITLES: [(AlertReason, &str); 15] = [
    (PreMovePositioning, "Pre-Move Positioning"),
    (PerfectExitTiming, "Perfect Exit Timing"),
    (HedgeRemoval, "Hedge Removal"),
    (ContrarianWinner, "Contrarian Winner"),
    (ConvictionDoubling, "Conviction Doubling"),
    (StealthAccumulation, "Stealth Accumulation"),
    (CopyTrader, "Copy Trading Detected"),
    (MassiveTrade, "Massive Trade"),
    (FreshWallet, "Fresh Wallet"),
    (HighWinRate, "High Win Rate Trader"),
    (ContrarianBet, "Contrarian Bet"),
    (ProvenProfiter, "Proven Profiter"),
    (WhalePosition, "Whale Position"),
    (SizeSpike, "Size Spike"),
    (HighFrequency, "High Frequency Trading"),
];

/// Resolve the one headline for a set of reasons.
///
/// Depends only on which reasons are present, never on their order. Every
/// notification adapter uses this table.
pub fn alert_title(reasons: &[AlertReason]) -> &'static str {
    let set: BTreeSet<AlertReason> = reasons.iter().copied().collect();

    if set.len() >= 3 {
        return MULTIPLE_TRIGGERS_TITLE;
    }
    if set.contains(&HedgeRemovalConfirmed) {
        return CONFIRMED_HEDGE_TITLE;
    }

    PAIR_TITLES
        .iter()
        .find(|(a, b, _)| set.contains(a) && set.contains(b))
        .map(|(_, _, title)| *title)
        .or_else(|| {
            SINGLE_TITLES
                .iter()
                .find(|(r, _)| set.contains(r))
                .map(|(_, title)| *title)
        })
        .unwrap_or(FALLBACK_TITLE)
}
