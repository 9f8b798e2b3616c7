use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{ProfileSummary, Side, TradeEvent};
use crate::intelligence::title::alert_title;

// ---------------------------------------------------------------------------
// AlertReason
// ---------------------------------------------------------------------------

/// Every heuristic that can attach itself to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    MassiveTrade,
    FreshWallet,
    HighWinRate,
    ContrarianBet,
    ContrarianWinner,
    HighFrequency,
    WhalePosition,
    ProvenProfiter,
    SizeSpike,
    CopyTrader,
    HedgeRemoval,
    HedgeRemovalConfirmed,
    ConvictionDoubling,
    PerfectExitTiming,
    StealthAccumulation,
    PreMovePositioning,
}

impl AlertReason {
    pub const ALL: [AlertReason; 16] = [
        AlertReason::MassiveTrade,
        AlertReason::FreshWallet,
        AlertReason::HighWinRate,
        AlertReason::ContrarianBet,
        AlertReason::ContrarianWinner,
        AlertReason::HighFrequency,
        AlertReason::WhalePosition,
        AlertReason::ProvenProfiter,
        AlertReason::SizeSpike,
        AlertReason::CopyTrader,
        AlertReason::HedgeRemoval,
        AlertReason::HedgeRemovalConfirmed,
        AlertReason::ConvictionDoubling,
        AlertReason::PerfectExitTiming,
        AlertReason::StealthAccumulation,
        AlertReason::PreMovePositioning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::MassiveTrade => "massive_trade",
            AlertReason::FreshWallet => "fresh_wallet",
            AlertReason::HighWinRate => "high_win_rate",
            AlertReason::ContrarianBet => "contrarian_bet",
            AlertReason::ContrarianWinner => "contrarian_winner",
            AlertReason::HighFrequency => "high_frequency",
            AlertReason::WhalePosition => "whale_position",
            AlertReason::ProvenProfiter => "proven_profiter",
            AlertReason::SizeSpike => "size_spike",
            AlertReason::CopyTrader => "copy_trader",
            AlertReason::HedgeRemoval => "hedge_removal",
            AlertReason::HedgeRemovalConfirmed => "hedge_removal_confirmed",
            AlertReason::ConvictionDoubling => "conviction_doubling",
            AlertReason::PerfectExitTiming => "perfect_exit_timing",
            AlertReason::StealthAccumulation => "stealth_accumulation",
            AlertReason::PreMovePositioning => "pre_move_positioning",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tracker details carried by an alert
// ---------------------------------------------------------------------------

/// Wallets that mirrored one leader trade inside the copy window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyCluster {
    pub leader: String,
    pub market_id: String,
    pub asset_id: String,
    pub side: Side,
    pub leader_traded_at: DateTime<Utc>,
    pub followers: Vec<String>,
}

/// Before/after inventory of both outcomes of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgePosition {
    pub wallet: String,
    pub market: String,
    pub yes_before: Decimal,
    pub yes_after: Decimal,
    pub no_before: Decimal,
    pub no_after: Decimal,
}

impl HedgePosition {
    /// The side whose inventory shrank the most, as "Yes" or "No".
    pub fn sold_outcome(&self) -> Option<&'static str> {
        let yes_drop = self.yes_before - self.yes_after;
        let no_drop = self.no_before - self.no_after;
        if yes_drop <= Decimal::ZERO && no_drop <= Decimal::ZERO {
            return None;
        }
        if no_drop > yes_drop {
            Some("No")
        } else {
            Some("Yes")
        }
    }

    /// Fraction of the sold side removed, in `[0, 1]`.
    pub fn sold_pct(&self) -> Decimal {
        let (before, after) = match self.sold_outcome() {
            Some("Yes") => (self.yes_before, self.yes_after),
            Some(_) => (self.no_before, self.no_after),
            None => return Decimal::ZERO,
        };
        if before.is_zero() {
            return Decimal::ZERO;
        }
        ((before - after) / before).min(Decimal::ONE)
    }

    pub fn was_two_sided(&self) -> bool {
        self.yes_before > Decimal::ZERO && self.no_before > Decimal::ZERO
    }

    /// Whether the side that was not sold is still held.
    pub fn kept_other_side(&self) -> bool {
        match self.sold_outcome() {
            Some("Yes") => self.no_after > Decimal::ZERO,
            Some(_) => self.yes_after > Decimal::ZERO,
            None => false,
        }
    }
}

/// A significant one-sided sell out of a hedged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeRemoval {
    pub position: HedgePosition,
    pub sold_outcome: String,
    pub sold_pct: Decimal,
}

// ---------------------------------------------------------------------------
// TradeAlert
// ---------------------------------------------------------------------------

/// Everything the notifiers receive for one flagged trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAlert {
    pub id: Uuid,
    pub trade: TradeEvent,
    pub profile: Option<ProfileSummary>,
    /// Insertion order, no duplicates.
    pub reasons: Vec<AlertReason>,
    pub copy_cluster: Option<CopyCluster>,
    pub hedge: Option<HedgeRemoval>,
    pub created_at: DateTime<Utc>,
}

impl TradeAlert {
    pub fn new(trade: TradeEvent, profile: Option<ProfileSummary>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade,
            profile,
            reasons: Vec::new(),
            copy_cluster: None,
            hedge: None,
            created_at: Utc::now(),
        }
    }

    pub fn push_reason(&mut self, reason: AlertReason) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn has_reason(&self, reason: AlertReason) -> bool {
        self.reasons.contains(&reason)
    }

    pub fn title(&self) -> &'static str {
        alert_title(&self.reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hedge(yes_before: i64, yes_after: i64, no_before: i64, no_after: i64) -> HedgePosition {
        HedgePosition {
            wallet: "0xw".into(),
            market: "m".into(),
            yes_before: Decimal::from(yes_before),
            yes_after: Decimal::from(yes_after),
            no_before: Decimal::from(no_before),
            no_after: Decimal::from(no_after),
        }
    }

    #[test]
    fn test_hedge_sold_side_no() {
        let pos = hedge(1_000, 1_000, 600, 100);
        assert_eq!(pos.sold_outcome(), Some("No"));
        assert!(pos.sold_pct() > Decimal::new(83, 2));
        assert!(pos.sold_pct() < Decimal::new(84, 2));
        assert!(pos.was_two_sided());
        assert!(pos.kept_other_side());
    }

    #[test]
    fn test_hedge_no_sale() {
        let pos = hedge(1_000, 1_000, 600, 600);
        assert_eq!(pos.sold_outcome(), None);
        assert_eq!(pos.sold_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_reasons_deduplicated() {
        let trade = TradeEvent {
            asset_id: "a".into(),
            market_id: "m".into(),
            side: Side::Buy,
            price: Decimal::new(5, 1),
            size: Decimal::from(10),
            wallet: "0xw".into(),
            timestamp: Utc::now(),
            transaction_id: "tx".into(),
            outcome: None,
        };
        let mut alert = TradeAlert::new(trade, None);
        alert.push_reason(AlertReason::MassiveTrade);
        alert.push_reason(AlertReason::MassiveTrade);
        assert_eq!(alert.reasons, vec![AlertReason::MassiveTrade]);
    }

    #[test]
    fn test_all_reasons_distinct() {
        let mut names: Vec<&str> = AlertReason::ALL.iter().map(|r| r.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 16);
    }
}
