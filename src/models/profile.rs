use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One open position of a wallet inside the market being evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSlice {
    pub asset_id: String,
    pub outcome: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub current_value: Decimal,
    pub redeemable: bool,
}

/// Wallet facts derived from the enrichment client. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletProfile {
    pub wallet: String,
    pub market_id: String,
    pub unique_markets: u32,
    pub resolved_wins: u32,
    pub resolved_losses: u32,
    /// Open positions scoped to `market_id`.
    pub market_positions: Vec<PositionSlice>,
    pub closed_cost_basis: Decimal,
    pub realized_pnl: Decimal,
    pub activity_count: u32,
    pub avg_activity_notional: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl WalletProfile {
    pub fn empty(wallet: &str, market_id: &str, fetched_at: DateTime<Utc>) -> Self {
        Self {
            wallet: wallet.to_string(),
            market_id: market_id.to_string(),
            unique_markets: 0,
            resolved_wins: 0,
            resolved_losses: 0,
            market_positions: Vec::new(),
            closed_cost_basis: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            activity_count: 0,
            avg_activity_notional: Decimal::ZERO,
            fetched_at,
        }
    }

    pub fn resolved(&self) -> u32 {
        self.resolved_wins + self.resolved_losses
    }

    /// Wins over resolved positions; zero when nothing has resolved.
    pub fn win_rate(&self) -> Decimal {
        let resolved = self.resolved();
        if resolved == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.resolved_wins) / Decimal::from(resolved)
    }

    pub fn position_for_asset(&self, asset_id: &str) -> Option<&PositionSlice> {
        self.market_positions.iter().find(|p| p.asset_id == asset_id)
    }

    pub fn position_for_outcome(&self, outcome: &str) -> Option<&PositionSlice> {
        self.market_positions
            .iter()
            .find(|p| p.outcome.eq_ignore_ascii_case(outcome))
    }

    /// Current value of everything held in this market.
    pub fn market_value(&self) -> Decimal {
        self.market_positions.iter().map(|p| p.current_value).sum()
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            unique_markets: self.unique_markets,
            resolved: self.resolved(),
            win_rate: self.win_rate(),
            realized_pnl: self.realized_pnl,
            market_value: self.market_value(),
        }
    }
}

/// The profile fields an alert carries to notifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub unique_markets: u32,
    pub resolved: u32,
    pub win_rate: Decimal,
    pub realized_pnl: Decimal,
    pub market_value: Decimal,
}
