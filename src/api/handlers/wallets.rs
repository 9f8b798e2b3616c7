use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::ApiResponse;
use crate::errors::AppError;
use crate::models::WalletStats;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TrackerStats {
    pub tracker: &'static str,
    pub success_rate: rust_decimal::Decimal,
    #[serde(flatten)]
    pub stats: WalletStats,
}

#[derive(Debug, Serialize)]
pub struct WalletReport {
    pub wallet: String,
    pub contrarian_winner: bool,
    pub trackers: Vec<TrackerStats>,
}

/// Per-tracker record of one wallet.
pub async fn detail(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ApiResponse<WalletReport>>, AppError> {
    let wallet = address.trim().to_lowercase();
    if !wallet.starts_with("0x") || wallet.len() < 3 {
        return Err(AppError::BadRequest(format!("invalid wallet address: {address}")));
    }

    let mut trackers: Vec<TrackerStats> = state
        .trackers
        .patterns
        .wallet_stats(&wallet)
        .into_iter()
        .map(|(tracker, stats)| TrackerStats {
            tracker,
            success_rate: stats.success_rate(),
            stats,
        })
        .collect();
    if let Some(stats) = state.trackers.hedge.wallet_stats(&wallet) {
        trackers.push(TrackerStats {
            tracker: "hedge",
            success_rate: stats.success_rate(),
            stats,
        });
    }

    let contrarian_winner = state.trackers.contrarian.contains(&wallet);
    if trackers.is_empty() && !contrarian_winner {
        return Err(AppError::NotFound(format!("wallet {wallet} not tracked")));
    }

    Ok(Json(ApiResponse::ok(WalletReport {
        wallet,
        contrarian_winner,
        trackers,
    })))
}
