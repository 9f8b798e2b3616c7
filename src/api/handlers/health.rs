use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ingestion::SourceStats;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub stale: bool,
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
    pub pending_observations: usize,
    pub contrarian_winners: usize,
}

/// No message within `stale_after` of the last one, or of startup when
/// nothing has arrived yet.
pub fn is_stale(
    stats: &SourceStats,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> bool {
    let since = stats.last_message_at.unwrap_or(started_at);
    now - since > stale_after
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let stats = state.feed.snapshot();
    let stale = is_stale(
        &stats,
        state.started_at,
        now,
        Duration::seconds(state.health_stale_secs as i64),
    );

    let report = HealthReport {
        status: if stale { "stale" } else { "healthy" },
        stale,
        message_count: stats.message_count,
        last_message_at: stats.last_message_at,
        uptime_secs: (now - state.started_at).num_seconds(),
        pending_observations: state.trackers.patterns.pending_len()
            + state.trackers.hedge.engine().pending_len(),
        contrarian_winners: state.trackers.contrarian.len(),
    };

    let status = if stale {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}
