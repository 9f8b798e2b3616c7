pub mod api;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod ingestion;
pub mod intelligence;
pub mod metrics;
pub mod models;
pub mod polymarket;
pub mod services;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::ingestion::FeedActivity;
use crate::intelligence::Trackers;

#[derive(Clone)]
pub struct AppState {
    pub trackers: Trackers,
    pub feed: Arc<FeedActivity>,
    pub health_stale_secs: u64,
    pub started_at: DateTime<Utc>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
