use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::types::{ApiActivity, ApiClosedPosition, ApiPosition, ApiTrade};
use crate::enrichment::{EnrichmentClient, EnrichmentError};

pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

const CLOSED_POSITIONS_LIMIT: u32 = 500;
const ACTIVITY_LIMIT: u32 = 100;

/// Client for the public data API: positions, history and the global trade
/// tape.
#[derive(Debug, Clone)]
pub struct DataClient {
    http: Client,
    base_url: String,
}

impl DataClient {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, DATA_API_BASE)
    }

    pub fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, EnrichmentError> {
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EnrichmentError::RateLimited);
        }
        let resp = resp.error_for_status()?;
        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| EnrichmentError::Unexpected(format!("{url}: {e}")))
    }

    /// Newest trades across all markets.
    pub async fn recent_trades(&self, limit: u32) -> Result<Vec<ApiTrade>, EnrichmentError> {
        let url = format!("{}/trades?limit={}&takerOnly=true", self.base_url, limit);
        self.get_json(&url).await
    }

    /// Trades made by one wallet.
    pub async fn trades_by_wallet(&self, wallet: &str) -> Result<Vec<ApiTrade>, EnrichmentError> {
        let url = format!("{}/trades?user={}", self.base_url, wallet);
        self.get_json(&url).await
    }
}

#[async_trait]
impl EnrichmentClient for DataClient {
    async fn positions(
        &self,
        wallet: &str,
        market: Option<&str>,
    ) -> Result<Vec<ApiPosition>, EnrichmentError> {
        let mut url = format!("{}/positions?user={}&sizeThreshold=0", self.base_url, wallet);
        if let Some(market) = market {
            url.push_str("&market=");
            url.push_str(market);
        }
        self.get_json(&url).await
    }

    async fn closed_positions(
        &self,
        wallet: &str,
    ) -> Result<Vec<ApiClosedPosition>, EnrichmentError> {
        let url = format!(
            "{}/closed-positions?user={}&limit={}",
            self.base_url, wallet, CLOSED_POSITIONS_LIMIT
        );
        self.get_json(&url).await
    }

    async fn activity(&self, wallet: &str) -> Result<Vec<ApiActivity>, EnrichmentError> {
        let url = format!(
            "{}/activity?user={}&limit={}",
            self.base_url, wallet, ACTIVITY_LIMIT
        );
        self.get_json(&url).await
    }
}
