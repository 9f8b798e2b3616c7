use std::str::FromStr;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Error)]
pub enum GammaClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Market catalogue entry. Several list fields arrive as JSON-encoded
/// strings and are decoded here so nothing downstream sees that shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GammaMarket {
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub slug: Option<String>,
    /// e.g. `["Yes","No"]`, sent as a string.
    #[serde(default)]
    pub outcomes: Option<String>,
    /// e.g. `["123", "456"]`, sent as a string.
    #[serde(default, alias = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    #[serde(default, deserialize_with = "decimal_from_any")]
    pub volume: Decimal,
    #[serde(default, deserialize_with = "decimal_from_any")]
    pub liquidity: Decimal,
    #[serde(default, alias = "endDateIso")]
    pub end_date_iso: Option<String>,
}

impl GammaMarket {
    pub fn parse_token_ids(&self) -> Vec<String> {
        decode_string_list(self.clob_token_ids.as_deref())
    }

    pub fn parse_outcomes(&self) -> Vec<String> {
        decode_string_list(self.outcomes.as_deref())
    }

    /// Token id paired with its outcome label, in catalogue order.
    pub fn token_outcomes(&self) -> Vec<(String, String)> {
        self.parse_token_ids()
            .into_iter()
            .zip(self.parse_outcomes())
            .collect()
    }

    pub fn passes_floors(&self, min_volume: Decimal, min_liquidity: Decimal) -> bool {
        self.volume >= min_volume && self.liquidity >= min_liquidity
    }
}

fn decode_string_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect()
}

/// Numbers in the catalogue come as strings, floats or nothing at all.
fn decimal_from_any<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or_default(),
        Some(serde_json::Value::Number(n)) => {
            Decimal::from_str(&n.to_string()).unwrap_or_default()
        }
        _ => Decimal::ZERO,
    })
}

#[derive(Debug, Clone)]
pub struct GammaClient {
    http: Client,
    base_url: String,
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GammaClient {
    pub fn new() -> Self {
        Self::with_base_url(Client::new(), GAMMA_API_BASE)
    }

    pub fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One page of active, unclosed markets.
    pub async fn get_active_markets(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<GammaMarket>, GammaClientError> {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}",
            self.base_url, limit, offset
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| GammaClientError::Unexpected(e.to_string()))
    }
}
