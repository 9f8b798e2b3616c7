pub mod limiter;
pub mod price_book;
pub mod profile;

pub use limiter::RateLimiter;
pub use price_book::PriceBook;
pub use profile::{build_profile, ProfileService};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::polymarket::types::{ApiActivity, ApiClosedPosition, ApiPosition};

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("enrichment call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limiter exhausted")]
    RateLimited,

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Wallet lookups the trackers depend on. An empty list is a valid answer
/// meaning "no data for this wallet yet".
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Open positions, optionally scoped to one market (condition id).
    async fn positions(
        &self,
        wallet: &str,
        market: Option<&str>,
    ) -> Result<Vec<ApiPosition>, EnrichmentError>;

    async fn closed_positions(&self, wallet: &str)
        -> Result<Vec<ApiClosedPosition>, EnrichmentError>;

    async fn activity(&self, wallet: &str) -> Result<Vec<ApiActivity>, EnrichmentError>;
}

/// Run an enrichment future under a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, EnrichmentError>
where
    F: Future<Output = Result<T, EnrichmentError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EnrichmentError::Timeout(deadline)),
    }
}
