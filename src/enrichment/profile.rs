use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{with_deadline, EnrichmentClient, EnrichmentError, RateLimiter};
use crate::intelligence::contrarian::ContrarianWinnerCache;
use crate::models::{PositionSlice, WalletProfile};
use crate::polymarket::types::{ApiActivity, ApiClosedPosition, ApiPosition};

/// Calls made per profile refresh: positions, closed positions, activity.
const CALLS_PER_PROFILE: u32 = 3;
const MAX_CACHED_PROFILES: usize = 10_000;

/// Derive a wallet profile from raw enrichment data. Pure.
pub fn build_profile(
    wallet: &str,
    market_id: &str,
    positions: &[ApiPosition],
    closed: &[ApiClosedPosition],
    activity: &[ApiActivity],
    fetched_at: DateTime<Utc>,
) -> WalletProfile {
    let mut profile = WalletProfile::empty(wallet, market_id, fetched_at);

    let mut markets: HashSet<&str> = HashSet::new();
    markets.extend(closed.iter().map(|c| c.condition_id.as_str()));
    markets.extend(activity.iter().map(|a| a.condition_id.as_str()));
    markets.extend(positions.iter().map(|p| p.condition_id.as_str()));
    markets.remove("");
    profile.unique_markets = markets.len() as u32;

    for c in closed {
        if c.realized_pnl > Decimal::ZERO {
            profile.resolved_wins += 1;
        } else if c.realized_pnl < Decimal::ZERO {
            profile.resolved_losses += 1;
        }
        profile.closed_cost_basis += c.cost_basis();
        profile.realized_pnl += c.realized_pnl;
    }

    // The API may ignore the market filter; keep only this market.
    profile.market_positions = positions
        .iter()
        .filter(|p| p.condition_id.is_empty() || p.condition_id == market_id)
        .filter(|p| p.size > Decimal::ZERO)
        .map(|p| PositionSlice {
            asset_id: p.asset.clone(),
            outcome: p.outcome.clone(),
            size: p.size,
            avg_price: p.avg_price,
            current_price: p.cur_price,
            current_value: p.current_value,
            redeemable: p.redeemable,
        })
        .collect();

    let trades: Vec<&ApiActivity> = activity.iter().filter(|a| a.is_trade()).collect();
    profile.activity_count = trades.len() as u32;
    if !trades.is_empty() {
        let total: Decimal = trades.iter().map(|a| a.usdc_size).sum();
        profile.avg_activity_notional = total / Decimal::from(trades.len() as u64);
    }

    profile
}

/// Cached, rate-limited wallet profile lookups used by the trade monitor.
pub struct ProfileService {
    client: Arc<dyn EnrichmentClient>,
    limiter: Arc<RateLimiter>,
    contrarian: Arc<ContrarianWinnerCache>,
    cache: Mutex<HashMap<(String, String), (Instant, Arc<WalletProfile>)>>,
    ttl: Duration,
    timeout: Duration,
    limiter_wait: Duration,
}

impl ProfileService {
    pub fn new(
        client: Arc<dyn EnrichmentClient>,
        limiter: Arc<RateLimiter>,
        contrarian: Arc<ContrarianWinnerCache>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            contrarian,
            cache: Mutex::new(HashMap::new()),
            ttl,
            timeout,
            limiter_wait: Duration::from_secs(2),
        }
    }

    /// How long a lookup may wait for limiter tokens before giving up.
    pub fn with_limiter_wait(mut self, wait: Duration) -> Self {
        self.limiter_wait = wait;
        self
    }

    /// Market-scoped profile for `wallet`, from cache when fresh.
    pub async fn lookup(
        &self,
        wallet: &str,
        market_id: &str,
    ) -> Result<Arc<WalletProfile>, EnrichmentError> {
        let key = (wallet.to_string(), market_id.to_string());

        let cached = self
            .cache
            .lock()
            .get(&key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, profile)| profile.clone());
        if let Some(profile) = cached {
            return Ok(profile);
        }

        if !self
            .limiter
            .acquire_within(CALLS_PER_PROFILE, self.limiter_wait)
            .await
        {
            counter!("profile_lookups_deferred_total").increment(1);
            return Err(EnrichmentError::RateLimited);
        }

        let (positions, closed, activity) = tokio::try_join!(
            with_deadline(self.timeout, self.client.positions(wallet, Some(market_id))),
            with_deadline(self.timeout, self.client.closed_positions(wallet)),
            with_deadline(self.timeout, self.client.activity(wallet)),
        )?;

        self.contrarian.refresh(wallet, &closed);

        let profile = Arc::new(build_profile(
            wallet,
            market_id,
            &positions,
            &closed,
            &activity,
            Utc::now(),
        ));

        let mut cache = self.cache.lock();
        if cache.len() >= MAX_CACHED_PROFILES {
            let ttl = self.ttl;
            cache.retain(|_, (at, _)| at.elapsed() < ttl);
        }
        cache.insert(key, (Instant::now(), profile.clone()));

        Ok(profile)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}
