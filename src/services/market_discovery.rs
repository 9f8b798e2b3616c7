use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::ingestion::WsEventSource;
use crate::polymarket::gamma_client::{GammaClient, GammaMarket};

const PAGE_SIZE: u32 = 100;
/// Hard stop on pagination in case the catalogue never returns a short page.
const MAX_PAGES: u32 = 200;

/// Token ids of every market above both floors, deduplicated.
pub fn eligible_tokens(
    markets: &[GammaMarket],
    min_volume: Decimal,
    min_liquidity: Decimal,
) -> BTreeSet<String> {
    markets
        .iter()
        .filter(|m| m.passes_floors(min_volume, min_liquidity))
        .flat_map(GammaMarket::parse_token_ids)
        .collect()
}

/// What to add and what to drop to move from `active` to `wanted`.
pub fn diff_tokens(
    active: &BTreeSet<String>,
    wanted: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let added = wanted.difference(active).cloned().collect();
    let removed = active.difference(wanted).cloned().collect();
    (added, removed)
}

async fn fetch_all_active(gamma: &GammaClient) -> Option<Vec<GammaMarket>> {
    let mut markets = Vec::new();
    for page in 0..MAX_PAGES {
        match gamma.get_active_markets(PAGE_SIZE, page * PAGE_SIZE).await {
            Ok(batch) => {
                let batch_len = batch.len();
                markets.extend(batch);
                if batch_len < PAGE_SIZE as usize {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, page, "Failed to fetch markets from Gamma API");
                return None;
            }
        }
    }
    Some(markets)
}

/// Periodically page the market catalogue and keep the stream subscribed to
/// exactly the tokens of markets above the volume and liquidity floors.
pub async fn run_market_discovery(
    gamma: GammaClient,
    source: WsEventSource,
    interval_secs: u64,
    min_volume: Decimal,
    min_liquidity: Decimal,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!("Market discovery shutting down");
                return;
            }
        }

        tracing::info!("Market discovery: scanning for active markets");

        // A failed scan leaves the current subscriptions alone.
        let Some(markets) = fetch_all_active(&gamma).await else {
            continue;
        };

        let wanted = eligible_tokens(&markets, min_volume, min_liquidity);
        if wanted.is_empty() {
            tracing::warn!(markets = markets.len(), "No markets above floors, keeping current set");
            continue;
        }

        let active: BTreeSet<String> = source.active_assets().into_iter().collect();
        let (added, removed) = diff_tokens(&active, &wanted);

        tracing::info!(
            markets = markets.len(),
            tokens = wanted.len(),
            added = added.len(),
            removed = removed.len(),
            "Market discovery complete"
        );

        if !added.is_empty() {
            source.subscribe(&added);
        }
        if !removed.is_empty() {
            source.unsubscribe(&removed);
        }
    }
}
