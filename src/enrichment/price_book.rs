use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::models::TradeEvent;

/// Latest traded price per outcome token, fed by every received trade.
///
/// Used as ground truth when a wallet no longer holds the asset being
/// verified, so verification needs no extra enrichment call.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: Mutex<HashMap<String, (Decimal, DateTime<Utc>)>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the price if it is newer than what we have.
    pub fn record(&self, trade: &TradeEvent) {
        if trade.asset_id.is_empty() || trade.price <= Decimal::ZERO {
            return;
        }
        let mut prices = self.prices.lock();
        match prices.get(&trade.asset_id) {
            Some((_, at)) if *at > trade.timestamp => {}
            _ => {
                prices.insert(trade.asset_id.clone(), (trade.price, trade.timestamp));
            }
        }
    }

    pub fn latest(&self, asset_id: &str) -> Option<Decimal> {
        self.prices.lock().get(asset_id).map(|(price, _)| *price)
    }

    pub fn len(&self) -> usize {
        self.prices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
