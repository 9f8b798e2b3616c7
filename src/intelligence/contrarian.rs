use std::collections::HashSet;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::config::CopyConfig;
use crate::polymarket::types::ApiClosedPosition;
use crate::store::{Persistable, StoreError};

pub const CONTRARIAN_SNAPSHOT_KEY: &str = "contrarian_winners.txt";

/// Wallets that repeatedly win by buying outcomes the market priced low.
///
/// Membership is decided from closed positions seen during profile lookups
/// and never revoked; closed history only grows.
#[derive(Debug)]
pub struct ContrarianWinnerCache {
    min_wins: u32,
    min_ratio: Decimal,
    entry_max_price: Decimal,
    wallets: Mutex<HashSet<String>>,
}

impl ContrarianWinnerCache {
    pub fn new(min_wins: u32, min_ratio: Decimal, entry_max_price: Decimal) -> Self {
        Self {
            min_wins,
            min_ratio,
            entry_max_price,
            wallets: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &CopyConfig) -> Self {
        Self::new(
            config.contrarian_min_wins,
            config.contrarian_min_ratio,
            config.contrarian_entry_max_price,
        )
    }

    /// Re-evaluate `wallet` against its closed positions. Returns whether it
    /// is a contrarian winner afterwards.
    pub fn refresh(&self, wallet: &str, closed: &[ApiClosedPosition]) -> bool {
        if self.qualifies(closed) {
            let added = self.wallets.lock().insert(wallet.to_string());
            if added {
                tracing::info!(wallet, "Contrarian winner identified");
            }
            return true;
        }
        self.contains(wallet)
    }

    fn qualifies(&self, closed: &[ApiClosedPosition]) -> bool {
        let wins: Vec<&ApiClosedPosition> = closed.iter().filter(|c| c.is_win()).collect();
        if wins.is_empty() || (wins.len() as u32) < self.min_wins {
            return false;
        }
        let cheap = wins
            .iter()
            .filter(|c| c.avg_price > Decimal::ZERO && c.avg_price <= self.entry_max_price)
            .count();
        Decimal::from(cheap as u64) / Decimal::from(wins.len() as u64) >= self.min_ratio
    }

    pub fn contains(&self, wallet: &str) -> bool {
        self.wallets.lock().contains(wallet)
    }

    pub fn insert(&self, wallet: &str) {
        self.wallets.lock().insert(wallet.to_string());
    }

    pub fn len(&self) -> usize {
        self.wallets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stored as plain text, one address per line.
impl Persistable for ContrarianWinnerCache {
    fn snapshot_key(&self) -> &'static str {
        CONTRARIAN_SNAPSHOT_KEY
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut wallets: Vec<String> = self.wallets.lock().iter().cloned().collect();
        wallets.sort();
        let mut text = wallets.join("\n");
        text.push('\n');
        Ok(text.into_bytes())
    }

    fn restore(&self, bytes: &[u8]) -> Result<usize, StoreError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::Corrupt(format!("contrarian list is not UTF-8: {e}")))?;

        let mut wallets = self.wallets.lock();
        let before = wallets.len();
        wallets.extend(
            text.lines()
                .map(|line| line.trim().to_lowercase())
                .filter(|line| !line.is_empty()),
        );
        Ok(wallets.len() - before)
    }

    fn evict_for_space(&self) -> usize {
        // A list of addresses stays far below any snapshot limit.
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(pnl: i64, avg_cents: i64) -> ApiClosedPosition {
        ApiClosedPosition {
            realized_pnl: Decimal::from(pnl),
            avg_price: Decimal::new(avg_cents, 2),
            ..Default::default()
        }
    }

    #[test]
    fn test_refresh_requires_enough_cheap_wins() {
        let cache = ContrarianWinnerCache::from_config(&CopyConfig::default());

        let mut history: Vec<ApiClosedPosition> = (0..4).map(|_| closed(100, 10)).collect();
        assert!(!cache.refresh("0xa", &history));

        history.push(closed(100, 20));
        assert!(cache.refresh("0xa", &history));
        assert!(cache.contains("0xa"));
    }

    #[test]
    fn test_refresh_rejects_favourite_backers() {
        let cache = ContrarianWinnerCache::from_config(&CopyConfig::default());
        let mut history: Vec<ApiClosedPosition> = (0..2).map(|_| closed(100, 10)).collect();
        history.extend((0..6).map(|_| closed(100, 80)));
        history.push(closed(-500, 5));
        assert!(!cache.refresh("0xb", &history));
    }

    #[test]
    fn test_text_snapshot_round_trip() {
        let cache = ContrarianWinnerCache::from_config(&CopyConfig::default());
        cache.insert("0xb");
        cache.insert("0xa");
        let bytes = cache.encode().expect("encode");
        assert_eq!(bytes, b"0xa\n0xb\n");

        let restored = ContrarianWinnerCache::from_config(&CopyConfig::default());
        let merged = restored.restore(b"0xA\n\n  0xb \n").expect("restore");
        assert_eq!(merged, 2);
        assert!(restored.contains("0xa"));
        assert!(restored.contains("0xb"));
    }
}
