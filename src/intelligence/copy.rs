use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{CopyConfig, DetectionConfig};
use crate::models::{CopyCluster, Side, TradeEvent, WalletProfile};
use crate::store::{decode_snapshot, encode_snapshot, Persistable, StoreError};

pub const COPY_SNAPSHOT_KEY: &str = "copy_tracker.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct ClusterKey {
    leader: String,
    market_id: String,
    asset_id: String,
    side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Cluster {
    key: ClusterKey,
    leader_traded_at: DateTime<Utc>,
    followers: Vec<String>,
    alerted: bool,
}

impl Cluster {
    fn to_alert(&self) -> CopyCluster {
        CopyCluster {
            leader: self.key.leader.clone(),
            market_id: self.key.market_id.clone(),
            asset_id: self.key.asset_id.clone(),
            side: self.key.side,
            leader_traded_at: self.leader_traded_at,
            followers: self.followers.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CopySnapshot {
    #[serde(default)]
    clusters: Vec<Cluster>,
}

/// Wallets piling into the same side shortly after a proven wallet.
pub struct CopyTracker {
    window: Duration,
    min_followers: usize,
    leader_min_win_rate: Decimal,
    leader_min_resolved: u32,
    max_clusters: usize,
    clusters: Mutex<HashMap<ClusterKey, Cluster>>,
}

impl CopyTracker {
    pub fn new(config: &CopyConfig, max_clusters: usize) -> Self {
        Self {
            window: Duration::seconds(config.window_secs as i64),
            min_followers: config.min_followers.max(1),
            leader_min_win_rate: config.leader_min_win_rate,
            leader_min_resolved: config.leader_min_resolved,
            max_clusters: max_clusters.max(1),
            clusters: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(&config.copy, config.engine.max_wallets)
    }

    pub fn is_leader(&self, profile: Option<&WalletProfile>, contrarian_winner: bool) -> bool {
        contrarian_winner
            || profile.is_some_and(|p| {
                p.resolved() >= self.leader_min_resolved
                    && p.win_rate() >= self.leader_min_win_rate
            })
    }

    /// Count `trade` as a follower of every open cluster it matches, then
    /// open a cluster of its own when the wallet is a leader. Returns the
    /// first cluster that reached the follower threshold on this trade.
    pub fn observe(&self, trade: &TradeEvent, leader: bool) -> Option<CopyCluster> {
        let mut clusters = self.clusters.lock();
        let window = self.window;
        let now = trade.timestamp;

        clusters.retain(|_, c| now - c.leader_traded_at <= window);

        let mut reached = None;
        for cluster in clusters.values_mut() {
            let key = &cluster.key;
            if key.leader == trade.wallet
                || key.market_id != trade.market_id
                || key.asset_id != trade.asset_id
                || key.side != trade.side
            {
                continue;
            }
            let lag = now - cluster.leader_traded_at;
            if lag < Duration::zero() || lag > window {
                continue;
            }
            if cluster.followers.contains(&trade.wallet) {
                continue;
            }
            cluster.followers.push(trade.wallet.clone());

            if !cluster.alerted && cluster.followers.len() >= self.min_followers {
                cluster.alerted = true;
                tracing::info!(
                    leader = %cluster.key.leader,
                    market = %cluster.key.market_id,
                    followers = cluster.followers.len(),
                    "Copy cluster formed"
                );
                if reached.is_none() {
                    reached = Some(cluster.to_alert());
                }
            }
        }

        if leader {
            let key = ClusterKey {
                leader: trade.wallet.clone(),
                market_id: trade.market_id.clone(),
                asset_id: trade.asset_id.clone(),
                side: trade.side,
            };
            clusters.entry(key.clone()).or_insert_with(|| Cluster {
                key,
                leader_traded_at: trade.timestamp,
                followers: Vec::new(),
                alerted: false,
            });
            if clusters.len() > self.max_clusters {
                drop_oldest(&mut clusters, self.max_clusters);
            }
        }

        reached
    }

    pub fn open_clusters(&self) -> usize {
        self.clusters.lock().len()
    }
}

fn drop_oldest(clusters: &mut HashMap<ClusterKey, Cluster>, keep: usize) -> usize {
    if clusters.len() <= keep {
        return 0;
    }
    let mut ages: Vec<(DateTime<Utc>, ClusterKey)> = clusters
        .values()
        .map(|c| (c.leader_traded_at, c.key.clone()))
        .collect();
    ages.sort_by_key(|(at, _)| *at);
    let excess = clusters.len() - keep;
    for (_, key) in ages.into_iter().take(excess) {
        clusters.remove(&key);
    }
    excess
}

impl Persistable for CopyTracker {
    fn snapshot_key(&self) -> &'static str {
        COPY_SNAPSHOT_KEY
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let clusters = self.clusters.lock().values().cloned().collect();
        encode_snapshot(&CopySnapshot { clusters })
    }

    fn restore(&self, bytes: &[u8]) -> Result<usize, StoreError> {
        let snapshot: CopySnapshot = decode_snapshot(bytes)?;
        let mut clusters = self.clusters.lock();
        let mut merged = 0;
        for cluster in snapshot.clusters {
            if !clusters.contains_key(&cluster.key) {
                clusters.insert(cluster.key.clone(), cluster);
                merged += 1;
            }
        }
        Ok(merged)
    }

    fn evict_for_space(&self) -> usize {
        let mut clusters = self.clusters.lock();
        let keep = clusters.len() / 2;
        drop_oldest(&mut clusters, keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(wallet: &str, at: DateTime<Utc>) -> TradeEvent {
        TradeEvent {
            asset_id: "asset".into(),
            market_id: "market".into(),
            side: Side::Buy,
            price: Decimal::new(40, 2),
            size: Decimal::from(5_000),
            wallet: wallet.into(),
            timestamp: at,
            transaction_id: format!("{wallet}-{}", at.timestamp()),
            outcome: None,
        }
    }

    fn tracker() -> CopyTracker {
        CopyTracker::from_config(&DetectionConfig::default())
    }

    #[test]
    fn test_three_followers_within_window() {
        let tracker = tracker();
        let t0 = Utc::now();
        assert!(tracker.observe(&buy("0xleader", t0), true).is_none());
        assert!(tracker.observe(&buy("0xf1", t0 + Duration::minutes(2)), false).is_none());
        assert!(tracker.observe(&buy("0xf2", t0 + Duration::minutes(5)), false).is_none());

        let cluster = tracker
            .observe(&buy("0xf3", t0 + Duration::minutes(8)), false)
            .expect("cluster");
        assert_eq!(cluster.leader, "0xleader");
        assert_eq!(cluster.followers, vec!["0xf1", "0xf2", "0xf3"]);

        // outside the 10 minute window
        assert!(tracker.observe(&buy("0xf4", t0 + Duration::minutes(15)), false).is_none());
    }

    #[test]
    fn test_followers_counted_once_and_alert_once() {
        let tracker = tracker();
        let t0 = Utc::now();
        tracker.observe(&buy("0xleader", t0), true);
        tracker.observe(&buy("0xf1", t0 + Duration::minutes(1)), false);
        tracker.observe(&buy("0xf1", t0 + Duration::minutes(2)), false);
        tracker.observe(&buy("0xf2", t0 + Duration::minutes(3)), false);
        assert!(tracker.observe(&buy("0xf2", t0 + Duration::minutes(4)), false).is_none());
        assert!(tracker.observe(&buy("0xf3", t0 + Duration::minutes(5)), false).is_some());
        assert!(tracker.observe(&buy("0xf4", t0 + Duration::minutes(6)), false).is_none());
    }

    #[test]
    fn test_other_side_not_a_follower() {
        let tracker = tracker();
        let t0 = Utc::now();
        tracker.observe(&buy("0xleader", t0), true);
        for (i, wallet) in ["0xa", "0xb", "0xc"].iter().enumerate() {
            let mut t = buy(wallet, t0 + Duration::minutes(i as i64 + 1));
            t.side = Side::Sell;
            assert!(tracker.observe(&t, false).is_none());
        }
    }

    #[test]
    fn test_leader_qualification() {
        let tracker = tracker();
        let mut profile = WalletProfile::empty("0xw", "market", Utc::now());
        assert!(!tracker.is_leader(Some(&profile), false));
        assert!(tracker.is_leader(None, true));

        profile.resolved_wins = 8;
        profile.resolved_losses = 2;
        assert!(tracker.is_leader(Some(&profile), false));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let tracker = tracker();
        let t0 = Utc::now();
        tracker.observe(&buy("0xleader", t0), true);
        tracker.observe(&buy("0xf1", t0 + Duration::minutes(1)), false);

        let bytes = tracker.encode().expect("encode");
        let restored = CopyTracker::from_config(&DetectionConfig::default());
        assert_eq!(restored.restore(&bytes).expect("restore"), 1);

        restored.observe(&buy("0xf2", t0 + Duration::minutes(2)), false);
        let cluster = restored
            .observe(&buy("0xf3", t0 + Duration::minutes(3)), false)
            .expect("cluster survives restart");
        assert_eq!(cluster.followers.len(), 3);
    }
}
