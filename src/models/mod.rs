pub mod alert;
pub mod observation;
pub mod profile;

pub use alert::{AlertReason, CopyCluster, HedgePosition, HedgeRemoval, TradeAlert};
pub use observation::{ObservationResult, PendingObservation, WalletStats};
pub use profile::{PositionSlice, ProfileSummary, WalletProfile};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "0" => Some(Side::Buy),
            "SELL" | "1" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// TradeEvent
// ---------------------------------------------------------------------------

/// One observed fill on the venue. Immutable once built by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Outcome token id.
    pub asset_id: String,
    /// Condition id of the market.
    pub market_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    /// Empty when the feed did not carry an address.
    pub wallet: String,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: String,
    /// Outcome label ("Yes", "No", ...) when the source knows it.
    #[serde(default)]
    pub outcome: Option<String>,
}

impl TradeEvent {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade: wallet={} market={} side={} size={} price={} notional={}",
            truncate_chars(&self.wallet, 8),
            truncate_chars(&self.market_id, 8),
            self.side,
            self.size,
            self.price,
            self.notional(),
        )
    }
}

/// Short form used in logs and notifications: `0x1234...abcd`.
pub fn short_address(address: &str) -> String {
    let len = address.chars().count();
    if len > 10 {
        let tail: String = address.chars().skip(len - 4).collect();
        format!("{}...{}", truncate_chars(address, 6), tail)
    } else {
        address.to_string()
    }
}

/// At most the first `max` characters of `s`. Feed strings are not
/// guaranteed to be ASCII.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(idx, _)| &s[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_api_str() {
        assert_eq!(Side::from_api_str("buy"), Some(Side::Buy));
        assert_eq!(Side::from_api_str("SELL"), Some(Side::Sell));
        assert_eq!(Side::from_api_str("1"), Some(Side::Sell));
        assert_eq!(Side::from_api_str("hold"), None);
    }

    #[test]
    fn test_short_address() {
        assert_eq!(
            short_address("0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e"),
            "0x4bfb...982e"
        );
        assert_eq!(short_address("0xabc"), "0xabc");
    }

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("a\u{e9}\u{e9}", 2), "a\u{e9}");
        assert_eq!(truncate_chars("abc", 8), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
