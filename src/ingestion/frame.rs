use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Side, TradeEvent};

/// Epoch values above this are milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame element is not an object")]
    NotAnObject,

    #[error("trade frame missing {0}")]
    MissingField(&'static str),

    #[error("unknown trade side {0:?}")]
    BadSide(String),
}

/// One normalised message from the market feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Trade(TradeEvent),
    /// Book updates, price changes, acks and anything else we do not use.
    Unrecognized { event_type: Option<String> },
}

impl FeedEvent {
    pub fn into_trade(self) -> Option<TradeEvent> {
        match self {
            FeedEvent::Trade(trade) => Some(trade),
            FeedEvent::Unrecognized { .. } => None,
        }
    }
}

/// Split a raw text frame into feed events.
///
/// A frame may be one object, an array of objects, an object wrapping an
/// array under `data`, or whitespace. Bad elements inside an array are
/// reported individually so one of them does not sink the rest.
pub fn parse_frame(
    text: &str,
    received_at: DateTime<Utc>,
) -> Result<Vec<Result<FeedEvent, FrameError>>, FrameError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(trimmed)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) if !obj.contains_key("event_type") => items,
            Some(other) => {
                obj.insert("data".into(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        // Bare strings and numbers are keep-alive noise
        _ => return Ok(Vec::new()),
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::Object(obj) => normalize(&obj, received_at),
            _ => Err(FrameError::NotAnObject),
        })
        .collect())
}

/// Turn one feed object into a `FeedEvent`.
pub fn normalize(obj: &Map<String, Value>, received_at: DateTime<Utc>) -> Result<FeedEvent, FrameError> {
    let event_type = str_field(obj, &["event_type", "type"]).map(str::to_string);
    match event_type.as_deref() {
        Some("trade") | Some("last_trade_price") => trade_from_object(obj, received_at).map(FeedEvent::Trade),
        _ => Ok(FeedEvent::Unrecognized { event_type }),
    }
}

/// Build a trade from a feed or API object. Field names vary by source.
pub fn trade_from_object(
    obj: &Map<String, Value>,
    received_at: DateTime<Utc>,
) -> Result<TradeEvent, FrameError> {
    let asset_id = str_field(obj, &["asset_id", "asset", "assetId", "token_id"])
        .ok_or(FrameError::MissingField("asset_id"))?
        .to_string();

    let side_raw = str_field(obj, &["side"]).ok_or(FrameError::MissingField("side"))?;
    let side = Side::from_api_str(side_raw).ok_or_else(|| FrameError::BadSide(side_raw.to_string()))?;

    let market_id = str_field(obj, &["market", "conditionId", "condition_id"])
        .unwrap_or_default()
        .to_string();
    let price = decimal_field(obj, "price");
    let size = decimal_field(obj, "size");
    let timestamp = obj
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let wallet = str_field(obj, &["taker_address", "maker_address", "proxyWallet", "wallet"])
        .unwrap_or_default()
        .to_lowercase();

    let transaction_id = str_field(obj, &["transaction_hash", "transactionHash", "id"])
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!("{}:{}:{}:{}", asset_id, timestamp.timestamp_millis(), price, size)
        });

    let outcome = str_field(obj, &["outcome"]).map(str::to_string);

    Ok(TradeEvent {
        asset_id,
        market_id,
        side,
        price,
        size,
        wallet,
        timestamp,
        transaction_id,
        outcome,
    })
}

fn str_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Strings or numbers; anything unparsable is zero.
pub fn decimal_field(obj: &Map<String, Value>, key: &str) -> Decimal {
    match obj.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .unwrap_or(Decimal::ZERO),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Epoch seconds, epoch milliseconds or RFC 3339, as a number or a string.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return from_epoch(n);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n <= 0 {
        return None;
    }
    if n > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_999, 0).expect("valid")
    }

    #[test]
    fn test_single_trade_object() {
        let raw = r#"{"event_type":"last_trade_price","asset_id":"123","market":"0xm",
            "price":"0.42","size":"1000","side":"BUY","timestamp":"1700000000000",
            "taker_address":"0xABC","transaction_hash":"0xtx"}"#;
        let events = parse_frame(raw, received()).expect("parses");
        assert_eq!(events.len(), 1);

        let trade = events
            .into_iter()
            .next()
            .and_then(|e| e.ok())
            .and_then(FeedEvent::into_trade)
            .expect("trade");
        assert_eq!(trade.asset_id, "123");
        assert_eq!(trade.market_id, "0xm");
        assert_eq!(trade.price, Decimal::new(42, 2));
        assert_eq!(trade.notional(), Decimal::from(420));
        assert_eq!(trade.wallet, "0xabc");
        assert_eq!(trade.transaction_id, "0xtx");
        assert_eq!(trade.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_array_with_mixed_events() {
        let raw = r#"[
            {"event_type":"book","asset_id":"1"},
            {"event_type":"trade","asset_id":"1","side":"SELL","price":0.5,"size":10,"timestamp":1700000000},
            {"event_type":"price_change"},
            42
        ]"#;
        let events = parse_frame(raw, received()).expect("parses");
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0],
            Ok(FeedEvent::Unrecognized { ref event_type }) if event_type.as_deref() == Some("book")
        ));
        assert!(matches!(events[1], Ok(FeedEvent::Trade(_))));
        assert!(matches!(events[2], Ok(FeedEvent::Unrecognized { .. })));
        assert!(matches!(events[3], Err(FrameError::NotAnObject)));
    }

    #[test]
    fn test_noise_and_garbage() {
        assert!(parse_frame("   \n", received()).expect("noise").is_empty());
        assert!(parse_frame("\"PONG\"", received()).expect("noise").is_empty());
        assert!(matches!(parse_frame("{not json", received()), Err(FrameError::Json(_))));
    }

    #[test]
    fn test_unparsable_fields_default() {
        let raw = r#"{"event_type":"trade","asset_id":"9","side":"buy","price":"abc",
            "size":"5","timestamp":"yesterday"}"#;
        let trade = parse_frame(raw, received())
            .expect("parses")
            .into_iter()
            .next()
            .and_then(|e| e.ok())
            .and_then(FeedEvent::into_trade)
            .expect("trade");
        assert_eq!(trade.price, Decimal::ZERO);
        assert_eq!(trade.timestamp, received());
        assert!(trade.wallet.is_empty());
        assert_eq!(trade.transaction_id, format!("9:{}:0:5", received().timestamp_millis()));
    }

    #[test]
    fn test_missing_side_is_an_error() {
        let raw = r#"{"event_type":"trade","asset_id":"9","price":"0.5","size":"5"}"#;
        let events = parse_frame(raw, received()).expect("parses");
        assert!(matches!(events[0], Err(FrameError::MissingField("side"))));
    }

    #[test]
    fn test_timestamp_formats() {
        let secs = parse_timestamp(&Value::from(1_700_000_000i64)).expect("secs");
        let millis = parse_timestamp(&Value::from(1_700_000_000_000i64)).expect("millis");
        let rfc = parse_timestamp(&Value::from("2023-11-14T22:13:20Z")).expect("rfc3339");
        assert_eq!(secs, millis);
        assert_eq!(secs, rfc);
        assert!(parse_timestamp(&Value::from(0)).is_none());
    }
}
