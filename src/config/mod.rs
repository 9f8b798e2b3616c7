pub mod detection;

pub use detection::{
    AlertPolicyConfig, CopyConfig, DetectionConfig, EngineConfig, FilterConfig, HedgeConfig,
    PatternConfig, RuleThresholds,
};

use std::env;
use std::str::FromStr;

const DEFAULT_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
const DEFAULT_DATA_API_URL: &str = "https://data-api.polymarket.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key} must be within [0, 1], got {value}")]
    FractionOutOfRange { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    NotPositive { key: &'static str },

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Where trades come from (`EVENT_SOURCE`).
///
/// The public `ws/market` channel publishes `last_trade_price` without the
/// trader's address, and trades without a wallet are filtered as
/// `no_wallet`. Stream mode only produces alerts behind a feed that carries
/// `taker_address`/`maker_address`; `poll` reads the data API tape, which
/// always has `proxyWallet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Stream,
    Poll,
}

impl FromStr for SourceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "ws" | "websocket" => Ok(SourceMode::Stream),
            "poll" | "polling" => Ok(SourceMode::Poll),
            other => Err(ConfigError::Invalid {
                key: "EVENT_SOURCE",
                value: other.to_string(),
            }),
        }
    }
}

/// Where tracker snapshots are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    File(String),
    Postgres(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,

    // Event source
    pub source_mode: SourceMode,
    pub polymarket_ws_url: String,
    pub ws_subscribe_token_ids: Vec<String>,
    pub data_api_url: String,
    pub poll_interval_secs: u64,
    pub poll_limit: u32,

    // Market discovery
    pub market_discovery_enabled: bool,
    pub market_discovery_interval_secs: u64,
    pub market_min_volume: rust_decimal::Decimal,
    pub market_min_liquidity: rust_decimal::Decimal,

    // Persistence
    pub store: StoreBackend,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    pub health_stale_secs: u64,

    pub detection: DetectionConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let token_ids_raw = env::var("WS_SUBSCRIBE_TOKEN_IDS").unwrap_or_default();
        let ws_subscribe_token_ids = split_list(&token_ids_raw);

        let store = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => StoreBackend::Postgres(url),
            _ => StoreBackend::File(
                env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "./data".into()),
            ),
        };

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    key: "PORT",
                    value: env::var("PORT").unwrap_or_default(),
                })?,

            source_mode: env::var("EVENT_SOURCE")
                .unwrap_or_else(|_| "stream".into())
                .parse()?,
            polymarket_ws_url: env::var("POLYMARKET_WS_URL")
                .unwrap_or_else(|_| DEFAULT_WS_URL.into()),
            ws_subscribe_token_ids,
            data_api_url: env::var("DATA_API_URL")
                .unwrap_or_else(|_| DEFAULT_DATA_API_URL.into()),
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 10)?,
            poll_limit: env_or("POLL_LIMIT", 500)?,

            market_discovery_enabled: env_or("MARKET_DISCOVERY_ENABLED", true)?,
            market_discovery_interval_secs: env_or("MARKET_DISCOVERY_INTERVAL_SECS", 300)?,
            market_min_volume: env_or("MARKET_MIN_VOLUME", rust_decimal::Decimal::from(10_000))?,
            market_min_liquidity: env_or(
                "MARKET_MIN_LIQUIDITY",
                rust_decimal::Decimal::from(5_000),
            )?,

            store,

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty()),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty()),

            health_stale_secs: env_or("HEALTH_STALE_SECS", 300)?,

            detection: DetectionConfig::from_env()?,
        };

        config.detection.validate()?;
        if config.poll_interval_secs == 0 {
            return Err(ConfigError::NotPositive { key: "POLL_INTERVAL_SECS" });
        }

        Ok(config)
    }

    /// Returns true if both Telegram settings are configured.
    pub fn has_telegram(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }
}

/// Read `key` from the environment, falling back to `default` when unset or
/// blank. A value that does not parse is rejected.
pub(crate) fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw })
        }
        _ => Ok(default),
    }
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
