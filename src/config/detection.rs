use rust_decimal::Decimal;
use std::collections::HashSet;

use super::{env_or, split_list, ConfigError};

/// Global cheap filters applied before any rule runs.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Trades below this notional (USDC) are ignored.
    pub min_notional: Decimal,
    /// Trades at or above this price are too obvious to be interesting.
    pub obvious_price: Decimal,
    /// Wallets never evaluated (known market makers, the venue itself).
    pub ignored_wallets: HashSet<String>,
    pub dedup_ttl_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_notional: Decimal::from(500),
            obvious_price: Decimal::new(95, 2), // 0.95
            ignored_wallets: HashSet::new(),
            dedup_ttl_secs: 600,
        }
    }
}

/// Thresholds of the stateless rules.
#[derive(Debug, Clone)]
pub struct RuleThresholds {
    pub massive_min_notional: Decimal,
    /// Independent of `FilterConfig::obvious_price`; both apply.
    pub massive_max_price: Decimal,
    pub fresh_max_markets: u32,
    pub fresh_min_notional: Decimal,
    pub win_rate_min_resolved: u32,
    pub win_rate_min: Decimal,
    pub win_rate_min_notional: Decimal,
    pub contrarian_max_price: Decimal,
    pub contrarian_min_notional: Decimal,
    pub frequency_min_trades: usize,
    pub frequency_window_secs: u64,
    pub whale_position_min_value: Decimal,
    pub profiter_min_realized_pnl: Decimal,
    pub spike_multiplier: Decimal,
    pub spike_min_history: u32,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            massive_min_notional: Decimal::from(50_000),
            massive_max_price: Decimal::new(90, 2), // 0.90
            fresh_max_markets: 3,
            fresh_min_notional: Decimal::from(5_000),
            win_rate_min_resolved: 10,
            win_rate_min: Decimal::new(75, 2), // 0.75
            win_rate_min_notional: Decimal::from(2_000),
            contrarian_max_price: Decimal::new(15, 2), // 0.15
            contrarian_min_notional: Decimal::from(2_000),
            frequency_min_trades: 10,
            frequency_window_secs: 300,
            whale_position_min_value: Decimal::from(100_000),
            profiter_min_realized_pnl: Decimal::from(50_000),
            spike_multiplier: Decimal::from(10),
            spike_min_history: 5,
        }
    }
}

/// Copy-trading window and leader qualification.
#[derive(Debug, Clone)]
pub struct CopyConfig {
    pub window_secs: u64,
    pub min_followers: usize,
    pub leader_min_win_rate: Decimal,
    pub leader_min_resolved: u32,
    /// Contrarian-winner qualification (shared with the cache).
    pub contrarian_min_wins: u32,
    pub contrarian_min_ratio: Decimal,
    pub contrarian_entry_max_price: Decimal,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            window_secs: 600,
            min_followers: 3,
            leader_min_win_rate: Decimal::new(70, 2), // 0.70
            leader_min_resolved: 10,
            contrarian_min_wins: 5,
            contrarian_min_ratio: Decimal::new(50, 2), // 0.50
            contrarian_entry_max_price: Decimal::new(30, 2), // 0.30
        }
    }
}

/// Alert threshold policy shared by the delayed trackers.
#[derive(Debug, Clone)]
pub struct AlertPolicyConfig {
    pub min_trades: u32,
    pub min_success_rate: Decimal,
    pub cooldown_secs: u64,
}

impl Default for AlertPolicyConfig {
    fn default() -> Self {
        Self {
            min_trades: 3,
            min_success_rate: Decimal::new(70, 2), // 0.70
            cooldown_secs: 6 * 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HedgeConfig {
    pub significant_sell_pct: Decimal,
    pub verify_delay_secs: u64,
    pub policy: AlertPolicyConfig,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            significant_sell_pct: Decimal::new(50, 2), // 0.50
            verify_delay_secs: 3600,
            policy: AlertPolicyConfig {
                min_trades: 2,
                min_success_rate: Decimal::new(60, 2), // 0.60
                cooldown_secs: 12 * 3600,
            },
        }
    }
}

/// Entry thresholds and delays of the four price-verified trackers.
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Minimum relative price move counted as favorable.
    pub min_move: Decimal,

    pub conviction_min_position: Decimal,
    pub conviction_min_add_value: Decimal,
    pub conviction_min_loss_pct: Decimal,
    pub conviction_verify_delay_secs: u64,

    pub exit_min_notional: Decimal,
    pub exit_verify_delay_secs: u64,

    pub stealth_max_trade: Decimal,
    pub stealth_min_trades: usize,
    pub stealth_min_total: Decimal,
    pub stealth_window_secs: u64,
    pub stealth_verify_delay_secs: u64,

    pub premove_min_notional: Decimal,
    pub premove_verify_delay_secs: u64,

    pub policy: AlertPolicyConfig,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_move: Decimal::new(10, 2), // 0.10

            conviction_min_position: Decimal::from(1_000),
            conviction_min_add_value: Decimal::from(2_000),
            conviction_min_loss_pct: Decimal::new(20, 2), // 0.20
            conviction_verify_delay_secs: 24 * 3600,

            exit_min_notional: Decimal::from(5_000),
            exit_verify_delay_secs: 6 * 3600,

            stealth_max_trade: Decimal::from(500),
            stealth_min_trades: 5,
            stealth_min_total: Decimal::from(2_000),
            stealth_window_secs: 3600,
            stealth_verify_delay_secs: 6 * 3600,

            premove_min_notional: Decimal::from(10_000),
            premove_verify_delay_secs: 3600,

            policy: AlertPolicyConfig::default(),
        }
    }
}

/// Scheduling, retention and resource limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retention_secs: u64,
    pub max_wallets: usize,
    pub verify_interval_secs: u64,
    pub save_interval_secs: u64,
    pub rate_limit_per_minute: u32,
    pub enrichment_timeout_secs: u64,
    pub profile_cache_ttl_secs: u64,
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 3600,
            max_wallets: 20_000,
            verify_interval_secs: 300,
            save_interval_secs: 300,
            rate_limit_per_minute: 60,
            enrichment_timeout_secs: 10,
            profile_cache_ttl_secs: 60,
            queue_capacity: 1_024,
        }
    }
}

/// Every numeric knob of the surveillance engine.
#[derive(Debug, Clone, Default)]
pub struct DetectionConfig {
    pub filter: FilterConfig,
    pub rules: RuleThresholds,
    pub copy: CopyConfig,
    pub hedge: HedgeConfig,
    pub patterns: PatternConfig,
    pub engine: EngineConfig,
}

impl DetectionConfig {
    /// Defaults overridden by any matching environment variable. A variable
    /// that is set but does not parse is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();

        let filter = FilterConfig {
            min_notional: env_or("MIN_NOTIONAL", d.filter.min_notional)?,
            obvious_price: env_or("OBVIOUS_PRICE", d.filter.obvious_price)?,
            ignored_wallets: split_list(&std::env::var("IGNORED_WALLETS").unwrap_or_default())
                .into_iter()
                .map(|w| w.to_lowercase())
                .collect(),
            dedup_ttl_secs: env_or("DEDUP_TTL_SECS", d.filter.dedup_ttl_secs)?,
        };

        let r = &d.rules;
        let rules = RuleThresholds {
            massive_min_notional: env_or("MASSIVE_MIN_NOTIONAL", r.massive_min_notional)?,
            massive_max_price: env_or("MASSIVE_MAX_PRICE", r.massive_max_price)?,
            fresh_max_markets: env_or("FRESH_MAX_MARKETS", r.fresh_max_markets)?,
            fresh_min_notional: env_or("FRESH_MIN_NOTIONAL", r.fresh_min_notional)?,
            win_rate_min_resolved: env_or("WIN_RATE_MIN_RESOLVED", r.win_rate_min_resolved)?,
            win_rate_min: env_or("WIN_RATE_MIN", r.win_rate_min)?,
            win_rate_min_notional: env_or("WIN_RATE_MIN_NOTIONAL", r.win_rate_min_notional)?,
            contrarian_max_price: env_or("CONTRARIAN_MAX_PRICE", r.contrarian_max_price)?,
            contrarian_min_notional: env_or("CONTRARIAN_MIN_NOTIONAL", r.contrarian_min_notional)?,
            frequency_min_trades: env_or("FREQUENCY_MIN_TRADES", r.frequency_min_trades)?,
            frequency_window_secs: env_or("FREQUENCY_WINDOW_SECS", r.frequency_window_secs)?,
            whale_position_min_value: env_or(
                "WHALE_POSITION_MIN_VALUE",
                r.whale_position_min_value,
            )?,
            profiter_min_realized_pnl: env_or(
                "PROFITER_MIN_REALIZED_PNL",
                r.profiter_min_realized_pnl,
            )?,
            spike_multiplier: env_or("SPIKE_MULTIPLIER", r.spike_multiplier)?,
            spike_min_history: env_or("SPIKE_MIN_HISTORY", r.spike_min_history)?,
        };

        let c = &d.copy;
        let copy = CopyConfig {
            window_secs: env_or("COPY_WINDOW_SECS", c.window_secs)?,
            min_followers: env_or("COPY_MIN_FOLLOWERS", c.min_followers)?,
            leader_min_win_rate: env_or("LEADER_MIN_WIN_RATE", c.leader_min_win_rate)?,
            leader_min_resolved: env_or("LEADER_MIN_RESOLVED", c.leader_min_resolved)?,
            contrarian_min_wins: env_or("CONTRARIAN_MIN_WINS", c.contrarian_min_wins)?,
            contrarian_min_ratio: env_or("CONTRARIAN_MIN_RATIO", c.contrarian_min_ratio)?,
            contrarian_entry_max_price: env_or(
                "CONTRARIAN_ENTRY_MAX_PRICE",
                c.contrarian_entry_max_price,
            )?,
        };

        let h = &d.hedge;
        let hedge = HedgeConfig {
            significant_sell_pct: env_or("HEDGE_SIGNIFICANT_SELL_PCT", h.significant_sell_pct)?,
            verify_delay_secs: env_or("HEDGE_VERIFY_DELAY_SECS", h.verify_delay_secs)?,
            policy: AlertPolicyConfig {
                min_trades: env_or("HEDGE_ALERT_MIN_TRADES", h.policy.min_trades)?,
                min_success_rate: env_or("HEDGE_ALERT_MIN_RATE", h.policy.min_success_rate)?,
                cooldown_secs: env_or("HEDGE_ALERT_COOLDOWN_SECS", h.policy.cooldown_secs)?,
            },
        };

        let p = &d.patterns;
        let patterns = PatternConfig {
            min_move: env_or("PATTERN_MIN_MOVE", p.min_move)?,
            conviction_min_position: env_or("CONVICTION_MIN_POSITION", p.conviction_min_position)?,
            conviction_min_add_value: env_or(
                "CONVICTION_MIN_ADD_VALUE",
                p.conviction_min_add_value,
            )?,
            conviction_min_loss_pct: env_or("CONVICTION_MIN_LOSS_PCT", p.conviction_min_loss_pct)?,
            conviction_verify_delay_secs: env_or(
                "CONVICTION_VERIFY_DELAY_SECS",
                p.conviction_verify_delay_secs,
            )?,
            exit_min_notional: env_or("EXIT_MIN_NOTIONAL", p.exit_min_notional)?,
            exit_verify_delay_secs: env_or("EXIT_VERIFY_DELAY_SECS", p.exit_verify_delay_secs)?,
            stealth_max_trade: env_or("STEALTH_MAX_TRADE", p.stealth_max_trade)?,
            stealth_min_trades: env_or("STEALTH_MIN_TRADES", p.stealth_min_trades)?,
            stealth_min_total: env_or("STEALTH_MIN_TOTAL", p.stealth_min_total)?,
            stealth_window_secs: env_or("STEALTH_WINDOW_SECS", p.stealth_window_secs)?,
            stealth_verify_delay_secs: env_or(
                "STEALTH_VERIFY_DELAY_SECS",
                p.stealth_verify_delay_secs,
            )?,
            premove_min_notional: env_or("PREMOVE_MIN_NOTIONAL", p.premove_min_notional)?,
            premove_verify_delay_secs: env_or(
                "PREMOVE_VERIFY_DELAY_SECS",
                p.premove_verify_delay_secs,
            )?,
            policy: AlertPolicyConfig {
                min_trades: env_or("PATTERN_ALERT_MIN_TRADES", p.policy.min_trades)?,
                min_success_rate: env_or("PATTERN_ALERT_MIN_RATE", p.policy.min_success_rate)?,
                cooldown_secs: env_or("PATTERN_ALERT_COOLDOWN_SECS", p.policy.cooldown_secs)?,
            },
        };

        let e = &d.engine;
        let engine = EngineConfig {
            retention_secs: env_or("RETENTION_SECS", e.retention_secs)?,
            max_wallets: env_or("TRACKER_MAX_WALLETS", e.max_wallets)?,
            verify_interval_secs: env_or("VERIFY_INTERVAL_SECS", e.verify_interval_secs)?,
            save_interval_secs: env_or("SAVE_INTERVAL_SECS", e.save_interval_secs)?,
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", e.rate_limit_per_minute)?,
            enrichment_timeout_secs: env_or("ENRICHMENT_TIMEOUT_SECS", e.enrichment_timeout_secs)?,
            profile_cache_ttl_secs: env_or("PROFILE_CACHE_TTL_SECS", e.profile_cache_ttl_secs)?,
            queue_capacity: env_or("QUEUE_CAPACITY", e.queue_capacity)?,
        };

        Ok(Self {
            filter,
            rules,
            copy,
            hedge,
            patterns,
            engine,
        })
    }

    /// Reject configurations that cannot work. Runs once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("OBVIOUS_PRICE", self.filter.obvious_price),
            ("MASSIVE_MAX_PRICE", self.rules.massive_max_price),
            ("WIN_RATE_MIN", self.rules.win_rate_min),
            ("CONTRARIAN_MAX_PRICE", self.rules.contrarian_max_price),
            ("LEADER_MIN_WIN_RATE", self.copy.leader_min_win_rate),
            ("CONTRARIAN_MIN_RATIO", self.copy.contrarian_min_ratio),
            ("CONTRARIAN_ENTRY_MAX_PRICE", self.copy.contrarian_entry_max_price),
            ("HEDGE_SIGNIFICANT_SELL_PCT", self.hedge.significant_sell_pct),
            ("HEDGE_ALERT_MIN_RATE", self.hedge.policy.min_success_rate),
            ("CONVICTION_MIN_LOSS_PCT", self.patterns.conviction_min_loss_pct),
            ("PATTERN_ALERT_MIN_RATE", self.patterns.policy.min_success_rate),
        ];
        for (key, value) in fractions {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(ConfigError::FractionOutOfRange {
                    key,
                    value: value.to_string(),
                });
            }
        }

        let positive = [
            ("DEDUP_TTL_SECS", self.filter.dedup_ttl_secs),
            ("FREQUENCY_WINDOW_SECS", self.rules.frequency_window_secs),
            ("COPY_WINDOW_SECS", self.copy.window_secs),
            ("STEALTH_WINDOW_SECS", self.patterns.stealth_window_secs),
            ("RETENTION_SECS", self.engine.retention_secs),
            ("VERIFY_INTERVAL_SECS", self.engine.verify_interval_secs),
            ("SAVE_INTERVAL_SECS", self.engine.save_interval_secs),
            ("RATE_LIMIT_PER_MINUTE", self.engine.rate_limit_per_minute as u64),
            ("ENRICHMENT_TIMEOUT_SECS", self.engine.enrichment_timeout_secs),
            ("QUEUE_CAPACITY", self.engine.queue_capacity as u64),
            ("TRACKER_MAX_WALLETS", self.engine.max_wallets as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { key });
            }
        }

        if self.patterns.min_move <= Decimal::ZERO {
            return Err(ConfigError::NotPositive { key: "PATTERN_MIN_MOVE" });
        }
        if self.copy.min_followers == 0 {
            return Err(ConfigError::NotPositive { key: "COPY_MIN_FOLLOWERS" });
        }

        Ok(())
    }
}
