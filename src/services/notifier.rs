use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::models::{short_address, truncate_chars, TradeAlert};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notifier rejected message with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Anything that can deliver a trade alert somewhere.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_trade_alert(&self, alert: &TradeAlert) -> Result<(), NotifyError>;
}

/// Render an alert as a Markdown message: title first, then the fields a
/// reader needs to find the trade.
pub fn format_trade_alert(alert: &TradeAlert) -> String {
    let trade = &alert.trade;
    let reasons: Vec<&str> = alert.reasons.iter().map(|r| r.as_str()).collect();

    let mut msg = format!(
        "*{}*\nWallet: `{}`\nSide: {}{}\nNotional: ${} USDC\nPrice: {}\nMarket: `{}`\nReasons: {}",
        alert.title(),
        short_address(&trade.wallet),
        trade.side,
        trade
            .outcome
            .as_deref()
            .map(|o| format!(" {o}"))
            .unwrap_or_default(),
        trade.notional().round_dp(2),
        trade.price,
        truncate_chars(&trade.market_id, 16),
        reasons.join(", "),
    );

    if let Some(profile) = &alert.profile {
        msg.push_str(&format!(
            "\nMarkets: {} | Resolved: {} | Win Rate: {}%\nRealized PnL: ${}",
            profile.unique_markets,
            profile.resolved,
            (profile.win_rate * Decimal::ONE_HUNDRED).round_dp(1),
            profile.realized_pnl.round_dp(2),
        ));
    }

    if let Some(cluster) = &alert.copy_cluster {
        let followers: Vec<String> = cluster.followers.iter().map(|f| short_address(f)).collect();
        msg.push_str(&format!(
            "\nLeader: `{}`\nFollowers: {}",
            short_address(&cluster.leader),
            followers.join(", "),
        ));
    }

    if let Some(hedge) = &alert.hedge {
        msg.push_str(&format!(
            "\nSold: {} ({}% of side)",
            hedge.sold_outcome,
            (hedge.sold_pct * Decimal::ONE_HUNDRED).round_dp(1),
        ));
    }

    msg
}

/// Telegram delivery. Failures are reported to the caller, which logs them.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self::with_base_url(reqwest::Client::new(), TELEGRAM_API_BASE, bot_token, chat_id)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: &str,
        bot_token: String,
        chat_id: String,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
        }
    }

    pub async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertNotifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send_trade_alert(&self, alert: &TradeAlert) -> Result<(), NotifyError> {
        self.send(&format_trade_alert(alert)).await
    }
}

/// Writes alerts to the log. Always registered.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send_trade_alert(&self, alert: &TradeAlert) -> Result<(), NotifyError> {
        let reasons: Vec<&str> = alert.reasons.iter().map(|r| r.as_str()).collect();
        tracing::info!(
            alert_id = %alert.id,
            title = alert.title(),
            wallet = %alert.trade.wallet,
            market = %alert.trade.market_id,
            side = %alert.trade.side,
            price = %alert.trade.price,
            notional = %alert.trade.notional(),
            reasons = %reasons.join(","),
            "Trade alert"
        );
        Ok(())
    }
}

/// Fan-out to every registered notifier.
#[derive(Clone, Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn AlertNotifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver in the background. The caller never waits on a notifier.
    pub fn dispatch(&self, alert: TradeAlert) {
        counter!("alerts_emitted_total", "title" => alert.title()).increment(1);
        if self.notifiers.is_empty() {
            return;
        }
        let alert = Arc::new(alert);
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let alert = alert.clone();
            tokio::spawn(async move {
                deliver_one(notifier.as_ref(), &alert).await;
            });
        }
    }

    /// Deliver to every notifier in turn and wait for all of them.
    pub async fn deliver(&self, alert: &TradeAlert) {
        for notifier in &self.notifiers {
            deliver_one(notifier.as_ref(), alert).await;
        }
    }
}

async fn deliver_one(notifier: &dyn AlertNotifier, alert: &TradeAlert) {
    if let Err(e) = notifier.send_trade_alert(alert).await {
        counter!("notify_failures_total", "notifier" => notifier.name()).increment(1);
        tracing::warn!(
            notifier = notifier.name(),
            alert_id = %alert.id,
            error = %e,
            "Failed to deliver alert"
        );
    }
}
