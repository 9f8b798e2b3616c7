use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Positions (Data API /positions)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPosition {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub size: Decimal,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub initial_value: Decimal,
    #[serde(default)]
    pub current_value: Decimal,
    #[serde(default)]
    pub cash_pnl: Decimal,
    #[serde(default)]
    pub cur_price: Decimal,
    #[serde(default)]
    pub redeemable: bool,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub outcome_index: Option<u32>,
}

// ---------------------------------------------------------------------------
// Closed positions (Data API /closed-positions)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiClosedPosition {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub total_bought: Decimal,
    #[serde(default)]
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub cur_price: Decimal,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ApiClosedPosition {
    /// Capital put into the position.
    pub fn cost_basis(&self) -> Decimal {
        self.avg_price * self.total_bought
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Activity (Data API /activity)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiActivity {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub condition_id: String,
    #[serde(default, rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub size: Decimal,
    #[serde(default)]
    pub usdc_size: Decimal,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

impl ApiActivity {
    pub fn is_trade(&self) -> bool {
        self.activity_type.eq_ignore_ascii_case("TRADE")
    }
}

// ---------------------------------------------------------------------------
// Trade (Data API /trades)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTrade {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// WebSocket subscription messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WsSubscribe {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub assets_ids: Vec<String>,
}

impl WsSubscribe {
    /// Polymarket WS format: {"type": "market", "assets_ids": ["id1", "id2", ...]}
    pub fn market(asset_ids: &[String]) -> Self {
        Self {
            msg_type: "market".into(),
            assets_ids: asset_ids.to_vec(),
        }
    }
}

/// Dynamic subscription change on an open market channel.
#[derive(Debug, Clone, Serialize)]
pub struct WsSubscriptionUpdate {
    pub assets_ids: Vec<String>,
    pub operation: String,
}

impl WsSubscriptionUpdate {
    pub fn subscribe(asset_ids: &[String]) -> Self {
        Self {
            assets_ids: asset_ids.to_vec(),
            operation: "subscribe".into(),
        }
    }

    pub fn unsubscribe(asset_ids: &[String]) -> Self {
        Self {
            assets_ids: asset_ids.to_vec(),
            operation: "unsubscribe".into(),
        }
    }
}
