// =============================================================================
// Shared types used across the Atomik bridging core
// =============================================================================

use serde::{Deserialize, Serialize};

fn default_broker_id() -> String {
    "tradovate".to_string()
}

fn default_environment() -> String {
    "demo".to_string()
}

fn default_status() -> String {
    "inactive".to_string()
}

fn default_order_type() -> String {
    "Market".to_string()
}

fn default_order_status() -> String {
    "Working".to_string()
}

fn default_time_in_force() -> String {
    "GTC".to_string()
}

/// A brokerage account as returned by the accounts REST endpoint.
///
/// The backend serves snake_case JSON; every field is default-tolerant so a
/// partial payload from an older backend revision still parses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    #[serde(default = "default_broker_id")]
    pub broker_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub day_pnl: f64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub is_token_expired: bool,
    #[serde(default)]
    pub last_connected: Option<String>,
}

/// Per-account summary pushed over the real-time account-data channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default, alias = "cashBalance")]
    pub balance: f64,
    #[serde(default, rename = "unrealizedPnL", alias = "openPL")]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub equity: Option<f64>,
}

impl AccountData {
    /// Equity as reported by the channel, or derived from balance + open P&L
    /// when the channel omits it.
    pub fn equity(&self) -> f64 {
        self.equity.unwrap_or(self.balance + self.unrealized_pnl)
    }
}

/// A position as carried on the real-time account-data channel (camelCase).
///
/// `net_pos` is signed: positive is long, negative is short. A zero value
/// means the position has been flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPosition {
    #[serde(alias = "id")]
    pub position_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, alias = "qty")]
    pub net_pos: f64,
    #[serde(default, alias = "avgPrice")]
    pub net_price: f64,
    #[serde(default, rename = "unrealizedPnL", alias = "pl")]
    pub unrealized_pnl: f64,
}

/// An order as carried on the real-time account-data channel (camelCase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOrder {
    #[serde(alias = "id")]
    pub order_id: String,
    #[serde(default)]
    pub symbol: String,
    /// "Market" | "Limit" | "Stop" | "StopLimit".
    #[serde(default = "default_order_type")]
    pub order_type: String,
    /// "Buy" | "Sell" (some broker feeds send "Long"/"Short").
    #[serde(default, alias = "side")]
    pub action: String,
    #[serde(default, alias = "qty")]
    pub order_qty: f64,
    /// Limit price, when applicable.
    #[serde(default, alias = "limitPrice")]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default = "default_order_status", alias = "status")]
    pub order_status: String,
    #[serde(default)]
    pub filled_qty: f64,
    #[serde(default, alias = "avgPrice")]
    pub avg_fill_price: f64,
    #[serde(default = "default_time_in_force")]
    pub time_in_force: String,
    /// Epoch milliseconds of the last update, when the feed provides one.
    #[serde(default)]
    pub timestamp: Option<i64>,
}
