// =============================================================================
// Status & Type Mapping — channel strings ⇄ terminal numeric codes
// =============================================================================
//
// The charting terminal speaks numeric constants; the real-time channel and
// the backend speak strings. Every translation between the two vocabularies
// lives here so the adapter never hand-rolls a mapping.
// =============================================================================

/// Terminal connection-status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConnectionStatus {
    Connected = 1,
    Connecting = 2,
    Disconnected = 3,
    Error = 4,
}

/// Terminal order-status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OrderStatus {
    Canceled = 1,
    Filled = 2,
    Inactive = 3,
    Placing = 4,
    Rejected = 5,
    Working = 6,
}

impl OrderStatus {
    /// Whether an order in this status belongs in the live order listing.
    pub fn is_live(self) -> bool {
        matches!(self, OrderStatus::Working | OrderStatus::Placing)
    }
}

/// Terminal order-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OrderType {
    Market = 1,
    Limit = 2,
    Stop = 3,
    StopLimit = 4,
}

/// Terminal side codes: +1 buy, -1 sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Side {
    Buy = 1,
    Sell = -1,
}

/// Severity codes for host notifications: 0 success, 1 error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum NotificationKind {
    Success = 0,
    Error = 1,
}

// ---------------------------------------------------------------------------
// Channel string → terminal code
// ---------------------------------------------------------------------------

/// Map a channel order-status string to the terminal code. Unrecognized
/// statuses default to Working.
pub fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "Working" => OrderStatus::Working,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "Canceled" | "Expired" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        "Pending" | "PendingNew" => OrderStatus::Placing,
        "Suspended" => OrderStatus::Inactive,
        _ => OrderStatus::Working,
    }
}

/// Map a channel order-type string to the terminal code. Unrecognized types
/// default to Market.
pub fn map_order_type(raw: &str) -> OrderType {
    match raw {
        "Market" => OrderType::Market,
        "Limit" => OrderType::Limit,
        "Stop" => OrderType::Stop,
        "StopLimit" => OrderType::StopLimit,
        _ => OrderType::Market,
    }
}

/// Map a channel side string to the terminal side. Unrecognized sides
/// default to buy.
pub fn map_side(raw: &str) -> Side {
    match raw {
        "Buy" | "Long" | "1" => Side::Buy,
        "Sell" | "Short" | "-1" => Side::Sell,
        _ => Side::Buy,
    }
}

/// Map a channel connection-state string to the terminal status. The
/// intermediate handshake states all render as Connecting.
pub fn map_connection_state(raw: &str) -> ConnectionStatus {
    match raw {
        "connected" | "ready" => ConnectionStatus::Connected,
        "connecting"
        | "reconnecting"
        | "validating_user"
        | "checking_subscription"
        | "checking_broker_access"
        | "connecting_to_broker" => ConnectionStatus::Connecting,
        "error" => ConnectionStatus::Error,
        _ => ConnectionStatus::Disconnected,
    }
}

// ---------------------------------------------------------------------------
// Terminal code → backend string
// ---------------------------------------------------------------------------

/// Backend order-type vocabulary for order placement payloads.
pub fn order_type_to_backend(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Stop => "STOP",
        OrderType::StopLimit => "STOP_LIMIT",
    }
}

/// Backend side vocabulary for order placement payloads.
pub fn side_to_backend(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
