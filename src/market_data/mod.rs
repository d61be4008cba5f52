pub mod bar;
pub mod streaming;

// Re-export the bar types for convenient access (e.g. `use crate::market_data::Bar`).
pub use bar::{apply_trade, next_bar_time, Bar, Resolution};
pub use streaming::{
    backoff_delay_ms, BarHandler, ChannelKey, OutboundFrame, StreamingClient, SubscriptionTable,
    TradeEvent, FLUSH_INTERVAL_MS, KEEPALIVE_INTERVAL_MS, MAX_RECONNECT_ATTEMPTS,
};
