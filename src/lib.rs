// =============================================================================
// Atomik Bridge — real-time data synchronization and broker bridging core
// =============================================================================
//
// Three cooperating layers keep the trading dashboard consistent with live
// brokerage state and streaming market data:
//
//   - market_data: one shared WebSocket to the tick-data service, multiplexed
//     per (symbol, resolution), aggregating trades into bars with batched
//     delivery.
//   - account: the brokerage-account cache — rate-limited REST refresh,
//     significant-field diffing, observer fan-out with snapshot replay.
//   - feed + broker: the real-time account-data channel and the per-account
//     adapter that presents it to an external charting terminal, translating
//     between string and numeric protocol vocabularies in both directions.
//
// The application constructs these as plain values and shares them via Arc;
// nothing in here is a global.
// =============================================================================

pub mod account;
pub mod broker;
pub mod config;
pub mod feed;
pub mod market_data;
pub mod symbols;
pub mod types;

pub use account::{AccountCache, AccountEvent, AccountPatch, AccountsApi, HttpAccountsApi};
pub use broker::{
    AdapterConfig, BrokerTerminalAdapter, ConnectionStatus, HttpOrderApi, NotificationKind,
    OrderApi, OrderStatus, OrderType, Side, TerminalHost, TerminalOrder, TerminalPosition,
};
pub use config::BridgeConfig;
pub use feed::{AccountFeed, FeedEvent, FeedEventKind};
pub use market_data::{Bar, Resolution, StreamingClient};
pub use symbols::TickerMap;
pub use types::{AccountData, AccountRecord, FeedOrder, FeedPosition};
