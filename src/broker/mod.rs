pub mod adapter;
pub mod mapping;
pub mod orders;

pub use adapter::{
    AccountMetainfo, AccountSummary, AdapterConfig, BrokerTerminalAdapter, DurationMeta,
    OrderErrorHook, OrderModification, OrderPlacedHook, OrderTypeMeta, PreOrder, TerminalHost,
    TerminalOrder, TerminalPosition, SETTLE_DELAY_MS,
};
pub use mapping::{
    map_connection_state, map_order_status, map_order_type, map_side, order_type_to_backend,
    side_to_backend, ConnectionStatus, NotificationKind, OrderStatus, OrderType, Side,
};
pub use orders::{HttpOrderApi, ModifyOrderRequest, OrderApi, PlaceOrderRequest};
