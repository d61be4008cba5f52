// =============================================================================
// Broker Terminal Adapter — the charting terminal's view of one account
// =============================================================================
//
// One adapter instance is bound to one (account, broker) pair. The terminal
// host treats it as "the broker": reads are pull-based snapshots of the
// real-time account-data channel's cache, writes go to the backend's order
// REST API, and the resulting state change flows back through the channel —
// never applied optimistically.
//
// On any position or order event for the bound account the adapter rebuilds
// the entire current list from the channel cache and republishes every item
// to the host; the host's per-id reconciliation is idempotent, so the
// redundant pushes are harmless and the adapter stays stateless.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::mapping::{
    map_connection_state, map_order_status, map_order_type, map_side, order_type_to_backend,
    side_to_backend, ConnectionStatus, NotificationKind, OrderStatus, OrderType, Side,
};
use super::orders::{ModifyOrderRequest, OrderApi, PlaceOrderRequest};
use crate::account::TokenGetter;
use crate::feed::{AccountFeed, FeedEvent, FeedEventKind, FeedHandler, ListenerId};
use crate::symbols::{self, SymbolTradeInfo, TickerMap};
use crate::types::{FeedOrder, FeedPosition};

/// Delay before reporting Connected, letting the first channel snapshot
/// arrive.
pub const SETTLE_DELAY_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Host-facing data shapes
// ---------------------------------------------------------------------------

/// A position as pushed to the terminal host. `qty` is unsigned; the sign
/// lives in `side`.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalPosition {
    pub id: String,
    pub symbol: String,
    pub qty: f64,
    pub side: Side,
    pub avg_price: f64,
    pub pl: f64,
}

/// An order as pushed to the terminal host.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalOrder {
    pub id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub qty: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub avg_price: f64,
    /// "GTC" | "DAY".
    pub duration: String,
    /// Epoch seconds of the last update.
    pub update_time: i64,
}

/// Account identity row for the terminal's account selector.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountMetainfo {
    pub id: String,
    pub name: String,
    pub currency: String,
}

/// Account summary for the terminal's account manager panel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccountSummary {
    pub balance: f64,
    pub open_pl: f64,
    pub equity: f64,
}

/// An order as requested by the terminal host (display-ticker symbol).
#[derive(Debug, Clone, PartialEq)]
pub struct PreOrder {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
}

/// A modification the host requests on an existing order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderModification {
    pub order_id: String,
    pub qty: Option<f64>,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub order_type: Option<OrderType>,
}

/// Order-ticket duration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationMeta {
    pub name: &'static str,
    pub value: &'static str,
}

/// Order-ticket type option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTypeMeta {
    pub id: OrderType,
    pub name: &'static str,
}

/// Callbacks the terminal host exposes to the adapter.
pub trait TerminalHost: Send + Sync {
    fn connection_status_update(&self, status: ConnectionStatus);
    fn position_update(&self, position: TerminalPosition);
    fn order_update(&self, order: TerminalOrder);
    fn show_notification(&self, title: &str, message: &str, kind: NotificationKind);
}

/// Invoked with the new order id and normalized payload after placement.
pub type OrderPlacedHook = Arc<dyn Fn(&str, &PlaceOrderRequest) + Send + Sync>;
/// Invoked with the failure after a rejected placement.
pub type OrderErrorHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Construction parameters binding an adapter to one account.
pub struct AdapterConfig {
    pub account_id: String,
    pub broker_id: String,
    pub get_token: TokenGetter,
    pub on_order_placed: Option<OrderPlacedHook>,
    pub on_error: Option<OrderErrorHook>,
}

impl AdapterConfig {
    pub fn new(account_id: impl Into<String>, get_token: TokenGetter) -> Self {
        Self {
            account_id: account_id.into(),
            broker_id: "tradovate".to_string(),
            get_token,
            on_order_placed: None,
            on_error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct BrokerTerminalAdapter {
    host: Arc<dyn TerminalHost>,
    feed: Arc<AccountFeed>,
    api: Arc<dyn OrderApi>,
    tickers: Arc<TickerMap>,
    account_id: String,
    broker_id: String,
    get_token: TokenGetter,
    on_order_placed: Option<OrderPlacedHook>,
    on_error: Option<OrderErrorHook>,
    /// Exact (event-kind, listener-id) pairs recorded at registration so
    /// destroy() removes precisely what this adapter added.
    listeners: Mutex<Vec<(FeedEventKind, ListenerId)>>,
}

impl BrokerTerminalAdapter {
    /// Bind an adapter to one account and wire it to the channel.
    ///
    /// Registers the three channel listeners, reports Connecting to the
    /// host, and flips to Connected after a short settle delay so the first
    /// channel snapshot has a chance to arrive.
    pub fn connect(
        host: Arc<dyn TerminalHost>,
        feed: Arc<AccountFeed>,
        api: Arc<dyn OrderApi>,
        tickers: Arc<TickerMap>,
        config: AdapterConfig,
    ) -> Arc<Self> {
        info!(
            account_id = %config.account_id,
            broker_id = %config.broker_id,
            "broker terminal adapter connecting"
        );

        let adapter = Arc::new(Self {
            host,
            feed,
            api,
            tickers,
            account_id: config.account_id,
            broker_id: config.broker_id,
            get_token: config.get_token,
            on_order_placed: config.on_order_placed,
            on_error: config.on_error,
            listeners: Mutex::new(Vec::new()),
        });

        adapter.register_listeners();
        adapter.host.connection_status_update(ConnectionStatus::Connecting);

        let host = adapter.host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SETTLE_DELAY_MS)).await;
            debug!("settle delay elapsed — reporting Connected");
            host.connection_status_update(ConnectionStatus::Connected);
        });

        adapter
    }

    fn register_listeners(&self) {
        // Position updates: rebuild the open-position list and push every
        // entry; a zero-quantity event additionally emits the one-shot
        // flatten so the host drops the position.
        let position_handler: FeedHandler = {
            let host = self.host.clone();
            let feed = self.feed.clone();
            let tickers = self.tickers.clone();
            let account_id = self.account_id.clone();
            let broker_id = self.broker_id.clone();
            Arc::new(move |event| {
                let FeedEvent::Position(ev) = event else {
                    return;
                };
                if ev.account_id != account_id {
                    return;
                }
                if !ev.broker_id.is_empty() && ev.broker_id != broker_id {
                    return;
                }

                for position in feed.positions(&broker_id, &account_id) {
                    if position.net_pos != 0.0 {
                        host.position_update(transform_position(&position, &tickers));
                    }
                }

                if ev.position.net_pos == 0.0 {
                    host.position_update(TerminalPosition {
                        id: ev.position.position_id.clone(),
                        symbol: tickers.display_ticker(&ev.position.symbol),
                        qty: 0.0,
                        side: Side::Buy,
                        avg_price: 0.0,
                        pl: 0.0,
                    });
                }
            })
        };

        // Order updates: rebuild and push every order, terminal statuses
        // included — that is how fills/cancels reach the host, since the
        // listing call filters them out.
        let order_handler: FeedHandler = {
            let host = self.host.clone();
            let feed = self.feed.clone();
            let tickers = self.tickers.clone();
            let account_id = self.account_id.clone();
            let broker_id = self.broker_id.clone();
            Arc::new(move |event| {
                let FeedEvent::Order(ev) = event else {
                    return;
                };
                if ev.account_id != account_id {
                    return;
                }
                if !ev.broker_id.is_empty() && ev.broker_id != broker_id {
                    return;
                }

                for order in feed.orders(&broker_id, &account_id) {
                    host.order_update(transform_order(&order, &tickers));
                }
            })
        };

        let connection_handler: FeedHandler = {
            let host = self.host.clone();
            let account_id = self.account_id.clone();
            Arc::new(move |event| {
                let FeedEvent::Connection(ev) = event else {
                    return;
                };
                if ev.account_id != account_id {
                    return;
                }
                host.connection_status_update(map_connection_state(&ev.state));
            })
        };

        let mut listeners = self.listeners.lock();
        listeners.push((
            FeedEventKind::PositionUpdate,
            self.feed.on(FeedEventKind::PositionUpdate, position_handler),
        ));
        listeners.push((
            FeedEventKind::OrderUpdate,
            self.feed.on(FeedEventKind::OrderUpdate, order_handler),
        ));
        listeners.push((
            FeedEventKind::ConnectionState,
            self.feed.on(FeedEventKind::ConnectionState, connection_handler),
        ));
    }

    /// Unregister every listener this adapter added, by the exact pairs
    /// recorded at registration. Other adapters on the shared channel are
    /// unaffected.
    pub fn destroy(&self) {
        info!(account_id = %self.account_id, "broker terminal adapter destroyed");
        for (kind, id) in self.listeners.lock().drain(..) {
            self.feed.remove_listener(kind, id);
        }
    }

    // ── Pull-based reads (no network) ───────────────────────────────────

    pub fn current_account(&self) -> &str {
        &self.account_id
    }

    /// Account rows for the terminal's selector.
    pub fn accounts(&self) -> Vec<AccountMetainfo> {
        let name = self
            .feed
            .account_data(&self.broker_id, &self.account_id)
            .map(|data| {
                if !data.name.is_empty() {
                    data.name
                } else {
                    data.nickname.unwrap_or_default()
                }
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Trading Account".to_string());

        vec![AccountMetainfo {
            id: self.account_id.clone(),
            name,
            currency: "USD".to_string(),
        }]
    }

    /// Balance / open P&L / equity snapshot from the channel cache.
    pub fn account_info(&self) -> AccountSummary {
        self.feed
            .account_data(&self.broker_id, &self.account_id)
            .map(|data| AccountSummary {
                balance: data.balance,
                open_pl: data.unrealized_pnl,
                equity: data.equity(),
            })
            .unwrap_or_default()
    }

    /// Open positions. Flattened (zero-quantity) entries never appear here.
    pub fn positions(&self) -> Vec<TerminalPosition> {
        self.feed
            .positions(&self.broker_id, &self.account_id)
            .iter()
            .filter(|p| p.net_pos != 0.0)
            .map(|p| transform_position(p, &self.tickers))
            .collect()
    }

    /// Live orders only: Working and Placing. Terminal statuses are pushed
    /// through `order_update` events instead.
    pub fn orders(&self) -> Vec<TerminalOrder> {
        self.feed
            .orders(&self.broker_id, &self.account_id)
            .iter()
            .filter(|o| map_order_status(&o.order_status).is_live())
            .map(|o| transform_order(o, &self.tickers))
            .collect()
    }

    /// Instrument parameters for the order ticket.
    pub fn symbol_info(&self, symbol: &str) -> SymbolTradeInfo {
        symbols::trade_info(&self.tickers.display_ticker(symbol))
    }

    pub fn durations(&self) -> Vec<DurationMeta> {
        vec![
            DurationMeta { name: "GTC", value: "GTC" },
            DurationMeta { name: "DAY", value: "DAY" },
        ]
    }

    pub fn order_types(&self) -> Vec<OrderTypeMeta> {
        vec![
            OrderTypeMeta { id: OrderType::Market, name: "Market" },
            OrderTypeMeta { id: OrderType::Limit, name: "Limit" },
            OrderTypeMeta { id: OrderType::Stop, name: "Stop" },
            OrderTypeMeta { id: OrderType::StopLimit, name: "Stop Limit" },
        ]
    }

    // ── Write operations (order REST API) ───────────────────────────────

    /// Place an order. Success notifies the host and invokes the optional
    /// placed hook; failure notifies with the most specific available
    /// message, invokes the optional error hook, and re-throws. The new
    /// order itself arrives later through the channel.
    pub async fn place_order(&self, pre_order: &PreOrder) -> Result<String> {
        let request = PlaceOrderRequest {
            symbol: self.tickers.contract_ticker(&pre_order.symbol),
            side: side_to_backend(pre_order.side).to_string(),
            quantity: pre_order.qty,
            order_type: order_type_to_backend(pre_order.order_type).to_string(),
            price: pre_order.limit_price,
            stop_price: pre_order.stop_price,
        };

        let token = (self.get_token)();
        match self
            .api
            .place_order(&token, &self.account_id, &request)
            .await
        {
            Ok(order_id) => {
                info!(order_id = %order_id, symbol = %pre_order.symbol, "order placed");
                self.host.show_notification(
                    "Order Placed",
                    &format!(
                        "{} {} {} @ {}",
                        request.side, request.quantity, pre_order.symbol, request.order_type
                    ),
                    NotificationKind::Success,
                );
                if let Some(hook) = &self.on_order_placed {
                    hook(&order_id, &request);
                }
                Ok(order_id)
            }
            Err(e) => {
                warn!(error = %e, symbol = %pre_order.symbol, "order placement failed");
                self.host
                    .show_notification("Order Failed", &e.to_string(), NotificationKind::Error);
                if let Some(hook) = &self.on_error {
                    hook(&e);
                }
                Err(e)
            }
        }
    }

    /// Modify an existing order. The order service requires the order type
    /// on every modification; absent one, LIMIT is sent.
    pub async fn modify_order(&self, modification: &OrderModification) -> Result<()> {
        let request = ModifyOrderRequest {
            qty: modification.qty,
            limit_price: modification.limit_price,
            stop_price: modification.stop_price,
            order_type: modification
                .order_type
                .map(order_type_to_backend)
                .unwrap_or("LIMIT")
                .to_string(),
            is_automated: false,
        };

        let token = (self.get_token)();
        match self
            .api
            .modify_order(&token, &self.account_id, &modification.order_id, &request)
            .await
        {
            // The channel's orderUpdate event carries the change back.
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, order_id = %modification.order_id, "order modification failed");
                self.host
                    .show_notification("Modify Failed", &e.to_string(), NotificationKind::Error);
                Err(e)
            }
        }
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let token = (self.get_token)();
        match self.api.cancel_order(&token, &self.account_id, order_id).await {
            Ok(()) => {
                self.host.show_notification(
                    "Order Canceled",
                    &format!("Order #{order_id} canceled"),
                    NotificationKind::Success,
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, order_id, "order cancellation failed");
                self.host
                    .show_notification("Cancel Failed", &e.to_string(), NotificationKind::Error);
                Err(e)
            }
        }
    }

    /// Cancel a batch of orders concurrently; fails if any cancel fails.
    pub async fn cancel_orders(&self, order_ids: &[String]) -> Result<()> {
        try_join_all(order_ids.iter().map(|id| self.cancel_order(id))).await?;
        Ok(())
    }

    pub async fn close_position(&self, position_id: &str) -> Result<()> {
        let token = (self.get_token)();
        match self
            .api
            .close_position(&token, &self.account_id, position_id)
            .await
        {
            Ok(()) => {
                self.host.show_notification(
                    "Position Closed",
                    "Position closed successfully",
                    NotificationKind::Success,
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, position_id, "position close failed");
                self.host
                    .show_notification("Close Failed", &e.to_string(), NotificationKind::Error);
                Err(e)
            }
        }
    }

    pub async fn reverse_position(&self, position_id: &str) -> Result<()> {
        let token = (self.get_token)();
        match self
            .api
            .reverse_position(&token, &self.account_id, position_id)
            .await
        {
            Ok(()) => {
                self.host.show_notification(
                    "Position Reversed",
                    "Position reversed successfully",
                    NotificationKind::Success,
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, position_id, "position reverse failed");
                self.host
                    .show_notification("Reverse Failed", &e.to_string(), NotificationKind::Error);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel → host transforms
// ---------------------------------------------------------------------------

fn transform_position(position: &FeedPosition, tickers: &TickerMap) -> TerminalPosition {
    let side = if position.net_pos > 0.0 {
        Side::Buy
    } else {
        Side::Sell
    };
    TerminalPosition {
        id: position.position_id.clone(),
        symbol: tickers.display_ticker(&position.symbol),
        qty: position.net_pos.abs(),
        side,
        avg_price: position.net_price,
        pl: position.unrealized_pnl,
    }
}

fn transform_order(order: &FeedOrder, tickers: &TickerMap) -> TerminalOrder {
    TerminalOrder {
        id: order.order_id.clone(),
        symbol: tickers.display_ticker(&order.symbol),
        order_type: map_order_type(&order.order_type),
        side: map_side(&order.action),
        qty: order.order_qty,
        limit_price: order.price,
        stop_price: order.stop_price,
        status: map_order_status(&order.order_status),
        filled_qty: order.filled_qty,
        avg_price: order.avg_fill_price,
        duration: order.time_in_force.clone(),
        update_time: order
            .timestamp
            .map(|ms| ms / 1000)
            .unwrap_or_else(|| Utc::now().timestamp()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::feed::{OrderEvent, PositionEvent};

    #[derive(Debug, Clone, PartialEq)]
    enum HostCall {
        Status(ConnectionStatus),
        Position(TerminalPosition),
        Order(TerminalOrder),
        Notification(String, String, NotificationKind),
    }

    #[derive(Default)]
    struct RecordingHost {
        calls: PlMutex<Vec<HostCall>>,
    }

    impl RecordingHost {
        fn calls(&self) -> Vec<HostCall> {
            self.calls.lock().clone()
        }

        fn position_updates(&self) -> Vec<TerminalPosition> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    HostCall::Position(p) => Some(p),
                    _ => None,
                })
                .collect()
        }
    }

    impl TerminalHost for RecordingHost {
        fn connection_status_update(&self, status: ConnectionStatus) {
            self.calls.lock().push(HostCall::Status(status));
        }

        fn position_update(&self, position: TerminalPosition) {
            self.calls.lock().push(HostCall::Position(position));
        }

        fn order_update(&self, order: TerminalOrder) {
            self.calls.lock().push(HostCall::Order(order));
        }

        fn show_notification(&self, title: &str, message: &str, kind: NotificationKind) {
            self.calls.lock().push(HostCall::Notification(
                title.to_string(),
                message.to_string(),
                kind,
            ));
        }
    }

    #[derive(Default)]
    struct StubOrderApi {
        placed: PlMutex<Vec<(String, PlaceOrderRequest)>>,
        cancelled: PlMutex<Vec<String>>,
        fail_with: PlMutex<Option<String>>,
        tokens_seen: PlMutex<Vec<String>>,
    }

    impl StubOrderApi {
        fn check_fail(&self) -> Result<()> {
            if let Some(detail) = self.fail_with.lock().clone() {
                anyhow::bail!("{detail}");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OrderApi for StubOrderApi {
        async fn place_order(
            &self,
            token: &str,
            account_id: &str,
            request: &PlaceOrderRequest,
        ) -> Result<String> {
            self.tokens_seen.lock().push(token.to_string());
            self.check_fail()?;
            self.placed
                .lock()
                .push((account_id.to_string(), request.clone()));
            Ok("ord-1".to_string())
        }

        async fn modify_order(
            &self,
            _token: &str,
            _account_id: &str,
            _order_id: &str,
            _request: &ModifyOrderRequest,
        ) -> Result<()> {
            self.check_fail()
        }

        async fn cancel_order(
            &self,
            _token: &str,
            _account_id: &str,
            order_id: &str,
        ) -> Result<()> {
            self.check_fail()?;
            self.cancelled.lock().push(order_id.to_string());
            Ok(())
        }

        async fn close_position(
            &self,
            _token: &str,
            _account_id: &str,
            _position_id: &str,
        ) -> Result<()> {
            self.check_fail()
        }

        async fn reverse_position(
            &self,
            _token: &str,
            _account_id: &str,
            _position_id: &str,
        ) -> Result<()> {
            self.check_fail()
        }
    }

    struct Fixture {
        host: Arc<RecordingHost>,
        feed: Arc<AccountFeed>,
        api: Arc<StubOrderApi>,
        adapter: Arc<BrokerTerminalAdapter>,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    fn fixture() -> Fixture {
        init_tracing();
        let host = Arc::new(RecordingHost::default());
        let feed = Arc::new(AccountFeed::new());
        let api = Arc::new(StubOrderApi::default());
        let tickers = Arc::new(TickerMap::from_pairs("NQ:NQH6,ES:ESH6"));

        let get_token: TokenGetter = Arc::new(|| "tok-123".to_string());
        let adapter = BrokerTerminalAdapter::connect(
            host.clone(),
            feed.clone(),
            api.clone(),
            tickers,
            AdapterConfig::new("acc-1", get_token),
        );

        Fixture {
            host,
            feed,
            api,
            adapter,
        }
    }

    fn feed_position(id: &str, symbol: &str, net_pos: f64) -> FeedPosition {
        FeedPosition {
            position_id: id.to_string(),
            symbol: symbol.to_string(),
            net_pos,
            net_price: 21000.0,
            unrealized_pnl: 50.0,
        }
    }

    fn position_event(account: &str, id: &str, net_pos: f64) -> PositionEvent {
        PositionEvent {
            broker_id: "tradovate".to_string(),
            account_id: account.to_string(),
            position: feed_position(id, "NQH6", net_pos),
        }
    }

    fn feed_order(id: &str, status: &str) -> FeedOrder {
        FeedOrder {
            order_id: id.to_string(),
            symbol: "NQH6".to_string(),
            order_type: "Limit".to_string(),
            action: "Buy".to_string(),
            order_qty: 2.0,
            price: Some(21000.5),
            stop_price: None,
            order_status: status.to_string(),
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            time_in_force: "GTC".to_string(),
            timestamp: Some(1_700_000_000_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_connecting_then_connected_after_settle() {
        let fx = fixture();
        assert_eq!(
            fx.host.calls(),
            vec![HostCall::Status(ConnectionStatus::Connecting)]
        );

        tokio::time::sleep(Duration::from_millis(SETTLE_DELAY_MS + 10)).await;
        assert_eq!(
            fx.host.calls(),
            vec![
                HostCall::Status(ConnectionStatus::Connecting),
                HostCall::Status(ConnectionStatus::Connected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flatten_event_emits_once_and_vanishes_from_listing() {
        let fx = fixture();

        fx.feed
            .apply_position_update(position_event("acc-1", "p-1", 3.0));
        assert_eq!(fx.adapter.positions().len(), 1);

        let before = fx.host.position_updates().len();
        fx.feed
            .apply_position_update(position_event("acc-1", "p-1", 0.0));

        let pushed: Vec<TerminalPosition> = fx.host.position_updates()[before..].to_vec();
        // The flattened position is gone from the cache, so the rebuild
        // pushes nothing and the flatten event is the single emission.
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].id, "p-1");
        assert_eq!(pushed[0].qty, 0.0);
        assert_eq!(pushed[0].side, Side::Buy);
        assert_eq!(pushed[0].symbol, "NQ");

        assert!(fx.adapter.positions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn events_for_other_accounts_are_ignored() {
        let fx = fixture();

        fx.feed
            .apply_position_update(position_event("acc-other", "p-9", 1.0));

        assert!(fx.host.position_updates().is_empty());
        assert!(fx.adapter.positions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn position_listing_translates_and_signs() {
        let fx = fixture();
        fx.feed
            .apply_position_update(position_event("acc-1", "p-1", -2.0));

        let positions = fx.adapter.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "NQ");
        assert_eq!(positions[0].qty, 2.0);
        assert_eq!(positions[0].side, Side::Sell);
        assert_eq!(positions[0].avg_price, 21000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn order_listing_filters_to_live_statuses() {
        let fx = fixture();
        for (id, status) in [
            ("o-1", "Working"),
            ("o-2", "Filled"),
            ("o-3", "Pending"),
            ("o-4", "Cancelled"),
        ] {
            fx.feed.apply_order_update(OrderEvent {
                broker_id: "tradovate".to_string(),
                account_id: "acc-1".to_string(),
                order: feed_order(id, status),
            });
        }

        let orders = fx.adapter.orders();
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o-1", "o-3"]);
        assert_eq!(orders[0].symbol, "NQ");
        assert_eq!(orders[0].update_time, 1_700_000_000);

        // Every order (terminal statuses included) was pushed as an update
        // event when it arrived: 1 + 2 + 3 + 4 rebuild pushes.
        let pushed = fx
            .host
            .calls()
            .iter()
            .filter(|c| matches!(c, HostCall::Order(_)))
            .count();
        assert_eq!(pushed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn place_order_success_notifies_and_invokes_hook() {
        let host = Arc::new(RecordingHost::default());
        let feed = Arc::new(AccountFeed::new());
        let api = Arc::new(StubOrderApi::default());
        let tickers = Arc::new(TickerMap::from_pairs("NQ:NQH6"));

        let hook_seen: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
        let hook: OrderPlacedHook = {
            let hook_seen = hook_seen.clone();
            Arc::new(move |order_id, request| {
                hook_seen
                    .lock()
                    .push(format!("{order_id}:{}", request.symbol));
            })
        };

        let get_token: TokenGetter = Arc::new(|| "tok-123".to_string());
        let mut config = AdapterConfig::new("acc-1", get_token);
        config.on_order_placed = Some(hook);

        let adapter =
            BrokerTerminalAdapter::connect(host.clone(), feed, api.clone(), tickers, config);

        let order_id = adapter
            .place_order(&PreOrder {
                symbol: "NQ".to_string(),
                side: Side::Buy,
                qty: 2.0,
                order_type: OrderType::Limit,
                limit_price: Some(21000.5),
                stop_price: None,
            })
            .await
            .expect("placement");

        assert_eq!(order_id, "ord-1");
        // The payload carries the contract ticker and backend vocabulary.
        let placed = api.placed.lock();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].0, "acc-1");
        assert_eq!(placed[0].1.symbol, "NQH6");
        assert_eq!(placed[0].1.side, "BUY");
        assert_eq!(placed[0].1.order_type, "LIMIT");
        assert_eq!(api.tokens_seen.lock()[0], "tok-123");

        assert_eq!(hook_seen.lock().as_slice(), &["ord-1:NQH6".to_string()]);
        assert!(host.calls().iter().any(|c| matches!(
            c,
            HostCall::Notification(title, _, NotificationKind::Success) if title == "Order Placed"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn place_order_failure_surfaces_server_detail() {
        let host = Arc::new(RecordingHost::default());
        let feed = Arc::new(AccountFeed::new());
        let api = Arc::new(StubOrderApi::default());
        *api.fail_with.lock() = Some("Insufficient margin".to_string());
        let tickers = Arc::new(TickerMap::default());

        let errored = Arc::new(AtomicBool::new(false));
        let error_hook: OrderErrorHook = {
            let errored = errored.clone();
            Arc::new(move |_| errored.store(true, Ordering::SeqCst))
        };

        let get_token: TokenGetter = Arc::new(|| "tok-123".to_string());
        let mut config = AdapterConfig::new("acc-1", get_token);
        config.on_error = Some(error_hook);

        let adapter = BrokerTerminalAdapter::connect(host.clone(), feed, api, tickers, config);

        let err = adapter
            .place_order(&PreOrder {
                symbol: "NQ".to_string(),
                side: Side::Sell,
                qty: 1.0,
                order_type: OrderType::Market,
                limit_price: None,
                stop_price: None,
            })
            .await
            .expect_err("should fail");

        assert_eq!(err.to_string(), "Insufficient margin");
        assert!(errored.load(Ordering::SeqCst));
        assert!(host.calls().iter().any(|c| matches!(
            c,
            HostCall::Notification(title, message, NotificationKind::Error)
                if title == "Order Failed" && message == "Insufficient margin"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_orders_runs_each_cancel() {
        let fx = fixture();
        fx.adapter
            .cancel_orders(&["o-1".to_string(), "o-2".to_string()])
            .await
            .expect("cancel batch");

        let mut cancelled = fx.api.cancelled.lock().clone();
        cancelled.sort();
        assert_eq!(cancelled, vec!["o-1".to_string(), "o-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_state_events_translate_for_the_host() {
        let fx = fixture();
        let before = fx.host.calls().len();

        fx.feed.apply_connection_state("acc-1", "reconnecting");
        fx.feed.apply_connection_state("acc-1", "ready");
        fx.feed.apply_connection_state("acc-other", "error");

        let statuses: Vec<ConnectionStatus> = fx.host.calls()[before..]
            .iter()
            .filter_map(|c| match c {
                HostCall::Status(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_unregisters_only_this_adapters_listeners() {
        let fx = fixture();

        // A second adapter shares the channel.
        let other_host = Arc::new(RecordingHost::default());
        let get_token: TokenGetter = Arc::new(|| String::new());
        let other = BrokerTerminalAdapter::connect(
            other_host.clone(),
            fx.feed.clone(),
            fx.api.clone(),
            Arc::new(TickerMap::default()),
            AdapterConfig::new("acc-1", get_token),
        );

        assert_eq!(fx.feed.listener_count(FeedEventKind::PositionUpdate), 2);

        fx.adapter.destroy();
        assert_eq!(fx.feed.listener_count(FeedEventKind::PositionUpdate), 1);
        assert_eq!(fx.feed.listener_count(FeedEventKind::OrderUpdate), 1);
        assert_eq!(fx.feed.listener_count(FeedEventKind::ConnectionState), 1);

        // The destroyed adapter's host hears nothing; the survivor still does.
        let before = fx.host.calls().len();
        fx.feed
            .apply_position_update(position_event("acc-1", "p-1", 1.0));
        assert_eq!(fx.host.calls().len(), before);
        assert!(!other_host.position_updates().is_empty());

        other.destroy();
        assert_eq!(fx.feed.listener_count(FeedEventKind::PositionUpdate), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn account_info_reads_channel_snapshot() {
        let fx = fixture();
        assert_eq!(fx.adapter.account_info(), AccountSummary::default());

        fx.feed.apply_account_data(
            "tradovate",
            "acc-1",
            crate::types::AccountData {
                name: "Eval 50K".to_string(),
                balance: 50_000.0,
                unrealized_pnl: 125.5,
                ..Default::default()
            },
        );

        let info = fx.adapter.account_info();
        assert_eq!(info.balance, 50_000.0);
        assert_eq!(info.open_pl, 125.5);
        assert_eq!(info.equity, 50_125.5);

        let accounts = fx.adapter.accounts();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Eval 50K");
        assert_eq!(accounts[0].currency, "USD");
    }

    #[tokio::test(start_paused = true)]
    async fn symbol_info_resolves_contract_tickers() {
        let fx = fixture();
        // The channel hands back contract tickers; the ticket needs the
        // display instrument's parameters.
        let info = fx.adapter.symbol_info("NQH6");
        assert_eq!(info.min_tick, 0.25);
        assert_eq!(info.description, "E-mini Nasdaq-100");
    }
}
