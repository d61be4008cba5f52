// =============================================================================
// Account Feed — the real-time account-data channel's in-process half
// =============================================================================
//
// Caches the latest account/position/order state pushed by the backend's
// real-time channel and fans events out to registered listeners. Records are
// created and destroyed exclusively by ingestion: this module never
// originates domain data, only caches and forwards it.
//
// A position whose net quantity reaches zero is evicted from the cache at
// ingestion time — snapshots taken afterwards do not contain it — while the
// zero-quantity event itself still reaches listeners exactly once so they
// can surface the flatten.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::types::{AccountData, FeedOrder, FeedPosition};

/// Identity of one listener registration, used for exact deregistration.
pub type ListenerId = Uuid;

/// Callback registered for one event class.
pub type FeedHandler = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// The three event classes the channel publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedEventKind {
    PositionUpdate,
    OrderUpdate,
    ConnectionState,
}

/// A position change on one account.
#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub broker_id: String,
    pub account_id: String,
    pub position: FeedPosition,
}

/// An order change on one account.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub broker_id: String,
    pub account_id: String,
    pub order: FeedOrder,
}

/// A connection-state change for one account's broker link. `state` carries
/// the channel's raw vocabulary ("connected", "reconnecting",
/// "validating_user", ...).
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub account_id: String,
    pub state: String,
}

/// Event envelope delivered to listeners.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Position(PositionEvent),
    Order(OrderEvent),
    Connection(ConnectionEvent),
}

fn feed_key(broker_id: &str, account_id: &str) -> String {
    format!("{broker_id}:{account_id}")
}

/// Shared cache + listener registry for the account-data channel.
#[derive(Default)]
pub struct AccountFeed {
    account_data: RwLock<HashMap<String, AccountData>>,
    positions: RwLock<HashMap<String, HashMap<String, FeedPosition>>>,
    orders: RwLock<HashMap<String, HashMap<String, FeedOrder>>>,
    listeners: RwLock<HashMap<FeedEventKind, Vec<(ListenerId, FeedHandler)>>>,
}

impl AccountFeed {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Listener registry ───────────────────────────────────────────────

    /// Register a listener for one event class. The returned id is the only
    /// handle for deregistration — callers must record it.
    pub fn on(&self, kind: FeedEventKind, handler: FeedHandler) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one listener by its exact (event-kind, id) pair.
    pub fn remove_listener(&self, kind: FeedEventKind, id: ListenerId) {
        if let Some(entries) = self.listeners.write().get_mut(&kind) {
            entries.retain(|(lid, _)| *lid != id);
        }
    }

    /// Number of registered listeners for an event class.
    pub fn listener_count(&self, kind: FeedEventKind) -> usize {
        self.listeners
            .read()
            .get(&kind)
            .map_or(0, |entries| entries.len())
    }

    fn dispatch(&self, kind: FeedEventKind, event: &FeedEvent) {
        // Clone the handler list first so a listener can (de)register from
        // inside its own callback without deadlocking.
        let handlers: Vec<FeedHandler> = self
            .listeners
            .read()
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(event);
        }
    }

    // ── Snapshot accessors ──────────────────────────────────────────────

    pub fn account_data(&self, broker_id: &str, account_id: &str) -> Option<AccountData> {
        self.account_data
            .read()
            .get(&feed_key(broker_id, account_id))
            .cloned()
    }

    /// Current positions for one account, ordered by position id.
    pub fn positions(&self, broker_id: &str, account_id: &str) -> Vec<FeedPosition> {
        let mut positions: Vec<FeedPosition> = self
            .positions
            .read()
            .get(&feed_key(broker_id, account_id))
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        positions.sort_by(|a, b| a.position_id.cmp(&b.position_id));
        positions
    }

    /// Current orders for one account, ordered by order id.
    pub fn orders(&self, broker_id: &str, account_id: &str) -> Vec<FeedOrder> {
        let mut orders: Vec<FeedOrder> = self
            .orders
            .read()
            .get(&feed_key(broker_id, account_id))
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    /// Store an account summary pushed by the channel.
    pub fn apply_account_data(&self, broker_id: &str, account_id: &str, data: AccountData) {
        self.account_data
            .write()
            .insert(feed_key(broker_id, account_id), data);
    }

    /// Ingest a position update and notify listeners. A zero-quantity
    /// position is evicted rather than stored.
    pub fn apply_position_update(&self, event: PositionEvent) {
        let key = feed_key(&event.broker_id, &event.account_id);
        {
            let mut positions = self.positions.write();
            let by_id = positions.entry(key).or_default();
            if event.position.net_pos == 0.0 {
                by_id.remove(&event.position.position_id);
                debug!(
                    position_id = %event.position.position_id,
                    "flattened position evicted from feed cache"
                );
            } else {
                by_id.insert(event.position.position_id.clone(), event.position.clone());
            }
        }

        self.dispatch(FeedEventKind::PositionUpdate, &FeedEvent::Position(event));
    }

    /// Ingest an order update and notify listeners. Orders are kept in the
    /// cache whatever their status; consumers filter by liveness.
    pub fn apply_order_update(&self, event: OrderEvent) {
        let key = feed_key(&event.broker_id, &event.account_id);
        self.orders
            .write()
            .entry(key)
            .or_default()
            .insert(event.order.order_id.clone(), event.order.clone());

        self.dispatch(FeedEventKind::OrderUpdate, &FeedEvent::Order(event));
    }

    /// Forward a connection-state change to listeners.
    pub fn apply_connection_state(&self, account_id: &str, state: &str) {
        self.dispatch(
            FeedEventKind::ConnectionState,
            &FeedEvent::Connection(ConnectionEvent {
                account_id: account_id.to_string(),
                state: state.to_string(),
            }),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn position(id: &str, net_pos: f64) -> FeedPosition {
        FeedPosition {
            position_id: id.to_string(),
            symbol: "NQH6".to_string(),
            net_pos,
            net_price: 21000.0,
            unrealized_pnl: 0.0,
        }
    }

    fn position_event(id: &str, net_pos: f64) -> PositionEvent {
        PositionEvent {
            broker_id: "tradovate".to_string(),
            account_id: "acc-1".to_string(),
            position: position(id, net_pos),
        }
    }

    #[test]
    fn zero_quantity_positions_are_evicted() {
        let feed = AccountFeed::new();
        feed.apply_position_update(position_event("p-1", 3.0));
        feed.apply_position_update(position_event("p-2", -1.0));
        assert_eq!(feed.positions("tradovate", "acc-1").len(), 2);

        feed.apply_position_update(position_event("p-1", 0.0));
        let remaining = feed.positions("tradovate", "acc-1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].position_id, "p-2");
    }

    #[test]
    fn listeners_receive_events_until_removed() {
        let feed = AccountFeed::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let handler: FeedHandler = {
            let seen = seen.clone();
            Arc::new(move |event| {
                if let FeedEvent::Position(ev) = event {
                    seen.lock().push(ev.position.position_id.clone());
                }
            })
        };
        let id = feed.on(FeedEventKind::PositionUpdate, handler);
        assert_eq!(feed.listener_count(FeedEventKind::PositionUpdate), 1);

        feed.apply_position_update(position_event("p-1", 1.0));
        assert_eq!(seen.lock().as_slice(), &["p-1".to_string()]);

        feed.remove_listener(FeedEventKind::PositionUpdate, id);
        assert_eq!(feed.listener_count(FeedEventKind::PositionUpdate), 0);

        feed.apply_position_update(position_event("p-2", 1.0));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn accounts_are_isolated_by_key() {
        let feed = AccountFeed::new();
        feed.apply_position_update(position_event("p-1", 2.0));

        assert!(feed.positions("tradovate", "acc-other").is_empty());
        assert!(feed.positions("interactivebrokers", "acc-1").is_empty());
        assert_eq!(feed.positions("tradovate", "acc-1").len(), 1);
    }

    #[test]
    fn connection_state_reaches_listeners() {
        let feed = AccountFeed::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let handler: FeedHandler = {
            let seen = seen.clone();
            Arc::new(move |event| {
                if let FeedEvent::Connection(ev) = event {
                    seen.lock().push(ev.state.clone());
                }
            })
        };
        feed.on(FeedEventKind::ConnectionState, handler);

        feed.apply_connection_state("acc-1", "reconnecting");
        assert_eq!(seen.lock().as_slice(), &["reconnecting".to_string()]);
    }
}
