// =============================================================================
// Account Synchronization Cache — de-duplicated account state with fan-out
// =============================================================================
//
// Holds the in-memory view of the user's brokerage accounts, refreshed from
// the accounts REST endpoint under rate limiting, and republishes only
// meaningful deltas to any number of observers. A record is replaced (and an
// update event emitted) only when one of the significant fields changed;
// everything else is noise from the UI's perspective.
//
// Observers never start blind: a new subscriber immediately receives a bulk
// snapshot of the current cache before any incremental event. A bulk event
// also always eventually follows any add/remove, so a bulk-only consumer
// cannot permanently diverge from an incremental one.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::AccountsApi;
use crate::types::AccountRecord;

/// Minimum spacing between un-forced fetches.
pub const FETCH_COOLDOWN: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Incremental or bulk change notification published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccountEvent {
    /// One account was added or meaningfully changed.
    Update { account: AccountRecord },
    /// One account disappeared.
    Remove { account_id: String },
    /// Full-list refresh point.
    Bulk { accounts: Vec<AccountRecord> },
}

/// Receiving end of an observer registration.
pub struct AccountUpdates {
    rx: mpsc::UnboundedReceiver<AccountEvent>,
}

impl AccountUpdates {
    pub async fn recv(&mut self) -> Option<AccountEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive (drains in tests and render loops).
    pub fn try_recv(&mut self) -> Option<AccountEvent> {
        self.rx.try_recv().ok()
    }
}

/// Locally-merged field changes for [`AccountCache::update_account`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPatch {
    pub status: Option<String>,
    pub balance: Option<f64>,
    pub nickname: Option<String>,
    pub active: Option<bool>,
    pub is_token_expired: Option<bool>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Process-wide account cache. Constructed once by the application and
/// shared via `Arc`; every UI panel observes the same instance.
pub struct AccountCache {
    api: Arc<dyn AccountsApi>,
    accounts: RwLock<HashMap<String, AccountRecord>>,
    observers: RwLock<Vec<(Uuid, mpsc::UnboundedSender<AccountEvent>)>>,
    last_fetch: Mutex<Option<Instant>>,
    fetching: AtomicBool,
}

impl AccountCache {
    pub fn new(api: Arc<dyn AccountsApi>) -> Self {
        Self {
            api,
            accounts: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            last_fetch: Mutex::new(None),
            fetching: AtomicBool::new(false),
        }
    }

    // ── Observation ─────────────────────────────────────────────────────

    /// Register an observer. The stream immediately yields a bulk snapshot
    /// of the current cache contents (if non-empty) before any future
    /// incremental event.
    pub fn subscribe(&self) -> AccountUpdates {
        let (tx, rx) = mpsc::unbounded_channel();

        let snapshot = self.snapshot();
        if !snapshot.is_empty() {
            let _ = tx.send(AccountEvent::Bulk { accounts: snapshot });
        }

        self.observers.write().push((Uuid::new_v4(), tx));
        AccountUpdates { rx }
    }

    fn publish(&self, event: AccountEvent) {
        let mut observers = self.observers.write();
        observers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn get_account(&self, account_id: &str) -> Option<AccountRecord> {
        self.accounts.read().get(account_id).cloned()
    }

    /// All cached accounts, ordered by account id for stable iteration.
    pub fn snapshot(&self) -> Vec<AccountRecord> {
        let mut accounts: Vec<AccountRecord> = self.accounts.read().values().cloned().collect();
        accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    // ── Fetch ───────────────────────────────────────────────────────────

    /// Refresh the cache from the backend.
    ///
    /// Rate limited: a call while another fetch is in flight, or within the
    /// cooldown of the last fetch, returns the current cached snapshot
    /// without a new network call (unless `force` is set). A failed fetch
    /// propagates to the caller and leaves the cache untouched.
    pub async fn fetch_accounts(&self, force: bool) -> Result<Vec<AccountRecord>> {
        if !force && self.fetching.load(Ordering::SeqCst) {
            debug!("account fetch already in flight — returning cached snapshot");
            return Ok(self.snapshot());
        }

        if !force {
            let last = self.last_fetch.lock();
            if let Some(at) = *last {
                if at.elapsed() < FETCH_COOLDOWN {
                    debug!("account fetch on cooldown — returning cached snapshot");
                    return Ok(self.snapshot());
                }
            }
        }

        self.fetching.store(true, Ordering::SeqCst);
        info!("fetching accounts");
        let result = self.api.fetch_accounts().await;
        self.fetching.store(false, Ordering::SeqCst);

        let fetched = result?;
        *self.last_fetch.lock() = Some(Instant::now());

        self.apply_fetched(fetched);
        Ok(self.snapshot())
    }

    /// Diff a fetch response against the cache and publish the deltas.
    ///
    /// A cached record is only replaced (emitting `Update`) when a
    /// significant field differs. Records absent from the response are
    /// removed (emitting `Remove`). One trailing `Bulk` follows if anything
    /// changed.
    pub fn apply_fetched(&self, fetched: Vec<AccountRecord>) {
        let mut updates: Vec<AccountRecord> = Vec::new();
        let mut removals: HashSet<String> = self.accounts.read().keys().cloned().collect();

        {
            let cached = self.accounts.read();
            for account in fetched {
                removals.remove(&account.account_id);
                let changed = match cached.get(&account.account_id) {
                    Some(existing) => has_significant_change(existing, &account),
                    None => true,
                };
                if changed {
                    updates.push(account);
                }
            }
        }

        let any_change = !updates.is_empty() || !removals.is_empty();

        {
            let mut cached = self.accounts.write();
            for account in &updates {
                cached.insert(account.account_id.clone(), account.clone());
            }
            for account_id in &removals {
                cached.remove(account_id);
            }
        }

        debug!(
            updates = updates.len(),
            removals = removals.len(),
            "account fetch applied"
        );

        for account in updates {
            self.publish(AccountEvent::Update { account });
        }
        for account_id in removals {
            self.publish(AccountEvent::Remove { account_id });
        }
        if any_change {
            self.publish(AccountEvent::Bulk {
                accounts: self.snapshot(),
            });
        }
    }

    // ── Mutation ────────────────────────────────────────────────────────

    /// Merge fields into a cached record and republish both an update and a
    /// bulk event.
    ///
    /// Returns `false` (a no-op, not an error) when the account is unknown,
    /// since an update can legitimately race a removal.
    pub fn update_account(&self, account_id: &str, patch: AccountPatch) -> bool {
        let updated = {
            let mut cached = self.accounts.write();
            let Some(account) = cached.get_mut(account_id) else {
                debug!(account_id, "update for unknown account ignored");
                return false;
            };

            if let Some(status) = patch.status {
                account.status = status;
            }
            if let Some(balance) = patch.balance {
                account.balance = balance;
            }
            if let Some(nickname) = patch.nickname {
                account.nickname = Some(nickname);
            }
            if let Some(active) = patch.active {
                account.active = active;
            }
            if let Some(expired) = patch.is_token_expired {
                account.is_token_expired = expired;
            }
            account.clone()
        };

        self.publish(AccountEvent::Update { account: updated });
        self.publish(AccountEvent::Bulk {
            accounts: self.snapshot(),
        });
        true
    }

    /// Rename an account through the backend, then merge the nickname
    /// locally. The cache is untouched when the API call fails.
    pub async fn rename_account(&self, account_id: &str, nickname: &str) -> Result<bool> {
        self.api.update_nickname(account_id, nickname).await?;
        Ok(self.update_account(
            account_id,
            AccountPatch {
                nickname: Some(nickname.to_string()),
                ..Default::default()
            },
        ))
    }

    /// Remove an account: deprovision through the broker-appropriate
    /// endpoint, then delete the local record and publish `Remove` followed
    /// by a `Bulk` refresh point. On API failure the cache entry is left
    /// untouched and the error propagates.
    pub async fn remove_account(&self, account_id: &str) -> Result<()> {
        let account = self
            .get_account(account_id)
            .with_context(|| format!("unknown account {account_id}"))?;

        if let Err(e) = self.api.remove_account(&account).await {
            warn!(account_id, error = %e, "account removal failed — cache left untouched");
            return Err(e);
        }

        self.accounts.write().remove(account_id);

        info!(account_id, "account removed");
        self.publish(AccountEvent::Remove {
            account_id: account_id.to_string(),
        });
        self.publish(AccountEvent::Bulk {
            accounts: self.snapshot(),
        });
        Ok(())
    }
}

/// Fields whose change is meaningful enough to republish.
fn has_significant_change(existing: &AccountRecord, updated: &AccountRecord) -> bool {
    existing.status != updated.status
        || existing.balance != updated.balance
        || existing.is_token_expired != updated.is_token_expired
        || existing.active != updated.active
        || existing.nickname != updated.nickname
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;

    /// Scripted backend double: serves canned listings, records removals,
    /// optionally fails.
    #[derive(Default)]
    struct StubApi {
        listing: PlMutex<Vec<AccountRecord>>,
        fetch_calls: PlMutex<u32>,
        removed: PlMutex<Vec<String>>,
        fail_remove: AtomicBool,
    }

    #[async_trait]
    impl AccountsApi for StubApi {
        async fn fetch_accounts(&self) -> Result<Vec<AccountRecord>> {
            *self.fetch_calls.lock() += 1;
            Ok(self.listing.lock().clone())
        }

        async fn remove_account(&self, account: &AccountRecord) -> Result<()> {
            if self.fail_remove.load(Ordering::SeqCst) {
                anyhow::bail!("Account is still provisioning");
            }
            self.removed.lock().push(account.account_id.clone());
            Ok(())
        }

        async fn update_nickname(&self, _account_id: &str, _nickname: &str) -> Result<()> {
            Ok(())
        }
    }

    fn account(id: &str, balance: f64) -> AccountRecord {
        AccountRecord {
            account_id: id.to_string(),
            broker_id: "tradovate".to_string(),
            name: format!("Account {id}"),
            nickname: None,
            environment: "demo".to_string(),
            status: "active".to_string(),
            balance,
            day_pnl: 0.0,
            active: true,
            is_token_expired: false,
            last_connected: None,
        }
    }

    fn drain(updates: &mut AccountUpdates) -> Vec<AccountEvent> {
        let mut events = Vec::new();
        while let Some(event) = updates.try_recv() {
            events.push(event);
        }
        events
    }

    fn new_cache(api: Arc<StubApi>) -> AccountCache {
        AccountCache::new(api)
    }

    #[test]
    fn identical_fetch_is_event_silent() {
        let cache = new_cache(Arc::new(StubApi::default()));
        let mut updates = cache.subscribe();

        cache.apply_fetched(vec![account("1", 100.0), account("2", 200.0)]);
        let first = drain(&mut updates);
        // Two updates plus the trailing bulk.
        assert_eq!(first.len(), 3);
        assert!(matches!(first.last(), Some(AccountEvent::Bulk { .. })));

        // The same listing again: nothing to say.
        cache.apply_fetched(vec![account("1", 100.0), account("2", 200.0)]);
        assert!(drain(&mut updates).is_empty());
    }

    #[test]
    fn only_significant_fields_emit_updates() {
        let cache = new_cache(Arc::new(StubApi::default()));
        cache.apply_fetched(vec![account("1", 100.0)]);
        let mut updates = cache.subscribe();
        drain(&mut updates); // initial bulk replay

        // A non-significant field changes (day_pnl): silence.
        let mut same = account("1", 100.0);
        same.day_pnl = 55.5;
        cache.apply_fetched(vec![same]);
        assert!(drain(&mut updates).is_empty());

        // Balance changes: exactly one update (plus the trailing bulk).
        cache.apply_fetched(vec![account("1", 150.0)]);
        let events = drain(&mut updates);
        let update_count = events
            .iter()
            .filter(|e| matches!(e, AccountEvent::Update { .. }))
            .count();
        assert_eq!(update_count, 1);
        assert!(matches!(events.last(), Some(AccountEvent::Bulk { .. })));
    }

    #[test]
    fn vanished_accounts_emit_remove_and_bulk() {
        let cache = new_cache(Arc::new(StubApi::default()));
        cache.apply_fetched(vec![account("1", 100.0), account("2", 200.0)]);
        let mut updates = cache.subscribe();
        drain(&mut updates);

        cache.apply_fetched(vec![account("1", 100.0)]);
        let events = drain(&mut updates);
        assert!(events
            .iter()
            .any(|e| matches!(e, AccountEvent::Remove { account_id } if account_id == "2")));
        assert!(matches!(events.last(), Some(AccountEvent::Bulk { .. })));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn new_subscriber_gets_bulk_replay() {
        let cache = new_cache(Arc::new(StubApi::default()));
        cache.apply_fetched(vec![account("1", 100.0), account("2", 200.0)]);

        // Subscribing after population: the first event is the snapshot.
        let mut updates = cache.subscribe();
        let events = drain(&mut updates);
        assert_eq!(events.len(), 1);
        match &events[0] {
            AccountEvent::Bulk { accounts } => {
                assert_eq!(accounts.len(), 2);
                assert_eq!(accounts[0].account_id, "1");
            }
            other => panic!("expected bulk replay, got {other:?}"),
        }

        // An empty cache replays nothing.
        let empty = new_cache(Arc::new(StubApi::default()));
        let mut updates = empty.subscribe();
        assert!(drain(&mut updates).is_empty());
    }

    #[test]
    fn update_account_merges_and_republishes() {
        let cache = new_cache(Arc::new(StubApi::default()));
        cache.apply_fetched(vec![account("1", 100.0)]);
        let mut updates = cache.subscribe();
        drain(&mut updates);

        let applied = cache.update_account(
            "1",
            AccountPatch {
                nickname: Some("Main".to_string()),
                balance: Some(123.0),
                ..Default::default()
            },
        );
        assert!(applied);

        let events = drain(&mut updates);
        assert_eq!(events.len(), 2);
        match &events[0] {
            AccountEvent::Update { account } => {
                assert_eq!(account.nickname.as_deref(), Some("Main"));
                assert_eq!(account.balance, 123.0);
                assert_eq!(account.status, "active"); // untouched fields survive
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(matches!(events[1], AccountEvent::Bulk { .. }));

        // Unknown id: no-op failure, no events.
        assert!(!cache.update_account("ghost", AccountPatch::default()));
        assert!(drain(&mut updates).is_empty());
    }

    #[tokio::test]
    async fn cooldown_returns_cached_snapshot_without_refetch() {
        let api = Arc::new(StubApi::default());
        *api.listing.lock() = vec![account("1", 100.0)];
        let cache = new_cache(api.clone());

        let first = cache.fetch_accounts(false).await.expect("fetch");
        assert_eq!(first.len(), 1);
        assert_eq!(*api.fetch_calls.lock(), 1);

        // Within the cooldown: served from cache.
        let second = cache.fetch_accounts(false).await.expect("fetch");
        assert_eq!(second.len(), 1);
        assert_eq!(*api.fetch_calls.lock(), 1);

        // Forced: hits the network again.
        cache.fetch_accounts(true).await.expect("fetch");
        assert_eq!(*api.fetch_calls.lock(), 2);
    }

    #[tokio::test]
    async fn failed_removal_leaves_cache_untouched() {
        let api = Arc::new(StubApi::default());
        let cache = new_cache(api.clone());
        cache.apply_fetched(vec![account("1", 100.0)]);
        let mut updates = cache.subscribe();
        drain(&mut updates);

        api.fail_remove.store(true, Ordering::SeqCst);
        let err = cache.remove_account("1").await.expect_err("should fail");
        assert!(err.to_string().contains("still provisioning"));
        assert_eq!(cache.len(), 1);
        assert!(drain(&mut updates).is_empty());

        api.fail_remove.store(false, Ordering::SeqCst);
        cache.remove_account("1").await.expect("removal");
        assert!(cache.is_empty());
        assert_eq!(api.removed.lock().as_slice(), &["1".to_string()]);

        let events = drain(&mut updates);
        assert!(matches!(&events[0], AccountEvent::Remove { account_id } if account_id == "1"));
        assert!(matches!(events.last(), Some(AccountEvent::Bulk { .. })));
    }
}
