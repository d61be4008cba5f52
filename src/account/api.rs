// =============================================================================
// Accounts REST API Client — bearer-token requests against the backend
// =============================================================================
//
// SECURITY: tokens are obtained per call from the injected getter and only
// ever travel in the Authorization header. Account removal is broker-aware:
// Interactive Brokers accounts run a hosted gateway that must be
// deprovisioned through its own endpoint; every other broker uses the
// generic path.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::types::AccountRecord;

/// Broker id whose accounts deprovision through a dedicated endpoint.
const IB_BROKER_ID: &str = "interactivebrokers";

/// Token getter injected by the host application (authentication itself is
/// out of scope for this crate).
pub type TokenGetter = Arc<dyn Fn() -> String + Send + Sync>;

/// The accounts backend as consumed by the synchronization cache.
///
/// The production implementation is [`HttpAccountsApi`].
#[async_trait]
pub trait AccountsApi: Send + Sync {
    /// Fetch the full account listing.
    async fn fetch_accounts(&self) -> Result<Vec<AccountRecord>>;

    /// Remove (deprovision) an account. Broker-specific: the implementation
    /// picks the endpoint from `account.broker_id`.
    async fn remove_account(&self, account: &AccountRecord) -> Result<()>;

    /// Update an account's nickname.
    async fn update_nickname(&self, account_id: &str, nickname: &str) -> Result<()>;
}

/// REST implementation of [`AccountsApi`].
#[derive(Clone)]
pub struct HttpAccountsApi {
    base_url: String,
    get_token: TokenGetter,
    client: reqwest::Client,
}

impl HttpAccountsApi {
    pub fn new(base_url: impl Into<String>, get_token: TokenGetter) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            get_token,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", (self.get_token)())
    }
}

/// Check an HTTP response, surfacing the server's `detail` message when the
/// status is not 2xx (falling back to status + body).
async fn read_json(resp: reqwest::Response, what: &str) -> Result<serde_json::Value> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);

    if !status.is_success() {
        if let Some(detail) = body.get("detail").and_then(|v| v.as_str()) {
            anyhow::bail!("{detail}");
        }
        anyhow::bail!("{what} returned {status}: {body}");
    }

    Ok(body)
}

#[async_trait]
impl AccountsApi for HttpAccountsApi {
    /// GET /api/v1/brokers/accounts
    #[instrument(skip(self), name = "accounts::fetch")]
    async fn fetch_accounts(&self) -> Result<Vec<AccountRecord>> {
        let url = self.url("/api/v1/brokers/accounts");

        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .context("GET /api/v1/brokers/accounts request failed")?;

        let body = read_json(resp, "GET /api/v1/brokers/accounts").await?;

        // The listing arrives either as a bare array or wrapped in an
        // `accounts` property, depending on the backend revision.
        let raw = body
            .get("accounts")
            .and_then(|v| v.as_array())
            .cloned()
            .or_else(|| body.as_array().cloned())
            .unwrap_or_default();

        let mut accounts = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_value::<AccountRecord>(entry) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(error = %e, "skipping malformed account entry"),
            }
        }

        debug!(count = accounts.len(), "accounts fetched");
        Ok(accounts)
    }

    /// DELETE /api/v1/brokers/accounts/{id}, or the Interactive Brokers
    /// deprovisioning path for IB accounts.
    #[instrument(skip(self, account), fields(account_id = %account.account_id, broker_id = %account.broker_id), name = "accounts::remove")]
    async fn remove_account(&self, account: &AccountRecord) -> Result<()> {
        let path = if account.broker_id == IB_BROKER_ID {
            format!(
                "/api/v1/brokers/interactivebrokers/accounts/{}",
                account.account_id
            )
        } else {
            format!("/api/v1/brokers/accounts/{}", account.account_id)
        };
        let url = self.url(&path);

        debug!(path = %path, "removing account");

        let resp = self
            .client
            .delete(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .with_context(|| format!("DELETE {path} request failed"))?;

        read_json(resp, &format!("DELETE {path}")).await?;

        debug!("account removed");
        Ok(())
    }

    /// PATCH /api/v1/brokers/accounts/{id}
    #[instrument(skip(self, nickname), name = "accounts::update_nickname")]
    async fn update_nickname(&self, account_id: &str, nickname: &str) -> Result<()> {
        let path = format!("/api/v1/brokers/accounts/{account_id}");
        let url = self.url(&path);

        let resp = self
            .client
            .patch(&url)
            .header("Authorization", self.bearer())
            .json(&serde_json::json!({ "nickname": nickname }))
            .send()
            .await
            .with_context(|| format!("PATCH {path} request failed"))?;

        read_json(resp, &format!("PATCH {path}")).await?;

        debug!(account_id, "account nickname updated");
        Ok(())
    }
}

impl std::fmt::Debug for HttpAccountsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAccountsApi")
            .field("base_url", &self.base_url)
            .field("get_token", &"<redacted>")
            .finish()
    }
}
