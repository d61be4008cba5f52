// =============================================================================
// Order Control REST API Client — place / modify / cancel / close / reverse
// =============================================================================
//
// All order mutations run through the backend under
// /api/v1/brokers/accounts/{accountId}/..., authorized with a bearer token
// obtained per call. Failures carry the server's `detail` message when one is
// provided. This client never retries: a duplicate retry on a trading action
// could duplicate an order.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

/// Payload for order placement. `symbol` is the broker-native contract
/// ticker, never the display ticker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    /// "BUY" | "SELL".
    pub side: String,
    pub quantity: f64,
    /// "MARKET" | "LIMIT" | "STOP" | "STOP_LIMIT".
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
}

/// Payload for order modification. The order service requires `orderType` on
/// every modification, so it is not optional here.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyOrderRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    pub order_type: String,
    /// Chart-originated modifications are not automated.
    pub is_automated: bool,
}

/// The order-control backend as consumed by the broker terminal adapter.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Place an order; returns the new order id.
    async fn place_order(
        &self,
        token: &str,
        account_id: &str,
        request: &PlaceOrderRequest,
    ) -> Result<String>;

    async fn modify_order(
        &self,
        token: &str,
        account_id: &str,
        order_id: &str,
        request: &ModifyOrderRequest,
    ) -> Result<()>;

    async fn cancel_order(&self, token: &str, account_id: &str, order_id: &str) -> Result<()>;

    async fn close_position(&self, token: &str, account_id: &str, position_id: &str)
        -> Result<()>;

    async fn reverse_position(
        &self,
        token: &str,
        account_id: &str,
        position_id: &str,
    ) -> Result<()>;
}

/// REST implementation of [`OrderApi`].
#[derive(Clone)]
pub struct HttpOrderApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrderApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
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
impl OrderApi for HttpOrderApi {
    /// POST /api/v1/brokers/accounts/{id}/discretionary/orders
    #[instrument(skip(self, token, request), fields(symbol = %request.symbol), name = "orders::place")]
    async fn place_order(
        &self,
        token: &str,
        account_id: &str,
        request: &PlaceOrderRequest,
    ) -> Result<String> {
        let path = format!("/api/v1/brokers/accounts/{account_id}/discretionary/orders");

        debug!(
            side = %request.side,
            quantity = request.quantity,
            order_type = %request.order_type,
            "placing order"
        );

        let resp = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        let body = read_json(resp, &format!("POST {path}")).await?;

        // The order id arrives as order.order_id or order.orderId depending
        // on the backend revision.
        let order_id = body
            .pointer("/order/order_id")
            .or_else(|| body.pointer("/order/orderId"))
            .map(json_value_to_id)
            .unwrap_or_else(|| "unknown".to_string());

        debug!(order_id = %order_id, "order placed");
        Ok(order_id)
    }

    /// PUT /api/v1/brokers/accounts/{id}/orders/{orderId}
    #[instrument(skip(self, token, request), name = "orders::modify")]
    async fn modify_order(
        &self,
        token: &str,
        account_id: &str,
        order_id: &str,
        request: &ModifyOrderRequest,
    ) -> Result<()> {
        let path = format!("/api/v1/brokers/accounts/{account_id}/orders/{order_id}");

        let resp = self
            .client
            .put(self.url(&path))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .with_context(|| format!("PUT {path} request failed"))?;

        read_json(resp, &format!("PUT {path}")).await?;
        debug!(order_id, "order modified");
        Ok(())
    }

    /// DELETE /api/v1/brokers/accounts/{id}/orders/{orderId}
    #[instrument(skip(self, token), name = "orders::cancel")]
    async fn cancel_order(&self, token: &str, account_id: &str, order_id: &str) -> Result<()> {
        let path = format!("/api/v1/brokers/accounts/{account_id}/orders/{order_id}");

        let resp = self
            .client
            .delete(self.url(&path))
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("DELETE {path} request failed"))?;

        read_json(resp, &format!("DELETE {path}")).await?;
        debug!(order_id, "order cancelled");
        Ok(())
    }

    /// POST /api/v1/brokers/accounts/{id}/positions/{positionId}/close
    #[instrument(skip(self, token), name = "orders::close_position")]
    async fn close_position(
        &self,
        token: &str,
        account_id: &str,
        position_id: &str,
    ) -> Result<()> {
        let path = format!("/api/v1/brokers/accounts/{account_id}/positions/{position_id}/close");

        let resp = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        read_json(resp, &format!("POST {path}")).await?;
        debug!(position_id, "position closed");
        Ok(())
    }

    /// POST /api/v1/brokers/accounts/{id}/positions/{positionId}/reverse
    #[instrument(skip(self, token), name = "orders::reverse_position")]
    async fn reverse_position(
        &self,
        token: &str,
        account_id: &str,
        position_id: &str,
    ) -> Result<()> {
        let path =
            format!("/api/v1/brokers/accounts/{account_id}/positions/{position_id}/reverse");

        let resp = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        read_json(resp, &format!("POST {path}")).await?;
        debug!(position_id, "position reversed");
        Ok(())
    }
}

/// Order ids arrive as strings or numbers; normalize to a string.
fn json_value_to_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Debug for HttpOrderApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOrderApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}
