//! HTTP client for the banking service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    Account, AccountDirectory, OrderTransferRequest, OtcTransferRequest, PremiumTransfer,
    SettlementAck, SettlementEmitter, SettlementError, TaxCollection,
};

/// HTTP request timeout used when none is configured.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for creating a new BankingClient.
#[derive(Debug, Clone)]
pub struct BankingClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl BankingClientConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: if timeout.is_zero() {
                REQUEST_TIMEOUT
            } else {
                timeout
            },
        }
    }
}

/// BankingClient delivers settlement requests to the banking service and
/// reads account balances from it.
pub struct BankingClient {
    config: BankingClientConfig,
    http_client: HttpClient,
}

impl BankingClient {
    pub fn new(config: BankingClientConfig) -> Result<Self, SettlementError> {
        let http_client = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>, SettlementError> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let mut request = self.http_client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, endpoint = %endpoint, "sending banking request");

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_client_error() || status.is_server_error() {
            return Err(parse_error_response(status, &body));
        }

        Ok(body.to_vec())
    }

    /// Posts a settlement message. The service answers `null` when it accepts
    /// the request and a JSON string describing the problem when it refuses.
    async fn submit<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<(), SettlementError> {
        let reply = self.request(Method::POST, endpoint, Some(body)).await?;
        interpret_reply(&reply)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, SettlementError> {
        let body = self.request::<()>(Method::GET, endpoint, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn interpret_reply(body: &[u8]) -> Result<(), SettlementError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    match serde_json::from_slice::<Option<String>>(body) {
        Ok(None) => Ok(()),
        Ok(Some(message)) if message.is_empty() || message == "null" => Ok(()),
        Ok(Some(message)) => Err(SettlementError::Rejected(message)),
        // Structured acknowledgements carry no refusal.
        Err(_) => Ok(()),
    }
}

fn parse_error_response(status: StatusCode, body: &[u8]) -> SettlementError {
    #[derive(serde::Deserialize)]
    struct ErrorResponse {
        error: Option<String>,
        message: Option<String>,
    }

    let message = serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .and_then(|resp| resp.error.or(resp.message))
        .unwrap_or_else(|| String::from_utf8_lossy(body).to_string());

    warn!(status = status.as_u16(), message = %message, "banking service error");

    SettlementError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl SettlementEmitter for BankingClient {
    async fn request_transfer(&self, request: &OrderTransferRequest) -> Result<(), SettlementError> {
        self.submit("/order-init", request).await
    }

    async fn send_premium(&self, transfer: &PremiumTransfer) -> Result<(), SettlementError> {
        self.submit("/otc-pay-premium", transfer).await
    }

    async fn request_otc_transfer(&self, request: &OtcTransferRequest) -> Result<(), SettlementError> {
        self.submit("/init-otc", request).await
    }

    async fn collect_tax(&self, collection: &TaxCollection) -> Result<(), SettlementError> {
        self.submit("/collect-tax", collection).await
    }

    async fn abort_transfer(&self, uid: &str, reason: &str) -> Result<(), SettlementError> {
        self.submit("/otc-ack-banking", &SettlementAck::failure(uid, reason))
            .await
    }
}

#[async_trait]
impl AccountDirectory for BankingClient {
    async fn accounts_for_user(&self, user_id: i64) -> Result<Vec<Account>, SettlementError> {
        self.get(&format!("/accounts/user/{}", user_id)).await
    }
}
