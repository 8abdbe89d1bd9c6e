//! HTTP client for the partner bank's negotiation endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    ContractDescriptor, ForeignBankId, InterbankClient, InterbankError, NegotiationDto, OfferDto,
    Result,
};
use crate::domain::NegotiationRef;

const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP request timeout used when none is configured.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for creating a new HttpInterbankClient.
#[derive(Debug, Clone)]
pub struct InterbankClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub routing_number: u32,
    pub timeout: Duration,
}

impl InterbankClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        routing_number: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            routing_number,
            timeout: if timeout.is_zero() {
                REQUEST_TIMEOUT
            } else {
                timeout
            },
        }
    }
}

/// HttpInterbankClient talks to one partner bank.
pub struct HttpInterbankClient {
    config: InterbankClientConfig,
    http_client: HttpClient,
}

impl HttpInterbankClient {
    pub fn new(config: InterbankClientConfig) -> Result<Self> {
        let http_client = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn negotiation_path(negotiation: &NegotiationRef) -> String {
        format!(
            "/negotiations/{}/{}",
            negotiation.routing_number,
            urlencoding::encode(&negotiation.id)
        )
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .header(API_KEY_HEADER, &self.config.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, endpoint = %endpoint, "sending interbank request");

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_client_error() || status.is_server_error() {
            return Err(parse_error_response(status, &body));
        }

        Ok(body.to_vec())
    }

    async fn request_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let body = self.request(method, endpoint, body).await?;
        Ok(serde_json::from_slice(&body)?)
    }

}

fn parse_error_response(status: StatusCode, body: &[u8]) -> InterbankError {
    #[derive(serde::Deserialize)]
    struct ErrorResponse {
        error: Option<String>,
        message: Option<String>,
    }

    let message = serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .and_then(|resp| resp.error.or(resp.message))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

    if status == StatusCode::CONFLICT {
        return InterbankError::TurnViolation(message);
    }

    warn!(status = status.as_u16(), message = %message, "partner bank error");

    InterbankError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl InterbankClient for HttpInterbankClient {
    fn partner_routing_number(&self) -> u32 {
        self.config.routing_number
    }

    async fn create_negotiation(&self, offer: &OfferDto) -> Result<ForeignBankId> {
        self.request_json(Method::POST, "/negotiations", Some(offer))
            .await
    }

    async fn counter_negotiation(&self, negotiation: &NegotiationRef, offer: &OfferDto) -> Result<()> {
        self.request(Method::PUT, &Self::negotiation_path(negotiation), Some(offer))
            .await?;
        Ok(())
    }

    async fn accept_negotiation(&self, negotiation: &NegotiationRef) -> Result<ContractDescriptor> {
        let endpoint = format!("{}/accept", Self::negotiation_path(negotiation));
        self.request_json::<_, ()>(Method::GET, &endpoint, None).await
    }

    async fn close_negotiation(&self, negotiation: &NegotiationRef) -> Result<()> {
        self.request::<()>(Method::DELETE, &Self::negotiation_path(negotiation), None)
            .await?;
        Ok(())
    }

    async fn get_negotiation(&self, negotiation: &NegotiationRef) -> Result<NegotiationDto> {
        self.request_json::<_, ()>(Method::GET, &Self::negotiation_path(negotiation), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OfferTerms, Party};
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    const PARTNER: u32 = 444;

    #[derive(Clone, Default)]
    struct StubState {
        calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    impl StubState {
        fn record(&self, call: &str, headers: &HeaderMap, body: Value) {
            let key = headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.calls.lock().unwrap().push((call.to_string(), key, body));
        }
    }

    fn snapshot_body() -> Value {
        json!({
            "stock": {"ticker": "MSFT"},
            "settlementDate": "2026-06-30T00:00:00Z",
            "pricePerUnit": {"currency": "USD", "amount": 150},
            "premium": {"currency": "USD", "amount": 10},
            "buyerId": {"routingNumber": 111, "id": "3"},
            "sellerId": {"routingNumber": 444, "id": "9"},
            "amount": 5,
            "lastModifiedBy": {"routingNumber": 111, "id": "3"},
            "isOngoing": true
        })
    }

    async fn spawn_partner_stub() -> (String, StubState) {
        let state = StubState::default();

        async fn create(
            State(state): State<StubState>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            state.record("create", &headers, body);
            Json(json!({"routingNumber": PARTNER, "id": "neg-1"}))
        }

        async fn counter(
            State(state): State<StubState>,
            Path((_, id)): Path<(u32, String)>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> HttpStatus {
            state.record(&format!("counter:{}", id), &headers, body);
            if id == "busy" {
                return HttpStatus::CONFLICT;
            }
            HttpStatus::OK
        }

        async fn fetch(
            State(state): State<StubState>,
            Path((_, id)): Path<(u32, String)>,
            headers: HeaderMap,
        ) -> (HttpStatus, Json<Value>) {
            state.record(&format!("get:{}", id), &headers, Value::Null);
            if id == "missing" {
                return (HttpStatus::NOT_FOUND, Json(json!({"error": "no such negotiation"})));
            }
            (HttpStatus::OK, Json(snapshot_body()))
        }

        async fn close(
            State(state): State<StubState>,
            Path((_, id)): Path<(u32, String)>,
            headers: HeaderMap,
        ) -> HttpStatus {
            state.record(&format!("close:{}", id), &headers, Value::Null);
            HttpStatus::NO_CONTENT
        }

        async fn accept(
            State(state): State<StubState>,
            Path((routing, id)): Path<(u32, String)>,
            headers: HeaderMap,
        ) -> (HttpStatus, Json<Value>) {
            state.record(&format!("accept:{}", id), &headers, Value::Null);
            (
                HttpStatus::OK,
                Json(json!({
                    "id": {"routingNumber": routing, "id": "contract-7"},
                    "stock": {"ticker": "MSFT"},
                    "pricePerUnit": {"currency": "USD", "amount": 150},
                    "settlementDate": "2026-06-30T00:00:00Z",
                    "amount": 5,
                    "negotiationId": {"routingNumber": routing, "id": id}
                })),
            )
        }

        let app = Router::new()
            .route("/negotiations", post(create))
            .route(
                "/negotiations/{routing}/{id}",
                get(fetch).put(counter).delete(close),
            )
            .route("/negotiations/{routing}/{id}/accept", get(accept))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), state)
    }

    fn client(base_url: &str) -> HttpInterbankClient {
        HttpInterbankClient::new(InterbankClientConfig::new(
            base_url,
            "partner-key",
            PARTNER,
            Duration::from_secs(2),
        ))
        .unwrap()
    }

    fn negotiation(id: &str) -> NegotiationRef {
        NegotiationRef {
            routing_number: PARTNER,
            id: id.to_string(),
        }
    }

    fn offer() -> OfferDto {
        let terms = OfferTerms {
            quantity: 5,
            price_per_unit: Decimal::from(150),
            premium: Decimal::from(10),
            settlement_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
        };
        let buyer = Party::Local(3);
        let seller = Party::Remote {
            routing_number: PARTNER,
            id: "9".to_string(),
        };
        OfferDto::new("MSFT", &terms, &buyer, &seller, &buyer, 111, "USD")
    }

    #[tokio::test]
    async fn test_create_negotiation_sends_key_and_offer() {
        let (base_url, state) = spawn_partner_stub().await;
        let client = client(&base_url);

        let id = client.create_negotiation(&offer()).await.unwrap();
        assert_eq!(id.routing_number, PARTNER);
        assert_eq!(id.id, "neg-1");

        let calls = state.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "create");
        assert_eq!(calls[0].1.as_deref(), Some("partner-key"));
        assert_eq!(calls[0].2["amount"], 5);
        assert_eq!(calls[0].2["sellerId"]["routingNumber"], PARTNER);
    }

    #[tokio::test]
    async fn test_conflict_maps_to_turn_violation() {
        let (base_url, _state) = spawn_partner_stub().await;
        let client = client(&base_url);

        let result = client.counter_negotiation(&negotiation("busy"), &offer()).await;
        assert!(matches!(result, Err(InterbankError::TurnViolation(_))));

        client
            .counter_negotiation(&negotiation("neg-1"), &offer())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_accept_returns_contract_descriptor() {
        let (base_url, _state) = spawn_partner_stub().await;
        let client = client(&base_url);

        let contract = client.accept_negotiation(&negotiation("neg-1")).await.unwrap();
        assert_eq!(contract.id.id, "contract-7");
        assert_eq!(contract.amount, 5);
        assert_eq!(contract.price_per_unit.amount, Decimal::from(150));
        assert_eq!(contract.negotiation_id.unwrap().id, "neg-1");
    }

    #[tokio::test]
    async fn test_get_and_close_negotiation() {
        let (base_url, state) = spawn_partner_stub().await;
        let client = client(&base_url);

        let snapshot = client.get_negotiation(&negotiation("neg-1")).await.unwrap();
        assert!(snapshot.is_ongoing);
        assert_eq!(snapshot.offer.stock.ticker, "MSFT");

        let missing = client.get_negotiation(&negotiation("missing")).await;
        assert!(matches!(
            missing,
            Err(InterbankError::Status { status: 404, ref message }) if message == "no such negotiation"
        ));

        client.close_negotiation(&negotiation("neg-1")).await.unwrap();
        let calls = state.calls.lock().unwrap();
        assert_eq!(calls.last().unwrap().0, "close:neg-1");
    }
}
