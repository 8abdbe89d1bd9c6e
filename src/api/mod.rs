//! HTTP surface: the local trade API and the inbound interbank API.

mod auth;
mod envelope;
mod error;
mod handlers;
mod negotiations;

pub use envelope::ApiResponse;
pub use error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;

use crate::matching::MatchingEngine;
use crate::otc::OtcService;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub otc: Arc<OtcService>,
    pub engine: Arc<MatchingEngine>,
    /// SHA-256 of the secret partner banks must present. Inbound calls are
    /// refused when unset.
    inbound_key_digest: Option<Arc<[u8]>>,
}

impl AppState {
    pub fn new(
        otc: Arc<OtcService>,
        engine: Arc<MatchingEngine>,
        inbound_secret: Option<&str>,
    ) -> Self {
        let inbound_key_digest = inbound_secret
            .filter(|secret| !secret.is_empty())
            .map(|secret| Arc::from(Sha256::digest(secret.as_bytes()).as_slice()));

        Self {
            otc,
            engine,
            inbound_key_digest,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let trade_routes = Router::new()
        .route("/otctrade/offer", post(handlers::create_offer))
        .route("/otctrade/offer/active", get(handlers::list_active_offers))
        .route("/otctrade/offer/{id}/counter", put(handlers::counter_offer))
        .route("/otctrade/offer/{id}/accept", put(handlers::accept_offer))
        .route("/otctrade/offer/{id}/reject", put(handlers::reject_offer))
        .route("/otctrade/option/contracts", get(handlers::list_option_contracts))
        .route("/otctrade/option/{id}/execute", put(handlers::execute_option))
        .route("/orders/{id}/match", post(handlers::submit_order))
        .route("/settlement/ack", post(handlers::acknowledge_settlement));

    let interbank_routes = Router::new()
        .route("/negotiations", post(negotiations::create))
        .route(
            "/negotiations/{routing}/{id}",
            get(negotiations::snapshot)
                .put(negotiations::counter)
                .delete(negotiations::close),
        )
        .route("/negotiations/{routing}/{id}/accept", get(negotiations::accept))
        .route("/public-stock", get(negotiations::public_stock));

    trade_routes
        .merge(interbank_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
