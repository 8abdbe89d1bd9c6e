//! Handlers of the local trade API.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::info;

use super::auth::Requester;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::{OptionContract, OtcTrade};
use crate::otc::{CounterOffer, CreateOffer};
use crate::settlement::SettlementAck;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchQueued {
    pub order_id: i64,
}

/// POST /otctrade/offer
pub async fn create_offer(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    payload: Result<Json<CreateOffer>, JsonRejection>,
) -> ApiResult<OtcTrade> {
    let Json(request) = payload?;
    let trade = state.otc.create_offer(user_id, request).await?;
    info!(trade_id = trade.id, user_id, "Offer created");
    Ok(Json(ApiResponse::ok(trade)))
}

/// PUT /otctrade/offer/{id}/counter
pub async fn counter_offer(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(trade_id): Path<i64>,
    payload: Result<Json<CounterOffer>, JsonRejection>,
) -> ApiResult<OtcTrade> {
    let Json(request) = payload?;
    let trade = state.otc.counter_offer(user_id, trade_id, request).await?;
    Ok(Json(ApiResponse::ok(trade)))
}

/// PUT /otctrade/offer/{id}/accept
pub async fn accept_offer(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(trade_id): Path<i64>,
) -> ApiResult<OptionContract> {
    let contract = state.otc.accept(user_id, trade_id).await?;
    info!(trade_id, contract_id = contract.id, "Offer accepted");
    Ok(Json(ApiResponse::ok(contract)))
}

/// PUT /otctrade/offer/{id}/reject
pub async fn reject_offer(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(trade_id): Path<i64>,
) -> ApiResult<OtcTrade> {
    let trade = state.otc.reject(user_id, trade_id).await?;
    Ok(Json(ApiResponse::ok(trade)))
}

/// GET /otctrade/offer/active
pub async fn list_active_offers(
    State(state): State<AppState>,
    Requester(user_id): Requester,
) -> ApiResult<Vec<OtcTrade>> {
    let trades = state.otc.list_active_offers(user_id).await?;
    Ok(Json(ApiResponse::ok(trades)))
}

/// PUT /otctrade/option/{id}/execute
pub async fn execute_option(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(contract_id): Path<i64>,
) -> ApiResult<OptionContract> {
    let contract = state.otc.execute_option(user_id, contract_id).await?;
    info!(contract_id, user_id, "Exercise requested");
    Ok(Json(ApiResponse::ok(contract)))
}

/// GET /otctrade/option/contracts
pub async fn list_option_contracts(
    State(state): State<AppState>,
    Requester(user_id): Requester,
) -> ApiResult<Vec<OptionContract>> {
    let contracts = state.otc.list_option_contracts(user_id).await?;
    Ok(Json(ApiResponse::ok(contracts)))
}

/// POST /orders/{id}/match
///
/// Queues a matching worker and returns immediately; the outcome is logged
/// by the engine.
pub async fn submit_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> (StatusCode, Json<ApiResponse<MatchQueued>>) {
    drop(state.engine.submit(order_id));
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(MatchQueued { order_id })),
    )
}

/// POST /settlement/ack
pub async fn acknowledge_settlement(
    State(state): State<AppState>,
    payload: Result<Json<SettlementAck>, JsonRejection>,
) -> ApiResult<()> {
    let Json(ack) = payload?;
    state.otc.acknowledge(&ack).await?;
    Ok(Json(ApiResponse::ok(())))
}
