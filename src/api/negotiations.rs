//! Inbound interbank protocol. Bodies are the bare protocol payloads.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::info;

use super::auth::InterbankCaller;
use super::{ApiError, AppState};
use crate::domain::NegotiationRef;
use crate::interbank::{ContractDescriptor, ForeignBankId, NegotiationDto, OfferDto, PublicStock};

fn negotiation_ref((routing_number, id): (u32, String)) -> NegotiationRef {
    NegotiationRef { routing_number, id }
}

/// GET /public-stock
pub async fn public_stock(
    State(state): State<AppState>,
    _caller: InterbankCaller,
) -> Result<Json<Vec<PublicStock>>, ApiError> {
    Ok(Json(state.otc.public_stocks().await?))
}

/// POST /negotiations
pub async fn create(
    State(state): State<AppState>,
    _caller: InterbankCaller,
    payload: Result<Json<OfferDto>, JsonRejection>,
) -> Result<Json<ForeignBankId>, ApiError> {
    let Json(offer) = payload?;
    let id = state.otc.receive_offer(&offer).await?;
    info!(negotiation = %id.id, ticker = %offer.stock.ticker, "Inbound negotiation opened");
    Ok(Json(id))
}

/// PUT /negotiations/{routing}/{id}
pub async fn counter(
    State(state): State<AppState>,
    _caller: InterbankCaller,
    Path(path): Path<(u32, String)>,
    payload: Result<Json<OfferDto>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(offer) = payload?;
    state.otc.receive_counter(&negotiation_ref(path), &offer).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /negotiations/{routing}/{id}
pub async fn snapshot(
    State(state): State<AppState>,
    _caller: InterbankCaller,
    Path(path): Path<(u32, String)>,
) -> Result<Json<NegotiationDto>, ApiError> {
    Ok(Json(state.otc.negotiation_snapshot(&negotiation_ref(path)).await?))
}

/// DELETE /negotiations/{routing}/{id}
pub async fn close(
    State(state): State<AppState>,
    _caller: InterbankCaller,
    Path(path): Path<(u32, String)>,
) -> Result<StatusCode, ApiError> {
    state.otc.receive_close(&negotiation_ref(path)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /negotiations/{routing}/{id}/accept
pub async fn accept(
    State(state): State<AppState>,
    _caller: InterbankCaller,
    Path(path): Path<(u32, String)>,
) -> Result<Json<ContractDescriptor>, ApiError> {
    let negotiation = negotiation_ref(path);
    let contract = state.otc.receive_accept(&negotiation).await?;
    info!(negotiation = %negotiation.id, contract = %contract.id.id, "Inbound negotiation accepted");
    Ok(Json(contract))
}
