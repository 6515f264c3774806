use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dtos::rider::{BalanceResponse, CashHandoverRequest, CollectionRequest};
use crate::dtos::settlement::{
    RequestSettlementRequest, SettlementListQuery, VerifySettlementRequest,
};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::ledger::LedgerEntry;
use crate::models::settlement::Settlement;
use crate::state::AppState;

pub async fn rider_ledger(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rider_id): Path<i64>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    Ok(Json(
        dispatch.rider_statement(rider_id, auth.actor()).await?,
    ))
}

pub async fn rider_balance(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rider_id): Path<i64>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = dispatch.rider_balance(rider_id, auth.actor()).await?;
    Ok(Json(BalanceResponse { rider_id, balance }))
}

pub async fn record_collection(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rider_id): Path<i64>,
    Json(req): Json<CollectionRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), AppError> {
    let entry = dispatch
        .record_collection(rider_id, req.order_id, req.amount, req.note, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn record_cash_handover(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rider_id): Path<i64>,
    Json(req): Json<CashHandoverRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), AppError> {
    let entry = dispatch
        .record_cash_handover(rider_id, req.amount, req.note, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn request_settlement(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(rider_id): Path<i64>,
    Json(req): Json<RequestSettlementRequest>,
) -> Result<(StatusCode, Json<Settlement>), AppError> {
    let settlement = dispatch
        .request_settlement(rider_id, req.declared, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(settlement)))
}

pub async fn list_settlements(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SettlementListQuery>,
) -> Result<Json<Vec<Settlement>>, AppError> {
    Ok(Json(
        dispatch.list_settlements(query.rider_id, auth.actor()).await?,
    ))
}

pub async fn get_settlement(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Settlement>, AppError> {
    Ok(Json(dispatch.get_settlement(id, auth.actor()).await?))
}

pub async fn verify_settlement(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<VerifySettlementRequest>,
) -> Result<Json<Settlement>, AppError> {
    let settlement = dispatch
        .verify_settlement(id, req.actual, auth.actor())
        .await?;
    Ok(Json(settlement))
}
