use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::dispatch::{BookingReport, BookingResult, WebhookOutcome};
use crate::dtos::courier::{BookBulkRequest, BookOrderRequest};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::sync::LogisticsSyncStatus;
use crate::state::AppState;

pub async fn list_providers(
    State(AppState { dispatch }): State<AppState>,
) -> Json<Vec<String>> {
    Json(dispatch.provider_codes())
}

pub async fn book_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(provider): Path<String>,
    Json(req): Json<BookOrderRequest>,
) -> Result<(StatusCode, Json<BookingResult>), AppError> {
    let result = dispatch
        .book_order(req.order_id, &provider, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn book_bulk(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(provider): Path<String>,
    Json(req): Json<BookBulkRequest>,
) -> Result<Json<BookingReport>, AppError> {
    let report = dispatch
        .book_bulk(req.order_ids, &provider, auth.actor())
        .await?;
    Ok(Json(report))
}

pub async fn refresh_tracking(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<WebhookOutcome>, AppError> {
    Ok(Json(dispatch.refresh_tracking(id, auth.actor()).await?))
}

pub async fn sync_status(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<LogisticsSyncStatus>, AppError> {
    let status = dispatch
        .sync_status(id, auth.actor())
        .await?
        .ok_or_else(|| AppError::not_found("No courier booking for this order"))?;
    Ok(Json(status))
}

/// No JWT here; authenticity comes from the per-provider HMAC signature.
pub async fn ingest_webhook(
    State(AppState { dispatch }): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookOutcome>, AppError> {
    let signature = headers
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let outcome = dispatch.ingest_webhook(&provider, &body, signature).await?;
    Ok(Json(outcome))
}
