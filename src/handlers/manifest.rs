use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dtos::manifest::{AddOrderRequest, CreateManifestRequest, OutcomeRequest};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::manifest::Manifest;
use crate::state::AppState;
use crate::store::ManifestFilter;

pub async fn create_manifest(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateManifestRequest>,
) -> Result<(StatusCode, Json<Manifest>), AppError> {
    let manifest = dispatch
        .create_manifest(req.owner, req.order_ids, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

pub async fn list_manifests(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<ManifestFilter>,
) -> Result<Json<Vec<Manifest>>, AppError> {
    Ok(Json(dispatch.list_manifests(filter, auth.actor()).await?))
}

pub async fn get_manifest(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Manifest>, AppError> {
    Ok(Json(dispatch.get_manifest(id, auth.actor()).await?))
}

pub async fn add_manifest_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<AddOrderRequest>,
) -> Result<Json<Manifest>, AppError> {
    let manifest = dispatch
        .add_manifest_order(id, req.order_id, auth.actor())
        .await?;
    Ok(Json(manifest))
}

pub async fn remove_manifest_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, order_id)): Path<(i64, i64)>,
) -> Result<Json<Manifest>, AppError> {
    let manifest = dispatch
        .remove_manifest_order(id, order_id, auth.actor())
        .await?;
    Ok(Json(manifest))
}

pub async fn dispatch_manifest(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Manifest>, AppError> {
    Ok(Json(dispatch.dispatch_manifest(id, auth.actor()).await?))
}

pub async fn record_outcome(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, order_id)): Path<(i64, i64)>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<Manifest>, AppError> {
    let manifest = dispatch
        .record_outcome(id, order_id, req.into_input(), auth.actor())
        .await?;
    Ok(Json(manifest))
}

pub async fn reschedule_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, order_id)): Path<(i64, i64)>,
) -> Result<Json<Manifest>, AppError> {
    let manifest = dispatch
        .reschedule_order(id, order_id, auth.actor())
        .await?;
    Ok(Json(manifest))
}

pub async fn close_manifest(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Manifest>, AppError> {
    Ok(Json(dispatch.close_manifest(id, auth.actor()).await?))
}
