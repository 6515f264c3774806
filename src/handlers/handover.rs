use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dtos::handover::{CreateHandoverRequest, HandoverListQuery, ProcessHandoverRequest};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::handover::ReturnHandover;
use crate::state::AppState;

pub async fn create_handover(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateHandoverRequest>,
) -> Result<(StatusCode, Json<ReturnHandover>), AppError> {
    let lines = req.lines.into_iter().map(|l| l.into_line()).collect();
    let handover = dispatch
        .create_handover(req.source, lines, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(handover)))
}

pub async fn list_handovers(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HandoverListQuery>,
) -> Result<Json<Vec<ReturnHandover>>, AppError> {
    Ok(Json(
        dispatch.list_handovers(query.status, auth.actor()).await?,
    ))
}

pub async fn get_handover(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<ReturnHandover>, AppError> {
    Ok(Json(dispatch.get_handover(id, auth.actor()).await?))
}

pub async fn process_handover(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<ProcessHandoverRequest>,
) -> Result<Json<ReturnHandover>, AppError> {
    let verdicts = req
        .lines
        .into_iter()
        .map(|l| l.into_verification())
        .collect();
    let handover = dispatch.process_handover(id, verdicts, auth.actor()).await?;
    Ok(Json(handover))
}
