use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dtos::order::{
    CancelOrderRequest, CreateOrderRequest, CreateVariantRequest, ReasonRequest,
    StorePickupRequest,
};
use crate::dtos::projection::OrderView;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::order::OrderActivity;
use crate::models::variant::Variant;
use crate::state::AppState;
use crate::store::OrderFilter;

pub async fn create_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>), AppError> {
    let order = dispatch
        .create_order(req.into_new_order(), auth.actor())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(OrderView::project(&order, auth.role)),
    ))
}

pub async fn list_orders(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<OrderView>>, AppError> {
    let orders = dispatch.list_orders(filter, auth.actor()).await?;
    Ok(Json(
        orders
            .iter()
            .map(|o| OrderView::project(o, auth.role))
            .collect(),
    ))
}

pub async fn get_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch.get_order(id, auth.actor()).await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn order_activity(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<OrderActivity>>, AppError> {
    Ok(Json(dispatch.order_activity(id, auth.actor()).await?))
}

pub async fn confirm_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch.confirm_order(id, auth.actor()).await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn pack_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch.pack_order(id, auth.actor()).await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn cancel_order(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch.cancel_order(id, &req.reason, auth.actor()).await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn complete_store_pickup(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<StorePickupRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch
        .complete_store_pickup(id, req.amount_received, auth.actor())
        .await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn initiate_return(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch
        .initiate_return(id, &req.reason, auth.actor())
        .await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn mark_lost(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch.mark_lost(id, &req.reason, auth.actor()).await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn mark_rto(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = dispatch.mark_rto(id, &req.reason, auth.actor()).await?;
    Ok(Json(OrderView::project(&order, auth.role)))
}

pub async fn create_variant(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateVariantRequest>,
) -> Result<(StatusCode, Json<Variant>), AppError> {
    let variant = dispatch
        .create_variant(&req.sku, &req.product_name, req.stock_on_hand, auth.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(variant)))
}

pub async fn list_variants(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Variant>>, AppError> {
    Ok(Json(dispatch.list_variants(auth.actor()).await?))
}

pub async fn get_variant(
    State(AppState { dispatch }): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<Variant>, AppError> {
    Ok(Json(dispatch.get_variant(id, auth.actor()).await?))
}
