use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::courier::{refresh_tracking, sync_status};
use crate::handlers::order::{
    cancel_order, complete_store_pickup, confirm_order, create_order, get_order, initiate_return,
    list_orders, mark_lost, mark_rto, order_activity, pack_order,
};
use crate::middleware::auth::require_auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/activity", get(order_activity))
        .route("/orders/{id}/confirm", post(confirm_order))
        .route("/orders/{id}/pack", post(pack_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/pickup", post(complete_store_pickup))
        .route("/orders/{id}/initiate-return", post(initiate_return))
        .route("/orders/{id}/mark-lost", post(mark_lost))
        .route("/orders/{id}/mark-rto", post(mark_rto))
        .route("/orders/{id}/refresh-tracking", post(refresh_tracking))
        .route("/orders/{id}/sync-status", get(sync_status))
        .layer(middleware::from_fn(require_auth))
}
