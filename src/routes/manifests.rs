use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::handlers::manifest::{
    add_manifest_order, close_manifest, create_manifest, dispatch_manifest, get_manifest,
    list_manifests, record_outcome, remove_manifest_order, reschedule_order,
};
use crate::middleware::auth::require_auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/manifests", post(create_manifest).get(list_manifests))
        .route("/manifests/{id}", get(get_manifest))
        .route("/manifests/{id}/orders", post(add_manifest_order))
        .route("/manifests/{id}/orders/{order_id}", delete(remove_manifest_order))
        .route("/manifests/{id}/dispatch", post(dispatch_manifest))
        .route("/manifests/{id}/orders/{order_id}/outcome", post(record_outcome))
        .route("/manifests/{id}/orders/{order_id}/reschedule", post(reschedule_order))
        .route("/manifests/{id}/close", post(close_manifest))
        .layer(middleware::from_fn(require_auth))
}
