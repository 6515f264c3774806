use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::rider::{
    get_settlement, list_settlements, record_cash_handover, record_collection, request_settlement,
    rider_balance, rider_ledger, verify_settlement,
};
use crate::middleware::auth::require_auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/riders/{id}/ledger", get(rider_ledger))
        .route("/riders/{id}/balance", get(rider_balance))
        .route("/riders/{id}/collections", post(record_collection))
        .route("/riders/{id}/cash-handovers", post(record_cash_handover))
        .route("/riders/{id}/settlements", post(request_settlement))
        .route("/settlements", get(list_settlements))
        .route("/settlements/{id}", get(get_settlement))
        .route("/settlements/{id}/verify", post(verify_settlement))
        .layer(middleware::from_fn(require_auth))
}
