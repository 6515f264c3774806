use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::handover::{
    create_handover, get_handover, list_handovers, process_handover,
};
use crate::middleware::auth::require_auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/handovers", post(create_handover).get(list_handovers))
        .route("/handovers/{id}", get(get_handover))
        .route("/handovers/{id}/process", post(process_handover))
        .layer(middleware::from_fn(require_auth))
}
