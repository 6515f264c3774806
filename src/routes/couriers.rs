use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::courier::{book_bulk, book_order, list_providers};
use crate::middleware::auth::require_auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/couriers", get(list_providers))
        .route("/couriers/{provider}/bookings", post(book_order))
        .route("/couriers/{provider}/bookings/bulk", post(book_bulk))
        .layer(middleware::from_fn(require_auth))
}
