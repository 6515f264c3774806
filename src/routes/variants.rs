use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::order::{create_variant, get_variant, list_variants};
use crate::middleware::auth::require_auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/variants", post(create_variant).get(list_variants))
        .route("/variants/{id}", get(get_variant))
        .layer(middleware::from_fn(require_auth))
}
