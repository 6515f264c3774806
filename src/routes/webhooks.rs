use axum::{routing::post, Router};

use crate::handlers::courier::ingest_webhook;
use crate::state::AppState;

/// Courier callbacks authenticate with an HMAC signature, not a JWT,
/// so this router skips the auth layer.
pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/{provider}", post(ingest_webhook))
}
