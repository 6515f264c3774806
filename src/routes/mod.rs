pub mod couriers;
pub mod handovers;
pub mod manifests;
pub mod orders;
pub mod riders;
pub mod variants;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(orders::routes())
        .merge(variants::routes())
        .merge(manifests::routes())
        .merge(handovers::routes())
        .merge(riders::routes())
        .merge(couriers::routes())
        .merge(webhooks::routes())
}
