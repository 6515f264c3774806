// src/main.rs
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{routing::get, Router};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing_subscriber::fmt::init as tracing_init;

use pasalx_backend::config::AppConfig;
use pasalx_backend::couriers::CourierRegistry;
use pasalx_backend::dispatch::DispatchService;
use pasalx_backend::routes;
use pasalx_backend::state::AppState;
use pasalx_backend::store::{MemoryStore, OpsStore, PgStore};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_init();

    // Load environment variables
    dotenv().ok();

    let config = AppConfig::from_env();

    // Postgres when configured, in-memory otherwise (dev and demo runs)
    let store: Arc<dyn OpsStore> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .expect("Failed to connect to Postgres");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state lives in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let couriers = CourierRegistry::from_config(&config.couriers);
    let app_state = AppState::new(DispatchService::new(store, couriers));

    // Build application under /PasalX base path
    let api = routes::create_router()
        .route("/", get(|| async { "PasalX API" }))
        .route("/health", get(health_check));

    let app = Router::new()
        .nest("/PasalX", api)
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server (axum 0.8 style) with HOST/PORT env and graceful port selection
    let host: IpAddr = config
        .host
        .parse()
        .unwrap_or_else(|_| "127.0.0.1".parse().unwrap());
    let base_port = config.port;

    // Try base_port..base_port+20 to avoid crash when address is in use
    let listener = {
        let mut bound = None;
        for offset in 0u16..=20 {
            let port = base_port.saturating_add(offset);
            let addr = SocketAddr::from((host, port));
            match TcpListener::bind(addr).await {
                Ok(l) => {
                    bound = Some((l, addr));
                    break;
                }
                Err(e) => {
                    if offset == 0 {
                        tracing::warn!(%addr, error=%e, "Port in use, trying next");
                    }
                }
            }
        }
        match bound {
            Some((l, addr)) => {
                tracing::info!("Server running on {}", addr);
                l
            }
            None => {
                tracing::error!("Failed to bind to any port starting at {} on {}", base_port, host);
                return;
            }
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error=%e, "Server error");
    }
}

async fn health_check() -> &'static str {
    "OK"
}
