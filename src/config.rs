// src/config.rs
//
// Everything the process reads from the environment, gathered in one
// place. Courier credentials follow a PREFIX_BASE_URL / PREFIX_API_TOKEN /
// PREFIX_WEBHOOK_SECRET convention per provider.

use crate::couriers::{CourierConfig, CourierSettings, GenericCourier};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub couriers: CourierConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let database_url = std::env::var("DATABASE_URL").ok();

        // A third-party courier can be plugged in without a code change by
        // naming it in GENERIC_COURIER_CODE.
        let generic = std::env::var("GENERIC_COURIER_CODE")
            .ok()
            .filter(|code| !code.is_empty())
            .map(|code| GenericCourier {
                code,
                settings: courier_settings("GENERIC_COURIER"),
            });

        Self {
            host,
            port,
            database_url,
            couriers: CourierConfig {
                ncm: courier_settings("NCM"),
                gaau_besi: courier_settings("GAAU_BESI"),
                generic,
            },
        }
    }
}

fn courier_settings(prefix: &str) -> CourierSettings {
    CourierSettings {
        base_url: env_string(&format!("{prefix}_BASE_URL")),
        api_token: env_string(&format!("{prefix}_API_TOKEN")),
        webhook_secret: env_string(&format!("{prefix}_WEBHOOK_SECRET")),
    }
}

fn env_string(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}
