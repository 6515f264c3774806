// src/couriers/mod.rs
//
// One capability set over every external logistics provider: create a
// booking, poll tracking, authenticate and normalize webhooks. Each
// provider speaks its own wire dialect and status vocabulary; everything
// past the registry works in canonical order statuses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

use crate::error::OpsError;
use crate::models::order::{Order, OrderStatus};

pub mod gaau_besi;
pub mod generic;
pub mod ncm;
pub mod retry;

pub use gaau_besi::GaauBesiProvider;
pub use generic::GenericProvider;
pub use ncm::NcmProvider;
pub use retry::RetryPolicy;

/// Credentials and endpoint for one provider. Empty credentials mean the
/// provider is registered but refuses outbound calls.
#[derive(Debug, Clone, Default)]
pub struct CourierSettings {
    pub base_url: String,
    pub api_token: String,
    pub webhook_secret: String,
}

impl CourierSettings {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_token.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GenericCourier {
    pub code: String,
    pub settings: CourierSettings,
}

#[derive(Debug, Clone, Default)]
pub struct CourierConfig {
    pub ncm: CourierSettings,
    pub gaau_besi: CourierSettings,
    pub generic: Option<GenericCourier>,
}

/// A provider status push, already authenticated, still in the provider's
/// own vocabulary.
#[derive(Debug, Clone)]
pub struct CourierWebhookEvent {
    pub tracking_id: String,
    pub provider_status: String,
}

#[async_trait]
pub trait CourierProvider: Send + Sync {
    fn code(&self) -> &str;

    /// Book one parcel; returns the provider's tracking id. Callers hold
    /// the idempotency claim, so a duplicate call here means a duplicate
    /// booking on the provider side.
    async fn create_booking(&self, order: &Order, destination: &str) -> Result<String, OpsError>;

    /// Latest status in the provider's vocabulary.
    async fn get_tracking(&self, tracking_id: &str) -> Result<String, OpsError>;

    fn verify_webhook(&self, body: &str, signature: &str) -> bool;

    fn parse_webhook(&self, body: &str) -> Result<CourierWebhookEvent, OpsError>;

    /// Per-provider vocabulary lookup. `None` means the status is not ours
    /// to apply; the caller logs and drops it.
    fn map_status(&self, provider_status: &str) -> Option<OrderStatus>;
}

/// HMAC-SHA256 over the raw body, hex-encoded. All current providers sign
/// webhooks this way, differing only in secret and header name.
pub(crate) fn compute_signature(payload: &str, secret: &str) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn signature_matches(payload: &str, secret: &str, signature: &str) -> bool {
    let ok = compute_signature(payload, secret).is_some_and(|expected| expected == signature);
    if !ok {
        tracing::warn!("Webhook signature verification failed");
    }
    ok
}

#[derive(Clone, Default)]
pub struct CourierRegistry {
    providers: HashMap<String, Arc<dyn CourierProvider>>,
}

impl CourierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn CourierProvider>) {
        self.providers.insert(provider.code().to_string(), provider);
    }

    pub fn resolve(&self, code: &str) -> Result<Arc<dyn CourierProvider>, OpsError> {
        self.providers
            .get(code)
            .cloned()
            .ok_or_else(|| OpsError::UnknownProvider(code.to_string()))
    }

    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.providers.keys().cloned().collect();
        codes.sort_unstable();
        codes
    }

    pub fn from_config(config: &CourierConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        let retry = RetryPolicy::default();

        let mut registry = CourierRegistry::new();
        registry.register(Arc::new(NcmProvider::new(
            client.clone(),
            config.ncm.clone(),
            retry.clone(),
        )));
        registry.register(Arc::new(GaauBesiProvider::new(
            client.clone(),
            config.gaau_besi.clone(),
            retry.clone(),
        )));
        if let Some(generic) = &config.generic {
            registry.register(Arc::new(GenericProvider::new(
                generic.code.clone(),
                client,
                generic.settings.clone(),
                retry,
            )));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_by_code() {
        let registry = CourierRegistry::from_config(&CourierConfig::default());
        assert!(registry.resolve("ncm").is_ok());
        assert!(registry.resolve("gaau_besi").is_ok());
        assert!(matches!(
            registry.resolve("pigeon_post"),
            Err(OpsError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_registry_registers_generic_from_config() {
        let config = CourierConfig {
            generic: Some(GenericCourier {
                code: "upaya".into(),
                settings: CourierSettings::default(),
            }),
            ..Default::default()
        };
        let registry = CourierRegistry::from_config(&config);
        assert!(registry.resolve("upaya").is_ok());
        assert_eq!(registry.codes(), vec!["gaau_besi", "ncm", "upaya"]);
    }

    #[test]
    fn test_signature_round_trip() {
        let body = r#"{"tracking_id":"NCM-1","status":"Delivered"}"#;
        let sig = compute_signature(body, "hub-secret").unwrap();
        assert!(signature_matches(body, "hub-secret", &sig));
        assert!(!signature_matches(body, "other-secret", &sig));
        assert!(!signature_matches(body, "hub-secret", "deadbeef"));
    }
}
