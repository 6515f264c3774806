//! Generic REST provider for 3PLs without a dedicated integration.
//!
//! Speaks a plain bookings API and reports statuses already in our
//! canonical vocabulary; only delivery-side statuses are accepted.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::OpsError;
use crate::models::order::{Order, OrderStatus};

use super::retry::{retry_call, CallFailure, RetryPolicy};
use super::{signature_matches, CourierProvider, CourierSettings, CourierWebhookEvent};

pub struct GenericProvider {
    code: String,
    client: Client,
    settings: CourierSettings,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct BookingRequest<'a> {
    reference: &'a str,
    customer_name: &'a str,
    customer_phone: &'a str,
    address: &'a str,
    destination: &'a str,
    cod_amount: String,
}

#[derive(Debug, Deserialize)]
struct BookingResponse {
    tracking_id: String,
}

#[derive(Debug, Deserialize)]
struct TrackingResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    tracking_id: String,
    status: String,
}

impl GenericProvider {
    pub fn new(
        code: impl Into<String>,
        client: Client,
        settings: CourierSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            code: code.into(),
            client,
            settings,
            retry,
        }
    }

    async fn post_booking(&self, order: &Order, destination: &str) -> Result<String, CallFailure> {
        let request = BookingRequest {
            reference: &order.order_number,
            customer_name: &order.customer_name,
            customer_phone: &order.customer_phone,
            address: &order.delivery_address,
            destination,
            cod_amount: order.cod_due.to_string(),
        };
        let url = format!("{}/bookings", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallFailure::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallFailure::from_transport(&e))?;
        if !status.is_success() {
            return Err(CallFailure::from_status(status, &body));
        }
        let created: BookingResponse = serde_json::from_str(&body)
            .map_err(|e| CallFailure::permanent(format!("bad booking response: {e}")))?;
        Ok(created.tracking_id)
    }

    async fn fetch_status(&self, tracking_id: &str) -> Result<String, CallFailure> {
        let url = format!("{}/bookings/{tracking_id}", self.settings.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.settings.api_token)
            .send()
            .await
            .map_err(|e| CallFailure::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallFailure::from_transport(&e))?;
        if !status.is_success() {
            return Err(CallFailure::from_status(status, &body));
        }
        let tracking: TrackingResponse = serde_json::from_str(&body)
            .map_err(|e| CallFailure::permanent(format!("bad tracking response: {e}")))?;
        Ok(tracking.status)
    }
}

#[async_trait]
impl CourierProvider for GenericProvider {
    fn code(&self) -> &str {
        &self.code
    }

    async fn create_booking(&self, order: &Order, destination: &str) -> Result<String, OpsError> {
        if !self.settings.is_configured() {
            return Err(OpsError::ProviderBookingFailed {
                provider: self.code.clone(),
                reason: format!("{} credentials not configured", self.code),
            });
        }
        let operation = format!("{} create_booking", self.code);
        let tracking_id = retry_call(&self.retry, &operation, || {
            self.post_booking(order, destination)
        })
        .await
        .map_err(|f| OpsError::ProviderBookingFailed {
            provider: self.code.clone(),
            reason: f.reason,
        })?;
        tracing::info!(
            order_id = order.id,
            provider = %self.code,
            tracking_id = %tracking_id,
            "Courier booking created"
        );
        Ok(tracking_id)
    }

    async fn get_tracking(&self, tracking_id: &str) -> Result<String, OpsError> {
        if !self.settings.is_configured() {
            return Err(OpsError::ProviderSyncFailed {
                provider: self.code.clone(),
                reason: format!("{} credentials not configured", self.code),
            });
        }
        let operation = format!("{} get_tracking", self.code);
        retry_call(&self.retry, &operation, || self.fetch_status(tracking_id))
            .await
            .map_err(|f| OpsError::ProviderSyncFailed {
                provider: self.code.clone(),
                reason: f.reason,
            })
    }

    fn verify_webhook(&self, body: &str, signature: &str) -> bool {
        signature_matches(body, &self.settings.webhook_secret, signature)
    }

    fn parse_webhook(&self, body: &str) -> Result<CourierWebhookEvent, OpsError> {
        let payload: WebhookPayload = serde_json::from_str(body)
            .map_err(|e| OpsError::validation(format!("malformed webhook: {e}")))?;
        Ok(CourierWebhookEvent {
            tracking_id: payload.tracking_id,
            provider_status: payload.status,
        })
    }

    fn map_status(&self, provider_status: &str) -> Option<OrderStatus> {
        let status = OrderStatus::parse(provider_status)?;
        // Hub-side statuses coming from a 3PL are noise, not ours to apply.
        matches!(
            status,
            OrderStatus::InTransit
                | OrderStatus::Delivered
                | OrderStatus::Rejected
                | OrderStatus::ReturnInitiated
                | OrderStatus::Rto
                | OrderStatus::LostInTransit
        )
        .then_some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::super::compute_signature;
    use super::*;

    fn provider() -> GenericProvider {
        GenericProvider::new(
            "upaya",
            Client::new(),
            CourierSettings {
                base_url: "https://api.upaya.test".into(),
                api_token: "u-token".into(),
                webhook_secret: "u-secret".into(),
            },
            RetryPolicy::no_retry(),
        )
    }

    #[test]
    fn test_accepts_delivery_side_statuses_only() {
        let p = provider();
        assert_eq!(p.map_status("delivered"), Some(OrderStatus::Delivered));
        assert_eq!(p.map_status("in_transit"), Some(OrderStatus::InTransit));
        assert_eq!(p.map_status("lost_in_transit"), Some(OrderStatus::LostInTransit));
        // canonical but hub-side
        assert_eq!(p.map_status("packed"), None);
        assert_eq!(p.map_status("returned"), None);
        assert_eq!(p.map_status("gibberish"), None);
    }

    #[test]
    fn test_webhook_signature_and_parse() {
        let p = provider();
        let body = r#"{"tracking_id":"UP-100","status":"delivered"}"#;
        let sig = compute_signature(body, "u-secret").unwrap();
        assert!(p.verify_webhook(body, &sig));
        assert!(!p.verify_webhook(body, &compute_signature(body, "wrong").unwrap()));

        let event = p.parse_webhook(body).unwrap();
        assert_eq!(event.tracking_id, "UP-100");
        assert_eq!(event.provider_status, "delivered");
    }
}
