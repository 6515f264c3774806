//! Gaau Besi Logistics provider client.
//!
//! Gaau Besi issues string shipment ids ("GB-...") and pushes snake_case
//! status events. Authentication is a bearer token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::OpsError;
use crate::models::order::{Order, OrderStatus};

use super::retry::{retry_call, CallFailure, RetryPolicy};
use super::{signature_matches, CourierProvider, CourierSettings, CourierWebhookEvent};

pub struct GaauBesiProvider {
    client: Client,
    settings: CourierSettings,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct GbShipmentRequest<'a> {
    receiver_name: &'a str,
    receiver_phone: &'a str,
    address: &'a str,
    destination_branch: &'a str,
    cod_amount: String,
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct GbShipmentResponse {
    shipment_id: String,
}

#[derive(Debug, Deserialize)]
struct GbTrackingResponse {
    current_status: String,
}

#[derive(Debug, Deserialize)]
struct GbWebhookPayload {
    shipment_id: String,
    event: String,
}

impl GaauBesiProvider {
    pub fn new(client: Client, settings: CourierSettings, retry: RetryPolicy) -> Self {
        Self {
            client,
            settings,
            retry,
        }
    }

    async fn post_shipment(&self, order: &Order, destination: &str) -> Result<String, CallFailure> {
        let request = GbShipmentRequest {
            receiver_name: &order.customer_name,
            receiver_phone: &order.customer_phone,
            address: &order.delivery_address,
            destination_branch: destination,
            cod_amount: order.cod_due.to_string(),
            reference: &order.order_number,
        };
        let url = format!("{}/v2/shipments", self.settings.base_url);
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
        tracing::debug!(status = %status, body = %body, "Gaau Besi shipment response");
        if !status.is_success() {
            return Err(CallFailure::from_status(status, &body));
        }
        let created: GbShipmentResponse = serde_json::from_str(&body)
            .map_err(|e| CallFailure::permanent(format!("bad Gaau Besi response: {e}")))?;
        Ok(created.shipment_id)
    }

    async fn fetch_status(&self, tracking_id: &str) -> Result<String, CallFailure> {
        let url = format!("{}/v2/shipments/{tracking_id}", self.settings.base_url);
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
        let tracking: GbTrackingResponse = serde_json::from_str(&body)
            .map_err(|e| CallFailure::permanent(format!("bad Gaau Besi response: {e}")))?;
        Ok(tracking.current_status)
    }
}

#[async_trait]
impl CourierProvider for GaauBesiProvider {
    fn code(&self) -> &str {
        "gaau_besi"
    }

    async fn create_booking(&self, order: &Order, destination: &str) -> Result<String, OpsError> {
        if !self.settings.is_configured() {
            return Err(OpsError::ProviderBookingFailed {
                provider: self.code().to_string(),
                reason: "Gaau Besi credentials not configured".to_string(),
            });
        }
        let shipment_id = retry_call(&self.retry, "gaau_besi create_booking", || {
            self.post_shipment(order, destination)
        })
        .await
        .map_err(|f| OpsError::ProviderBookingFailed {
            provider: self.code().to_string(),
            reason: f.reason,
        })?;
        tracing::info!(
            order_id = order.id,
            tracking_id = %shipment_id,
            "Gaau Besi shipment created"
        );
        Ok(shipment_id)
    }

    async fn get_tracking(&self, tracking_id: &str) -> Result<String, OpsError> {
        if !self.settings.is_configured() {
            return Err(OpsError::ProviderSyncFailed {
                provider: self.code().to_string(),
                reason: "Gaau Besi credentials not configured".to_string(),
            });
        }
        retry_call(&self.retry, "gaau_besi get_tracking", || {
            self.fetch_status(tracking_id)
        })
        .await
        .map_err(|f| OpsError::ProviderSyncFailed {
            provider: self.code().to_string(),
            reason: f.reason,
        })
    }

    fn verify_webhook(&self, body: &str, signature: &str) -> bool {
        signature_matches(body, &self.settings.webhook_secret, signature)
    }

    fn parse_webhook(&self, body: &str) -> Result<CourierWebhookEvent, OpsError> {
        let payload: GbWebhookPayload = serde_json::from_str(body)
            .map_err(|e| OpsError::validation(format!("malformed Gaau Besi webhook: {e}")))?;
        Ok(CourierWebhookEvent {
            tracking_id: payload.shipment_id,
            provider_status: payload.event,
        })
    }

    fn map_status(&self, provider_status: &str) -> Option<OrderStatus> {
        match provider_status {
            "picked_up" => Some(OrderStatus::InTransit),
            "in_transit" => Some(OrderStatus::InTransit),
            "out_for_delivery" => Some(OrderStatus::InTransit),
            "delivered" => Some(OrderStatus::Delivered),
            "receiver_refused" => Some(OrderStatus::Rejected),
            "rto_initiated" => Some(OrderStatus::ReturnInitiated),
            "rto_completed" => Some(OrderStatus::Rto),
            "lost" => Some(OrderStatus::LostInTransit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::compute_signature;
    use super::*;

    fn provider() -> GaauBesiProvider {
        GaauBesiProvider::new(
            Client::new(),
            CourierSettings {
                base_url: "https://api.gaaubesi.test".into(),
                api_token: "gb-token".into(),
                webhook_secret: "gb-secret".into(),
            },
            RetryPolicy::no_retry(),
        )
    }

    #[test]
    fn test_status_vocabulary() {
        let p = provider();
        assert_eq!(p.map_status("delivered"), Some(OrderStatus::Delivered));
        assert_eq!(p.map_status("receiver_refused"), Some(OrderStatus::Rejected));
        assert_eq!(p.map_status("rto_completed"), Some(OrderStatus::Rto));
        assert_eq!(p.map_status("teleported"), None);
    }

    #[test]
    fn test_webhook_parse_and_verify() {
        let p = provider();
        let body = r#"{"shipment_id":"GB-7781","event":"out_for_delivery"}"#;
        let sig = compute_signature(body, "gb-secret").unwrap();
        assert!(p.verify_webhook(body, &sig));

        let event = p.parse_webhook(body).unwrap();
        assert_eq!(event.tracking_id, "GB-7781");
        assert_eq!(event.provider_status, "out_for_delivery");
    }
}
