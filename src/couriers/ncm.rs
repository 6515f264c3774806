//! Nepal Can Move (NCM) provider client.
//!
//! NCM books by branch pair and returns a numeric order id that serves as
//! the tracking id. Status pushes arrive as signed webhooks with NCM's own
//! status phrases.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::OpsError;
use crate::models::order::{Order, OrderStatus};

use super::retry::{retry_call, CallFailure, RetryPolicy};
use super::{signature_matches, CourierProvider, CourierSettings, CourierWebhookEvent};

/// Branch the parcels leave from.
const ORIGIN_BRANCH: &str = "TINKUNE";

pub struct NcmProvider {
    client: Client,
    settings: CourierSettings,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct NcmCreateRequest<'a> {
    name: &'a str,
    phone: &'a str,
    address: &'a str,
    fbranch: &'a str,
    branch: &'a str,
    cod_charge: String,
}

#[derive(Debug, Deserialize)]
struct NcmCreateResponse {
    orderid: i64,
}

#[derive(Debug, Deserialize)]
struct NcmStatusEntry {
    status: String,
}

#[derive(Debug, Deserialize)]
struct NcmWebhookPayload {
    orderid: i64,
    status: String,
}

impl NcmProvider {
    pub fn new(client: Client, settings: CourierSettings, retry: RetryPolicy) -> Self {
        Self {
            client,
            settings,
            retry,
        }
    }

    async fn post_booking(&self, order: &Order, destination: &str) -> Result<i64, CallFailure> {
        let request = NcmCreateRequest {
            name: &order.customer_name,
            phone: &order.customer_phone,
            address: &order.delivery_address,
            fbranch: ORIGIN_BRANCH,
            branch: destination,
            cod_charge: order.cod_due.to_string(),
        };
        let url = format!("{}/api/v1/order/create", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.settings.api_token))
            .json(&request)
            .send()
            .await
            .map_err(|e| CallFailure::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallFailure::from_transport(&e))?;
        tracing::debug!(status = %status, body = %body, "NCM create response");
        if !status.is_success() {
            return Err(CallFailure::from_status(status, &body));
        }
        let created: NcmCreateResponse = serde_json::from_str(&body)
            .map_err(|e| CallFailure::permanent(format!("bad NCM response: {e}")))?;
        Ok(created.orderid)
    }

    async fn fetch_status(&self, tracking_id: &str) -> Result<String, CallFailure> {
        let url = format!(
            "{}/api/v1/order/status?id={tracking_id}",
            self.settings.base_url
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.settings.api_token))
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
        // NCM returns the status trail newest-first.
        let entries: Vec<NcmStatusEntry> = serde_json::from_str(&body)
            .map_err(|e| CallFailure::permanent(format!("bad NCM response: {e}")))?;
        entries
            .into_iter()
            .next()
            .map(|e| e.status)
            .ok_or_else(|| CallFailure::permanent("NCM returned an empty status trail"))
    }
}

#[async_trait]
impl CourierProvider for NcmProvider {
    fn code(&self) -> &str {
        "ncm"
    }

    async fn create_booking(&self, order: &Order, destination: &str) -> Result<String, OpsError> {
        if !self.settings.is_configured() {
            return Err(OpsError::ProviderBookingFailed {
                provider: self.code().to_string(),
                reason: "NCM credentials not configured".to_string(),
            });
        }
        let orderid = retry_call(&self.retry, "ncm create_booking", || {
            self.post_booking(order, destination)
        })
        .await
        .map_err(|f| OpsError::ProviderBookingFailed {
            provider: self.code().to_string(),
            reason: f.reason,
        })?;
        tracing::info!(order_id = order.id, tracking_id = orderid, "NCM booking created");
        Ok(orderid.to_string())
    }

    async fn get_tracking(&self, tracking_id: &str) -> Result<String, OpsError> {
        if !self.settings.is_configured() {
            return Err(OpsError::ProviderSyncFailed {
                provider: self.code().to_string(),
                reason: "NCM credentials not configured".to_string(),
            });
        }
        retry_call(&self.retry, "ncm get_tracking", || {
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
        let payload: NcmWebhookPayload = serde_json::from_str(body)
            .map_err(|e| OpsError::validation(format!("malformed NCM webhook: {e}")))?;
        Ok(CourierWebhookEvent {
            tracking_id: payload.orderid.to_string(),
            provider_status: payload.status,
        })
    }

    fn map_status(&self, provider_status: &str) -> Option<OrderStatus> {
        match provider_status {
            "Pickup Complete" => Some(OrderStatus::InTransit),
            "Sent for Delivery" => Some(OrderStatus::InTransit),
            "Delivered" => Some(OrderStatus::Delivered),
            "Customer Refused" => Some(OrderStatus::Rejected),
            "Return Initiated" => Some(OrderStatus::ReturnInitiated),
            "Returned to Vendor" => Some(OrderStatus::Rto),
            "Shipment Lost" => Some(OrderStatus::LostInTransit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::compute_signature;
    use super::*;

    fn provider() -> NcmProvider {
        NcmProvider::new(
            Client::new(),
            CourierSettings {
                base_url: "https://portal.nepalcanmove.test".into(),
                api_token: "token-123".into(),
                webhook_secret: "ncm-secret".into(),
            },
            RetryPolicy::no_retry(),
        )
    }

    #[test]
    fn test_status_vocabulary() {
        let p = provider();
        assert_eq!(p.map_status("Delivered"), Some(OrderStatus::Delivered));
        assert_eq!(p.map_status("Sent for Delivery"), Some(OrderStatus::InTransit));
        assert_eq!(p.map_status("Returned to Vendor"), Some(OrderStatus::Rto));
        assert_eq!(p.map_status("Out for Lunch"), None);
    }

    #[test]
    fn test_webhook_parse_and_verify() {
        let p = provider();
        let body = r#"{"orderid":90210,"status":"Delivered"}"#;
        let sig = compute_signature(body, "ncm-secret").unwrap();
        assert!(p.verify_webhook(body, &sig));
        assert!(!p.verify_webhook(body, "bogus"));

        let event = p.parse_webhook(body).unwrap();
        assert_eq!(event.tracking_id, "90210");
        assert_eq!(event.provider_status, "Delivered");
    }

    #[test]
    fn test_webhook_rejects_malformed_body() {
        let p = provider();
        assert!(p.parse_webhook("not json").is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_booking_refused() {
        let p = NcmProvider::new(
            Client::new(),
            CourierSettings::default(),
            RetryPolicy::no_retry(),
        );
        let order = crate::models::order::Order::sample_outside_valley();
        let err = p.create_booking(&order, "POKHARA").await.unwrap_err();
        assert!(matches!(err, OpsError::ProviderBookingFailed { .. }));
    }
}
