#![allow(dead_code)]

//! Shared fixtures: an in-memory hub with one fake courier provider wired
//! into the registry, plus actors and order builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use pasalx_backend::couriers::{CourierProvider, CourierRegistry, CourierWebhookEvent};
use pasalx_backend::dispatch::DispatchService;
use pasalx_backend::error::OpsError;
use pasalx_backend::models::manifest::Manifest;
use pasalx_backend::models::order::{
    FulfillmentType, NewOrder, Order, OrderLine, OrderStatus,
};
use pasalx_backend::models::variant::Variant;
use pasalx_backend::models::{Actor, Party, Role};
use pasalx_backend::store::MemoryStore;

pub const PROVIDER: &str = "fake_express";
pub const WEBHOOK_SECRET: &str = "hub-secret";

/// Scriptable courier: bookings can be told to fail, tracking statuses are
/// seeded per tracking id, webhooks carry a real HMAC signature.
pub struct FakeCourier {
    code: String,
    secret: String,
    bookings: AtomicU64,
    failing: AtomicBool,
    tracking: Mutex<HashMap<String, String>>,
}

impl FakeCourier {
    pub fn new(code: &str, secret: &str) -> Self {
        FakeCourier {
            code: code.to_string(),
            secret: secret.to_string(),
            bookings: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            tracking: Mutex::new(HashMap::new()),
        }
    }

    pub fn booking_calls(&self) -> u64 {
        self.bookings.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_tracking(&self, tracking_id: &str, status: &str) {
        self.tracking
            .lock()
            .unwrap()
            .insert(tracking_id.to_string(), status.to_string());
    }
}

#[async_trait]
impl CourierProvider for FakeCourier {
    fn code(&self) -> &str {
        &self.code
    }

    async fn create_booking(&self, _order: &Order, _destination: &str) -> Result<String, OpsError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OpsError::ProviderBookingFailed {
                provider: self.code.clone(),
                reason: "booking api returned 500".to_string(),
            });
        }
        let n = self.bookings.fetch_add(1, Ordering::SeqCst) + 1;
        let tracking_id = format!("FAKE-{n}");
        self.set_tracking(&tracking_id, "PICKED_UP");
        Ok(tracking_id)
    }

    async fn get_tracking(&self, tracking_id: &str) -> Result<String, OpsError> {
        self.tracking
            .lock()
            .unwrap()
            .get(tracking_id)
            .cloned()
            .ok_or_else(|| OpsError::ProviderSyncFailed {
                provider: self.code.clone(),
                reason: format!("unknown tracking id {tracking_id}"),
            })
    }

    fn verify_webhook(&self, body: &str, signature: &str) -> bool {
        sign(body, &self.secret) == signature
    }

    fn parse_webhook(&self, body: &str) -> Result<CourierWebhookEvent, OpsError> {
        let v: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| OpsError::validation(format!("bad webhook body: {e}")))?;
        Ok(CourierWebhookEvent {
            tracking_id: v["tracking_id"].as_str().unwrap_or_default().to_string(),
            provider_status: v["status"].as_str().unwrap_or_default().to_string(),
        })
    }

    fn map_status(&self, provider_status: &str) -> Option<OrderStatus> {
        match provider_status {
            "IN_TRANSIT" => Some(OrderStatus::InTransit),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "REJECTED" => Some(OrderStatus::Rejected),
            "RETURNING" => Some(OrderStatus::ReturnInitiated),
            "RTO" => Some(OrderStatus::Rto),
            "LOST" => Some(OrderStatus::LostInTransit),
            _ => None,
        }
    }
}

pub fn sign(body: &str, secret: &str) -> String {
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn webhook_body(tracking_id: &str, status: &str) -> String {
    serde_json::json!({ "tracking_id": tracking_id, "status": status }).to_string()
}

pub struct Hub {
    pub service: DispatchService,
    pub courier: Arc<FakeCourier>,
}

pub fn hub() -> Hub {
    let store = Arc::new(MemoryStore::new());
    let courier = Arc::new(FakeCourier::new(PROVIDER, WEBHOOK_SECRET));
    let mut registry = CourierRegistry::new();
    registry.register(courier.clone());
    Hub {
        service: DispatchService::new(store, registry),
        courier,
    }
}

pub fn admin() -> Actor {
    Actor { id: 1, role: Role::Admin }
}

pub fn manager() -> Actor {
    Actor { id: 2, role: Role::Manager }
}

pub fn operator() -> Actor {
    Actor { id: 3, role: Role::Operator }
}

pub fn rider(id: i64) -> Actor {
    Actor { id, role: Role::Rider }
}

pub fn valley_order(variant_id: i64, quantity: i64, unit_price: i64) -> NewOrder {
    NewOrder {
        customer_name: "Sita Maharjan".to_string(),
        customer_phone: "9841234567".to_string(),
        delivery_address: "Patan Dhoka, Lalitpur".to_string(),
        destination_branch: None,
        fulfillment: FulfillmentType::InsideValley,
        lines: vec![OrderLine {
            variant_id,
            quantity,
            unit_price: Decimal::from(unit_price),
        }],
        shipping_charge: Decimal::from(100),
        discount: Decimal::ZERO,
        paid_amount: Decimal::ZERO,
    }
}

pub fn branch_order(variant_id: i64, quantity: i64, unit_price: i64) -> NewOrder {
    NewOrder {
        customer_name: "Gita Shrestha".to_string(),
        customer_phone: "9846000000".to_string(),
        delivery_address: "Lakeside, Pokhara".to_string(),
        destination_branch: Some("POKHARA".to_string()),
        fulfillment: FulfillmentType::OutsideValley,
        lines: vec![OrderLine {
            variant_id,
            quantity,
            unit_price: Decimal::from(unit_price),
        }],
        shipping_charge: Decimal::from(150),
        discount: Decimal::ZERO,
        paid_amount: Decimal::ZERO,
    }
}

pub fn counter_order(variant_id: i64, quantity: i64, unit_price: i64) -> NewOrder {
    NewOrder {
        customer_name: "Hari Tamang".to_string(),
        customer_phone: "9803333333".to_string(),
        delivery_address: "over the counter".to_string(),
        destination_branch: None,
        fulfillment: FulfillmentType::Store,
        lines: vec![OrderLine {
            variant_id,
            quantity,
            unit_price: Decimal::from(unit_price),
        }],
        shipping_charge: Decimal::ZERO,
        discount: Decimal::ZERO,
        paid_amount: Decimal::ZERO,
    }
}

pub async fn seed_variant(hub: &Hub, sku: &str, stock: i64) -> Variant {
    hub.service
        .create_variant(sku, "Gundruk 500g", stock, admin())
        .await
        .unwrap()
}

/// Intake -> confirmed -> packed, the common starting point.
pub async fn packed(hub: &Hub, new: NewOrder) -> Order {
    let order = hub.service.create_order(new, operator()).await.unwrap();
    hub.service.confirm_order(order.id, operator()).await.unwrap();
    hub.service.pack_order(order.id, operator()).await.unwrap()
}

pub async fn dispatched_rider_manifest(hub: &Hub, rider_id: i64, order_ids: Vec<i64>) -> Manifest {
    let m = hub
        .service
        .create_manifest(Party::rider(rider_id), order_ids, manager())
        .await
        .unwrap();
    hub.service.dispatch_manifest(m.id, manager()).await.unwrap()
}

pub async fn dispatched_courier_manifest(hub: &Hub, order_ids: Vec<i64>) -> Manifest {
    let m = hub
        .service
        .create_manifest(Party::courier(PROVIDER), order_ids, manager())
        .await
        .unwrap();
    hub.service.dispatch_manifest(m.id, manager()).await.unwrap()
}
