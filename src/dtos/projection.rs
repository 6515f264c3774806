use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::order::{FulfillmentType, Order, OrderStatus};
use crate::models::Role;

/// One response schema for every order-returning endpoint. What a caller
/// may see is decided here by role, not by per-handler field surgery:
/// riders get the door-side view (address, the COD to collect, their own
/// lines), staff get the full commercial record.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: i64,
    pub order_number: String,
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub delivery_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_branch: Option<String>,
    pub fulfillment: FulfillmentType,
    pub status: OrderStatus,
    pub lines: Vec<OrderLineView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_charge: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    pub cod_due: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_proof: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderLineView {
    pub variant_id: i64,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
}

impl OrderView {
    pub fn project(order: &Order, role: Role) -> Self {
        match role {
            Role::Rider => Self::rider_view(order),
            _ => Self::staff_view(order),
        }
    }

    fn staff_view(order: &Order) -> Self {
        OrderView {
            id: order.id,
            order_number: order.order_number.clone(),
            customer_name: order.customer_name.clone(),
            customer_phone: Some(order.customer_phone.clone()),
            delivery_address: order.delivery_address.clone(),
            destination_branch: order.destination_branch.clone(),
            fulfillment: order.fulfillment,
            status: order.status,
            lines: order
                .lines
                .iter()
                .map(|l| OrderLineView {
                    variant_id: l.variant_id,
                    quantity: l.quantity,
                    unit_price: Some(l.unit_price),
                })
                .collect(),
            subtotal: Some(order.subtotal),
            shipping_charge: Some(order.shipping_charge),
            discount: Some(order.discount),
            paid_amount: Some(order.paid_amount),
            cod_due: order.cod_due,
            rider_id: order.rider_id,
            courier: order.courier.clone(),
            tracking_id: order.tracking_id.clone(),
            delivery_proof: order.delivery_proof.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }

    /// Pricing internals and the customer's phone stay at the hub; the
    /// rider carries what the doorstep needs.
    fn rider_view(order: &Order) -> Self {
        OrderView {
            id: order.id,
            order_number: order.order_number.clone(),
            customer_name: order.customer_name.clone(),
            customer_phone: None,
            delivery_address: order.delivery_address.clone(),
            destination_branch: None,
            fulfillment: order.fulfillment,
            status: order.status,
            lines: order
                .lines
                .iter()
                .map(|l| OrderLineView {
                    variant_id: l.variant_id,
                    quantity: l.quantity,
                    unit_price: None,
                })
                .collect(),
            subtotal: None,
            shipping_charge: None,
            discount: None,
            paid_amount: None,
            cod_due: order.cod_due,
            rider_id: order.rider_id,
            courier: None,
            tracking_id: None,
            delivery_proof: order.delivery_proof.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_view_keeps_the_full_record() {
        let order = Order::sample_outside_valley();
        let view = OrderView::project(&order, Role::Manager);
        assert_eq!(view.customer_phone.as_deref(), Some("9841000000"));
        assert!(view.subtotal.is_some());
        assert!(view.lines[0].unit_price.is_some());
    }

    #[test]
    fn rider_view_masks_money_and_contact() {
        let order = Order::sample_outside_valley();
        let view = OrderView::project(&order, Role::Rider);
        assert!(view.customer_phone.is_none());
        assert!(view.subtotal.is_none());
        assert!(view.discount.is_none());
        assert!(view.lines[0].unit_price.is_none());
        assert_eq!(view.cod_due, order.cod_due);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("customer_phone").is_none());
        assert!(json.get("subtotal").is_none());
        assert!(json.get("cod_due").is_some());
    }
}
