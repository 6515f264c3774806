use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::order::{FulfillmentType, NewOrder, OrderLine};

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub delivery_address: String,
    pub destination_branch: Option<String>,
    pub fulfillment: FulfillmentType,
    pub lines: Vec<NewOrderLine>,
    #[serde(default)]
    pub shipping_charge: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub paid_amount: Decimal,
}

#[derive(Deserialize)]
pub struct NewOrderLine {
    pub variant_id: i64,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl CreateOrderRequest {
    pub fn into_new_order(self) -> NewOrder {
        NewOrder {
            customer_name: self.customer_name,
            customer_phone: self.customer_phone,
            delivery_address: self.delivery_address,
            destination_branch: self.destination_branch,
            fulfillment: self.fulfillment,
            lines: self
                .lines
                .into_iter()
                .map(|l| OrderLine {
                    variant_id: l.variant_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
            shipping_charge: self.shipping_charge,
            discount: self.discount,
            paid_amount: self.paid_amount,
        }
    }
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

// Shared by initiate-return, mark-lost and mark-rto.
#[derive(Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Deserialize, Default)]
pub struct StorePickupRequest {
    pub amount_received: Option<Decimal>,
}

#[derive(Deserialize)]
pub struct CreateVariantRequest {
    pub sku: String,
    pub product_name: String,
    #[serde(default)]
    pub stock_on_hand: i64,
}
