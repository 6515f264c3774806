use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Role;

// ==================== Enums ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    InsideValley,  // own rider fleet
    OutsideValley, // third-party courier
    Store,         // customer picks up at the shop
}

impl FulfillmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentType::InsideValley => "inside_valley",
            FulfillmentType::OutsideValley => "outside_valley",
            FulfillmentType::Store => "store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inside_valley" => Some(FulfillmentType::InsideValley),
            "outside_valley" => Some(FulfillmentType::OutsideValley),
            "store" => Some(FulfillmentType::Store),
            _ => None,
        }
    }

    pub fn rider_carried(&self) -> bool {
        matches!(self, FulfillmentType::InsideValley)
    }

    pub fn courier_carried(&self) -> bool {
        matches!(self, FulfillmentType::OutsideValley)
    }

    /// Store pickups are handed over the counter; no proof capture.
    pub fn requires_proof(&self) -> bool {
        !matches!(self, FulfillmentType::Store)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Intake,
    Confirmed,
    Packed,
    Assigned,        // on a dispatched rider manifest
    HandedToCourier, // on a dispatched courier manifest
    OutForDelivery,  // rider en route
    InTransit,       // courier network
    Delivered,
    Rejected,        // refused / undeliverable at the door
    ReturnInitiated, // coming back, stock NOT credited yet
    Returned,        // physically verified back in stock
    Rto,             // courier return-to-origin, parcel still with courier
    LostInTransit,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 14] = [
        OrderStatus::Intake,
        OrderStatus::Confirmed,
        OrderStatus::Packed,
        OrderStatus::Assigned,
        OrderStatus::HandedToCourier,
        OrderStatus::OutForDelivery,
        OrderStatus::InTransit,
        OrderStatus::Delivered,
        OrderStatus::Rejected,
        OrderStatus::ReturnInitiated,
        OrderStatus::Returned,
        OrderStatus::Rto,
        OrderStatus::LostInTransit,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Intake => "intake",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Packed => "packed",
            OrderStatus::Assigned => "assigned",
            OrderStatus::HandedToCourier => "handed_to_courier",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Rejected => "rejected",
            OrderStatus::ReturnInitiated => "return_initiated",
            OrderStatus::Returned => "returned",
            OrderStatus::Rto => "rto",
            OrderStatus::LostInTransit => "lost_in_transit",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// The one transition table. Every status write in the system goes
    /// through a check against this, never through ad hoc comparisons.
    pub fn can_move_to(self, to: OrderStatus, fulfillment: FulfillmentType) -> bool {
        use FulfillmentType::*;
        use OrderStatus::*;
        match (self, to) {
            (Intake, Confirmed) => true,
            (Confirmed, Packed) => true,

            // Dispatch leg depends on who carries the parcel.
            (Packed, Assigned) => fulfillment == InsideValley,
            (Packed, HandedToCourier) => fulfillment == OutsideValley,
            // Store pickups skip custody entirely.
            (Packed, Delivered) => fulfillment == Store,
            (Assigned, OutForDelivery) => true,
            (HandedToCourier, InTransit) => true,

            // Reschedule: undelivered order pulled back to the shelf.
            (Assigned | HandedToCourier | OutForDelivery | InTransit, Packed) => true,

            // Route outcomes.
            (OutForDelivery | InTransit, Delivered) => true,
            (OutForDelivery | InTransit, Rejected) => true,
            (OutForDelivery | InTransit, ReturnInitiated) => true,
            (OutForDelivery | InTransit, LostInTransit) => true,
            (InTransit, Rto) => fulfillment == OutsideValley,

            // Reverse logistics.
            (Delivered, ReturnInitiated) => true,
            (Rejected, ReturnInitiated) => true,
            (ReturnInitiated, Rto) => fulfillment == OutsideValley,
            (ReturnInitiated | Rto, Returned) => true,

            // Cancellation only before the parcel leaves the hub.
            (Intake | Confirmed | Packed, Cancelled) => true,

            _ => false,
        }
    }

    /// Targets that only the return verification path may write. A plain
    /// transition request to one of these is always rejected, whatever the
    /// current status: stock credit must ride on the same commit.
    pub fn gate_only(to: OrderStatus) -> bool {
        matches!(to, OrderStatus::Returned)
    }

    /// Every status from which `to` is reachable, used as the
    /// compare-and-swap predicate set.
    pub fn sources_for(to: OrderStatus, fulfillment: FulfillmentType) -> Vec<OrderStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|from| from.can_move_to(to, fulfillment))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Returned | OrderStatus::LostInTransit | OrderStatus::Cancelled
        )
    }

    /// Still at the hub: no manifest has ever been dispatched for it.
    pub fn pre_dispatch(self) -> bool {
        matches!(
            self,
            OrderStatus::Intake | OrderStatus::Confirmed | OrderStatus::Packed
        )
    }
}

// ==================== Order ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: i64,
    pub quantity: i64,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub delivery_address: String,
    /// Destination branch code for outside-valley bookings (e.g. "POKHARA").
    pub destination_branch: Option<String>,
    pub fulfillment: FulfillmentType,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub shipping_charge: Decimal,
    pub discount: Decimal,
    pub cod_due: Decimal,
    pub paid_amount: Decimal,
    pub rider_id: Option<i64>,
    pub courier: Option<String>,
    pub tracking_id: Option<String>,
    pub delivery_proof: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
impl Order {
    /// Bare outside-valley order for adapter tests.
    pub fn sample_outside_valley() -> Self {
        Order {
            id: 1,
            order_number: "PX-00001".into(),
            customer_name: "Gita Shrestha".into(),
            customer_phone: "9841000000".into(),
            delivery_address: "Lakeside, Pokhara".into(),
            destination_branch: Some("POKHARA".into()),
            fulfillment: FulfillmentType::OutsideValley,
            status: OrderStatus::Packed,
            lines: vec![OrderLine {
                variant_id: 1,
                quantity: 1,
                unit_price: Decimal::from(500),
            }],
            subtotal: Decimal::from(500),
            shipping_charge: Decimal::from(150),
            discount: Decimal::ZERO,
            cod_due: Decimal::from(650),
            paid_amount: Decimal::ZERO,
            rider_id: None,
            courier: None,
            tracking_id: None,
            delivery_proof: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Insert shape for order intake; ids and timestamps are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_name: String,
    pub customer_phone: String,
    pub delivery_address: String,
    pub destination_branch: Option<String>,
    pub fulfillment: FulfillmentType,
    pub lines: Vec<OrderLine>,
    pub shipping_charge: Decimal,
    pub discount: Decimal,
    pub paid_amount: Decimal,
}

impl NewOrder {
    pub fn subtotal(&self) -> Decimal {
        self.lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum()
    }

    pub fn cod_due(&self) -> Decimal {
        self.subtotal() + self.shipping_charge - self.discount - self.paid_amount
    }
}

/// One row of the audit trail. Appended for every transition attempt,
/// including refused ones (`succeeded = false`, status untouched).
#[derive(Debug, Clone, Serialize)]
pub struct OrderActivity {
    pub id: i64,
    pub order_id: i64,
    pub actor_id: i64,
    pub actor_role: Role,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub note: Option<String>,
    pub succeeded: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_inside_valley() {
        use OrderStatus::*;
        let f = FulfillmentType::InsideValley;
        assert!(Intake.can_move_to(Confirmed, f));
        assert!(Confirmed.can_move_to(Packed, f));
        assert!(Packed.can_move_to(Assigned, f));
        assert!(Assigned.can_move_to(OutForDelivery, f));
        assert!(OutForDelivery.can_move_to(Delivered, f));
        // and not the courier leg
        assert!(!Packed.can_move_to(HandedToCourier, f));
        assert!(!InTransit.can_move_to(Rto, f));
    }

    #[test]
    fn forward_path_outside_valley() {
        use OrderStatus::*;
        let f = FulfillmentType::OutsideValley;
        assert!(Packed.can_move_to(HandedToCourier, f));
        assert!(HandedToCourier.can_move_to(InTransit, f));
        assert!(InTransit.can_move_to(Delivered, f));
        assert!(InTransit.can_move_to(Rto, f));
        assert!(!Packed.can_move_to(Assigned, f));
    }

    #[test]
    fn store_pickup_skips_custody() {
        use OrderStatus::*;
        let f = FulfillmentType::Store;
        assert!(Packed.can_move_to(Delivered, f));
        assert!(!Packed.can_move_to(Assigned, f));
        assert!(!Packed.can_move_to(HandedToCourier, f));
    }

    #[test]
    fn cancel_only_pre_dispatch() {
        use OrderStatus::*;
        let f = FulfillmentType::InsideValley;
        for from in [Intake, Confirmed, Packed] {
            assert!(from.can_move_to(Cancelled, f), "{from:?} should cancel");
        }
        for from in [Assigned, OutForDelivery, Delivered, Returned, LostInTransit] {
            assert!(!from.can_move_to(Cancelled, f), "{from:?} must not cancel");
        }
    }

    #[test]
    fn returned_is_gate_only_and_narrow() {
        use OrderStatus::*;
        assert!(OrderStatus::gate_only(Returned));
        assert!(!OrderStatus::gate_only(Delivered));
        let f = FulfillmentType::InsideValley;
        let sources = OrderStatus::sources_for(Returned, f);
        assert_eq!(sources, vec![ReturnInitiated, Rto]);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use OrderStatus::*;
        for from in [Returned, LostInTransit, Cancelled] {
            for to in OrderStatus::ALL {
                assert!(
                    !from.can_move_to(to, FulfillmentType::InsideValley),
                    "{from:?} -> {to:?} should be refused"
                );
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("no_such_status"), None);
    }

    #[test]
    fn cod_due_derives_from_lines() {
        let order = NewOrder {
            customer_name: "Sita".into(),
            customer_phone: "98XXXXXXXX".into(),
            delivery_address: "Baneshwor".into(),
            destination_branch: None,
            fulfillment: FulfillmentType::InsideValley,
            lines: vec![
                OrderLine { variant_id: 1, quantity: 2, unit_price: Decimal::from(450) },
                OrderLine { variant_id: 2, quantity: 1, unit_price: Decimal::from(100) },
            ],
            shipping_charge: Decimal::from(100),
            discount: Decimal::from(50),
            paid_amount: Decimal::ZERO,
        };
        assert_eq!(order.subtotal(), Decimal::from(1000));
        assert_eq!(order.cod_due(), Decimal::from(1050));
    }
}
