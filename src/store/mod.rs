// src/store/mod.rs
//
// Persistence seam for the fulfillment engine. Every mutating method is one
// atomic intent: the status CAS, its side effects (stock, ledger, manifest
// lines) and the activity row commit together or not at all. Handlers and
// the dispatch services never see a half-applied operation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::OpsError;
use crate::models::handover::{HandoverStatus, ItemCondition, ReturnHandover};
use crate::models::ledger::{LedgerEntry, LedgerEntryKind};
use crate::models::manifest::{Manifest, ManifestStatus};
use crate::models::order::{
    FulfillmentType, NewOrder, Order, OrderActivity, OrderStatus,
};
use crate::models::settlement::Settlement;
use crate::models::sync::LogisticsSyncStatus;
use crate::models::variant::Variant;
use crate::models::{Actor, Party};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ==================== Inputs & filters ====================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub fulfillment: Option<FulfillmentType>,
    pub rider_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestFilter {
    pub status: Option<ManifestStatus>,
    pub rider_id: Option<i64>,
    pub provider: Option<String>,
}

/// Terminal outcome submitted for one manifest line. Rejected and returned
/// parcels both route back through the return gate; the distinction is
/// whether the customer refused at the door or the carrier gave up.
#[derive(Debug, Clone)]
pub enum OutcomeInput {
    Delivered {
        proof: Option<String>,
        cod_collected: Option<Decimal>,
    },
    Rejected {
        reason: String,
    },
    Returned {
        reason: String,
    },
}

/// Claimed item line when a rider or courier hands returned goods back.
#[derive(Debug, Clone)]
pub struct NewHandoverLine {
    pub order_id: i64,
    pub variant_id: i64,
    pub quantity: i64,
    pub condition: ItemCondition,
    pub note: Option<String>,
}

/// Admin verdict for one handover line. `verified_qty` counts the physical
/// units; `disputed` parks the line without crediting anything.
#[derive(Debug, Clone)]
pub struct LineVerification {
    pub order_id: i64,
    pub variant_id: i64,
    pub verified_qty: Option<i64>,
    pub condition: Option<ItemCondition>,
    pub disputed: bool,
    pub note: Option<String>,
}

/// Result of trying to take ownership of an external booking for an order.
#[derive(Debug, Clone)]
pub enum BookingClaim {
    /// This caller owns the claim and must perform the provider call.
    Claimed { attempts: i32 },
    /// A previous call already booked it; no external call is made.
    AlreadyBooked { tracking_id: String },
    /// Another caller is mid-booking; poll the sync row for its result.
    InFlight,
}

// ==================== Trait ====================

#[async_trait]
pub trait OpsStore: Send + Sync {
    // ---- variants / stock ----
    async fn insert_variant(
        &self,
        sku: &str,
        product_name: &str,
        stock_on_hand: i64,
    ) -> Result<Variant, OpsError>;
    async fn get_variant(&self, id: i64) -> Result<Variant, OpsError>;
    async fn list_variants(&self) -> Result<Vec<Variant>, OpsError>;

    // ---- orders ----
    async fn insert_order(&self, new: NewOrder, actor: Actor) -> Result<Order, OpsError>;
    async fn get_order(&self, id: i64) -> Result<Order, OpsError>;
    async fn find_order_by_tracking(
        &self,
        provider: &str,
        tracking_id: &str,
    ) -> Result<Option<Order>, OpsError>;
    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, OpsError>;
    async fn order_activity(&self, order_id: i64) -> Result<Vec<OrderActivity>, OpsError>;

    /// The compare-and-swap primitive every plain status change goes
    /// through. Succeeds only if the current status has an allowed edge to
    /// `to`; a refused attempt appends a `succeeded = false` activity row
    /// and changes nothing else. Targets owned by internal paths (returned,
    /// and delivered for rider-carried orders) are rejected here outright.
    async fn transition_order(
        &self,
        order_id: i64,
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<Order, OpsError>;

    /// confirmed -> packed plus the stock decrement for every line, in one
    /// commit. Insufficient stock leaves both status and stock untouched.
    async fn pack_order(&self, order_id: i64, actor: Actor) -> Result<Order, OpsError>;

    /// Cancel while still at the hub. Refused once the order sits on an
    /// open manifest; pull it off the draft first.
    async fn cancel_order(
        &self,
        order_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<Order, OpsError>;

    // ---- manifests ----
    async fn create_manifest(
        &self,
        owner: Party,
        order_ids: Vec<i64>,
        actor: Actor,
    ) -> Result<Manifest, OpsError>;
    async fn get_manifest(&self, id: i64) -> Result<Manifest, OpsError>;
    async fn list_manifests(&self, filter: ManifestFilter) -> Result<Vec<Manifest>, OpsError>;

    /// The open manifest currently accountable for an order, if any: a
    /// draft that lists it, or a dispatched one whose line is still
    /// pending. Rescheduled and otherwise terminal lines do not bind.
    async fn manifest_for_order(&self, order_id: i64) -> Result<Option<Manifest>, OpsError>;

    async fn add_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError>;
    async fn remove_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError>;

    /// draft -> dispatched exactly once; cascades every order down its
    /// dispatch leg (rider: packed -> assigned -> out_for_delivery,
    /// courier: packed -> handed_to_courier -> in_transit) and freezes
    /// membership.
    async fn dispatch_manifest(&self, manifest_id: i64, actor: Actor)
        -> Result<Manifest, OpsError>;

    /// Terminal outcome for one line. Delivered COD on a rider manifest
    /// appends the rider ledger entry in the same commit.
    async fn record_outcome(
        &self,
        manifest_id: i64,
        order_id: i64,
        outcome: OutcomeInput,
        actor: Actor,
    ) -> Result<Manifest, OpsError>;

    /// Membership escape hatch after dispatch: line -> rescheduled, order
    /// back to packed and free for the next manifest.
    async fn reschedule_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError>;

    async fn close_manifest(&self, manifest_id: i64, actor: Actor) -> Result<Manifest, OpsError>;

    // ---- return gate ----
    async fn create_handover(
        &self,
        source: Party,
        lines: Vec<NewHandoverLine>,
        actor: Actor,
    ) -> Result<ReturnHandover, OpsError>;
    async fn get_handover(&self, id: i64) -> Result<ReturnHandover, OpsError>;
    async fn list_handovers(
        &self,
        status: Option<HandoverStatus>,
    ) -> Result<Vec<ReturnHandover>, OpsError>;

    /// Post admin verdicts for handover lines. Verified sellable units
    /// credit stock and flip their order to returned in the same commit;
    /// disputed lines park. The handover goes `processed` only once no
    /// unresolved line remains, and never twice.
    async fn process_handover(
        &self,
        handover_id: i64,
        verifications: Vec<LineVerification>,
        actor: Actor,
    ) -> Result<ReturnHandover, OpsError>;

    // ---- rider cash ledger ----
    async fn append_ledger_entry(
        &self,
        rider_id: i64,
        kind: LedgerEntryKind,
        delta: Decimal,
        order_id: Option<i64>,
        settlement_id: Option<i64>,
        actor: Actor,
        note: Option<String>,
    ) -> Result<LedgerEntry, OpsError>;
    async fn rider_balance(&self, rider_id: i64) -> Result<Decimal, OpsError>;
    async fn rider_statement(&self, rider_id: i64) -> Result<Vec<LedgerEntry>, OpsError>;

    // ---- settlements ----
    async fn create_settlement(
        &self,
        rider_id: i64,
        declared: Decimal,
        actor: Actor,
    ) -> Result<Settlement, OpsError>;
    async fn get_settlement(&self, id: i64) -> Result<Settlement, OpsError>;
    async fn list_settlements(&self, rider_id: Option<i64>) -> Result<Vec<Settlement>, OpsError>;

    /// pending -> verified; posts the variance (if any) as a ledger
    /// adjustment and closes the rider's settleable manifests, all in one
    /// commit.
    async fn verify_settlement(
        &self,
        settlement_id: i64,
        actual: Decimal,
        actor: Actor,
    ) -> Result<Settlement, OpsError>;

    // ---- logistics sync ----
    /// Take or refuse the booking claim for an order. The external call
    /// happens only after a `Claimed` result commits, so a slow provider
    /// never holds a lock on order state.
    async fn claim_booking(&self, order_id: i64, provider: &str)
        -> Result<BookingClaim, OpsError>;
    async fn complete_booking(
        &self,
        order_id: i64,
        provider: &str,
        tracking_id: &str,
    ) -> Result<LogisticsSyncStatus, OpsError>;
    async fn fail_booking(
        &self,
        order_id: i64,
        provider: &str,
        error: &str,
    ) -> Result<LogisticsSyncStatus, OpsError>;
    async fn sync_status(&self, order_id: i64) -> Result<Option<LogisticsSyncStatus>, OpsError>;
    async fn touch_sync(&self, order_id: i64) -> Result<(), OpsError>;
}
