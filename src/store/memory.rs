// src/store/memory.rs
//
// In-memory OpsStore. One mutex over the whole world gives every intent
// method the same all-or-nothing behaviour the Postgres store gets from
// transactions: validate first, mutate only after nothing can fail. Used
// when DATABASE_URL is unset and by the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::error::OpsError;
use crate::models::handover::{HandoverLine, HandoverStatus, ReturnHandover};
use crate::models::ledger::{LedgerEntry, LedgerEntryKind};
use crate::models::manifest::{LineOutcome, Manifest, ManifestLine, ManifestStatus};
use crate::models::order::{NewOrder, Order, OrderActivity, OrderStatus};
use crate::models::settlement::{Settlement, SettlementStatus};
use crate::models::sync::{LogisticsSyncStatus, SyncState};
use crate::models::variant::Variant;
use crate::models::{Actor, Party};

use super::{
    BookingClaim, LineVerification, ManifestFilter, NewHandoverLine, OpsStore, OrderFilter,
    OutcomeInput,
};

#[derive(Default)]
struct World {
    next_variant_id: i64,
    next_order_id: i64,
    next_activity_id: i64,
    next_manifest_id: i64,
    next_handover_id: i64,
    next_ledger_id: i64,
    next_settlement_id: i64,
    variants: HashMap<i64, Variant>,
    orders: HashMap<i64, Order>,
    activities: Vec<OrderActivity>,
    manifests: HashMap<i64, Manifest>,
    handovers: HashMap<i64, ReturnHandover>,
    ledger: Vec<LedgerEntry>,
    settlements: HashMap<i64, Settlement>,
    sync: HashMap<i64, LogisticsSyncStatus>,
}

impl World {
    fn order(&self, id: i64) -> Result<&Order, OpsError> {
        self.orders.get(&id).ok_or(OpsError::not_found("order", id))
    }

    fn variant(&self, id: i64) -> Result<&Variant, OpsError> {
        self.variants
            .get(&id)
            .ok_or(OpsError::not_found("variant", id))
    }

    fn manifest(&self, id: i64) -> Result<&Manifest, OpsError> {
        self.manifests
            .get(&id)
            .ok_or(OpsError::not_found("manifest", id))
    }

    fn log(
        &mut self,
        order_id: i64,
        actor: Actor,
        from: OrderStatus,
        to: OrderStatus,
        note: Option<String>,
        succeeded: bool,
    ) {
        self.next_activity_id += 1;
        self.activities.push(OrderActivity {
            id: self.next_activity_id,
            order_id,
            actor_id: actor.id,
            actor_role: actor.role,
            from_status: from,
            to_status: to,
            note,
            succeeded,
            created_at: Utc::now(),
        });
    }

    /// Checked CAS: refuse off-table edges with a failed activity row,
    /// otherwise write the status and the success row.
    fn cas_status(
        &mut self,
        order_id: i64,
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<(), OpsError> {
        let (from, fulfillment) = {
            let order = self.order(order_id)?;
            (order.status, order.fulfillment)
        };
        if !from.can_move_to(to, fulfillment) {
            self.log(order_id, actor, from, to, note, false);
            return Err(OpsError::InvalidTransition {
                order_id,
                from,
                to,
            });
        }
        self.force_status(order_id, to, actor, note)
    }

    /// Unchecked write for cascades whose edges were validated up front.
    fn force_status(
        &mut self,
        order_id: i64,
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<(), OpsError> {
        let from = {
            let order = self
                .orders
                .get_mut(&order_id)
                .ok_or(OpsError::not_found("order", order_id))?;
            let from = order.status;
            order.status = to;
            order.updated_at = Utc::now();
            from
        };
        self.log(order_id, actor, from, to, note, true);
        Ok(())
    }

    /// The open manifest bound to an order: a draft listing it, or a
    /// dispatched one whose line is still pending.
    fn binding_manifest(&self, order_id: i64) -> Option<&Manifest> {
        self.manifests.values().find(|m| match m.status {
            ManifestStatus::Draft => m.line(order_id).is_some(),
            ManifestStatus::Dispatched => m
                .line(order_id)
                .map(|l| l.outcome == LineOutcome::Pending)
                .unwrap_or(false),
            ManifestStatus::Closed => false,
        })
    }

    /// An order marked lost or RTO while its line is still pending would
    /// park the manifest with no recordable outcome left; close the line
    /// with the matching verdict instead.
    fn settle_line_for_terminal_mark(&mut self, order_id: i64, to: OrderStatus) {
        let outcome = match to {
            OrderStatus::LostInTransit => LineOutcome::Lost,
            OrderStatus::Rto => LineOutcome::Returned,
            _ => return,
        };
        for m in self.manifests.values_mut() {
            if m.status != ManifestStatus::Dispatched {
                continue;
            }
            if let Some(line) = m
                .lines
                .iter_mut()
                .find(|l| l.order_id == order_id && l.outcome == LineOutcome::Pending)
            {
                line.outcome = outcome;
                line.note = Some(format!("order marked {}", to.as_str()));
                line.recorded_at = Some(Utc::now());
            }
        }
    }

    fn balance_of(&self, rider_id: i64) -> Decimal {
        self.ledger
            .iter()
            .filter(|e| e.rider_id == rider_id)
            .map(|e| e.delta)
            .sum()
    }

    fn push_ledger(
        &mut self,
        rider_id: i64,
        kind: LedgerEntryKind,
        delta: Decimal,
        order_id: Option<i64>,
        settlement_id: Option<i64>,
        actor: Actor,
        note: Option<String>,
    ) -> LedgerEntry {
        self.next_ledger_id += 1;
        let entry = LedgerEntry {
            id: self.next_ledger_id,
            rider_id,
            kind,
            delta,
            balance_after: self.balance_of(rider_id) + delta,
            order_id,
            settlement_id,
            actor_id: actor.id,
            note,
            created_at: Utc::now(),
        };
        self.ledger.push(entry.clone());
        entry
    }

    /// Checks an order may join a manifest with this owner right now.
    fn check_manifestable(&self, order_id: i64, owner: &Party) -> Result<(), OpsError> {
        let order = self.order(order_id)?;
        match owner {
            Party::Rider { .. } if !order.fulfillment.rider_carried() => {
                return Err(OpsError::validation(format!(
                    "order {} is {}, rider manifests carry inside-valley orders only",
                    order.order_number,
                    order.fulfillment.as_str()
                )))
            }
            Party::Courier { .. } if !order.fulfillment.courier_carried() => {
                return Err(OpsError::validation(format!(
                    "order {} is {}, courier manifests carry outside-valley orders only",
                    order.order_number,
                    order.fulfillment.as_str()
                )))
            }
            _ => {}
        }
        if order.status != OrderStatus::Packed {
            return Err(OpsError::validation(format!(
                "order {} is {}, only packed orders join a manifest",
                order.order_number,
                order.status.as_str()
            )));
        }
        if let Some(m) = self.binding_manifest(order_id) {
            tracing::debug!(order_id, manifest_id = m.id, "order already bound to manifest");
            return Err(OpsError::OrderAlreadyManifested(order_id));
        }
        Ok(())
    }
}

pub struct MemoryStore {
    world: Mutex<World>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            world: Mutex::new(World::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpsStore for MemoryStore {
    // ---- variants ----

    async fn insert_variant(
        &self,
        sku: &str,
        product_name: &str,
        stock_on_hand: i64,
    ) -> Result<Variant, OpsError> {
        if stock_on_hand < 0 {
            return Err(OpsError::validation("stock_on_hand must not be negative"));
        }
        let mut w = self.world.lock().await;
        if w.variants.values().any(|v| v.sku == sku) {
            return Err(OpsError::validation(format!("sku {sku} already exists")));
        }
        w.next_variant_id += 1;
        let variant = Variant {
            id: w.next_variant_id,
            sku: sku.to_string(),
            product_name: product_name.to_string(),
            stock_on_hand,
        };
        w.variants.insert(variant.id, variant.clone());
        Ok(variant)
    }

    async fn get_variant(&self, id: i64) -> Result<Variant, OpsError> {
        let w = self.world.lock().await;
        w.variant(id).cloned()
    }

    async fn list_variants(&self) -> Result<Vec<Variant>, OpsError> {
        let w = self.world.lock().await;
        let mut all: Vec<Variant> = w.variants.values().cloned().collect();
        all.sort_by_key(|v| v.id);
        Ok(all)
    }

    // ---- orders ----

    async fn insert_order(&self, new: NewOrder, _actor: Actor) -> Result<Order, OpsError> {
        validate_new_order(&new)?;
        let mut w = self.world.lock().await;
        for line in &new.lines {
            w.variant(line.variant_id)?;
        }
        w.next_order_id += 1;
        let id = w.next_order_id;
        let now = Utc::now();
        let subtotal = new.subtotal();
        let cod_due = new.cod_due();
        let order = Order {
            id,
            order_number: format!("PX-{id:05}"),
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            delivery_address: new.delivery_address,
            destination_branch: new.destination_branch,
            fulfillment: new.fulfillment,
            status: OrderStatus::Intake,
            subtotal,
            shipping_charge: new.shipping_charge,
            discount: new.discount,
            cod_due,
            paid_amount: new.paid_amount,
            lines: new.lines,
            rider_id: None,
            courier: None,
            tracking_id: None,
            delivery_proof: None,
            created_at: now,
            updated_at: now,
        };
        w.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Order, OpsError> {
        let w = self.world.lock().await;
        w.order(id).cloned()
    }

    async fn find_order_by_tracking(
        &self,
        provider: &str,
        tracking_id: &str,
    ) -> Result<Option<Order>, OpsError> {
        let w = self.world.lock().await;
        Ok(w.orders
            .values()
            .find(|o| {
                o.courier.as_deref() == Some(provider)
                    && o.tracking_id.as_deref() == Some(tracking_id)
            })
            .cloned())
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, OpsError> {
        let w = self.world.lock().await;
        let mut out: Vec<Order> = w
            .orders
            .values()
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .filter(|o| filter.fulfillment.map_or(true, |f| o.fulfillment == f))
            .filter(|o| filter.rider_id.map_or(true, |r| o.rider_id == Some(r)))
            .cloned()
            .collect();
        out.sort_by_key(|o| std::cmp::Reverse(o.id));
        Ok(out)
    }

    async fn order_activity(&self, order_id: i64) -> Result<Vec<OrderActivity>, OpsError> {
        let w = self.world.lock().await;
        w.order(order_id)?;
        Ok(w.activities
            .iter()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn transition_order(
        &self,
        order_id: i64,
        to: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<Order, OpsError> {
        let mut w = self.world.lock().await;
        refuse_reserved_target(w.order(order_id)?, to)?;
        w.cas_status(order_id, to, actor, note)?;
        w.settle_line_for_terminal_mark(order_id, to);
        w.order(order_id).cloned()
    }

    async fn pack_order(&self, order_id: i64, actor: Actor) -> Result<Order, OpsError> {
        let mut w = self.world.lock().await;
        let (from, fulfillment) = {
            let order = w.order(order_id)?;
            (order.status, order.fulfillment)
        };
        if !from.can_move_to(OrderStatus::Packed, fulfillment) {
            w.log(order_id, actor, from, OrderStatus::Packed, None, false);
            return Err(OpsError::InvalidTransition {
                order_id,
                from,
                to: OrderStatus::Packed,
            });
        }

        // Requirements aggregated per variant, checked before any decrement.
        let mut needed: HashMap<i64, i64> = HashMap::new();
        for line in &w.order(order_id)?.lines {
            *needed.entry(line.variant_id).or_insert(0) += line.quantity;
        }
        for (&variant_id, &qty) in &needed {
            let available = w.variant(variant_id)?.stock_on_hand;
            if available < qty {
                w.log(
                    order_id,
                    actor,
                    from,
                    OrderStatus::Packed,
                    Some(format!("insufficient stock for variant {variant_id}")),
                    false,
                );
                return Err(OpsError::InsufficientStock {
                    variant_id,
                    available,
                    requested: qty,
                });
            }
        }
        for (variant_id, qty) in needed {
            if let Some(v) = w.variants.get_mut(&variant_id) {
                v.stock_on_hand -= qty;
            }
        }
        w.force_status(order_id, OrderStatus::Packed, actor, None)?;
        w.order(order_id).cloned()
    }

    async fn cancel_order(
        &self,
        order_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        let mut w = self.world.lock().await;
        w.order(order_id)?;
        if w.binding_manifest(order_id).is_some() {
            return Err(OpsError::OrderAlreadyManifested(order_id));
        }
        w.cas_status(
            order_id,
            OrderStatus::Cancelled,
            actor,
            Some(reason.to_string()),
        )?;
        w.order(order_id).cloned()
    }

    // ---- manifests ----

    async fn create_manifest(
        &self,
        owner: Party,
        order_ids: Vec<i64>,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        check_distinct(&order_ids)?;
        let mut w = self.world.lock().await;
        for &order_id in &order_ids {
            w.check_manifestable(order_id, &owner)?;
        }
        w.next_manifest_id += 1;
        let manifest = Manifest {
            id: w.next_manifest_id,
            owner,
            status: ManifestStatus::Draft,
            lines: order_ids
                .iter()
                .map(|&order_id| ManifestLine {
                    order_id,
                    outcome: LineOutcome::Pending,
                    note: None,
                    recorded_at: None,
                })
                .collect(),
            created_at: Utc::now(),
            dispatched_at: None,
            closed_at: None,
        };
        w.manifests.insert(manifest.id, manifest.clone());
        tracing::info!(
            manifest_id = manifest.id,
            orders = manifest.lines.len(),
            actor_id = actor.id,
            "Manifest created"
        );
        Ok(manifest)
    }

    async fn get_manifest(&self, id: i64) -> Result<Manifest, OpsError> {
        let w = self.world.lock().await;
        w.manifest(id).cloned()
    }

    async fn list_manifests(&self, filter: ManifestFilter) -> Result<Vec<Manifest>, OpsError> {
        let w = self.world.lock().await;
        let mut out: Vec<Manifest> = w
            .manifests
            .values()
            .filter(|m| filter.status.map_or(true, |s| m.status == s))
            .filter(|m| {
                filter
                    .rider_id
                    .map_or(true, |r| m.owner == Party::Rider { rider_id: r })
            })
            .filter(|m| {
                filter.provider.as_deref().map_or(true, |p| {
                    matches!(&m.owner, Party::Courier { provider } if provider == p)
                })
            })
            .cloned()
            .collect();
        out.sort_by_key(|m| std::cmp::Reverse(m.id));
        Ok(out)
    }

    async fn manifest_for_order(&self, order_id: i64) -> Result<Option<Manifest>, OpsError> {
        let w = self.world.lock().await;
        Ok(w.binding_manifest(order_id).cloned())
    }

    async fn add_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        _actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut w = self.world.lock().await;
        let (status, owner) = {
            let m = w.manifest(manifest_id)?;
            (m.status, m.owner.clone())
        };
        if status != ManifestStatus::Draft {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, only drafts accept edits",
                status.as_str()
            )));
        }
        w.check_manifestable(order_id, &owner)?;
        if let Some(m) = w.manifests.get_mut(&manifest_id) {
            m.lines.push(ManifestLine {
                order_id,
                outcome: LineOutcome::Pending,
                note: None,
                recorded_at: None,
            });
        }
        w.manifest(manifest_id).cloned()
    }

    async fn remove_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        _actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut w = self.world.lock().await;
        let m = w.manifest(manifest_id)?;
        if m.status != ManifestStatus::Draft {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, only drafts accept edits",
                m.status.as_str()
            )));
        }
        if m.line(order_id).is_none() {
            return Err(OpsError::not_found("manifest line", order_id));
        }
        if let Some(m) = w.manifests.get_mut(&manifest_id) {
            m.lines.retain(|l| l.order_id != order_id);
        }
        w.manifest(manifest_id).cloned()
    }

    async fn dispatch_manifest(
        &self,
        manifest_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut w = self.world.lock().await;
        let (status, owner, order_ids) = {
            let m = w.manifest(manifest_id)?;
            (
                m.status,
                m.owner.clone(),
                m.lines.iter().map(|l| l.order_id).collect::<Vec<_>>(),
            )
        };
        if status != ManifestStatus::Draft {
            return Err(OpsError::validation(format!(
                "manifest {manifest_id} is {}, it dispatches exactly once",
                status.as_str()
            )));
        }
        if order_ids.is_empty() {
            return Err(OpsError::validation("manifest has no orders"));
        }
        // Membership may have gone stale since the draft was built; every
        // order is re-checked before any state is touched.
        for &order_id in &order_ids {
            let order = w.order(order_id)?;
            if order.status != OrderStatus::Packed {
                return Err(OpsError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to: dispatch_leg(&owner),
                });
            }
        }

        let note = Some(format!("manifest {manifest_id} dispatched"));
        for &order_id in &order_ids {
            match &owner {
                Party::Rider { rider_id } => {
                    if let Some(o) = w.orders.get_mut(&order_id) {
                        o.rider_id = Some(*rider_id);
                    }
                    w.force_status(order_id, OrderStatus::Assigned, actor, note.clone())?;
                    w.force_status(order_id, OrderStatus::OutForDelivery, actor, None)?;
                }
                Party::Courier { provider } => {
                    if let Some(o) = w.orders.get_mut(&order_id) {
                        o.courier = Some(provider.clone());
                    }
                    w.force_status(order_id, OrderStatus::HandedToCourier, actor, note.clone())?;
                    w.force_status(order_id, OrderStatus::InTransit, actor, None)?;
                }
            }
        }
        if let Some(m) = w.manifests.get_mut(&manifest_id) {
            m.status = ManifestStatus::Dispatched;
            m.dispatched_at = Some(Utc::now());
        }
        tracing::info!(manifest_id, orders = order_ids.len(), "Manifest dispatched");
        w.manifest(manifest_id).cloned()
    }

    async fn record_outcome(
        &self,
        manifest_id: i64,
        order_id: i64,
        outcome: OutcomeInput,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut w = self.world.lock().await;
        let owner = {
            let m = w.manifest(manifest_id)?;
            if m.status != ManifestStatus::Dispatched {
                return Err(OpsError::validation(format!(
                    "manifest {manifest_id} is {}, outcomes are recorded on dispatched manifests",
                    m.status.as_str()
                )));
            }
            let line = m
                .line(order_id)
                .ok_or(OpsError::not_found("manifest line", order_id))?;
            if line.outcome != LineOutcome::Pending {
                return Err(OpsError::validation(format!(
                    "outcome for order {order_id} already recorded as {}",
                    line.outcome.as_str()
                )));
            }
            m.owner.clone()
        };

        let (from, fulfillment, order_number, cod_due) = {
            let o = w.order(order_id)?;
            (o.status, o.fulfillment, o.order_number.clone(), o.cod_due)
        };

        let (line_outcome, line_note) = match outcome {
            OutcomeInput::Delivered {
                proof,
                cod_collected,
            } => {
                if proof.is_none() && fulfillment.requires_proof() {
                    return Err(OpsError::validation(
                        "delivery proof (photo or signature reference) is required",
                    ));
                }
                if !from.can_move_to(OrderStatus::Delivered, fulfillment) {
                    w.log(order_id, actor, from, OrderStatus::Delivered, None, false);
                    return Err(OpsError::InvalidTransition {
                        order_id,
                        from,
                        to: OrderStatus::Delivered,
                    });
                }
                let collected = cod_collected.unwrap_or(cod_due);
                if collected < Decimal::ZERO {
                    return Err(OpsError::validation("collected amount must not be negative"));
                }
                if let Some(o) = w.orders.get_mut(&order_id) {
                    o.delivery_proof = proof;
                }
                w.force_status(order_id, OrderStatus::Delivered, actor, None)?;

                let mut note = None;
                if collected != cod_due {
                    let msg = format!(
                        "COD mismatch on {order_number}: due {cod_due}, collected {collected}"
                    );
                    tracing::warn!(order_id, %cod_due, %collected, "COD collected differs from due");
                    note = Some(msg);
                }
                // Cash stays with the rider until handover; couriers remit
                // through their own settlement channel, not this ledger.
                if let Party::Rider { rider_id } = owner {
                    if collected > Decimal::ZERO {
                        w.push_ledger(
                            rider_id,
                            LedgerEntryKind::CodCollected,
                            collected,
                            Some(order_id),
                            None,
                            actor,
                            note.clone(),
                        );
                    }
                }
                (LineOutcome::Delivered, note)
            }
            OutcomeInput::Rejected { reason } => {
                if !from.can_move_to(OrderStatus::Rejected, fulfillment) {
                    w.log(order_id, actor, from, OrderStatus::Rejected, None, false);
                    return Err(OpsError::InvalidTransition {
                        order_id,
                        from,
                        to: OrderStatus::Rejected,
                    });
                }
                w.force_status(
                    order_id,
                    OrderStatus::Rejected,
                    actor,
                    Some(reason.clone()),
                )?;
                // A rejected parcel is already on its way back.
                w.force_status(
                    order_id,
                    OrderStatus::ReturnInitiated,
                    actor,
                    Some("rejected parcel returning to hub".to_string()),
                )?;
                (LineOutcome::Rejected, Some(reason))
            }
            OutcomeInput::Returned { reason } => {
                if !from.can_move_to(OrderStatus::ReturnInitiated, fulfillment) {
                    w.log(
                        order_id,
                        actor,
                        from,
                        OrderStatus::ReturnInitiated,
                        None,
                        false,
                    );
                    return Err(OpsError::InvalidTransition {
                        order_id,
                        from,
                        to: OrderStatus::ReturnInitiated,
                    });
                }
                w.force_status(
                    order_id,
                    OrderStatus::ReturnInitiated,
                    actor,
                    Some(reason.clone()),
                )?;
                (LineOutcome::Returned, Some(reason))
            }
        };

        if let Some(m) = w.manifests.get_mut(&manifest_id) {
            if let Some(line) = m.lines.iter_mut().find(|l| l.order_id == order_id) {
                line.outcome = line_outcome;
                line.note = line_note;
                line.recorded_at = Some(Utc::now());
            }
        }
        w.manifest(manifest_id).cloned()
    }

    async fn reschedule_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        let mut w = self.world.lock().await;
        {
            let m = w.manifest(manifest_id)?;
            if m.status != ManifestStatus::Dispatched {
                return Err(OpsError::validation(format!(
                    "manifest {manifest_id} is {}, reschedule applies after dispatch",
                    m.status.as_str()
                )));
            }
            let line = m
                .line(order_id)
                .ok_or(OpsError::not_found("manifest line", order_id))?;
            if line.outcome != LineOutcome::Pending {
                return Err(OpsError::validation(format!(
                    "outcome for order {order_id} already recorded as {}",
                    line.outcome.as_str()
                )));
            }
        }
        w.cas_status(
            order_id,
            OrderStatus::Packed,
            actor,
            Some("rescheduled off manifest".to_string()),
        )?;
        if let Some(o) = w.orders.get_mut(&order_id) {
            o.rider_id = None;
        }
        if let Some(m) = w.manifests.get_mut(&manifest_id) {
            if let Some(line) = m.lines.iter_mut().find(|l| l.order_id == order_id) {
                line.outcome = LineOutcome::Rescheduled;
                line.recorded_at = Some(Utc::now());
            }
        }
        w.manifest(manifest_id).cloned()
    }

    async fn close_manifest(&self, manifest_id: i64, _actor: Actor) -> Result<Manifest, OpsError> {
        let mut w = self.world.lock().await;
        {
            let m = w.manifest(manifest_id)?;
            if !m.settleable() {
                return Err(OpsError::validation(format!(
                    "manifest {manifest_id} is not settleable ({} with {} pending lines)",
                    m.status.as_str(),
                    m.lines
                        .iter()
                        .filter(|l| l.outcome == LineOutcome::Pending)
                        .count()
                )));
            }
        }
        if let Some(m) = w.manifests.get_mut(&manifest_id) {
            m.status = ManifestStatus::Closed;
            m.closed_at = Some(Utc::now());
        }
        w.manifest(manifest_id).cloned()
    }

    // ---- return gate ----

    async fn create_handover(
        &self,
        source: Party,
        lines: Vec<NewHandoverLine>,
        _actor: Actor,
    ) -> Result<ReturnHandover, OpsError> {
        if lines.is_empty() {
            return Err(OpsError::validation("handover needs at least one line"));
        }
        let mut w = self.world.lock().await;
        for line in &lines {
            if line.quantity <= 0 {
                return Err(OpsError::validation("claimed quantity must be positive"));
            }
            let order = w.order(line.order_id)?;
            if !matches!(order.status, OrderStatus::ReturnInitiated | OrderStatus::Rto) {
                return Err(OpsError::validation(format!(
                    "order {} is {}, no return in progress",
                    order.order_number,
                    order.status.as_str()
                )));
            }
            let ordered: i64 = order
                .lines
                .iter()
                .filter(|l| l.variant_id == line.variant_id)
                .map(|l| l.quantity)
                .sum();
            if ordered == 0 {
                return Err(OpsError::validation(format!(
                    "variant {} is not on order {}",
                    line.variant_id, order.order_number
                )));
            }
            if line.quantity > ordered {
                return Err(OpsError::validation(format!(
                    "claimed {} of variant {} exceeds the {} ordered on {}",
                    line.quantity, line.variant_id, ordered, order.order_number
                )));
            }
            let already_pending = w.handovers.values().any(|h| {
                h.status == HandoverStatus::PendingVerification
                    && h.lines.iter().any(|l| l.order_id == line.order_id)
            });
            if already_pending {
                return Err(OpsError::validation(format!(
                    "order {} already has a handover pending verification",
                    order.order_number
                )));
            }
        }
        w.next_handover_id += 1;
        let handover = ReturnHandover {
            id: w.next_handover_id,
            source,
            status: HandoverStatus::PendingVerification,
            lines: lines
                .into_iter()
                .map(|l| HandoverLine {
                    order_id: l.order_id,
                    variant_id: l.variant_id,
                    claimed_qty: l.quantity,
                    verified_qty: None,
                    condition: l.condition,
                    disputed: false,
                    note: l.note,
                })
                .collect(),
            created_at: Utc::now(),
            processed_at: None,
        };
        w.handovers.insert(handover.id, handover.clone());
        Ok(handover)
    }

    async fn get_handover(&self, id: i64) -> Result<ReturnHandover, OpsError> {
        let w = self.world.lock().await;
        w.handovers
            .get(&id)
            .cloned()
            .ok_or(OpsError::not_found("handover", id))
    }

    async fn list_handovers(
        &self,
        status: Option<HandoverStatus>,
    ) -> Result<Vec<ReturnHandover>, OpsError> {
        let w = self.world.lock().await;
        let mut out: Vec<ReturnHandover> = w
            .handovers
            .values()
            .filter(|h| status.map_or(true, |s| h.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|h| std::cmp::Reverse(h.id));
        Ok(out)
    }

    async fn process_handover(
        &self,
        handover_id: i64,
        verifications: Vec<LineVerification>,
        actor: Actor,
    ) -> Result<ReturnHandover, OpsError> {
        if verifications.is_empty() {
            return Err(OpsError::validation("nothing to verify"));
        }
        let mut w = self.world.lock().await;
        {
            let h = w
                .handovers
                .get(&handover_id)
                .ok_or(OpsError::not_found("handover", handover_id))?;
            if h.status == HandoverStatus::Processed {
                return Err(OpsError::HandoverAlreadyProcessed(handover_id));
            }
            // All verdicts are checked before the first unit of stock moves.
            for v in &verifications {
                let line = h
                    .lines
                    .iter()
                    .find(|l| l.order_id == v.order_id && l.variant_id == v.variant_id)
                    .ok_or(OpsError::not_found("handover line", v.order_id))?;
                if line.verified_qty.is_some() {
                    return Err(OpsError::validation(format!(
                        "line for order {} variant {} is already verified, stock is credited once",
                        v.order_id, v.variant_id
                    )));
                }
                match (v.verified_qty, v.disputed) {
                    (Some(q), false) if q < 0 => {
                        return Err(OpsError::validation("verified quantity must not be negative"))
                    }
                    (Some(_), false) | (None, true) => {}
                    (Some(_), true) => {
                        return Err(OpsError::validation(
                            "a line is either verified or disputed, not both",
                        ))
                    }
                    (None, false) => {
                        return Err(OpsError::validation(
                            "verdict needs a verified quantity or a dispute flag",
                        ))
                    }
                }
            }
        }

        for v in &verifications {
            if v.disputed {
                if let Some(h) = w.handovers.get_mut(&handover_id) {
                    if let Some(line) = h
                        .lines
                        .iter_mut()
                        .find(|l| l.order_id == v.order_id && l.variant_id == v.variant_id)
                    {
                        line.disputed = true;
                        if v.note.is_some() {
                            line.note = v.note.clone();
                        }
                    }
                }
                continue;
            }
            let verified = v.verified_qty.unwrap_or(0);
            let (claimed, condition) = {
                let h = w
                    .handovers
                    .get(&handover_id)
                    .ok_or(OpsError::not_found("handover", handover_id))?;
                let line = h
                    .lines
                    .iter()
                    .find(|l| l.order_id == v.order_id && l.variant_id == v.variant_id)
                    .ok_or(OpsError::not_found("handover line", v.order_id))?;
                (line.claimed_qty, v.condition.unwrap_or(line.condition))
            };
            let mut note = v.note.clone();
            if verified != claimed {
                let msg = format!("discrepancy: claimed {claimed}, verified {verified}");
                tracing::warn!(
                    handover_id,
                    order_id = v.order_id,
                    variant_id = v.variant_id,
                    claimed,
                    verified,
                    "Return verification discrepancy"
                );
                note = Some(match note {
                    Some(n) => format!("{n}; {msg}"),
                    None => msg,
                });
            }
            // Only sellable goods go back on the shelf; damaged and expired
            // units are recorded but never credited.
            if verified > 0 && condition.restockable() {
                if let Some(variant) = w.variants.get_mut(&v.variant_id) {
                    variant.stock_on_hand += verified;
                }
            }
            if let Some(h) = w.handovers.get_mut(&handover_id) {
                if let Some(line) = h
                    .lines
                    .iter_mut()
                    .find(|l| l.order_id == v.order_id && l.variant_id == v.variant_id)
                {
                    line.verified_qty = Some(verified);
                    line.condition = condition;
                    line.disputed = false;
                    line.note = note;
                }
            }
        }

        // An order flips to returned once every one of its lines on this
        // handover is resolved; the flip rides the same commit as the
        // stock credit.
        let order_ids: Vec<i64> = {
            let h = w
                .handovers
                .get(&handover_id)
                .ok_or(OpsError::not_found("handover", handover_id))?;
            let mut ids: Vec<i64> = h.lines.iter().map(|l| l.order_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        for order_id in order_ids {
            let all_resolved = {
                let h = w
                    .handovers
                    .get(&handover_id)
                    .ok_or(OpsError::not_found("handover", handover_id))?;
                h.lines
                    .iter()
                    .filter(|l| l.order_id == order_id)
                    .all(|l| l.resolved())
            };
            if !all_resolved {
                continue;
            }
            let (from, fulfillment) = {
                let o = w.order(order_id)?;
                (o.status, o.fulfillment)
            };
            if from == OrderStatus::Returned {
                continue;
            }
            if !from.can_move_to(OrderStatus::Returned, fulfillment) {
                return Err(OpsError::InvalidTransition {
                    order_id,
                    from,
                    to: OrderStatus::Returned,
                });
            }
            w.force_status(
                order_id,
                OrderStatus::Returned,
                actor,
                Some(format!("return verified (handover {handover_id})")),
            )?;
        }

        let fully_resolved = {
            let h = w
                .handovers
                .get(&handover_id)
                .ok_or(OpsError::not_found("handover", handover_id))?;
            h.unresolved_lines() == 0
        };
        if fully_resolved {
            if let Some(h) = w.handovers.get_mut(&handover_id) {
                h.status = HandoverStatus::Processed;
                h.processed_at = Some(Utc::now());
            }
        }
        w.handovers
            .get(&handover_id)
            .cloned()
            .ok_or(OpsError::not_found("handover", handover_id))
    }

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
    ) -> Result<LedgerEntry, OpsError> {
        if delta == Decimal::ZERO {
            return Err(OpsError::validation("ledger delta must not be zero"));
        }
        let mut w = self.world.lock().await;
        Ok(w.push_ledger(rider_id, kind, delta, order_id, settlement_id, actor, note))
    }

    async fn rider_balance(&self, rider_id: i64) -> Result<Decimal, OpsError> {
        let w = self.world.lock().await;
        Ok(w.balance_of(rider_id))
    }

    async fn rider_statement(&self, rider_id: i64) -> Result<Vec<LedgerEntry>, OpsError> {
        let w = self.world.lock().await;
        let mut out: Vec<LedgerEntry> = w
            .ledger
            .iter()
            .filter(|e| e.rider_id == rider_id)
            .cloned()
            .collect();
        out.reverse();
        Ok(out)
    }

    // ---- settlements ----

    async fn create_settlement(
        &self,
        rider_id: i64,
        declared: Decimal,
        _actor: Actor,
    ) -> Result<Settlement, OpsError> {
        if declared < Decimal::ZERO {
            return Err(OpsError::validation("declared amount must not be negative"));
        }
        let mut w = self.world.lock().await;
        let open = w
            .settlements
            .values()
            .any(|s| s.rider_id == rider_id && s.status == SettlementStatus::Pending);
        if open {
            return Err(OpsError::SettlementAlreadyPending(rider_id));
        }
        w.next_settlement_id += 1;
        let settlement = Settlement {
            id: w.next_settlement_id,
            rider_id,
            expected: w.balance_of(rider_id),
            declared,
            actual: None,
            variance: None,
            status: SettlementStatus::Pending,
            requested_at: Utc::now(),
            verified_at: None,
            verified_by: None,
        };
        w.settlements.insert(settlement.id, settlement.clone());
        Ok(settlement)
    }

    async fn get_settlement(&self, id: i64) -> Result<Settlement, OpsError> {
        let w = self.world.lock().await;
        w.settlements
            .get(&id)
            .cloned()
            .ok_or(OpsError::not_found("settlement", id))
    }

    async fn list_settlements(&self, rider_id: Option<i64>) -> Result<Vec<Settlement>, OpsError> {
        let w = self.world.lock().await;
        let mut out: Vec<Settlement> = w
            .settlements
            .values()
            .filter(|s| rider_id.map_or(true, |r| s.rider_id == r))
            .cloned()
            .collect();
        out.sort_by_key(|s| std::cmp::Reverse(s.id));
        Ok(out)
    }

    async fn verify_settlement(
        &self,
        settlement_id: i64,
        actual: Decimal,
        actor: Actor,
    ) -> Result<Settlement, OpsError> {
        if actual < Decimal::ZERO {
            return Err(OpsError::validation("verified amount must not be negative"));
        }
        let mut w = self.world.lock().await;
        let (rider_id, expected, status) = {
            let s = w
                .settlements
                .get(&settlement_id)
                .ok_or(OpsError::not_found("settlement", settlement_id))?;
            (s.rider_id, s.expected, s.status)
        };
        if status != SettlementStatus::Pending {
            return Err(OpsError::validation(format!(
                "settlement {settlement_id} is already verified"
            )));
        }
        let variance = actual - expected;
        if variance != Decimal::ZERO {
            tracing::warn!(
                settlement_id,
                rider_id,
                %expected,
                %actual,
                %variance,
                "Settlement variance detected"
            );
            w.push_ledger(
                rider_id,
                LedgerEntryKind::SettlementAdjustment,
                variance,
                None,
                Some(settlement_id),
                actor,
                Some(format!(
                    "settlement variance: expected {expected}, verified {actual}"
                )),
            );
        }
        if let Some(s) = w.settlements.get_mut(&settlement_id) {
            s.actual = Some(actual);
            s.variance = Some(variance);
            s.status = SettlementStatus::Verified;
            s.verified_at = Some(Utc::now());
            s.verified_by = Some(actor.id);
        }
        // The rider's road batches are accounted for by this point.
        let settleable: Vec<i64> = w
            .manifests
            .values()
            .filter(|m| m.owner == Party::Rider { rider_id } && m.settleable())
            .map(|m| m.id)
            .collect();
        for id in settleable {
            if let Some(m) = w.manifests.get_mut(&id) {
                m.status = ManifestStatus::Closed;
                m.closed_at = Some(Utc::now());
            }
        }
        w.settlements
            .get(&settlement_id)
            .cloned()
            .ok_or(OpsError::not_found("settlement", settlement_id))
    }

    // ---- logistics sync ----

    async fn claim_booking(
        &self,
        order_id: i64,
        provider: &str,
    ) -> Result<BookingClaim, OpsError> {
        let mut w = self.world.lock().await;
        {
            let order = w.order(order_id)?;
            if !order.fulfillment.courier_carried() {
                return Err(OpsError::validation(format!(
                    "order {} is {}, only outside-valley orders book a courier",
                    order.order_number,
                    order.fulfillment.as_str()
                )));
            }
            if !matches!(
                order.status,
                OrderStatus::Packed | OrderStatus::HandedToCourier | OrderStatus::InTransit
            ) {
                return Err(OpsError::validation(format!(
                    "order {} is {}, not bookable",
                    order.order_number,
                    order.status.as_str()
                )));
            }
        }
        match w.sync.get(&order_id) {
            None => {
                w.sync.insert(
                    order_id,
                    LogisticsSyncStatus {
                        order_id,
                        provider: provider.to_string(),
                        state: SyncState::InFlight,
                        tracking_id: None,
                        attempts: 1,
                        last_synced_at: None,
                        last_error: None,
                    },
                );
                Ok(BookingClaim::Claimed { attempts: 1 })
            }
            Some(row) => match (row.state, row.tracking_id.clone()) {
                (SyncState::Booked, Some(tracking_id)) => {
                    if row.provider != provider {
                        return Err(OpsError::validation(format!(
                            "order {order_id} is already booked with {}",
                            row.provider
                        )));
                    }
                    Ok(BookingClaim::AlreadyBooked { tracking_id })
                }
                (SyncState::InFlight, _) => Ok(BookingClaim::InFlight),
                // A failed row (or a booked row missing its tracking id)
                // is reclaimed, possibly by a different provider.
                _ => {
                    let attempts = row.attempts + 1;
                    let last_synced_at = row.last_synced_at;
                    let last_error = row.last_error.clone();
                    w.sync.insert(
                        order_id,
                        LogisticsSyncStatus {
                            order_id,
                            provider: provider.to_string(),
                            state: SyncState::InFlight,
                            tracking_id: None,
                            attempts,
                            last_synced_at,
                            last_error,
                        },
                    );
                    Ok(BookingClaim::Claimed { attempts })
                }
            },
        }
    }

    async fn complete_booking(
        &self,
        order_id: i64,
        provider: &str,
        tracking_id: &str,
    ) -> Result<LogisticsSyncStatus, OpsError> {
        let mut w = self.world.lock().await;
        {
            let row = w
                .sync
                .get(&order_id)
                .ok_or(OpsError::not_found("sync status", order_id))?;
            if row.provider != provider {
                return Err(OpsError::validation(format!(
                    "no booking claim for order {order_id} with {provider}"
                )));
            }
        }
        if let Some(row) = w.sync.get_mut(&order_id) {
            row.state = SyncState::Booked;
            row.tracking_id = Some(tracking_id.to_string());
            row.last_synced_at = Some(Utc::now());
            row.last_error = None;
        }
        if let Some(order) = w.orders.get_mut(&order_id) {
            order.courier = Some(provider.to_string());
            order.tracking_id = Some(tracking_id.to_string());
            order.updated_at = Utc::now();
        }
        w.sync
            .get(&order_id)
            .cloned()
            .ok_or(OpsError::not_found("sync status", order_id))
    }

    async fn fail_booking(
        &self,
        order_id: i64,
        provider: &str,
        error: &str,
    ) -> Result<LogisticsSyncStatus, OpsError> {
        let mut w = self.world.lock().await;
        {
            let row = w
                .sync
                .get(&order_id)
                .ok_or(OpsError::not_found("sync status", order_id))?;
            if row.provider != provider {
                return Err(OpsError::validation(format!(
                    "no booking claim for order {order_id} with {provider}"
                )));
            }
        }
        if let Some(row) = w.sync.get_mut(&order_id) {
            row.state = SyncState::Failed;
            row.last_error = Some(error.to_string());
            row.last_synced_at = Some(Utc::now());
        }
        w.sync
            .get(&order_id)
            .cloned()
            .ok_or(OpsError::not_found("sync status", order_id))
    }

    async fn sync_status(&self, order_id: i64) -> Result<Option<LogisticsSyncStatus>, OpsError> {
        let w = self.world.lock().await;
        Ok(w.sync.get(&order_id).cloned())
    }

    async fn touch_sync(&self, order_id: i64) -> Result<(), OpsError> {
        let mut w = self.world.lock().await;
        let row = w
            .sync
            .get_mut(&order_id)
            .ok_or(OpsError::not_found("sync status", order_id))?;
        row.last_synced_at = Some(Utc::now());
        Ok(())
    }
}

// ==================== Shared validation ====================

pub(crate) fn validate_new_order(new: &NewOrder) -> Result<(), OpsError> {
    if new.customer_name.trim().is_empty() {
        return Err(OpsError::validation("customer_name is required"));
    }
    if new.customer_phone.trim().is_empty() {
        return Err(OpsError::validation("customer_phone is required"));
    }
    if new.lines.is_empty() {
        return Err(OpsError::validation("order needs at least one line"));
    }
    for line in &new.lines {
        if line.quantity <= 0 {
            return Err(OpsError::validation("line quantity must be positive"));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(OpsError::validation("unit price must not be negative"));
        }
    }
    if new.shipping_charge < Decimal::ZERO
        || new.discount < Decimal::ZERO
        || new.paid_amount < Decimal::ZERO
    {
        return Err(OpsError::validation("money fields must not be negative"));
    }
    if new.cod_due() < Decimal::ZERO {
        return Err(OpsError::validation(
            "discount and prepayment exceed the order total",
        ));
    }
    if new.fulfillment.courier_carried()
        && new
            .destination_branch
            .as_deref()
            .map(str::trim)
            .map_or(true, str::is_empty)
    {
        return Err(OpsError::validation(
            "destination_branch is required for outside-valley orders",
        ));
    }
    Ok(())
}

pub(crate) fn check_distinct(order_ids: &[i64]) -> Result<(), OpsError> {
    let mut seen = std::collections::HashSet::new();
    for id in order_ids {
        if !seen.insert(*id) {
            return Err(OpsError::validation(format!(
                "order {id} appears twice in the manifest"
            )));
        }
    }
    Ok(())
}

/// Targets reserved for internal paths: `returned` belongs to return
/// verification, and `delivered` on rider-carried orders to manifest
/// outcome recording with proof. Courier-carried deliveries arrive through
/// the tracking trail, so they pass. A plain transition request to a
/// reserved target is surface misuse and is refused before the state
/// machine is even consulted.
pub(crate) fn refuse_reserved_target(order: &Order, to: OrderStatus) -> Result<(), OpsError> {
    if OrderStatus::gate_only(to) {
        return Err(OpsError::validation(
            "returned is written by return verification, not by a direct status change",
        ));
    }
    if to == OrderStatus::Delivered && order.fulfillment.rider_carried() {
        return Err(OpsError::validation(
            "rider deliveries are recorded through the manifest outcome with proof",
        ));
    }
    Ok(())
}

fn dispatch_leg(owner: &Party) -> OrderStatus {
    match owner {
        Party::Rider { .. } => OrderStatus::Assigned,
        Party::Courier { .. } => OrderStatus::HandedToCourier,
    }
}
