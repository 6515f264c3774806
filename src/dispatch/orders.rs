// src/dispatch/orders.rs

use rust_decimal::Decimal;

use crate::error::OpsError;
use crate::models::order::{FulfillmentType, NewOrder, Order, OrderActivity, OrderStatus};
use crate::models::variant::Variant;
use crate::models::{Actor, Role};
use crate::store::OrderFilter;

use super::{require_admin, require_staff, DispatchService};

impl DispatchService {
    // ---- variants / stock ----

    pub async fn create_variant(
        &self,
        sku: &str,
        product_name: &str,
        stock_on_hand: i64,
        actor: Actor,
    ) -> Result<Variant, OpsError> {
        require_staff(actor, "creating variants")?;
        self.store().insert_variant(sku, product_name, stock_on_hand).await
    }

    pub async fn get_variant(&self, id: i64, actor: Actor) -> Result<Variant, OpsError> {
        require_staff(actor, "reading variants")?;
        self.store().get_variant(id).await
    }

    pub async fn list_variants(&self, actor: Actor) -> Result<Vec<Variant>, OpsError> {
        require_staff(actor, "reading variants")?;
        self.store().list_variants().await
    }

    // ---- order lifecycle ----

    pub async fn create_order(&self, new: NewOrder, actor: Actor) -> Result<Order, OpsError> {
        require_staff(actor, "order intake")?;
        let order = self.store().insert_order(new, actor).await?;
        tracing::info!(
            order_id = order.id,
            order_number = %order.order_number,
            fulfillment = order.fulfillment.as_str(),
            cod_due = %order.cod_due,
            "Order created"
        );
        Ok(order)
    }

    /// Riders see only orders that are theirs; staff see everything.
    pub async fn get_order(&self, id: i64, actor: Actor) -> Result<Order, OpsError> {
        let order = self.store().get_order(id).await?;
        if actor.role == Role::Rider && order.rider_id != Some(actor.id) {
            return Err(OpsError::forbidden("order belongs to another rider"));
        }
        Ok(order)
    }

    pub async fn list_orders(
        &self,
        mut filter: OrderFilter,
        actor: Actor,
    ) -> Result<Vec<Order>, OpsError> {
        if actor.role == Role::Rider {
            filter.rider_id = Some(actor.id);
        }
        self.store().list_orders(filter).await
    }

    pub async fn order_activity(
        &self,
        order_id: i64,
        actor: Actor,
    ) -> Result<Vec<OrderActivity>, OpsError> {
        // Same visibility rule as the order itself.
        self.get_order(order_id, actor).await?;
        self.store().order_activity(order_id).await
    }

    pub async fn confirm_order(&self, order_id: i64, actor: Actor) -> Result<Order, OpsError> {
        require_staff(actor, "confirming orders")?;
        self.store()
            .transition_order(order_id, OrderStatus::Confirmed, actor, None)
            .await
    }

    pub async fn pack_order(&self, order_id: i64, actor: Actor) -> Result<Order, OpsError> {
        // Packing is hub work; riders never touch the shelf.
        require_staff(actor, "packing orders")?;
        self.store().pack_order(order_id, actor).await
    }

    pub async fn cancel_order(
        &self,
        order_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        require_staff(actor, "cancelling orders")?;
        self.store().cancel_order(order_id, reason, actor).await
    }

    /// Store-pickup handover at the counter, with the amount received.
    pub async fn complete_store_pickup(
        &self,
        order_id: i64,
        amount_received: Option<Decimal>,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        require_staff(actor, "completing store pickups")?;
        let order = self.store().get_order(order_id).await?;
        if !matches!(order.fulfillment, FulfillmentType::Store) {
            return Err(OpsError::validation(format!(
                "order {} is {}, not a store pickup",
                order.order_number,
                order.fulfillment.as_str()
            )));
        }
        let note = amount_received.map(|amt| format!("counter payment {amt}"));
        self.store()
            .transition_order(order_id, OrderStatus::Delivered, actor, note)
            .await
    }

    pub async fn initiate_return(
        &self,
        order_id: i64,
        reason: &str,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        require_staff(actor, "initiating returns")?;
        self.store()
            .transition_order(
                order_id,
                OrderStatus::ReturnInitiated,
                actor,
                Some(reason.to_string()),
            )
            .await
    }

    pub async fn mark_lost(
        &self,
        order_id: i64,
        note: &str,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        require_admin(actor, "writing off a shipment")?;
        let order = self
            .store()
            .transition_order(
                order_id,
                OrderStatus::LostInTransit,
                actor,
                Some(note.to_string()),
            )
            .await?;
        tracing::warn!(order_id, note, "Order written off as lost in transit");
        Ok(order)
    }

    pub async fn mark_rto(
        &self,
        order_id: i64,
        note: &str,
        actor: Actor,
    ) -> Result<Order, OpsError> {
        require_admin(actor, "marking return-to-origin")?;
        self.store()
            .transition_order(order_id, OrderStatus::Rto, actor, Some(note.to_string()))
            .await
    }
}
