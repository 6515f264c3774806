// src/dispatch/riders.rs

use rust_decimal::Decimal;

use crate::error::OpsError;
use crate::models::ledger::{LedgerEntry, LedgerEntryKind};
use crate::models::settlement::Settlement;
use crate::models::{Actor, Role};

use super::{require_admin, require_self_or_staff, require_staff, DispatchService};

impl DispatchService {
    /// Manual COD correction. The regular +entries are appended by outcome
    /// recording; this surface exists for the admin fixing a missed or
    /// mis-keyed collection, so it takes the strictest gate.
    pub async fn record_collection(
        &self,
        rider_id: i64,
        order_id: Option<i64>,
        amount: Decimal,
        note: Option<String>,
        actor: Actor,
    ) -> Result<LedgerEntry, OpsError> {
        require_admin(actor, "manual ledger corrections")?;
        if amount <= Decimal::ZERO {
            return Err(OpsError::validation("collection amount must be positive"));
        }
        tracing::info!(rider_id, %amount, actor_id = actor.id, "manual COD collection entry");
        self.store()
            .append_ledger_entry(
                rider_id,
                LedgerEntryKind::CodCollected,
                amount,
                order_id,
                None,
                actor,
                note,
            )
            .await
    }

    /// Cash physically counted at the hub counter. Negative delta: the
    /// rider's float goes down by what they handed over.
    pub async fn record_cash_handover(
        &self,
        rider_id: i64,
        amount: Decimal,
        note: Option<String>,
        actor: Actor,
    ) -> Result<LedgerEntry, OpsError> {
        require_staff(actor, "recording cash handovers")?;
        if amount <= Decimal::ZERO {
            return Err(OpsError::validation("handover amount must be positive"));
        }
        tracing::info!(rider_id, %amount, actor_id = actor.id, "cash handover received");
        self.store()
            .append_ledger_entry(
                rider_id,
                LedgerEntryKind::CashHandover,
                -amount,
                None,
                None,
                actor,
                note,
            )
            .await
    }

    pub async fn rider_balance(&self, rider_id: i64, actor: Actor) -> Result<Decimal, OpsError> {
        require_self_or_staff(actor, rider_id, "reading a rider balance")?;
        self.store().rider_balance(rider_id).await
    }

    pub async fn rider_statement(
        &self,
        rider_id: i64,
        actor: Actor,
    ) -> Result<Vec<LedgerEntry>, OpsError> {
        require_self_or_staff(actor, rider_id, "reading a rider ledger")?;
        self.store().rider_statement(rider_id).await
    }

    /// Rider declares the cash they are about to bring in. Expected value
    /// is snapshotted from the ledger by the store, not taken from input.
    pub async fn request_settlement(
        &self,
        rider_id: i64,
        declared: Decimal,
        actor: Actor,
    ) -> Result<Settlement, OpsError> {
        require_self_or_staff(actor, rider_id, "requesting a settlement")?;
        if declared < Decimal::ZERO {
            return Err(OpsError::validation("declared amount cannot be negative"));
        }
        self.store().create_settlement(rider_id, declared, actor).await
    }

    pub async fn get_settlement(&self, id: i64, actor: Actor) -> Result<Settlement, OpsError> {
        let settlement = self.store().get_settlement(id).await?;
        if actor.role == Role::Rider && settlement.rider_id != actor.id {
            return Err(OpsError::forbidden("settlement belongs to another rider"));
        }
        Ok(settlement)
    }

    pub async fn list_settlements(
        &self,
        rider_id: Option<i64>,
        actor: Actor,
    ) -> Result<Vec<Settlement>, OpsError> {
        let rider_id = if actor.role == Role::Rider {
            Some(actor.id)
        } else {
            rider_id
        };
        self.store().list_settlements(rider_id).await
    }

    /// Count the physical cash, post the variance, close out what the
    /// rider still had open. Admin only.
    pub async fn verify_settlement(
        &self,
        settlement_id: i64,
        actual: Decimal,
        actor: Actor,
    ) -> Result<Settlement, OpsError> {
        require_admin(actor, "verifying settlements")?;
        if actual < Decimal::ZERO {
            return Err(OpsError::validation("counted amount cannot be negative"));
        }
        let settlement = self
            .store()
            .verify_settlement(settlement_id, actual, actor)
            .await?;
        tracing::info!(
            settlement_id,
            rider_id = settlement.rider_id,
            variance = %settlement.variance.unwrap_or_default(),
            "settlement verified"
        );
        Ok(settlement)
    }
}
