// src/dispatch/returns.rs

use crate::error::OpsError;
use crate::models::handover::{HandoverStatus, ReturnHandover};
use crate::models::{Actor, Party, Role};
use crate::store::{LineVerification, NewHandoverLine};

use super::{require_admin, require_staff, DispatchService};

impl DispatchService {
    /// Riders may declare their own bag of returns; anything else
    /// (courier RTO batches, another rider's parcels) is hub staff work.
    pub async fn create_handover(
        &self,
        source: Party,
        lines: Vec<NewHandoverLine>,
        actor: Actor,
    ) -> Result<ReturnHandover, OpsError> {
        let own_bag = actor.role == Role::Rider && source.rider_id() == Some(actor.id);
        if !own_bag {
            require_staff(actor, "receiving return handovers")?;
        }
        self.store().create_handover(source, lines, actor).await
    }

    pub async fn get_handover(&self, id: i64, actor: Actor) -> Result<ReturnHandover, OpsError> {
        let handover = self.store().get_handover(id).await?;
        if actor.role == Role::Rider && handover.source.rider_id() != Some(actor.id) {
            return Err(OpsError::forbidden("handover belongs to another rider"));
        }
        Ok(handover)
    }

    pub async fn list_handovers(
        &self,
        status: Option<HandoverStatus>,
        actor: Actor,
    ) -> Result<Vec<ReturnHandover>, OpsError> {
        require_staff(actor, "listing return handovers")?;
        self.store().list_handovers(status).await
    }

    /// Verification is the settlement gate for goods. Admin only: a
    /// verified line credits stock and flips the order to returned.
    pub async fn process_handover(
        &self,
        handover_id: i64,
        verifications: Vec<LineVerification>,
        actor: Actor,
    ) -> Result<ReturnHandover, OpsError> {
        require_admin(actor, "verifying return handovers")?;
        self.store()
            .process_handover(handover_id, verifications, actor)
            .await
    }
}
