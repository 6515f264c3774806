// src/dispatch/manifests.rs

use crate::error::OpsError;
use crate::models::manifest::Manifest;
use crate::models::{Actor, Party, Role};
use crate::store::{ManifestFilter, OutcomeInput};

use super::{require_staff, DispatchService};

impl DispatchService {
    pub async fn create_manifest(
        &self,
        owner: Party,
        order_ids: Vec<i64>,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        require_staff(actor, "creating manifests")?;
        if let Party::Courier { provider } = &owner {
            // Fail at draft time, not at booking time.
            self.couriers.resolve(provider)?;
        }
        self.store().create_manifest(owner, order_ids, actor).await
    }

    pub async fn get_manifest(&self, id: i64, actor: Actor) -> Result<Manifest, OpsError> {
        let manifest = self.store().get_manifest(id).await?;
        if actor.role == Role::Rider && manifest.owner.rider_id() != Some(actor.id) {
            return Err(OpsError::forbidden("manifest belongs to another rider"));
        }
        Ok(manifest)
    }

    pub async fn list_manifests(
        &self,
        mut filter: ManifestFilter,
        actor: Actor,
    ) -> Result<Vec<Manifest>, OpsError> {
        if actor.role == Role::Rider {
            filter.rider_id = Some(actor.id);
            filter.provider = None;
        }
        self.store().list_manifests(filter).await
    }

    pub async fn add_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        require_staff(actor, "editing manifests")?;
        self.store()
            .add_manifest_order(manifest_id, order_id, actor)
            .await
    }

    pub async fn remove_manifest_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        require_staff(actor, "editing manifests")?;
        self.store()
            .remove_manifest_order(manifest_id, order_id, actor)
            .await
    }

    pub async fn dispatch_manifest(
        &self,
        manifest_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        require_staff(actor, "dispatching manifests")?;
        self.store().dispatch_manifest(manifest_id, actor).await
    }

    /// Outcomes come from the road: the owning rider, or a manager/admin
    /// keying in on their behalf (and for courier manifests).
    pub async fn record_outcome(
        &self,
        manifest_id: i64,
        order_id: i64,
        outcome: OutcomeInput,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        self.check_outcome_authority(manifest_id, actor).await?;
        self.store()
            .record_outcome(manifest_id, order_id, outcome, actor)
            .await
    }

    pub async fn reschedule_order(
        &self,
        manifest_id: i64,
        order_id: i64,
        actor: Actor,
    ) -> Result<Manifest, OpsError> {
        self.check_outcome_authority(manifest_id, actor).await?;
        self.store()
            .reschedule_order(manifest_id, order_id, actor)
            .await
    }

    pub async fn close_manifest(&self, manifest_id: i64, actor: Actor) -> Result<Manifest, OpsError> {
        require_staff(actor, "closing manifests")?;
        self.store().close_manifest(manifest_id, actor).await
    }

    async fn check_outcome_authority(
        &self,
        manifest_id: i64,
        actor: Actor,
    ) -> Result<(), OpsError> {
        match actor.role {
            Role::Admin | Role::Manager => Ok(()),
            Role::Rider => {
                let manifest = self.store().get_manifest(manifest_id).await?;
                if manifest.owner.rider_id() == Some(actor.id) {
                    Ok(())
                } else {
                    Err(OpsError::forbidden("manifest belongs to another rider"))
                }
            }
            Role::Operator => Err(OpsError::forbidden(
                "recording outcomes requires the owning rider or a manager",
            )),
        }
    }
}
