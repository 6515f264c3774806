// src/dispatch/mod.rs
//
// Orchestration boundary of the fulfillment engine. Every caller-facing
// operation lives on DispatchService: role gates are enforced here, the
// store below assumes an authorized intent, and handlers above only map
// HTTP to these calls. Courier traffic (bookings, webhooks, tracking)
// also enters here so external calls never run inside store transactions.

pub mod couriers;
pub mod manifests;
pub mod orders;
pub mod returns;
pub mod riders;

use std::sync::Arc;

pub use couriers::{BookingReport, BookingResult, WebhookOutcome};

use crate::couriers::CourierRegistry;
use crate::error::OpsError;
use crate::models::{Actor, Role};
use crate::store::OpsStore;

/// Actor attached to machine-driven writes (webhooks, tracking refresh).
pub const SYSTEM_ACTOR: Actor = Actor {
    id: 0,
    role: Role::Admin,
};

#[derive(Clone)]
pub struct DispatchService {
    store: Arc<dyn OpsStore>,
    couriers: CourierRegistry,
}

impl DispatchService {
    pub fn new(store: Arc<dyn OpsStore>, couriers: CourierRegistry) -> Self {
        Self { store, couriers }
    }

    pub(crate) fn store(&self) -> &dyn OpsStore {
        self.store.as_ref()
    }
}

pub(crate) fn require_staff(actor: Actor, action: &str) -> Result<(), OpsError> {
    if actor.role.is_staff() {
        Ok(())
    } else {
        Err(OpsError::forbidden(format!("{action} requires hub staff")))
    }
}

pub(crate) fn require_admin(actor: Actor, action: &str) -> Result<(), OpsError> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(OpsError::forbidden(format!("{action} requires an admin")))
    }
}

/// Staff of any rank, or the rider the record belongs to.
pub(crate) fn require_self_or_staff(
    actor: Actor,
    rider_id: i64,
    action: &str,
) -> Result<(), OpsError> {
    if actor.role.is_staff() || actor.id == rider_id {
        Ok(())
    } else {
        Err(OpsError::forbidden(format!(
            "{action} is limited to the rider and hub staff"
        )))
    }
}
