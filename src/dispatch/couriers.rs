// src/dispatch/couriers.rs
//
// The seam between local fulfillment and external logistics. Local state
// commits first: the booking claim before the provider call, the guarded
// CAS after a webhook verifies. A provider outage can delay tracking but
// never corrupt an order.

use std::time::Duration;

use serde::Serialize;

use crate::error::OpsError;
use crate::models::manifest::ManifestStatus;
use crate::models::order::{Order, OrderStatus};
use crate::models::sync::{LogisticsSyncStatus, SyncState};
use crate::models::Actor;
use crate::store::{BookingClaim, OutcomeInput};

use super::{require_staff, DispatchService, SYSTEM_ACTOR};

/// How long a caller that lost the booking claim waits for the winner.
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CLAIM_POLL_BUDGET: u32 = 40;

#[derive(Debug, Clone, Serialize)]
pub struct BookingResult {
    pub order_id: i64,
    pub provider: String,
    pub tracking_id: String,
    /// True when the claim found an earlier booking and no call went out.
    pub already_booked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingFailure {
    pub order_id: i64,
    pub error: String,
}

/// Partitioned result of a bulk booking run. One provider failure never
/// rolls back the orders that did book.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingReport {
    pub succeeded: Vec<BookingResult>,
    pub failed: Vec<BookingFailure>,
}

/// What a provider-pushed status did to local state. `Ignored` is the
/// normal answer for duplicates, stale sequencing and unmapped vocabulary;
/// providers retry on error responses, so disagreement is not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied { order_id: i64, status: OrderStatus },
    Ignored { reason: String },
}

impl DispatchService {
    /// Book an order with a courier, exactly once. The sync row is the
    /// idempotency record: `booked` short-circuits with the stored
    /// tracking id, `in_flight` waits for the concurrent winner, and only
    /// a fresh claim performs the external call.
    pub async fn book_order(
        &self,
        order_id: i64,
        provider_code: &str,
        actor: Actor,
    ) -> Result<BookingResult, OpsError> {
        require_staff(actor, "booking couriers")?;
        let provider = self.couriers.resolve(provider_code)?;

        match self.store().claim_booking(order_id, provider_code).await? {
            BookingClaim::AlreadyBooked { tracking_id } => Ok(BookingResult {
                order_id,
                provider: provider_code.to_string(),
                tracking_id,
                already_booked: true,
            }),
            BookingClaim::InFlight => self.await_booking_winner(order_id, provider_code).await,
            BookingClaim::Claimed { attempts } => {
                let order = self.store().get_order(order_id).await?;
                let destination = order.destination_branch.clone().ok_or_else(|| {
                    OpsError::validation(format!(
                        "order {} has no destination branch",
                        order.order_number
                    ))
                })?;
                tracing::info!(
                    order_id,
                    provider = provider_code,
                    attempts,
                    "booking order with courier"
                );
                match provider.create_booking(&order, &destination).await {
                    Ok(tracking_id) => {
                        self.store()
                            .complete_booking(order_id, provider_code, &tracking_id)
                            .await?;
                        tracing::info!(
                            order_id,
                            provider = provider_code,
                            tracking_id = %tracking_id,
                            "courier booking confirmed"
                        );
                        Ok(BookingResult {
                            order_id,
                            provider: provider_code.to_string(),
                            tracking_id,
                            already_booked: false,
                        })
                    }
                    Err(err) => {
                        let reason = match &err {
                            OpsError::ProviderBookingFailed { reason, .. } => reason.clone(),
                            other => other.to_string(),
                        };
                        self.store()
                            .fail_booking(order_id, provider_code, &reason)
                            .await?;
                        tracing::warn!(
                            order_id,
                            provider = provider_code,
                            error = %reason,
                            "courier booking failed"
                        );
                        Err(err)
                    }
                }
            }
        }
    }

    /// Each order independently; the report partitions what booked from
    /// what did not.
    pub async fn book_bulk(
        &self,
        order_ids: Vec<i64>,
        provider_code: &str,
        actor: Actor,
    ) -> Result<BookingReport, OpsError> {
        require_staff(actor, "booking couriers")?;
        self.couriers.resolve(provider_code)?;
        let mut report = BookingReport::default();
        for order_id in order_ids {
            match self.book_order(order_id, provider_code, actor).await {
                Ok(result) => report.succeeded.push(result),
                Err(err) => report.failed.push(BookingFailure {
                    order_id,
                    error: err.to_string(),
                }),
            }
        }
        tracing::info!(
            provider = provider_code,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk booking finished"
        );
        Ok(report)
    }

    /// Poll the provider for the current tracking status and apply it
    /// through the same guarded path a webhook would take.
    pub async fn refresh_tracking(
        &self,
        order_id: i64,
        actor: Actor,
    ) -> Result<WebhookOutcome, OpsError> {
        require_staff(actor, "refreshing tracking")?;
        let order = self.store().get_order(order_id).await?;
        let (provider_code, tracking_id) = match (&order.courier, &order.tracking_id) {
            (Some(p), Some(t)) => (p.clone(), t.clone()),
            _ => {
                return Err(OpsError::validation(format!(
                    "order {} has no courier booking to poll",
                    order.order_number
                )))
            }
        };
        let provider = self.couriers.resolve(&provider_code)?;
        let provider_status = provider.get_tracking(&tracking_id).await?;
        self.store().touch_sync(order_id).await?;

        match provider.map_status(&provider_status) {
            Some(status) => self.apply_provider_status(order, status, &provider_code).await,
            None => {
                tracing::info!(
                    order_id,
                    provider = %provider_code,
                    provider_status = %provider_status,
                    "unmapped tracking status ignored"
                );
                Ok(WebhookOutcome::Ignored {
                    reason: format!("unmapped provider status {provider_status:?}"),
                })
            }
        }
    }

    /// Signature-verified ingestion of a provider push. Unknown tracking
    /// ids and unmapped statuses are acknowledged and dropped so the
    /// provider stops retrying them.
    pub async fn ingest_webhook(
        &self,
        provider_code: &str,
        body: &str,
        signature: &str,
    ) -> Result<WebhookOutcome, OpsError> {
        let provider = self.couriers.resolve(provider_code)?;
        if !provider.verify_webhook(body, signature) {
            return Err(OpsError::forbidden("webhook signature mismatch"));
        }
        let event = provider.parse_webhook(body)?;

        let Some(order) = self
            .store()
            .find_order_by_tracking(provider_code, &event.tracking_id)
            .await?
        else {
            tracing::warn!(
                provider = provider_code,
                tracking_id = %event.tracking_id,
                "webhook for unknown tracking id"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: format!("no order with tracking id {}", event.tracking_id),
            });
        };
        let order_id = order.id;
        self.store().touch_sync(order_id).await?;

        match provider.map_status(&event.provider_status) {
            Some(status) => self.apply_provider_status(order, status, provider_code).await,
            None => {
                tracing::info!(
                    order_id,
                    provider = provider_code,
                    provider_status = %event.provider_status,
                    "unmapped webhook status ignored"
                );
                Ok(WebhookOutcome::Ignored {
                    reason: format!("unmapped provider status {:?}", event.provider_status),
                })
            }
        }
    }

    pub async fn sync_status(
        &self,
        order_id: i64,
        actor: Actor,
    ) -> Result<Option<LogisticsSyncStatus>, OpsError> {
        require_staff(actor, "reading sync status")?;
        self.store().sync_status(order_id).await
    }

    pub fn provider_codes(&self) -> Vec<String> {
        self.couriers.codes()
    }

    /// Route one canonical status from a provider into local state. An
    /// order still pending on a dispatched manifest takes the outcome
    /// path so the line settles with it; anything else goes through the
    /// plain CAS. State disagreements (duplicate, stale, out-of-order
    /// pushes) come back as `Ignored`, never as errors.
    async fn apply_provider_status(
        &self,
        order: Order,
        status: OrderStatus,
        provider_code: &str,
    ) -> Result<WebhookOutcome, OpsError> {
        let order_id = order.id;
        if order.status == status {
            return Ok(WebhookOutcome::Ignored {
                reason: format!("order already {}", status.as_str()),
            });
        }

        let manifest_id = match self.store().manifest_for_order(order_id).await? {
            Some(m) if m.status == ManifestStatus::Dispatched => Some(m.id),
            _ => None,
        };

        let result = match (manifest_id, status) {
            (Some(mid), OrderStatus::Delivered) => {
                let outcome = OutcomeInput::Delivered {
                    proof: Some(format!("{provider_code} delivery confirmation")),
                    cod_collected: None,
                };
                self.store()
                    .record_outcome(mid, order_id, outcome, SYSTEM_ACTOR)
                    .await
                    .map(|_| ())
            }
            (Some(mid), OrderStatus::Rejected) => {
                let outcome = OutcomeInput::Rejected {
                    reason: format!("{provider_code} reported the receiver refused"),
                };
                self.store()
                    .record_outcome(mid, order_id, outcome, SYSTEM_ACTOR)
                    .await
                    .map(|_| ())
            }
            (Some(mid), OrderStatus::ReturnInitiated) => {
                let outcome = OutcomeInput::Returned {
                    reason: format!("{provider_code} reported the parcel returning"),
                };
                self.store()
                    .record_outcome(mid, order_id, outcome, SYSTEM_ACTOR)
                    .await
                    .map(|_| ())
            }
            // Rejected without a manifest still routes home afterwards,
            // same as the outcome path does.
            (None, OrderStatus::Rejected) => {
                let note = format!("{provider_code} reported the receiver refused");
                match self
                    .store()
                    .transition_order(order_id, OrderStatus::Rejected, SYSTEM_ACTOR, Some(note))
                    .await
                {
                    Ok(_) => self
                        .store()
                        .transition_order(
                            order_id,
                            OrderStatus::ReturnInitiated,
                            SYSTEM_ACTOR,
                            Some("rejected parcel returning to hub".to_string()),
                        )
                        .await
                        .map(|_| ()),
                    Err(err) => Err(err),
                }
            }
            // Lost and RTO close a still-pending manifest line on their
            // own; in_transit and the rest are plain CAS edges.
            (_, to) => {
                let note = format!("{provider_code} tracking update");
                self.store()
                    .transition_order(order_id, to, SYSTEM_ACTOR, Some(note))
                    .await
                    .map(|_| ())
            }
        };

        match result {
            Ok(()) => Ok(WebhookOutcome::Applied { order_id, status }),
            Err(OpsError::InvalidTransition { from, to, .. }) => {
                tracing::warn!(
                    order_id,
                    provider = provider_code,
                    from = from.as_str(),
                    to = to.as_str(),
                    "stale provider update dropped"
                );
                Ok(WebhookOutcome::Ignored {
                    reason: format!("{} does not follow {}", to.as_str(), from.as_str()),
                })
            }
            Err(OpsError::Validation(reason)) => {
                tracing::warn!(
                    order_id,
                    provider = provider_code,
                    %reason,
                    "provider update dropped"
                );
                Ok(WebhookOutcome::Ignored { reason })
            }
            Err(other) => Err(other),
        }
    }

    async fn await_booking_winner(
        &self,
        order_id: i64,
        provider_code: &str,
    ) -> Result<BookingResult, OpsError> {
        for _ in 0..CLAIM_POLL_BUDGET {
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
            match self.store().sync_status(order_id).await? {
                Some(LogisticsSyncStatus {
                    state: SyncState::Booked,
                    tracking_id: Some(tracking_id),
                    provider,
                    ..
                }) => {
                    return Ok(BookingResult {
                        order_id,
                        provider,
                        tracking_id,
                        already_booked: true,
                    })
                }
                Some(LogisticsSyncStatus {
                    state: SyncState::Failed,
                    provider,
                    last_error,
                    ..
                }) => {
                    return Err(OpsError::ProviderBookingFailed {
                        provider,
                        reason: last_error
                            .unwrap_or_else(|| "concurrent booking attempt failed".to_string()),
                    })
                }
                _ => {}
            }
        }
        Err(OpsError::ProviderBookingFailed {
            provider: provider_code.to_string(),
            reason: "another booking call is still in flight".to_string(),
        })
    }
}
