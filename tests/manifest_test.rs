//! Manifest tests: draft membership, the dispatch cascade, outcome
//! recording with its ledger side effects, reschedules and closing.

mod common;

use common::*;
use pasalx_backend::error::OpsError;
use pasalx_backend::models::manifest::{LineOutcome, ManifestStatus};
use pasalx_backend::models::order::OrderStatus;
use pasalx_backend::models::Party;
use pasalx_backend::store::{ManifestFilter, OutcomeInput};
use rust_decimal::Decimal;

#[tokio::test]
async fn draft_membership_is_editable() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let first = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let second = packed(&hub, valley_order(variant.id, 1, 450)).await;

    let manifest = hub
        .service
        .create_manifest(Party::rider(7), vec![first.id], manager())
        .await
        .unwrap();
    assert_eq!(manifest.status, ManifestStatus::Draft);

    let manifest = hub
        .service
        .add_manifest_order(manifest.id, second.id, manager())
        .await
        .unwrap();
    assert_eq!(manifest.lines.len(), 2);

    let manifest = hub
        .service
        .remove_manifest_order(manifest.id, first.id, manager())
        .await
        .unwrap();
    assert_eq!(manifest.lines.len(), 1);

    // The removed order is free again for another batch.
    hub.service
        .create_manifest(Party::rider(8), vec![first.id], manager())
        .await
        .unwrap();
}

#[tokio::test]
async fn packed_order_joins_one_manifest_at_a_time() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;

    hub.service
        .create_manifest(Party::rider(7), vec![order.id], manager())
        .await
        .unwrap();
    let err = hub
        .service
        .create_manifest(Party::rider(8), vec![order.id], manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::OrderAlreadyManifested(id) if id == order.id));
}

#[tokio::test]
async fn unpacked_orders_stay_off_manifests() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = hub
        .service
        .create_order(valley_order(variant.id, 1, 450), operator())
        .await
        .unwrap();
    hub.service.confirm_order(order.id, operator()).await.unwrap();

    let err = hub
        .service
        .create_manifest(Party::rider(7), vec![order.id], manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}

#[tokio::test]
async fn fulfillment_must_match_the_carrier() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let outside = packed(&hub, branch_order(variant.id, 1, 450)).await;

    let err = hub
        .service
        .create_manifest(Party::rider(7), vec![outside.id], manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));

    let inside = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let err = hub
        .service
        .create_manifest(Party::courier(PROVIDER), vec![inside.id], manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}

#[tokio::test]
async fn dispatch_cascades_the_rider_leg() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let a = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let b = packed(&hub, valley_order(variant.id, 1, 450)).await;

    let manifest = dispatched_rider_manifest(&hub, 7, vec![a.id, b.id]).await;
    assert_eq!(manifest.status, ManifestStatus::Dispatched);

    for id in [a.id, b.id] {
        let order = hub.service.get_order(id, manager()).await.unwrap();
        assert_eq!(order.status, OrderStatus::OutForDelivery);
        assert_eq!(order.rider_id, Some(7));
    }
}

#[tokio::test]
async fn dispatch_cascades_the_courier_leg() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, branch_order(variant.id, 1, 450)).await;

    dispatched_courier_manifest(&hub, vec![order.id]).await;
    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::InTransit);
    assert_eq!(order.courier.as_deref(), Some(PROVIDER));
}

#[tokio::test]
async fn manifest_dispatches_exactly_once() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    let err = hub
        .service
        .dispatch_manifest(manifest.id, manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}

#[tokio::test]
async fn delivered_outcome_settles_line_and_ledger() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 2, 450)).await;
    let cod = order.cod_due;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    let manifest = hub
        .service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Delivered {
                proof: Some("signature ref 88124".to_string()),
                cod_collected: None,
            },
            rider(7),
        )
        .await
        .unwrap();
    assert_eq!(manifest.lines[0].outcome, LineOutcome::Delivered);

    let order = hub.service.get_order(order.id, rider(7)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.delivery_proof.as_deref(), Some("signature ref 88124"));

    // Full COD lands on the rider's float when no amount is keyed in.
    let balance = hub.service.rider_balance(7, rider(7)).await.unwrap();
    assert_eq!(balance, cod);
}

#[tokio::test]
async fn delivery_needs_proof_on_the_road() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    let err = hub
        .service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Delivered { proof: None, cod_collected: None },
            rider(7),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}

#[tokio::test]
async fn outcome_authority_is_owner_or_manager() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    let outcome = || OutcomeInput::Delivered {
        proof: Some("photo 1".to_string()),
        cod_collected: Some(Decimal::ZERO),
    };

    let err = hub
        .service
        .record_outcome(manifest.id, order.id, outcome(), rider(8))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    let err = hub
        .service
        .record_outcome(manifest.id, order.id, outcome(), operator())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    hub.service
        .record_outcome(manifest.id, order.id, outcome(), manager())
        .await
        .unwrap();
}

#[tokio::test]
async fn outcome_is_recorded_once() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    hub.service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Delivered {
                proof: Some("photo 1".to_string()),
                cod_collected: None,
            },
            rider(7),
        )
        .await
        .unwrap();

    let err = hub
        .service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Rejected { reason: "door locked".to_string() },
            rider(7),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}

#[tokio::test]
async fn reschedule_frees_the_order_for_the_next_batch() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    let manifest = hub
        .service
        .reschedule_order(manifest.id, order.id, rider(7))
        .await
        .unwrap();
    assert_eq!(manifest.lines[0].outcome, LineOutcome::Rescheduled);

    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Packed);
    assert_eq!(order.rider_id, None);

    dispatched_rider_manifest(&hub, 8, vec![order.id]).await;
}

#[tokio::test]
async fn close_waits_for_every_line() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let a = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let b = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![a.id, b.id]).await;

    hub.service
        .record_outcome(
            manifest.id,
            a.id,
            OutcomeInput::Delivered {
                proof: Some("photo 1".to_string()),
                cod_collected: None,
            },
            rider(7),
        )
        .await
        .unwrap();

    let err = hub.service.close_manifest(manifest.id, manager()).await.unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));

    hub.service
        .record_outcome(
            manifest.id,
            b.id,
            OutcomeInput::Returned { reason: "no one home".to_string() },
            rider(7),
        )
        .await
        .unwrap();

    let closed = hub.service.close_manifest(manifest.id, manager()).await.unwrap();
    assert_eq!(closed.status, ManifestStatus::Closed);
}

#[tokio::test]
async fn writing_off_a_shipment_settles_its_pending_line() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    hub.service
        .mark_lost(order.id, "parcel missing after bike crash", admin())
        .await
        .unwrap();

    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::LostInTransit);

    let manifest = hub.service.get_manifest(manifest.id, manager()).await.unwrap();
    assert_eq!(manifest.lines[0].outcome, LineOutcome::Lost);
    assert_eq!(
        manifest.lines[0].note.as_deref(),
        Some("order marked lost_in_transit")
    );

    // Nothing pending: the batch can close.
    hub.service.close_manifest(manifest.id, manager()).await.unwrap();
}

#[tokio::test]
async fn rto_settles_the_line_as_returned() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, branch_order(variant.id, 1, 450)).await;
    let manifest = dispatched_courier_manifest(&hub, vec![order.id]).await;

    hub.service
        .mark_rto(order.id, "receiver unreachable for a week", admin())
        .await
        .unwrap();

    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Rto);

    let manifest = hub.service.get_manifest(manifest.id, manager()).await.unwrap();
    assert_eq!(manifest.lines[0].outcome, LineOutcome::Returned);
}

#[tokio::test]
async fn mark_lost_requires_admin() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    let err = hub
        .service
        .mark_lost(order.id, "gone", manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));
}

#[tokio::test]
async fn riders_list_only_their_own_manifests() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let a = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let b = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let mine = dispatched_rider_manifest(&hub, 7, vec![a.id]).await;
    dispatched_rider_manifest(&hub, 8, vec![b.id]).await;

    let listed = hub
        .service
        .list_manifests(ManifestFilter::default(), rider(7))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine.id);

    // And cannot open someone else's by id.
    let other = hub
        .service
        .list_manifests(ManifestFilter::default(), rider(8))
        .await
        .unwrap();
    let err = hub
        .service
        .get_manifest(other[0].id, rider(7))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));
}
