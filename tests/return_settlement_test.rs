//! Return gate and cash trail tests: rejected parcels coming back, stock
//! credit on verified handovers, the rider ledger and settlement cycle.

mod common;

use common::*;
use pasalx_backend::error::OpsError;
use pasalx_backend::models::handover::{HandoverStatus, ItemCondition};
use pasalx_backend::models::ledger::LedgerEntryKind;
use pasalx_backend::models::manifest::ManifestStatus;
use pasalx_backend::models::order::{Order, OrderStatus};
use pasalx_backend::models::settlement::SettlementStatus;
use pasalx_backend::models::Party;
use pasalx_backend::store::{LineVerification, NewHandoverLine, OutcomeInput};
use rust_decimal::Decimal;

/// Packed -> dispatched -> rejected at the door; the order is on its way
/// back with the rider.
async fn rejected_on_road(hub: &Hub, variant_id: i64, rider_id: i64) -> Order {
    let order = packed(hub, valley_order(variant_id, 2, 450)).await;
    let manifest = dispatched_rider_manifest(hub, rider_id, vec![order.id]).await;
    hub.service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Rejected { reason: "receiver refused to pay".to_string() },
            rider(rider_id),
        )
        .await
        .unwrap();
    hub.service.get_order(order.id, manager()).await.unwrap()
}

fn claim(order: &Order, variant_id: i64, quantity: i64, condition: ItemCondition) -> NewHandoverLine {
    NewHandoverLine {
        order_id: order.id,
        variant_id,
        quantity,
        condition,
        note: None,
    }
}

fn verdict(order_id: i64, variant_id: i64, qty: i64) -> LineVerification {
    LineVerification {
        order_id,
        variant_id,
        verified_qty: Some(qty),
        condition: None,
        disputed: false,
        note: None,
    }
}

#[tokio::test]
async fn rejection_initiates_the_return() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = rejected_on_road(&hub, variant.id, 7).await;
    assert_eq!(order.status, OrderStatus::ReturnInitiated);

    let trail = hub.service.order_activity(order.id, manager()).await.unwrap();
    assert!(trail.iter().any(|a| a.to_status == OrderStatus::Rejected));
    assert!(trail
        .iter()
        .any(|a| a.to_status == OrderStatus::ReturnInitiated));
}

#[tokio::test]
async fn delivered_order_can_still_come_back() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;
    hub.service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Delivered {
                proof: Some("signature ref 11902".to_string()),
                cod_collected: None,
            },
            rider(7),
        )
        .await
        .unwrap();

    // Customer return: same gate as a rejection, entered from delivered.
    let order = hub
        .service
        .initiate_return(order.id, "customer changed their mind", operator())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::ReturnInitiated);

    let handover = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 1, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap();
    hub.service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 1)], admin())
        .await
        .unwrap();

    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Returned);
    let v = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(v.stock_on_hand, 5);
}

#[tokio::test]
async fn verified_handover_restocks_and_closes_the_loop() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    // Packing 2 units leaves 3 on the shelf.
    let order = rejected_on_road(&hub, variant.id, 7).await;

    let handover = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 2, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap();
    assert_eq!(handover.status, HandoverStatus::PendingVerification);

    // Stock moves only at verification, not at claim time.
    let v = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(v.stock_on_hand, 3);

    let handover = hub
        .service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 2)], admin())
        .await
        .unwrap();
    assert_eq!(handover.status, HandoverStatus::Processed);

    let v = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(v.stock_on_hand, 5);

    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Returned);
}

#[tokio::test]
async fn damaged_units_never_restock() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = rejected_on_road(&hub, variant.id, 7).await;

    let handover = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 2, ItemCondition::Damaged)],
            rider(7),
        )
        .await
        .unwrap();
    hub.service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 2)], admin())
        .await
        .unwrap();

    // Still the post-pack level; damaged goods are recorded, not shelved.
    let v = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(v.stock_on_hand, 3);

    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Returned);
}

#[tokio::test]
async fn zero_verified_logs_the_discrepancy() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = rejected_on_road(&hub, variant.id, 7).await;

    let handover = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 1, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap();

    // The bag arrived empty: the count is a verdict, not a dispute.
    let handover = hub
        .service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 0)], admin())
        .await
        .unwrap();
    assert_eq!(handover.status, HandoverStatus::Processed);
    assert_eq!(handover.lines[0].verified_qty, Some(0));
    let note = handover.lines[0].note.as_deref().unwrap_or_default();
    assert!(note.contains("claimed 1, verified 0"), "note was {note:?}");

    // No unit came back, so nothing is credited; the order still closes.
    let v = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(v.stock_on_hand, 3);
    let order = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Returned);
}

#[tokio::test]
async fn disputed_line_parks_until_resolved() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let order = rejected_on_road(&hub, variant.id, 7).await;

    let handover = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 2, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap();

    let disputed = LineVerification {
        order_id: order.id,
        variant_id: variant.id,
        verified_qty: None,
        condition: None,
        disputed: true,
        note: Some("bag came back one short".to_string()),
    };
    let handover = hub
        .service
        .process_handover(handover.id, vec![disputed], admin())
        .await
        .unwrap();
    assert_eq!(handover.status, HandoverStatus::PendingVerification);
    assert!(handover.lines[0].disputed);

    let order_mid = hub.service.get_order(order.id, manager()).await.unwrap();
    assert_eq!(order_mid.status, OrderStatus::ReturnInitiated, "no flip while disputed");

    // The recount resolves the dispute with what was actually there.
    let handover = hub
        .service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 1)], admin())
        .await
        .unwrap();
    assert_eq!(handover.status, HandoverStatus::Processed);

    let err = hub
        .service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 1)], admin())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::HandoverAlreadyProcessed(_)));
}

#[tokio::test]
async fn handover_gates() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let order = rejected_on_road(&hub, variant.id, 7).await;

    // A rider cannot submit someone else's bag.
    let err = hub
        .service
        .create_handover(
            Party::rider(8),
            vec![claim(&order, variant.id, 1, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    // Claims are capped by what the order carried.
    let err = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 5, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));

    // No return in progress, nothing to hand over.
    let delivered = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let m = dispatched_rider_manifest(&hub, 7, vec![delivered.id]).await;
    hub.service
        .record_outcome(
            m.id,
            delivered.id,
            OutcomeInput::Delivered {
                proof: Some("photo 9".to_string()),
                cod_collected: None,
            },
            rider(7),
        )
        .await
        .unwrap();
    let err = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&delivered, variant.id, 1, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));

    // Verification is an admin counter job.
    let handover = hub
        .service
        .create_handover(
            Party::rider(7),
            vec![claim(&order, variant.id, 1, ItemCondition::Sellable)],
            rider(7),
        )
        .await
        .unwrap();
    let err = hub
        .service
        .process_handover(handover.id, vec![verdict(order.id, variant.id, 1)], manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));
}

#[tokio::test]
async fn cod_flows_through_ledger_and_settlement() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    let cod = order.cod_due; // 550
    let manifest = dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    hub.service
        .record_outcome(
            manifest.id,
            order.id,
            OutcomeInput::Delivered {
                proof: Some("photo 2".to_string()),
                cod_collected: None,
            },
            rider(7),
        )
        .await
        .unwrap();
    assert_eq!(hub.service.rider_balance(7, rider(7)).await.unwrap(), cod);

    // 300 handed over at the counter.
    hub.service
        .record_cash_handover(7, Decimal::from(300), None, operator())
        .await
        .unwrap();
    let balance = hub.service.rider_balance(7, rider(7)).await.unwrap();
    assert_eq!(balance, cod - Decimal::from(300));

    let settlement = hub
        .service
        .request_settlement(7, Decimal::from(250), rider(7))
        .await
        .unwrap();
    assert_eq!(settlement.expected, Decimal::from(250));
    assert_eq!(settlement.status, SettlementStatus::Pending);

    // One at a time per rider.
    let err = hub
        .service
        .request_settlement(7, Decimal::from(250), rider(7))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::SettlementAlreadyPending(7)));

    // The count comes up 50 short; the variance hits the ledger.
    let verified = hub
        .service
        .verify_settlement(settlement.id, Decimal::from(200), admin())
        .await
        .unwrap();
    assert_eq!(verified.status, SettlementStatus::Verified);
    assert_eq!(verified.variance, Some(Decimal::from(-50)));

    let statement = hub.service.rider_statement(7, rider(7)).await.unwrap();
    assert!(statement
        .iter()
        .any(|e| e.kind == LedgerEntryKind::SettlementAdjustment
            && e.delta == Decimal::from(-50)
            && e.settlement_id == Some(settlement.id)));
    assert_eq!(
        hub.service.rider_balance(7, rider(7)).await.unwrap(),
        Decimal::from(200)
    );

    // The settled batch closed with the verification.
    let manifest = hub.service.get_manifest(manifest.id, manager()).await.unwrap();
    assert_eq!(manifest.status, ManifestStatus::Closed);
}

#[tokio::test]
async fn statement_snapshots_match_the_running_sum() {
    let hub = hub();
    hub.service
        .record_collection(7, None, Decimal::from(500), None, admin())
        .await
        .unwrap();
    hub.service
        .record_cash_handover(7, Decimal::from(200), None, operator())
        .await
        .unwrap();
    hub.service
        .record_collection(7, None, Decimal::from(120), None, admin())
        .await
        .unwrap();

    let statement = hub.service.rider_statement(7, rider(7)).await.unwrap();
    let balance = hub.service.rider_balance(7, rider(7)).await.unwrap();
    assert_eq!(statement.iter().map(|e| e.delta).sum::<Decimal>(), balance);

    // Newest first; each snapshot equals the sum up to that row.
    let mut running = Decimal::ZERO;
    for entry in statement.iter().rev() {
        running += entry.delta;
        assert_eq!(entry.balance_after, running);
    }
    assert_eq!(balance, Decimal::from(420));
}

#[tokio::test]
async fn ledger_and_settlement_gates() {
    let hub = hub();

    // Manual collection entries are the strictest write in the ledger.
    let err = hub
        .service
        .record_collection(7, None, Decimal::from(100), None, manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));
    let err = hub
        .service
        .record_collection(7, None, Decimal::ZERO, None, admin())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));

    let err = hub
        .service
        .record_cash_handover(7, Decimal::from(100), None, rider(7))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    // Riders read their own money, nobody else's.
    let err = hub.service.rider_balance(7, rider(8)).await.unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    hub.service
        .record_collection(7, None, Decimal::from(100), None, admin())
        .await
        .unwrap();
    let settlement = hub
        .service
        .request_settlement(7, Decimal::from(100), rider(7))
        .await
        .unwrap();

    let err = hub
        .service
        .get_settlement(settlement.id, rider(8))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    let err = hub
        .service
        .verify_settlement(settlement.id, Decimal::from(100), manager())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));

    // A rider's settlement listing is forced to their own rows.
    hub.service
        .record_collection(8, None, Decimal::from(70), None, admin())
        .await
        .unwrap();
    hub.service
        .request_settlement(8, Decimal::from(70), rider(8))
        .await
        .unwrap();
    let listed = hub.service.list_settlements(None, rider(7)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rider_id, 7);
}
