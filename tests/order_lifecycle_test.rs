//! Order state machine tests: intake through packing, cancellation,
//! store pickups, and the audit trail for refused edges.

mod common;

use common::*;
use pasalx_backend::error::OpsError;
use pasalx_backend::models::order::OrderStatus;
use pasalx_backend::store::OrderFilter;
use rust_decimal::Decimal;

#[tokio::test]
async fn intake_to_packed_decrements_stock() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;

    let order = hub
        .service
        .create_order(valley_order(variant.id, 3, 450), operator())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Intake);
    assert_eq!(order.order_number, "PX-00001");
    assert_eq!(order.subtotal, Decimal::from(1350));
    assert_eq!(order.cod_due, Decimal::from(1450), "subtotal + shipping");

    hub.service.confirm_order(order.id, operator()).await.unwrap();
    let packed = hub.service.pack_order(order.id, operator()).await.unwrap();
    assert_eq!(packed.status, OrderStatus::Packed);

    let variant = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(variant.stock_on_hand, 7);
}

#[tokio::test]
async fn order_numbers_are_sequential() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    let first = hub
        .service
        .create_order(valley_order(variant.id, 1, 450), operator())
        .await
        .unwrap();
    let second = hub
        .service
        .create_order(valley_order(variant.id, 1, 450), operator())
        .await
        .unwrap();
    assert_eq!(first.order_number, "PX-00001");
    assert_eq!(second.order_number, "PX-00002");
}

#[tokio::test]
async fn pack_refused_when_stock_short() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 2).await;
    let order = hub
        .service
        .create_order(valley_order(variant.id, 5, 450), operator())
        .await
        .unwrap();
    hub.service.confirm_order(order.id, operator()).await.unwrap();

    let err = hub.service.pack_order(order.id, operator()).await.unwrap_err();
    assert!(matches!(
        err,
        OpsError::InsufficientStock { available: 2, requested: 5, .. }
    ));

    // Neither the status nor the stock moved.
    let order = hub.service.get_order(order.id, operator()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    let variant = hub.service.get_variant(variant.id, admin()).await.unwrap();
    assert_eq!(variant.stock_on_hand, 2);
}

#[tokio::test]
async fn refused_edge_lands_in_the_activity_trail() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = hub
        .service
        .create_order(valley_order(variant.id, 1, 450), operator())
        .await
        .unwrap();

    // Packing straight from intake skips confirmation.
    let err = hub.service.pack_order(order.id, operator()).await.unwrap_err();
    assert!(matches!(err, OpsError::InvalidTransition { .. }));

    let trail = hub.service.order_activity(order.id, operator()).await.unwrap();
    let refused = trail.iter().find(|a| !a.succeeded).expect("refused row");
    assert_eq!(refused.from_status, OrderStatus::Intake);
    assert_eq!(refused.to_status, OrderStatus::Packed);

    let order = hub.service.get_order(order.id, operator()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Intake);
}

#[tokio::test]
async fn cancel_works_only_before_dispatch() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = hub
        .service
        .create_order(valley_order(variant.id, 1, 450), operator())
        .await
        .unwrap();
    hub.service.confirm_order(order.id, operator()).await.unwrap();

    let cancelled = hub
        .service
        .cancel_order(order.id, "customer changed their mind", operator())
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let trail = hub.service.order_activity(order.id, operator()).await.unwrap();
    let row = trail
        .iter()
        .find(|a| a.to_status == OrderStatus::Cancelled)
        .unwrap();
    assert_eq!(row.note.as_deref(), Some("customer changed their mind"));
}

#[tokio::test]
async fn cancel_refused_while_on_a_manifest() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    hub.service
        .create_manifest(
            pasalx_backend::models::Party::rider(9),
            vec![order.id],
            manager(),
        )
        .await
        .unwrap();

    let err = hub
        .service
        .cancel_order(order.id, "late cancel", operator())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::OrderAlreadyManifested(id) if id == order.id));
}

#[tokio::test]
async fn store_pickup_hands_over_the_counter() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, counter_order(variant.id, 2, 300)).await;

    let done = hub
        .service
        .complete_store_pickup(order.id, Some(Decimal::from(600)), operator())
        .await
        .unwrap();
    assert_eq!(done.status, OrderStatus::Delivered);

    let trail = hub.service.order_activity(order.id, operator()).await.unwrap();
    let row = trail
        .iter()
        .find(|a| a.to_status == OrderStatus::Delivered)
        .unwrap();
    assert_eq!(row.note.as_deref(), Some("counter payment 600"));
}

#[tokio::test]
async fn store_pickup_refused_for_delivery_orders() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;

    let err = hub
        .service
        .complete_store_pickup(order.id, None, operator())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}

#[tokio::test]
async fn cod_due_accounts_for_discount_and_prepayment() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let mut new = valley_order(variant.id, 2, 500);
    new.discount = Decimal::from(50);
    new.paid_amount = Decimal::from(200);

    let order = hub.service.create_order(new, operator()).await.unwrap();
    // 1000 + 100 shipping - 50 - 200
    assert_eq!(order.cod_due, Decimal::from(850));
}

#[tokio::test]
async fn intake_requires_staff() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let err = hub
        .service
        .create_order(valley_order(variant.id, 1, 450), rider(7))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));
}

#[tokio::test]
async fn riders_see_only_their_own_orders() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 5).await;
    let order = packed(&hub, valley_order(variant.id, 1, 450)).await;
    dispatched_rider_manifest(&hub, 7, vec![order.id]).await;

    // The assigned rider reads it; another rider is turned away.
    hub.service.get_order(order.id, rider(7)).await.unwrap();
    let err = hub.service.get_order(order.id, rider(8)).await.unwrap_err();
    assert!(matches!(err, OpsError::Forbidden(_)));
}

#[tokio::test]
async fn list_orders_filters_by_status() {
    let hub = hub();
    let variant = seed_variant(&hub, "GUN-500", 10).await;
    packed(&hub, valley_order(variant.id, 1, 450)).await;
    hub.service
        .create_order(valley_order(variant.id, 1, 450), operator())
        .await
        .unwrap();

    let packed_only = hub
        .service
        .list_orders(
            OrderFilter {
                status: Some(OrderStatus::Packed),
                ..Default::default()
            },
            operator(),
        )
        .await
        .unwrap();
    assert_eq!(packed_only.len(), 1);
    assert!(packed_only.iter().all(|o| o.status == OrderStatus::Packed));
}

#[tokio::test]
async fn duplicate_sku_rejected() {
    let hub = hub();
    seed_variant(&hub, "GUN-500", 5).await;
    let err = hub
        .service
        .create_variant("GUN-500", "Gundruk 500g", 3, admin())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Validation(_)));
}
