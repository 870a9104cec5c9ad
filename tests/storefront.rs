//! Catalog, import, and order lifecycle behavior through the services,
//! ending with the full checkout-to-delivery scenario.

mod common;

use common::{app, netflix_request, seed_pool_credential};
use keymart::domain::aggregates::OrderStatus;
use keymart::engine::AllocationOutcome;
use keymart::service::catalog::CreateProductRequest;
use keymart::service::inventory::ImportRequest;
use keymart::service::orders::{CheckoutRequest, PaymentEvent};
use keymart::Error;
use uuid::Uuid;

#[tokio::test]
async fn product_requires_at_least_one_variation() {
    let app = app();
    let req = CreateProductRequest { variations: vec![], ..netflix_request(1) };
    let err = app.catalog.create_product(req).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn deleting_the_last_variation_is_a_conflict() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    let vid = product.variations[0].id;
    let err = app.catalog.delete_variation(product.id, vid).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn bulk_import_skips_malformed_lines() {
    let app = app();
    let summary = app
        .inventory
        .import(ImportRequest {
            lines: "a@x.com;p1\nb@x.com:p2\nc@x.com|p3\nbroken-line\n\n".into(),
            group: "netflix".into(),
            subgroup: Some("shared".into()),
            variation_id: None,
            max_uses: None,
        })
        .await
        .unwrap();
    assert_eq!(summary.created, 3);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn variation_targeted_import_applies_the_capacity_policy() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(4)).await.unwrap();
    let variation = &product.variations[0];

    app.inventory
        .import(ImportRequest {
            lines: "pool@x.com;pw".into(),
            group: "netflix".into(),
            subgroup: Some("shared".into()),
            variation_id: Some(variation.id),
            max_uses: None,
        })
        .await
        .unwrap();

    let credentials = app.store.credentials_for(variation, true).await.unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].max_uses, 4);
    assert_eq!(credentials[0].variation_id, Some(variation.id));
    assert_eq!(credentials[0].product_id, Some(product.id));
}

#[tokio::test]
async fn checkout_requires_stock_and_an_active_product() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    let variation_id = product.variations[0].id;

    let out_of_stock = app
        .orders
        .checkout(CheckoutRequest {
            variation_id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(out_of_stock, Error::Conflict(_)));

    seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;
    let mut stored = app.store.product(product.id).await.unwrap().unwrap();
    stored.deactivate();
    app.store.update_product(&stored).await.unwrap();

    let inactive = app
        .orders
        .checkout(CheckoutRequest {
            variation_id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(inactive, Error::Conflict(_)));
}

#[tokio::test]
async fn checkout_validates_contact_details() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let err = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "not-an-email".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn cancel_is_only_valid_from_pending() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap();
    app.orders.cancel(order.id()).await.unwrap();
    // Cancelling again is a no-op.
    app.orders.cancel(order.id()).await.unwrap();

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "b@example.com".into(),
            customer_name: "B".into(),
        })
        .await
        .unwrap();
    app.orders
        .handle_payment_confirmed(PaymentEvent {
            order_id: Some(order.id()),
            payment_id: Some("pay_b".into()),
        })
        .await
        .unwrap();
    let err = app.orders.cancel(order.id()).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn duplicate_webhook_delivery_is_idempotent() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(2)).await.unwrap();
    let credential = seed_pool_credential(&app.store, "netflix", Some("shared"), 2, 60).await;

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap();

    let event = || PaymentEvent {
        order_id: Some(order.id()),
        payment_id: Some("pay_1".into()),
    };
    let first = app.orders.handle_payment_confirmed(event()).await.unwrap();
    assert!(matches!(first, AllocationOutcome::Delivered(_)));
    let second = app.orders.handle_payment_confirmed(event()).await.unwrap();
    assert!(matches!(second, AllocationOutcome::AlreadyDelivered(_)));

    let credential = app.store.credential(credential.id).await.unwrap().unwrap();
    assert_eq!(credential.current_uses, 1);
    assert_eq!(app.notifier.assigned().len(), 1);
}

#[tokio::test]
async fn webhook_can_resolve_by_payment_id() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap();
    // First delivery attaches the provider's payment id.
    app.orders
        .handle_payment_confirmed(PaymentEvent {
            order_id: Some(order.id()),
            payment_id: Some("pay_xyz".into()),
        })
        .await
        .unwrap();
    // A replay that only carries the payment id still resolves.
    let replay = app
        .orders
        .handle_payment_confirmed(PaymentEvent {
            order_id: None,
            payment_id: Some("pay_xyz".into()),
        })
        .await
        .unwrap();
    assert!(matches!(replay, AllocationOutcome::AlreadyDelivered(_)));
}

#[tokio::test]
async fn webhook_with_unknown_payment_id_is_not_found() {
    let app = app();
    let err = app
        .orders
        .handle_payment_confirmed(PaymentEvent {
            order_id: None,
            payment_id: Some("pay_never_seen".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn manual_payment_confirmation_is_idempotent() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap();

    let confirmed = app.orders.confirm_payment(order.id(), "manual_1").await.unwrap();
    assert_eq!(confirmed.status(), OrderStatus::Paid);
    assert_eq!(confirmed.payment_id(), Some("manual_1"));

    // Repeating keeps the original payment id.
    let again = app.orders.confirm_payment(order.id(), "manual_2").await.unwrap();
    assert_eq!(again.status(), OrderStatus::Paid);
    assert_eq!(again.payment_id(), Some("manual_1"));
}

#[tokio::test]
async fn credential_lookup_by_id() {
    let app = app();
    let credential = seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let found = app.inventory.credential(credential.id).await.unwrap();
    assert_eq!(found.id, credential.id);

    let err = app.inventory.credential(Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn stale_pending_orders_are_swept() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap();

    // Nothing is older than an hour yet.
    assert_eq!(app.orders.cancel_stale(60).await.unwrap(), 0);
    // With a zero-minute TTL the fresh pending order is swept.
    assert_eq!(app.orders.cancel_stale(0).await.unwrap(), 1);
    let order = app.orders.order(order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn credential_deletion_guarded_by_delivered_orders() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(1)).await.unwrap();
    let credential = seed_pool_credential(&app.store, "netflix", Some("shared"), 1, 60).await;

    let order = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: product.variations[0].id,
            customer_email: "a@example.com".into(),
            customer_name: "A".into(),
        })
        .await
        .unwrap();
    app.orders
        .handle_payment_confirmed(PaymentEvent {
            order_id: Some(order.id()),
            payment_id: Some("pay_1".into()),
        })
        .await
        .unwrap();

    let err = app.inventory.remove_credential(credential.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Deleting the product unlinks the order, after which the credential
    // can be removed.
    app.catalog.delete_product(product.id).await.unwrap();
    let order = app.orders.order(order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Delivered);
    assert_eq!(order.credential_id(), None);
    app.inventory.remove_credential(credential.id).await.unwrap();
}

#[tokio::test]
async fn storefront_annotates_live_stock() {
    let app = app();
    app.catalog.create_product(netflix_request(2)).await.unwrap();
    seed_pool_credential(&app.store, "netflix", Some("shared"), 2, 60).await;

    let views = app.catalog.storefront().await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].variations[0].stock, 2);
}

#[tokio::test]
async fn end_to_end_shared_credential_scenario() {
    let app = app();
    let product = app.catalog.create_product(netflix_request(2)).await.unwrap();
    let variation = &product.variations[0];
    let credential = seed_pool_credential(&app.store, "netflix", Some("shared"), 2, 60).await;

    // Two customers buy and pay sequentially; both deliveries draw from the
    // same shared credential.
    for (i, customer) in ["alice", "bob"].iter().enumerate() {
        let order = app
            .orders
            .checkout(CheckoutRequest {
                variation_id: variation.id,
                customer_email: format!("{customer}@example.com"),
                customer_name: (*customer).into(),
            })
            .await
            .unwrap();
        let outcome = app
            .orders
            .handle_payment_confirmed(PaymentEvent {
                order_id: Some(order.id()),
                payment_id: Some(format!("pay_{i}")),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, AllocationOutcome::Delivered(_)));
    }

    let credential = app.store.credential(credential.id).await.unwrap().unwrap();
    assert_eq!(credential.current_uses, 2);
    assert_eq!(
        keymart::stock::stock_for(app.store.as_ref(), variation).await.unwrap(),
        0
    );

    // A third checkout is blocked on the stock check.
    let blocked = app
        .orders
        .checkout(CheckoutRequest {
            variation_id: variation.id,
            customer_email: "carol@example.com".into(),
            customer_name: "carol".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(blocked, Error::Conflict(_)));

    // If one slipped through and got paid anyway, it stays paid and raises
    // the operator signal instead of overselling.
    let order = common::seed_paid_order(&app.store, &product, "carol").await;
    let outcome = app
        .orders
        .handle_payment_confirmed(PaymentEvent {
            order_id: Some(order.id()),
            payment_id: Some("pay_late".into()),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, AllocationOutcome::NoCredentialAvailable));
    let order = app.orders.order(order.id()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(app.notifier.alerts().len(), 1);
    assert_eq!(app.notifier.assigned().len(), 2);
}
