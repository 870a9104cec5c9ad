//! Shared fixtures for the integration suites.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use keymart::domain::aggregates::{Credential, Order, Product};
use keymart::domain::value_objects::{CredentialPayload, GroupKey};
use keymart::engine::AllocationEngine;
use keymart::notify::{Notifier, RecordingNotifier};
use keymart::service::catalog::{CreateProductRequest, VariationRequest};
use keymart::service::{CatalogService, InventoryService, OrderService};
use keymart::store::{InventoryStore, MemoryStore};

pub struct TestApp {
    pub store: Arc<dyn InventoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: AllocationEngine,
    pub catalog: CatalogService,
    pub inventory: InventoryService,
    pub orders: OrderService,
}

pub fn app() -> TestApp {
    let store: Arc<dyn InventoryStore> = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let dyn_notifier: Arc<dyn Notifier> = notifier.clone();
    let engine = AllocationEngine::new(store.clone(), dyn_notifier.clone());
    TestApp {
        catalog: CatalogService::new(store.clone()),
        inventory: InventoryService::new(store.clone(), dyn_notifier.clone()),
        orders: OrderService::new(store.clone(), engine.clone(), dyn_notifier),
        store,
        notifier,
        engine,
    }
}

pub fn netflix_request(max_uses_per_credential: u32) -> CreateProductRequest {
    CreateProductRequest {
        name: "Netflix".into(),
        description: Some("Streaming".into()),
        category: Some("streaming".into()),
        duration: Some("30 days".into()),
        variations: vec![VariationRequest {
            name: "Shared".into(),
            description: None,
            price: 990,
            original_price: Some(1490),
            duration: Some("30 days".into()),
            credential_group: Some("netflix".into()),
            credential_subgroup: Some("shared".into()),
            max_uses_per_credential: Some(max_uses_per_credential),
        }],
    }
}

/// Seed a pool credential with a controlled creation time so FIFO ordering
/// is deterministic in tests.
pub async fn seed_pool_credential(
    store: &Arc<dyn InventoryStore>,
    group: &str,
    subgroup: Option<&str>,
    max_uses: u32,
    age_secs: i64,
) -> Credential {
    let mut credential = Credential::new(
        CredentialPayload::email_password(format!("acct-{age_secs}@pool.test"), "hunter2").unwrap(),
        GroupKey::new(group, subgroup.map(String::from)).unwrap(),
        max_uses,
        None,
        None,
    )
    .unwrap();
    credential.created_at = Utc::now() - Duration::seconds(age_secs);
    store.insert_credential(&credential).await.unwrap();
    credential
}

/// Insert an order that has already been confirmed as paid.
pub async fn seed_paid_order(
    store: &Arc<dyn InventoryStore>,
    product: &Product,
    customer: &str,
) -> Order {
    let variation = &product.variations[0];
    let mut order = Order::create(
        product.id,
        variation.id,
        variation.name.clone(),
        variation.price,
        format!("{customer}@example.com"),
        customer,
    )
    .unwrap();
    order
        .confirm_payment(&format!("pay_{}", Uuid::now_v7()))
        .unwrap();
    store.insert_order(&order).await.unwrap();
    order
}
