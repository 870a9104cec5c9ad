//! In-memory inventory store.
//!
//! Backs the test suites and single-process development. `try_reserve` holds
//! one lock across the capacity check, the increment, and the order binding,
//! giving the same atomic contract as the Postgres store's transaction.
//! Production deployments use [`super::PgInventoryStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{Credential, CredentialSource, Order, Product, Variation};
use crate::store::InventoryStore;
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    credentials: HashMap<Uuid, Credential>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("memory store poisoned".into()))
    }
}

fn eligible<'a>(inner: &'a Inner, variation: &Variation) -> Vec<&'a Credential> {
    let mut direct: Vec<&Credential> = inner
        .credentials
        .values()
        .filter(|c| c.variation_id == Some(variation.id))
        .collect();
    if direct.is_empty() {
        if let CredentialSource::Pool { group } = &variation.source {
            direct = inner
                .credentials
                .values()
                .filter(|c| c.variation_id.is_none() && c.group == *group)
                .collect();
        }
    }
    direct.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    direct
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<()> {
        self.lock()?
            .credentials
            .insert(credential.id, credential.clone());
        Ok(())
    }

    async fn credential(&self, id: Uuid) -> Result<Option<Credential>> {
        Ok(self.lock()?.credentials.get(&id).cloned())
    }

    async fn credentials_for(
        &self,
        variation: &Variation,
        only_available: bool,
    ) -> Result<Vec<Credential>> {
        let inner = self.lock()?;
        Ok(eligible(&inner, variation)
            .into_iter()
            .filter(|c| !only_available || c.is_available())
            .cloned()
            .collect())
    }

    async fn delete_credential(&self, id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.credentials.contains_key(&id) {
            return Err(Error::NotFound("credential"));
        }
        let referenced = inner
            .orders
            .values()
            .any(|o| o.credential_id() == Some(id));
        if referenced {
            return Err(Error::Conflict(
                "credential is still assigned to a delivered order".into(),
            ));
        }
        inner.credentials.remove(&id);
        Ok(())
    }

    async fn try_reserve(&self, order_id: Uuid, credential_id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(credential) = inner.credentials.get(&credential_id) else {
            return Ok(false);
        };
        if !credential.is_available() {
            return Ok(false);
        }
        let Some(order) = inner.orders.get(&order_id) else {
            return Ok(false);
        };
        let mut bound = order.clone();
        if bound.bind_credential(credential_id).is_err() {
            return Ok(false);
        }
        bound.take_events();
        inner.orders.insert(order_id, bound);
        if let Some(c) = inner.credentials.get_mut(&credential_id) {
            c.current_uses += 1;
        }
        Ok(true)
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.lock()?.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.lock()?.products.get(&id).cloned())
    }

    async fn products(&self, only_active: bool) -> Result<Vec<Product>> {
        let inner = self.lock()?;
        let mut products: Vec<Product> = inner
            .products
            .values()
            .filter(|p| !only_active || p.is_active)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(products)
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.products.contains_key(&product.id) {
            return Err(Error::NotFound("product"));
        }
        inner.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        let Some(product) = inner.products.remove(&id) else {
            return Err(Error::NotFound("product"));
        };
        let variation_ids: Vec<Uuid> = product.variations.iter().map(|v| v.id).collect();
        for c in inner.credentials.values_mut() {
            let earmarked = c.product_id == Some(id)
                || c.variation_id.map_or(false, |v| variation_ids.contains(&v));
            if earmarked {
                c.product_id = None;
                c.variation_id = None;
            }
        }
        for o in inner.orders.values_mut() {
            if o.product_id() == id {
                o.unlink_credential();
            }
        }
        Ok(())
    }

    async fn variation(&self, id: Uuid) -> Result<Option<Variation>> {
        let inner = self.lock()?;
        Ok(inner
            .products
            .values()
            .flat_map(|p| &p.variations)
            .find(|v| v.id == id)
            .cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut stored = order.clone();
        stored.take_events();
        self.lock()?.orders.insert(order.id(), stored);
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn order_by_payment(&self, payment_id: &str) -> Result<Option<Order>> {
        let inner = self.lock()?;
        Ok(inner
            .orders
            .values()
            .find(|o| o.payment_id() == Some(payment_id))
            .cloned())
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        let inner = self.lock()?;
        let mut orders: Vec<Order> = inner.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn mark_paid(&self, order_id: Uuid, payment_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(order) = inner.orders.get(&order_id) else {
            return Ok(false);
        };
        let mut updated = order.clone();
        match updated.confirm_payment(payment_id) {
            Ok(crate::domain::aggregates::PaymentOutcome::Confirmed) => {
                updated.take_events();
                inner.orders.insert(order_id, updated);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancelled(&self, order_id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(order) = inner.orders.get(&order_id) else {
            return Ok(false);
        };
        if order.status() != crate::domain::aggregates::OrderStatus::Pending {
            return Ok(false);
        }
        let mut updated = order.clone();
        if updated.cancel().is_err() {
            return Ok(false);
        }
        updated.take_events();
        inner.orders.insert(order_id, updated);
        Ok(true)
    }

    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let inner = self.lock()?;
        Ok(inner
            .orders
            .values()
            .filter(|o| {
                o.status() == crate::domain::aggregates::OrderStatus::Pending
                    && o.created_at() < cutoff
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::NewVariation;
    use crate::domain::value_objects::{CredentialPayload, GroupKey};

    fn product() -> Product {
        Product::create(
            "Netflix",
            None,
            None,
            None,
            vec![NewVariation {
                name: "Shared".into(),
                description: None,
                price: 990,
                original_price: None,
                duration: None,
                credential_group: Some("netflix".into()),
                credential_subgroup: Some("shared".into()),
                max_uses_per_credential: Some(2),
            }],
        )
        .unwrap()
    }

    fn pool_credential(max_uses: u32) -> Credential {
        Credential::new(
            CredentialPayload::email_password("acc@netflix.test", "pw").unwrap(),
            GroupKey::new("netflix", Some("shared".into())).unwrap(),
            max_uses,
            None,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reserve_respects_capacity() {
        let store = MemoryStore::new();
        let p = product();
        let v = p.variations[0].clone();
        store.insert_product(&p).await.unwrap();
        let c = pool_credential(1);
        store.insert_credential(&c).await.unwrap();

        let mut o1 = Order::create(p.id, v.id, "Shared", 990, "a@b.c", "A").unwrap();
        o1.confirm_payment("pay_1").unwrap();
        let mut o2 = Order::create(p.id, v.id, "Shared", 990, "b@b.c", "B").unwrap();
        o2.confirm_payment("pay_2").unwrap();
        store.insert_order(&o1).await.unwrap();
        store.insert_order(&o2).await.unwrap();

        assert!(store.try_reserve(o1.id(), c.id).await.unwrap());
        assert!(!store.try_reserve(o2.id(), c.id).await.unwrap());
        let c = store.credential(c.id).await.unwrap().unwrap();
        assert_eq!(c.current_uses, 1);
    }

    #[tokio::test]
    async fn test_reserve_is_all_or_nothing_for_the_order() {
        let store = MemoryStore::new();
        let p = product();
        let v = p.variations[0].clone();
        store.insert_product(&p).await.unwrap();
        let c1 = pool_credential(2);
        let c2 = pool_credential(2);
        store.insert_credential(&c1).await.unwrap();
        store.insert_credential(&c2).await.unwrap();

        let mut o = Order::create(p.id, v.id, "Shared", 990, "a@b.c", "A").unwrap();
        o.confirm_payment("pay_1").unwrap();
        store.insert_order(&o).await.unwrap();

        assert!(store.try_reserve(o.id(), c1.id).await.unwrap());
        // Second reservation for the same order must not consume capacity.
        assert!(!store.try_reserve(o.id(), c2.id).await.unwrap());
        assert_eq!(store.credential(c2.id).await.unwrap().unwrap().current_uses, 0);
    }

    #[tokio::test]
    async fn test_delete_credential_conflicts_when_referenced() {
        let store = MemoryStore::new();
        let p = product();
        let v = p.variations[0].clone();
        store.insert_product(&p).await.unwrap();
        let c = pool_credential(1);
        store.insert_credential(&c).await.unwrap();

        let mut o = Order::create(p.id, v.id, "Shared", 990, "a@b.c", "A").unwrap();
        o.confirm_payment("pay_1").unwrap();
        store.insert_order(&o).await.unwrap();
        assert!(store.try_reserve(o.id(), c.id).await.unwrap());

        assert!(matches!(
            store.delete_credential(c.id).await.unwrap_err(),
            Error::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_product_unlinks_orders_and_credentials() {
        let store = MemoryStore::new();
        let p = product();
        let v = p.variations[0].clone();
        store.insert_product(&p).await.unwrap();
        let mut c = pool_credential(1);
        c.product_id = Some(p.id);
        c.variation_id = Some(v.id);
        store.insert_credential(&c).await.unwrap();

        let mut o = Order::create(p.id, v.id, "Shared", 990, "a@b.c", "A").unwrap();
        o.confirm_payment("pay_1").unwrap();
        store.insert_order(&o).await.unwrap();
        assert!(store.try_reserve(o.id(), c.id).await.unwrap());

        store.delete_product(p.id).await.unwrap();
        let o = store.order(o.id()).await.unwrap().unwrap();
        assert_eq!(o.status(), crate::domain::aggregates::OrderStatus::Delivered);
        assert_eq!(o.credential_id(), None);
        let c = store.credential(c.id).await.unwrap().unwrap();
        assert_eq!(c.variation_id, None);
        assert_eq!(c.product_id, None);
    }
}
