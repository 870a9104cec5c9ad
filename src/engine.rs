//! Credential allocation engine.
//!
//! The single authority allowed to consume credential capacity and bind an
//! order to a credential. Selection is oldest-created-first so long-idle
//! stock is consumed before newly added stock and dying accounts surface
//! sooner.
//!
//! Exactly-once discipline: the capacity increment and the order binding are
//! one atomic store operation. Duplicate webhook deliveries for an already
//! delivered order return the existing binding without consuming capacity.
//! A paid order that finds no stock stays `paid` as a backlog signal.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, Variation};
use crate::notify::{CredentialAssigned, Notifier, StockAlert};
use crate::store::InventoryStore;
use crate::{Error, Result};

/// Bounded retry on optimistic-update contention before degrading to
/// [`AllocationOutcome::NoCredentialAvailable`].
pub const MAX_ALLOCATION_ATTEMPTS: usize = 4;

#[derive(Clone, Debug)]
pub enum AllocationOutcome {
    /// A unit was consumed and the order delivered.
    Delivered(CredentialAssigned),
    /// The order already had a credential; nothing was consumed.
    AlreadyDelivered(CredentialAssigned),
    /// Payment succeeded but no eligible credential has capacity left.
    /// The order remains `paid` and an operator alert was raised.
    NoCredentialAvailable,
}

#[derive(Clone)]
pub struct AllocationEngine {
    store: Arc<dyn InventoryStore>,
    notifier: Arc<dyn Notifier>,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn InventoryStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Allocate one credential unit to a paid order.
    ///
    /// Preconditions: the order exists and is `paid` (or already delivered,
    /// which short-circuits idempotently). Pending or cancelled orders are a
    /// conflict; payment confirmation comes first.
    pub async fn allocate(&self, order_id: Uuid) -> Result<AllocationOutcome> {
        for attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let order = self
                .store
                .order(order_id)
                .await?
                .ok_or(Error::NotFound("order"))?;

            if let Some(credential_id) = order.credential_id() {
                let assigned = self.assignment(&order, credential_id).await?;
                return Ok(AllocationOutcome::AlreadyDelivered(assigned));
            }
            if order.status() != OrderStatus::Paid {
                return Err(Error::Conflict(format!(
                    "cannot allocate for an order in status '{}'",
                    order.status().as_str()
                )));
            }

            let variation = self
                .store
                .variation(order.variation_id())
                .await?
                .ok_or(Error::NotFound("variation"))?;
            let candidates = self.store.credentials_for(&variation, true).await?;
            let Some(candidate) = candidates.into_iter().next() else {
                return self.out_of_stock(&order, &variation).await;
            };

            if self.store.try_reserve(order.id(), candidate.id).await? {
                let assigned = self.assignment_with(&order, &variation, &candidate.payload).await?;
                tracing::info!(
                    order_id = %order.id(),
                    credential_id = %candidate.id,
                    attempt,
                    "credential allocated"
                );
                // Transaction is committed; notifier I/O happens outside any lock.
                if let Err(e) = self.notifier.credential_assigned(&assigned).await {
                    tracing::warn!(order_id = %order.id(), error = %e, "assignment notification failed");
                }
                return Ok(AllocationOutcome::Delivered(assigned));
            }

            // Lost the race on this credential or on the order itself;
            // re-read and re-select.
            tracing::debug!(order_id = %order_id, attempt, "allocation contention, retrying");
        }

        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        if let Some(credential_id) = order.credential_id() {
            let assigned = self.assignment(&order, credential_id).await?;
            return Ok(AllocationOutcome::AlreadyDelivered(assigned));
        }
        let variation = self
            .store
            .variation(order.variation_id())
            .await?
            .ok_or(Error::NotFound("variation"))?;
        self.out_of_stock(&order, &variation).await
    }

    /// Re-emit the assigned-credential notification for a delivered order.
    /// No allocation happens here.
    pub async fn resend(&self, order_id: Uuid) -> Result<CredentialAssigned> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        let Some(credential_id) = order.credential_id() else {
            return Err(Error::Conflict("order has no credential bound".into()));
        };
        let assigned = self.assignment(&order, credential_id).await?;
        self.notifier.credential_assigned(&assigned).await?;
        Ok(assigned)
    }

    async fn out_of_stock(
        &self,
        order: &Order,
        variation: &Variation,
    ) -> Result<AllocationOutcome> {
        let alert = StockAlert {
            order_id: order.id(),
            variation_id: variation.id,
            variation_name: variation.name.clone(),
        };
        tracing::warn!(order_id = %order.id(), variation = %variation.name, "no credential available");
        if let Err(e) = self.notifier.stock_depleted(&alert).await {
            tracing::warn!(order_id = %order.id(), error = %e, "stock alert failed");
        }
        Ok(AllocationOutcome::NoCredentialAvailable)
    }

    async fn assignment(&self, order: &Order, credential_id: Uuid) -> Result<CredentialAssigned> {
        let credential = self
            .store
            .credential(credential_id)
            .await?
            .ok_or(Error::NotFound("credential"))?;
        let product = self
            .store
            .product(order.product_id())
            .await?
            .ok_or(Error::NotFound("product"))?;
        Ok(CredentialAssigned {
            order_id: order.id(),
            customer_email: order.customer_email().to_string(),
            customer_name: order.customer_name().to_string(),
            product_name: product.name,
            variation_name: order.variation_name().to_string(),
            credential: credential.payload,
        })
    }

    async fn assignment_with(
        &self,
        order: &Order,
        variation: &Variation,
        payload: &crate::domain::value_objects::CredentialPayload,
    ) -> Result<CredentialAssigned> {
        let product = self
            .store
            .product(variation.product_id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        Ok(CredentialAssigned {
            order_id: order.id(),
            customer_email: order.customer_email().to_string(),
            customer_name: order.customer_name().to_string(),
            product_name: product.name,
            variation_name: order.variation_name().to_string(),
            credential: payload.clone(),
        })
    }
}
