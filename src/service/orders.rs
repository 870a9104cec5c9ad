//! Order service: checkout, payment confirmation, cancellation, resend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Order, OrderStatus};
use crate::engine::{AllocationEngine, AllocationOutcome};
use crate::notify::{CredentialAssigned, Notifier};
use crate::stock;
use crate::store::InventoryStore;
use crate::{Error, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub variation_id: Uuid,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
}

/// Payment confirmation event from the payment collaborator. Carries the
/// order id, the provider's payment id, or both.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    pub order_id: Option<Uuid>,
    pub payment_id: Option<String>,
}

/// Admin-side manual payment confirmation.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_id: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn InventoryStore>,
    engine: AllocationEngine,
    notifier: Arc<dyn Notifier>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        engine: AllocationEngine,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { store, engine, notifier }
    }

    /// Create a `pending` order, snapshotting price and variation name.
    ///
    /// Stock is checked but not reserved: allocation happens at payment
    /// time, so a race between checkout and depletion is tolerated and ends
    /// in [`AllocationOutcome::NoCredentialAvailable`] rather than oversell.
    pub async fn checkout(&self, req: CheckoutRequest) -> Result<Order> {
        req.validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        let variation = self
            .store
            .variation(req.variation_id)
            .await?
            .ok_or(Error::NotFound("variation"))?;
        let product = self
            .store
            .product(variation.product_id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        if !product.is_active {
            return Err(Error::Conflict("product is not available".into()));
        }
        if stock::stock_for(self.store.as_ref(), &variation).await? == 0 {
            return Err(Error::Conflict("variation is out of stock".into()));
        }

        let mut order = Order::create(
            product.id,
            variation.id,
            variation.name.clone(),
            variation.price,
            req.customer_email,
            req.customer_name,
        )?;
        self.store.insert_order(&order).await?;
        tracing::info!(order_id = %order.id(), variation = %variation.name, "order created");
        self.publish_events(&mut order).await;
        Ok(order)
    }

    /// Webhook entry point: confirm payment, then allocate.
    ///
    /// Duplicate deliveries are success: an already paid order just retries
    /// allocation, an already delivered order returns its existing binding.
    /// A cancelled order rejects the event.
    pub async fn handle_payment_confirmed(&self, event: PaymentEvent) -> Result<AllocationOutcome> {
        let order = self.resolve(&event).await?;
        let payment_id = event
            .payment_id
            .unwrap_or_else(|| format!("order:{}", order.id()));

        match order.status() {
            OrderStatus::Pending => {
                if !self.store.mark_paid(order.id(), &payment_id).await? {
                    // Lost a race with a concurrent webhook delivery; the
                    // allocation below observes whatever state won.
                    tracing::debug!(order_id = %order.id(), "payment confirmation raced");
                }
                tracing::info!(order_id = %order.id(), payment_id = %payment_id, "payment confirmed");
            }
            OrderStatus::Paid | OrderStatus::Delivered => {
                tracing::debug!(order_id = %order.id(), "duplicate payment confirmation");
            }
            OrderStatus::Cancelled => {
                return Err(Error::Conflict("order is cancelled".into()));
            }
        }
        self.engine.allocate(order.id()).await
    }

    /// Explicit `pending -> paid` transition (admin action); idempotent for
    /// repeated calls on a paid order.
    pub async fn confirm_payment(&self, order_id: Uuid, payment_id: &str) -> Result<Order> {
        let mut order = self
            .store
            .order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        order.confirm_payment(payment_id)?;
        self.store.mark_paid(order_id, payment_id).await?;
        self.publish_events(&mut order).await;
        self.store
            .order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))
    }

    /// Only valid from `pending`.
    pub async fn cancel(&self, order_id: Uuid) -> Result<()> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        if order.status() == OrderStatus::Cancelled {
            return Ok(());
        }
        if !self.store.mark_cancelled(order_id).await? {
            return Err(Error::Conflict(format!(
                "cannot cancel an order in status '{}'",
                order.status().as_str()
            )));
        }
        tracing::info!(order_id = %order_id, "order cancelled");
        Ok(())
    }

    /// Sweep pending orders older than the TTL to `cancelled`.
    pub async fn cancel_stale(&self, ttl_minutes: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::minutes(ttl_minutes);
        let stale = self.store.stale_pending_orders(cutoff).await?;
        let mut cancelled = 0usize;
        for order in stale {
            if self.store.mark_cancelled(order.id()).await? {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "stale pending orders swept");
        }
        Ok(cancelled)
    }

    pub async fn resend(&self, order_id: Uuid) -> Result<CredentialAssigned> {
        self.engine.resend(order_id).await
    }

    pub async fn order(&self, id: Uuid) -> Result<Order> {
        self.store.order(id).await?.ok_or(Error::NotFound("order"))
    }

    pub async fn orders(&self) -> Result<Vec<Order>> {
        self.store.orders().await
    }

    async fn resolve(&self, event: &PaymentEvent) -> Result<Order> {
        if let Some(id) = event.order_id {
            return self.store.order(id).await?.ok_or(Error::NotFound("order"));
        }
        if let Some(payment_id) = &event.payment_id {
            // A payment id is only attached at the first confirmation, so an
            // event carrying nothing else cannot resolve a first-time
            // confirmation; providers must send the order id at least once.
            return self
                .store
                .order_by_payment(payment_id)
                .await?
                .ok_or(Error::NotFound("order for payment id"));
        }
        Err(Error::Validation(
            "payment event carries neither order_id nor payment_id".into(),
        ))
    }

    async fn publish_events(&self, order: &mut Order) {
        for event in order.take_events() {
            if let Err(e) = self.notifier.domain_event(&event).await {
                tracing::debug!(error = %e, "domain event publish failed");
            }
        }
    }
}
