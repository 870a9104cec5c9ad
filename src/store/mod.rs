//! Durable inventory storage.
//!
//! Concurrency safety lives here, not in process memory: several service
//! instances may run at once, so the capacity increment and the order binding
//! are a single atomic store operation ([`InventoryStore::try_reserve`]).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{Credential, Order, Product, Variation};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgInventoryStore;

#[async_trait]
pub trait InventoryStore: Send + Sync {
    // credentials ----------------------------------------------------------

    async fn insert_credential(&self, credential: &Credential) -> Result<()>;

    async fn credential(&self, id: Uuid) -> Result<Option<Credential>>;

    /// Credentials eligible for a variation, `created_at` ascending (FIFO).
    ///
    /// Directly-earmarked credentials take precedence: when any exist, the
    /// pool bucket is not consulted, for either stock or allocation. With
    /// `only_available`, exhausted credentials are filtered out.
    async fn credentials_for(
        &self,
        variation: &Variation,
        only_available: bool,
    ) -> Result<Vec<Credential>>;

    /// Rejected with a conflict while any delivered order still references
    /// the credential.
    async fn delete_credential(&self, id: Uuid) -> Result<()>;

    /// Atomically consume one unit of the credential's capacity and move the
    /// order to `delivered` with the credential bound.
    ///
    /// Returns `false` without side effects when either side lost the race:
    /// the credential is exhausted, or the order is no longer an unbound
    /// `paid` order.
    async fn try_reserve(&self, order_id: Uuid, credential_id: Uuid) -> Result<bool>;

    // products -------------------------------------------------------------

    async fn insert_product(&self, product: &Product) -> Result<()>;

    async fn product(&self, id: Uuid) -> Result<Option<Product>>;

    async fn products(&self, only_active: bool) -> Result<Vec<Product>>;

    /// Persist the product and its current variation set (upserting and
    /// deleting variations as needed).
    async fn update_product(&self, product: &Product) -> Result<()>;

    /// Delete a product, force-unlinking: earmarked credentials lose their
    /// earmark, delivered orders keep their snapshot but drop the credential
    /// reference.
    async fn delete_product(&self, id: Uuid) -> Result<()>;

    async fn variation(&self, id: Uuid) -> Result<Option<Variation>>;

    // orders ---------------------------------------------------------------

    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn order_by_payment(&self, payment_id: &str) -> Result<Option<Order>>;

    async fn orders(&self) -> Result<Vec<Order>>;

    /// Conditional `pending -> paid`; `false` when the order was not pending.
    async fn mark_paid(&self, order_id: Uuid, payment_id: &str) -> Result<bool>;

    /// Conditional `pending -> cancelled`; `false` when not pending.
    async fn mark_cancelled(&self, order_id: Uuid) -> Result<bool>;

    /// Pending orders created before the cutoff, for timeout cancellation.
    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
}
