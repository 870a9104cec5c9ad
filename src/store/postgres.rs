//! PostgreSQL inventory store.
//!
//! All state transitions that matter under concurrency are conditional
//! updates checked through affected-row counts, inside one transaction where
//! two rows are involved. No lock is held outside a single request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{
    Credential, CredentialSource, Order, OrderSnapshot, OrderStatus, Product, Variation,
};
use crate::domain::value_objects::{CredentialPayload, GroupKey};
use crate::store::InventoryStore;
use crate::{Error, Result};

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("migration failed: {e}")))?;
        Ok(())
    }

    async fn variations_of(&self, product_id: Uuid) -> Result<Vec<Variation>> {
        let rows = sqlx::query_as::<_, VariationRow>(
            "SELECT * FROM product_variations WHERE product_id = $1 ORDER BY name",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Variation::try_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    group_name: String,
    subgroup: Option<String>,
    email: Option<String>,
    password: Option<String>,
    link: Option<String>,
    max_uses: i32,
    current_uses: i32,
    product_id: Option<Uuid>,
    variation_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = Error;

    fn try_from(r: CredentialRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            payload: CredentialPayload::from_columns(r.email, r.password, r.link)?,
            group: GroupKey::new(r.group_name, r.subgroup)?,
            max_uses: u32::try_from(r.max_uses)
                .map_err(|_| Error::Storage("negative max_uses".into()))?,
            current_uses: u32::try_from(r.current_uses)
                .map_err(|_| Error::Storage("negative current_uses".into()))?,
            product_id: r.product_id,
            variation_id: r.variation_id,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    image_url: Option<String>,
    category: Option<String>,
    duration: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_product(self, variations: Vec<Variation>) -> Product {
        Product {
            id: self.id,
            name: self.name,
            description: self.description,
            image_url: self.image_url,
            category: self.category,
            duration: self.duration,
            is_active: self.is_active,
            variations,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VariationRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    price: i64,
    original_price: Option<i64>,
    duration: Option<String>,
    credential_group: Option<String>,
    credential_subgroup: Option<String>,
    max_uses_per_credential: i32,
}

impl TryFrom<VariationRow> for Variation {
    type Error = Error;

    fn try_from(r: VariationRow) -> Result<Self> {
        let source = match r.credential_group {
            Some(group) => CredentialSource::Pool {
                group: GroupKey::new(group, r.credential_subgroup)?,
            },
            None => CredentialSource::Direct,
        };
        Ok(Self {
            id: r.id,
            product_id: r.product_id,
            name: r.name,
            description: r.description,
            price: r.price,
            original_price: r.original_price,
            duration: r.duration,
            source,
            max_uses_per_credential: u32::try_from(r.max_uses_per_credential)
                .map_err(|_| Error::Storage("negative max_uses_per_credential".into()))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    product_id: Uuid,
    variation_id: Uuid,
    variation_name: String,
    total: i64,
    customer_email: String,
    customer_name: String,
    status: String,
    payment_id: Option<String>,
    credential_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = Error;

    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order::hydrate(OrderSnapshot {
            id: r.id,
            order_number: r.order_number,
            product_id: r.product_id,
            variation_id: r.variation_id,
            variation_name: r.variation_name,
            total: r.total,
            customer_email: r.customer_email,
            customer_name: r.customer_name,
            status: OrderStatus::parse(&r.status)?,
            payment_id: r.payment_id,
            credential_id: r.credential_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }))
    }
}

fn variation_pool_columns(v: &Variation) -> (Option<&str>, Option<&str>) {
    match &v.source {
        CredentialSource::Pool { group } => (Some(group.group()), group.subgroup()),
        CredentialSource::Direct => (None, None),
    }
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<()> {
        let (email, password, link) = credential.payload.to_columns();
        sqlx::query(
            "INSERT INTO credentials \
             (id, group_name, subgroup, email, password, link, max_uses, current_uses, product_id, variation_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(credential.id)
        .bind(credential.group.group())
        .bind(credential.group.subgroup())
        .bind(email)
        .bind(password)
        .bind(link)
        .bind(credential.max_uses as i32)
        .bind(credential.current_uses as i32)
        .bind(credential.product_id)
        .bind(credential.variation_id)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn credential(&self, id: Uuid) -> Result<Option<Credential>> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Credential::try_from).transpose()
    }

    async fn credentials_for(
        &self,
        variation: &Variation,
        only_available: bool,
    ) -> Result<Vec<Credential>> {
        let direct = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE variation_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(variation.id)
        .fetch_all(&self.pool)
        .await?;

        let rows = if direct.is_empty() {
            let (group, subgroup) = variation_pool_columns(variation);
            match group {
                Some(group) => {
                    sqlx::query_as::<_, CredentialRow>(
                        "SELECT * FROM credentials \
                         WHERE variation_id IS NULL AND group_name = $1 \
                           AND subgroup IS NOT DISTINCT FROM $2 \
                         ORDER BY created_at ASC, id ASC",
                    )
                    .bind(group)
                    .bind(subgroup)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => vec![],
            }
        } else {
            direct
        };

        let credentials = rows
            .into_iter()
            .map(Credential::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(credentials
            .into_iter()
            .filter(|c| !only_available || c.is_available())
            .collect())
    }

    async fn delete_credential(&self, id: Uuid) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM credentials WHERE id = $1 \
             AND NOT EXISTS (SELECT 1 FROM orders WHERE credential_id = $1 AND status = 'delivered')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if deleted.rows_affected() == 1 {
            return Ok(());
        }
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM credentials WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Err(Error::Conflict(
                "credential is still assigned to a delivered order".into(),
            )),
            None => Err(Error::NotFound("credential")),
        }
    }

    async fn try_reserve(&self, order_id: Uuid, credential_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Credential row first, order row second; the conditional update
        // doubles as the row lock, so two orders racing for the last unit
        // serialize here and the loser sees zero affected rows.
        let reserved = sqlx::query(
            "UPDATE credentials SET current_uses = current_uses + 1 \
             WHERE id = $1 AND current_uses < max_uses",
        )
        .bind(credential_id)
        .execute(&mut *tx)
        .await?;
        if reserved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let bound = sqlx::query(
            "UPDATE orders SET status = 'delivered', credential_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'paid' AND credential_id IS NULL",
        )
        .bind(order_id)
        .bind(credential_id)
        .execute(&mut *tx)
        .await?;
        if bound.rows_affected() == 0 {
            // Duplicate delivery attempt or a cancelled order: undo the
            // capacity increment by rolling the transaction back.
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO products \
             (id, name, description, image_url, category, duration, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.image_url)
        .bind(&product.category)
        .bind(&product.duration)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await?;
        for v in &product.variations {
            let (group, subgroup) = variation_pool_columns(v);
            sqlx::query(
                "INSERT INTO product_variations \
                 (id, product_id, name, description, price, original_price, duration, \
                  credential_group, credential_subgroup, max_uses_per_credential) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(v.id)
            .bind(v.product_id)
            .bind(&v.name)
            .bind(&v.description)
            .bind(v.price)
            .bind(v.original_price)
            .bind(&v.duration)
            .bind(group)
            .bind(subgroup)
            .bind(v.max_uses_per_credential as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let variations = self.variations_of(id).await?;
                Ok(Some(row.into_product(variations)))
            }
            None => Ok(None),
        }
    }

    async fn products(&self, only_active: bool) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE is_active OR NOT $1 ORDER BY created_at ASC",
        )
        .bind(only_active)
        .fetch_all(&self.pool)
        .await?;
        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let variations = self.variations_of(row.id).await?;
            products.push(row.into_product(variations));
        }
        Ok(products)
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE products SET name = $2, description = $3, image_url = $4, category = $5, \
             duration = $6, is_active = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.image_url)
        .bind(&product.category)
        .bind(&product.duration)
        .bind(product.is_active)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound("product"));
        }

        let kept: Vec<Uuid> = product.variations.iter().map(|v| v.id).collect();
        sqlx::query(
            "DELETE FROM product_variations WHERE product_id = $1 AND NOT (id = ANY($2))",
        )
        .bind(product.id)
        .bind(&kept)
        .execute(&mut *tx)
        .await?;
        for v in &product.variations {
            let (group, subgroup) = variation_pool_columns(v);
            sqlx::query(
                "INSERT INTO product_variations \
                 (id, product_id, name, description, price, original_price, duration, \
                  credential_group, credential_subgroup, max_uses_per_credential) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (id) DO UPDATE SET \
                   name = EXCLUDED.name, description = EXCLUDED.description, \
                   price = EXCLUDED.price, original_price = EXCLUDED.original_price, \
                   duration = EXCLUDED.duration, credential_group = EXCLUDED.credential_group, \
                   credential_subgroup = EXCLUDED.credential_subgroup, \
                   max_uses_per_credential = EXCLUDED.max_uses_per_credential",
            )
            .bind(v.id)
            .bind(v.product_id)
            .bind(&v.name)
            .bind(&v.description)
            .bind(v.price)
            .bind(v.original_price)
            .bind(&v.duration)
            .bind(group)
            .bind(subgroup)
            .bind(v.max_uses_per_credential as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE credentials SET product_id = NULL, variation_id = NULL \
             WHERE product_id = $1 \
                OR variation_id IN (SELECT id FROM product_variations WHERE product_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE orders SET credential_id = NULL, updated_at = NOW() \
             WHERE product_id = $1 AND credential_id IS NOT NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM product_variations WHERE product_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound("product"));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn variation(&self, id: Uuid) -> Result<Option<Variation>> {
        let row = sqlx::query_as::<_, VariationRow>(
            "SELECT * FROM product_variations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Variation::try_from).transpose()
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let s = order.snapshot();
        sqlx::query(
            "INSERT INTO orders \
             (id, order_number, product_id, variation_id, variation_name, total, \
              customer_email, customer_name, status, payment_id, credential_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(s.id)
        .bind(&s.order_number)
        .bind(s.product_id)
        .bind(s.variation_id)
        .bind(&s.variation_name)
        .bind(s.total)
        .bind(&s.customer_email)
        .bind(&s.customer_name)
        .bind(s.status.as_str())
        .bind(&s.payment_id)
        .bind(s.credential_id)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn order_by_payment(&self, payment_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE payment_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn mark_paid(&self, order_id: Uuid, payment_id: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE orders SET status = 'paid', payment_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn mark_cancelled(&self, order_id: Uuid) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE orders SET status = 'cancelled', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }
}
