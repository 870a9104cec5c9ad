//! Catalog service: products, variations, and the storefront read model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{NewVariation, Product, Variation};
use crate::stock;
use crate::store::InventoryStore;
use crate::{Error, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub duration: Option<String>,
    #[validate(length(min = 1, message = "product requires at least one variation"))]
    pub variations: Vec<VariationRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VariationRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub original_price: Option<i64>,
    pub duration: Option<String>,
    pub credential_group: Option<String>,
    pub credential_subgroup: Option<String>,
    pub max_uses_per_credential: Option<u32>,
}

impl From<VariationRequest> for NewVariation {
    fn from(r: VariationRequest) -> Self {
        Self {
            name: r.name,
            description: r.description,
            price: r.price,
            original_price: r.original_price,
            duration: r.duration,
            credential_group: r.credential_group,
            credential_subgroup: r.credential_subgroup,
            max_uses_per_credential: r.max_uses_per_credential,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub duration: Option<String>,
    pub is_active: bool,
}

/// A variation annotated with live stock, for the storefront.
#[derive(Debug, Serialize)]
pub struct VariationView {
    #[serde(flatten)]
    pub variation: Variation,
    pub stock: u32,
}

#[derive(Debug, Serialize)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub duration: Option<String>,
    pub is_active: bool,
    pub variations: Vec<VariationView>,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn InventoryStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    pub async fn create_product(&self, req: CreateProductRequest) -> Result<Product> {
        req.validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        let product = Product::create(
            req.name,
            req.description,
            req.category,
            req.duration,
            req.variations.into_iter().map(Into::into).collect(),
        )?;
        self.store.insert_product(&product).await?;
        tracing::info!(product_id = %product.id, name = %product.name, "product created");
        Ok(product)
    }

    pub async fn update_product(&self, id: Uuid, req: UpdateProductRequest) -> Result<Product> {
        req.validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        let mut product = self
            .store
            .product(id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        product.name = req.name.trim().to_string();
        product.description = req.description;
        product.category = req.category;
        product.duration = req.duration;
        product.is_active = req.is_active;
        product.updated_at = chrono::Utc::now();
        self.store.update_product(&product).await?;
        Ok(product)
    }

    pub async fn delete_product(&self, id: Uuid) -> Result<()> {
        self.store.delete_product(id).await?;
        tracing::info!(product_id = %id, "product deleted, references unlinked");
        Ok(())
    }

    pub async fn add_variation(&self, product_id: Uuid, req: VariationRequest) -> Result<Variation> {
        let mut product = self
            .store
            .product(product_id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        let variation = product.add_variation(req.into())?.clone();
        self.store.update_product(&product).await?;
        Ok(variation)
    }

    /// Rejected with a conflict when it would leave the product without
    /// variations.
    pub async fn delete_variation(&self, product_id: Uuid, variation_id: Uuid) -> Result<()> {
        let mut product = self
            .store
            .product(product_id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        product.remove_variation(variation_id)?;
        self.store.update_product(&product).await?;
        Ok(())
    }

    pub async fn product_view(&self, id: Uuid) -> Result<ProductView> {
        let product = self
            .store
            .product(id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        self.annotate(product).await
    }

    /// Active products with live stock per variation. Stock is recomputed on
    /// every call; it is never cached.
    pub async fn storefront(&self) -> Result<Vec<ProductView>> {
        let products = self.store.products(true).await?;
        let mut views = Vec::with_capacity(products.len());
        for product in products {
            views.push(self.annotate(product).await?);
        }
        Ok(views)
    }

    pub async fn all_products(&self) -> Result<Vec<ProductView>> {
        let products = self.store.products(false).await?;
        let mut views = Vec::with_capacity(products.len());
        for product in products {
            views.push(self.annotate(product).await?);
        }
        Ok(views)
    }

    async fn annotate(&self, product: Product) -> Result<ProductView> {
        let mut variations = Vec::with_capacity(product.variations.len());
        for variation in product.variations {
            let stock = stock::stock_for(self.store.as_ref(), &variation).await?;
            variations.push(VariationView { variation, stock });
        }
        Ok(ProductView {
            id: product.id,
            name: product.name,
            description: product.description,
            image_url: product.image_url,
            category: product.category,
            duration: product.duration,
            is_active: product.is_active,
            variations,
        })
    }
}
