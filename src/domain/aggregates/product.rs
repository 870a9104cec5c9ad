//! Product Aggregate
//!
//! A product owns one or more purchasable variations. The storefront never
//! shows an inactive product; a product without variations cannot exist.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::GroupKey;
use crate::{Error, Result};

#[derive(Clone, Debug, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    /// Default duration label, e.g. "30 days".
    pub duration: Option<String>,
    pub is_active: bool,
    pub variations: Vec<Variation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a variation draws its credentials from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Credentials carry this variation's id directly.
    Direct,
    /// Pool matching on a `(group, subgroup)` bucket.
    Pool { group: GroupKey },
}

#[derive(Clone, Debug, Serialize)]
pub struct Variation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Price in minor currency units.
    pub price: i64,
    /// Pre-discount price, shown struck through when present.
    pub original_price: Option<i64>,
    pub duration: Option<String>,
    pub source: CredentialSource,
    /// Default `max_uses` applied to credentials imported for this variation.
    pub max_uses_per_credential: u32,
}

/// Variation input for product create/update.
#[derive(Clone, Debug)]
pub struct NewVariation {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub original_price: Option<i64>,
    pub duration: Option<String>,
    pub credential_group: Option<String>,
    pub credential_subgroup: Option<String>,
    pub max_uses_per_credential: Option<u32>,
}

impl Variation {
    fn from_new(product_id: Uuid, v: NewVariation) -> Result<Self> {
        if v.name.trim().is_empty() {
            return Err(Error::Validation("variation name must not be empty".into()));
        }
        if v.price < 0 {
            return Err(Error::Validation("variation price must not be negative".into()));
        }
        let source = match v.credential_group {
            Some(group) => CredentialSource::Pool {
                group: GroupKey::new(group, v.credential_subgroup)?,
            },
            None => CredentialSource::Direct,
        };
        let max_uses = v.max_uses_per_credential.unwrap_or(1);
        if max_uses == 0 {
            return Err(Error::Validation(
                "max_uses_per_credential must be at least 1".into(),
            ));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            product_id,
            name: v.name.trim().to_string(),
            description: v.description,
            price: v.price,
            original_price: v.original_price,
            duration: v.duration,
            source,
            max_uses_per_credential: max_uses,
        })
    }
}

impl Product {
    /// Create a product with its initial variations. A product must carry at
    /// least one variation at all times.
    pub fn create(
        name: impl Into<String>,
        description: Option<String>,
        category: Option<String>,
        duration: Option<String>,
        variations: Vec<NewVariation>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("product name must not be empty".into()));
        }
        if variations.is_empty() {
            return Err(Error::Validation(
                "product requires at least one variation".into(),
            ));
        }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let variations = variations
            .into_iter()
            .map(|v| Variation::from_new(id, v))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id,
            name,
            description,
            image_url: None,
            category,
            duration,
            is_active: true,
            variations,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn add_variation(&mut self, v: NewVariation) -> Result<&Variation> {
        let variation = Variation::from_new(self.id, v)?;
        self.variations.push(variation);
        self.touch();
        Ok(self.variations.last().unwrap_or_else(|| unreachable!()))
    }

    /// Removing the last remaining variation is rejected.
    pub fn remove_variation(&mut self, variation_id: Uuid) -> Result<()> {
        if !self.variations.iter().any(|v| v.id == variation_id) {
            return Err(Error::NotFound("variation"));
        }
        if self.variations.len() == 1 {
            return Err(Error::Conflict(
                "cannot delete the last variation of a product".into(),
            ));
        }
        self.variations.retain(|v| v.id != variation_id);
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_plan() -> NewVariation {
        NewVariation {
            name: "Shared".into(),
            description: None,
            price: 990,
            original_price: Some(1490),
            duration: Some("30 days".into()),
            credential_group: Some("netflix".into()),
            credential_subgroup: Some("shared".into()),
            max_uses_per_credential: Some(4),
        }
    }

    #[test]
    fn test_product_requires_a_variation() {
        let err = Product::create("Netflix", None, None, None, vec![]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_last_variation_cannot_be_removed() {
        let mut p = Product::create("Netflix", None, None, None, vec![shared_plan()]).unwrap();
        let vid = p.variations[0].id;
        let err = p.remove_variation(vid).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        p.add_variation(NewVariation { name: "Solo".into(), credential_group: None, ..shared_plan() })
            .unwrap();
        p.remove_variation(vid).unwrap();
        assert_eq!(p.variations.len(), 1);
    }

    #[test]
    fn test_variation_source() {
        let p = Product::create("Netflix", None, None, None, vec![shared_plan()]).unwrap();
        match &p.variations[0].source {
            CredentialSource::Pool { group } => assert_eq!(group.to_string(), "netflix/shared"),
            CredentialSource::Direct => panic!("expected pool source"),
        }
    }
}
