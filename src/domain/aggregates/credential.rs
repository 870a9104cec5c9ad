//! Credential Aggregate
//!
//! A reusable login or access link with finite reuse capacity. The usage
//! counter is only ever incremented by the allocation engine, through the
//! store's atomic reserve operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::{CredentialPayload, GroupKey};
use crate::{Error, Result};

#[derive(Clone, Debug, Serialize)]
pub struct Credential {
    pub id: Uuid,
    pub payload: CredentialPayload,
    pub group: GroupKey,
    /// How many orders may share this credential. Always >= 1.
    pub max_uses: u32,
    /// Units already consumed. Invariant: `0 <= current_uses <= max_uses`.
    pub current_uses: u32,
    /// When set, the credential is earmarked for exactly this product/variation
    /// and is never served through group matching.
    pub product_id: Option<Uuid>,
    pub variation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        payload: CredentialPayload,
        group: GroupKey,
        max_uses: u32,
        product_id: Option<Uuid>,
        variation_id: Option<Uuid>,
    ) -> Result<Self> {
        if max_uses == 0 {
            return Err(Error::Validation("max_uses must be at least 1".into()));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            payload,
            group,
            max_uses,
            current_uses: 0,
            product_id,
            variation_id,
            created_at: Utc::now(),
        })
    }

    pub fn remaining(&self) -> u32 {
        self.max_uses.saturating_sub(self.current_uses)
    }

    pub fn is_available(&self) -> bool {
        self.current_uses < self.max_uses
    }
}
