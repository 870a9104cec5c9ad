//! Stock projection.
//!
//! A variation's stock is the sum of remaining capacity across its eligible
//! credentials, computed fresh on every read. It is never persisted; a
//! stored stock column drifts from the usage counters.

use crate::domain::aggregates::Variation;
use crate::store::InventoryStore;
use crate::Result;

/// Remaining allocatable units for a variation. 0 when nothing is eligible.
pub async fn stock_for(store: &dyn InventoryStore, variation: &Variation) -> Result<u32> {
    let credentials = store.credentials_for(variation, false).await?;
    Ok(credentials.iter().map(|c| c.remaining()).sum())
}
