//! Inventory service: credential CRUD and bulk import.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::Credential;
use crate::domain::events::{CredentialEvent, DomainEvent};
use crate::domain::value_objects::{CredentialPayload, GroupKey};
use crate::import;
use crate::notify::Notifier;
use crate::store::InventoryStore;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct CreateCredentialRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub link: Option<String>,
    pub group: String,
    pub subgroup: Option<String>,
    pub max_uses: Option<u32>,
    pub product_id: Option<Uuid>,
    pub variation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// One credential per line, `identifier<sep>secret`.
    pub lines: String,
    pub group: String,
    pub subgroup: Option<String>,
    /// Earmark imported credentials for this variation and default their
    /// `max_uses` from its policy.
    pub variation_id: Option<Uuid>,
    pub max_uses: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
    notifier: Arc<dyn Notifier>,
}

impl InventoryService {
    pub fn new(store: Arc<dyn InventoryStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn add_credential(&self, req: CreateCredentialRequest) -> Result<Credential> {
        let payload = CredentialPayload::from_columns(req.email, req.password, req.link)?;
        let group = GroupKey::new(req.group, req.subgroup)?;
        let credential = Credential::new(
            payload,
            group,
            req.max_uses.unwrap_or(1),
            req.product_id,
            req.variation_id,
        )?;
        self.store.insert_credential(&credential).await?;
        self.emit(CredentialEvent::Created {
            credential_id: credential.id,
            group: credential.group.to_string(),
        })
        .await;
        Ok(credential)
    }

    /// Bulk import. Malformed lines are skipped, never fatal; the whole
    /// batch succeeds with a summary of what was taken.
    pub async fn import(&self, req: ImportRequest) -> Result<ImportSummary> {
        let group = GroupKey::new(req.group, req.subgroup)?;

        // When the import targets a variation, its policy provides the
        // default capacity and the product earmark.
        let (product_id, default_max_uses) = match req.variation_id {
            Some(variation_id) => {
                let variation = self
                    .store
                    .variation(variation_id)
                    .await?
                    .ok_or(Error::NotFound("variation"))?;
                (Some(variation.product_id), variation.max_uses_per_credential)
            }
            None => (None, 1),
        };
        let max_uses = req.max_uses.unwrap_or(default_max_uses);

        let parsed = import::parse_bulk(&req.lines);
        let mut created = 0usize;
        for record in parsed.records {
            let payload = CredentialPayload::email_password(record.identifier, record.secret)?;
            let credential = Credential::new(
                payload,
                group.clone(),
                max_uses,
                product_id,
                req.variation_id,
            )?;
            self.store.insert_credential(&credential).await?;
            created += 1;
        }
        let summary = ImportSummary { created, skipped: parsed.skipped };
        tracing::info!(created, skipped = summary.skipped, group = %group, "credential import");
        self.emit(CredentialEvent::Imported { created, skipped: summary.skipped })
            .await;
        Ok(summary)
    }

    pub async fn remove_credential(&self, id: Uuid) -> Result<()> {
        self.store.delete_credential(id).await?;
        self.emit(CredentialEvent::Deleted { credential_id: id }).await;
        Ok(())
    }

    pub async fn credential(&self, id: Uuid) -> Result<Credential> {
        self.store
            .credential(id)
            .await?
            .ok_or(Error::NotFound("credential"))
    }

    async fn emit(&self, event: CredentialEvent) {
        let event = DomainEvent::Credential(event);
        if let Err(e) = self.notifier.domain_event(&event).await {
            tracing::debug!(error = %e, "domain event publish failed");
        }
    }
}
