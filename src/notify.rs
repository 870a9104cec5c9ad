//! Notification boundary.
//!
//! The core emits two outward events: "credential assigned" for the customer
//! notifier (e-mail rendering and delivery live outside this service) and a
//! stock alert for operators when a paid order could not be fulfilled.
//! Domain events are forwarded on the same channel for audit consumers.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::events::DomainEvent;
use crate::domain::value_objects::CredentialPayload;
use crate::{Error, Result};

/// Payload handed to the customer notifier once a credential is bound.
#[derive(Clone, Debug, Serialize)]
pub struct CredentialAssigned {
    pub order_id: Uuid,
    pub customer_email: String,
    pub customer_name: String,
    pub product_name: String,
    pub variation_name: String,
    pub credential: CredentialPayload,
}

/// Operator signal: payment succeeded but no credential had capacity left.
/// The order stays `paid`; someone must add stock and retry.
#[derive(Clone, Debug, Serialize)]
pub struct StockAlert {
    pub order_id: Uuid,
    pub variation_id: Uuid,
    pub variation_name: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn credential_assigned(&self, n: &CredentialAssigned) -> Result<()>;

    async fn stock_depleted(&self, alert: &StockAlert) -> Result<()>;

    async fn domain_event(&self, _event: &DomainEvent) -> Result<()> {
        Ok(())
    }
}

/// Publishes notifications as JSON over NATS subjects
/// `<prefix>.credential.assigned`, `<prefix>.stock.depleted`,
/// `<prefix>.events`.
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    async fn publish<T: Serialize>(&self, subject: String, payload: &T) -> Result<()> {
        let bytes = serde_json::to_vec(payload).map_err(|e| Error::Notify(e.to_string()))?;
        self.client
            .publish(subject, bytes.into())
            .await
            .map_err(|e| Error::Notify(e.to_string()))
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn credential_assigned(&self, n: &CredentialAssigned) -> Result<()> {
        self.publish(format!("{}.credential.assigned", self.prefix), n).await
    }

    async fn stock_depleted(&self, alert: &StockAlert) -> Result<()> {
        self.publish(format!("{}.stock.depleted", self.prefix), alert).await
    }

    async fn domain_event(&self, event: &DomainEvent) -> Result<()> {
        self.publish(format!("{}.events", self.prefix), event).await
    }
}

/// Fallback when no NATS URL is configured: log and move on.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn credential_assigned(&self, n: &CredentialAssigned) -> Result<()> {
        tracing::info!(order_id = %n.order_id, customer = %n.customer_email, "credential assigned");
        Ok(())
    }

    async fn stock_depleted(&self, alert: &StockAlert) -> Result<()> {
        tracing::warn!(
            order_id = %alert.order_id,
            variation = %alert.variation_name,
            "no credential available, order stays paid"
        );
        Ok(())
    }
}

/// Test double that records everything it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    assigned: std::sync::Mutex<Vec<CredentialAssigned>>,
    alerts: std::sync::Mutex<Vec<StockAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assigned(&self) -> Vec<CredentialAssigned> {
        self.assigned.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn alerts(&self) -> Vec<StockAlert> {
        self.alerts.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn credential_assigned(&self, n: &CredentialAssigned) -> Result<()> {
        if let Ok(mut g) = self.assigned.lock() {
            g.push(n.clone());
        }
        Ok(())
    }

    async fn stock_depleted(&self, alert: &StockAlert) -> Result<()> {
        if let Ok(mut g) = self.alerts.lock() {
            g.push(alert.clone());
        }
        Ok(())
    }
}
