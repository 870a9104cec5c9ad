//! Domain events
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Credential(CredentialEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, variation_id: Uuid, total: i64 },
    PaymentConfirmed { order_id: Uuid, payment_id: String },
    Delivered { order_id: Uuid, credential_id: Uuid },
    Cancelled { order_id: Uuid },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialEvent {
    Created { credential_id: Uuid, group: String },
    Imported { created: usize, skipped: usize },
    Deleted { credential_id: Uuid },
}
