//! Order Aggregate
//!
//! State machine: `pending -> {paid, cancelled}`, `paid -> delivered`.
//! `delivered` and `cancelled` are terminal. The order snapshots price and
//! variation name at checkout; the catalog is never consulted again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Storage(format!("unknown order status '{other}'"))),
        }
    }
}

/// Outcome of a payment confirmation; repeated webhook deliveries land on
/// `AlreadyConfirmed` instead of failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Confirmed,
    AlreadyConfirmed,
}

#[derive(Clone, Debug)]
pub struct Order {
    id: Uuid,
    order_number: String,
    product_id: Uuid,
    variation_id: Uuid,
    variation_name: String,
    /// Price at time of purchase, minor units.
    total: i64,
    customer_email: String,
    customer_name: String,
    status: OrderStatus,
    payment_id: Option<String>,
    credential_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

/// Plain-field image of an order, used for storage rows and API responses.
#[derive(Clone, Debug, Serialize)]
pub struct OrderSnapshot {
    pub id: Uuid,
    pub order_number: String,
    pub product_id: Uuid,
    pub variation_id: Uuid,
    pub variation_name: String,
    pub total: i64,
    pub customer_email: String,
    pub customer_name: String,
    pub status: OrderStatus,
    pub payment_id: Option<String>,
    pub credential_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn create(
        product_id: Uuid,
        variation_id: Uuid,
        variation_name: impl Into<String>,
        total: i64,
        customer_email: impl Into<String>,
        customer_name: impl Into<String>,
    ) -> Result<Self> {
        let customer_email = customer_email.into().trim().to_lowercase();
        let customer_name = customer_name.into().trim().to_string();
        if customer_email.is_empty() || !customer_email.contains('@') {
            return Err(Error::Validation("customer email is required".into()));
        }
        if customer_name.is_empty() {
            return Err(Error::Validation("customer name is required".into()));
        }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id,
            order_number: Self::order_number_for(id),
            product_id,
            variation_id,
            variation_name: variation_name.into(),
            total,
            customer_email,
            customer_name,
            status: OrderStatus::Pending,
            payment_id: None,
            credential_id: None,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise(OrderEvent::Created { order_id: id, variation_id, total });
        Ok(order)
    }

    /// Human-readable reference derived from the order id. The low 64 bits
    /// of a UUIDv7 are random, so the number satisfies the storage layer's
    /// uniqueness constraint without an insert-retry loop.
    fn order_number_for(id: Uuid) -> String {
        format!("ORD-{:016X}", id.as_u128() as u64)
    }

    pub fn hydrate(s: OrderSnapshot) -> Self {
        Self {
            id: s.id,
            order_number: s.order_number,
            product_id: s.product_id,
            variation_id: s.variation_id,
            variation_name: s.variation_name,
            total: s.total,
            customer_email: s.customer_email,
            customer_name: s.customer_name,
            status: s.status,
            payment_id: s.payment_id,
            credential_id: s.credential_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
            events: vec![],
        }
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            id: self.id,
            order_number: self.order_number.clone(),
            product_id: self.product_id,
            variation_id: self.variation_id,
            variation_name: self.variation_name.clone(),
            total: self.total,
            customer_email: self.customer_email.clone(),
            customer_name: self.customer_name.clone(),
            status: self.status,
            payment_id: self.payment_id.clone(),
            credential_id: self.credential_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn product_id(&self) -> Uuid { self.product_id }
    pub fn variation_id(&self) -> Uuid { self.variation_id }
    pub fn variation_name(&self) -> &str { &self.variation_name }
    pub fn total(&self) -> i64 { self.total }
    pub fn customer_email(&self) -> &str { &self.customer_email }
    pub fn customer_name(&self) -> &str { &self.customer_name }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_id(&self) -> Option<&str> { self.payment_id.as_deref() }
    pub fn credential_id(&self) -> Option<Uuid> { self.credential_id }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// `pending -> paid`. Calling again on a paid order is a no-op;
    /// delivered and cancelled orders reject the transition.
    pub fn confirm_payment(&mut self, payment_id: &str) -> Result<PaymentOutcome> {
        match self.status {
            OrderStatus::Pending => {
                self.status = OrderStatus::Paid;
                self.payment_id = Some(payment_id.to_string());
                self.touch();
                self.raise(OrderEvent::PaymentConfirmed {
                    order_id: self.id,
                    payment_id: payment_id.to_string(),
                });
                Ok(PaymentOutcome::Confirmed)
            }
            OrderStatus::Paid => Ok(PaymentOutcome::AlreadyConfirmed),
            OrderStatus::Delivered => {
                Err(Error::Conflict("order is already delivered".into()))
            }
            OrderStatus::Cancelled => {
                Err(Error::Conflict("order is cancelled".into()))
            }
        }
    }

    /// `paid -> delivered`, binding exactly one credential. Only the
    /// allocation engine calls this, after reserving a capacity unit.
    pub fn bind_credential(&mut self, credential_id: Uuid) -> Result<()> {
        if self.status != OrderStatus::Paid {
            return Err(Error::Conflict(format!(
                "cannot deliver an order in status '{}'",
                self.status.as_str()
            )));
        }
        if self.credential_id.is_some() {
            return Err(Error::Conflict("order already has a credential".into()));
        }
        self.credential_id = Some(credential_id);
        self.status = OrderStatus::Delivered;
        self.touch();
        self.raise(OrderEvent::Delivered { order_id: self.id, credential_id });
        Ok(())
    }

    /// Only valid from `pending`.
    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            OrderStatus::Pending => {
                self.status = OrderStatus::Cancelled;
                self.touch();
                self.raise(OrderEvent::Cancelled { order_id: self.id });
                Ok(())
            }
            OrderStatus::Cancelled => Ok(()),
            other => Err(Error::Conflict(format!(
                "cannot cancel an order in status '{}'",
                other.as_str()
            ))),
        }
    }

    /// Admin deleted the product/variation: keep the historical snapshot but
    /// null the credential reference.
    pub fn unlink_credential(&mut self) {
        if self.credential_id.take().is_some() {
            self.touch();
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn raise(&mut self, e: OrderEvent) {
        self.events.push(DomainEvent::Order(e));
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
