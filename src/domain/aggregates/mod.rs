//! Aggregates module
pub mod credential;
pub mod order;
pub mod product;

pub use credential::Credential;
pub use order::{Order, OrderSnapshot, OrderStatus, PaymentOutcome};
pub use product::{CredentialSource, NewVariation, Product, Variation};
