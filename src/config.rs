//! Typed application configuration.
//!
//! Loaded once at startup from the environment (a `.env` file is honored via
//! `dotenvy` in `main`). There is no mutable settings singleton; handlers
//! receive what they need through state.

use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// When set, notifications and domain events are published over NATS.
    pub nats_url: Option<String>,
    pub notify_subject_prefix: String,
    /// Pending orders older than this are swept to `cancelled`.
    pub stale_order_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Validation("DATABASE_URL is required".into()))?;
        let port = match std::env::var("PORT") {
            Ok(p) => p
                .parse()
                .map_err(|_| Error::Validation(format!("invalid PORT '{p}'")))?,
            Err(_) => 8084,
        };
        let stale_order_ttl_minutes = match std::env::var("STALE_ORDER_TTL_MINUTES") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Validation(format!("invalid STALE_ORDER_TTL_MINUTES '{v}'")))?,
            Err(_) => 60,
        };
        Ok(Self {
            database_url,
            port,
            nats_url: std::env::var("NATS_URL").ok(),
            notify_subject_prefix: std::env::var("NOTIFY_SUBJECT_PREFIX")
                .unwrap_or_else(|_| "keymart".to_string()),
            stale_order_ttl_minutes,
        })
    }
}
