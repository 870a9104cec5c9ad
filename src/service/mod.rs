//! Application services wiring the domain, the store, and the notifier.
pub mod catalog;
pub mod inventory;
pub mod orders;

pub use catalog::CatalogService;
pub use inventory::InventoryService;
pub use orders::OrderService;
