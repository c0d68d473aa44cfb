use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{PriceObservation, Product, ThresholdPolicy};
use crate::utils::error::Result;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// What happens to a product's observations when it stops being tracked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    PurgeHistory,
    /// The product disappears from listings; its history stays for audit.
    RetainHistory,
}

impl RemovalPolicy {
    pub fn from_retain_flag(retain: bool) -> Self {
        if retain {
            RemovalPolicy::RetainHistory
        } else {
            RemovalPolicy::PurgeHistory
        }
    }
}

/// Read access to tracked products plus the append-only observation log.
/// Removed products are invisible through every method.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_product(&self, id: &str) -> Result<Option<Product>>;

    /// Looks a product up by its canonical URL.
    async fn find_product_by_url(&self, url: &str) -> Result<Option<Product>>;

    /// All tracked products, oldest first.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Fails with `NotFound` when the product is not tracked.
    async fn append_observation(&self, observation: &PriceObservation) -> Result<()>;

    /// The most recent `limit` observations (all when `None`), oldest first.
    async fn get_history(&self, product_id: &str, limit: Option<usize>) -> Result<Vec<PriceObservation>>;
}

/// Product management. Kept apart from [`PriceStore`] because the price
/// checker never mutates products.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fails with `Validation` when a product with the same URL is tracked.
    async fn add_product(&self, product: &Product) -> Result<()>;

    async fn update_threshold(&self, id: &str, threshold: ThresholdPolicy) -> Result<Product>;

    async fn remove_product(&self, id: &str, policy: RemovalPolicy) -> Result<()>;
}
