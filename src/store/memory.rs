use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{PriceStore, ProductCatalog, RemovalPolicy};
use crate::models::{PriceObservation, Product, ThresholdPolicy};
use crate::utils::error::{AppError, Result};

#[derive(Default)]
struct Inner {
    products: Vec<Product>,
    removed: HashSet<String>,
    observations: HashMap<String, Vec<PriceObservation>>,
}

impl Inner {
    fn active(&self) -> impl Iterator<Item = &Product> {
        self.products.iter().filter(|p| !self.removed.contains(&p.id))
    }

    fn active_mut(&mut self, id: &str) -> Option<&mut Product> {
        let removed = &self.removed;
        self.products
            .iter_mut()
            .find(|p| p.id == id && !removed.contains(&p.id))
    }
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observations kept for `product_id`, including those of removed
    /// products retained for audit.
    pub async fn retained_history(&self, product_id: &str) -> Vec<PriceObservation> {
        let inner = self.inner.read().await;
        inner.observations.get(product_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn get_product(&self, id: &str) -> Result<Option<Product>> {
        let inner = self.inner.read().await;
        let found = inner.active().find(|p| p.id == id).cloned();
        Ok(found)
    }

    async fn find_product_by_url(&self, url: &str) -> Result<Option<Product>> {
        let inner = self.inner.read().await;
        let found = inner.active().find(|p| p.url == url).cloned();
        Ok(found)
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let inner = self.inner.read().await;
        let products = inner.active().cloned().collect();
        Ok(products)
    }

    async fn append_observation(&self, observation: &PriceObservation) -> Result<()> {
        observation.validate()?;
        let mut inner = self.inner.write().await;
        if !inner.active().any(|p| p.id == observation.product_id) {
            return Err(AppError::NotFound {
                resource: format!("product {}", observation.product_id),
            });
        }

        let history = inner
            .observations
            .entry(observation.product_id.clone())
            .or_default();
        // Keep chronological order even if observations arrive late
        let position = history.partition_point(|existing| existing.observed_at <= observation.observed_at);
        history.insert(position, observation.clone());
        Ok(())
    }

    async fn get_history(&self, product_id: &str, limit: Option<usize>) -> Result<Vec<PriceObservation>> {
        let inner = self.inner.read().await;
        if !inner.active().any(|p| p.id == product_id) {
            return Ok(Vec::new());
        }

        let history = inner.observations.get(product_id).map(Vec::as_slice).unwrap_or(&[]);
        let skip = limit.map_or(0, |limit| history.len().saturating_sub(limit));
        Ok(history[skip..].to_vec())
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn add_product(&self, product: &Product) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.active().any(|p| p.url == product.url) {
            return Err(AppError::Validation(format!("{} is already tracked", product.url)));
        }
        if inner.products.iter().any(|p| p.id == product.id) {
            return Err(AppError::Validation(format!("duplicate product id {}", product.id)));
        }
        inner.products.push(product.clone());
        Ok(())
    }

    async fn update_threshold(&self, id: &str, threshold: ThresholdPolicy) -> Result<Product> {
        threshold.validate()?;
        let mut inner = self.inner.write().await;
        let product = inner.active_mut(id).ok_or_else(|| AppError::NotFound {
            resource: format!("product {}", id),
        })?;
        product.threshold = threshold;
        Ok(product.clone())
    }

    async fn remove_product(&self, id: &str, policy: RemovalPolicy) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.active().any(|p| p.id == id) {
            return Err(AppError::NotFound {
                resource: format!("product {}", id),
            });
        }

        match policy {
            RemovalPolicy::PurgeHistory => {
                inner.products.retain(|p| p.id != id);
                inner.observations.remove(id);
            }
            RemovalPolicy::RetainHistory => {
                inner.removed.insert(id.to_string());
            }
        }
        Ok(())
    }
}
