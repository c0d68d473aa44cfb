use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::analyzer::TrendAnalyzer;
use crate::extractors::ExtractorRegistry;
use crate::fetcher::PageFetcher;
use crate::models::{canonicalize_url, DropAlert, PriceObservation, PriceReading, Product};
use crate::store::PriceStore;
use crate::utils::error::{AppError, ExtractionFailure, ExtractionFailureKind, FetchFailure, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Failed,
    Skipped,
}

/// Why a single product check did not produce an observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum CheckFailure {
    Fetch(FetchFailure),
    Extraction(ExtractionFailure),
    Store { message: String },
    InvalidProduct { message: String },
}

impl std::fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckFailure::Fetch(failure) => write!(f, "{}", failure),
            CheckFailure::Extraction(failure) => write!(f, "{}", failure),
            CheckFailure::Store { message } => write!(f, "store error: {}", message),
            CheckFailure::InvalidProduct { message } => write!(f, "invalid product: {}", message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub product_id: String,
    pub url: String,
    pub status: CheckStatus,
    pub observation: Option<PriceObservation>,
    pub alert: Option<DropAlert>,
    pub failure: Option<CheckFailure>,
    pub elapsed_ms: u64,
}

impl CheckResult {
    fn ok(product: &Product, observation: PriceObservation, alert: Option<DropAlert>, started: Instant) -> Self {
        Self {
            product_id: product.id.clone(),
            url: product.url.clone(),
            status: CheckStatus::Ok,
            observation: Some(observation),
            alert,
            failure: None,
            elapsed_ms: elapsed_ms(started),
        }
    }

    fn failed(product: &Product, failure: CheckFailure, started: Instant) -> Self {
        Self {
            product_id: product.id.clone(),
            url: product.url.clone(),
            status: CheckStatus::Failed,
            observation: None,
            alert: None,
            failure: Some(failure),
            elapsed_ms: elapsed_ms(started),
        }
    }

    fn skipped(product: &Product) -> Self {
        Self {
            product_id: product.id.clone(),
            url: product.url.clone(),
            status: CheckStatus::Skipped,
            observation: None,
            alert: None,
            failure: None,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub alerts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
    pub results: Vec<CheckResult>,
}

impl BatchReport {
    pub fn alerts(&self) -> impl Iterator<Item = &DropAlert> {
        self.results.iter().filter_map(|r| r.alert.as_ref())
    }
}

/// Result of checking a URL that may or may not be tracked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UrlCheck {
    Tracked(CheckResult),
    /// Fetched and extracted without recording anything.
    Untracked {
        url: String,
        variant: String,
        reading: Option<PriceReading>,
        failure: Option<CheckFailure>,
    },
}

/// Runs fetch, extract, append and analyze for products.
///
/// A failure in one product never affects another. Batch results come
/// back in input order even though fetches overlap.
pub struct PriceChecker {
    fetcher: Arc<dyn PageFetcher>,
    registry: ExtractorRegistry,
    store: Arc<dyn PriceStore>,
    analyzer: TrendAnalyzer,
    max_concurrent: usize,
}

impl PriceChecker {
    pub fn new(fetcher: Arc<dyn PageFetcher>, registry: ExtractorRegistry, store: Arc<dyn PriceStore>) -> Self {
        Self {
            fetcher,
            registry,
            store,
            analyzer: TrendAnalyzer::new(),
            max_concurrent: 4,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Fetches and extracts a page without touching the store.
    pub async fn inspect(&self, url: &Url) -> std::result::Result<PriceReading, CheckFailure> {
        let extractor = self.registry.select(url);
        let page = self.fetcher.fetch(url).await.map_err(CheckFailure::Fetch)?;
        debug!("Extracting {} with the {} extractor", url, extractor.variant());
        extractor.extract(&page).map_err(CheckFailure::Extraction)
    }

    pub async fn check_one(&self, product: &Product) -> CheckResult {
        let started = Instant::now();
        match self.run_check(product).await {
            Ok((observation, alert)) => {
                match &alert {
                    Some(alert) => info!("Price drop for {}: {}", product.id, alert.headline()),
                    None => info!(
                        "Checked {} ({}): {}",
                        product.id,
                        product.name,
                        observation
                            .money()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| observation.availability.as_str().to_string())
                    ),
                }
                CheckResult::ok(product, observation, alert, started)
            }
            Err(failure) => {
                warn!("Check failed for {} ({}): {}", product.id, product.url, failure);
                CheckResult::failed(product, failure, started)
            }
        }
    }

    async fn run_check(
        &self,
        product: &Product,
    ) -> std::result::Result<(PriceObservation, Option<DropAlert>), CheckFailure> {
        let url = product.parsed_url().map_err(|e| CheckFailure::InvalidProduct {
            message: e.to_string(),
        })?;
        let reading = self.inspect(&url).await?;

        let observation = PriceObservation::from_reading(&product.id, reading, Utc::now()).map_err(|e| {
            CheckFailure::Extraction(ExtractionFailure::new(
                ExtractionFailureKind::MalformedPage,
                self.registry.select(&url).variant(),
                e.to_string(),
            ))
        })?;

        self.store
            .append_observation(&observation)
            .await
            .map_err(store_failure)?;
        let history = self
            .store
            .get_history(&product.id, None)
            .await
            .map_err(store_failure)?;

        let alert = self.analyzer.analyze(product, &history);
        Ok((observation, alert))
    }

    /// Lazily checks `products`, at most `max_concurrent` at a time, yielding
    /// results in input order. Products not yet started when `cancel` fires
    /// are reported as skipped.
    pub fn check_batch_stream<'a>(
        &'a self,
        products: Vec<Product>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = CheckResult> + 'a {
        stream::iter(products)
            .map(move |product| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        debug!("Skipping {} after cancellation", product.id);
                        return CheckResult::skipped(&product);
                    }
                    self.check_one(&product).await
                }
            })
            .buffered(self.max_concurrent)
    }

    pub async fn check_batch(&self, products: Vec<Product>, cancel: CancellationToken) -> BatchReport {
        let started_at = Utc::now();
        let results: Vec<CheckResult> = self.check_batch_stream(products, cancel).collect().await;

        let mut summary = BatchSummary {
            total: results.len(),
            ..BatchSummary::default()
        };
        for result in &results {
            match result.status {
                CheckStatus::Ok => summary.ok += 1,
                CheckStatus::Failed => summary.failed += 1,
                CheckStatus::Skipped => summary.skipped += 1,
            }
            if result.alert.is_some() {
                summary.alerts += 1;
            }
        }

        info!(
            "Batch finished: {} ok, {} failed, {} skipped, {} alert(s)",
            summary.ok, summary.failed, summary.skipped, summary.alerts
        );

        BatchReport {
            started_at,
            finished_at: Utc::now(),
            summary,
            results,
        }
    }

    /// Checks every tracked product.
    pub async fn check_all(&self, cancel: CancellationToken) -> Result<BatchReport> {
        let products = self.store.list_products().await?;
        info!("Checking {} tracked product(s)", products.len());
        Ok(self.check_batch(products, cancel).await)
    }

    /// Checks a URL: tracked products get a full check, anything else is
    /// fetched and extracted only.
    pub async fn check_url(&self, raw_url: &str) -> Result<UrlCheck> {
        let url = canonicalize_url(raw_url)?;
        if let Some(product) = self.store.find_product_by_url(url.as_str()).await? {
            return Ok(UrlCheck::Tracked(self.check_one(&product).await));
        }

        let variant = self.registry.variant_for(&url);
        let (reading, failure) = match self.inspect(&url).await {
            Ok(reading) => (Some(reading), None),
            Err(failure) => (None, Some(failure)),
        };
        Ok(UrlCheck::Untracked {
            url: url.to_string(),
            variant,
            reading,
            failure,
        })
    }
}

fn store_failure(error: AppError) -> CheckFailure {
    CheckFailure::Store {
        message: error.to_string(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
