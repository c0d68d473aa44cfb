pub mod analyzer;
pub mod checker;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod fetcher;
pub mod models;
pub mod notifier;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use analyzer::{PriceSummary, TrendAnalyzer};
pub use checker::{BatchReport, CheckFailure, CheckResult, CheckStatus, PriceChecker, UrlCheck};
pub use config::AppConfig;
pub use extractors::{ExtractorRegistry, PriceExtractor};
pub use fetcher::{HttpFetcher, PageFetcher, RawPage};
pub use notifier::{AlertReport, LogNotifier, Notifier, WebhookNotifier};
pub use store::{MemoryStore, PriceStore, ProductCatalog, RemovalPolicy, SqliteStore};
pub use utils::error::{AppError, ExtractionFailure, FetchFailure, Result};
