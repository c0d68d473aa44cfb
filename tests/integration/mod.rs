// Shared fixtures for the integration tests

pub mod fetcher_tests;
pub mod pipeline_tests;
pub mod store_tests;

use price_drop_watcher::config::{AppConfig, DatabaseConfig, FetcherConfig};
use price_drop_watcher::models::{NewProduct, Product, ThresholdPolicy};
use price_drop_watcher::{ProductCatalog, SqliteStore};

/// Test configuration with short timeouts and near-instant retries
pub fn get_test_config() -> AppConfig {
    AppConfig {
        fetcher: FetcherConfig {
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
            retry_attempts: 3,
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 20,
            ..FetcherConfig::default()
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: 10,
        },
        ..AppConfig::default()
    }
}

pub async fn create_test_store() -> anyhow::Result<SqliteStore> {
    Ok(SqliteStore::connect(&get_test_config().database).await?)
}

pub fn product_page(name: &str, price: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>{name} | Example Shop</title>
  <meta property="og:title" content="{name}">
</head>
<body>
  <h1>{name}</h1>
  <div class="product-info">
    <span class="price current-price">{price}</span>
    <p class="stock">In stock</p>
  </div>
</body>
</html>"#
    )
}

pub async fn track(
    store: &SqliteStore,
    url: &str,
    threshold: Option<ThresholdPolicy>,
) -> anyhow::Result<Product> {
    let product = Product::new(NewProduct {
        url: url.to_string(),
        name: None,
        site: "generic".to_string(),
        threshold,
    })?;
    store.add_product(&product).await?;
    Ok(product)
}
