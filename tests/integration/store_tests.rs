use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use price_drop_watcher::analyzer::TrendAnalyzer;
use price_drop_watcher::config::DatabaseConfig;
use price_drop_watcher::models::{generate_id, Availability, PriceObservation};
use price_drop_watcher::{AppError, PriceStore, ProductCatalog, RemovalPolicy, SqliteStore};
use tempfile::TempDir;

use super::track;

fn observation(product_id: &str, hour: i64, price: i64) -> PriceObservation {
    PriceObservation {
        id: generate_id(),
        product_id: product_id.to_string(),
        price: Some(Decimal::from(price)),
        currency: "GBP".to_string(),
        availability: Availability::InStock,
        observed_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
        variant: "amazon.co.uk".to_string(),
        title: None,
        image_url: None,
    }
}

#[tokio::test]
async fn test_history_survives_reconnect() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = DatabaseConfig {
        url: format!("sqlite://{}/prices.db", dir.path().display()),
        ..DatabaseConfig::default()
    };

    let store = SqliteStore::connect(&config).await?;
    let product = track(&store, "https://www.amazon.co.uk/dp/B0C1234567", None).await?;
    for (hour, price) in [(0, 120), (1, 110), (2, 115), (3, 99)] {
        store.append_observation(&observation(&product.id, hour, price)).await?;
    }
    store.pool().close().await;

    let reopened = SqliteStore::connect(&config).await?;
    let recent = reopened.get_history(&product.id, Some(3)).await?;
    let prices: Vec<_> = recent.iter().filter_map(|o| o.price).collect();
    assert_eq!(prices, vec![Decimal::from(110), Decimal::from(115), Decimal::from(99)]);

    let summary = TrendAnalyzer::new()
        .summarize(&reopened.get_history(&product.id, None).await?)
        .unwrap();
    assert_eq!(summary.first_price, Some(Decimal::from(120)));
    assert_eq!(summary.lowest_price, Some(Decimal::from(99)));
    assert_eq!(summary.change_since_first, Some(Decimal::from(-21)));

    println!("✓ History persisted across connections");
    Ok(())
}

#[tokio::test]
async fn test_retained_history_is_hidden_but_kept() -> anyhow::Result<()> {
    let store = super::create_test_store().await?;
    let product = track(&store, "https://shop.example.com/chair", None).await?;
    store.append_observation(&observation(&product.id, 0, 80)).await?;

    store.remove_product(&product.id, RemovalPolicy::RetainHistory).await?;
    assert!(store.find_product_by_url(&product.url).await?.is_none());
    assert!(store.get_history(&product.id, None).await?.is_empty());
    assert_eq!(store.retained_history(&product.id).await?.len(), 1);

    let result = store.append_observation(&observation(&product.id, 1, 75)).await;
    assert!(matches!(result, Err(AppError::NotFound { .. })));

    let again = track(&store, "https://shop.example.com/chair", None).await?;
    assert_ne!(again.id, product.id);
    Ok(())
}

#[tokio::test]
async fn test_negative_price_is_rejected() -> anyhow::Result<()> {
    let store = super::create_test_store().await?;
    let product = track(&store, "https://shop.example.com/lamp", None).await?;

    let mut bad = observation(&product.id, 0, 10);
    bad.price = Some(Decimal::from(-10));
    assert!(matches!(store.append_observation(&bad).await, Err(AppError::Validation(_))));
    Ok(())
}
