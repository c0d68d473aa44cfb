use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{PriceStore, ProductCatalog, RemovalPolicy};
use crate::config::DatabaseConfig;
use crate::models::{PriceObservation, Product, ThresholdPolicy};
use crate::utils::error::{AppError, Result};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        name TEXT NOT NULL,
        site TEXT NOT NULL,
        threshold TEXT NOT NULL,
        created_at TEXT NOT NULL,
        removed_at TEXT
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_products_active_url
        ON products(url) WHERE removed_at IS NULL
    ",
    r"
    CREATE TABLE IF NOT EXISTS price_observations (
        id TEXT PRIMARY KEY,
        product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
        price TEXT,
        currency TEXT NOT NULL,
        availability TEXT NOT NULL,
        observed_at TEXT NOT NULL,
        variant TEXT NOT NULL,
        title TEXT,
        image_url TEXT
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_observations_product_time
        ON price_observations(product_id, observed_at)
    ",
];

const PRODUCT_COLUMNS: &str = "id, url, name, site, threshold, created_at";

/// SQLite-backed store. Timestamps are fixed-width RFC 3339 text so that
/// ordering by the column is chronological.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:");
        if !in_memory {
            ensure_parent_dir(&config.url)?;
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to ":memory:" is its own database
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout));
        pool_options = if in_memory {
            pool_options.max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        info!("Connected to price store at {}", config.url);
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Price store schema is up to date");
        Ok(())
    }

    /// Every stored observation for a product, removed or not.
    pub async fn retained_history(&self, product_id: &str) -> Result<Vec<PriceObservation>> {
        let rows = sqlx::query(
            r"
            SELECT id, product_id, price, currency, availability, observed_at, variant, title, image_url
            FROM price_observations
            WHERE product_id = ?
            ORDER BY observed_at ASC, rowid ASC
            ",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(observation_from_row).collect()
    }

    async fn is_active(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM products WHERE id = ? AND removed_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn ensure_parent_dir(url: &str) -> Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Parse {
            message: format!("invalid stored timestamp '{}': {}", value, e),
        })
}

fn product_from_row(row: &SqliteRow) -> Result<Product> {
    let threshold: String = row.try_get("threshold")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Product {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        site: row.try_get("site")?,
        threshold: serde_json::from_str(&threshold)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn observation_from_row(row: &SqliteRow) -> Result<PriceObservation> {
    let price: Option<String> = row.try_get("price")?;
    let price = price
        .map(|p| {
            Decimal::from_str(&p).map_err(|e| AppError::Parse {
                message: format!("invalid stored price '{}': {}", p, e),
            })
        })
        .transpose()?;
    let availability: String = row.try_get("availability")?;
    let observed_at: String = row.try_get("observed_at")?;

    Ok(PriceObservation {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        price,
        currency: row.try_get("currency")?,
        availability: availability.parse()?,
        observed_at: parse_timestamp(&observed_at)?,
        variant: row.try_get("variant")?,
        title: row.try_get("title")?,
        image_url: row.try_get("image_url")?,
    })
}

#[async_trait]
impl PriceStore for SqliteStore {
    async fn get_product(&self, id: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE id = ? AND removed_at IS NULL",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn find_product_by_url(&self, url: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE url = ? AND removed_at IS NULL",
            PRODUCT_COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM products WHERE removed_at IS NULL ORDER BY created_at ASC, rowid ASC",
            PRODUCT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }

    async fn append_observation(&self, observation: &PriceObservation) -> Result<()> {
        observation.validate()?;
        if !self.is_active(&observation.product_id).await? {
            return Err(AppError::NotFound {
                resource: format!("product {}", observation.product_id),
            });
        }

        sqlx::query(
            r"
            INSERT INTO price_observations
                (id, product_id, price, currency, availability, observed_at, variant, title, image_url)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&observation.id)
        .bind(&observation.product_id)
        .bind(observation.price.map(|p| p.to_string()))
        .bind(&observation.currency)
        .bind(observation.availability.as_str())
        .bind(timestamp(&observation.observed_at))
        .bind(&observation.variant)
        .bind(&observation.title)
        .bind(&observation.image_url)
        .execute(&self.pool)
        .await?;

        debug!(
            "Stored observation {} for product {}",
            observation.id, observation.product_id
        );
        Ok(())
    }

    async fn get_history(&self, product_id: &str, limit: Option<usize>) -> Result<Vec<PriceObservation>> {
        if !self.is_active(product_id).await? {
            return Ok(Vec::new());
        }

        // SQLite treats a negative limit as no limit
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            r"
            SELECT id, product_id, price, currency, availability, observed_at, variant, title, image_url
            FROM price_observations
            WHERE product_id = ?
            ORDER BY observed_at DESC, rowid DESC
            LIMIT ?
            ",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut history = rows
            .iter()
            .map(observation_from_row)
            .collect::<Result<Vec<_>>>()?;
        history.reverse();
        Ok(history)
    }
}

#[async_trait]
impl ProductCatalog for SqliteStore {
    async fn add_product(&self, product: &Product) -> Result<()> {
        product.threshold.validate()?;
        if self.find_product_by_url(&product.url).await?.is_some() {
            return Err(AppError::Validation(format!("{} is already tracked", product.url)));
        }

        sqlx::query(
            r"
            INSERT INTO products (id, url, name, site, threshold, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&product.id)
        .bind(&product.url)
        .bind(&product.name)
        .bind(&product.site)
        .bind(serde_json::to_string(&product.threshold)?)
        .bind(timestamp(&product.created_at))
        .execute(&self.pool)
        .await?;

        info!("Tracking product {} ({})", product.id, product.url);
        Ok(())
    }

    async fn update_threshold(&self, id: &str, threshold: ThresholdPolicy) -> Result<Product> {
        threshold.validate()?;

        let result = sqlx::query("UPDATE products SET threshold = ? WHERE id = ? AND removed_at IS NULL")
            .bind(serde_json::to_string(&threshold)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                resource: format!("product {}", id),
            });
        }

        self.get_product(id).await?.ok_or_else(|| AppError::NotFound {
            resource: format!("product {}", id),
        })
    }

    async fn remove_product(&self, id: &str, policy: RemovalPolicy) -> Result<()> {
        if !self.is_active(id).await? {
            return Err(AppError::NotFound {
                resource: format!("product {}", id),
            });
        }

        match policy {
            RemovalPolicy::PurgeHistory => {
                let mut tx = self.pool.begin().await?;
                sqlx::query("DELETE FROM price_observations WHERE product_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM products WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            RemovalPolicy::RetainHistory => {
                sqlx::query("UPDATE products SET removed_at = ? WHERE id = ?")
                    .bind(timestamp(&Utc::now()))
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        info!("Removed product {} ({:?})", id, policy);
        Ok(())
    }
}
