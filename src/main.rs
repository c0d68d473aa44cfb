use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use price_drop_watcher::cli::{Cli, Command};
use price_drop_watcher::config::{AppConfig, LoggingConfig};
use price_drop_watcher::models::{canonicalize_url, NewProduct, Product, ThresholdPolicy};
use price_drop_watcher::notifier;
use price_drop_watcher::{
    ExtractorRegistry, HttpFetcher, PriceChecker, PriceStore, ProductCatalog, RemovalPolicy, SqliteStore,
    TrendAnalyzer,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _guard = init_tracing(&config.logging)?;

    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    let registry = ExtractorRegistry::with_defaults();
    let fetcher = Arc::new(HttpFetcher::new(&config.fetcher)?);
    let checker = PriceChecker::new(fetcher, registry.clone(), store.clone())
        .with_max_concurrent(config.checker.max_concurrent_checks);

    match cli.command {
        Command::Add {
            url,
            name,
            threshold,
            baseline,
            no_check,
        } => {
            let threshold = policy_with_overrides(
                config.analysis.default_policy()?,
                threshold.as_deref(),
                baseline.as_deref(),
            )?;
            let canonical = canonicalize_url(&url)?;
            let product = Product::new(NewProduct {
                url: canonical.to_string(),
                name,
                site: registry.variant_for(&canonical),
                threshold: Some(threshold),
            })?;
            store.add_product(&product).await?;

            let initial_check = if no_check {
                None
            } else {
                Some(checker.check_one(&product).await)
            };
            print_json(&serde_json::json!({
                "product": product,
                "initial_check": initial_check,
            }))?;
        }
        Command::Remove { product, keep_history } => {
            let product = resolve_product(store.as_ref(), &product).await?;
            let policy = if keep_history {
                RemovalPolicy::RetainHistory
            } else {
                RemovalPolicy::from_retain_flag(config.store.retain_history_on_remove)
            };
            store.remove_product(&product.id, policy).await?;
            print_json(&serde_json::json!({ "removed": product, "policy": policy }))?;
        }
        Command::List => {
            print_json(&store.list_products().await?)?;
        }
        Command::History { product, limit } => {
            let product = resolve_product(store.as_ref(), &product).await?;
            let observations = store.get_history(&product.id, limit).await?;
            let summary = TrendAnalyzer::new().summarize(&observations);
            print_json(&serde_json::json!({
                "product": product,
                "summary": summary,
                "observations": observations,
            }))?;
        }
        Command::SetThreshold {
            product,
            threshold,
            baseline,
        } => {
            let product = resolve_product(store.as_ref(), &product).await?;
            let policy = policy_with_overrides(product.threshold, Some(&threshold), baseline.as_deref())?;
            let updated = store.update_threshold(&product.id, policy).await?;
            print_json(&updated)?;
        }
        Command::Check { url } => {
            print_json(&checker.check_url(&url).await?)?;
        }
        Command::CheckAll { notify } => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, remaining products will be skipped");
                    ctrl_c.cancel();
                }
            });

            let report = checker.check_all(cancel).await?;
            if notify {
                let alert_report =
                    notifier::build_report(store.as_ref(), &report, config.notifications.include_summaries).await?;
                let notifier = notifier::from_config(&config.notifications)?;
                notifier.notify(&alert_report).await?;
                info!("Notified {} alert(s) via {}", alert_report.alerts.len(), notifier.name());
            }
            print_json(&report)?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("price_drop_watcher={}", logging.level)))
        .context("Invalid logging level")?;

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    // stdout carries the JSON results
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn policy_with_overrides(
    base: ThresholdPolicy,
    threshold: Option<&str>,
    baseline: Option<&str>,
) -> Result<ThresholdPolicy> {
    let mut policy = base;
    if let Some(threshold) = threshold {
        policy.trigger = threshold.parse()?;
    }
    if let Some(baseline) = baseline {
        policy.baseline = baseline.parse()?;
    }
    policy.validate()?;
    Ok(policy)
}

/// Accepts a product id or any URL form of a tracked product.
async fn resolve_product(store: &dyn PriceStore, reference: &str) -> Result<Product> {
    let found = if reference.contains("://") {
        let canonical = canonicalize_url(reference)?;
        store.find_product_by_url(canonical.as_str()).await?
    } else {
        store.get_product(reference).await?
    };

    match found {
        Some(product) => Ok(product),
        None => bail!("No tracked product matches '{}'", reference),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
