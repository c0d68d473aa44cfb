use std::sync::Arc;

use price_drop_watcher::config::NotificationsConfig;
use price_drop_watcher::extractors::{SiteExtractor, SiteProfile};
use price_drop_watcher::models::{Availability, BaselineRule, DropTrigger, ThresholdPolicy};
use price_drop_watcher::notifier::{build_report, Notifier, WebhookNotifier};
use price_drop_watcher::utils::error::FetchFailureKind;
use price_drop_watcher::{
    CheckFailure, CheckStatus, ExtractorRegistry, HttpFetcher, PriceChecker, PriceStore, UrlCheck,
};
use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{create_test_store, get_test_config, product_page, track};

fn percent_policy(pct: i64) -> ThresholdPolicy {
    ThresholdPolicy::new(
        DropTrigger::Percent(Decimal::new(pct, 2)),
        BaselineRule::PreviousObservation,
    )
}

#[tokio::test]
async fn test_batch_with_failing_middle_product() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("Kettle", "$39.99")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("Toaster", "$24.50")))
        .mount(&server)
        .await;

    let store = Arc::new(create_test_store().await?);
    let mut products = Vec::new();
    for i in 1..=3 {
        products.push(track(&store, &format!("{}/p/{}", server.uri(), i), None).await?);
    }

    let config = get_test_config();
    let checker = PriceChecker::new(
        Arc::new(HttpFetcher::new(&config.fetcher)?),
        ExtractorRegistry::with_defaults(),
        store.clone(),
    );
    let report = checker.check_all(CancellationToken::new()).await?;

    let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![CheckStatus::Ok, CheckStatus::Failed, CheckStatus::Ok]);
    assert!(matches!(
        &report.results[1].failure,
        Some(CheckFailure::Fetch(f)) if f.kind == FetchFailureKind::NotFound
    ));

    let first = store.get_history(&products[0].id, None).await?;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].price, Some(Decimal::new(3999, 2)));
    assert_eq!(first[0].currency, "USD");
    assert_eq!(first[0].availability, Availability::InStock);
    assert!(store.get_history(&products[1].id, None).await?.is_empty());
    assert_eq!(store.get_history(&products[2].id, None).await?.len(), 1);

    println!("✓ Failing product isolated, {} ok", report.summary.ok);
    Ok(())
}

#[tokio::test]
async fn test_price_drop_raises_alert_and_notifies() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/desk"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("Standing Desk", "$400.00")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/desk"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_page("Standing Desk", "$340.00")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({ "username": "Price Drop Watcher" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(create_test_store().await?);
    let product = track(&store, &format!("{}/desk", server.uri()), Some(percent_policy(10))).await?;

    let config = get_test_config();
    let checker = PriceChecker::new(
        Arc::new(HttpFetcher::new(&config.fetcher)?),
        ExtractorRegistry::with_defaults(),
        store.clone(),
    );

    let first = checker.check_all(CancellationToken::new()).await?;
    assert_eq!(first.summary.alerts, 0);

    let second = checker.check_all(CancellationToken::new()).await?;
    assert_eq!(second.summary.alerts, 1);
    let alert = second.alerts().next().unwrap();
    assert_eq!(alert.product_id, product.id);
    assert_eq!(alert.baseline_price, Decimal::from(400));
    assert_eq!(alert.current_price, Decimal::from(340));
    assert_eq!(alert.delta_pct, Decimal::new(15, 2));

    let report = build_report(store.as_ref(), &second, true).await?;
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].summary.highest_price, Some(Decimal::from(400)));
    assert_eq!(report.summaries[0].summary.lowest_price, Some(Decimal::from(340)));

    let notifier = WebhookNotifier::new(&NotificationsConfig {
        webhook_url: Some(format!("{}/hook", server.uri())),
        ..NotificationsConfig::default()
    })?;
    notifier.notify(&report).await?;

    println!("✓ Drop detected and delivered to webhook");
    Ok(())
}

#[tokio::test]
async fn test_storefront_profile_extracts_through_registry() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let html = r#"<html><head><title>Amazon.in: Noise Buds : Electronics</title></head><body>
        <span id="productTitle">Noise Buds VS104</span>
        <span class="a-price"><span class="a-offscreen">₹1,299.00</span></span>
        <div id="availability"><span>In stock</span></div>
    </body></html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;

    let store = Arc::new(create_test_store().await?);
    let mut registry = ExtractorRegistry::new();
    registry.register("127.0.0.1", Arc::new(SiteExtractor::new(SiteProfile::amazon("127.0.0.1", "INR"))));

    let config = get_test_config();
    let checker = PriceChecker::new(Arc::new(HttpFetcher::new(&config.fetcher)?), registry, store);

    match checker.check_url(&format!("{}/dp/B0C1234567", server.uri())).await? {
        UrlCheck::Untracked { reading, failure, .. } => {
            assert!(failure.is_none());
            let reading = reading.unwrap();
            let price = reading.price.unwrap();
            assert_eq!(price.amount, Decimal::from(1299));
            assert_eq!(price.currency, "INR");
            assert_eq!(reading.title.as_deref(), Some("Noise Buds VS104"));
        }
        other => panic!("expected an untracked check, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_out_of_stock_is_recorded_without_alert() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let html = r#"<html><body><h1>Espresso Grinder</h1>
        <p class="availability">Out of stock</p></body></html>"#;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;

    let store = Arc::new(create_test_store().await?);
    let product = track(&store, &format!("{}/grinder", server.uri()), None).await?;

    let config = get_test_config();
    let checker = PriceChecker::new(
        Arc::new(HttpFetcher::new(&config.fetcher)?),
        ExtractorRegistry::with_defaults(),
        store.clone(),
    );

    let result = checker.check_one(&product).await;
    assert_eq!(result.status, CheckStatus::Ok);
    assert!(result.alert.is_none());

    let history = store.get_history(&product.id, None).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].availability, Availability::OutOfStock);
    assert_eq!(history[0].price, None);
    Ok(())
}
