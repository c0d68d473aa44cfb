use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analyzer::{PriceSummary, TrendAnalyzer};
use crate::checker::{BatchReport, CheckStatus};
use crate::config::NotificationsConfig;
use crate::models::DropAlert;
use crate::store::PriceStore;
use crate::utils::error::{AppError, Result};

// Discord rejects messages above these limits
const MAX_EMBEDS_PER_MESSAGE: usize = 10;
const MAX_FIELDS_PER_EMBED: usize = 25;

const DROP_COLOR: u32 = 0x00ff00;
const SUMMARY_COLOR: u32 = 0x0099ff;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSummary {
    pub product_id: String,
    pub name: String,
    pub url: String,
    pub summary: PriceSummary,
}

/// Everything one notification run has to say.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertReport {
    pub alerts: Vec<DropAlert>,
    pub summaries: Vec<ProductSummary>,
}

impl AlertReport {
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty() && self.summaries.is_empty()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, report: &AlertReport) -> Result<()>;
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, report: &AlertReport) -> Result<()> {
        for alert in &report.alerts {
            info!(product_id = %alert.product_id, url = %alert.url, "{}", alert.headline());
        }
        for entry in &report.summaries {
            info!(
                product_id = %entry.product_id,
                "{}: current {}, lowest {}, highest {} {}",
                entry.name,
                format_price(entry.summary.current_price),
                format_price(entry.summary.lowest_price),
                format_price(entry.summary.highest_price),
                entry.summary.currency
            );
        }
        Ok(())
    }
}

/// Posts Discord-compatible embeds to a webhook.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    username: String,
    avatar_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationsConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .clone()
            .ok_or_else(|| AppError::Validation("notifications.webhook_url is not set".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            webhook_url,
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn alert_embed(&self, alert: &DropAlert) -> serde_json::Value {
        let mut embed = json!({
            "title": format!("📉 {}", alert.product_name),
            "url": alert.url,
            "color": DROP_COLOR,
            "timestamp": alert.decided_at.to_rfc3339(),
            "fields": [
                {
                    "name": "💰 Price Drop!",
                    "value": format!(
                        "**Was:** {} {}\n**Now:** {} {}\n**Change:** -{} (-{})",
                        alert.baseline_price.round_dp(2),
                        alert.currency,
                        alert.current_price.round_dp(2),
                        alert.currency,
                        alert.delta.round_dp(2),
                        alert.percent_display()
                    ),
                    "inline": false
                },
                {
                    "name": "📏 Compared against",
                    "value": alert.baseline_rule.to_string(),
                    "inline": true
                }
            ],
            "footer": { "text": self.username }
        });

        if let Some(image_url) = &alert.image_url {
            embed["thumbnail"] = json!({ "url": image_url });
        }
        embed
    }

    fn summary_embeds(&self, summaries: &[ProductSummary]) -> Vec<serde_json::Value> {
        summaries
            .chunks(MAX_FIELDS_PER_EMBED)
            .map(|chunk| {
                let fields: Vec<serde_json::Value> = chunk
                    .iter()
                    .map(|entry| {
                        let s = &entry.summary;
                        json!({
                            "name": entry.name,
                            "value": format!(
                                "Current: {}\nLowest: {}\nHighest: {}\nSince first: {}",
                                format_money(s.current_price, &s.currency),
                                format_money(s.lowest_price, &s.currency),
                                format_money(s.highest_price, &s.currency),
                                format_change(s.change_since_first, s.change_since_first_pct)
                            ),
                            "inline": true
                        })
                    })
                    .collect();
                json!({
                    "title": "📊 Price report",
                    "color": SUMMARY_COLOR,
                    "fields": fields
                })
            })
            .collect()
    }

    /// One payload per Discord message, alerts first.
    pub fn payloads(&self, report: &AlertReport) -> Vec<serde_json::Value> {
        let mut embeds: Vec<serde_json::Value> = report.alerts.iter().map(|a| self.alert_embed(a)).collect();
        embeds.extend(self.summary_embeds(&report.summaries));

        embeds
            .chunks(MAX_EMBEDS_PER_MESSAGE)
            .map(|chunk| {
                let mut payload = json!({
                    "username": self.username,
                    "embeds": chunk
                });
                if let Some(avatar_url) = &self.avatar_url {
                    payload["avatar_url"] = json!(avatar_url);
                }
                payload
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, report: &AlertReport) -> Result<()> {
        if report.is_empty() {
            debug!("Nothing to report, skipping webhook");
            return Ok(());
        }

        for payload in self.payloads(report) {
            let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!("Webhook rejected notification with {}: {}", status, body);
                return Err(AppError::Notification(format!(
                    "webhook returned {}: {}",
                    status, body
                )));
            }
        }

        info!(
            "Sent {} alert(s) and {} summary(ies) to webhook",
            report.alerts.len(),
            report.summaries.len()
        );
        Ok(())
    }
}

/// Collects a batch's alerts and, when asked, a summary of every product
/// that was checked successfully.
pub async fn build_report(
    store: &dyn PriceStore,
    batch: &BatchReport,
    include_summaries: bool,
) -> Result<AlertReport> {
    let alerts: Vec<DropAlert> = batch.alerts().cloned().collect();
    let mut summaries = Vec::new();

    if include_summaries {
        let analyzer = TrendAnalyzer::new();
        for result in batch.results.iter().filter(|r| r.status == CheckStatus::Ok) {
            let Some(product) = store.get_product(&result.product_id).await? else {
                continue;
            };
            let history = store.get_history(&product.id, None).await?;
            if let Some(summary) = analyzer.summarize(&history) {
                summaries.push(ProductSummary {
                    product_id: product.id,
                    name: product.name,
                    url: product.url,
                    summary,
                });
            }
        }
    }

    Ok(AlertReport { alerts, summaries })
}

/// Webhook when configured, log otherwise.
pub fn from_config(config: &NotificationsConfig) -> Result<Box<dyn Notifier>> {
    if config.webhook_url.is_some() {
        Ok(Box::new(WebhookNotifier::new(config)?))
    } else {
        Ok(Box::new(LogNotifier))
    }
}

fn format_price(price: Option<Decimal>) -> String {
    price
        .map(|p| p.round_dp(2).to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_money(price: Option<Decimal>, currency: &str) -> String {
    match price {
        Some(p) => format!("{} {}", p.round_dp(2), currency),
        None => "n/a".to_string(),
    }
}

fn format_change(change: Option<Decimal>, pct: Option<Decimal>) -> String {
    let percent = pct.and_then(|pct| pct.checked_mul(Decimal::ONE_HUNDRED));
    match (change, percent) {
        (Some(change), Some(percent)) => format!("{} ({}%)", change.round_dp(2), percent.round_dp(1)),
        (Some(change), None) => change.round_dp(2).to_string(),
        _ => "n/a".to_string(),
    }
}
