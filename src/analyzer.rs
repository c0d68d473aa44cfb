use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Availability, BaselineRule, DropAlert, DropTrigger, PriceObservation, Product};

/// Price statistics over a product's history. Only in-stock observations in
/// the currency of the latest one count towards prices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSummary {
    pub currency: String,
    pub current_price: Option<Decimal>,
    pub current_availability: Availability,
    pub first_price: Option<Decimal>,
    pub lowest_price: Option<Decimal>,
    pub highest_price: Option<Decimal>,
    pub change_since_first: Option<Decimal>,
    pub change_since_first_pct: Option<Decimal>,
    pub observation_count: usize,
    pub in_stock_count: usize,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}

/// Turns a product's observation history into drop decisions and summaries.
/// Stateless; the same history always gives the same answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendAnalyzer;

struct Baseline<'a> {
    price: Decimal,
    currency: &'a str,
}

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Decides whether the most recent observation is a meaningful drop for
    /// `product`. `history` may arrive in any order.
    pub fn analyze(&self, product: &Product, history: &[PriceObservation]) -> Option<DropAlert> {
        let ordered = chronological(history);
        let (current, prior) = ordered.split_last()?;
        let current_price = current.in_stock_price()?;

        let baseline = match product.threshold.baseline {
            BaselineRule::PreviousObservation => prior
                .iter()
                .rev()
                .find_map(|obs| baseline_from(obs)),
            BaselineRule::RollingMinimum { window } => {
                let windowed: Vec<Baseline> = prior
                    .iter()
                    .rev()
                    .take(window)
                    .filter_map(|obs| baseline_from(obs))
                    .collect();
                if windowed.iter().any(|b| b.currency != current.currency) {
                    return None;
                }
                windowed.into_iter().min_by(|a, b| a.price.cmp(&b.price))
            }
            BaselineRule::InitialTracked => prior.iter().find_map(|obs| baseline_from(obs)),
        }?;

        if baseline.currency != current.currency || baseline.price <= Decimal::ZERO {
            return None;
        }

        let delta = baseline.price - current_price;
        if delta <= Decimal::ZERO {
            return None;
        }
        let delta_pct = delta.checked_div(baseline.price)?;

        let triggered = match product.threshold.trigger {
            DropTrigger::Percent(fraction) => delta_pct >= fraction,
            DropTrigger::Absolute(amount) => delta >= amount,
        };
        if !triggered {
            return None;
        }

        Some(DropAlert {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            url: product.url.clone(),
            baseline_price: baseline.price,
            current_price,
            currency: current.currency.clone(),
            delta,
            delta_pct,
            baseline_rule: product.threshold.baseline,
            decided_at: current.observed_at,
            image_url: current.image_url.clone(),
        })
    }

    pub fn summarize(&self, history: &[PriceObservation]) -> Option<PriceSummary> {
        let ordered = chronological(history);
        let first = ordered.first()?;
        let last = ordered.last()?;

        let currency = ordered
            .iter()
            .rev()
            .find(|obs| obs.in_stock_price().is_some())
            .map(|obs| obs.currency.clone())
            .unwrap_or_else(|| last.currency.clone());

        let prices: Vec<Decimal> = ordered
            .iter()
            .filter(|obs| obs.currency == currency)
            .filter_map(|obs| obs.in_stock_price())
            .collect();

        let first_price = prices.first().copied();
        let latest_price = prices.last().copied();
        let (change, change_pct) = match (first_price, latest_price) {
            (Some(first), Some(latest)) if prices.len() > 1 => {
                let change = latest.checked_sub(first);
                // None for a zero first price or a ratio beyond Decimal range
                let pct = change.and_then(|change| change.checked_div(first));
                (change, pct)
            }
            _ => (None, None),
        };

        Some(PriceSummary {
            currency,
            current_price: last.in_stock_price(),
            current_availability: last.availability,
            first_price,
            lowest_price: prices.iter().min().copied(),
            highest_price: prices.iter().max().copied(),
            change_since_first: change,
            change_since_first_pct: change_pct,
            observation_count: ordered.len(),
            in_stock_count: prices.len(),
            first_observed_at: first.observed_at,
            last_observed_at: last.observed_at,
        })
    }
}

fn chronological(history: &[PriceObservation]) -> Vec<&PriceObservation> {
    let mut ordered: Vec<&PriceObservation> = history.iter().collect();
    // Stable, so same-timestamp observations keep their stored order
    ordered.sort_by_key(|obs| obs.observed_at);
    ordered
}

fn baseline_from(obs: &PriceObservation) -> Option<Baseline<'_>> {
    obs.in_stock_price().map(|price| Baseline {
        price,
        currency: obs.currency.as_str(),
    })
}
