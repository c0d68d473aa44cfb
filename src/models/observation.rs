use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{generate_id, Availability};
use crate::utils::error::AppError;

/// A currency-tagged amount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self {
        Self {
            amount,
            currency: currency.to_string(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.round_dp(2), self.currency)
    }
}

/// What an extractor read off a single page, before it is attributed to a
/// product and timestamped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceReading {
    pub price: Option<Money>,
    pub availability: Availability,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub variant: String,
}

/// One timestamped price/availability reading for a product. Observations
/// are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub id: String,
    pub product_id: String,
    pub price: Option<Decimal>,
    pub currency: String,
    pub availability: Availability,
    pub observed_at: DateTime<Utc>,
    pub variant: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
}

impl PriceObservation {
    pub fn from_reading(product_id: &str, reading: PriceReading, observed_at: DateTime<Utc>) -> Result<Self, AppError> {
        let (price, currency) = match reading.price {
            Some(money) => (Some(money.amount), money.currency),
            None => (None, String::new()),
        };

        let observation = Self {
            id: generate_id(),
            product_id: product_id.to_string(),
            price,
            currency,
            availability: reading.availability,
            observed_at,
            variant: reading.variant,
            title: reading.title,
            image_url: reading.image_url,
        };
        observation.validate()?;
        Ok(observation)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(price) = self.price {
            if price < Decimal::ZERO {
                return Err(AppError::Validation(format!("Negative price {} observed", price)));
            }
        }
        if self.availability == Availability::InStock && self.price.is_none() {
            return Err(AppError::Validation(
                "An in-stock observation must carry a price".into(),
            ));
        }
        Ok(())
    }

    /// The price, if this observation can take part in trend analysis.
    pub fn in_stock_price(&self) -> Option<Decimal> {
        match self.availability {
            Availability::InStock => self.price,
            _ => None,
        }
    }

    pub fn money(&self) -> Option<Money> {
        self.price.map(|amount| Money::new(amount, &self.currency))
    }
}
