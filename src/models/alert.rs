use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::BaselineRule;

/// A price drop that met a product's threshold. Produced by the analyzer and
/// handed to notifiers; never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DropAlert {
    pub product_id: String,
    pub product_name: String,
    pub url: String,
    pub baseline_price: Decimal,
    pub current_price: Decimal,
    pub currency: String,
    /// `baseline_price - current_price`, always positive.
    pub delta: Decimal,
    /// `delta / baseline_price` as a fraction.
    pub delta_pct: Decimal,
    pub baseline_rule: BaselineRule,
    pub decided_at: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl DropAlert {
    pub fn percent_display(&self) -> String {
        match self.delta_pct.checked_mul(Decimal::ONE_HUNDRED) {
            Some(percent) => format!("{}%", percent.round_dp(1).normalize()),
            None => "n/a".to_string(),
        }
    }

    pub fn headline(&self) -> String {
        format!(
            "{} dropped from {} to {} {} (-{})",
            self.product_name,
            self.baseline_price.round_dp(2),
            self.current_price.round_dp(2),
            self.currency,
            self.percent_display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_headline() {
        let alert = DropAlert {
            product_id: "p1".to_string(),
            product_name: "Noise Cancelling Headphones".to_string(),
            url: "https://www.amazon.in/dp/B0C1234567".to_string(),
            baseline_price: Decimal::new(24990, 0),
            current_price: Decimal::new(19990, 0),
            currency: "INR".to_string(),
            delta: Decimal::new(5000, 0),
            delta_pct: Decimal::new(5000, 0) / Decimal::new(24990, 0),
            baseline_rule: BaselineRule::PreviousObservation,
            decided_at: Utc::now(),
            image_url: None,
        };

        assert_eq!(alert.percent_display(), "20%");
        assert_eq!(
            alert.headline(),
            "Noise Cancelling Headphones dropped from 24990 to 19990 INR (-20%)"
        );
    }
}
