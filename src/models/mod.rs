use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::error::AppError;

pub mod alert;
pub mod observation;
pub mod product;

// Re-exports for convenience
pub use alert::*;
pub use observation::*;
pub use product::*;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "in_stock",
            Availability::OutOfStock => "out_of_stock",
            Availability::Unknown => "unknown",
        }
    }
}

impl FromStr for Availability {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(Availability::InStock),
            "out_of_stock" => Ok(Availability::OutOfStock),
            "unknown" => Ok(Availability::Unknown),
            other => Err(AppError::Parse {
                message: format!("unknown availability '{}'", other),
            }),
        }
    }
}

/// What size of drop counts as meaningful. Percent values are fractions
/// (`0.10` is ten percent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DropTrigger {
    Percent(Decimal),
    Absolute(Decimal),
}

impl fmt::Display for DropTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DropTrigger::Percent(fraction) => {
                write!(f, "{}%", (fraction * Decimal::ONE_HUNDRED).normalize())
            }
            DropTrigger::Absolute(amount) => write!(f, "{}", amount.normalize()),
        }
    }
}

/// Accepts `"10%"` for a relative drop or a bare amount such as `"5.00"`.
impl FromStr for DropTrigger {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || AppError::Parse {
            message: format!("invalid threshold '{}', expected e.g. '10%' or '5.00'", s),
        };

        let trigger = if let Some(percent) = s.strip_suffix('%') {
            let value = Decimal::from_str(percent.trim()).map_err(|_| invalid())?;
            DropTrigger::Percent(value / Decimal::ONE_HUNDRED)
        } else {
            DropTrigger::Absolute(Decimal::from_str(s).map_err(|_| invalid())?)
        };
        Ok(trigger)
    }
}

/// Which earlier price a new observation is compared against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BaselineRule {
    PreviousObservation,
    RollingMinimum { window: usize },
    InitialTracked,
}

impl fmt::Display for BaselineRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BaselineRule::PreviousObservation => write!(f, "previous"),
            BaselineRule::RollingMinimum { window } => write!(f, "rolling:{}", window),
            BaselineRule::InitialTracked => write!(f, "initial"),
        }
    }
}

/// Accepts `previous`, `initial` or `rolling:<window>`.
impl FromStr for BaselineRule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "previous" => Ok(BaselineRule::PreviousObservation),
            "initial" => Ok(BaselineRule::InitialTracked),
            other => {
                let window = other
                    .strip_prefix("rolling:")
                    .and_then(|w| w.parse::<usize>().ok())
                    .ok_or_else(|| AppError::Parse {
                        message: format!(
                            "invalid baseline '{}', expected 'previous', 'initial' or 'rolling:<n>'",
                            other
                        ),
                    })?;
                Ok(BaselineRule::RollingMinimum { window })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdPolicy {
    pub trigger: DropTrigger,
    pub baseline: BaselineRule,
}

impl ThresholdPolicy {
    pub fn new(trigger: DropTrigger, baseline: BaselineRule) -> Self {
        Self { trigger, baseline }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self.trigger {
            DropTrigger::Percent(fraction) => {
                if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                    return Err(AppError::Validation(
                        "Percent threshold must be greater than 0% and at most 100%".into(),
                    ));
                }
            }
            DropTrigger::Absolute(amount) => {
                if amount <= Decimal::ZERO {
                    return Err(AppError::Validation(
                        "Absolute threshold must be greater than 0".into(),
                    ));
                }
            }
        }

        if let BaselineRule::RollingMinimum { window } = self.baseline {
            if window == 0 {
                return Err(AppError::Validation(
                    "Rolling minimum window must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            trigger: DropTrigger::Percent(Decimal::new(5, 2)),
            baseline: BaselineRule::PreviousObservation,
        }
    }
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "drop >= {} vs {}", self.trigger, self.baseline)
    }
}

// Helper function to generate ids in the format stored by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
