pub mod deviation;
pub mod payment;
pub mod submission;

pub use deviation::{DeviationChecker, Thresholds};
pub use payment::{PaymentChecker, MIN_FUNDED_ROUNDS};
pub use submission::SubmissionChecker;

use bigdecimal::BigDecimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CheckerError {
    #[error("{name} must be a finite, non-negative number (got {value})")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("submission bounds are inverted: min {min} > max {max}")]
    InvertedBounds { min: String, max: String },
    #[error("cannot convert {0} to an on-chain integer")]
    Conversion(String),
}

/// Exact decimal for a configured float, `0.1` becomes `0.1` rather than the binary approximation
pub(crate) fn decimal_from_f64(name: &'static str, value: f64) -> Result<BigDecimal, CheckerError> {
    if !value.is_finite() || value < 0.0 {
        return Err(CheckerError::InvalidThreshold { name, value });
    }

    BigDecimal::from_str(&value.to_string())
        .map_err(|_| CheckerError::InvalidThreshold { name, value })
}
