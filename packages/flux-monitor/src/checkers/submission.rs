use alloy_primitives::I256;
use bigdecimal::BigDecimal;
use std::str::FromStr;

use super::CheckerError;

/// Keeps submissions inside the contract's accepted range so they do not revert on-chain.
///
/// Bounds come from the contract as raw integers. Answers are decimals carrying
/// `precision` implied decimal places relative to the raw on-chain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionChecker {
    pub min: BigDecimal,
    pub max: BigDecimal,
    pub precision: u32,
    scale: BigDecimal,
}

impl SubmissionChecker {
    pub fn new(min: I256, max: I256, precision: u32) -> Result<Self, CheckerError> {
        if min > max {
            return Err(CheckerError::InvertedBounds {
                min: min.to_string(),
                max: max.to_string(),
            });
        }

        let scale = BigDecimal::from_str(&format!("1e{precision}"))
            .map_err(|e| CheckerError::Conversion(e.to_string()))?;

        Ok(Self {
            min: from_raw_with(min, precision)?,
            max: from_raw_with(max, precision)?,
            precision,
            scale,
        })
    }

    /// Inclusive on both ends
    pub fn is_valid(&self, answer: &BigDecimal) -> bool {
        *answer >= self.min && *answer <= self.max
    }

    /// Answer to on-chain integer, truncating anything finer than `precision`
    pub fn to_raw(&self, answer: &BigDecimal) -> Result<I256, CheckerError> {
        let (digits, _) = (answer * &self.scale).with_scale(0).into_bigint_and_exponent();
        I256::from_dec_str(&digits.to_string())
            .map_err(|e| CheckerError::Conversion(format!("{answer}: {e}")))
    }

    /// On-chain integer to answer units
    pub fn from_raw(&self, raw: I256) -> Result<BigDecimal, CheckerError> {
        from_raw_with(raw, self.precision)
    }
}

fn from_raw_with(raw: I256, precision: u32) -> Result<BigDecimal, CheckerError> {
    BigDecimal::from_str(&format!("{raw}e-{precision}"))
        .map_err(|e| CheckerError::Conversion(format!("{raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn int(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    #[test]
    fn bounds_are_inclusive() {
        let checker = SubmissionChecker::new(int(1), int(1_000), 0).unwrap();

        assert!(checker.is_valid(&dec("1")));
        assert!(checker.is_valid(&dec("1000")));
        assert!(checker.is_valid(&dec("500")));
        assert!(!checker.is_valid(&dec("0")));
        assert!(!checker.is_valid(&dec("1001")));
    }

    #[test]
    fn bounds_are_scaled_by_precision() {
        // raw bounds 100..=500 with 2 implied decimals, i.e. 1.00..=5.00
        let checker = SubmissionChecker::new(int(100), int(500), 2).unwrap();

        assert!(checker.is_valid(&dec("1.00")));
        assert!(checker.is_valid(&dec("5")));
        assert!(!checker.is_valid(&dec("0.99")));
        assert!(!checker.is_valid(&dec("5.01")));
    }

    #[test]
    fn negative_bounds() {
        let checker = SubmissionChecker::new(int(-50), int(-10), 0).unwrap();
        assert!(checker.is_valid(&dec("-50")));
        assert!(!checker.is_valid(&dec("-51")));
        assert!(!checker.is_valid(&dec("-9")));
    }

    #[test]
    fn inverted_bounds_rejected() {
        assert!(matches!(
            SubmissionChecker::new(int(10), int(1), 0),
            Err(CheckerError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn raw_conversions() {
        let checker = SubmissionChecker::new(I256::MIN, I256::MAX, 8).unwrap();

        assert_eq!(checker.to_raw(&dec("1234.56789012")).unwrap(), int(123_456_789_012));
        // finer than precision is truncated
        assert_eq!(checker.to_raw(&dec("0.000000019")).unwrap(), int(1));
        assert_eq!(checker.to_raw(&dec("-2.5")).unwrap(), int(-250_000_000));

        assert_eq!(checker.from_raw(int(150_000_000)).unwrap(), dec("1.5"));

        let unscaled = SubmissionChecker::new(I256::MIN, I256::MAX, 0).unwrap();
        assert_eq!(unscaled.to_raw(&dec("100")).unwrap(), int(100));
        assert_eq!(unscaled.from_raw(int(-7)).unwrap(), dec("-7"));
    }
}
