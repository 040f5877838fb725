use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::{decimal_from_f64, CheckerError};

/// Relative threshold is a percentage, absolute threshold is in answer units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub rel: BigDecimal,
    pub abs: BigDecimal,
}

impl Thresholds {
    pub fn new(rel: f64, abs: f64) -> Result<Self, CheckerError> {
        Ok(Self {
            rel: decimal_from_f64("threshold", rel)?,
            abs: decimal_from_f64("absolute_threshold", abs)?,
        })
    }

    pub fn zero() -> Self {
        Self {
            rel: BigDecimal::from(0),
            abs: BigDecimal::from(0),
        }
    }

    fn is_zero(&self) -> bool {
        let zero = BigDecimal::from(0);
        self.rel == zero && self.abs == zero
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviationChecker {
    pub thresholds: Thresholds,
}

impl DeviationChecker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Reports on every call, used by triggers that must report regardless of price movement
    pub fn zero() -> Self {
        Self::new(Thresholds::zero())
    }

    /// Whether `candidate` moved far enough away from `previous` to be worth reporting.
    pub fn outside_deviation(&self, previous: &BigDecimal, candidate: &BigDecimal) -> bool {
        if self.thresholds.is_zero() {
            tracing::debug!(
                %previous,
                %candidate,
                "Deviation thresholds both zero; short-circuiting deviation checker to true"
            );
            return true;
        }

        let zero = BigDecimal::from(0);
        let diff = (previous - candidate).abs();

        if diff <= self.thresholds.abs {
            tracing::debug!(
                %previous,
                %candidate,
                absolute_deviation = %diff,
                "Absolute deviation threshold not met"
            );
            return false;
        }

        if *previous == zero {
            if *candidate == zero {
                tracing::debug!("Relative deviation is undefined; can't satisfy threshold");
                return false;
            }
            tracing::info!(%candidate, "Threshold met: relative deviation is infinite");
            return true;
        }

        let percentage = &diff * BigDecimal::from(100) / previous.abs();

        if percentage < self.thresholds.rel {
            tracing::debug!(
                %previous,
                %candidate,
                %percentage,
                "Relative deviation threshold not met"
            );
            return false;
        }

        tracing::info!(
            %previous,
            %candidate,
            %percentage,
            "Relative and absolute deviation thresholds both met"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn checker(rel: f64, abs: f64) -> DeviationChecker {
        DeviationChecker::new(Thresholds::new(rel, abs).unwrap())
    }

    #[test]
    fn zero_thresholds_always_report() {
        let checker = DeviationChecker::zero();
        for (prev, next) in [("0", "0"), ("1", "1"), ("100", "100.0000001"), ("-5", "-5")] {
            assert!(checker.outside_deviation(&dec(prev), &dec(next)));
        }
    }

    #[test]
    fn absolute_threshold_is_exclusive() {
        let checker = checker(0.0, 0.5);
        assert!(!checker.outside_deviation(&dec("10"), &dec("10.5")));
        assert!(checker.outside_deviation(&dec("10"), &dec("10.51")));
        assert!(!checker.outside_deviation(&dec("10"), &dec("9.5")));
    }

    #[test]
    fn relative_threshold_is_inclusive() {
        let checker = checker(1.0, 0.0);
        assert!(checker.outside_deviation(&dec("100"), &dec("101")));
        assert!(checker.outside_deviation(&dec("100"), &dec("99")));
        assert!(!checker.outside_deviation(&dec("100"), &dec("100.99")));
        // relative to |previous|, so negative answers behave the same
        assert!(checker.outside_deviation(&dec("-100"), &dec("-101")));
    }

    #[test]
    fn deviation_from_zero_is_infinite() {
        let checker = checker(10_000.0, 0.0);
        assert!(checker.outside_deviation(&dec("0"), &dec("0.000001")));
        assert!(!checker.outside_deviation(&dec("0"), &dec("0")));

        // but the absolute threshold still applies first
        let checker = checker_with_abs(1.0);
        assert!(!checker.outside_deviation(&dec("0"), &dec("0.5")));
    }

    fn checker_with_abs(abs: f64) -> DeviationChecker {
        checker(200.0, abs)
    }

    #[test]
    fn wide_value_ranges_keep_precision() {
        let checker = checker(0.5, 0.0);
        let previous = dec("123456789012345678901234567890");
        let just_under = dec("124074072957407407295740740729"); // +0.4999999...%
        let over = dec("124074072957407407295740740730");

        assert!(!checker.outside_deviation(&previous, &just_under));
        assert!(checker.outside_deviation(&previous, &over));
    }

    #[test]
    fn reference_flux_values() {
        // rel 200%, abs 0.1
        let checker = checker(200.0, 0.1);
        assert!(checker.outside_deviation(&dec("1"), &dec("100")));
        assert!(!checker.outside_deviation(&dec("100"), &dec("101")));
    }

    #[test]
    fn invalid_thresholds_rejected() {
        assert!(Thresholds::new(f64::NAN, 0.0).is_err());
        assert!(Thresholds::new(0.0, -1.0).is_err());
        assert!(Thresholds::new(f64::INFINITY, 0.0).is_err());
        assert_eq!(Thresholds::new(0.1, 0.0).unwrap().rel, dec("0.1"));
    }
}
