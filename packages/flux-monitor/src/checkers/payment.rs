use alloy_primitives::U256;

/// Funds must cover this many more rounds for every oracle
pub const MIN_FUNDED_ROUNDS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChecker {
    pub min_contract_payment: U256,
    pub min_job_payment: Option<U256>,
}

impl PaymentChecker {
    pub fn new(min_contract_payment: U256, min_job_payment: Option<U256>) -> Self {
        Self {
            min_contract_payment,
            min_job_payment,
        }
    }

    pub fn sufficient_funds(
        &self,
        available_funds: U256,
        payment_amount: U256,
        oracle_count: u8,
    ) -> bool {
        let required = U256::from(oracle_count)
            .checked_mul(U256::from(MIN_FUNDED_ROUNDS))
            .and_then(|rounds| rounds.checked_mul(payment_amount));

        match required {
            Some(required) => available_funds >= required,
            // nothing can cover a requirement beyond U256
            None => false,
        }
    }

    pub fn sufficient_payment(&self, payment_amount: U256) -> bool {
        let above_contract_min = payment_amount >= self.min_contract_payment;
        let above_job_min = self
            .min_job_payment
            .map(|min| payment_amount >= min)
            .unwrap_or(true);

        above_contract_min && above_job_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funds_boundary_is_inclusive() {
        let checker = PaymentChecker::new(U256::ZERO, None);
        let payment = U256::from(100);

        // 5 oracles * 3 rounds * 100
        assert!(checker.sufficient_funds(U256::from(1_500), payment, 5));
        assert!(checker.sufficient_funds(U256::from(1_501), payment, 5));
        assert!(!checker.sufficient_funds(U256::from(1_499), payment, 5));
    }

    #[test]
    fn funds_with_no_oracles_or_free_rounds() {
        let checker = PaymentChecker::new(U256::ZERO, None);
        assert!(checker.sufficient_funds(U256::ZERO, U256::from(100), 0));
        assert!(checker.sufficient_funds(U256::ZERO, U256::ZERO, 10));
    }

    #[test]
    fn overflowing_requirement_is_insufficient() {
        let checker = PaymentChecker::new(U256::ZERO, None);
        assert!(!checker.sufficient_funds(U256::MAX, U256::MAX, 2));
    }

    #[test]
    fn payment_respects_both_minimums() {
        let contract_only = PaymentChecker::new(U256::from(10), None);
        assert!(contract_only.sufficient_payment(U256::from(10)));
        assert!(!contract_only.sufficient_payment(U256::from(9)));

        let with_job = PaymentChecker::new(U256::from(10), Some(U256::from(20)));
        assert!(!with_job.sufficient_payment(U256::from(15)));
        assert!(with_job.sufficient_payment(U256::from(20)));

        let lower_job = PaymentChecker::new(U256::from(10), Some(U256::from(5)));
        assert!(!lower_job.sufficient_payment(U256::from(7)));
    }
}
