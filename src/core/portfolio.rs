use super::error::{ConfigError, non_negative};
use super::types::{EarlyAccessPolicy, WithdrawalResult};

/// Liquid (taxable, basis-tracked) and retirement (tax-deferred) buckets for a
/// single cohort path. `0 <= liquid_basis <= liquid` holds after every method.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    liquid: f64,
    liquid_basis: f64,
    retirement: f64,
}

/// What a gross draw would take from each bucket, without mutating anything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawPlan {
    pub from_liquid: f64,
    pub from_retirement: f64,
    pub liquid_gains: f64,
    pub penalty: f64,
}

impl Portfolio {
    /// Starting liquid money is treated as fully post-tax principal.
    pub fn new(liquid: f64, retirement: f64) -> Result<Self, ConfigError> {
        let liquid = non_negative("initial_liquid", liquid)?;
        let retirement = non_negative("initial_retirement", retirement)?;
        Ok(Self {
            liquid,
            liquid_basis: liquid,
            retirement,
        })
    }

    pub fn liquid(&self) -> f64 {
        self.liquid
    }

    pub fn liquid_basis(&self) -> f64 {
        self.liquid_basis
    }

    pub fn retirement(&self) -> f64 {
        self.retirement
    }

    pub fn total_value(&self) -> f64 {
        self.liquid + self.retirement
    }

    pub fn basis_ratio(&self) -> f64 {
        if self.liquid > 0.0 {
            (self.liquid_basis / self.liquid).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    pub fn apply_market_return(&mut self, weighted_return: f64) {
        let growth = (1.0 + weighted_return).max(0.0);
        self.liquid *= growth;
        self.retirement *= growth;
        self.liquid_basis = self.liquid_basis.min(self.liquid);
    }

    pub fn deposit_liquid(&mut self, amount: f64) {
        if amount > 0.0 {
            self.liquid += amount;
            self.liquid_basis += amount;
        }
    }

    /// Splits `amount` across the buckets the way `withdraw` would.
    pub fn plan_draw(&self, amount: f64, age: u32, policy: &EarlyAccessPolicy) -> DrawPlan {
        if amount <= 0.0 {
            return DrawPlan::default();
        }
        let from_liquid = self.liquid.min(amount);
        let remaining = amount - from_liquid;
        let from_retirement = if remaining > 0.0 && policy.can_access(age) {
            self.retirement.min(remaining)
        } else {
            0.0
        };
        DrawPlan {
            from_liquid,
            from_retirement,
            liquid_gains: from_liquid * (1.0 - self.basis_ratio()),
            penalty: policy.penalty_for(age, from_retirement),
        }
    }

    /// Liquid first, then retirement if `policy` allows it at `age`.
    pub fn withdraw(&mut self, amount: f64, age: u32, policy: &EarlyAccessPolicy) -> WithdrawalResult {
        if amount <= 0.0 {
            return WithdrawalResult {
                success: true,
                ..WithdrawalResult::default()
            };
        }

        let plan = self.plan_draw(amount, age, policy);
        if plan.from_liquid > 0.0 {
            let basis_used = plan.from_liquid * self.basis_ratio();
            self.liquid -= plan.from_liquid;
            self.liquid_basis = (self.liquid_basis - basis_used).clamp(0.0, self.liquid);
        }
        self.retirement -= plan.from_retirement;

        let remaining = amount - plan.from_liquid - plan.from_retirement;
        WithdrawalResult {
            success: remaining <= 0.0,
            from_liquid: plan.from_liquid,
            from_retirement: plan.from_retirement,
            liquid_gains: plan.liquid_gains,
            early_withdrawal_penalty: plan.penalty,
        }
    }

    /// Ruin: both buckets pinned at zero.
    pub fn liquidate(&mut self) {
        self.liquid = 0.0;
        self.liquid_basis = 0.0;
        self.retirement = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn policy(allow_early_access: bool) -> EarlyAccessPolicy {
        EarlyAccessPolicy {
            allow_early_access,
            penalty_rate: 0.10,
            access_age: 60,
        }
    }

    fn portfolio_with_gain() -> Portfolio {
        let mut portfolio = Portfolio::new(100_000.0, 50_000.0).unwrap();
        portfolio.apply_market_return(1.0);
        portfolio
    }

    #[test]
    fn new_rejects_negative_balances() {
        assert!(Portfolio::new(-1.0, 0.0).is_err());
        assert!(Portfolio::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn market_return_leaves_basis_unchanged() {
        let portfolio = portfolio_with_gain();
        assert_approx(portfolio.liquid(), 200_000.0);
        assert_approx(portfolio.retirement(), 100_000.0);
        assert_approx(portfolio.liquid_basis(), 100_000.0);
        assert_approx(portfolio.basis_ratio(), 0.5);
    }

    #[test]
    fn deposit_adds_basis_one_for_one() {
        let mut portfolio = portfolio_with_gain();
        portfolio.deposit_liquid(50_000.0);
        portfolio.deposit_liquid(-10.0);
        assert_approx(portfolio.liquid(), 250_000.0);
        assert_approx(portfolio.liquid_basis(), 150_000.0);
    }

    #[test]
    fn withdraw_takes_liquid_first_and_reports_gains() {
        let mut portfolio = portfolio_with_gain();
        let result = portfolio.withdraw(40_000.0, 50, &policy(false));
        assert!(result.success);
        assert_approx(result.from_liquid, 40_000.0);
        assert_approx(result.from_retirement, 0.0);
        assert_approx(result.liquid_gains, 20_000.0);
        assert_approx(portfolio.liquid(), 160_000.0);
        assert_approx(portfolio.liquid_basis(), 80_000.0);
        assert_approx(portfolio.basis_ratio(), 0.5);
    }

    #[test]
    fn withdraw_spills_into_retirement_with_penalty_before_access_age() {
        let mut portfolio = Portfolio::new(10_000.0, 100_000.0).unwrap();
        let result = portfolio.withdraw(30_000.0, 55, &policy(true));
        assert!(result.success);
        assert_approx(result.from_liquid, 10_000.0);
        assert_approx(result.from_retirement, 20_000.0);
        assert_approx(result.early_withdrawal_penalty, 2_000.0);
        assert_approx(portfolio.retirement(), 80_000.0);

        let mut older = Portfolio::new(0.0, 100_000.0).unwrap();
        let result = older.withdraw(30_000.0, 60, &policy(false));
        assert!(result.success);
        assert_approx(result.early_withdrawal_penalty, 0.0);
    }

    #[test]
    fn withdraw_fails_when_retirement_is_locked() {
        let mut portfolio = Portfolio::new(10_000.0, 500_000.0).unwrap();
        let result = portfolio.withdraw(30_000.0, 50, &policy(false));
        assert!(!result.success);
        assert_approx(result.from_liquid, 10_000.0);
        assert_approx(result.from_retirement, 0.0);
        assert_approx(portfolio.retirement(), 500_000.0);
    }

    #[test]
    fn withdraw_fails_when_everything_is_exhausted() {
        let mut portfolio = Portfolio::new(10_000.0, 5_000.0).unwrap();
        let result = portfolio.withdraw(30_000.0, 70, &policy(false));
        assert!(!result.success);
        assert_approx(portfolio.total_value(), 0.0);
    }

    #[test]
    fn non_positive_withdrawal_is_trivial_success() {
        let mut portfolio = Portfolio::new(10_000.0, 5_000.0).unwrap();
        let result = portfolio.withdraw(0.0, 40, &policy(false));
        assert!(result.success);
        assert_approx(result.from_liquid, 0.0);
        assert_approx(portfolio.total_value(), 15_000.0);
    }

    #[test]
    fn plan_draw_matches_withdraw_without_mutating() {
        let portfolio = portfolio_with_gain();
        let plan = portfolio.plan_draw(250_000.0, 58, &policy(true));
        let mut copy = portfolio.clone();
        let result = copy.withdraw(250_000.0, 58, &policy(true));
        assert_eq!(portfolio, portfolio_with_gain());
        assert_approx(plan.from_liquid, result.from_liquid);
        assert_approx(plan.from_retirement, result.from_retirement);
        assert_approx(plan.liquid_gains, result.liquid_gains);
        assert_approx(plan.penalty, result.early_withdrawal_penalty);
    }

    #[test]
    fn liquidate_zeroes_everything() {
        let mut portfolio = portfolio_with_gain();
        portfolio.liquidate();
        assert_approx(portfolio.total_value(), 0.0);
        assert_approx(portfolio.liquid_basis(), 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        #[test]
        fn prop_basis_stays_within_liquid(
            liquid in 0u32..2_000_000,
            retirement in 0u32..2_000_000,
            ops in proptest::collection::vec((0u8..3, 0u32..500_000, -50i32..80), 1..40)
        ) {
            let mut portfolio = Portfolio::new(liquid as f64, retirement as f64).unwrap();
            let policy = policy(true);
            for (kind, amount, pct) in ops {
                match kind {
                    0 => portfolio.deposit_liquid(amount as f64),
                    1 => {
                        portfolio.withdraw(amount as f64, 55, &policy);
                    }
                    _ => portfolio.apply_market_return(pct as f64 / 100.0),
                }
                prop_assert!(portfolio.liquid_basis() >= 0.0);
                prop_assert!(portfolio.liquid_basis() <= portfolio.liquid() + 1e-6);
                prop_assert!(portfolio.liquid() >= -1e-6);
                prop_assert!(portfolio.retirement() >= -1e-6);
            }
        }
    }
}
