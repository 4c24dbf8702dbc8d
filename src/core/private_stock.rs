use super::types::PrivateStock;

/// Proceeds and realized gain of one year's sale. Basis is zero, so the two
/// are equal today; they are kept apart for the tax projection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StockSale {
    pub shares: f64,
    pub proceeds: f64,
    pub taxable_gain: f64,
}

/// Per-cohort state of the concentrated position.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateStockManager {
    stock: Option<PrivateStock>,
    shares_remaining: f64,
    current_price: f64,
}

impl PrivateStockManager {
    pub fn new(stock: Option<&PrivateStock>) -> Self {
        let (shares_remaining, current_price) = stock
            .map(|stock| (stock.shares(), stock.ipo_price()))
            .unwrap_or((0.0, 0.0));
        Self {
            stock: stock.cloned(),
            shares_remaining,
            current_price,
        }
    }

    pub fn shares_remaining(&self) -> f64 {
        self.shares_remaining
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn current_value(&self) -> f64 {
        self.shares_remaining * self.current_price
    }

    pub fn apply_market_return(&mut self, market_return: f64) {
        let Some(stock) = &self.stock else {
            return;
        };
        if self.shares_remaining > 0.0 && stock.growth_multiplier() != 0.0 {
            let growth = 1.0 + market_return * stock.growth_multiplier();
            self.current_price = (self.current_price * growth).max(0.0);
        }
    }

    /// Executes whatever the schedule calls for in `calendar_year`: nothing
    /// before the IPO, `shares / duration` per year inside a diversification
    /// window, or everything in the IPO year when no window is set.
    pub fn check_for_sales(&mut self, calendar_year: i32) -> StockSale {
        let Some(stock) = &self.stock else {
            return StockSale::default();
        };
        if self.shares_remaining <= 0.0 || calendar_year < stock.ipo_year() {
            return StockSale::default();
        }

        let shares = match stock.diversification() {
            Some(window) => {
                if (window.start_year..=window.end_year()).contains(&calendar_year) {
                    (stock.shares() / window.duration_years as f64).min(self.shares_remaining)
                } else {
                    0.0
                }
            }
            None if calendar_year == stock.ipo_year() => self.shares_remaining,
            None => 0.0,
        };

        if shares <= 0.0 {
            return StockSale::default();
        }

        self.shares_remaining = (self.shares_remaining - shares).max(0.0);
        let proceeds = shares * self.current_price;
        StockSale {
            shares,
            proceeds,
            taxable_gain: proceeds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn diversification_window_sells_evenly() {
        let stock = PrivateStock::new(10.0, 2026, 5.0, Some(2027), Some(5), 1.0).unwrap();
        let mut manager = PrivateStockManager::new(Some(&stock));

        let sold: Vec<f64> = (2025..=2033)
            .map(|year| manager.check_for_sales(year).shares)
            .collect();
        assert_eq!(sold, vec![0.0, 0.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0, 0.0]);
        assert_approx(manager.shares_remaining(), 0.0);
    }

    #[test]
    fn no_window_sells_everything_in_ipo_year_only() {
        let stock = PrivateStock::new(100.0, 2026, 20.0, None, None, 1.0).unwrap();
        let mut manager = PrivateStockManager::new(Some(&stock));

        assert_eq!(manager.check_for_sales(2025), StockSale::default());
        let sale = manager.check_for_sales(2026);
        assert_approx(sale.shares, 100.0);
        assert_approx(sale.proceeds, 2_000.0);
        assert_approx(sale.taxable_gain, 2_000.0);
        assert_eq!(manager.check_for_sales(2027), StockSale::default());
    }

    #[test]
    fn late_ipo_skips_window_years_before_it() {
        let stock = PrivateStock::new(10.0, 2029, 1.0, Some(2027), Some(5), 1.0).unwrap();
        let mut manager = PrivateStockManager::new(Some(&stock));
        assert_approx(manager.check_for_sales(2028).shares, 0.0);
        assert_approx(manager.check_for_sales(2029).shares, 2.0);
        assert_approx(manager.shares_remaining(), 8.0);
    }

    #[test]
    fn price_tracks_market_times_multiplier() {
        let stock = PrivateStock::new(10.0, 2026, 100.0, None, None, 2.0).unwrap();
        let mut manager = PrivateStockManager::new(Some(&stock));
        manager.apply_market_return(0.05);
        assert_approx(manager.current_price(), 110.0);
        assert_approx(manager.current_value(), 1_100.0);

        let flat = PrivateStock::new(10.0, 2026, 100.0, None, None, 0.0).unwrap();
        let mut manager = PrivateStockManager::new(Some(&flat));
        manager.apply_market_return(0.05);
        assert_approx(manager.current_price(), 100.0);
    }

    #[test]
    fn absent_stock_is_inert() {
        let mut manager = PrivateStockManager::new(None);
        manager.apply_market_return(0.5);
        assert_eq!(manager.check_for_sales(2030), StockSale::default());
        assert_approx(manager.current_value(), 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_shares_never_increase_or_go_negative(
            shares in 1u32..10_000,
            ipo_offset in 0i32..5,
            window_start in 0i32..8,
            duration in 1u32..10,
            with_window in proptest::bool::ANY
        ) {
            let (start, dur) = if with_window {
                (Some(2025 + window_start), Some(duration))
            } else {
                (None, None)
            };
            let stock = PrivateStock::new(shares as f64, 2025 + ipo_offset, 3.0, start, dur, 1.0).unwrap();
            let mut manager = PrivateStockManager::new(Some(&stock));
            let mut previous = manager.shares_remaining();
            for year in 2020..2045 {
                let sale = manager.check_for_sales(year);
                prop_assert!(sale.shares >= 0.0);
                if year < 2025 + ipo_offset {
                    prop_assert!(sale.shares == 0.0);
                }
                prop_assert!(manager.shares_remaining() <= previous);
                prop_assert!(manager.shares_remaining() >= 0.0);
                previous = manager.shares_remaining();
            }
        }
    }
}
