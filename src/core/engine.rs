use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::error::{ConfigError, in_range};
use super::gross_up::{GrossUpConfig, GrossUpTrial, solve_gross_withdrawal};
use super::market::{InflationHistory, InflationPath, MonthlyReturns};
use super::portfolio::Portfolio;
use super::private_stock::PrivateStockManager;
use super::strategy::{WithdrawalRequest, WithdrawalStrategy};
use super::tax::{FilingStatus, TaxEngine, TaxInputs};
use super::types::{
    BacktestStats, CohortPath, CohortStat, CohortYear, SimulationConfig, SimulationResult,
};

/// Replays every annual-cadence start month of a return series.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    returns: MonthlyReturns,
    stock_allocation: f64,
    bond_return: f64,
    inflation: Option<InflationHistory>,
}

/// Start-of-year cash-flow decision for one cohort year.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct AnnualCashFlow {
    target: f64,
    gross_withdrawal: f64,
    tax: f64,
    total_income: f64,
    monthly_draw: f64,
    ipo_proceeds: f64,
    deposit: f64,
}

struct CohortContext<'a> {
    config: &'a SimulationConfig,
    strategy: &'a dyn WithdrawalStrategy,
    tax_engine: TaxEngine,
    seed: &'a Portfolio,
    initial_withdrawal: f64,
}

impl BacktestEngine {
    pub fn new(
        returns: MonthlyReturns,
        stock_allocation: f64,
        bond_return: f64,
    ) -> Result<Self, ConfigError> {
        let stock_allocation = in_range("stock_allocation", stock_allocation, 0.0, 1.0)?;
        let bond_return = in_range("bond_return", bond_return, -0.5, 1.0)?;
        Ok(Self {
            returns,
            stock_allocation,
            bond_return,
            inflation: None,
        })
    }

    /// Cohorts then experience the inflation of their own start dates.
    pub fn with_inflation_history(mut self, history: InflationHistory) -> Self {
        self.inflation = Some(history);
        self
    }

    pub fn returns(&self) -> &MonthlyReturns {
        &self.returns
    }

    pub fn stock_allocation(&self) -> f64 {
        self.stock_allocation
    }

    pub fn bond_monthly_rate(&self) -> f64 {
        (1.0 + self.bond_return).powf(1.0 / 12.0) - 1.0
    }

    /// Start indices `0, 12, 24, ...` with a full `duration_years` of history.
    pub fn cohort_starts(&self, duration_years: u32) -> Vec<usize> {
        let months = duration_years as usize * 12;
        if months == 0 {
            return Vec::new();
        }
        (0..self.returns.len())
            .step_by(12)
            .take_while(|start| start + months <= self.returns.len())
            .collect()
    }

    pub fn inflation_path(&self, config: &SimulationConfig, start: usize) -> InflationPath {
        let start_date = self.returns.dates().get(start);
        match (&self.inflation, start_date) {
            (Some(history), Some(date)) => history.path_from(
                *date,
                config.duration_years as usize,
                config.assumed_inflation,
            ),
            _ => InflationPath::fixed(config.assumed_inflation),
        }
    }

    pub fn run_simulation(
        &self,
        config: &SimulationConfig,
        strategy: &dyn WithdrawalStrategy,
    ) -> Result<SimulationResult, ConfigError> {
        config.validate()?;
        let seed = Portfolio::new(config.initial_liquid, config.initial_retirement)?;

        let starts = self.cohort_starts(config.duration_years);
        if starts.is_empty() {
            warn!(
                available_months = self.returns.len(),
                required_months = config.months(),
                "not enough market history for the requested duration"
            );
            return Ok(SimulationResult::default());
        }

        let initial_withdrawal = strategy.initial_withdrawal(
            config.initial_annual_withdrawal,
            config.spending_schedule.as_ref(),
        );
        info!(
            strategy = strategy.kind().name(),
            cohorts = starts.len(),
            duration_years = config.duration_years,
            initial_withdrawal,
            "running backtest"
        );

        let ctx = CohortContext {
            config,
            strategy,
            tax_engine: TaxEngine::new(config.jurisdiction, FilingStatus::MarriedJointly),
            seed: &seed,
            initial_withdrawal,
        };
        let cohorts: Vec<CohortPath> = starts
            .into_par_iter()
            .filter_map(|start| self.run_cohort(&ctx, start))
            .collect();

        Ok(SimulationResult { cohorts })
    }

    fn run_cohort(&self, ctx: &CohortContext<'_>, start: usize) -> Option<CohortPath> {
        let config = ctx.config;
        let returns = self.returns.window(start, config.months())?;
        let start_date = *self.returns.dates().get(start)?;
        let inflation = self.inflation_path(config, start);
        let bond_monthly = self.bond_monthly_rate();

        let mut portfolio = ctx.seed.clone();
        let mut stock = PrivateStockManager::new(config.private_stock.as_ref());
        let mut balances = Vec::with_capacity(returns.len() + 1);
        balances.push(portfolio.total_value() + stock.current_value());
        let mut years = Vec::with_capacity(config.duration_years as usize);

        let mut failed = false;
        let mut previous_withdrawal = ctx.initial_withdrawal;

        for (year, year_returns) in returns.chunks(12).enumerate() {
            let age = config.current_age + year as u32;
            let start_portfolio = portfolio.total_value();
            let start_stock = stock.current_value();

            let target = if year == 0 {
                ctx.initial_withdrawal
            } else {
                ctx.strategy.calculate_withdrawal(&WithdrawalRequest {
                    portfolio_value: portfolio.total_value(),
                    year,
                    initial_withdrawal: ctx.initial_withdrawal,
                    previous_withdrawal,
                    schedule: config.spending_schedule.as_ref(),
                    inflation: &inflation,
                })
            };
            let cash = annual_cash_flow(
                ctx,
                &mut portfolio,
                &mut stock,
                target,
                year,
                failed,
            );
            previous_withdrawal = cash.target;

            for &stock_return in year_returns {
                if !failed {
                    let outcome = portfolio.withdraw(cash.monthly_draw, age, &config.early_access);
                    failed = !outcome.success;
                }
                let weighted = stock_return * self.stock_allocation
                    + bond_monthly * (1.0 - self.stock_allocation);
                portfolio.apply_market_return(weighted);
                stock.apply_market_return(stock_return);
                if failed {
                    portfolio.liquidate();
                }
                balances.push(portfolio.total_value() + stock.current_value());
            }

            years.push(CohortYear {
                withdrawal_target: cash.target,
                gross_withdrawal: cash.gross_withdrawal,
                tax: cash.tax,
                total_income: cash.total_income,
                portfolio_value: portfolio.total_value(),
                private_stock_value: stock.current_value(),
                portfolio_gain: portfolio.total_value() - start_portfolio + cash.gross_withdrawal
                    - cash.deposit,
                private_stock_gain: stock.current_value() - start_stock + cash.ipo_proceeds,
                ipo_proceeds: cash.ipo_proceeds,
                deposit: cash.deposit,
                inflation_rate: inflation.rate(year),
            });
        }

        debug!(
            %start_date,
            failed,
            end_balance = balances.last().copied().unwrap_or(0.0),
            "cohort finished"
        );

        Some(CohortPath {
            start_date,
            balances,
            years,
            failed,
        })
    }
}

/// Nets income, stock sales and their tax against `target`. A surplus is
/// deposited; a deficit is grossed up for the tax and penalty the withdrawal
/// itself triggers and spread evenly over the year's months. A cohort that has
/// already failed has nothing left to deposit into or draw from.
fn annual_cash_flow(
    ctx: &CohortContext<'_>,
    portfolio: &mut Portfolio,
    stock: &mut PrivateStockManager,
    target: f64,
    year: usize,
    failed: bool,
) -> AnnualCashFlow {
    let config = ctx.config;
    let calendar_year = config.start_year + year as i32;
    let age = config.current_age + year as u32;

    let active = config
        .income_streams
        .iter()
        .filter(|stream| stream.is_active(calendar_year));
    let (cash_income, wages) = active.fold((0.0, 0.0), |(cash, wages), stream| {
        let taxed = if stream.taxable() {
            stream.annual_amount()
        } else {
            0.0
        };
        (cash + stream.annual_amount(), wages + taxed)
    });

    let sale = stock.check_for_sales(calendar_year);
    let base_inputs = TaxInputs {
        wages,
        ltcg: sale.taxable_gain,
        ..TaxInputs::default()
    };
    let base_tax = ctx.tax_engine.project(&base_inputs).total_tax;
    let net_cash_flow = cash_income + sale.proceeds - base_tax - target;

    let mut cash = AnnualCashFlow {
        target,
        tax: base_tax,
        ipo_proceeds: sale.proceeds,
        ..AnnualCashFlow::default()
    };

    if failed {
        cash.total_income = cash_income + sale.proceeds;
        return cash;
    }

    if net_cash_flow > 0.0 {
        cash.deposit = net_cash_flow;
        portfolio.deposit_liquid(net_cash_flow);
    } else {
        let deficit = -net_cash_flow;
        let snapshot: &Portfolio = portfolio;
        let solved = solve_gross_withdrawal(deficit, GrossUpConfig::DEFAULT, |gross| {
            let plan = snapshot.plan_draw(gross, age, &config.early_access);
            let projected = ctx.tax_engine.project(&TaxInputs {
                other_ordinary: plan.from_retirement,
                ltcg: base_inputs.ltcg + plan.liquid_gains,
                ..base_inputs
            });
            let incremental_tax = projected.total_tax - base_tax;
            GrossUpTrial {
                net: plan.from_liquid + plan.from_retirement - incremental_tax - plan.penalty,
                incremental_tax,
                penalty: plan.penalty,
            }
        });
        if !solved.converged {
            warn!(
                calendar_year,
                deficit,
                gross = solved.gross,
                "gross-up did not converge; drawing best available estimate"
            );
        }
        cash.gross_withdrawal = solved.gross;
        cash.monthly_draw = solved.gross / 12.0;
        cash.tax += solved.incremental_tax + solved.penalty;
    }

    cash.total_income = cash_income + sale.proceeds + cash.gross_withdrawal;
    cash
}

/// Withdrawal targets deflated by each cohort's own inflation path.
pub fn real_withdrawals(result: &SimulationResult) -> Vec<Vec<f64>> {
    result
        .cohorts
        .iter()
        .map(|cohort| {
            let mut price_level = 1.0;
            cohort
                .years
                .iter()
                .enumerate()
                .map(|(year, row)| {
                    if year > 0 {
                        price_level *= 1.0 + cohort.years[year - 1].inflation_rate;
                    }
                    row.withdrawal_target / price_level
                })
                .collect()
        })
        .collect()
}

/// `None` for an empty result.
pub fn calculate_stats(result: &SimulationResult) -> Option<BacktestStats> {
    if result.is_empty() {
        return None;
    }

    let mut end_values: Vec<f64> = result.cohorts.iter().map(CohortPath::end_balance).collect();
    let successes = end_values.iter().filter(|value| **value > 0.0).count();
    let success_rate = successes as f64 / end_values.len() as f64;
    let median_end_value = percentile(&mut end_values, 50.0);
    let min_end_value = end_values.first().copied().unwrap_or(0.0);
    let max_end_value = end_values.last().copied().unwrap_or(0.0);

    let real = real_withdrawals(result);
    let min_annual_spend = finite_min(real.iter().flatten().copied());
    let years = real.iter().map(Vec::len).max().unwrap_or(0);
    let mut yearly_medians: Vec<f64> = (0..years)
        .map(|year| {
            let mut column: Vec<f64> = real.iter().filter_map(|row| row.get(year).copied()).collect();
            percentile(&mut column, 50.0)
        })
        .collect();
    let median_annual_spend = percentile(&mut yearly_medians, 50.0);

    Some(BacktestStats {
        success_rate,
        median_end_value,
        min_end_value,
        max_end_value,
        min_annual_spend,
        median_annual_spend,
    })
}

pub fn cohort_stats(result: &SimulationResult) -> Vec<CohortStat> {
    result
        .cohorts
        .iter()
        .map(|cohort| CohortStat {
            start_date: cohort.start_date,
            success: cohort.succeeded(),
            end_balance: cohort.end_balance(),
            min_withdrawal: finite_min(cohort.years.iter().map(|year| year.withdrawal_target)),
        })
        .collect()
}

/// Failed cohorts, worst ending balance first.
pub fn failed_cohorts(result: &SimulationResult) -> Vec<CohortStat> {
    let mut failed: Vec<CohortStat> = cohort_stats(result)
        .into_iter()
        .filter(|stat| !stat.success)
        .collect();
    failed.sort_by(|a, b| a.end_balance.total_cmp(&b.end_balance));
    failed
}

fn finite_min(values: impl Iterator<Item = f64>) -> f64 {
    let min = values.fold(f64::INFINITY, f64::min);
    if min.is_finite() { min } else { 0.0 }
}

pub(crate) fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
