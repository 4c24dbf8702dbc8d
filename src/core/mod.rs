mod engine;
mod error;
mod gross_up;
mod market;
mod portfolio;
mod private_stock;
mod solver;
mod strategy;
mod tax;
mod tax_rules;
mod types;

pub use engine::{BacktestEngine, calculate_stats, cohort_stats, failed_cohorts, real_withdrawals};
pub use error::{ConfigError, MarketDataError};
pub use gross_up::{GrossUpConfig, GrossUpSolution, GrossUpTrial, solve_gross_withdrawal};
pub use market::{
    InflationHistory, InflationPath, MonthlyReturns, load_cpi_csv, load_price_csv,
    read_dated_column,
};
pub use portfolio::{DrawPlan, Portfolio};
pub use private_stock::{PrivateStockManager, StockSale};
pub use solver::{GoalSolveConfig, GoalSolveIteration, GoalSolveResult, GoalType, solve_goal};
pub use strategy::{
    ConstantDollar, Endowment, EssentialDiscretionary, GuytonKlinger, PercentOfPortfolio,
    ScheduleOnly, SpendingBounds, StrategyKind, StrategyParams, Vpw, WithdrawalRequest,
    WithdrawalStrategy, annuity_withdrawal_rate, build_strategy,
};
pub use tax::{FilingStatus, Jurisdiction, TaxEngine, TaxInputs, TaxResult, calculate_taxes};
pub use types::{
    BacktestStats, CohortPath, CohortStat, CohortYear, DiversificationWindow, EarlyAccessPolicy,
    IncomeStream, PrivateStock, SimulationConfig, SimulationResult, SpendingSchedule,
    WithdrawalResult,
};
