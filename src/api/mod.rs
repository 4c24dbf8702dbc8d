use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    BacktestEngine, BacktestStats, CohortStat, EarlyAccessPolicy, FilingStatus, GoalSolveConfig,
    GoalSolveResult, GoalType, InflationHistory, IncomeStream, Jurisdiction, MonthlyReturns,
    PrivateStock, SimulationConfig, SimulationResult, SpendingSchedule, StrategyKind,
    StrategyParams, TaxEngine, TaxInputs, TaxResult, WithdrawalStrategy, build_strategy,
    calculate_stats, cohort_stats, failed_cohorts, load_cpi_csv, load_price_csv, solve_goal,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliStrategy {
    ScheduleOnly,
    ConstantDollar,
    PercentOfPortfolio,
    Endowment,
    Vpw,
    GuytonKlinger,
    EssentialDiscretionary,
}

impl From<CliStrategy> for StrategyKind {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::ScheduleOnly => StrategyKind::ScheduleOnly,
            CliStrategy::ConstantDollar => StrategyKind::ConstantDollar,
            CliStrategy::PercentOfPortfolio => StrategyKind::PercentOfPortfolio,
            CliStrategy::Endowment => StrategyKind::Endowment,
            CliStrategy::Vpw => StrategyKind::Vpw,
            CliStrategy::GuytonKlinger => StrategyKind::GuytonKlinger,
            CliStrategy::EssentialDiscretionary => StrategyKind::EssentialDiscretionary,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliJurisdiction {
    California,
    Alabama,
    /// Federal and payroll tax only.
    Other,
}

impl From<CliJurisdiction> for Jurisdiction {
    fn from(value: CliJurisdiction) -> Self {
        match value {
            CliJurisdiction::California => Jurisdiction::California,
            CliJurisdiction::Alabama => Jurisdiction::Alabama,
            CliJurisdiction::Other => Jurisdiction::Unmodeled,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliGoal {
    TargetPortfolio,
    SafeWithdrawalRate,
}

impl From<CliGoal> for GoalType {
    fn from(value: CliGoal) -> Self {
        match value {
            CliGoal::TargetPortfolio => GoalType::TargetPortfolio,
            CliGoal::SafeWithdrawalRate => GoalType::SafeWithdrawalRate,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiStrategy {
    #[serde(alias = "scheduleOnly", alias = "schedule_only")]
    ScheduleOnly,
    #[serde(alias = "constantDollar", alias = "constant_dollar")]
    ConstantDollar,
    #[serde(alias = "percentOfPortfolio", alias = "percent_of_portfolio", alias = "percent")]
    PercentOfPortfolio,
    Endowment,
    Vpw,
    #[serde(alias = "guytonKlinger", alias = "guyton_klinger")]
    GuytonKlinger,
    #[serde(alias = "essentialDiscretionary", alias = "essential_discretionary")]
    EssentialDiscretionary,
}

impl From<ApiStrategy> for CliStrategy {
    fn from(value: ApiStrategy) -> Self {
        match value {
            ApiStrategy::ScheduleOnly => CliStrategy::ScheduleOnly,
            ApiStrategy::ConstantDollar => CliStrategy::ConstantDollar,
            ApiStrategy::PercentOfPortfolio => CliStrategy::PercentOfPortfolio,
            ApiStrategy::Endowment => CliStrategy::Endowment,
            ApiStrategy::Vpw => CliStrategy::Vpw,
            ApiStrategy::GuytonKlinger => CliStrategy::GuytonKlinger,
            ApiStrategy::EssentialDiscretionary => CliStrategy::EssentialDiscretionary,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiJurisdiction {
    #[serde(alias = "California", alias = "CA", alias = "ca")]
    California,
    #[serde(alias = "Alabama", alias = "AL", alias = "al")]
    Alabama,
    #[serde(alias = "Other", alias = "none", alias = "unmodeled")]
    Other,
}

impl From<ApiJurisdiction> for CliJurisdiction {
    fn from(value: ApiJurisdiction) -> Self {
        match value {
            ApiJurisdiction::California => CliJurisdiction::California,
            ApiJurisdiction::Alabama => CliJurisdiction::Alabama,
            ApiJurisdiction::Other => CliJurisdiction::Other,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiGoal {
    #[serde(alias = "targetPortfolio", alias = "target_portfolio")]
    TargetPortfolio,
    #[serde(alias = "safeWithdrawalRate", alias = "safe_withdrawal_rate", alias = "swr")]
    SafeWithdrawalRate,
}

impl From<ApiGoal> for CliGoal {
    fn from(value: ApiGoal) -> Self {
        match value {
            ApiGoal::TargetPortfolio => CliGoal::TargetPortfolio,
            ApiGoal::SafeWithdrawalRate => CliGoal::SafeWithdrawalRate,
        }
    }
}

/// One outside income source. On the command line it is written
/// `name:start_year:end_year:annual_amount[:untaxed]`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeArg {
    pub name: String,
    pub start_year: i32,
    pub end_year: i32,
    pub annual_amount: f64,
    #[serde(default = "default_taxable")]
    pub taxable: bool,
}

fn default_taxable() -> bool {
    true
}

impl FromStr for IncomeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(format!(
                "income '{s}' must look like name:start_year:end_year:annual_amount[:untaxed]"
            ));
        }
        let taxable = match parts.get(4) {
            None | Some(&"taxed") | Some(&"taxable") => true,
            Some(&"untaxed") => false,
            Some(other) => return Err(format!("unknown income flag '{other}'")),
        };
        Ok(IncomeArg {
            name: parts[0].to_string(),
            start_year: parts[1]
                .parse()
                .map_err(|_| format!("income '{s}' has an invalid start year"))?,
            end_year: parts[2]
                .parse()
                .map_err(|_| format!("income '{s}' has an invalid end year"))?,
            annual_amount: parts[3]
                .parse()
                .map_err(|_| format!("income '{s}' has an invalid annual amount"))?,
            taxable,
        })
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "fire_backtest",
    about = "Historical backtester for retirement withdrawal strategies (US tax, liquid + retirement accounts)"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "fire_backtest=info",
        help = "Log filter used when RUST_LOG is not set"
    )]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API over HTTP.
    Serve(ServeArgs),
    /// Backtest one strategy and print the statistics as JSON.
    Run(RunArgs),
    /// Solve for a target portfolio or a safe withdrawal rate.
    Solve(SolveArgs),
    /// Print a single-year tax projection as JSON.
    Tax(TaxArgs),
}

#[derive(Args, Debug, Clone)]
pub struct MarketArgs {
    #[arg(long, help = "CSV of dated stock prices with Date and Close columns")]
    pub prices: PathBuf,
    #[arg(long, help = "CSV of dated CPI levels with Date and CPI columns")]
    pub inflation: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = 80.0,
        help = "Share of the portfolio in stocks in percent; the rest earns the bond return"
    )]
    pub stock_allocation: f64,
    #[arg(long, default_value_t = 4.0, help = "Fixed annual bond return in percent")]
    pub bond_return: f64,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub market: MarketArgs,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub market: MarketArgs,
    #[command(flatten)]
    pub backtest: BacktestArgs,
    #[arg(long, help = "Include every cohort's monthly balances and yearly rows")]
    pub include_paths: bool,
}

#[derive(Args, Debug)]
pub struct SolveArgs {
    #[command(flatten)]
    pub market: MarketArgs,
    #[command(flatten)]
    pub backtest: BacktestArgs,
    #[command(flatten)]
    pub goal: GoalArgs,
}

#[derive(Args, Debug, Clone)]
pub struct GoalArgs {
    #[arg(long, value_enum, default_value_t = CliGoal::TargetPortfolio)]
    pub goal: CliGoal,
    #[arg(
        long,
        default_value_t = 95.0,
        help = "Required share of successful cohorts in percent"
    )]
    pub target_success_rate: f64,
    #[arg(
        long,
        help = "Lower search bound: dollars for target-portfolio, percent for safe-withdrawal-rate"
    )]
    pub search_min: Option<f64>,
    #[arg(long, help = "Upper search bound, same units as --search-min")]
    pub search_max: Option<f64>,
    #[arg(long, help = "Stop once the bracket is this narrow, same units as --search-min")]
    pub tolerance: Option<f64>,
    #[arg(long, default_value_t = 20)]
    pub max_iterations: u32,
}

#[derive(Args, Debug, Clone)]
pub struct TaxArgs {
    #[arg(long, default_value_t = 0.0, help = "Wages and other ordinary income")]
    pub ordinary: f64,
    #[arg(long, default_value_t = 0.0, help = "Long-term capital gains")]
    pub ltcg: f64,
    #[arg(long, default_value_t = 0.0, help = "ISO bargain element (AMT preference)")]
    pub iso_spread: f64,
    #[arg(long, default_value_t = 0.0)]
    pub amt_adjustment: f64,
    #[arg(long, value_enum, default_value_t = CliJurisdiction::California)]
    pub jurisdiction: CliJurisdiction,
}

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    #[arg(long, default_value_t = 1_000_000.0, help = "Taxable brokerage balance")]
    pub initial_liquid: f64,
    #[arg(long, default_value_t = 0.0, help = "Tax-deferred retirement balance")]
    pub initial_retirement: f64,
    #[arg(long, default_value_t = 30)]
    pub duration_years: u32,
    #[arg(
        long,
        default_value_t = 40_000.0,
        help = "First-year spend when no spending schedule is given"
    )]
    pub annual_withdrawal: f64,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Real spend per retirement year, comma separated"
    )]
    pub spending_schedule: Vec<f64>,
    #[arg(long, value_delimiter = ',', help = "Essential real spend per year")]
    pub essential_schedule: Vec<f64>,
    #[arg(long, value_delimiter = ',', help = "Discretionary real spend per year")]
    pub discretionary_schedule: Vec<f64>,
    #[arg(long, default_value_t = 40)]
    pub current_age: u32,
    #[arg(long, default_value_t = 2025, help = "Calendar year of the first retirement year")]
    pub start_year: i32,
    #[arg(long, value_enum, default_value_t = CliJurisdiction::California)]
    pub jurisdiction: CliJurisdiction,
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Allow drawing the retirement account before --access-age"
    )]
    pub allow_early_access: bool,
    #[arg(long, default_value_t = 10.0, help = "Early withdrawal penalty in percent")]
    pub early_penalty_rate: f64,
    #[arg(long, default_value_t = 60)]
    pub access_age: u32,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Assumed annual inflation in percent, used where no CPI history exists"
    )]
    pub inflation_rate: f64,
    #[arg(long, value_enum, default_value_t = CliStrategy::ConstantDollar)]
    pub strategy: CliStrategy,
    #[arg(long, help = "Lowest nominal withdrawal allowed")]
    pub min_withdrawal: Option<f64>,
    #[arg(long, help = "Highest nominal withdrawal allowed")]
    pub max_withdrawal: Option<f64>,
    #[arg(
        long,
        help = "Flexible floor in percent of the scheduled spend; omit for a hard floor"
    )]
    pub flexible_floor: Option<f64>,
    #[arg(long, default_value_t = 4.0, help = "Percent of portfolio / endowment rate in percent")]
    pub withdrawal_percentage: f64,
    #[arg(long, help = "Age VPW tables start from; defaults to --current-age")]
    pub vpw_start_age: Option<u32>,
    #[arg(long, default_value_t = 100)]
    pub vpw_max_age: u32,
    #[arg(long, default_value_t = 4.0, help = "Guyton-Klinger initial withdrawal rate in percent")]
    pub gk_initial_rate: f64,
    #[arg(long, default_value_t = 20.0, help = "Guyton-Klinger upper guardrail in percent")]
    pub gk_upper_guardrail: f64,
    #[arg(long, default_value_t = 20.0, help = "Guyton-Klinger lower guardrail in percent")]
    pub gk_lower_guardrail: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Essential + discretionary: portfolio rate that funds discretionary spend, in percent"
    )]
    pub safe_withdrawal_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Private company shares held")]
    pub stock_shares: f64,
    #[arg(long, help = "IPO year; required when --stock-shares > 0")]
    pub ipo_year: Option<i32>,
    #[arg(long, default_value_t = 0.0)]
    pub ipo_price: f64,
    #[arg(long, help = "First year of the post-IPO selling window")]
    pub diversification_start: Option<i32>,
    #[arg(long, help = "Length of the selling window in years")]
    pub diversification_years: Option<u32>,
    #[arg(long, default_value_t = 1.0, help = "Private stock return relative to the market")]
    pub stock_growth_multiplier: f64,
    #[arg(long = "income", help = "name:start_year:end_year:annual_amount[:untaxed]")]
    pub income_streams: Vec<IncomeArg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BacktestPayload {
    initial_liquid: Option<f64>,
    initial_retirement: Option<f64>,
    duration_years: Option<u32>,
    annual_withdrawal: Option<f64>,
    spending_schedule: Option<Vec<f64>>,
    essential_schedule: Option<Vec<f64>>,
    discretionary_schedule: Option<Vec<f64>>,
    current_age: Option<u32>,
    start_year: Option<i32>,
    jurisdiction: Option<ApiJurisdiction>,
    allow_early_access: Option<bool>,
    early_penalty_rate: Option<f64>,
    access_age: Option<u32>,
    inflation_rate: Option<f64>,

    strategy: Option<ApiStrategy>,
    min_withdrawal: Option<f64>,
    max_withdrawal: Option<f64>,
    flexible_floor: Option<f64>,
    withdrawal_percentage: Option<f64>,
    vpw_start_age: Option<u32>,
    vpw_max_age: Option<u32>,
    gk_initial_rate: Option<f64>,
    gk_upper_guardrail: Option<f64>,
    gk_lower_guardrail: Option<f64>,
    safe_withdrawal_rate: Option<f64>,

    stock_shares: Option<f64>,
    ipo_year: Option<i32>,
    ipo_price: Option<f64>,
    diversification_start: Option<i32>,
    diversification_years: Option<u32>,
    stock_growth_multiplier: Option<f64>,

    income_streams: Option<Vec<IncomeArg>>,
    include_paths: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolvePayload {
    #[serde(flatten)]
    backtest: BacktestPayload,
    goal: Option<ApiGoal>,
    target_success_rate: Option<f64>,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TaxPayload {
    ordinary: Option<f64>,
    ltcg: Option<f64>,
    iso_spread: Option<f64>,
    amt_adjustment: Option<f64>,
    jurisdiction: Option<ApiJurisdiction>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub strategy: StrategyKind,
    pub cohort_count: usize,
    pub stats: Option<BacktestStats>,
    pub cohorts: Vec<CohortStat>,
    pub failed_cohorts: Vec<CohortStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SimulationResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StrategyInfo {
    id: StrategyKind,
    name: &'static str,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

struct AppState {
    engine: BacktestEngine,
}

pub async fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Serve(args) => {
            let engine = load_engine(&args.market)?;
            run_http_server(engine, args.port)
                .await
                .map_err(|e| format!("Server error: {e}"))
        }
        Command::Run(args) => {
            let engine = load_engine(&args.market)?;
            let report = run_backtest(&engine, &args.backtest, args.include_paths)?;
            print_json(&report)
        }
        Command::Solve(args) => {
            let engine = load_engine(&args.market)?;
            let result = run_solver(&engine, &args.backtest, &args.goal)?;
            print_json(&result)
        }
        Command::Tax(args) => print_json(&run_tax(&args)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

pub fn load_engine(market: &MarketArgs) -> Result<BacktestEngine, String> {
    if !(0.0..=100.0).contains(&market.stock_allocation) {
        return Err("--stock-allocation must be between 0 and 100".to_string());
    }
    if !market.bond_return.is_finite() || market.bond_return <= -50.0 {
        return Err("--bond-return must be > -50".to_string());
    }

    let prices = load_price_csv(&market.prices)
        .map_err(|e| format!("failed to load {}: {e}", market.prices.display()))?;
    let returns = MonthlyReturns::from_prices(&prices)
        .map_err(|e| format!("failed to load {}: {e}", market.prices.display()))?;
    info!(
        path = %market.prices.display(),
        months = returns.len(),
        "loaded monthly returns"
    );

    let mut engine = BacktestEngine::new(
        returns,
        market.stock_allocation / 100.0,
        market.bond_return / 100.0,
    )
    .map_err(|e| e.to_string())?;

    if let Some(path) = &market.inflation {
        let levels =
            load_cpi_csv(path).map_err(|e| format!("failed to load {}: {e}", path.display()))?;
        let history = InflationHistory::from_cpi_levels(&levels)
            .map_err(|e| format!("failed to load {}: {e}", path.display()))?;
        info!(path = %path.display(), months = history.len(), "loaded inflation history");
        engine = engine.with_inflation_history(history);
    }
    Ok(engine)
}

fn build_config(args: &BacktestArgs) -> Result<SimulationConfig, String> {
    for (name, value) in [
        ("--initial-liquid", args.initial_liquid),
        ("--initial-retirement", args.initial_retirement),
        ("--annual-withdrawal", args.annual_withdrawal),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if args.duration_years == 0 {
        return Err("--duration-years must be > 0".to_string());
    }

    if !(0.0..=100.0).contains(&args.early_penalty_rate) {
        return Err("--early-penalty-rate must be between 0 and 100".to_string());
    }

    if !args.inflation_rate.is_finite() || args.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    let spending_schedule = build_schedule(args)?;

    let private_stock = if args.stock_shares > 0.0 {
        let Some(ipo_year) = args.ipo_year else {
            return Err("--ipo-year is required when --stock-shares > 0".to_string());
        };
        Some(
            PrivateStock::new(
                args.stock_shares,
                ipo_year,
                args.ipo_price,
                args.diversification_start,
                args.diversification_years,
                args.stock_growth_multiplier,
            )
            .map_err(|e| e.to_string())?,
        )
    } else if args.stock_shares < 0.0 || args.stock_shares.is_nan() {
        return Err("--stock-shares must be >= 0".to_string());
    } else {
        None
    };

    let income_streams = args
        .income_streams
        .iter()
        .map(|income| {
            IncomeStream::new(
                income.name.clone(),
                income.start_year,
                income.end_year,
                income.annual_amount,
                income.taxable,
            )
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    let config = SimulationConfig {
        initial_liquid: args.initial_liquid,
        initial_retirement: args.initial_retirement,
        duration_years: args.duration_years,
        initial_annual_withdrawal: args.annual_withdrawal,
        spending_schedule,
        current_age: args.current_age,
        private_stock,
        income_streams,
        jurisdiction: args.jurisdiction.into(),
        start_year: args.start_year,
        early_access: EarlyAccessPolicy {
            allow_early_access: args.allow_early_access,
            penalty_rate: args.early_penalty_rate / 100.0,
            access_age: args.access_age,
        },
        assumed_inflation: args.inflation_rate / 100.0,
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn build_schedule(args: &BacktestArgs) -> Result<Option<SpendingSchedule>, String> {
    let has_split = !args.essential_schedule.is_empty() || !args.discretionary_schedule.is_empty();
    if has_split && !args.spending_schedule.is_empty() {
        return Err(
            "--spending-schedule cannot be combined with --essential-schedule/--discretionary-schedule"
                .to_string(),
        );
    }

    if has_split {
        if args.essential_schedule.is_empty() || args.discretionary_schedule.is_empty() {
            return Err(
                "--essential-schedule and --discretionary-schedule must be given together"
                    .to_string(),
            );
        }
        return SpendingSchedule::with_split(
            args.essential_schedule.clone(),
            args.discretionary_schedule.clone(),
        )
        .map(Some)
        .map_err(|e| e.to_string());
    }

    if args.spending_schedule.is_empty() {
        return Ok(None);
    }
    SpendingSchedule::new(args.spending_schedule.clone())
        .map(Some)
        .map_err(|e| e.to_string())
}

fn build_withdrawal_strategy(args: &BacktestArgs) -> Result<Box<dyn WithdrawalStrategy>, String> {
    if let Some(floor) = args.flexible_floor {
        if !(0.0..=100.0).contains(&floor) {
            return Err("--flexible-floor must be between 0 and 100".to_string());
        }
    }
    if !(0.0..=100.0).contains(&args.withdrawal_percentage) {
        return Err("--withdrawal-percentage must be between 0 and 100".to_string());
    }

    let params = StrategyParams {
        min_withdrawal: args.min_withdrawal,
        max_withdrawal: args.max_withdrawal,
        flexible_floor: args.flexible_floor.map(|floor| floor / 100.0),
        withdrawal_percentage: args.withdrawal_percentage / 100.0,
        vpw_start_age: args.vpw_start_age.unwrap_or(args.current_age),
        vpw_max_age: args.vpw_max_age,
        gk_initial_rate: args.gk_initial_rate / 100.0,
        gk_upper_guardrail: args.gk_upper_guardrail / 100.0,
        gk_lower_guardrail: args.gk_lower_guardrail / 100.0,
        safe_withdrawal_rate: args.safe_withdrawal_rate / 100.0,
    };
    build_strategy(args.strategy.into(), &params).map_err(|e| e.to_string())
}

pub fn run_backtest(
    engine: &BacktestEngine,
    args: &BacktestArgs,
    include_paths: bool,
) -> Result<BacktestReport, String> {
    let config = build_config(args)?;
    let strategy = build_withdrawal_strategy(args)?;
    let result = engine
        .run_simulation(&config, strategy.as_ref())
        .map_err(|e| e.to_string())?;

    Ok(BacktestReport {
        strategy: strategy.kind(),
        cohort_count: result.len(),
        stats: calculate_stats(&result),
        cohorts: cohort_stats(&result),
        failed_cohorts: failed_cohorts(&result),
        result: include_paths.then_some(result),
    })
}

fn build_goal_config(args: &GoalArgs, backtest: &BacktestArgs) -> Result<GoalSolveConfig, String> {
    if !(0.0..=100.0).contains(&args.target_success_rate) {
        return Err("--target-success-rate must be between 0 and 100".to_string());
    }
    if args.max_iterations == 0 {
        return Err("--max-iterations must be > 0".to_string());
    }

    let goal_type: GoalType = args.goal.into();
    let spend = backtest
        .spending_schedule
        .first()
        .copied()
        .unwrap_or(backtest.annual_withdrawal);
    let defaults = GoalSolveConfig::defaults_for(goal_type, spend);
    // Rate bounds are entered in percent.
    let scale = match goal_type {
        GoalType::TargetPortfolio => 1.0,
        GoalType::SafeWithdrawalRate => 100.0,
    };
    Ok(GoalSolveConfig {
        goal_type,
        target_success_rate: args.target_success_rate / 100.0,
        search_min: args.search_min.map_or(defaults.search_min, |v| v / scale),
        search_max: args.search_max.map_or(defaults.search_max, |v| v / scale),
        tolerance: args.tolerance.map_or(defaults.tolerance, |v| v / scale),
        max_iterations: args.max_iterations,
    })
}

pub fn run_solver(
    engine: &BacktestEngine,
    backtest: &BacktestArgs,
    goal: &GoalArgs,
) -> Result<GoalSolveResult, String> {
    let config = build_config(backtest)?;
    let goal_config = build_goal_config(goal, backtest)?;
    solve_goal(engine, &config, goal_config)
}

pub fn run_tax(args: &TaxArgs) -> Result<TaxResult, String> {
    for (name, value) in [
        ("--ordinary", args.ordinary),
        ("--ltcg", args.ltcg),
        ("--iso-spread", args.iso_spread),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }
    if !args.amt_adjustment.is_finite() {
        return Err("--amt-adjustment must be finite".to_string());
    }

    let engine = TaxEngine::new(args.jurisdiction.into(), FilingStatus::MarriedJointly);
    Ok(engine.project(&TaxInputs {
        wages: args.ordinary,
        ltcg: args.ltcg,
        iso_spread: args.iso_spread,
        amt_adjustment: args.amt_adjustment,
        ..TaxInputs::default()
    }))
}

pub async fn run_http_server(engine: BacktestEngine, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = Arc::new(AppState { engine });
    let app = Router::new()
        .route(
            "/api/backtest",
            get(backtest_get_handler).post(backtest_post_handler),
        )
        .route("/api/solve", post(solve_handler))
        .route("/api/tax", post(tax_handler))
        .route("/api/strategies", get(strategies_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "backtest HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn strategies_handler() -> Response {
    let strategies: Vec<StrategyInfo> = StrategyKind::all()
        .into_iter()
        .map(|kind| StrategyInfo {
            id: kind,
            name: kind.name(),
            description: kind.description(),
        })
        .collect();
    json_response(StatusCode::OK, strategies)
}

async fn backtest_get_handler(
    State(state): State<Arc<AppState>>,
    Query(payload): Query<BacktestPayload>,
) -> Response {
    backtest_handler_impl(&state, payload)
}

async fn backtest_post_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BacktestPayload>,
) -> Response {
    backtest_handler_impl(&state, payload)
}

fn backtest_handler_impl(state: &AppState, payload: BacktestPayload) -> Response {
    let include_paths = payload.include_paths.unwrap_or(false);
    let args = match backtest_args_from_payload(payload) {
        Ok(args) => args,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match run_backtest(&state.engine, &args, include_paths) {
        Ok(report) => json_response(StatusCode::OK, report),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn solve_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SolvePayload>,
) -> Response {
    solve_handler_impl(&state, payload)
}

fn solve_handler_impl(state: &AppState, payload: SolvePayload) -> Response {
    let (backtest, goal) = match solve_args_from_payload(payload) {
        Ok(args) => args,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match run_solver(&state.engine, &backtest, &goal) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn tax_handler(Json(payload): Json<TaxPayload>) -> Response {
    match run_tax(&tax_args_from_payload(payload)) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn backtest_args_from_payload(payload: BacktestPayload) -> Result<BacktestArgs, String> {
    let mut args = default_args_for_api();

    if let Some(v) = payload.initial_liquid {
        args.initial_liquid = v;
    }
    if let Some(v) = payload.initial_retirement {
        args.initial_retirement = v;
    }
    if let Some(v) = payload.duration_years {
        args.duration_years = v;
    }
    if let Some(v) = payload.annual_withdrawal {
        args.annual_withdrawal = v;
    }
    if let Some(v) = payload.spending_schedule {
        args.spending_schedule = v;
    }
    if let Some(v) = payload.essential_schedule {
        args.essential_schedule = v;
    }
    if let Some(v) = payload.discretionary_schedule {
        args.discretionary_schedule = v;
    }
    if let Some(v) = payload.current_age {
        args.current_age = v;
    }
    if let Some(v) = payload.start_year {
        args.start_year = v;
    }
    if let Some(v) = payload.jurisdiction {
        args.jurisdiction = v.into();
    }
    if let Some(v) = payload.allow_early_access {
        args.allow_early_access = v;
    }
    if let Some(v) = payload.early_penalty_rate {
        args.early_penalty_rate = v;
    }
    if let Some(v) = payload.access_age {
        args.access_age = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }

    if let Some(v) = payload.strategy {
        args.strategy = v.into();
    }
    if let Some(v) = payload.min_withdrawal {
        args.min_withdrawal = Some(v);
    }
    if let Some(v) = payload.max_withdrawal {
        args.max_withdrawal = Some(v);
    }
    if let Some(v) = payload.flexible_floor {
        args.flexible_floor = Some(v);
    }
    if let Some(v) = payload.withdrawal_percentage {
        args.withdrawal_percentage = v;
    }
    if let Some(v) = payload.vpw_start_age {
        args.vpw_start_age = Some(v);
    }
    if let Some(v) = payload.vpw_max_age {
        args.vpw_max_age = v;
    }
    if let Some(v) = payload.gk_initial_rate {
        args.gk_initial_rate = v;
    }
    if let Some(v) = payload.gk_upper_guardrail {
        args.gk_upper_guardrail = v;
    }
    if let Some(v) = payload.gk_lower_guardrail {
        args.gk_lower_guardrail = v;
    }
    if let Some(v) = payload.safe_withdrawal_rate {
        args.safe_withdrawal_rate = v;
    }

    if let Some(v) = payload.stock_shares {
        args.stock_shares = v;
    }
    if let Some(v) = payload.ipo_year {
        args.ipo_year = Some(v);
    }
    if let Some(v) = payload.ipo_price {
        args.ipo_price = v;
    }
    if let Some(v) = payload.diversification_start {
        args.diversification_start = Some(v);
    }
    if let Some(v) = payload.diversification_years {
        args.diversification_years = Some(v);
    }
    if let Some(v) = payload.stock_growth_multiplier {
        args.stock_growth_multiplier = v;
    }
    if let Some(v) = payload.income_streams {
        args.income_streams = v;
    }

    build_config(&args)?;
    Ok(args)
}

fn solve_args_from_payload(payload: SolvePayload) -> Result<(BacktestArgs, GoalArgs), String> {
    let backtest = backtest_args_from_payload(payload.backtest)?;
    let mut goal = GoalArgs {
        goal: CliGoal::TargetPortfolio,
        target_success_rate: 95.0,
        search_min: None,
        search_max: None,
        tolerance: None,
        max_iterations: 20,
    };

    if let Some(v) = payload.goal {
        goal.goal = v.into();
    }
    if let Some(v) = payload.target_success_rate {
        goal.target_success_rate = v;
    }
    if let Some(v) = payload.search_min {
        goal.search_min = Some(v);
    }
    if let Some(v) = payload.search_max {
        goal.search_max = Some(v);
    }
    if let Some(v) = payload.tolerance {
        goal.tolerance = Some(v);
    }
    if let Some(v) = payload.max_iterations {
        goal.max_iterations = v;
    }

    build_goal_config(&goal, &backtest)?;
    Ok((backtest, goal))
}

fn tax_args_from_payload(payload: TaxPayload) -> TaxArgs {
    TaxArgs {
        ordinary: payload.ordinary.unwrap_or(0.0),
        ltcg: payload.ltcg.unwrap_or(0.0),
        iso_spread: payload.iso_spread.unwrap_or(0.0),
        amt_adjustment: payload.amt_adjustment.unwrap_or(0.0),
        jurisdiction: payload
            .jurisdiction
            .map_or(CliJurisdiction::California, Into::into),
    }
}

fn default_args_for_api() -> BacktestArgs {
    BacktestArgs {
        initial_liquid: 1_000_000.0,
        initial_retirement: 0.0,
        duration_years: 30,
        annual_withdrawal: 40_000.0,
        spending_schedule: Vec::new(),
        essential_schedule: Vec::new(),
        discretionary_schedule: Vec::new(),
        current_age: 40,
        start_year: 2025,
        jurisdiction: CliJurisdiction::California,
        allow_early_access: true,
        early_penalty_rate: 10.0,
        access_age: 60,
        inflation_rate: 3.0,
        strategy: CliStrategy::ConstantDollar,
        min_withdrawal: None,
        max_withdrawal: None,
        flexible_floor: None,
        withdrawal_percentage: 4.0,
        vpw_start_age: None,
        vpw_max_age: 100,
        gk_initial_rate: 4.0,
        gk_upper_guardrail: 20.0,
        gk_lower_guardrail: 20.0,
        safe_withdrawal_rate: 4.0,
        stock_shares: 0.0,
        ipo_year: None,
        ipo_price: 0.0,
        diversification_start: None,
        diversification_years: None,
        stock_growth_multiplier: 1.0,
        income_streams: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_args() -> BacktestArgs {
        default_args_for_api()
    }

    fn backtest_args_from_json(json: &str) -> Result<BacktestArgs, String> {
        let payload = serde_json::from_str::<BacktestPayload>(json)
            .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
        backtest_args_from_payload(payload)
    }

    fn flat_engine(months: usize, monthly_return: f64) -> BacktestEngine {
        let returns = MonthlyReturns::from_returns(
            (0..months)
                .map(|i| {
                    let date = NaiveDate::from_ymd_opt(1970 + (i / 12) as i32, (i % 12) as u32 + 1, 28)
                        .unwrap();
                    (date, monthly_return)
                })
                .collect(),
        )
        .unwrap();
        BacktestEngine::new(returns, 1.0, 0.0).unwrap()
    }

    #[test]
    fn income_arg_parses_cli_syntax() {
        let income: IncomeArg = "pension:2040:2070:24000".parse().expect("valid income");
        assert_eq!(income.name, "pension");
        assert_eq!(income.start_year, 2040);
        assert_eq!(income.end_year, 2070);
        assert_approx(income.annual_amount, 24_000.0);
        assert!(income.taxable);

        let gift: IncomeArg = "gift:2030:2030:5000:untaxed".parse().expect("valid income");
        assert!(!gift.taxable);

        assert!("pension:2040".parse::<IncomeArg>().is_err());
        assert!("pension:soon:2070:24000".parse::<IncomeArg>().is_err());
        assert!("pension:2040:2070:24000:maybe".parse::<IncomeArg>().is_err());
    }

    #[test]
    fn cli_parses_run_subcommand_with_percent_flags() {
        let cli = Cli::try_parse_from([
            "fire_backtest",
            "run",
            "--prices",
            "sp500.csv",
            "--stock-allocation",
            "60",
            "--strategy",
            "guyton-klinger",
            "--spending-schedule",
            "50000,52000,54000",
            "--income",
            "pension:2040:2070:24000",
            "--allow-early-access",
            "false",
        ])
        .expect("cli should parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(cli.log_level, "fire_backtest=info");
        assert_approx(args.market.stock_allocation, 60.0);
        assert_eq!(args.backtest.strategy, CliStrategy::GuytonKlinger);
        assert_eq!(args.backtest.spending_schedule, vec![50_000.0, 52_000.0, 54_000.0]);
        assert_eq!(args.backtest.income_streams.len(), 1);
        assert!(!args.backtest.allow_early_access);

        let config = build_config(&args.backtest).expect("valid config");
        assert!(!config.early_access.allow_early_access);
        assert_approx(config.assumed_inflation, 0.03);
        assert_approx(config.early_access.penalty_rate, 0.10);
        assert_eq!(config.spending_schedule.map(|s| s.len()), Some(3));
    }

    #[test]
    fn build_config_rejects_negative_balance() {
        let mut args = sample_args();
        args.initial_liquid = -1.0;
        let err = build_config(&args).expect_err("must reject negative balance");
        assert!(err.contains("--initial-liquid"));
    }

    #[test]
    fn build_config_rejects_zero_duration() {
        let mut args = sample_args();
        args.duration_years = 0;
        let err = build_config(&args).expect_err("must reject zero duration");
        assert!(err.contains("--duration-years"));
    }

    #[test]
    fn build_config_requires_ipo_year_for_private_stock() {
        let mut args = sample_args();
        args.stock_shares = 1_000.0;
        args.ipo_price = 10.0;
        let err = build_config(&args).expect_err("must require ipo year");
        assert!(err.contains("--ipo-year"));

        args.ipo_year = Some(2027);
        let config = build_config(&args).expect("valid config");
        let stock = config.private_stock.expect("stock expected");
        assert_eq!(stock.ipo_year(), 2027);
        assert_approx(stock.shares(), 1_000.0);
    }

    #[test]
    fn build_config_rejects_mixed_schedules() {
        let mut args = sample_args();
        args.spending_schedule = vec![50_000.0];
        args.essential_schedule = vec![30_000.0];
        args.discretionary_schedule = vec![20_000.0];
        let err = build_config(&args).expect_err("must reject mixed schedules");
        assert!(err.contains("--spending-schedule"));

        args.spending_schedule.clear();
        args.discretionary_schedule.clear();
        let err = build_config(&args).expect_err("must require both halves");
        assert!(err.contains("--discretionary-schedule"));
    }

    #[test]
    fn build_config_surfaces_core_validation_messages() {
        let mut args = sample_args();
        args.income_streams = vec![IncomeArg {
            name: "consulting".to_string(),
            start_year: 2030,
            end_year: 2029,
            annual_amount: 10_000.0,
            taxable: true,
        }];
        let err = build_config(&args).expect_err("must reject inverted income range");
        assert!(err.contains("consulting"));
    }

    #[test]
    fn build_withdrawal_strategy_converts_percent_inputs() {
        let mut args = sample_args();
        args.strategy = CliStrategy::PercentOfPortfolio;
        args.withdrawal_percentage = 150.0;
        let err = build_withdrawal_strategy(&args).err().expect("must reject > 100%");
        assert!(err.contains("--withdrawal-percentage"));

        args.withdrawal_percentage = 5.0;
        let strategy = build_withdrawal_strategy(&args).expect("valid strategy");
        assert_eq!(strategy.kind(), StrategyKind::PercentOfPortfolio);

        args.strategy = CliStrategy::ConstantDollar;
        args.min_withdrawal = Some(60_000.0);
        args.max_withdrawal = Some(50_000.0);
        assert!(build_withdrawal_strategy(&args).is_err());
    }

    #[test]
    fn api_payload_overlays_camel_case_keys() {
        let json = r#"{
          "initialLiquid": 750000,
          "initialRetirement": 250000,
          "durationYears": 25,
          "essentialSchedule": [40000, 40000],
          "discretionarySchedule": [10000, 5000],
          "currentAge": 45,
          "jurisdiction": "AL",
          "allowEarlyAccess": false,
          "strategy": "essentialDiscretionary",
          "safeWithdrawalRate": 3.5,
          "flexibleFloor": 90,
          "incomeStreams": [
            {"name": "social security", "startYear": 2047, "endYear": 2075, "annualAmount": 30000}
          ]
        }"#;
        let args = backtest_args_from_json(json).expect("json should parse");
        assert_approx(args.initial_liquid, 750_000.0);
        assert_approx(args.initial_retirement, 250_000.0);
        assert_eq!(args.duration_years, 25);
        assert_eq!(args.current_age, 45);
        assert_eq!(args.jurisdiction, CliJurisdiction::Alabama);
        assert!(!args.allow_early_access);
        assert_eq!(args.strategy, CliStrategy::EssentialDiscretionary);
        assert_approx(args.safe_withdrawal_rate, 3.5);
        assert_eq!(args.flexible_floor, Some(90.0));
        assert_eq!(args.income_streams.len(), 1);
        assert!(args.income_streams[0].taxable);

        let config = build_config(&args).expect("valid config");
        let schedule = config.spending_schedule.expect("schedule expected");
        assert!(schedule.is_split());
        assert_approx(schedule.real_for_year(0), 50_000.0);
        assert_eq!(config.jurisdiction, Jurisdiction::Alabama);
    }

    #[test]
    fn api_payload_rejects_invalid_values() {
        let err = backtest_args_from_json(r#"{"earlyPenaltyRate": 150}"#)
            .expect_err("must reject penalty over 100");
        assert!(err.contains("--early-penalty-rate"));

        let err = backtest_args_from_json(r#"{"strategy": "martingale"}"#)
            .expect_err("must reject unknown strategy");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn solve_payload_uses_percent_rate_bounds() {
        let payload: SolvePayload = serde_json::from_str(
            r#"{"goal": "swr", "searchMin": 2, "searchMax": 8, "targetSuccessRate": 90, "initialLiquid": 500000}"#,
        )
        .expect("json should parse");
        let (backtest, goal) = solve_args_from_payload(payload).expect("valid payload");
        assert_approx(backtest.initial_liquid, 500_000.0);
        let config = build_goal_config(&goal, &backtest).expect("valid goal");
        assert_eq!(config.goal_type, GoalType::SafeWithdrawalRate);
        assert_approx(config.search_min, 0.02);
        assert_approx(config.search_max, 0.08);
        assert_approx(config.target_success_rate, 0.90);
    }

    #[test]
    fn goal_defaults_follow_spend() {
        let mut backtest = sample_args();
        backtest.spending_schedule = vec![60_000.0, 65_000.0];
        let goal = GoalArgs {
            goal: CliGoal::TargetPortfolio,
            target_success_rate: 95.0,
            search_min: None,
            search_max: None,
            tolerance: None,
            max_iterations: 20,
        };
        let config = build_goal_config(&goal, &backtest).expect("valid goal");
        assert_approx(config.search_min, 600_000.0);
        assert_approx(config.search_max, 3_600_000.0);

        let err = build_goal_config(
            &GoalArgs {
                target_success_rate: 101.0,
                ..goal
            },
            &backtest,
        )
        .expect_err("must reject rate over 100");
        assert!(err.contains("--target-success-rate"));
    }

    #[test]
    fn run_tax_projects_wages_and_gains() {
        let result = run_tax(&TaxArgs {
            ordinary: 200_000.0,
            ltcg: 50_000.0,
            iso_spread: 0.0,
            amt_adjustment: 0.0,
            jurisdiction: CliJurisdiction::Other,
        })
        .expect("valid tax args");
        assert!(result.total_tax > 0.0);
        assert_approx(result.state_tax, 0.0);
        assert!(result.payroll_tax > 0.0);

        let err = run_tax(&TaxArgs {
            ordinary: -1.0,
            ltcg: 0.0,
            iso_spread: 0.0,
            amt_adjustment: 0.0,
            jurisdiction: CliJurisdiction::California,
        })
        .expect_err("must reject negative income");
        assert!(err.contains("--ordinary"));
    }

    #[test]
    fn tax_payload_defaults_to_california() {
        let payload: TaxPayload =
            serde_json::from_str(r#"{"ordinary": 100000}"#).expect("json should parse");
        let args = tax_args_from_payload(payload);
        assert_eq!(args.jurisdiction, CliJurisdiction::California);
        assert_approx(args.ordinary, 100_000.0);
        assert_approx(args.ltcg, 0.0);
    }

    #[test]
    fn run_backtest_reports_stats_and_cohorts() {
        let engine = flat_engine(36, 0.0);
        let mut args = sample_args();
        args.duration_years = 2;
        args.jurisdiction = CliJurisdiction::Other;
        args.inflation_rate = 0.0;

        let report = run_backtest(&engine, &args, false).expect("backtest should run");
        assert_eq!(report.strategy, StrategyKind::ConstantDollar);
        assert_eq!(report.cohort_count, 2);
        assert_eq!(report.cohorts.len(), 2);
        assert!(report.failed_cohorts.is_empty());
        assert!(report.result.is_none());
        let stats = report.stats.expect("stats expected");
        assert_approx(stats.success_rate, 1.0);

        let with_paths = run_backtest(&engine, &args, true).expect("backtest should run");
        let result = with_paths.result.expect("paths requested");
        assert_eq!(result.cohorts[0].balances.len(), 25);
    }

    #[test]
    fn report_serialization_uses_camel_case() {
        let engine = flat_engine(24, 0.0);
        let mut args = sample_args();
        args.duration_years = 2;
        args.initial_liquid = 10_000.0;
        args.jurisdiction = CliJurisdiction::Other;

        let report = run_backtest(&engine, &args, false).expect("backtest should run");
        let value = serde_json::to_value(&report).expect("report should serialize");
        assert_eq!(value["strategy"], "constant-dollar");
        assert_eq!(value["cohortCount"], 1);
        assert!(value["stats"]["successRate"].is_number());
        assert_eq!(value["failedCohorts"].as_array().map(Vec::len), Some(1));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn handlers_map_errors_to_bad_request() {
        let state = AppState {
            engine: flat_engine(24, 0.0),
        };
        let ok = backtest_handler_impl(
            &state,
            BacktestPayload {
                duration_years: Some(2),
                ..BacktestPayload::default()
            },
        );
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(
            ok.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );

        let bad = backtest_handler_impl(
            &state,
            BacktestPayload {
                duration_years: Some(0),
                ..BacktestPayload::default()
            },
        );
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let unsolvable = solve_handler_impl(
            &state,
            SolvePayload {
                backtest: BacktestPayload {
                    duration_years: Some(5),
                    ..BacktestPayload::default()
                },
                ..SolvePayload::default()
            },
        );
        assert_eq!(unsolvable.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn load_engine_reads_price_and_cpi_files() {
        let dir = std::env::temp_dir().join(format!("fire_backtest_api_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let prices = dir.join("prices.csv");
        let cpi = dir.join("cpi.csv");
        fs::write(
            &prices,
            "Date,Close\n2000-01-31,100\n2000-02-29,110\n2000-03-31,99\n",
        )
        .expect("write prices");
        fs::write(&cpi, "Date,CPI\n2000-01-01,100\n2000-02-01,101\n").expect("write cpi");

        let mut market = MarketArgs {
            prices: prices.clone(),
            inflation: Some(cpi),
            stock_allocation: 60.0,
            bond_return: 4.0,
        };
        let engine = load_engine(&market).expect("engine should load");
        assert_eq!(engine.returns().len(), 2);
        assert_approx(engine.returns().returns()[0], 0.10);
        assert_approx(engine.stock_allocation(), 0.6);

        market.stock_allocation = 120.0;
        let err = load_engine(&market).err().expect("must reject allocation");
        assert!(err.contains("--stock-allocation"));

        market.stock_allocation = 60.0;
        market.prices = dir.join("missing.csv");
        let err = load_engine(&market).err().expect("must report missing file");
        assert!(err.contains("missing.csv"));

        let _ = fs::remove_dir_all(&dir);
    }
}
