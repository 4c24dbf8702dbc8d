use chrono::NaiveDate;
use serde::Serialize;

use super::error::{ConfigError, in_range, non_negative};
use super::tax::Jurisdiction;

/// Real (year-0 dollar) spending requirement per simulated year, optionally
/// split into essential and discretionary parts.
#[derive(Debug, Clone, PartialEq)]
pub struct SpendingSchedule {
    total: Vec<f64>,
    split: Option<(Vec<f64>, Vec<f64>)>,
}

impl SpendingSchedule {
    pub fn new(total: Vec<f64>) -> Result<Self, ConfigError> {
        validate_series(&total)?;
        Ok(Self { total, split: None })
    }

    pub fn with_split(essential: Vec<f64>, discretionary: Vec<f64>) -> Result<Self, ConfigError> {
        if essential.len() != discretionary.len() {
            return Err(ConfigError::ScheduleSplitMismatch {
                essential: essential.len(),
                discretionary: discretionary.len(),
            });
        }
        validate_series(&essential)?;
        validate_series(&discretionary)?;
        let total = essential
            .iter()
            .zip(&discretionary)
            .map(|(e, d)| e + d)
            .collect();
        Ok(Self {
            total,
            split: Some((essential, discretionary)),
        })
    }

    pub fn len(&self) -> usize {
        self.total.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_empty()
    }

    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }

    pub fn first(&self) -> f64 {
        self.real_for_year(0)
    }

    /// Years past the end repeat the final value.
    pub fn real_for_year(&self, year: usize) -> f64 {
        at_or_last(&self.total, year)
    }

    /// Without a split the whole requirement is essential.
    pub fn essential_for_year(&self, year: usize) -> f64 {
        match &self.split {
            Some((essential, _)) => at_or_last(essential, year),
            None => self.real_for_year(year),
        }
    }

    pub fn discretionary_for_year(&self, year: usize) -> f64 {
        match &self.split {
            Some((_, discretionary)) => at_or_last(discretionary, year),
            None => 0.0,
        }
    }
}

fn validate_series(values: &[f64]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::EmptySchedule);
    }
    for value in values {
        non_negative("spending_schedule", *value)?;
    }
    Ok(())
}

fn at_or_last(values: &[f64], year: usize) -> f64 {
    values
        .get(year)
        .or_else(|| values.last())
        .copied()
        .unwrap_or(0.0)
}

/// Fixed nominal income over an inclusive calendar-year range.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomeStream {
    name: String,
    start_year: i32,
    end_year: i32,
    annual_amount: f64,
    taxable: bool,
}

impl IncomeStream {
    pub fn new(
        name: impl Into<String>,
        start_year: i32,
        end_year: i32,
        annual_amount: f64,
        taxable: bool,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if end_year < start_year {
            return Err(ConfigError::InvertedIncomeRange {
                name,
                start_year,
                end_year,
            });
        }
        let annual_amount = non_negative("income_stream.annual_amount", annual_amount)?;
        Ok(Self {
            name,
            start_year,
            end_year,
            annual_amount,
            taxable,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    pub fn annual_amount(&self) -> f64 {
        self.annual_amount
    }

    pub fn taxable(&self) -> bool {
        self.taxable
    }

    pub fn is_active(&self, calendar_year: i32) -> bool {
        (self.start_year..=self.end_year).contains(&calendar_year)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiversificationWindow {
    pub start_year: i32,
    pub duration_years: u32,
}

impl DiversificationWindow {
    pub fn end_year(&self) -> i32 {
        self.start_year + self.duration_years as i32 - 1
    }
}

/// Concentrated, zero-basis stock position that becomes sellable at IPO.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateStock {
    shares: f64,
    ipo_year: i32,
    ipo_price: f64,
    diversification: Option<DiversificationWindow>,
    growth_multiplier: f64,
}

impl PrivateStock {
    pub fn new(
        shares: f64,
        ipo_year: i32,
        ipo_price: f64,
        diversification_start_year: Option<i32>,
        diversification_duration: Option<u32>,
        growth_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        let shares = non_negative("private_stock.shares", shares)?;
        let ipo_price = non_negative("private_stock.ipo_price", ipo_price)?;
        let growth_multiplier =
            in_range("private_stock.growth_multiplier", growth_multiplier, -10.0, 10.0)?;
        let diversification = match (diversification_start_year, diversification_duration) {
            (None, None) => None,
            (Some(_), Some(0)) | (None, Some(0)) => {
                return Err(ConfigError::ZeroDiversificationDuration);
            }
            (Some(start_year), Some(duration_years)) => Some(DiversificationWindow {
                start_year,
                duration_years,
            }),
            _ => return Err(ConfigError::IncompleteDiversificationWindow),
        };
        Ok(Self {
            shares,
            ipo_year,
            ipo_price,
            diversification,
            growth_multiplier,
        })
    }

    pub fn shares(&self) -> f64 {
        self.shares
    }

    pub fn ipo_year(&self) -> i32 {
        self.ipo_year
    }

    pub fn ipo_price(&self) -> f64 {
        self.ipo_price
    }

    pub fn diversification(&self) -> Option<DiversificationWindow> {
        self.diversification
    }

    pub fn growth_multiplier(&self) -> f64 {
        self.growth_multiplier
    }
}

/// Rules for reaching the tax-deferred bucket before `access_age`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyAccessPolicy {
    pub allow_early_access: bool,
    pub penalty_rate: f64,
    pub access_age: u32,
}

impl EarlyAccessPolicy {
    pub fn can_access(&self, age: u32) -> bool {
        age >= self.access_age || self.allow_early_access
    }

    pub fn penalty_for(&self, age: u32, from_retirement: f64) -> f64 {
        if age < self.access_age {
            from_retirement * self.penalty_rate
        } else {
            0.0
        }
    }
}

/// Everything one backtest run needs. There is deliberately no `Default`:
/// callers choose every value.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub initial_liquid: f64,
    pub initial_retirement: f64,
    pub duration_years: u32,
    pub initial_annual_withdrawal: f64,
    pub spending_schedule: Option<SpendingSchedule>,
    pub current_age: u32,
    pub private_stock: Option<PrivateStock>,
    pub income_streams: Vec<IncomeStream>,
    pub jurisdiction: Jurisdiction,
    pub start_year: i32,
    pub early_access: EarlyAccessPolicy,
    /// Annual rate used wherever historical inflation is unavailable.
    pub assumed_inflation: f64,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("initial_liquid", self.initial_liquid)?;
        non_negative("initial_retirement", self.initial_retirement)?;
        non_negative("initial_annual_withdrawal", self.initial_annual_withdrawal)?;
        if self.duration_years == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        in_range(
            "early_withdrawal_penalty_rate",
            self.early_access.penalty_rate,
            0.0,
            1.0,
        )?;
        in_range("assumed_inflation", self.assumed_inflation, -0.5, 1.0)?;
        Ok(())
    }

    pub fn months(&self) -> usize {
        self.duration_years as usize * 12
    }
}

/// Outcome of one `Portfolio::withdraw` call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WithdrawalResult {
    pub success: bool,
    pub from_liquid: f64,
    pub from_retirement: f64,
    pub liquid_gains: f64,
    pub early_withdrawal_penalty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortYear {
    pub withdrawal_target: f64,
    pub gross_withdrawal: f64,
    pub tax: f64,
    pub total_income: f64,
    pub portfolio_value: f64,
    pub private_stock_value: f64,
    pub portfolio_gain: f64,
    pub private_stock_gain: f64,
    pub ipo_proceeds: f64,
    pub deposit: f64,
    pub inflation_rate: f64,
}

/// One historical start month replayed over the full duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortPath {
    pub start_date: NaiveDate,
    /// `12 * duration + 1` month-end totals; index 0 is the seed value.
    pub balances: Vec<f64>,
    pub years: Vec<CohortYear>,
    pub failed: bool,
}

impl CohortPath {
    pub fn end_balance(&self) -> f64 {
        self.balances.last().copied().unwrap_or(0.0)
    }

    pub fn succeeded(&self) -> bool {
        self.end_balance() > 0.0
    }

    /// Balance at the end of `year`, aligned with `years[year]`.
    pub fn year_end_balance(&self, year: usize) -> Option<f64> {
        self.balances.get((year + 1) * 12).copied()
    }
}

/// One row per cohort. Empty when history is too short for the duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub cohorts: Vec<CohortPath>,
}

impl SimulationResult {
    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn start_dates(&self) -> Vec<NaiveDate> {
        self.cohorts.iter().map(|cohort| cohort.start_date).collect()
    }

    pub fn balances(&self) -> Vec<&[f64]> {
        self.cohorts
            .iter()
            .map(|cohort| cohort.balances.as_slice())
            .collect()
    }

    pub fn annual_series(&self, field: impl Fn(&CohortYear) -> f64) -> Vec<Vec<f64>> {
        self.cohorts
            .iter()
            .map(|cohort| cohort.years.iter().map(&field).collect())
            .collect()
    }

    pub fn withdrawals(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.withdrawal_target)
    }

    pub fn gross_withdrawals(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.gross_withdrawal)
    }

    pub fn taxes(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.tax)
    }

    pub fn total_income(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.total_income)
    }

    pub fn portfolio_values(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.portfolio_value)
    }

    pub fn private_stock_values(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.private_stock_value)
    }

    pub fn portfolio_gains(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.portfolio_gain)
    }

    pub fn private_stock_gains(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.private_stock_gain)
    }

    pub fn ipo_proceeds(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.ipo_proceeds)
    }

    pub fn deposits(&self) -> Vec<Vec<f64>> {
        self.annual_series(|year| year.deposit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestStats {
    pub success_rate: f64,
    pub median_end_value: f64,
    pub min_end_value: f64,
    pub max_end_value: f64,
    pub min_annual_spend: f64,
    pub median_annual_spend: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStat {
    pub start_date: NaiveDate,
    pub success: bool,
    pub end_balance: f64,
    pub min_withdrawal: f64,
}
