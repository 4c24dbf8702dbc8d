use serde::{Deserialize, Serialize};

use super::error::{ConfigError, in_range, non_negative};
use super::market::InflationPath;
use super::types::SpendingSchedule;

const VPW_REAL_RETURN: f64 = 0.05;
const GUARDRAIL_ADJUSTMENT: f64 = 0.10;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    ScheduleOnly,
    ConstantDollar,
    PercentOfPortfolio,
    Endowment,
    Vpw,
    GuytonKlinger,
    EssentialDiscretionary,
}

impl StrategyKind {
    pub fn all() -> [StrategyKind; 7] {
        [
            StrategyKind::ScheduleOnly,
            StrategyKind::ConstantDollar,
            StrategyKind::PercentOfPortfolio,
            StrategyKind::Endowment,
            StrategyKind::Vpw,
            StrategyKind::GuytonKlinger,
            StrategyKind::EssentialDiscretionary,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::ScheduleOnly => "Schedule Only",
            StrategyKind::ConstantDollar => "Constant Dollar",
            StrategyKind::PercentOfPortfolio => "Percent of Portfolio",
            StrategyKind::Endowment => "Endowment",
            StrategyKind::Vpw => "VPW",
            StrategyKind::GuytonKlinger => "Guyton-Klinger",
            StrategyKind::EssentialDiscretionary => "Essential + Discretionary",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StrategyKind::ScheduleOnly => {
                "Withdraws exactly the inflation-adjusted spending schedule. No limits or flexibility; shows raw sustainability."
            }
            StrategyKind::ConstantDollar => {
                "Targets the scheduled real spend (or the prior year's withdrawal grown by inflation), then applies limits and the schedule floor."
            }
            StrategyKind::PercentOfPortfolio => {
                "Withdraws a fixed percentage of the current portfolio value each year."
            }
            StrategyKind::Endowment => {
                "Fixed percentage of portfolio value, as university endowments do. Currently identical to Percent of Portfolio."
            }
            StrategyKind::Vpw => {
                "Variable Percentage Withdrawal: amortizes the portfolio over the years left until the planning age at a 5% real return."
            }
            StrategyKind::GuytonKlinger => {
                "Inflation-adjusted spending with guardrails: cut 10% when the withdrawal rate rises too far above the initial rate, raise 10% when it falls too far below."
            }
            StrategyKind::EssentialDiscretionary => {
                "Essential spending is always paid; discretionary spending only when the portfolio's safe withdrawal capacity allows."
            }
        }
    }
}

/// Portfolio state handed to a strategy at the start of a simulated year.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalRequest<'a> {
    pub portfolio_value: f64,
    pub year: usize,
    pub initial_withdrawal: f64,
    pub previous_withdrawal: f64,
    pub schedule: Option<&'a SpendingSchedule>,
    pub inflation: &'a InflationPath,
}

impl WithdrawalRequest<'_> {
    /// Schedule value for this year in nominal dollars.
    pub fn scheduled_nominal(&self) -> Option<f64> {
        self.schedule
            .map(|schedule| schedule.real_for_year(self.year) * self.inflation.cumulative(self.year))
    }

    /// Last year's withdrawal grown by last year's inflation.
    pub fn inflated_previous(&self) -> f64 {
        match self.year.checked_sub(1) {
            Some(prior) => self.previous_withdrawal * (1.0 + self.inflation.rate(prior)),
            None => self.initial_withdrawal,
        }
    }

    fn scheduled_or_inflated(&self) -> f64 {
        self.scheduled_nominal()
            .unwrap_or_else(|| self.inflated_previous())
    }
}

/// Optional nominal [min, max] clamp plus the schedule floor. The floor is
/// applied after the clamp, so it wins over `max`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpendingBounds {
    min: Option<f64>,
    max: Option<f64>,
    flexible_floor: Option<f64>,
}

impl SpendingBounds {
    pub fn new(
        min: Option<f64>,
        max: Option<f64>,
        flexible_floor: Option<f64>,
    ) -> Result<Self, ConfigError> {
        if let Some(min) = min {
            non_negative("min_withdrawal", min)?;
        }
        if let Some(max) = max {
            non_negative("max_withdrawal", max)?;
        }
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(ConfigError::InvertedLimits { min, max });
            }
        }
        if let Some(fraction) = flexible_floor {
            in_range("flexible_floor", fraction, 0.0, 1.0)?;
        }
        Ok(Self {
            min,
            max,
            flexible_floor,
        })
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn flexible_floor(&self) -> Option<f64> {
        self.flexible_floor
    }

    pub fn clamp(&self, amount: f64) -> f64 {
        let mut amount = amount;
        if let Some(min) = self.min {
            amount = amount.max(min);
        }
        if let Some(max) = self.max {
            amount = amount.min(max);
        }
        amount
    }

    /// Fraction of the schedule the floor enforces: 1.0 unless flexible.
    pub fn floor_fraction(&self) -> f64 {
        self.flexible_floor.unwrap_or(1.0)
    }

    pub fn apply_floor(&self, amount: f64, request: &WithdrawalRequest<'_>) -> f64 {
        match request.scheduled_nominal() {
            Some(scheduled) => amount.max(scheduled * self.floor_fraction()),
            None => amount,
        }
    }

    pub fn limit_and_floor(&self, amount: f64, request: &WithdrawalRequest<'_>) -> f64 {
        self.apply_floor(self.clamp(amount), request)
    }
}

pub trait WithdrawalStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Nominal withdrawal target for `request.year`.
    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64;

    fn bounds(&self) -> SpendingBounds {
        SpendingBounds::default()
    }

    /// Year-0 draw: the first schedule value if any, else `base`, clamped and
    /// then floored at the (possibly flexible) first schedule value.
    fn initial_withdrawal(&self, base: f64, schedule: Option<&SpendingSchedule>) -> f64 {
        let bounds = self.bounds();
        let start = schedule.map(SpendingSchedule::first).unwrap_or(base);
        let clamped = bounds.clamp(start);
        match schedule {
            Some(schedule) => clamped.max(schedule.first() * bounds.floor_fraction()),
            None => clamped,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleOnly;

impl WithdrawalStrategy for ScheduleOnly {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ScheduleOnly
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        request.scheduled_or_inflated()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantDollar {
    pub bounds: SpendingBounds,
}

impl WithdrawalStrategy for ConstantDollar {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ConstantDollar
    }

    fn bounds(&self) -> SpendingBounds {
        self.bounds
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        self.bounds
            .limit_and_floor(request.scheduled_or_inflated(), request)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PercentOfPortfolio {
    percentage: f64,
    bounds: SpendingBounds,
}

impl PercentOfPortfolio {
    pub fn new(percentage: f64, bounds: SpendingBounds) -> Result<Self, ConfigError> {
        let percentage = in_range("withdrawal_percentage", percentage, 0.0, 1.0)?;
        Ok(Self { percentage, bounds })
    }
}

impl WithdrawalStrategy for PercentOfPortfolio {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PercentOfPortfolio
    }

    fn bounds(&self) -> SpendingBounds {
        self.bounds
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        let amount = request.portfolio_value.max(0.0) * self.percentage;
        self.bounds.limit_and_floor(amount, request)
    }
}

/// Same rule as `PercentOfPortfolio`; reported separately.
#[derive(Debug, Clone, Copy)]
pub struct Endowment {
    inner: PercentOfPortfolio,
}

impl Endowment {
    pub fn new(percentage: f64, bounds: SpendingBounds) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: PercentOfPortfolio::new(percentage, bounds)?,
        })
    }
}

impl WithdrawalStrategy for Endowment {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Endowment
    }

    fn bounds(&self) -> SpendingBounds {
        self.inner.bounds
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        self.inner.calculate_withdrawal(request)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Vpw {
    start_age: u32,
    max_age: u32,
    bounds: SpendingBounds,
}

impl Vpw {
    pub fn new(start_age: u32, max_age: u32, bounds: SpendingBounds) -> Result<Self, ConfigError> {
        if max_age <= start_age {
            return Err(ConfigError::NotAbove {
                field: "vpw_max_age",
                value: max_age as f64,
                min: start_age as f64,
            });
        }
        Ok(Self {
            start_age,
            max_age,
            bounds,
        })
    }

    pub fn rate_for_year(&self, year: usize) -> f64 {
        let age = self.start_age as usize + year;
        let remaining = (self.max_age as usize).saturating_sub(age).max(1);
        annuity_withdrawal_rate(VPW_REAL_RETURN, remaining as u32)
    }
}

impl WithdrawalStrategy for Vpw {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vpw
    }

    fn bounds(&self) -> SpendingBounds {
        self.bounds
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        let amount = request.portfolio_value.max(0.0) * self.rate_for_year(request.year);
        self.bounds.limit_and_floor(amount, request)
    }
}

/// Guardrails are fractions of the initial rate: a current rate above
/// `initial_rate * (1 + lower_guardrail)` cuts spending, one below
/// `initial_rate * (1 - upper_guardrail)` raises it.
#[derive(Debug, Clone, Copy)]
pub struct GuytonKlinger {
    initial_rate: f64,
    upper_guardrail: f64,
    lower_guardrail: f64,
    bounds: SpendingBounds,
}

impl GuytonKlinger {
    pub fn new(
        initial_rate: f64,
        upper_guardrail: f64,
        lower_guardrail: f64,
        bounds: SpendingBounds,
    ) -> Result<Self, ConfigError> {
        let initial_rate = in_range("gk_initial_rate", initial_rate, 0.0, 1.0)?;
        let upper_guardrail = in_range("gk_upper_guardrail", upper_guardrail, 0.0, 1.0)?;
        let lower_guardrail = in_range("gk_lower_guardrail", lower_guardrail, 0.0, 1.0)?;
        Ok(Self {
            initial_rate,
            upper_guardrail,
            lower_guardrail,
            bounds,
        })
    }

    fn cut_threshold(&self) -> f64 {
        self.initial_rate * (1.0 + self.lower_guardrail)
    }

    fn raise_threshold(&self) -> f64 {
        self.initial_rate * (1.0 - self.upper_guardrail)
    }
}

impl WithdrawalStrategy for GuytonKlinger {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GuytonKlinger
    }

    fn bounds(&self) -> SpendingBounds {
        self.bounds
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        if request.portfolio_value <= 0.0 {
            return 0.0;
        }

        let proposed = request.scheduled_or_inflated();
        let current_rate = proposed / request.portfolio_value;
        let adjusted = if current_rate > self.cut_threshold() {
            proposed * (1.0 - GUARDRAIL_ADJUSTMENT)
        } else if current_rate < self.raise_threshold() {
            proposed * (1.0 + GUARDRAIL_ADJUSTMENT)
        } else {
            proposed
        };
        // With a flexible floor configured, the relaxed floor applies after the
        // guardrail cut as well.
        self.bounds.limit_and_floor(adjusted, request)
    }
}

/// Essential spending is always paid; discretionary spending only up to the
/// portfolio's capacity (`portfolio_value * safe_rate`).
#[derive(Debug, Clone, Copy)]
pub struct EssentialDiscretionary {
    safe_rate: f64,
}

impl EssentialDiscretionary {
    pub fn new(safe_rate: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            safe_rate: in_range("safe_withdrawal_rate", safe_rate, 0.0, 1.0)?,
        })
    }

    fn split(&self, request: &WithdrawalRequest<'_>) -> (f64, f64) {
        match request.schedule {
            Some(schedule) => {
                let inflation = request.inflation.cumulative(request.year);
                (
                    schedule.essential_for_year(request.year) * inflation,
                    schedule.discretionary_for_year(request.year) * inflation,
                )
            }
            None => (request.inflated_previous(), 0.0),
        }
    }
}

impl WithdrawalStrategy for EssentialDiscretionary {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EssentialDiscretionary
    }

    fn calculate_withdrawal(&self, request: &WithdrawalRequest<'_>) -> f64 {
        let (essential, discretionary) = self.split(request);
        let capacity = request.portfolio_value.max(0.0) * self.safe_rate;
        if capacity >= essential + discretionary {
            essential + discretionary
        } else if capacity <= essential {
            essential
        } else {
            capacity
        }
    }

    fn initial_withdrawal(&self, base: f64, schedule: Option<&SpendingSchedule>) -> f64 {
        schedule.map(SpendingSchedule::first).unwrap_or(base)
    }
}

/// Every knob any strategy reads; `build_strategy` picks the ones it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub min_withdrawal: Option<f64>,
    pub max_withdrawal: Option<f64>,
    pub flexible_floor: Option<f64>,
    pub withdrawal_percentage: f64,
    pub vpw_start_age: u32,
    pub vpw_max_age: u32,
    pub gk_initial_rate: f64,
    pub gk_upper_guardrail: f64,
    pub gk_lower_guardrail: f64,
    pub safe_withdrawal_rate: f64,
}

pub fn build_strategy(
    kind: StrategyKind,
    params: &StrategyParams,
) -> Result<Box<dyn WithdrawalStrategy>, ConfigError> {
    let bounds = SpendingBounds::new(
        params.min_withdrawal,
        params.max_withdrawal,
        params.flexible_floor,
    )?;
    let strategy: Box<dyn WithdrawalStrategy> = match kind {
        StrategyKind::ScheduleOnly => Box::new(ScheduleOnly),
        StrategyKind::ConstantDollar => Box::new(ConstantDollar { bounds }),
        StrategyKind::PercentOfPortfolio => {
            Box::new(PercentOfPortfolio::new(params.withdrawal_percentage, bounds)?)
        }
        StrategyKind::Endowment => Box::new(Endowment::new(params.withdrawal_percentage, bounds)?),
        StrategyKind::Vpw => Box::new(Vpw::new(params.vpw_start_age, params.vpw_max_age, bounds)?),
        StrategyKind::GuytonKlinger => Box::new(GuytonKlinger::new(
            params.gk_initial_rate,
            params.gk_upper_guardrail,
            params.gk_lower_guardrail,
            bounds,
        )?),
        StrategyKind::EssentialDiscretionary => {
            Box::new(EssentialDiscretionary::new(params.safe_withdrawal_rate)?)
        }
    };
    Ok(strategy)
}

/// Level payment per unit of principal that exhausts the balance over
/// `years_remaining` years at `real_return`.
pub fn annuity_withdrawal_rate(real_return: f64, years_remaining: u32) -> f64 {
    let years = years_remaining.max(1) as f64;
    if real_return.abs() < 1e-9 {
        return (1.0 / years).clamp(0.0, 1.0);
    }

    if real_return <= -0.99 {
        return 1.0;
    }

    let denom = 1.0 - (1.0 + real_return).powf(-years);
    if denom <= 1e-9 {
        1.0
    } else {
        (real_return / denom).clamp(0.0, 1.0)
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

    fn request<'a>(
        portfolio_value: f64,
        year: usize,
        previous_withdrawal: f64,
        schedule: Option<&'a SpendingSchedule>,
        inflation: &'a InflationPath,
    ) -> WithdrawalRequest<'a> {
        WithdrawalRequest {
            portfolio_value,
            year,
            initial_withdrawal: 40_000.0,
            previous_withdrawal,
            schedule,
            inflation,
        }
    }

    fn bounds(min: Option<f64>, max: Option<f64>, flexible: Option<f64>) -> SpendingBounds {
        SpendingBounds::new(min, max, flexible).unwrap()
    }

    #[test]
    fn floor_overrides_ceiling_for_flat_schedule() {
        let schedule = SpendingSchedule::new(vec![300_000.0; 10]).unwrap();
        let inflation = InflationPath::fixed(0.03);
        let strategy = ConstantDollar {
            bounds: bounds(None, Some(200_000.0), None),
        };

        let initial = strategy.initial_withdrawal(0.0, Some(&schedule));
        assert_approx(initial, 300_000.0);

        let year_one = strategy.calculate_withdrawal(&request(
            5_000_000.0,
            1,
            initial,
            Some(&schedule),
            &inflation,
        ));
        assert_approx(year_one, 309_000.0);
    }

    #[test]
    fn constant_dollar_inflates_previous_without_schedule() {
        let inflation = InflationPath::from_annual_rates(vec![0.10, 0.02], 0.03);
        let strategy = ConstantDollar::default();
        let year_one = strategy.calculate_withdrawal(&request(1e6, 1, 50_000.0, None, &inflation));
        assert_approx(year_one, 55_000.0);
        let year_two = strategy.calculate_withdrawal(&request(1e6, 2, 55_000.0, None, &inflation));
        assert_approx(year_two, 56_100.0);
        let year_zero = strategy.calculate_withdrawal(&request(1e6, 0, 0.0, None, &inflation));
        assert_approx(year_zero, 40_000.0);
    }

    #[test]
    fn historical_inflation_drives_schedule_target() {
        let schedule = SpendingSchedule::new(vec![100_000.0]).unwrap();
        let inflation = InflationPath::from_annual_rates(vec![0.10, 0.10], 0.0);
        let target = ScheduleOnly.calculate_withdrawal(&request(0.0, 2, 0.0, Some(&schedule), &inflation));
        assert_approx(target, 121_000.0);
    }

    #[test]
    fn schedule_only_ignores_portfolio_value() {
        let schedule = SpendingSchedule::new(vec![50_000.0, 60_000.0]).unwrap();
        let inflation = InflationPath::fixed(0.03);
        let poor = ScheduleOnly.calculate_withdrawal(&request(0.0, 1, 0.0, Some(&schedule), &inflation));
        let rich = ScheduleOnly.calculate_withdrawal(&request(1e9, 1, 0.0, Some(&schedule), &inflation));
        assert_approx(poor, 61_800.0);
        assert_approx(rich, 61_800.0);
    }

    #[test]
    fn percent_of_portfolio_clamps_then_floors() {
        let inflation = InflationPath::fixed(0.0);
        let strategy = PercentOfPortfolio::new(0.04, bounds(Some(30_000.0), Some(50_000.0), None)).unwrap();
        assert_approx(
            strategy.calculate_withdrawal(&request(500_000.0, 3, 0.0, None, &inflation)),
            30_000.0,
        );
        assert_approx(
            strategy.calculate_withdrawal(&request(1_000_000.0, 3, 0.0, None, &inflation)),
            40_000.0,
        );
        assert_approx(
            strategy.calculate_withdrawal(&request(5_000_000.0, 3, 0.0, None, &inflation)),
            50_000.0,
        );

        let schedule = SpendingSchedule::new(vec![80_000.0]).unwrap();
        assert_approx(
            strategy.calculate_withdrawal(&request(5_000_000.0, 3, 0.0, Some(&schedule), &inflation)),
            80_000.0,
        );
    }

    #[test]
    fn flexible_floor_relaxes_schedule() {
        let schedule = SpendingSchedule::new(vec![100_000.0]).unwrap();
        let inflation = InflationPath::fixed(0.0);
        let strategy = PercentOfPortfolio::new(0.04, bounds(None, None, Some(0.75))).unwrap();
        assert_approx(
            strategy.calculate_withdrawal(&request(1_000_000.0, 0, 0.0, Some(&schedule), &inflation)),
            75_000.0,
        );
        assert_approx(strategy.initial_withdrawal(10.0, Some(&schedule)), 100_000.0);

        let capped = ConstantDollar {
            bounds: bounds(None, Some(60_000.0), Some(0.75)),
        };
        assert_approx(capped.initial_withdrawal(10.0, Some(&schedule)), 75_000.0);
    }

    #[test]
    fn endowment_matches_percent_of_portfolio() {
        let inflation = InflationPath::fixed(0.0);
        let b = bounds(Some(10_000.0), None, None);
        let endowment = Endowment::new(0.05, b).unwrap();
        let percent = PercentOfPortfolio::new(0.05, b).unwrap();
        for value in [0.0, 100_000.0, 2_000_000.0] {
            let req = request(value, 2, 0.0, None, &inflation);
            assert_approx(endowment.calculate_withdrawal(&req), percent.calculate_withdrawal(&req));
        }
        assert_eq!(endowment.kind(), StrategyKind::Endowment);
    }

    #[test]
    fn vpw_amortizes_remaining_years() {
        let strategy = Vpw::new(40, 100, SpendingBounds::default()).unwrap();
        let expected = 0.05 / (1.0 - 1.05f64.powf(-60.0));
        assert_approx(strategy.rate_for_year(0), expected);
        // Past max age the horizon bottoms out at one year, capped at 100%.
        assert_approx(strategy.rate_for_year(70), 1.0);
        assert_approx(strategy.rate_for_year(58), 0.05 / (1.0 - 1.05f64.powf(-2.0)));
        let inflation = InflationPath::fixed(0.0);
        assert_approx(
            strategy.calculate_withdrawal(&request(1_000_000.0, 0, 0.0, None, &inflation)),
            1_000_000.0 * expected,
        );
        assert!(Vpw::new(60, 60, SpendingBounds::default()).is_err());
    }

    #[test]
    fn annuity_rate_handles_zero_return() {
        assert_approx(annuity_withdrawal_rate(0.0, 20), 0.05);
        assert_approx(annuity_withdrawal_rate(0.0, 0), 1.0);
        assert_approx(annuity_withdrawal_rate(-0.995, 10), 1.0);
    }

    #[test]
    fn guyton_klinger_cuts_and_raises_at_guardrails() {
        let inflation = InflationPath::fixed(0.0);
        let strategy = GuytonKlinger::new(0.04, 0.20, 0.20, SpendingBounds::default()).unwrap();

        // 50k / 1M = 5% > 4.8%: cut.
        let cut = strategy.calculate_withdrawal(&request(1_000_000.0, 1, 50_000.0, None, &inflation));
        assert_approx(cut, 45_000.0);

        // 30k / 1M = 3% < 3.2%: raise.
        let raise = strategy.calculate_withdrawal(&request(1_000_000.0, 1, 30_000.0, None, &inflation));
        assert_approx(raise, 33_000.0);

        // 40k / 1M = 4%: unchanged.
        let hold = strategy.calculate_withdrawal(&request(1_000_000.0, 1, 40_000.0, None, &inflation));
        assert_approx(hold, 40_000.0);
    }

    #[test]
    fn guyton_klinger_returns_zero_for_empty_portfolio() {
        let inflation = InflationPath::fixed(0.03);
        let schedule = SpendingSchedule::new(vec![50_000.0]).unwrap();
        let strategy = GuytonKlinger::new(0.04, 0.2, 0.2, SpendingBounds::default()).unwrap();
        assert_approx(
            strategy.calculate_withdrawal(&request(0.0, 3, 50_000.0, Some(&schedule), &inflation)),
            0.0,
        );
        assert_approx(
            strategy.calculate_withdrawal(&request(-10.0, 3, 50_000.0, None, &inflation)),
            0.0,
        );
    }

    #[test]
    fn guyton_klinger_cut_is_limited_by_flexible_floor() {
        let inflation = InflationPath::fixed(0.0);
        let schedule = SpendingSchedule::new(vec![100_000.0]).unwrap();
        let strategy = GuytonKlinger::new(0.04, 0.2, 0.2, bounds(None, None, Some(0.95))).unwrap();
        // 100k / 1M = 10%: cut to 90k, floor at 95k.
        assert_approx(
            strategy.calculate_withdrawal(&request(1_000_000.0, 2, 0.0, Some(&schedule), &inflation)),
            95_000.0,
        );
    }

    #[test]
    fn essential_discretionary_pays_by_capacity() {
        let inflation = InflationPath::fixed(0.0);
        let schedule = SpendingSchedule::with_split(vec![40_000.0], vec![20_000.0]).unwrap();
        let strategy = EssentialDiscretionary::new(0.04).unwrap();

        let full = strategy.calculate_withdrawal(&request(2_000_000.0, 1, 0.0, Some(&schedule), &inflation));
        assert_approx(full, 60_000.0);

        let essential_only = strategy.calculate_withdrawal(&request(500_000.0, 1, 0.0, Some(&schedule), &inflation));
        assert_approx(essential_only, 40_000.0);

        let partial = strategy.calculate_withdrawal(&request(1_250_000.0, 1, 0.0, Some(&schedule), &inflation));
        assert_approx(partial, 50_000.0);

        assert_approx(strategy.initial_withdrawal(1.0, Some(&schedule)), 60_000.0);
    }

    #[test]
    fn essential_discretionary_without_split_treats_all_as_essential() {
        let inflation = InflationPath::fixed(0.0);
        let schedule = SpendingSchedule::new(vec![70_000.0]).unwrap();
        let strategy = EssentialDiscretionary::new(0.04).unwrap();
        assert_approx(
            strategy.calculate_withdrawal(&request(0.0, 1, 0.0, Some(&schedule), &inflation)),
            70_000.0,
        );
        let no_schedule = strategy.calculate_withdrawal(&request(0.0, 1, 30_000.0, None, &inflation));
        assert_approx(no_schedule, 30_000.0);
    }

    #[test]
    fn bounds_reject_bad_configuration() {
        assert_eq!(
            SpendingBounds::new(Some(10.0), Some(5.0), None),
            Err(ConfigError::InvertedLimits { min: 10.0, max: 5.0 })
        );
        assert!(SpendingBounds::new(None, None, Some(1.5)).is_err());
        assert!(SpendingBounds::new(Some(-1.0), None, None).is_err());
        assert!(PercentOfPortfolio::new(1.2, SpendingBounds::default()).is_err());
        assert!(GuytonKlinger::new(0.04, -0.1, 0.2, SpendingBounds::default()).is_err());
    }

    #[test]
    fn build_strategy_covers_every_kind() {
        let params = StrategyParams {
            min_withdrawal: None,
            max_withdrawal: None,
            flexible_floor: None,
            withdrawal_percentage: 0.04,
            vpw_start_age: 40,
            vpw_max_age: 100,
            gk_initial_rate: 0.04,
            gk_upper_guardrail: 0.2,
            gk_lower_guardrail: 0.2,
            safe_withdrawal_rate: 0.04,
        };
        for kind in StrategyKind::all() {
            let strategy = build_strategy(kind, &params).unwrap();
            assert_eq!(strategy.kind(), kind);
            assert!(!kind.description().is_empty());
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        #[test]
        fn prop_hard_floor_holds_for_every_bounded_strategy(
            portfolio in 0u32..10_000_000,
            year in 0usize..40,
            spend in 0u32..400_000,
            max in 1u32..200_000,
            inflation_bp in 0u32..800,
            kind_idx in 0usize..5
        ) {
            let schedule = SpendingSchedule::new(vec![spend as f64; 10]).unwrap();
            let inflation = InflationPath::fixed(inflation_bp as f64 / 10_000.0);
            let bounds = bounds(None, Some(max as f64), None);
            let strategy: Box<dyn WithdrawalStrategy> = match kind_idx {
                0 => Box::new(ConstantDollar { bounds }),
                1 => Box::new(PercentOfPortfolio::new(0.04, bounds).unwrap()),
                2 => Box::new(Vpw::new(40, 100, bounds).unwrap()),
                3 => Box::new(Endowment::new(0.03, bounds).unwrap()),
                _ => Box::new(ScheduleOnly),
            };
            let req = request(portfolio as f64, year, 50_000.0, Some(&schedule), &inflation);
            let floor = spend as f64 * inflation.cumulative(year);
            prop_assert!(strategy.calculate_withdrawal(&req) >= floor - 1e-6);
        }

        #[test]
        fn prop_clamp_stays_within_limits(
            amount in 0u32..1_000_000,
            min in 0u32..100_000,
            span in 0u32..200_000
        ) {
            let bounds = bounds(Some(min as f64), Some((min + span) as f64), None);
            let clamped = bounds.clamp(amount as f64);
            prop_assert!(clamped >= min as f64);
            prop_assert!(clamped <= (min + span) as f64);
        }
    }
}
