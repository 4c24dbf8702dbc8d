use serde::{Deserialize, Serialize};

use super::engine::{BacktestEngine, calculate_stats};
use super::strategy::ConstantDollar;
use super::types::{BacktestStats, SimulationConfig};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalType {
    /// Smallest starting portfolio that sustains the configured spend.
    TargetPortfolio,
    /// Largest initial withdrawal rate the configured portfolio sustains.
    SafeWithdrawalRate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl GoalSolveConfig {
    /// 10x-60x the annual spend for a portfolio target, 1%-10% for a rate.
    pub fn defaults_for(goal_type: GoalType, annual_spend: f64) -> Self {
        let (search_min, search_max, tolerance) = match goal_type {
            GoalType::TargetPortfolio => (
                annual_spend * 10.0,
                annual_spend * 60.0,
                (annual_spend * 0.01).max(1.0),
            ),
            GoalType::SafeWithdrawalRate => (0.01, 0.10, 0.0005),
        };
        Self {
            goal_type,
            target_success_rate: 0.95,
            search_min,
            search_max,
            tolerance,
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub goal_type: GoalType,
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub solved_value: Option<f64>,
    pub achieved_stats: Option<BacktestStats>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Bisects on the goal's free variable with a constant-dollar policy until the
/// bracket is narrower than `tolerance` or `max_iterations` runs out. Success
/// rate rises with portfolio size and falls with withdrawal rate; the solver
/// keeps the feasible side of the bracket.
pub fn solve_goal(
    engine: &BacktestEngine,
    base_config: &SimulationConfig,
    config: GoalSolveConfig,
) -> Result<GoalSolveResult, String> {
    validate_config(engine, base_config, config)?;

    let mut iterations = Vec::new();
    let mut solved_value = None;
    let mut converged = false;
    let feasible;
    let message;

    let low_rate = evaluate_candidate(engine, base_config, config.goal_type, config.search_min)?;
    let high_rate = evaluate_candidate(engine, base_config, config.goal_type, config.search_max)?;
    let meets = |rate: f64| rate + 1e-12 >= config.target_success_rate;

    match config.goal_type {
        GoalType::TargetPortfolio => {
            if meets(low_rate) {
                solved_value = Some(config.search_min);
                converged = true;
                feasible = true;
                message = "Already meets target at lower portfolio bound.".to_string();
            } else if !meets(high_rate) {
                feasible = false;
                message = "No feasible portfolio found within the search bounds.".to_string();
            } else {
                let mut lo = config.search_min;
                let mut hi = config.search_max;
                for it in 1..=config.max_iterations {
                    let mid = (lo + hi) * 0.5;
                    let rate = evaluate_candidate(engine, base_config, config.goal_type, mid)?;
                    iterations.push(GoalSolveIteration {
                        iteration: it,
                        lower_bound: lo,
                        upper_bound: hi,
                        candidate_value: mid,
                        success_rate: rate,
                    });

                    if meets(rate) {
                        hi = mid;
                    } else {
                        lo = mid;
                    }

                    if (hi - lo).abs() <= config.tolerance {
                        converged = true;
                        break;
                    }
                }
                solved_value = Some(hi);
                feasible = true;
                message = if converged {
                    "Solved required portfolio.".to_string()
                } else {
                    "Reached max iterations before tolerance was met; returning best estimate."
                        .to_string()
                };
            }
        }
        GoalType::SafeWithdrawalRate => {
            if !meets(low_rate) {
                feasible = false;
                message = "No feasible withdrawal rate found within the search bounds.".to_string();
            } else if meets(high_rate) {
                solved_value = Some(config.search_max);
                converged = true;
                feasible = true;
                message =
                    "Upper rate bound is still feasible; increase search max for a higher rate."
                        .to_string();
            } else {
                let mut lo = config.search_min;
                let mut hi = config.search_max;
                for it in 1..=config.max_iterations {
                    let mid = (lo + hi) * 0.5;
                    let rate = evaluate_candidate(engine, base_config, config.goal_type, mid)?;
                    iterations.push(GoalSolveIteration {
                        iteration: it,
                        lower_bound: lo,
                        upper_bound: hi,
                        candidate_value: mid,
                        success_rate: rate,
                    });

                    if meets(rate) {
                        lo = mid;
                    } else {
                        hi = mid;
                    }

                    if (hi - lo).abs() <= config.tolerance {
                        converged = true;
                        break;
                    }
                }
                solved_value = Some(lo);
                feasible = true;
                message = if converged {
                    "Solved safe withdrawal rate.".to_string()
                } else {
                    "Reached max iterations before tolerance was met; returning best estimate."
                        .to_string()
                };
            }
        }
    }

    let achieved_stats = match solved_value {
        Some(value) => {
            let candidate = candidate_config(base_config, config.goal_type, value);
            let result = engine
                .run_simulation(&candidate, &ConstantDollar::default())
                .map_err(|err| err.to_string())?;
            calculate_stats(&result)
        }
        None => None,
    };

    Ok(GoalSolveResult {
        goal_type: config.goal_type,
        target_success_rate: config.target_success_rate,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        solved_value,
        achieved_stats,
        iterations,
        converged,
        feasible,
        message,
    })
}

/// The portfolio target keeps the base liquid/retirement split; the rate goal
/// replaces any spending schedule with `rate * portfolio`.
fn candidate_config(
    base: &SimulationConfig,
    goal_type: GoalType,
    candidate_value: f64,
) -> SimulationConfig {
    let mut config = base.clone();
    let total = base.initial_liquid + base.initial_retirement;
    match goal_type {
        GoalType::TargetPortfolio => {
            let liquid_share = if total > 0.0 {
                base.initial_liquid / total
            } else {
                1.0
            };
            let value = candidate_value.max(0.0);
            config.initial_liquid = value * liquid_share;
            config.initial_retirement = value - config.initial_liquid;
        }
        GoalType::SafeWithdrawalRate => {
            config.initial_annual_withdrawal = total * candidate_value.max(0.0);
            config.spending_schedule = None;
        }
    }
    config
}

fn evaluate_candidate(
    engine: &BacktestEngine,
    base_config: &SimulationConfig,
    goal_type: GoalType,
    candidate_value: f64,
) -> Result<f64, String> {
    let config = candidate_config(base_config, goal_type, candidate_value);
    let result = engine
        .run_simulation(&config, &ConstantDollar::default())
        .map_err(|err| err.to_string())?;
    Ok(calculate_stats(&result).map_or(0.0, |stats| stats.success_rate))
}

fn validate_config(
    engine: &BacktestEngine,
    base_config: &SimulationConfig,
    config: GoalSolveConfig,
) -> Result<(), String> {
    base_config.validate().map_err(|err| err.to_string())?;
    if !(0.0..=1.0).contains(&config.target_success_rate) {
        return Err("target_success_rate must be between 0 and 1".to_string());
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err("search bounds must be finite".to_string());
    }
    if config.search_min < 0.0 {
        return Err("search_min must be >= 0".to_string());
    }
    if config.search_max <= config.search_min {
        return Err("search_max must be greater than search_min".to_string());
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err("tolerance must be > 0".to_string());
    }
    if config.max_iterations == 0 {
        return Err("max_iterations must be > 0".to_string());
    }
    if config.goal_type == GoalType::SafeWithdrawalRate
        && base_config.initial_liquid + base_config.initial_retirement <= 0.0
    {
        return Err("portfolio value must be > 0 to solve for a withdrawal rate".to_string());
    }
    if engine.cohort_starts(base_config.duration_years).is_empty() {
        return Err("not enough market history for duration_years".to_string());
    }
    Ok(())
}
