/// Result of pricing one candidate gross withdrawal.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrossUpTrial {
    pub net: f64,
    pub incremental_tax: f64,
    pub penalty: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrossUpSolution {
    pub gross: f64,
    pub incremental_tax: f64,
    pub penalty: f64,
    pub iterations: u32,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrossUpConfig {
    pub max_iterations: u32,
    /// Dollars of slack allowed between the trial's net and the target.
    pub tolerance: f64,
}

impl GrossUpConfig {
    pub const DEFAULT: GrossUpConfig = GrossUpConfig {
        max_iterations: 25,
        tolerance: 1.0,
    };
}

/// Bisects on the gross amount in `[target_net, 3 * target_net]` until
/// `trial(gross).net` lands within tolerance of `target_net`. When the cap is
/// hit first, the smallest bracketing gross whose net covered the target is
/// returned; if none did, the target itself is priced, so a deficit the
/// accessible funds cannot cover is drawn at face value.
pub fn solve_gross_withdrawal(
    target_net: f64,
    config: GrossUpConfig,
    trial: impl Fn(f64) -> GrossUpTrial,
) -> GrossUpSolution {
    if target_net.is_nan() || target_net <= 0.0 {
        return GrossUpSolution {
            converged: true,
            ..GrossUpSolution::default()
        };
    }

    let mut low = target_net;
    let mut high = target_net * 3.0;
    let mut best: Option<(f64, GrossUpTrial)> = None;

    for iteration in 1..=config.max_iterations {
        let mid = (low + high) * 0.5;
        let outcome = trial(mid);

        if (outcome.net - target_net).abs() < config.tolerance {
            return solution(mid, outcome, iteration, true);
        }

        if outcome.net < target_net {
            low = mid;
        } else {
            high = mid;
            best = Some((mid, outcome));
        }
    }

    let (gross, outcome) = best.unwrap_or_else(|| (target_net, trial(target_net)));
    solution(gross, outcome, config.max_iterations, false)
}

fn solution(gross: f64, trial: GrossUpTrial, iterations: u32, converged: bool) -> GrossUpSolution {
    GrossUpSolution {
        gross,
        incremental_tax: trial.incremental_tax,
        penalty: trial.penalty,
        iterations,
        converged,
    }
}
