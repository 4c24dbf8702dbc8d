//! 2025 married-filing-jointly tables. Each bracket list is `(threshold, rate)`
//! pairs; income above a threshold up to the next one is taxed at that rate.

pub type Brackets = &'static [(f64, f64)];

pub const STANDARD_DEDUCTION_MFJ: f64 = 30_000.0;

pub const FEDERAL_BRACKETS_MFJ: Brackets = &[
    (0.0, 0.10),
    (23_850.0, 0.12),
    (96_950.0, 0.22),
    (206_700.0, 0.24),
    (394_600.0, 0.32),
    (501_050.0, 0.35),
    (751_600.0, 0.37),
];

pub const LTCG_BRACKETS_MFJ: Brackets = &[(0.0, 0.00), (96_700.0, 0.15), (600_050.0, 0.20)];

pub const NIIT_THRESHOLD_MFJ: f64 = 250_000.0;
pub const NIIT_RATE: f64 = 0.038;

pub const AMT_EXEMPTION_MFJ: f64 = 137_000.0;
pub const AMT_PHASEOUT_START_MFJ: f64 = 1_218_700.0;
pub const AMT_PHASEOUT_RATE: f64 = 0.25;
pub const AMT_LOWER_RATE: f64 = 0.26;
pub const AMT_UPPER_RATE: f64 = 0.28;
pub const AMT_RATE_BREAKPOINT: f64 = 232_600.0;

pub const SS_WAGE_BASE: f64 = 176_100.0;
pub const SS_RATE: f64 = 0.062;
pub const MEDICARE_RATE: f64 = 0.0145;
pub const ADDITIONAL_MEDICARE_THRESHOLD_MFJ: f64 = 250_000.0;
pub const ADDITIONAL_MEDICARE_RATE: f64 = 0.009;

pub const CA_BRACKETS_MFJ: Brackets = &[
    (0.0, 0.010),
    (20_824.0, 0.020),
    (49_368.0, 0.040),
    (77_918.0, 0.060),
    (108_162.0, 0.080),
    (136_700.0, 0.093),
    (698_272.0, 0.103),
    (837_922.0, 0.113),
    (1_396_542.0, 0.123),
];
pub const CA_MENTAL_HEALTH_SURCHARGE_THRESHOLD: f64 = 1_000_000.0;
pub const CA_MENTAL_HEALTH_SURCHARGE_RATE: f64 = 0.01;
// No wage cap since 2024.
pub const CA_SDI_RATE: f64 = 0.011;
pub const CA_AMT_RATE: f64 = 0.07;
pub const CA_AMT_EXEMPTION_MFJ: f64 = 114_000.0;
pub const CA_AMT_PHASEOUT_START_MFJ: f64 = 429_000.0;

pub const AL_BRACKETS_MFJ: Brackets = &[(0.0, 0.02), (1_000.0, 0.04), (6_000.0, 0.05)];
// Birmingham occupational tax on gross compensation.
pub const AL_OCCUPATIONAL_TAX_RATE: f64 = 0.01;
