use thiserror::Error;

/// Rejected caller input. Raised at construction time, before any cohort runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be a finite number >= 0 (got {value})")]
    NegativeAmount { field: &'static str, value: f64 },
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("duration_years must be > 0")]
    ZeroDuration,
    #[error("income stream '{name}': end_year {end_year} is before start_year {start_year}")]
    InvertedIncomeRange {
        name: String,
        start_year: i32,
        end_year: i32,
    },
    #[error("private stock diversification_duration must be > 0 when a window is set")]
    ZeroDiversificationDuration,
    #[error("private stock diversification window needs both a start year and a duration")]
    IncompleteDiversificationWindow,
    #[error("spending schedule must contain at least one year")]
    EmptySchedule,
    #[error("essential ({essential}) and discretionary ({discretionary}) schedules must have the same length")]
    ScheduleSplitMismatch {
        essential: usize,
        discretionary: usize,
    },
    #[error("min_withdrawal ({min}) cannot exceed max_withdrawal ({max})")]
    InvertedLimits { min: f64, max: f64 },
    #[error("{field} must be > {min} (got {value})")]
    NotAbove {
        field: &'static str,
        value: f64,
        min: f64,
    },
    #[error("return series dates must be strictly increasing (at index {index})")]
    UnorderedSeries { index: usize },
    #[error("{field} must be finite (non-finite value at index {index})")]
    NonFinite { field: &'static str, index: usize },
}

/// Failure to ingest a market or inflation file.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("failed to read market data: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed market data CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid date '{0}' in market data (expected YYYY-MM-DD)")]
    Date(String),
    #[error("market data CSV has no '{0}' column")]
    MissingColumn(String),
    #[error("invalid {column} value '{value}' in market data")]
    Value { column: String, value: String },
    #[error("market data file contains no usable rows")]
    Empty,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub(crate) fn non_negative(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::NegativeAmount { field, value })
    }
}

pub(crate) fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
