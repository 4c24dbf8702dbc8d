use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{Datelike, NaiveDate};

use super::error::{ConfigError, MarketDataError};

/// Month-end stock returns, oldest first. Each sample is dated at the end of
/// the month whose return it describes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlyReturns {
    dates: Vec<NaiveDate>,
    returns: Vec<f64>,
}

impl MonthlyReturns {
    pub fn from_returns(samples: Vec<(NaiveDate, f64)>) -> Result<Self, ConfigError> {
        let mut dates: Vec<NaiveDate> = Vec::with_capacity(samples.len());
        let mut returns = Vec::with_capacity(samples.len());
        for (index, (date, value)) in samples.into_iter().enumerate() {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite {
                    field: "monthly return",
                    index,
                });
            }
            if dates.last().is_some_and(|prev| *prev >= date) {
                return Err(ConfigError::UnorderedSeries { index });
            }
            dates.push(date);
            returns.push(value);
        }
        Ok(Self { dates, returns })
    }

    /// Resamples a dated close-price series to month ends (last close in each
    /// month, carried forward through months without quotes) and converts it to
    /// percent changes. The first month only seeds the series.
    pub fn from_prices(prices: &[(NaiveDate, f64)]) -> Result<Self, MarketDataError> {
        let closes = month_end_levels(prices, "close price")?;
        Ok(Self::from_returns(percent_changes(&closes))?)
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub(crate) fn window(&self, start: usize, months: usize) -> Option<&[f64]> {
        self.returns.get(start..start.checked_add(months)?)
    }
}

/// Monthly CPI inflation keyed by calendar month.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InflationHistory {
    monthly: BTreeMap<i32, f64>,
}

impl InflationHistory {
    pub fn from_monthly_rates(samples: Vec<(NaiveDate, f64)>) -> Result<Self, ConfigError> {
        let mut monthly = BTreeMap::new();
        let mut previous: Option<i32> = None;
        for (index, (date, rate)) in samples.into_iter().enumerate() {
            if !rate.is_finite() {
                return Err(ConfigError::NonFinite {
                    field: "inflation rate",
                    index,
                });
            }
            let ordinal = month_ordinal(date);
            if previous.is_some_and(|prev| prev >= ordinal) {
                return Err(ConfigError::UnorderedSeries { index });
            }
            previous = Some(ordinal);
            monthly.insert(ordinal, rate);
        }
        Ok(Self { monthly })
    }

    /// Builds monthly rates from CPI index levels using the same month-end
    /// resampling as price series.
    pub fn from_cpi_levels(levels: &[(NaiveDate, f64)]) -> Result<Self, MarketDataError> {
        let month_ends = month_end_levels(levels, "CPI level")?;
        Ok(Self::from_monthly_rates(percent_changes(&month_ends))?)
    }

    pub fn len(&self) -> usize {
        self.monthly.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monthly.is_empty()
    }

    /// Annual rates for a cohort starting in `start`'s month. Year `y` compounds
    /// the twelve monthly rates beginning `12 * y` months after the start; a year
    /// with any month missing falls back to `fallback_rate`.
    pub fn path_from(&self, start: NaiveDate, years: usize, fallback_rate: f64) -> InflationPath {
        let first = month_ordinal(start);
        let annual_rates = (0..years)
            .map(|year| {
                let offset = first + (year as i32) * 12;
                let mut growth = 1.0;
                for ordinal in offset..offset + 12 {
                    match self.monthly.get(&ordinal) {
                        Some(rate) => growth *= 1.0 + rate,
                        None => return fallback_rate,
                    }
                }
                growth - 1.0
            })
            .collect();
        InflationPath::from_annual_rates(annual_rates, fallback_rate)
    }
}

/// Annual inflation experienced by one cohort. Years beyond the known rates
/// use the fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct InflationPath {
    annual_rates: Vec<f64>,
    fallback: f64,
}

impl InflationPath {
    pub fn fixed(rate: f64) -> Self {
        Self {
            annual_rates: Vec::new(),
            fallback: rate,
        }
    }

    pub fn from_annual_rates(annual_rates: Vec<f64>, fallback: f64) -> Self {
        Self {
            annual_rates,
            fallback,
        }
    }

    pub fn rate(&self, year: usize) -> f64 {
        self.annual_rates.get(year).copied().unwrap_or(self.fallback)
    }

    /// Price level at the start of `year` relative to year 0.
    pub fn cumulative(&self, year: usize) -> f64 {
        let known = year.min(self.annual_rates.len());
        let historical: f64 = self.annual_rates[..known]
            .iter()
            .map(|rate| 1.0 + rate)
            .product();
        historical * (1.0 + self.fallback).powi((year - known) as i32)
    }
}

pub fn load_price_csv(path: impl AsRef<Path>) -> Result<Vec<(NaiveDate, f64)>, MarketDataError> {
    let file = File::open(path.as_ref())?;
    read_dated_column(file, "Close")
}

pub fn load_cpi_csv(path: impl AsRef<Path>) -> Result<Vec<(NaiveDate, f64)>, MarketDataError> {
    let file = File::open(path.as_ref())?;
    read_dated_column(file, "CPI")
}

/// Reads `Date` plus one named value column. Rows with an empty value are
/// skipped; dates may carry a time suffix after the `YYYY-MM-DD` prefix.
pub fn read_dated_column<R: Read>(
    reader: R,
    column: &str,
) -> Result<Vec<(NaiveDate, f64)>, MarketDataError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let date_idx = find_column(&headers, "Date")?;
    let value_idx = find_column(&headers, column)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let raw_value = record.get(value_idx).unwrap_or_default();
        if raw_value.is_empty() {
            continue;
        }
        let value: f64 = raw_value.parse().map_err(|_| MarketDataError::Value {
            column: column.to_string(),
            value: raw_value.to_string(),
        })?;
        let date = parse_date(record.get(date_idx).unwrap_or_default())?;
        rows.push((date, value));
    }

    if rows.is_empty() {
        return Err(MarketDataError::Empty);
    }
    Ok(rows)
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Result<usize, MarketDataError> {
    headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case(name))
        .ok_or_else(|| MarketDataError::MissingColumn(name.to_string()))
}

fn parse_date(raw: &str) -> Result<NaiveDate, MarketDataError> {
    let prefix = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").map_err(|_| MarketDataError::Date(raw.to_string()))
}

fn month_end_levels(
    levels: &[(NaiveDate, f64)],
    field: &'static str,
) -> Result<Vec<(NaiveDate, f64)>, MarketDataError> {
    let mut sorted = levels.to_vec();
    sorted.sort_by_key(|(date, _)| *date);

    let mut last_in_month = BTreeMap::new();
    for &(date, level) in &sorted {
        if !level.is_finite() || level <= 0.0 {
            return Err(ConfigError::NotAbove {
                field,
                value: level,
                min: 0.0,
            }
            .into());
        }
        last_in_month.insert(month_ordinal(date), level);
    }

    let (Some(&first), Some(&last)) = (last_in_month.keys().next(), last_in_month.keys().last())
    else {
        return Err(MarketDataError::Empty);
    };

    let mut carried = 0.0;
    let mut month_ends = Vec::with_capacity((last - first + 1) as usize);
    for ordinal in first..=last {
        if let Some(&level) = last_in_month.get(&ordinal) {
            carried = level;
        }
        month_ends.push((month_end(ordinal)?, carried));
    }
    Ok(month_ends)
}

fn percent_changes(levels: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    levels
        .windows(2)
        .map(|pair| (pair[1].0, pair[1].1 / pair[0].1 - 1.0))
        .collect()
}

fn month_ordinal(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

fn month_end(ordinal: i32) -> Result<NaiveDate, MarketDataError> {
    let next = ordinal + 1;
    let year = next.div_euclid(12);
    let month = next.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .ok_or_else(|| MarketDataError::Date(format!("{year}-{month:02}")))
}
