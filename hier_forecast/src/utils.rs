//! Utility functions for the hier_forecast crate

use crate::error::{ForecastError, Result};
use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sampling frequency of the observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[serde(alias = "D")]
    Daily,
    #[serde(alias = "W")]
    Weekly,
    #[serde(alias = "M", alias = "MS")]
    Monthly,
    #[serde(alias = "Q", alias = "QS")]
    Quarterly,
    #[serde(alias = "Y", alias = "A")]
    Yearly,
}

impl Frequency {
    /// Conventional seasonal period for this frequency
    pub fn season_length(&self) -> usize {
        match self {
            Frequency::Daily => 7,
            Frequency::Weekly => 52,
            Frequency::Monthly => 12,
            Frequency::Quarterly => 4,
            Frequency::Yearly => 1,
        }
    }

    /// Date `steps` periods after `start`
    pub fn advance(&self, start: NaiveDate, steps: usize) -> Result<NaiveDate> {
        let steps32 = u32::try_from(steps)
            .map_err(|_| ForecastError::InvalidInput(format!("Step count {} too large", steps)))?;

        let advanced = match self {
            Frequency::Daily => start.checked_add_days(Days::new(steps as u64)),
            Frequency::Weekly => start.checked_add_days(Days::new(7 * steps as u64)),
            Frequency::Monthly => start.checked_add_months(Months::new(steps32)),
            Frequency::Quarterly => steps32
                .checked_mul(3)
                .and_then(|m| start.checked_add_months(Months::new(m))),
            Frequency::Yearly => steps32
                .checked_mul(12)
                .and_then(|m| start.checked_add_months(Months::new(m))),
        };

        advanced.ok_or_else(|| {
            ForecastError::InvalidInput(format!(
                "Cannot advance {} by {} {} periods",
                start, steps, self
            ))
        })
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

impl FromStr for Frequency {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" | "d" | "D" | "1d" => Ok(Frequency::Daily),
            "weekly" | "w" | "W" | "1w" => Ok(Frequency::Weekly),
            "monthly" | "m" | "M" | "MS" => Ok(Frequency::Monthly),
            "quarterly" | "q" | "Q" | "QS" => Ok(Frequency::Quarterly),
            "yearly" | "y" | "Y" | "A" => Ok(Frequency::Yearly),
            _ => Err(ForecastError::InvalidInput(format!(
                "Unsupported frequency: {}",
                s
            ))),
        }
    }
}

/// Create future timestamps for forecasting
///
/// Each step is measured from `last_timestamp` so month-end dates do not
/// drift when a short month clips the day.
pub fn future_timestamps(
    last_timestamp: NaiveDate,
    horizon: usize,
    frequency: Frequency,
) -> Result<Vec<NaiveDate>> {
    (1..=horizon)
        .map(|step| frequency.advance(last_timestamp, step))
        .collect()
}

/// Parse a date in one of the layouts produced by common CSV exports
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(|c: char| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);

    for layout in ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, layout) {
            return Ok(date);
        }
    }

    Err(ForecastError::InvalidInput(format!(
        "Cannot parse '{}' as a date",
        raw
    )))
}
