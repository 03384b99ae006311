//! Sampling frequency of a series and its resampling buckets.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::RuletraderError;

/// Declared frequency of an input series, ordered finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

impl Frequency {
    /// Finest frequency among `freqs`; `None` when empty.
    pub fn finest(freqs: impl IntoIterator<Item = Frequency>) -> Option<Frequency> {
        freqs.into_iter().min()
    }

    /// Label of the resampling bucket `date` falls into.
    ///
    /// Weekly buckets end on (and are labelled with) Monday. Half-yearly
    /// series share the yearly bucket.
    pub fn bucket(self, date: NaiveDate) -> NaiveDate {
        match self {
            Frequency::Daily => date,
            Frequency::Weekly => {
                let from_monday = date.weekday().num_days_from_monday() as i64;
                if from_monday == 0 {
                    date
                } else {
                    date + Duration::days(7 - from_monday)
                }
            }
            Frequency::Monthly => date.with_day(1).unwrap_or(date),
            Frequency::Quarterly => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            Frequency::HalfYearly | Frequency::Yearly => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
            }
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Frequency::Daily => "D",
            Frequency::Weekly => "W",
            Frequency::Monthly => "M",
            Frequency::Quarterly => "Q",
            Frequency::HalfYearly => "H",
            Frequency::Yearly => "Y",
        }
    }

    /// Name of the matching scheduling step (`run_daily`, ...).
    pub fn schedule_step(self) -> &'static str {
        match self {
            Frequency::Daily => "run_daily",
            Frequency::Weekly => "run_weekly",
            Frequency::Monthly => "run_monthly",
            Frequency::Quarterly => "run_quarterly",
            Frequency::HalfYearly | Frequency::Yearly => "run_yearly",
        }
    }
}

impl FromStr for Frequency {
    type Err = RuletraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "d" | "daily" => Ok(Frequency::Daily),
            "w" | "weekly" => Ok(Frequency::Weekly),
            "m" | "monthly" => Ok(Frequency::Monthly),
            "q" | "quarterly" => Ok(Frequency::Quarterly),
            "h" | "half-yearly" | "half_yearly" => Ok(Frequency::HalfYearly),
            "y" | "yearly" => Ok(Frequency::Yearly),
            other => Err(RuletraderError::validation(format!(
                "unknown frequency {other}"
            ))),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = RuletraderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(freq: Frequency) -> Self {
        freq.code().to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
