use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CloAnalyticsError;
use crate::CloAnalyticsResult;

/// Supported simulation step lengths. The set is closed.
///
/// Deserialises through [`FromStr`], so config files accept the same
/// aliases as `setup`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum PeriodType {
    Monthly,
    #[default]
    Quarterly,
    SemiAnnually,
    Annually,
}

impl PeriodType {
    /// Calendar months per period.
    pub fn months(self) -> u32 {
        match self {
            PeriodType::Monthly => 1,
            PeriodType::Quarterly => 3,
            PeriodType::SemiAnnually => 6,
            PeriodType::Annually => 12,
        }
    }

    pub fn periods_per_year(self) -> u32 {
        12 / self.months()
    }

    /// Length of one period as a fraction of a year.
    pub fn year_fraction(self) -> f64 {
        f64::from(self.months()) / 12.0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Monthly => "MONTHLY",
            PeriodType::Quarterly => "QUARTERLY",
            PeriodType::SemiAnnually => "SEMI_ANNUALLY",
            PeriodType::Annually => "ANNUALLY",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = CloAnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalised.as_str() {
            "MONTHLY" | "M" => Ok(PeriodType::Monthly),
            "QUARTERLY" | "Q" => Ok(PeriodType::Quarterly),
            "SEMI_ANNUALLY" | "SEMIANNUALLY" | "SEMI_ANNUAL" | "S" => Ok(PeriodType::SemiAnnually),
            "ANNUALLY" | "ANNUAL" | "YEARLY" | "A" => Ok(PeriodType::Annually),
            _ => Err(CloAnalyticsError::UnsupportedPeriod(s.to_string())),
        }
    }
}

impl TryFrom<String> for PeriodType {
    type Error = CloAnalyticsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Number of whole periods needed to run from `analysis_date` through
/// `last_maturity`. A partial trailing period counts as a full one.
pub fn num_periods(analysis_date: NaiveDate, last_maturity: NaiveDate, period: PeriodType) -> u32 {
    if last_maturity <= analysis_date {
        return 0;
    }
    let mut months = (last_maturity.year() - analysis_date.year()) * 12
        + last_maturity.month() as i32
        - analysis_date.month() as i32;
    if last_maturity.day() > analysis_date.day() {
        months += 1;
    }
    let months = months.max(1) as u32;
    months.div_ceil(period.months())
}

/// End date of period `index` (period 0 ends on the analysis date).
pub fn period_end(
    analysis_date: NaiveDate,
    index: u32,
    period: PeriodType,
) -> CloAnalyticsResult<NaiveDate> {
    analysis_date
        .checked_add_months(Months::new(index * period.months()))
        .ok_or_else(|| {
            CloAnalyticsError::DateError(format!(
                "period {index} from {analysis_date} overflows the calendar"
            ))
        })
}

/// `(start, end)` of the transition period `index` (1-based).
pub fn period_bounds(
    analysis_date: NaiveDate,
    index: u32,
    period: PeriodType,
) -> CloAnalyticsResult<(NaiveDate, NaiveDate)> {
    let start = period_end(analysis_date, index.saturating_sub(1), period)?;
    let end = period_end(analysis_date, index, period)?;
    Ok((start, end))
}
