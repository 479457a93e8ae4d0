//! Pre-condition checks for NBP queries
//!
//! Everything here runs before the balance check, so a request rejected
//! here is never charged.

use chrono::{NaiveDate, Utc};

use crate::config::nbp::{
    GOLD_HISTORY_START, MAX_RANGE_DAYS, RATES_HISTORY_START, TABLE_A_CURRENCIES,
};
use crate::error::ValidationError;

/// Which NBP data set a date belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    Rates,
    Gold,
}

impl Series {
    /// First day with published data
    pub fn history_start(self) -> NaiveDate {
        let raw = match self {
            Series::Rates => RATES_HISTORY_START,
            Series::Gold => GOLD_HISTORY_START,
        };
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
    }
}

/// Current date in UTC
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = value.trim();
    // chrono accepts single-digit fields; the API does not
    if trimmed.len() != 10 {
        return Err(ValidationError::InvalidDate {
            value: value.to_string(),
        });
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        value: value.to_string(),
    })
}

/// Normalize and check a table A currency code
pub fn currency_code(value: &str) -> Result<String, ValidationError> {
    let code = value.trim().to_ascii_uppercase();
    if TABLE_A_CURRENCIES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(ValidationError::UnknownCurrency {
            code: value.to_string(),
        })
    }
}

/// Check one optional date against the series window
pub fn single_date(
    value: Option<&str>,
    series: Series,
    today: NaiveDate,
) -> Result<Option<NaiveDate>, ValidationError> {
    value
        .map(|raw| {
            let date = parse_date(raw)?;
            within_history(date, series, today)?;
            Ok(date)
        })
        .transpose()
}

/// Check an inclusive range against the series window and the span limit
pub fn date_range(
    start: &str,
    end: &str,
    series: Series,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;

    if start > end {
        return Err(ValidationError::InvertedRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    let days = (end - start).num_days() + 1;
    if days > MAX_RANGE_DAYS {
        return Err(ValidationError::RangeTooLong {
            days,
            max: MAX_RANGE_DAYS,
        });
    }

    within_history(start, series, today)?;
    within_history(end, series, today)?;
    Ok((start, end))
}

fn within_history(date: NaiveDate, series: Series, today: NaiveDate) -> Result<(), ValidationError> {
    if date > today {
        return Err(ValidationError::FutureDate {
            date: date.to_string(),
        });
    }
    let earliest = series.history_start();
    if date < earliest {
        return Err(ValidationError::BeforeHistoryStart {
            date: date.to_string(),
            earliest: earliest.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-01-02").unwrap(), day("2024-01-02"));
        assert!(parse_date("2024-1-2").is_err());
        assert!(parse_date("02-01-2024").is_err());
        assert!(parse_date("2024-02-30").is_err());
    }

    #[test]
    fn test_currency_code() {
        assert_eq!(currency_code("usd").unwrap(), "USD");
        assert_eq!(
            currency_code("XYZ").unwrap_err(),
            ValidationError::UnknownCurrency {
                code: "XYZ".to_string()
            }
        );
    }

    #[test]
    fn test_range_limit_is_inclusive() {
        let today = day("2025-06-30");
        // 93 days inclusive
        assert!(date_range("2024-01-01", "2024-04-02", Series::Rates, today).is_ok());
        let err = date_range("2024-01-01", "2024-04-03", Series::Rates, today).unwrap_err();
        assert_eq!(err, ValidationError::RangeTooLong { days: 94, max: 93 });
    }

    #[test]
    fn test_two_hundred_day_range_rejected() {
        let today = day("2025-06-30");
        let err = date_range("2024-01-01", "2024-07-18", Series::Rates, today).unwrap_err();
        assert!(matches!(err, ValidationError::RangeTooLong { days: 200, .. }));
    }

    #[test]
    fn test_inverted_and_future_ranges() {
        let today = day("2024-06-30");
        assert!(matches!(
            date_range("2024-02-01", "2024-01-01", Series::Rates, today),
            Err(ValidationError::InvertedRange { .. })
        ));
        assert!(matches!(
            date_range("2024-06-20", "2024-07-05", Series::Rates, today),
            Err(ValidationError::FutureDate { .. })
        ));
    }

    #[test]
    fn test_history_start_per_series() {
        let today = day("2024-06-30");
        assert!(single_date(Some("2010-05-04"), Series::Rates, today).is_ok());
        assert!(matches!(
            single_date(Some("2010-05-04"), Series::Gold, today),
            Err(ValidationError::BeforeHistoryStart { .. })
        ));
        assert!(matches!(
            single_date(Some("2001-12-31"), Series::Rates, today),
            Err(ValidationError::BeforeHistoryStart { .. })
        ));
        assert_eq!(single_date(None, Series::Gold, today).unwrap(), None);
    }
}
