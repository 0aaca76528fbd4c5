//! Period token resolution.
//!
//! Every report starts by turning a period token from the dashboard into a
//! concrete inclusive date range. Recognized tokens:
//!
//! - `"<month>_<year>"` (e.g. `"june_2025"`): the whole calendar month
//! - `"ytd"`: January 1 of the reference year through the reference date
//! - `"qtd"`: first day of the reference quarter through the reference date
//! - `"month"`: the whole calendar month before the reference date
//! - `"q1_<year>"`..`"q4_<year>"`: a whole calendar quarter
//!
//! Anything else is rejected with [`KpiError::InvalidPeriod`].

use crate::error::{KpiError, Result};
use crate::utils::{
    last_day_of_month, month_from_name, month_label, month_starts_in_range, shift_months,
};
use chrono::{Datelike, Local, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PeriodWindow {
    /// The normalized token this window was resolved from
    pub token: String,
    pub start: NaiveDate,
    /// Inclusive
    pub end: NaiveDate,
    /// Human readable label, e.g. "June 2025" or "Q2 2025"
    pub label: String,
}

impl PeriodWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// First day of every calendar month the window touches.
    pub fn months(&self) -> Vec<NaiveDate> {
        month_starts_in_range(self.start, self.end)
    }

    /// Cost table keys ("March 2025") for every month in the window.
    pub fn month_labels(&self) -> Vec<String> {
        self.months().into_iter().map(month_label).collect()
    }
}

/// Resolves `token` against an explicit reference date.
pub fn resolve_period(token: &str, today: NaiveDate) -> Result<PeriodWindow> {
    let normalized = token.trim().to_ascii_lowercase();

    let (start, end, label) = match normalized.as_str() {
        "ytd" => {
            let start = ymd(today.year(), 1, 1)?;
            (start, today, format!("YTD {}", today.year()))
        }
        "qtd" => {
            let quarter = today.month0() / 3 + 1;
            let start = ymd(today.year(), (quarter - 1) * 3 + 1, 1)?;
            (start, today, format!("QTD Q{} {}", quarter, today.year()))
        }
        "month" => {
            let start = shift_months(today, -1)?;
            let end = last_day_of_month(start.year(), start.month())?;
            (start, end, month_label(start))
        }
        other => resolve_named(other)
            .ok_or_else(|| KpiError::InvalidPeriod(token.to_string()))??,
    };

    if end < start {
        return Err(KpiError::InvalidPeriod(token.to_string()));
    }

    Ok(PeriodWindow {
        token: normalized,
        start,
        end,
        label,
    })
}

/// Resolves `token` against the local calendar date.
pub fn resolve_period_today(token: &str) -> Result<PeriodWindow> {
    resolve_period(token, Local::now().date_naive())
}

/// Handles the `<prefix>_<year>` forms. `None` means the token does not
/// match the grammar at all.
fn resolve_named(token: &str) -> Option<Result<(NaiveDate, NaiveDate, String)>> {
    let (prefix, year_str) = token.split_once('_')?;
    if year_str.len() != 4 || !year_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year_str.parse().ok()?;

    if let Some(quarter) = parse_quarter(prefix) {
        let start_month = (quarter - 1) * 3 + 1;
        let range = ymd(year, start_month, 1).and_then(|start| {
            let end = last_day_of_month(year, start_month + 2)?;
            Ok((start, end, format!("Q{} {}", quarter, year)))
        });
        return Some(range);
    }

    let month = month_from_name(prefix)?;
    let range = ymd(year, month, 1).and_then(|start| {
        let end = last_day_of_month(year, month)?;
        Ok((start, end, month_label(start)))
    });
    Some(range)
}

fn parse_quarter(prefix: &str) -> Option<u32> {
    match prefix {
        "q1" => Some(1),
        "q2" => Some(2),
        "q3" => Some(3),
        "q4" => Some(4),
        _ => None,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| KpiError::DateError(format!("Invalid date {}-{}-{}", year, month, day)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_tokens_cover_whole_month() {
        let today = date(2025, 8, 20);
        let cases = [
            ("january_2025", 31),
            ("february_2024", 29),
            ("february_2025", 28),
            ("april_2025", 30),
            ("december_2025", 31),
        ];

        for (token, days) in cases {
            let window = resolve_period(token, today).unwrap();
            assert_eq!(window.start.day(), 1, "{}", token);
            assert_eq!(window.end.day(), days, "{}", token);
            assert_eq!(window.start.month(), window.end.month());
        }

        let june = resolve_period("June_2025", today).unwrap();
        assert_eq!(june.start, date(2025, 6, 1));
        assert_eq!(june.end, date(2025, 6, 30));
        assert_eq!(june.label, "June 2025");
        assert_eq!(june.token, "june_2025");
    }

    #[test]
    fn test_to_date_tokens() {
        let today = date(2025, 8, 20);

        let ytd = resolve_period("ytd", today).unwrap();
        assert_eq!(ytd.start, date(2025, 1, 1));
        assert_eq!(ytd.end, today);

        let qtd = resolve_period("qtd", today).unwrap();
        assert_eq!(qtd.start, date(2025, 7, 1));
        assert_eq!(qtd.end, today);
        assert_eq!(qtd.label, "QTD Q3 2025");

        let first_day = resolve_period("ytd", date(2025, 1, 1)).unwrap();
        assert_eq!(first_day.start, first_day.end);
    }

    #[test]
    fn test_legacy_month_is_previous_month() {
        let window = resolve_period("month", date(2025, 1, 10)).unwrap();
        assert_eq!(window.start, date(2024, 12, 1));
        assert_eq!(window.end, date(2024, 12, 31));

        let window = resolve_period("month", date(2024, 3, 31)).unwrap();
        assert_eq!(window.start, date(2024, 2, 1));
        assert_eq!(window.end, date(2024, 2, 29));
    }

    #[test]
    fn test_quarter_tokens() {
        let today = date(2025, 8, 20);
        let expected = [
            ("q1_2025", date(2025, 1, 1), date(2025, 3, 31)),
            ("q2_2025", date(2025, 4, 1), date(2025, 6, 30)),
            ("q3_2025", date(2025, 7, 1), date(2025, 9, 30)),
            ("q4_2025", date(2025, 10, 1), date(2025, 12, 31)),
            ("q1_2024", date(2024, 1, 1), date(2024, 3, 31)),
        ];
        for (token, start, end) in expected {
            let window = resolve_period(token, today).unwrap();
            assert_eq!((window.start, window.end), (start, end), "{}", token);
        }
        assert_eq!(resolve_period("q2_2025", today).unwrap().label, "Q2 2025");
    }

    #[test]
    fn test_unrecognized_tokens_are_rejected() {
        let today = date(2025, 8, 20);
        for token in ["", "junee_2025", "june", "june_25", "q5_2025", "last_week", "june_2025_x"] {
            let err = resolve_period(token, today).unwrap_err();
            assert!(matches!(err, KpiError::InvalidPeriod(_)), "{}", token);
        }
    }

    #[test]
    fn test_window_months_and_labels() {
        let window = resolve_period("q1_2025", date(2025, 8, 20)).unwrap();
        assert_eq!(window.months().len(), 3);
        assert_eq!(
            window.month_labels(),
            vec!["January 2025", "February 2025", "March 2025"]
        );
        assert!(window.contains(date(2025, 3, 31)));
        assert!(!window.contains(date(2025, 4, 1)));
    }

    #[test]
    fn test_resolve_against_local_date() {
        let before = Local::now().date_naive();
        let window = resolve_period_today("YTD").unwrap();
        let after = Local::now().date_naive();
        assert!(window.end >= before && window.end <= after);
        assert_eq!(window.start, date(window.end.year(), 1, 1));
        assert_eq!(window.token, "ytd");

        let err = resolve_period_today("last_week").unwrap_err();
        assert!(matches!(err, KpiError::InvalidPeriod(_)));
    }
}
