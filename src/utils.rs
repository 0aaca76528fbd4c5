use crate::error::{KpiError, Result};
use chrono::{Datelike, Days, NaiveDate};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| KpiError::DateError(format!("No month {} in year {}", month, year)))
}

/// Moves `date`'s month by `offset` months and returns the first day of the
/// resulting month. Negative offsets walk backwards across year boundaries.
pub fn shift_months(date: NaiveDate, offset: i32) -> Result<NaiveDate> {
    let index = date.year() * 12 + date.month0() as i32 + offset;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;

    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        KpiError::DateError(format!(
            "Shifting {} by {} months leaves the calendar range",
            date, offset
        ))
    })
}

pub fn month_name(month: u32) -> Option<&'static str> {
    MONTH_NAMES.get(month.checked_sub(1)? as usize).copied()
}

/// Parses an English month name (any case) into its 1-based number.
pub fn month_from_name(name: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name.trim()))
        .map(|idx| idx as u32 + 1)
}

/// Key used by the territory cost table, e.g. "June 2025".
pub fn month_label(date: NaiveDate) -> String {
    format!(
        "{} {}",
        month_name(date.month()).unwrap_or("Unknown"),
        date.year()
    )
}

/// First day of every calendar month touched by the inclusive range.
pub fn month_starts_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    if end < start {
        return months;
    }

    let mut current = first_of_month(start);
    while current <= end {
        months.push(current);
        match shift_months(current, 1) {
            Ok(next) => current = next,
            Err(_) => break,
        }
    }

    months
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2023, 2).unwrap(), date(2023, 2, 28));
        assert_eq!(last_day_of_month(2024, 2).unwrap(), date(2024, 2, 29));
        assert_eq!(last_day_of_month(2023, 4).unwrap(), date(2023, 4, 30));
        assert_eq!(last_day_of_month(2023, 12).unwrap(), date(2023, 12, 31));
        assert!(last_day_of_month(2023, 13).is_err());
    }

    #[test]
    fn test_shift_months_wraps_years() {
        assert_eq!(shift_months(date(2025, 2, 14), -3).unwrap(), date(2024, 11, 1));
        assert_eq!(shift_months(date(2025, 1, 31), -1).unwrap(), date(2024, 12, 1));
        assert_eq!(shift_months(date(2024, 12, 5), 1).unwrap(), date(2025, 1, 1));
        assert_eq!(shift_months(date(2025, 6, 1), -12).unwrap(), date(2024, 6, 1));
        assert_eq!(shift_months(date(2025, 6, 1), 0).unwrap(), date(2025, 6, 1));
    }

    #[test]
    fn test_month_names() {
        assert_eq!(month_from_name("june"), Some(6));
        assert_eq!(month_from_name("DECEMBER"), Some(12));
        assert_eq!(month_from_name("juneteenth"), None);
        assert_eq!(month_name(0), None);
        assert_eq!(month_label(date(2025, 3, 17)), "March 2025");
    }

    #[test]
    fn test_month_starts_in_range() {
        let months = month_starts_in_range(date(2024, 11, 15), date(2025, 2, 3));
        assert_eq!(
            months,
            vec![
                date(2024, 11, 1),
                date(2024, 12, 1),
                date(2025, 1, 1),
                date(2025, 2, 1)
            ]
        );
        assert!(month_starts_in_range(date(2025, 2, 1), date(2025, 1, 1)).is_empty());
    }
}
