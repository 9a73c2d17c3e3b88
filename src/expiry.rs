//! Monthly expiry calendar: the last Thursday of the month, with a fixed
//! fallback when no valid date can be computed.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const FALLBACK_EXPIRY_DAYS: u64 = 30;
pub const EXCHANGE_DATE_FORMAT: &str = "%d-%b-%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirySource {
    Computed,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryDate {
    pub date: NaiveDate,
    pub source: ExpirySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringWindow {
    pub expiry: ExpiryDate,
    pub days_to_expiry: i64,
    pub monitoring_days: u32,
    pub within_window: bool,
}

/// Last Thursday of `month` in `year`. `None` for an invalid month.
pub fn last_thursday(year: i32, month: u32) -> Option<NaiveDate> {
    if !(1..=12).contains(&month) {
        return None;
    }
    let (next_year, next_month) = next_month(year, month);
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;

    let back = (last_day.weekday().num_days_from_monday() + 7
        - Weekday::Thu.num_days_from_monday())
        % 7;
    last_day.checked_sub_days(Days::new(back as u64))
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

fn computed_expiry(today: NaiveDate) -> Option<NaiveDate> {
    let current = last_thursday(today.year(), today.month())?;
    if current >= today {
        return Some(current);
    }
    let (year, month) = next_month(today.year(), today.month());
    last_thursday(year, month)
}

pub fn resolve_expiry(today: NaiveDate) -> ExpiryDate {
    match computed_expiry(today) {
        Some(date) => ExpiryDate {
            date,
            source: ExpirySource::Computed,
        },
        None => {
            let date = today
                .checked_add_days(Days::new(FALLBACK_EXPIRY_DAYS))
                .unwrap_or(today);
            warn!(%today, fallback = %date, "could not compute monthly expiry, using fallback");
            ExpiryDate {
                date,
                source: ExpirySource::Fallback,
            }
        }
    }
}

/// Nearest monthly expiry on or after `today`.
pub fn next_expiry(today: NaiveDate) -> NaiveDate {
    resolve_expiry(today).date
}

pub fn days_to_expiry(today: NaiveDate, expiry: NaiveDate) -> i64 {
    (expiry - today).num_days()
}

pub fn monitoring_window(today: NaiveDate, monitoring_days: u32) -> MonitoringWindow {
    let expiry = resolve_expiry(today);
    let days = days_to_expiry(today, expiry.date);
    MonitoringWindow {
        expiry,
        days_to_expiry: days,
        monitoring_days,
        within_window: days <= monitoring_days as i64,
    }
}

/// `29-Oct-2026`, the form the exchange lists expiries in.
pub fn format_exchange_date(date: NaiveDate) -> String {
    date.format(EXCHANGE_DATE_FORMAT).to_string()
}

pub fn parse_exchange_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), EXCHANGE_DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn last_thursday_of_known_months() {
        assert_eq!(last_thursday(2026, 10), Some(d(2026, 10, 29)));
        assert_eq!(last_thursday(2026, 12), Some(d(2026, 12, 31)));
        assert_eq!(last_thursday(2024, 2), Some(d(2024, 2, 29)));
        assert_eq!(last_thursday(2026, 2), Some(d(2026, 2, 26)));
    }

    #[test]
    fn invalid_month_has_no_last_thursday() {
        assert_eq!(last_thursday(2026, 0), None);
        assert_eq!(last_thursday(2026, 13), None);
    }

    #[test]
    fn expiry_day_itself_is_returned() {
        assert_eq!(next_expiry(d(2026, 10, 29)), d(2026, 10, 29));
    }

    #[test]
    fn rolls_to_next_month_after_expiry() {
        assert_eq!(next_expiry(d(2026, 10, 30)), d(2026, 11, 26));
    }

    #[test]
    fn rolls_across_year_end() {
        assert_eq!(next_expiry(d(2026, 12, 31)), d(2026, 12, 31));
        assert_eq!(next_expiry(d(2027, 1, 1)), d(2027, 1, 28));
    }

    #[test]
    fn expiry_never_before_today_and_non_decreasing() {
        let mut day = d(2026, 1, 1);
        let mut previous = next_expiry(day);
        for _ in 0..400 {
            let expiry = next_expiry(day);
            assert!(expiry >= day);
            assert!(expiry >= previous);
            assert_eq!(expiry.weekday(), Weekday::Thu);
            previous = expiry;
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn window_boundary_is_inclusive() {
        // 24-Sep-2026 is the September expiry
        let inside = monitoring_window(d(2026, 9, 14), 10);
        assert_eq!(inside.expiry.date, d(2026, 9, 24));
        assert_eq!(inside.days_to_expiry, 10);
        assert!(inside.within_window);

        let outside = monitoring_window(d(2026, 9, 13), 10);
        assert_eq!(outside.days_to_expiry, 11);
        assert!(!outside.within_window);
    }

    #[test]
    fn default_window_covers_every_monthly_cycle() {
        let window = monitoring_window(d(2026, 9, 25), 45);
        assert_eq!(window.expiry.date, d(2026, 10, 29));
        assert_eq!(window.days_to_expiry, 34);
        assert!(window.within_window);
    }

    #[test]
    fn exchange_date_round_trip() {
        assert_eq!(format_exchange_date(d(2026, 10, 29)), "29-Oct-2026");
        assert_eq!(parse_exchange_date("29-Oct-2026"), Some(d(2026, 10, 29)));
        assert_eq!(parse_exchange_date("not a date"), None);
    }
}
