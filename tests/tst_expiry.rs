mod common;

use chrono::{Datelike, Weekday};
use common::date;
use dispersion_monitor::expiry::{
    ExpirySource, days_to_expiry, last_thursday, monitoring_window, next_expiry, resolve_expiry,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_on_last_thursday_is_today() {
        let thursday = last_thursday(2026, 10).unwrap();
        assert_eq!(thursday, date(2026, 10, 29));
        assert_eq!(next_expiry(thursday), thursday);
        assert_eq!(days_to_expiry(thursday, next_expiry(thursday)), 0);
    }

    #[test]
    fn test_day_after_expiry_rolls_to_next_month() {
        assert_eq!(next_expiry(date(2026, 10, 30)), date(2026, 11, 26));
    }

    #[test]
    fn test_december_rolls_into_january() {
        let dec_expiry = last_thursday(2026, 12).unwrap();
        assert_eq!(dec_expiry, date(2026, 12, 31));
        assert_eq!(next_expiry(date(2027, 1, 1)), date(2027, 1, 28));

        let dec_2025 = last_thursday(2025, 12).unwrap();
        assert_eq!(dec_2025, date(2025, 12, 25));
        assert_eq!(next_expiry(date(2025, 12, 26)), date(2026, 1, 29));
    }

    #[test]
    fn test_same_day_requery_is_stable() {
        let today = date(2026, 10, 16);
        let first = resolve_expiry(today);
        let second = resolve_expiry(today);
        assert_eq!(first, second);
        assert_eq!(first.source, ExpirySource::Computed);
        assert_eq!(first.date.weekday(), Weekday::Thu);
    }

    #[test]
    fn test_days_to_expiry_counts_down() {
        let mut day = date(2026, 9, 25);
        let mut previous = days_to_expiry(day, next_expiry(day));
        assert_eq!(previous, 34);

        while day < date(2026, 10, 29) {
            day = day.succ_opt().unwrap();
            let days = days_to_expiry(day, next_expiry(day));
            assert_eq!(days, previous - 1);
            previous = days;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_monitoring_window_boundary() {
        // 31 and 30 days before 29-Oct-2026
        let outside = monitoring_window(date(2026, 9, 28), 30);
        assert_eq!(outside.days_to_expiry, 31);
        assert!(!outside.within_window);

        let inside = monitoring_window(date(2026, 9, 29), 30);
        assert_eq!(inside.days_to_expiry, 30);
        assert!(inside.within_window);
    }
}
