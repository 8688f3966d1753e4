//! ISO week calendar helpers.
//!
//! Pure functions over UTC instants. Weeks start on Monday; week 1 is the week
//! containing the year's first Thursday.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

use crate::models::{WeekIdentifier, WeekRange};

/// ISO-8601 week number (1..=53) of the week containing `date`.
pub fn iso_week_number(date: DateTime<Utc>) -> u32 {
    date.iso_week().week()
}

/// Monday 00:00:00 to Sunday 23:59:59 of the ISO week containing `date`.
pub fn week_range(date: DateTime<Utc>) -> WeekRange {
    week_range_of_date(date.date_naive())
}

/// Identifier of the week containing `date`.
///
/// The year is the ISO week-numbering year, i.e. the year of the week's
/// Monday except when week 1 starts in late December.
pub fn week_identifier(date: DateTime<Utc>) -> WeekIdentifier {
    week_identifier_of_date(date.date_naive())
}

/// Whether `date` is the first day of its ISO week, the instant rotation becomes due.
pub fn is_window_boundary(date: DateTime<Utc>) -> bool {
    date.weekday() == Weekday::Mon
}

/// Human-readable label of a week range.
///
/// Same month: `December 2-8, 2024`. Same year: `November 25 - December 1, 2024`.
/// Otherwise: `December 30, 2024 - January 5, 2025`.
pub fn format_range(range: &WeekRange) -> String {
    let start = range.start;
    let end = range.end;
    if start.year() != end.year() {
        format!(
            "{} {}, {} - {} {}, {}",
            month_name(start),
            start.day(),
            start.year(),
            month_name(end),
            end.day(),
            end.year()
        )
    } else if start.month() != end.month() {
        format!(
            "{} {} - {} {}, {}",
            month_name(start),
            start.day(),
            month_name(end),
            end.day(),
            end.year()
        )
    } else {
        format!(
            "{} {}-{}, {}",
            month_name(start),
            start.day(),
            end.day(),
            end.year()
        )
    }
}

pub fn week_identifier_of_date(date: NaiveDate) -> WeekIdentifier {
    let iso = date.iso_week();
    WeekIdentifier {
        year: iso.year(),
        week_number: iso.week(),
    }
}

pub fn week_range_of_date(date: NaiveDate) -> WeekRange {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    let start = monday.and_time(chrono::NaiveTime::MIN).and_utc();
    WeekRange {
        start,
        end: start + Duration::days(7) - Duration::seconds(1),
    }
}

pub fn week_range_of_id(id: &WeekIdentifier) -> WeekRange {
    week_range_of_date(id.monday())
}

fn month_name(date: DateTime<Utc>) -> String {
    date.format("%B").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 30, 0).unwrap()
    }

    fn range(y1: i32, m1: u32, d1: u32) -> WeekRange {
        week_range(at(y1, m1, d1))
    }

    #[test]
    fn test_year_boundary_week_numbers() {
        assert_eq!(iso_week_number(at(2023, 12, 31)), 52);
        assert_eq!(week_identifier(at(2023, 12, 31)).to_string(), "2023-52");
        assert_eq!(week_identifier(at(2024, 1, 1)).to_string(), "2024-01");
        assert_eq!(iso_week_number(at(2024, 12, 30)), 1);
        assert_eq!(week_identifier(at(2024, 12, 30)).to_string(), "2025-01");
        // Early January belonging to the previous year's last week.
        assert_eq!(week_identifier(at(2021, 1, 1)).to_string(), "2020-53");
        assert_eq!(week_identifier(at(2022, 1, 2)).to_string(), "2021-52");
    }

    #[test]
    fn test_monday_reports_same_identifier_as_any_day() {
        let mut day = at(2020, 12, 20);
        for _ in 0..800 {
            let monday = week_range(day).start;
            assert_eq!(week_identifier(monday), week_identifier(day), "{}", day);
            day += Duration::days(1);
        }
    }

    #[test]
    fn test_week_range_identical_within_week() {
        let expected = range(2024, 12, 2);
        for d in 2..=8 {
            assert_eq!(range(2024, 12, d), expected);
        }
        assert_ne!(range(2024, 12, 9), expected);
    }

    #[test]
    fn test_week_range_bounds() {
        let r = range(2024, 12, 5);
        assert_eq!(r.start, Utc.with_ymd_and_hms(2024, 12, 2, 0, 0, 0).unwrap());
        assert_eq!(r.end, Utc.with_ymd_and_hms(2024, 12, 8, 23, 59, 59).unwrap());
        assert_eq!(
            r.end - r.start,
            Duration::days(6) + Duration::hours(23) + Duration::minutes(59) + Duration::seconds(59)
        );
        // Sunday late evening stays in the same week.
        let sunday_night = Utc.with_ymd_and_hms(2024, 12, 8, 23, 59, 59).unwrap();
        assert_eq!(week_range(sunday_night), r);
    }

    #[test]
    fn test_format_range_variants() {
        assert_eq!(format_range(&range(2024, 12, 2)), "December 2-8, 2024");
        assert_eq!(format_range(&range(2024, 11, 25)), "November 25 - December 1, 2024");
        assert_eq!(
            format_range(&range(2024, 12, 30)),
            "December 30, 2024 - January 5, 2025"
        );
    }

    #[test]
    fn test_window_boundary_is_monday() {
        assert!(is_window_boundary(Utc.with_ymd_and_hms(2024, 12, 9, 0, 0, 0).unwrap()));
        assert!(is_window_boundary(at(2024, 12, 9)));
        assert!(!is_window_boundary(at(2024, 12, 8)));
        assert!(!is_window_boundary(at(2024, 12, 10)));
    }

    #[test]
    fn test_range_of_id_matches_range_of_date() {
        let id = week_identifier(at(2025, 1, 3));
        assert_eq!(week_range_of_id(&id), range(2025, 1, 3));
    }
}
