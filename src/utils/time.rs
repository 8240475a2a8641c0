use std::fmt::Display;

use chrono::{Datelike, Days, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// This is the standard way of converting a date to a day bucket key in sitetime.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

/// Reporting window. Every period ends at (and includes) an anchor date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Day => write!(f, "day"),
            Period::Week => write!(f, "week"),
            Period::Month => write!(f, "month"),
            Period::Quarter => write!(f, "quarter"),
            Period::Year => write!(f, "year"),
        }
    }
}

impl Period {
    /// First calendar day covered by the period ending at `end`.
    pub fn start(&self, end: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => end,
            Period::Week => end.checked_sub_days(Days::new(6)).unwrap_or(NaiveDate::MIN),
            Period::Month => end.with_day(1).unwrap_or(end),
            Period::Quarter => {
                let quarter_month = (end.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(end.year(), quarter_month, 1).unwrap_or(end)
            }
            Period::Year => NaiveDate::from_ymd_opt(end.year(), 1, 1).unwrap_or(end),
        }
    }

    /// Every calendar day of the period, oldest first, both ends inclusive.
    pub fn dates(&self, end: NaiveDate) -> Vec<NaiveDate> {
        self.start(end)
            .iter_days()
            .take_while(|day| *day <= end)
            .collect()
    }
}

/// Formats seconds as "2h 30m 15s", skipping leading zero units.
pub fn format_seconds(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{date_key, format_seconds, parse_date_key, Period};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_covers_seven_days() {
        let days = Period::Week.dates(date(2024, 3, 15));
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], date(2024, 3, 9));
        assert_eq!(days[6], date(2024, 3, 15));
    }

    #[test]
    fn test_week_crosses_month_boundary() {
        let days = Period::Week.dates(date(2024, 3, 2));
        assert_eq!(days[0], date(2024, 2, 25));
        assert!(days.contains(&date(2024, 2, 29)));
    }

    #[test]
    fn test_month_quarter_and_year_starts() {
        let end = date(2024, 8, 20);
        assert_eq!(Period::Day.dates(end), vec![end]);
        assert_eq!(Period::Month.start(end), date(2024, 8, 1));
        assert_eq!(Period::Month.dates(end).len(), 20);
        assert_eq!(Period::Quarter.start(end), date(2024, 7, 1));
        assert_eq!(Period::Quarter.start(date(2024, 12, 31)), date(2024, 10, 1));
        assert_eq!(Period::Quarter.start(date(2024, 1, 1)), date(2024, 1, 1));
        assert_eq!(Period::Year.start(end), date(2024, 1, 1));
        assert_eq!(Period::Year.dates(date(2024, 12, 31)).len(), 366);
    }

    #[test]
    fn test_date_keys() {
        assert_eq!(date_key(date(2024, 3, 5)), "2024-03-05");
        assert_eq!(parse_date_key("2024-03-05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_date_key("garbage"), None);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0), "0s");
        assert_eq!(format_seconds(59), "59s");
        assert_eq!(format_seconds(60), "1m");
        assert_eq!(format_seconds(9015), "2h 30m 15s");
        assert_eq!(format_seconds(3600), "1h");
    }
}
