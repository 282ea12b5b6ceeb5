//! Flexible date parsing
//!
//! Models arrive with dates in several human formats; everything is
//! normalized to a `chrono::NaiveDate` before simulation.

use chrono::NaiveDate;

// Formats tried in order. chrono month-name matching is case insensitive,
// and %d accepts unpadded days.
const FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%B %d %Y",
    "%d %B %Y",
    "%B %d, %Y",
];

/// Parse a date in any accepted format; None if nothing matches.
///
/// Accepted: ISO ("2021-02-21"), day-first ("21/2/2020"), month-name forms
/// ("January 2 2018", "2 January 2018"), bare year ("2021" => Jan 1) and
/// month-year ("January 2018" => day 1).
pub fn parse_flexible_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for fmt in FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d);
        }
    }

    // Bare year
    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = text.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    // Month-year: prepend day 1 and retry the month-name forms
    let with_day = format!("1 {}", text);
    NaiveDate::parse_from_str(&with_day, "%d %B %Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_iso_and_slash_formats() {
        assert_eq!(parse_flexible_date("2021-02-21"), Some(d(2021, 2, 21)));
        assert_eq!(parse_flexible_date("21/2/2020"), Some(d(2020, 2, 21)));
        assert_eq!(parse_flexible_date("1/1/2020"), Some(d(2020, 1, 1)));
    }

    #[test]
    fn test_month_name_formats() {
        assert_eq!(parse_flexible_date("January 2 2018"), Some(d(2018, 1, 2)));
        assert_eq!(parse_flexible_date("2 January 2018"), Some(d(2018, 1, 2)));
        assert_eq!(parse_flexible_date("january 2 2018"), Some(d(2018, 1, 2)));
    }

    #[test]
    fn test_year_and_month_year() {
        assert_eq!(parse_flexible_date("2021"), Some(d(2021, 1, 1)));
        assert_eq!(parse_flexible_date("January 2018"), Some(d(2018, 1, 1)));
        assert_eq!(parse_flexible_date("December 2016"), Some(d(2016, 12, 1)));
    }

    #[test]
    fn test_invalid_dates() {
        assert_eq!(parse_flexible_date(""), None);
        assert_eq!(parse_flexible_date("not a date"), None);
        assert_eq!(parse_flexible_date("32/1/2020"), None);
        assert_eq!(parse_flexible_date("20211"), None);
    }
}
