//! Permissive query-parameter parsing: blank or invalid input falls back to
//! a documented default instead of rejecting the request.

use chrono::{DateTime, Datelike, Utc};

use crate::resolver::normalize_iso3;

pub const DEFAULT_REGION: &str = "World";
pub const DEFAULT_TOP: u32 = 20;
pub const MAX_TOP: u32 = 250;
pub const FIRST_YEAR: i32 = 1960;

/// Trimmed, non-empty text.
pub fn text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn region(raw: Option<&str>) -> String {
    text(raw).unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// `1..=250`, default 20.
pub fn top(raw: Option<&str>) -> u32 {
    text(raw)
        .and_then(|s| s.parse::<i64>().ok())
        .map(|n| n.clamp(1, MAX_TOP as i64) as u32)
        .unwrap_or(DEFAULT_TOP)
}

/// A plausible calendar year, otherwise `None` (meaning "latest").
pub fn year(raw: Option<&str>) -> Option<i32> {
    text(raw)
        .and_then(|s| s.parse::<i32>().ok())
        .filter(|y| (1900..=2100).contains(y))
}

/// Defaults to `1960..=current`; a reversed range is swapped.
pub fn year_range(from: Option<&str>, to: Option<&str>, current: i32) -> (i32, i32) {
    let from = year(from).unwrap_or(FIRST_YEAR);
    let to = year(to).unwrap_or(current);
    if from <= to { (from, to) } else { (to, from) }
}

pub fn iso3(raw: Option<&str>) -> Option<String> {
    normalize_iso3(raw?)
}

pub fn current_year() -> i32 {
    year_at(Utc::now())
}

fn year_at(now: DateTime<Utc>) -> i32 {
    now.year()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanks_and_junk_fall_back() {
        assert_eq!(region(Some("  ")), "World");
        assert_eq!(region(Some(" Europe & Central Asia ")), "Europe & Central Asia");
        assert_eq!(top(None), 20);
        assert_eq!(top(Some("abc")), 20);
        assert_eq!(top(Some("0")), 1);
        assert_eq!(top(Some("100000")), 250);
        assert_eq!(year(Some("2021")), Some(2021));
        assert_eq!(year(Some("21")), None);
        assert_eq!(year(Some("")), None);
        assert_eq!(iso3(Some(" deu")), Some("DEU".to_string()));
        assert_eq!(iso3(Some("Germany")), None);
    }

    #[test]
    fn year_range_defaults_and_swaps() {
        assert_eq!(year_range(None, None, 2026), (1960, 2026));
        assert_eq!(year_range(Some("2020"), Some("2010"), 2026), (2010, 2020));
        assert_eq!(year_range(Some("x"), Some("2000"), 2026), (1960, 2000));
    }

    #[test]
    fn current_year_follows_the_calendar() {
        assert!(current_year() >= 2024);
        let new_years_eve = DateTime::from_timestamp(1_767_204_000, 0).unwrap();
        assert_eq!(year_at(new_years_eve), 2025);
        let last_second = DateTime::from_timestamp(1_767_225_599, 0).unwrap();
        assert_eq!(year_at(last_second), 2025);
        assert_eq!(year_at(DateTime::from_timestamp(1_767_225_600, 0).unwrap()), 2026);
    }
}
