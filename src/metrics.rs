//! Table-level derivations: year-over-year change, share of total and
//! compact number formatting.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub year: i32,
    pub value: Option<f64>,
}

#[cfg(test)]
impl SeriesPoint {
    pub fn new(year: i32, value: f64) -> Self {
        Self { year, value: Some(value) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoyPoint {
    pub year: i32,
    pub value: Option<f64>,
    pub delta: Option<f64>,
    pub delta_pct: Option<f64>,
}

/// Dedupe by year (first occurrence wins) and sort ascending.
pub fn normalize_series(points: impl IntoIterator<Item = SeriesPoint>) -> Vec<SeriesPoint> {
    let mut out: Vec<SeriesPoint> = Vec::new();
    for p in points {
        if !out.iter().any(|q| q.year == p.year) {
            out.push(p);
        }
    }
    out.sort_by_key(|p| p.year);
    out
}

/// Change against the immediately preceding point. Input must already be
/// sorted and deduplicated.
pub fn yoy(points: &[SeriesPoint]) -> Vec<YoyPoint> {
    let mut prev: Option<&SeriesPoint> = None;
    points
        .iter()
        .map(|p| {
            let pair = prev.and_then(|q| Some((q.value?, p.value?)));
            prev = Some(p);
            let delta = pair.map(|(a, b)| b - a);
            let delta_pct = pair
                .filter(|(a, _)| *a != 0.0)
                .map(|(a, b)| (b - a) / a.abs() * 100.0);
            YoyPoint { year: p.year, value: p.value, delta, delta_pct }
        })
        .collect()
}

/// Sum of finite values; `None` when there are none.
pub fn period_total(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// `value / total * 100`; `None` when the total is zero or unknown.
pub fn share(value: Option<f64>, total: Option<f64>) -> Option<f64> {
    let total = total.filter(|t| t.is_finite() && *t != 0.0)?;
    value.filter(|v| v.is_finite()).map(|v| v / total * 100.0)
}

pub fn shares(values: &[Option<f64>], total: Option<f64>) -> Vec<Option<f64>> {
    values.iter().map(|v| share(*v, total)).collect()
}

/// `1.23T`, `4.56B`, `7.89M`, `12.3K`, otherwise two decimals.
pub fn format_compact(value: f64) -> String {
    if !value.is_finite() {
        return "–".to_string();
    }
    let abs = value.abs();
    if abs >= 1_000_000_000_000.0 {
        format!("{:.2}T", value / 1_000_000_000_000.0)
    } else if abs >= 1_000_000_000.0 {
        format!("{:.2}B", value / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn yoy_matches_hand_computed_values() {
        let series = [
            SeriesPoint::new(2020, 100.0),
            SeriesPoint::new(2021, 110.0),
            SeriesPoint::new(2022, 88.0),
        ];
        let out = yoy(&series);
        assert_eq!(out[0].delta, None);
        assert_eq!(out[0].delta_pct, None);
        assert!(close(out[1].delta, 10.0));
        assert!(close(out[1].delta_pct, 10.0));
        assert!(close(out[2].delta, -22.0));
        assert!(close(out[2].delta_pct, -20.0));
    }

    #[test]
    fn yoy_handles_zero_and_missing_previous() {
        let series = [
            SeriesPoint::new(2000, 0.0),
            SeriesPoint::new(2001, 5.0),
            SeriesPoint { year: 2002, value: None },
            SeriesPoint::new(2003, 7.0),
        ];
        let out = yoy(&series);
        assert!(close(out[1].delta, 5.0));
        assert_eq!(out[1].delta_pct, None);
        assert_eq!(out[2].delta, None);
        assert_eq!(out[3].delta, None);
    }

    #[test]
    fn negative_base_uses_absolute_value() {
        let out = yoy(&[SeriesPoint::new(1, -50.0), SeriesPoint::new(2, -25.0)]);
        assert!(close(out[1].delta_pct, 50.0));
    }

    #[test]
    fn normalize_dedupes_first_wins_and_sorts() {
        let out = normalize_series([
            SeriesPoint::new(2021, 2.0),
            SeriesPoint::new(2020, 1.0),
            SeriesPoint::new(2021, 99.0),
        ]);
        assert_eq!(out, vec![SeriesPoint::new(2020, 1.0), SeriesPoint::new(2021, 2.0)]);
    }

    #[test]
    fn shares_of_total() {
        let values = [Some(25.0), Some(75.0), None];
        let total = period_total(values);
        assert_eq!(total, Some(100.0));
        let s = shares(&values, total);
        assert!(close(s[0], 25.0));
        assert!(close(s[1], 75.0));
        assert_eq!(s[2], None);
        assert_eq!(share(Some(1.0), Some(0.0)), None);
        assert_eq!(share(Some(1.0), None), None);
        assert_eq!(period_total([None, Some(f64::NAN)]), None);
    }

    #[test]
    fn compact_formatting() {
        assert_eq!(format_compact(2.5e13), "25.00T");
        assert_eq!(format_compact(-4.56e9), "-4.56B");
        assert_eq!(format_compact(7_890_000.0), "7.89M");
        assert_eq!(format_compact(12_345.0), "12.3K");
        assert_eq!(format_compact(3.14159), "3.14");
        assert_eq!(format_compact(f64::NAN), "–");
    }
}
