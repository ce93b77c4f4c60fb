//! Typed decoding of stored-procedure results.
//!
//! Procedures return arrays of loosely typed objects; field names differ a
//! little between procedures, so each decoder accepts the known spellings.

use serde::Serialize;
use serde_json::Value;

use crate::data::IndicatorRow;
use crate::error::ParseError;
use crate::metrics::SeriesPoint;
use crate::providers::{number, text, year};

fn first_of(row: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|k| row.get(*k).filter(|v| !v.is_null()).cloned())
}

fn array<'a>(v: &'a Value, what: &str) -> Result<&'a [Value], ParseError> {
    match v {
        Value::Array(rows) => Ok(rows),
        _ => Err(ParseError::shape(what.to_string(), "array of rows")),
    }
}

/// Rows without an ISO3 code are dropped.
pub fn parse_indicator_rows(v: &Value) -> Result<Vec<IndicatorRow>, ParseError> {
    if v.is_null() {
        return Ok(Vec::new());
    }
    Ok(array(v, "rank rows")?
        .iter()
        .filter_map(|row| {
            let iso3 = text(first_of(row, &["iso3", "iso", "country_code", "area_code"]).as_ref())?;
            Some(IndicatorRow {
                iso3,
                country: text(first_of(row, &["country", "country_name", "name", "area"]).as_ref())
                    .unwrap_or_default(),
                region: text(row.get("region")),
                value: number(row.get("value")),
            })
        })
        .collect())
}

/// Year of the first row that carries one.
pub fn rows_year(v: &Value) -> Option<i32> {
    v.as_array()?.iter().find_map(|r| year(r.get("year")))
}

pub fn parse_series(v: &Value) -> Result<Vec<SeriesPoint>, ParseError> {
    if v.is_null() {
        return Ok(Vec::new());
    }
    Ok(array(v, "series rows")?
        .iter()
        .filter_map(|row| {
            Some(SeriesPoint {
                year: year(first_of(row, &["year", "date", "period"]).as_ref())?,
                value: number(row.get("value")),
            })
        })
        .collect())
}

/// `latest_vintage` may answer with a bare string, an object or a one-row
/// array.
pub fn parse_vintage(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => text(Some(&Value::String(s.clone()))),
        Value::Array(rows) => rows.first().and_then(parse_vintage),
        Value::Object(_) => text(first_of(v, &["vintage", "latest_vintage"]).as_ref()),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    pub countries: Option<u64>,
    pub rows: Option<u64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
}

pub fn parse_coverage(v: &Value) -> Result<Coverage, ParseError> {
    let obj = match v {
        Value::Array(rows) => match rows.first() {
            Some(first) => first,
            None => return Ok(Coverage::default()),
        },
        Value::Object(_) => v,
        Value::Null => return Ok(Coverage::default()),
        _ => return Err(ParseError::shape("coverage", "object")),
    };
    let count = |keys: &[&str]| number(first_of(obj, keys).as_ref()).map(|n| n.max(0.0) as u64);
    Ok(Coverage {
        countries: count(&["countries", "country_count", "n_countries"]),
        rows: count(&["rows", "row_count", "n_rows"]),
        min_year: year(first_of(obj, &["min_year", "first_year"]).as_ref()),
        max_year: year(first_of(obj, &["max_year", "last_year"]).as_ref()),
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub kind: String,
    pub code: String,
    pub label: String,
}

pub fn parse_search(v: &Value) -> Result<Vec<SearchHit>, ParseError> {
    if v.is_null() {
        return Ok(Vec::new());
    }
    Ok(array(v, "search rows")?
        .iter()
        .filter_map(|row| {
            let code = match first_of(row, &["code", "iso3", "id"])? {
                Value::Number(n) => n.to_string(),
                other => text(Some(&other))?,
            };
            Some(SearchHit {
                kind: text(first_of(row, &["kind", "type"]).as_ref()).unwrap_or_else(|| "area".to_string()),
                label: text(first_of(row, &["label", "name"]).as_ref()).unwrap_or_else(|| code.clone()),
                code,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indicator_rows_accept_alternate_spellings() {
        let v = json!([
            {"iso3": "FRA", "country": "France", "region": "Europe & Central Asia", "value": 2.7e12, "year": 2022},
            {"country_code": "DEU", "country_name": "Germany", "value": "4.0e12"},
            {"country": "No code", "value": 1}
        ]);
        let rows = parse_indicator_rows(&v).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].iso3, "DEU");
        assert_eq!(rows[1].value, Some(4.0e12));
        assert_eq!(rows_year(&v), Some(2022));
        assert!(parse_indicator_rows(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn vintage_shapes() {
        assert_eq!(parse_vintage(&json!("2024-10")).as_deref(), Some("2024-10"));
        assert_eq!(parse_vintage(&json!([{"vintage": "2024-04"}])).as_deref(), Some("2024-04"));
        assert_eq!(parse_vintage(&json!({"latest_vintage": "v3"})).as_deref(), Some("v3"));
        assert_eq!(parse_vintage(&json!([])), None);
    }

    #[test]
    fn coverage_from_single_row_array() {
        let c = parse_coverage(&json!([{"country_count": 190, "rows": 9000, "min_year": 1960, "max_year": "2023"}])).unwrap();
        assert_eq!(c, Coverage { countries: Some(190), rows: Some(9000), min_year: Some(1960), max_year: Some(2023) });
        assert_eq!(parse_coverage(&json!([])).unwrap(), Coverage::default());
        assert!(parse_coverage(&json!(5)).is_err());
    }

    #[test]
    fn series_and_search() {
        let s = parse_series(&json!([{"year": 2021, "value": 1.5}, {"value": 2}, {"date": "2022", "value": null}])).unwrap();
        assert_eq!(s, vec![SeriesPoint::new(2021, 1.5), SeriesPoint { year: 2022, value: None }]);

        let hits = parse_search(&json!([{"type": "item", "id": 56, "name": "Maize"}, {"code": "KEN"}])).unwrap();
        assert_eq!(hits[0], SearchHit { kind: "item".into(), code: "56".into(), label: "Maize".into() });
        assert_eq!(hits[1].label, "KEN");
    }
}
