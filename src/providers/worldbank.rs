//! World Bank indicator API (`v2`, JSON format).
//!
//! Responses are `[meta, rows]` where `meta` carries paging. Errors come
//! back with HTTP 200 as `[{"message": [{"key": …, "value": …}]}]`.

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::{endpoint, get_json, number, text, year};
use crate::error::{AppError, ParseError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WbObservation {
    pub iso3: String,
    pub country: String,
    pub indicator: String,
    pub year: i32,
    pub value: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WbPage {
    pub page: u32,
    pub pages: u32,
    pub rows: Vec<WbObservation>,
}

pub fn parse_page(root: &Value) -> Result<WbPage, ParseError> {
    let parts = root.as_array().ok_or_else(|| ParseError::shape("$", "[meta, rows] array"))?;
    let meta = parts.first().ok_or_else(|| ParseError::shape("$[0]", "paging object"))?;

    if let Some(messages) = meta.get("message").and_then(Value::as_array) {
        let msg = messages
            .iter()
            .filter_map(|m| text(m.get("value")).or_else(|| text(m.get("key"))))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ParseError::Upstream(if msg.is_empty() { "World Bank API error".into() } else { msg }));
    }
    if !meta.is_object() {
        return Err(ParseError::shape("$[0]", "paging object"));
    }

    let page = number(meta.get("page")).map_or(1, |p| p as u32);
    let pages = number(meta.get("pages")).map_or(1, |p| p as u32);

    let rows = match parts.get(1) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(rows)) => rows.iter().filter_map(parse_row).collect(),
        Some(_) => return Err(ParseError::shape("$[1]", "array of observations")),
    };
    Ok(WbPage { page, pages, rows })
}

fn parse_row(row: &Value) -> Option<WbObservation> {
    let iso3 = text(row.get("countryiso3code"))?;
    Some(WbObservation {
        iso3,
        country: text(row.get("country").and_then(|c| c.get("value"))).unwrap_or_default(),
        indicator: text(row.get("indicator").and_then(|c| c.get("id"))).unwrap_or_default(),
        year: year(row.get("date"))?,
        value: number(row.get("value")),
    })
}

pub fn page_url(base: &str, iso3: &str, indicator: &str, from: i32, to: i32, page: u32) -> Result<Url, AppError> {
    let mut url = endpoint(base, &["country", iso3, "indicator", indicator])?;
    url.query_pairs_mut()
        .append_pair("format", "json")
        .append_pair("date", &format!("{from}:{to}"))
        .append_pair("per_page", "1000")
        .append_pair("page", &page.to_string());
    Ok(url)
}

/// Follows pagination up to `max_pages` and concatenates the rows.
pub async fn fetch_indicator(
    http: &reqwest::Client,
    base: &str,
    iso3: &str,
    indicator: &str,
    from: i32,
    to: i32,
    max_pages: u32,
) -> Result<Vec<WbObservation>, AppError> {
    let mut rows = Vec::new();
    let mut page = 1;
    loop {
        let body = get_json(http, page_url(base, iso3, indicator, from, to, page)?).await?;
        let parsed = parse_page(&body)?;
        rows.extend(parsed.rows);
        if parsed.page >= parsed.pages {
            break;
        }
        if page >= max_pages.max(1) {
            warn!(indicator, pages = parsed.pages, "World Bank paging capped at {max_pages}");
            break;
        }
        page += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_meta_and_rows() {
        let body = json!([
            {"page": 1, "pages": 3, "per_page": 2, "total": 6},
            [
                {"indicator": {"id": "SP.POP.TOTL", "value": "Population"},
                 "country": {"id": "FR", "value": "France"},
                 "countryiso3code": "FRA", "date": "2022", "value": 68000000},
                {"indicator": {"id": "SP.POP.TOTL"}, "country": {"value": "France"},
                 "countryiso3code": "FRA", "date": "2021", "value": null},
                {"country": {"value": "Aggregate"}, "countryiso3code": "", "date": "2021", "value": 1}
            ]
        ]);
        let page = parse_page(&body).unwrap();
        assert_eq!((page.page, page.pages), (1, 3));
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0].value, Some(68_000_000.0));
        assert_eq!(page.rows[1].value, None);
        assert_eq!(page.rows[1].year, 2021);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let page = parse_page(&json!([{"page": 0, "pages": 0}, null])).unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn message_envelope_is_upstream_error() {
        let body = json!([{"message": [{"id": "120", "key": "Invalid value",
            "value": "The provided parameter value is not valid"}]}]);
        assert_eq!(
            parse_page(&body),
            Err(ParseError::Upstream("The provided parameter value is not valid".into()))
        );
    }

    #[test]
    fn wrong_shape_is_parse_error() {
        assert!(parse_page(&json!({"rows": []})).is_err());
        assert!(parse_page(&json!([{"page": 1}, {"not": "array"}])).is_err());
    }

    #[test]
    fn page_url_keeps_indicator_in_its_own_segment() {
        let url = page_url("https://api.worldbank.org/v2", "all", "NY.GDP/X Y", 2000, 2010, 2).unwrap();
        assert_eq!(url.path(), "/v2/country/all/indicator/NY.GDP%2FX%20Y");
        assert_eq!(url.query(), Some("format=json&date=2000%3A2010&per_page=1000&page=2"));
    }
}
