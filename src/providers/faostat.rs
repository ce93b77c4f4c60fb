//! FAOSTAT data API (`/data/{domain}` with `output_type=objects`).

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use super::{endpoint, get_json, number, text, year};
use crate::error::{AppError, ParseError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaoRow {
    pub area: String,
    pub iso3: Option<String>,
    pub item: String,
    pub element: String,
    pub year: i32,
    pub unit: Option<String>,
    pub value: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaoQuery {
    pub domain: String,
    pub area: Option<String>,
    pub item: Option<String>,
    pub element: Option<String>,
    pub year: Option<i32>,
}

pub fn parse(root: &Value) -> Result<Vec<FaoRow>, ParseError> {
    let data = root
        .get("data")
        .ok_or_else(|| ParseError::shape("data", "array of rows"))?;
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => Ok(rows.iter().filter_map(parse_row).collect()),
        _ => Err(ParseError::shape("data", "array of rows")),
    }
}

fn parse_row(row: &Value) -> Option<FaoRow> {
    Some(FaoRow {
        area: text(row.get("Area"))?,
        iso3: text(row.get("Area Code (ISO3)")),
        item: text(row.get("Item")).unwrap_or_default(),
        element: text(row.get("Element")).unwrap_or_default(),
        year: year(row.get("Year"))?,
        unit: text(row.get("Unit")),
        value: number(row.get("Value")),
    })
}

pub fn url(base: &str, q: &FaoQuery) -> Result<Url, AppError> {
    let mut url = endpoint(base, &["data", q.domain.as_str()])?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("output_type", "objects").append_pair("show_codes", "true").append_pair("area_cs", "ISO3");
        for (key, value) in [
            ("area", q.area.clone()),
            ("item", q.item.clone()),
            ("element", q.element.clone()),
            ("year", q.year.map(|y| y.to_string())),
        ] {
            if let Some(v) = value {
                pairs.append_pair(key, &v);
            }
        }
    }
    Ok(url)
}

pub async fn fetch(http: &reqwest::Client, base: &str, q: &FaoQuery) -> Result<Vec<FaoRow>, AppError> {
    let body = get_json(http, url(base, q)?).await?;
    Ok(parse(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_rows() {
        let body = json!({"data": [
            {"Area": "Kenya", "Area Code (ISO3)": "KEN", "Item": "Maize", "Element": "Production",
             "Year": "2021", "Unit": "t", "Value": 3650000},
            {"Area": "Kenya", "Item": "Maize", "Year": 2020, "Value": "3.2e6"},
            {"Item": "no area", "Year": 2020}
        ]});
        let rows = parse(&body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].iso3.as_deref(), Some("KEN"));
        assert_eq!(rows[0].year, 2021);
        assert_eq!(rows[1].value, Some(3.2e6));
        assert_eq!(rows[1].iso3, None);
    }

    #[test]
    fn missing_data_key_is_shape_error() {
        assert!(parse(&json!({"rows": []})).is_err());
        assert_eq!(parse(&json!({"data": null})).unwrap(), vec![]);
    }

    #[test]
    fn url_includes_only_given_filters() {
        let q = FaoQuery { domain: "QCL".into(), item: Some("56".into()), year: Some(2021), ..Default::default() };
        let u = url("https://fao.example/api/v1/en/", &q).unwrap();
        assert_eq!(
            u.as_str(),
            "https://fao.example/api/v1/en/data/QCL?output_type=objects&show_codes=true&area_cs=ISO3&item=56&year=2021"
        );
    }

    #[test]
    fn url_encodes_filter_values() {
        let q = FaoQuery { domain: "QCL".into(), area: Some("Bosnia & Herzegovina".into()), ..Default::default() };
        let u = url("https://fao.example/api/v1/en", &q).unwrap();
        let area: Vec<_> = u.query_pairs().filter(|(k, _)| k == "area").map(|(_, v)| v.into_owned()).collect();
        assert_eq!(area, vec!["Bosnia & Herzegovina"]);
        assert_eq!(u.query_pairs().count(), 4);
    }
}
