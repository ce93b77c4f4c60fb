//! IMF DataMapper metadata (WEO countries and indicators).

use serde::Serialize;
use serde_json::Value;

use super::{endpoint, get_json, text};
use crate::error::{AppError, ParseError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImfCountry {
    pub code: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImfIndicator {
    pub code: String,
    pub label: String,
    pub unit: Option<String>,
    pub dataset: Option<String>,
}

fn section<'a>(root: &'a Value, key: &'static str) -> Result<&'a serde_json::Map<String, Value>, ParseError> {
    root.get(key).and_then(Value::as_object).ok_or_else(|| ParseError::shape(key, "object keyed by code"))
}

/// Entries without a label are skipped. Sorted by code.
pub fn parse_countries(root: &Value) -> Result<Vec<ImfCountry>, ParseError> {
    let mut out: Vec<ImfCountry> = section(root, "countries")?
        .iter()
        .filter_map(|(code, v)| Some(ImfCountry { code: code.clone(), label: text(v.get("label"))? }))
        .collect();
    out.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(out)
}

pub fn parse_indicators(root: &Value) -> Result<Vec<ImfIndicator>, ParseError> {
    let mut out: Vec<ImfIndicator> = section(root, "indicators")?
        .iter()
        .filter_map(|(code, v)| {
            Some(ImfIndicator {
                code: code.clone(),
                label: text(v.get("label"))?,
                unit: text(v.get("unit")),
                dataset: text(v.get("dataset")),
            })
        })
        .collect();
    out.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(out)
}

pub async fn fetch_countries(http: &reqwest::Client, base: &str) -> Result<Vec<ImfCountry>, AppError> {
    let body = get_json(http, endpoint(base, &["countries"])?).await?;
    Ok(parse_countries(&body)?)
}

pub async fn fetch_indicators(http: &reqwest::Client, base: &str) -> Result<Vec<ImfIndicator>, AppError> {
    let body = get_json(http, endpoint(base, &["indicators"])?).await?;
    Ok(parse_indicators(&body)?)
}
