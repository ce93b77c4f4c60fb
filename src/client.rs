//! Client side of the JSON API, used by `browse`.

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::data::IndicatorRow;
use crate::error::{AppError, ParseError, message_from_body};
use crate::metrics::YoyPoint;

/// One map or ranking response: rows for a single indicator, region and
/// year.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub vintage: Option<String>,
    pub rows: Vec<IndicatorRow>,
}

#[derive(Debug, Deserialize)]
struct SeriesBody {
    points: Vec<YoyPoint>,
}

/// Turn a raw response into the payload of a successful envelope.
///
/// A non-2xx status, a non-JSON content type and `ok:false` each become an
/// error with the most readable message available.
pub fn decode<T: DeserializeOwned>(status: StatusCode, content_type: &str, body: &str) -> Result<T, AppError> {
    if !status.is_success() {
        return Err(AppError::Transport(message_from_body(status, body)));
    }
    if !content_type.to_ascii_lowercase().contains("json") {
        let snippet: String = body.trim().chars().take(120).collect();
        return Err(AppError::Transport(format!("expected JSON, got {content_type:?}: {snippet}")));
    }
    let value: Value = serde_json::from_str(body).map_err(ParseError::from)?;
    match value.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(serde_json::from_value(value).map_err(ParseError::from)?),
        Some(false) => {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or("request failed");
            Err(AppError::Upstream(message.to_string()))
        }
        None => Err(ParseError::shape("ok", "boolean").into()),
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        Self { http, base: base.trim_end_matches('/').to_string() }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, AppError> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, ?query, "api GET");
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await?;
        decode(status, &content_type, &body)
    }

    /// `year: None` asks for the latest year with data.
    pub async fn snapshot(&self, indicator: &str, region: &str, year: Option<i32>) -> Result<Snapshot, AppError> {
        let mut query = vec![("indicator", indicator.to_string()), ("region", region.to_string())];
        if let Some(y) = year {
            query.push(("year", y.to_string()));
        }
        self.get("/api/map", &query).await
    }

    pub async fn series(&self, indicator: &str, iso3: &str) -> Result<Vec<YoyPoint>, AppError> {
        let query = [("indicator", indicator.to_string()), ("iso3", iso3.to_string())];
        let body: SeriesBody = self.get("/api/series", &query).await?;
        Ok(body.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = "application/json";

    #[test]
    fn decodes_successful_map_envelope() {
        let body = r##"{"ok":true,"year":2022,"vintage":"v1","thresholds":[1,2],
            "rows":[{"iso3":"FRA","country":"France","value":2.7e12,"bucket":5,"color":"#08519c"},
                    {"iso3":"SSD","country":"South Sudan","value":null,"bucket":null,"color":"#bdbdbd"}]}"##;
        let snap: Snapshot = decode(StatusCode::OK, JSON, body).unwrap();
        assert_eq!(snap.year, Some(2022));
        assert_eq!(snap.rows.len(), 2);
        assert_eq!(snap.rows[1].value, None);
    }

    #[test]
    fn in_band_error_becomes_message() {
        let err = decode::<Snapshot>(StatusCode::OK, JSON, r#"{"ok":false,"error":"statement timeout"}"#).unwrap_err();
        assert_eq!(err.to_string(), "statement timeout");
        let err = decode::<Snapshot>(StatusCode::OK, JSON, r#"{"ok":false,"error":"  "}"#).unwrap_err();
        assert_eq!(err.to_string(), "request failed");
    }

    #[test]
    fn transport_failures_are_readable() {
        let err = decode::<Snapshot>(StatusCode::BAD_GATEWAY, "text/html", "<h1>bad gateway</h1>").unwrap_err();
        assert!(err.to_string().contains("502"));

        let err = decode::<Snapshot>(StatusCode::OK, "text/html", "<html>login</html>").unwrap_err();
        assert!(err.to_string().contains("text/html"));

        let err = decode::<Snapshot>(StatusCode::OK, JSON, r#"{"rows":[]}"#).unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::Shape { .. })));
    }

    #[test]
    fn series_points_use_camel_case() {
        let body = r#"{"ok":true,"points":[{"year":2021,"value":110.0,"delta":10.0,"deltaPct":10.0}]}"#;
        let s: SeriesBody = decode(StatusCode::OK, JSON, body).unwrap();
        assert_eq!(s.points[0].delta_pct, Some(10.0));
    }
}
