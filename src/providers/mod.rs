//! Public statistical APIs.
//!
//! Each provider pairs a fetch function with a parse function. Parsers take
//! a `serde_json::Value` and return `Result<_, ParseError>`: a wrong
//! envelope is an error, a malformed row is skipped.

use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, message_from_body};

pub mod faostat;
pub mod imf;
pub mod oecd;
pub mod worldbank;

/// `base` with each of `segments` appended as one escaped path segment.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, AppError> {
    let invalid = || AppError::Invalid(format!("invalid upstream base URL: {base}"));
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut().map_err(|_| invalid())?.pop_if_empty().extend(segments);
    Ok(url)
}

/// GET `url` and decode the body as JSON.
///
/// Non-2xx statuses and non-JSON bodies become errors carrying whatever
/// text the upstream sent back.
pub async fn get_json(http: &reqwest::Client, url: Url) -> Result<Value, AppError> {
    debug!(%url, "upstream GET");
    let resp = http.get(url.clone()).header(ACCEPT, "application/json").send().await?;
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(AppError::Upstream(message_from_body(status, &body)));
    }
    if !content_type.is_empty() && !content_type.contains("json") {
        let snippet: String = body.trim().chars().take(200).collect();
        return Err(AppError::Transport(format!("expected JSON from {url}, got {content_type}: {snippet}")));
    }
    serde_json::from_str(&body).map_err(|e| AppError::Parse(e.into()))
}

/// Number, or a string holding one.
pub(crate) fn number(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|f: &f64| f.is_finite())
}

/// Year from `2021`, `"2021"` or `"2021-Q3"` style values.
pub(crate) fn year(v: Option<&Value>) -> Option<i32> {
    match v? {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().get(..4)?.parse().ok(),
        _ => None,
    }
}

pub(crate) fn text(v: Option<&Value>) -> Option<String> {
    v?.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loose_field_helpers() {
        assert_eq!(number(Some(&json!("12.5"))), Some(12.5));
        assert_eq!(number(Some(&json!(3))), Some(3.0));
        assert_eq!(number(Some(&json!(""))), None);
        assert_eq!(number(Some(&json!(null))), None);
        assert_eq!(year(Some(&json!("2021-Q3"))), Some(2021));
        assert_eq!(year(Some(&json!(1999))), Some(1999));
        assert_eq!(year(Some(&json!("n/a"))), None);
        assert_eq!(text(Some(&json!("  "))), None);
    }

    #[test]
    fn endpoint_escapes_each_segment() {
        let url = endpoint("https://api.example/v2/", &["country", "a/b c", "NY.GDP#1"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example/v2/country/a%2Fb%20c/NY.GDP%231");
        assert!(matches!(endpoint("not a url", &["x"]), Err(AppError::Invalid(_))));
    }

    #[tokio::test]
    async fn get_json_asks_for_json() {
        use axum::{Json, Router, http::HeaderMap, routing::get};

        let app = Router::new().route(
            "/echo",
            get(|headers: HeaderMap| async move {
                Json(json!({"accept": headers.get(ACCEPT).and_then(|v| v.to_str().ok())}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let url = endpoint(&format!("http://{addr}"), &["echo"]).unwrap();
        let body = get_json(&reqwest::Client::new(), url).await.unwrap();
        assert_eq!(body["accept"], json!("application/json"));
    }
}
