//! Stored-procedure calls against the hosted Postgres (PostgREST `rpc/`).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{DB_KEY_VAR, DB_URL_VAR, DbCredentials};
use crate::error::{AppError, message_from_body};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const LATEST_VINTAGE: &str = "latest_vintage";
pub const RANK_BY_REGION_YEAR: &str = "rank_by_region_year";
pub const SERIES_BY_COUNTRY: &str = "series_by_country";
pub const COVERAGE_STATS: &str = "coverage_stats";
pub const SEARCH_AREAS: &str = "search_areas";

/// Named procedures taking one JSON object of parameters.
///
/// The procedures themselves are opaque; callers only depend on the shape
/// of the rows they return.
pub trait Procedures: Send + Sync {
    fn call<'a>(&'a self, name: &'a str, params: Value) -> BoxFuture<'a, Result<Value, AppError>>;
}

pub struct PostgrestClient {
    http: reqwest::Client,
    credentials: DbCredentials,
}

impl PostgrestClient {
    pub fn new(http: reqwest::Client, credentials: DbCredentials) -> Self {
        Self { http, credentials }
    }

    async fn post(&self, name: &str, params: Value) -> Result<Value, AppError> {
        let url = self.credentials.url.as_deref().ok_or(AppError::MissingCredentials(DB_URL_VAR))?;
        let key = self.credentials.key.as_deref().ok_or(AppError::MissingCredentials(DB_KEY_VAR))?;
        let endpoint = format!("{}/rest/v1/rpc/{}", url.trim_end_matches('/'), name);
        debug!(procedure = name, %params, "rpc call");

        let resp = self
            .http
            .post(&endpoint)
            .header("apikey", key)
            .bearer_auth(key)
            .json(&params)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let msg = message_from_body(status, &body);
            warn!(procedure = name, %status, "rpc failed: {msg}");
            return Err(AppError::Upstream(msg));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| AppError::Parse(e.into()))
    }
}

impl Procedures for PostgrestClient {
    fn call<'a>(&'a self, name: &'a str, params: Value) -> BoxFuture<'a, Result<Value, AppError>> {
        Box::pin(self.post(name, params))
    }
}
