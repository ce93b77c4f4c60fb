use thiserror::Error;

/// Upstream payload did not have the shape a parser expects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} at {path}")]
    Shape { path: String, expected: &'static str },

    #[error("upstream reported: {0}")]
    Upstream(String),

    #[error("invalid JSON: {0}")]
    Json(String),
}

impl ParseError {
    pub fn shape(path: impl Into<String>, expected: &'static str) -> Self {
        ParseError::Shape { path: path.into(), expected }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::Json(e.to_string())
    }
}

/// Everything a route handler or the browse client can run into.
///
/// Handlers never let these escape: they are rendered into the `error`
/// field of the response envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Upstream(String),

    #[error("unexpected response: {0}")]
    Parse(#[from] ParseError),

    #[error("database credentials missing: set {0}")]
    MissingCredentials(&'static str),

    #[error("{0}")]
    Invalid(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

/// Pull a readable message out of an error response body.
///
/// PostgREST and most JSON APIs put it under `message` or `error`; anything
/// else falls back to the trimmed text, then to the status line.
pub fn message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error", "detail", "hint"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                if !msg.trim().is_empty() {
                    return msg.trim().to_string();
                }
            }
        }
    }
    let text = body.trim();
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        let short: String = text.chars().take(300).collect();
        format!("HTTP {status}: {short}")
    }
}
