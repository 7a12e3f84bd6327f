// src/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("no password configured and env var {0:?} is not set")]
    MissingSecret(String),
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("cache directory error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out waiting for {selector:?}")]
    Timeout { selector: String },
    #[error("element {selector:?} not found")]
    NotFound { selector: String },
    #[error("browser driver: {0}")]
    Driver(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0} unreachable")]
    Unreachable(String),
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
}

/// Login failures. Every variant keeps whatever page text was available so the
/// caller can report it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("portal rejected the credentials: {diagnostic}")]
    BadCredentials { diagnostic: String },
    #[error("portal requires a password change: {diagnostic}")]
    MustChangePassword { diagnostic: String },
    #[error("no session cookies after login submit{}", diagnostic_suffix(.diagnostic))]
    NoSession { diagnostic: Option<String> },
    #[error("login flow failed: {0}")]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

fn diagnostic_suffix(diagnostic: &Option<String>) -> String {
    match diagnostic {
        Some(text) => format!(": {text}"),
        None => String::new(),
    }
}

/// Failures scoped to a single invoice detail page.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("no id parameter in {link}")]
    MissingId { link: String },
    #[error("currency not found")]
    MissingCurrency,
    #[error("badge script not found")]
    MissingBadge,
    #[error("failed to parse badge data: {0}")]
    MalformedBadge(String),
    #[error("badge item {0:?} not found")]
    MissingBadgeItem(String),
    #[error("field {0:?} not found")]
    MissingField(String),
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    #[error("invalid {field} date {text:?}")]
    InvalidDate { field: &'static str, text: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("expected YYYY-MM-DD, got {0:?}")]
    InvalidIso(String),
    #[error("from date {from} is after to date {to}")]
    Inverted { from: String, to: String },
}

/// Failures that abort a whole extraction run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("navigation failed at {step}: {source}")]
    Navigation {
        step: &'static str,
        #[source]
        source: BrowserError,
    },
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Date(#[from] DateError),
}

impl ExtractError {
    pub fn navigation(step: &'static str) -> impl FnOnce(BrowserError) -> Self {
        move |source| ExtractError::Navigation { step, source }
    }
}
