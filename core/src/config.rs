//! Shared request configuration.
//!
//! One `ApiConfig` is built at startup (in code or from a TOML file) and handed
//! to every `RequestCoreInstance` as an `Arc`. Instances copy the base URL and
//! default headers into their own `RequestCoreConfig`; the logging flags are
//! read from the shared value on every call.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::Headers;

#[derive(Debug, thiserror::Error)]
pub enum ApiConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: String,
    /// Sent with every request unless a call overrides the same header.
    #[serde(default)]
    pub default_header: Headers,
    #[serde(default = "default_enable_api_request_log")]
    pub enable_api_request_log: bool,
    /// Include payloads in request logs.
    #[serde(default)]
    pub enable_api_data_log: bool,
    /// Uses `YYYY MM DD HH mm ss SSS` tokens.
    #[serde(default = "default_data_date_format")]
    pub data_date_format: String,
}

fn default_enable_api_request_log() -> bool {
    true
}

fn default_data_date_format() -> String {
    "YYYY-MM-DD HH:mm:ss".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            default_header: Headers::new(),
            enable_api_request_log: default_enable_api_request_log(),
            enable_api_data_log: false,
            data_date_format: default_data_date_format(),
        }
    }
}

impl ApiConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ApiConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ApiConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ApiConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render epoch milliseconds (UTC) with `data_date_format`.
    pub fn format_millis(&self, millis: i64) -> String {
        match DateTime::<Utc>::from_timestamp_millis(millis) {
            Some(time) => time.format(&to_strftime(&self.data_date_format)).to_string(),
            None => millis.to_string(),
        }
    }
}

/// Translate date tokens into a chrono format string. Longest tokens first.
fn to_strftime(pattern: &str) -> String {
    const TOKENS: [(&str, &str); 7] = [
        ("YYYY", "%Y"),
        ("SSS", "%3f"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];

    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;
    'outer: while !rest.is_empty() {
        for (token, spec) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}
