//! HTTP value types exchanged between the core instance and an implementer.
//!
//! # Design
//! Requests and responses are described as plain data. `RequestOptions` is
//! built per call, may be replaced once by a request interceptor, and is then
//! handed to the implementer. `RequestResponse` is produced by the implementer
//! and consumed by the response data handler; it is never persisted.
//!
//! The JSON body of a response is decoded lazily through
//! [`RequestResponse::json`], so a transport that cannot supply a body (or a
//! server that returns garbage) only fails when a handler actually asks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header map. Later inserts overwrite earlier ones with the same name.
pub type Headers = BTreeMap<String, String>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Options,
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Trace,
    Connect,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name one of the eight supported methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPTIONS" => Ok(HttpMethod::Options),
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "TRACE" => Ok(HttpMethod::Trace),
            "CONNECT" => Ok(HttpMethod::Connect),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// Multipart form body. Field names may repeat; insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value without touching existing values of the same field.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn delete(&mut self, name: &str) {
        self.fields.retain(|(key, _)| key != name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|(key, _)| key == name)
    }

    /// Replace every value of `name` with a single one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter().position(|(key, _)| key == name) {
            Some(first) => {
                self.fields[first].1 = value;
                let mut index = 0;
                self.fields.retain(|(key, _)| {
                    let keep = index <= first || key != name;
                    index += 1;
                    keep
                });
            }
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Distinct field names in first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (key, _) in &self.fields {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Payload of an outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RequestBody {
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
    Form(FormData),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<FormData> for RequestBody {
    fn from(form: FormData) -> Self {
        RequestBody::Form(form)
    }
}

/// Mutable description of one outgoing call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: HttpMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub headers: Headers,
    /// Overrides the instance timeout for this call only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// `json` asks callback hosts to decode the payload before handing it back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// `text` or `arraybuffer`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_credentials: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_ipv4: Option<bool>,
}

impl RequestOptions {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Failure of the lazy JSON accessor.
#[derive(Debug, thiserror::Error)]
pub enum ResponseBodyError {
    #[error("this response does not support json")]
    Unsupported,

    #[error("JSON parse error: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// Body as supplied by the implementer.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Undecoded bytes; parsed on demand.
    Bytes(Vec<u8>),
    /// Already decoded by the host.
    Json(Value),
    /// The transport cannot provide a body.
    Unsupported,
}

/// Normalized result of a transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResponse {
    pub url: String,
    pub status: u16,
    pub ok: bool,
    pub status_text: String,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl RequestResponse {
    pub fn new(
        url: impl Into<String>,
        status: u16,
        status_text: impl Into<String>,
        headers: Headers,
        body: ResponseBody,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            ok: (200..300).contains(&status),
            status_text: status_text.into(),
            headers,
            body,
        }
    }

    /// Decode the body as JSON. Runs on every call; nothing is memoized.
    pub fn json(&self) -> Result<Value, ResponseBodyError> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
            ResponseBody::Json(value) => Ok(value.clone()),
            ResponseBody::Unsupported => Err(ResponseBodyError::Unsupported),
        }
    }
}
