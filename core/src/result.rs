//! Success and failure envelopes returned by `RequestCoreInstance::request`.
//!
//! # Design
//! A successful call yields a `RequestApiResult`: the server's code, message,
//! its `data` field (optionally converted into a domain model) and the raw
//! body. Failures yield a `RequestApiError` whose `error_type` records the
//! layer that failed (network, status, server, business, script) rather than
//! the concrete Rust error that caused it. Handlers and callers branch on
//! that type.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::http::RequestOptions;

/// Converts a raw server payload into a domain value.
pub struct ModelCreator<T> {
    convert: Arc<dyn Fn(Value) -> Result<T, String> + Send + Sync>,
    transforms: bool,
}

impl<T> Clone for ModelCreator<T> {
    fn clone(&self) -> Self {
        Self {
            convert: Arc::clone(&self.convert),
            transforms: self.transforms,
        }
    }
}

impl<T> fmt::Debug for ModelCreator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCreator")
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

impl<T> ModelCreator<T> {
    pub fn new<F>(convert: F) -> Self
    where
        F: Fn(Value) -> Result<T, String> + Send + Sync + 'static,
    {
        Self {
            convert: Arc::new(convert),
            transforms: true,
        }
    }

    pub fn convert(&self, raw: Value) -> Result<T, String> {
        (self.convert)(raw)
    }
}

impl<T: DeserializeOwned> ModelCreator<T> {
    /// Model hook backed by `T`'s `Deserialize` impl.
    pub fn deserialize() -> Self {
        Self::new(|raw| serde_json::from_value(raw).map_err(|e| e.to_string()))
    }
}

impl ModelCreator<Value> {
    /// Leaves the payload untouched; `data` stays the server's `data` field.
    pub fn raw() -> Self {
        Self {
            convert: Arc::new(|raw: Value| -> Result<Value, String> { Ok(raw) }),
            transforms: false,
        }
    }
}

/// The shape of `data` did not match what an accessor expected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResultShapeError {
    #[error("result data is not an array")]
    NotAnArray,

    #[error("result data is an array and cannot be read as key/value data")]
    IsAnArray,
}

/// Successful API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestApiResult<T = Value> {
    pub code: i64,
    pub message: String,
    pub data: Option<T>,
    /// The body exactly as the server sent it.
    pub raw: Value,
}

impl RequestApiResult<Value> {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>, raw: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data,
            raw,
        }
    }

    /// Run the payload through `model`.
    ///
    /// A transforming hook is fed the server `data` when present and the whole
    /// raw body otherwise. `raw` is carried over untouched.
    pub fn into_model<T>(self, model: &ModelCreator<T>) -> Result<RequestApiResult<T>, String> {
        let data = match self.data {
            Some(data) => Some(model.convert(data)?),
            None if model.transforms && !self.raw.is_null() => Some(model.convert(self.raw.clone())?),
            None => None,
        };
        Ok(RequestApiResult {
            code: self.code,
            message: self.message,
            data,
            raw: self.raw,
        })
    }

    /// `data` as an array.
    pub fn array_data(&self) -> Result<&Vec<Value>, ResultShapeError> {
        match &self.data {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ResultShapeError::NotAnArray),
        }
    }
}

impl<T: Serialize> RequestApiResult<T> {
    /// Re-wrap this result around another model, keeping code, message and raw.
    pub fn clone_with_other_model<U: Serialize>(
        &self,
        model: &U,
    ) -> Result<RequestApiResult<Value>, serde_json::Error> {
        Ok(RequestApiResult {
            code: self.code,
            message: self.message.clone(),
            data: Some(serde_json::to_value(model)?),
            raw: self.raw.clone(),
        })
    }

    /// `data` as a plain key/value object; `{}` when there is no data.
    pub fn key_value_data(&self) -> Result<Map<String, Value>, ResultShapeError> {
        let value = match &self.data {
            Some(data) => serde_json::to_value(data).unwrap_or(Value::Null),
            None => Value::Null,
        };
        match value {
            Value::Array(_) => Err(ResultShapeError::IsAnArray),
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

impl<T: Serialize> fmt::Display for RequestApiResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = serde_json::to_string(&self.data).unwrap_or_default();
        write!(f, "{} {} data: {} raw: {}", self.code, self.message, data, self.raw)
    }
}

/// Layer a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestApiErrorType {
    /// The transport could not complete the call.
    #[serde(rename = "networkError")]
    NetworkError,
    /// 4xx status, or a body-level status mismatch.
    #[serde(rename = "statusError")]
    StatusError,
    /// 5xx status.
    #[serde(rename = "serverError")]
    ServerError,
    /// Success status but a caller-defined business rule failed. Never raised
    /// by the default handlers.
    #[serde(rename = "businessError")]
    BusinessError,
    /// Application code failed while processing the response.
    #[serde(rename = "scriptError")]
    ScriptError,
    #[serde(rename = "unknow")]
    Unknown,
}

impl RequestApiErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestApiErrorType::NetworkError => "networkError",
            RequestApiErrorType::StatusError => "statusError",
            RequestApiErrorType::ServerError => "serverError",
            RequestApiErrorType::BusinessError => "businessError",
            RequestApiErrorType::ScriptError => "scriptError",
            RequestApiErrorType::Unknown => "unknow",
        }
    }
}

impl fmt::Display for RequestApiErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestApiError {
    pub error_type: RequestApiErrorType,
    pub message: String,
    /// Short description of `code`.
    pub code_message: String,
    pub code: i64,
    /// Partial data the server returned alongside the failure.
    pub data: Option<Value>,
    pub raw_data: Option<Value>,
    pub raw_request: Option<RequestOptions>,
    pub api_name: String,
    pub api_url: String,
}

impl RequestApiError {
    pub fn new(error_type: RequestApiErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            code_message: String::new(),
            code: 0,
            data: None,
            raw_data: None,
            raw_request: None,
            api_name: String::new(),
            api_url: String::new(),
        }
    }

    pub fn with_code(mut self, code: i64, code_message: impl Into<String>) -> Self {
        self.code = code;
        self.code_message = code_message.into();
        self
    }

    pub fn with_payload(mut self, data: Option<Value>, raw_data: Option<Value>) -> Self {
        self.data = data;
        self.raw_data = raw_data;
        self
    }

    pub fn with_request(mut self, request: &RequestOptions) -> Self {
        self.raw_request = Some(request.clone());
        self
    }

    pub fn with_api(mut self, api_name: &str, api_url: &str) -> Self {
        self.api_name = api_name.to_string();
        self.api_url = api_url.to_string();
        self
    }

    /// Multi-line description including url, payloads and the request.
    pub fn to_string_detail(&self) -> String {
        format!(
            "request {} failed: {} ({}) {}({})\nurl: {}\ndata: {}\nrawData: {}\nrawRequest: {}\n",
            self.api_name,
            self.message,
            self.error_type,
            self.code,
            self.code_message,
            self.api_url,
            to_json(&self.data),
            to_json(&self.raw_data),
            to_json(&self.raw_request),
        )
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

impl fmt::Display for RequestApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RequestApiError {}
