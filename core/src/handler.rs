//! Default response and error handlers.
//!
//! # Design
//! Handlers turn a raw `RequestResponse` into either a `RequestApiResult` or a
//! classified `RequestApiError`. Every failure they produce is pushed through
//! the instance's report gate before it is returned, so callers can rely on a
//! single reporting hook regardless of which layer failed.
//!
//! Business-specific handlers (e.g. APIs that signal errors through a
//! non-zero `code` with a 200 status) plug in through
//! `RequestCoreConfig::with_response_data_handler` and can reuse
//! [`default_response_data_get_error_info`] for status classification.

use serde_json::Value;

use crate::client::RequestCoreInstance;
use crate::http::{RequestOptions, RequestResponse, ResponseBodyError};
use crate::implementer::TransportError;
use crate::result::{RequestApiError, RequestApiErrorType, RequestApiResult};

/// Everything a data handler may need besides the response itself.
pub struct ResponseContext<'a> {
    pub instance: &'a RequestCoreInstance,
    pub options: &'a RequestOptions,
    pub api_name: &'a str,
}

/// Outcome of classifying a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub error_type: RequestApiErrorType,
    pub code_message: String,
}

fn server_message(json: &Value) -> Option<String> {
    match json.get("message")? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn server_code(json: &Value) -> Option<i64> {
    json.get("code")?.as_i64().filter(|code| *code != 0)
}

/// Parse the JSON envelope and build a result or a status error.
pub fn default_response_data_handler(
    ctx: &ResponseContext<'_>,
    response: RequestResponse,
) -> Result<RequestApiResult, RequestApiError> {
    let config = ctx.instance.api_config();
    let method = ctx.options.method;

    let json = match response.json() {
        Ok(json) => json,
        Err(err) => return Err(default_response_data_handler_catch(ctx, &response, None, &err)),
    };

    if response.ok {
        if config.enable_api_request_log {
            if config.enable_api_data_log {
                tracing::info!("Request [{method}] {} success ({}) {json}", response.url, response.status);
            } else {
                tracing::info!("Request [{method}] {} success ({})", response.url, response.status);
            }
        }
        let message = server_message(&json).unwrap_or_default();
        let data = json.get("data").filter(|data| !data.is_null()).cloned();
        return Ok(RequestApiResult::new(i64::from(response.status), message, data, json));
    }

    let message = server_message(&json).unwrap_or_else(|| format!("server returned status {}", response.status));
    let code = server_code(&json).unwrap_or(i64::from(response.status));
    if config.enable_api_request_log {
        if config.enable_api_data_log {
            tracing::info!("Request [{method}] {} got error from server: {message} ({code}) {json}", response.url);
        } else {
            tracing::info!("Request [{method}] {} got error from server: {message} ({code})", response.url);
        }
    }

    let data = json.get("data").filter(|data| !data.is_null()).cloned();
    let err = RequestApiError::new(RequestApiErrorType::StatusError, message)
        .with_code(code, "unexpected status code")
        .with_payload(data, Some(json))
        .with_request(ctx.options)
        .with_api(ctx.api_name, &response.url);
    ctx.instance.report_error(&err);
    Err(err)
}

/// Classify a response whose body could not be used.
///
/// A body failure on a success status is a script error. Otherwise the
/// status code decides, with a note prepended when the body was not JSON.
pub fn default_response_data_get_error_info(response: &RequestResponse, err: &ResponseBodyError) -> ErrorInfo {
    if response.ok {
        return ErrorInfo {
            message: format!("script error: {err}"),
            error_type: RequestApiErrorType::ScriptError,
            code_message: format!("status code: {}", response.status),
        };
    }

    let mut message = if response.status > 299 {
        format!("server returned status {}.\n", response.status)
    } else {
        String::new()
    };
    if matches!(err, ResponseBodyError::MalformedJson(_)) {
        message.push_str("failed to parse JSON body, the backend may not have returned valid JSON.\n");
    }

    let (error_type, code_message, hint) = match response.status {
        400 => (RequestApiErrorType::StatusError, "bad request", Some("[hint: check the request parameters]")),
        401 => (
            RequestApiErrorType::StatusError,
            "not logged in, the session may have expired, please log in again",
            None,
        ),
        404 => (
            RequestApiErrorType::StatusError,
            "404 not found",
            Some("[hint: check that the backend provides this API]"),
        ),
        405 => (
            RequestApiErrorType::StatusError,
            "HTTP method not allowed",
            Some("[hint: the API may have been called incorrectly]"),
        ),
        500 => (
            RequestApiErrorType::ServerError,
            "service error, please retry later",
            Some("[hint: the backend service may have failed]"),
        ),
        502 => (
            RequestApiErrorType::ServerError,
            "bad gateway, please report this error",
            Some("[hint: check server and application status]"),
        ),
        503 => (
            RequestApiErrorType::ServerError,
            "service temporarily unavailable",
            Some("[hint: check server status]"),
        ),
        status => {
            let error_type = if (500..600).contains(&status) {
                RequestApiErrorType::ServerError
            } else {
                RequestApiErrorType::StatusError
            };
            let code_message = format!("status code: {status}");
            message.push_str(&code_message);
            return ErrorInfo {
                message,
                error_type,
                code_message,
            };
        }
    };

    message.push_str(code_message);
    if let Some(hint) = hint {
        message.push_str(" \n");
        message.push_str(hint);
    }
    ErrorInfo {
        message,
        error_type,
        code_message: code_message.to_string(),
    }
}

/// Build, log and report the error for an unusable response body.
pub fn default_response_data_handler_catch(
    ctx: &ResponseContext<'_>,
    response: &RequestResponse,
    data: Option<Value>,
    err: &ResponseBodyError,
) -> RequestApiError {
    if ctx.instance.api_config().enable_api_request_log {
        tracing::info!("E > {} {err} status: {}", ctx.api_name, response.status);
    }

    let info = default_response_data_get_error_info(response, err);
    let err = RequestApiError::new(info.error_type, info.message)
        .with_code(i64::from(response.status), info.code_message)
        .with_payload(None, data)
        .with_request(ctx.options)
        .with_api(ctx.api_name, &response.url);
    ctx.instance.report_error(&err);
    err
}

/// Convert a transport failure into an `unknow` error.
pub fn default_response_error_handler(
    err: TransportError,
    _instance: &RequestCoreInstance,
    api_name: &str,
) -> RequestApiError {
    tracing::error!("Error : {err}");
    RequestApiError::new(RequestApiErrorType::Unknown, err.to_string()).with_api(api_name, "")
}
