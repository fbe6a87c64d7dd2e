//! Fetch-style backend: real HTTP through `ureq`, cache in [`MemoryStorage`].
//!
//! Every call builds its own agent with a global timeout, so a stalled server
//! aborts the in-flight exchange once the deadline passes. Status codes are
//! never turned into errors here; interpreting them is the handler's job.

use std::time::Duration;

use async_trait::async_trait;
use ureq::typestate::WithBody;
use ureq::{Agent, RequestBuilder};

use super::{MemoryStorage, RequestImplementer, TransportError};
use crate::cache::RequestCacheStorage;
use crate::http::{FormData, Headers, HttpMethod, RequestBody, RequestOptions, RequestResponse, ResponseBody};

#[derive(Debug, Clone, Default)]
pub struct FetchImplementer {
    storage: MemoryStorage,
}

impl FetchImplementer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing store, e.g. one shared with another implementer.
    pub fn with_storage(storage: MemoryStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }
}

#[async_trait]
impl RequestImplementer for FetchImplementer {
    async fn get_cache(&self, key: &str) -> Option<RequestCacheStorage> {
        self.storage.get_entry(key).await
    }

    async fn set_cache(&self, key: &str, entry: &RequestCacheStorage) {
        self.storage.set_entry(key, entry).await;
    }

    async fn do_request(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RequestResponse, TransportError> {
        let url = url.to_string();
        let options = options.clone();
        tokio::task::spawn_blocking(move || execute(&url, &options, timeout))
            .await
            .map_err(|e| TransportError::Network(format!("request task failed: {e}")))?
    }
}

/// Encoded request payload.
struct Payload {
    bytes: Vec<u8>,
    /// Replaces any caller-provided content type.
    content_type: Option<String>,
}

fn encode_body(body: &RequestBody) -> Payload {
    match body {
        RequestBody::Text(text) => Payload {
            bytes: text.clone().into_bytes(),
            content_type: None,
        },
        RequestBody::Json(value) => Payload {
            bytes: value.to_string().into_bytes(),
            content_type: None,
        },
        RequestBody::Binary(bytes) => Payload {
            bytes: bytes.clone(),
            content_type: None,
        },
        RequestBody::Form(form) => {
            let boundary = format!("----RequestCoreBoundary{}", uuid::Uuid::new_v4().simple());
            Payload {
                bytes: encode_multipart(form, &boundary),
                content_type: Some(format!("multipart/form-data; boundary={boundary}")),
            }
        }
    }
}

/// Percent-escape the characters that would break out of a quoted
/// `Content-Disposition` parameter.
fn escape_field_name(name: &str) -> String {
    name.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

fn encode_multipart(form: &FormData, boundary: &str) -> Vec<u8> {
    let mut out = String::new();
    for (name, value) in form.iter() {
        out.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
            escape_field_name(name)
        ));
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out.into_bytes()
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &Headers) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send(builder: RequestBuilder<WithBody>, payload: Option<&Payload>) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match payload {
        Some(payload) => builder.send(&payload.bytes[..]),
        None => builder.send_empty(),
    }
}

fn execute(url: &str, options: &RequestOptions, timeout: Duration) -> Result<RequestResponse, TransportError> {
    let agent: Agent = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .new_agent();

    let payload = options.body.as_ref().map(encode_body);
    let mut headers = options.headers.clone();
    if let Some(content_type) = payload.as_ref().and_then(|p| p.content_type.clone()) {
        headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
        headers.insert("Content-Type".to_string(), content_type);
    }

    let result = match options.method {
        HttpMethod::Post => send(with_headers(agent.post(url), &headers), payload.as_ref()),
        HttpMethod::Put => send(with_headers(agent.put(url), &headers), payload.as_ref()),
        method => {
            let builder = match method {
                HttpMethod::Options => agent.options(url),
                HttpMethod::Head => agent.head(url),
                HttpMethod::Delete => agent.delete(url),
                HttpMethod::Trace => agent.trace(url),
                HttpMethod::Connect => agent.connect(url),
                _ => agent.get(url),
            };
            let builder = with_headers(builder, &headers);
            match payload.as_ref() {
                Some(payload) => send(builder.force_send_body(), Some(payload)),
                None => builder.call(),
            }
        }
    };

    let mut response = result.map_err(|e| match e {
        ureq::Error::Timeout(_) => TransportError::Timeout(timeout),
        other => TransportError::Network(other.to_string()),
    })?;

    let status = response.status();
    let response_headers: Headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let body = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| match e {
            ureq::Error::Timeout(_) => TransportError::Timeout(timeout),
            other => TransportError::Network(other.to_string()),
        })?;

    Ok(RequestResponse::new(
        url,
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        response_headers,
        ResponseBody::Bytes(body),
    ))
}
