//! Backend for embedding hosts that expose callback-style request and storage
//! APIs (mini-program runtimes and similar).
//!
//! # Design
//! The host gets a boxed completion callback per operation; the implementer
//! parks on a `oneshot` receiver until the host fires it. A host that drops the
//! callback without calling it is treated like a failure of that operation.
//! The timeout is forwarded to the host and also enforced locally, so a host
//! that never answers cannot stall the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use super::{RequestImplementer, TransportError};
use crate::cache::RequestCacheStorage;
use crate::http::{Headers, HttpMethod, RequestBody, RequestOptions, RequestResponse, ResponseBody};

/// Failure reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub message: String,
}

impl HostFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parameters handed to [`HostBridge::request`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostRequest {
    pub url: String,
    pub method: HttpMethod,
    pub header: Headers,
    pub data: Option<RequestBody>,
    pub timeout: Duration,
    pub data_type: Option<String>,
    pub response_type: Option<String>,
    pub ssl_verify: Option<bool>,
    pub with_credentials: Option<bool>,
    pub first_ipv4: Option<bool>,
}

/// What the host hands back on success. `data` is already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct HostResponse {
    pub status_code: u16,
    pub header: Headers,
    pub data: Value,
}

pub type Completion<T> = Box<dyn FnOnce(Result<T, HostFailure>) + Send + 'static>;

/// Callback-based host API.
pub trait HostBridge: Send + Sync {
    fn request(&self, request: HostRequest, complete: Completion<HostResponse>);

    /// Completes with the stored text, or `None` for an unknown key.
    fn get_storage(&self, key: &str, complete: Completion<Option<String>>);

    fn set_storage(&self, key: &str, data: String, complete: Completion<()>);
}

/// Channel-backed completion plus the receiver that awaits it.
fn completion<T: Send + 'static>() -> (Completion<T>, oneshot::Receiver<Result<T, HostFailure>>) {
    let (tx, rx) = oneshot::channel();
    let complete: Completion<T> = Box::new(move |result| {
        // The receiver is gone once the caller timed out.
        let _ = tx.send(result);
    });
    (complete, rx)
}

pub struct CallbackImplementer<H> {
    host: H,
}

impl<H: HostBridge> CallbackImplementer<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &H {
        &self.host
    }
}

#[async_trait]
impl<H: HostBridge> RequestImplementer for CallbackImplementer<H> {
    async fn get_cache(&self, key: &str) -> Option<RequestCacheStorage> {
        let (complete, rx) = completion();
        self.host.get_storage(key, complete);
        match rx.await {
            Ok(Ok(Some(text))) => serde_json::from_str(&text).ok(),
            Ok(Ok(None)) => None,
            Ok(Err(failure)) => {
                tracing::debug!(key, failure = %failure.message, "host storage read failed");
                None
            }
            Err(_) => None,
        }
    }

    async fn set_cache(&self, key: &str, entry: &RequestCacheStorage) {
        let Ok(text) = serde_json::to_string(entry) else {
            return;
        };
        let (complete, rx) = completion();
        self.host.set_storage(key, text, complete);
        if let Ok(Err(failure)) = rx.await {
            tracing::debug!(key, failure = %failure.message, "host storage write failed");
        }
    }

    async fn do_request(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RequestResponse, TransportError> {
        let request = HostRequest {
            url: url.to_string(),
            method: options.method,
            header: options.headers.clone(),
            data: options.body.clone(),
            timeout,
            data_type: options.data_type.clone(),
            response_type: options.response_type.clone(),
            ssl_verify: options.ssl_verify,
            with_credentials: options.with_credentials,
            first_ipv4: options.first_ipv4,
        };

        let (complete, rx) = completion();
        self.host.request(request, complete);

        let response = match tokio::time::timeout(timeout, rx).await {
            Err(_) => return Err(TransportError::Timeout(timeout)),
            Ok(Err(_)) => return Err(TransportError::Host("host dropped the request callback".to_string())),
            Ok(Ok(Err(failure))) => return Err(TransportError::Host(failure.message)),
            Ok(Ok(Ok(response))) => response,
        };

        let status_text = if response.status_code >= 200 { "success" } else { "error" };
        Ok(RequestResponse::new(
            url,
            response.status_code,
            status_text,
            response.header,
            ResponseBody::Json(response.data),
        ))
    }
}
