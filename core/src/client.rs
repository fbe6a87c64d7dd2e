//! The request orchestrator.
//!
//! # Design
//! `RequestCoreInstance` owns its `RequestCoreConfig`, shares the
//! `ApiConfig` and the implementer with whoever else holds them, and carries no
//! per-call state. A call to [`RequestCoreInstance::request`] runs these steps
//! strictly in order:
//!
//! 1. merge default headers with per-call headers,
//! 2. run the request interceptor,
//! 3. infer `Content-Type` when none was chosen,
//! 4. log the request,
//! 5. consult the cache (GET only) and return early on a hit,
//! 6. call the implementer,
//! 7. run the response interceptor,
//! 8. run the response data handler,
//! 9. store the result in the cache,
//! 10. apply the model hook.
//!
//! Panics in interceptors, handlers and the model hook, as well as model
//! conversion failures, come back as `scriptError` results. Nothing escapes
//! the returned future as a panic. Transport errors are stamped with the
//! request URL and options when the error handler left them empty.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::cache::{cache_key, Clock, RequestCacheConfig, RequestCacheStorage, SystemClock};
use crate::config::ApiConfig;
use crate::handler::{default_response_data_handler, default_response_error_handler, ResponseContext};
use crate::http::{Headers, HttpMethod, RequestBody, RequestOptions, RequestResponse};
use crate::implementer::{RequestImplementer, TransportError};
use crate::result::{ModelCreator, RequestApiError, RequestApiErrorType, RequestApiResult};
use crate::url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub type RequestInterceptor = Arc<dyn Fn(String, RequestOptions) -> (String, RequestOptions) + Send + Sync>;
pub type ResponseInterceptor = Arc<dyn Fn(RequestResponse) -> RequestResponse + Send + Sync>;
/// Returns `true` to suppress reporting of this particular error.
pub type ReportErrorInterceptor = Arc<dyn Fn(&RequestCoreInstance, &RequestApiError) -> bool + Send + Sync>;
pub type ErrorReporter = Arc<dyn Fn(&RequestCoreInstance, &RequestApiError) + Send + Sync>;
pub type ResponseDataHandler =
    Arc<dyn Fn(&ResponseContext<'_>, RequestResponse) -> Result<RequestApiResult, RequestApiError> + Send + Sync>;
pub type ResponseErrorHandler = Arc<dyn Fn(TransportError, &RequestCoreInstance, &str) -> RequestApiError + Send + Sync>;

/// Per-instance configuration.
#[derive(Clone)]
pub struct RequestCoreConfig {
    pub base_url: String,
    /// Human readable descriptions of application error codes.
    pub err_codes: HashMap<i64, String>,
    pub default_header: Headers,
    pub timeout: Duration,
    pub request_interceptor: Option<RequestInterceptor>,
    pub response_interceptor: Option<ResponseInterceptor>,
    pub report_error_interceptor: Option<ReportErrorInterceptor>,
    pub report_error: Option<ErrorReporter>,
    pub response_data_handler: ResponseDataHandler,
    pub response_error_handler: ResponseErrorHandler,
}

impl RequestCoreConfig {
    /// Defaults seeded with the shared base URL and headers.
    pub fn new(api_config: &ApiConfig) -> Self {
        Self {
            base_url: api_config.base_url.clone(),
            err_codes: HashMap::new(),
            default_header: api_config.default_header.clone(),
            timeout: DEFAULT_TIMEOUT,
            request_interceptor: None,
            response_interceptor: None,
            report_error_interceptor: None,
            report_error: None,
            response_data_handler: Arc::new(default_response_data_handler),
            response_error_handler: Arc::new(default_response_error_handler),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_header.insert(name.into(), value.into());
        self
    }

    pub fn with_err_code(mut self, code: i64, message: impl Into<String>) -> Self {
        self.err_codes.insert(code, message.into());
        self
    }

    pub fn with_request_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(String, RequestOptions) -> (String, RequestOptions) + Send + Sync + 'static,
    {
        self.request_interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn with_response_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(RequestResponse) -> RequestResponse + Send + Sync + 'static,
    {
        self.response_interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn with_report_error_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&RequestCoreInstance, &RequestApiError) -> bool + Send + Sync + 'static,
    {
        self.report_error_interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn with_report_error<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&RequestCoreInstance, &RequestApiError) + Send + Sync + 'static,
    {
        self.report_error = Some(Arc::new(reporter));
        self
    }

    pub fn with_response_data_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ResponseContext<'_>, RequestResponse) -> Result<RequestApiResult, RequestApiError> + Send + Sync + 'static,
    {
        self.response_data_handler = Arc::new(handler);
        self
    }

    pub fn with_response_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(TransportError, &RequestCoreInstance, &str) -> RequestApiError + Send + Sync + 'static,
    {
        self.response_error_handler = Arc::new(handler);
        self
    }
}

impl fmt::Debug for RequestCoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoreConfig")
            .field("base_url", &self.base_url)
            .field("err_codes", &self.err_codes)
            .field("default_header", &self.default_header)
            .field("timeout", &self.timeout)
            .field("request_interceptor", &self.request_interceptor.is_some())
            .field("response_interceptor", &self.response_interceptor.is_some())
            .field("report_error_interceptor", &self.report_error_interceptor.is_some())
            .field("report_error", &self.report_error.is_some())
            .finish_non_exhaustive()
    }
}

pub struct RequestCoreInstance {
    implementer: Arc<dyn RequestImplementer>,
    api_config: Arc<ApiConfig>,
    config: RequestCoreConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RequestCoreInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoreInstance")
            .field("api_config", &self.api_config)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Pick a content type unless the caller (or an interceptor) already did.
fn infer_content_type(options: &mut RequestOptions) {
    if options.header("Content-Type").is_some() {
        return;
    }
    let content_type = match &options.body {
        Some(RequestBody::Form(_)) => "multipart/form-data",
        Some(RequestBody::Json(_)) | None => "application/json",
        Some(RequestBody::Text(_)) | Some(RequestBody::Binary(_)) => return,
    };
    options
        .headers
        .insert("Content-Type".to_string(), content_type.to_string());
}

impl RequestCoreInstance {
    /// Instance with default handlers, seeded from `api_config`.
    pub fn new(implementer: Arc<dyn RequestImplementer>, api_config: Arc<ApiConfig>) -> Self {
        let config = RequestCoreConfig::new(&api_config);
        Self::with_config(implementer, api_config, config)
    }

    pub fn with_config(
        implementer: Arc<dyn RequestImplementer>,
        api_config: Arc<ApiConfig>,
        config: RequestCoreConfig,
    ) -> Self {
        Self {
            implementer,
            api_config,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for cache expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RequestCoreConfig {
        &self.config
    }

    pub fn api_config(&self) -> &ApiConfig {
        &self.api_config
    }

    pub fn implementer(&self) -> &Arc<dyn RequestImplementer> {
        &self.implementer
    }

    /// Whether `err` should reach the reporter; asked afresh for every error.
    pub fn check_should_report_error(&self, err: &RequestApiError) -> bool {
        match &self.config.report_error_interceptor {
            Some(interceptor) => !interceptor(self, err),
            None => true,
        }
    }

    pub fn report_error(&self, err: &RequestApiError) {
        if !self.check_should_report_error(err) {
            return;
        }
        if let Some(reporter) = &self.config.report_error {
            reporter(self, err);
        }
    }

    pub fn find_err_code(&self, code: i64) -> Option<&str> {
        self.config.err_codes.get(&code).map(String::as_str)
    }

    pub fn make_url(&self, path: &str, query: Option<&Map<String, Value>>) -> String {
        url::make_url(&self.config.base_url, path, query)
    }

    pub fn merge_headers(&self, left: Option<Headers>, right: Option<Headers>) -> Option<Headers> {
        url::merge_headers(left, right)
    }

    fn merge_default_header(&self, headers: Headers) -> Headers {
        let mut merged = self.config.default_header.clone();
        merged.extend(headers);
        merged
    }

    fn script_error(&self, message: &str, options: &RequestOptions, api_name: &str, url: &str) -> RequestApiError {
        tracing::error!("E > Catch exception in {api_name}: {message}");
        RequestApiError::new(RequestApiErrorType::ScriptError, format!("script error, please check: {message}"))
            .with_code(-1, "script exception")
            .with_request(options)
            .with_api(api_name, url)
    }

    /// Run caller-supplied code; a panic comes back as a `scriptError`.
    fn guarded<R>(
        &self,
        f: impl FnOnce() -> R,
        options: &RequestOptions,
        api_name: &str,
        url: &str,
    ) -> Result<R, RequestApiError> {
        catch_unwind(AssertUnwindSafe(f))
            .map_err(|panic| self.script_error(&panic_message(panic.as_ref()), options, api_name, url))
    }

    fn apply_model<T>(
        &self,
        result: RequestApiResult,
        model: &ModelCreator<T>,
        options: &RequestOptions,
        api_name: &str,
        url: &str,
    ) -> Result<RequestApiResult<T>, RequestApiError> {
        self.guarded(|| result.into_model(model), options, api_name, url)?
            .map_err(|e| self.script_error(&e, options, api_name, url))
    }

    /// Run one API call through the full pipeline.
    pub async fn request<T>(
        &self,
        url: &str,
        options: RequestOptions,
        api_name: &str,
        model: &ModelCreator<T>,
        cache: Option<RequestCacheConfig>,
    ) -> Result<RequestApiResult<T>, RequestApiError> {
        let mut url = url.to_string();
        let mut options = options;
        options.headers = self.merge_default_header(std::mem::take(&mut options.headers));

        if let Some(interceptor) = &self.config.request_interceptor {
            let (before_url, before_options) = (url.clone(), options.clone());
            (url, options) = self.guarded(|| interceptor(url, options), &before_options, api_name, &before_url)?;
        }
        infer_content_type(&mut options);

        let log_requests = self.api_config.enable_api_request_log;
        let log_data = self.api_config.enable_api_data_log;
        if log_requests {
            match &options.body {
                Some(body) if log_data => tracing::info!("Q > {api_name} [{}] {url} {body:?}", options.method),
                _ => tracing::info!("Q > {api_name} [{}] {url}", options.method),
            }
        }

        let cache_time = match (options.method, cache) {
            (HttpMethod::Get, Some(cache)) => cache.effective_ttl(),
            _ => Duration::ZERO,
        };
        let cache_key = (!cache_time.is_zero()).then(|| cache_key(&url, options.method));

        if let Some(key) = &cache_key {
            if let Some(entry) = self.implementer.get_cache(key).await {
                if entry.is_fresh(self.clock.now_millis()) {
                    if log_requests {
                        let expires = self.api_config.format_millis(entry.time);
                        if log_data {
                            tracing::info!("C > {api_name} ({key}/{cache_time:?}, expires {expires}) {}", entry.data);
                        } else {
                            tracing::info!("C > {api_name} ({key}/{cache_time:?}, expires {expires})");
                        }
                    }
                    return self.apply_model(entry.data, model, &options, api_name, &url);
                }
            }
        }

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let response = match self.implementer.do_request(&url, &options, timeout).await {
            Ok(response) => response,
            Err(err) => {
                let handler = &self.config.response_error_handler;
                let mut err = self.guarded(|| handler(err, self, api_name), &options, api_name, &url)?;
                if err.api_url.is_empty() {
                    err.api_url = url.clone();
                }
                if err.raw_request.is_none() {
                    err.raw_request = Some(options.clone());
                }
                return Err(err);
            }
        };

        let response = match &self.config.response_interceptor {
            Some(interceptor) => self.guarded(|| interceptor(response), &options, api_name, &url)?,
            None => response,
        };
        let status = response.status;

        let result = {
            let ctx = ResponseContext {
                instance: self,
                options: &options,
                api_name,
            };
            self.guarded(|| (self.config.response_data_handler)(&ctx, response), &options, api_name, &url)??
        };

        if let Some(key) = &cache_key {
            let entry = RequestCacheStorage::new(self.clock.now_millis(), cache_time, result.clone());
            self.implementer.set_cache(key, &entry).await;
        }

        if log_requests {
            tracing::info!("R > {api_name} ({status}/{})", result.code);
        }
        self.apply_model(result, model, &options, api_name, &url)
    }

    fn verb_options(method: HttpMethod, body: Option<RequestBody>, headers: Option<Headers>) -> RequestOptions {
        RequestOptions {
            method,
            body,
            headers: headers.unwrap_or_default(),
            ..RequestOptions::default()
        }
    }

    pub async fn get<T>(
        &self,
        url: &str,
        api_name: &str,
        query: Option<&Map<String, Value>>,
        model: &ModelCreator<T>,
        cache: Option<RequestCacheConfig>,
        headers: Option<Headers>,
    ) -> Result<RequestApiResult<T>, RequestApiError> {
        let options = Self::verb_options(HttpMethod::Get, None, headers);
        self.request(&self.make_url(url, query), options, api_name, model, cache)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn post<T>(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        api_name: &str,
        query: Option<&Map<String, Value>>,
        model: &ModelCreator<T>,
        cache: Option<RequestCacheConfig>,
        headers: Option<Headers>,
    ) -> Result<RequestApiResult<T>, RequestApiError> {
        let options = Self::verb_options(HttpMethod::Post, Some(body.into()), headers);
        self.request(&self.make_url(url, query), options, api_name, model, cache)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn put<T>(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        api_name: &str,
        query: Option<&Map<String, Value>>,
        model: &ModelCreator<T>,
        cache: Option<RequestCacheConfig>,
        headers: Option<Headers>,
    ) -> Result<RequestApiResult<T>, RequestApiError> {
        let options = Self::verb_options(HttpMethod::Put, Some(body.into()), headers);
        self.request(&self.make_url(url, query), options, api_name, model, cache)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn delete<T>(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        api_name: &str,
        query: Option<&Map<String, Value>>,
        model: &ModelCreator<T>,
        cache: Option<RequestCacheConfig>,
        headers: Option<Headers>,
    ) -> Result<RequestApiResult<T>, RequestApiError> {
        let options = Self::verb_options(HttpMethod::Delete, Some(body.into()), headers);
        self.request(&self.make_url(url, query), options, api_name, model, cache)
            .await
    }
}
