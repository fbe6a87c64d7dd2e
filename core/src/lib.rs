//! Asynchronous API request core with pluggable transports and a TTL cache.
//!
//! # Overview
//! `RequestCoreInstance` turns a verb call (`get`/`post`/`put`/`delete`) into
//! a URL, merged headers and `RequestOptions`, consults an optional response
//! cache, delegates the network exchange to a `RequestImplementer` and hands
//! the raw response to a pluggable data handler. Callers get back either a
//! `RequestApiResult` or a `RequestApiError` classified by the layer that
//! failed.
//!
//! # Design
//! - Transport and cache persistence live behind `RequestImplementer`; two
//!   backends ship here: `FetchImplementer` (real HTTP) and
//!   `CallbackImplementer` (callback-style embedding hosts).
//! - Shared settings (`ApiConfig`) are passed explicitly as an `Arc`; there is
//!   no global configuration.
//! - Domain models are produced by a `ModelCreator` function value applied to
//!   the raw payload after the cache, so cached entries stay untyped JSON.

pub mod cache;
pub mod client;
pub mod config;
pub mod handler;
pub mod hash;
pub mod http;
pub mod implementer;
pub mod result;
pub mod url;

pub use cache::{cache_key, Clock, ManualClock, RequestCacheConfig, RequestCacheStorage, SystemClock};
pub use client::{RequestCoreConfig, RequestCoreInstance};
pub use config::{ApiConfig, ApiConfigError};
pub use handler::{
    default_response_data_get_error_info, default_response_data_handler, default_response_error_handler,
    ErrorInfo, ResponseContext,
};
pub use hash::string_hash_code;
pub use http::{
    FormData, Headers, HttpMethod, RequestBody, RequestOptions, RequestResponse, ResponseBody, ResponseBodyError,
};
pub use implementer::{CallbackImplementer, FetchImplementer, HostBridge, MemoryStorage, RequestImplementer, TransportError};
pub use result::{ModelCreator, RequestApiError, RequestApiErrorType, RequestApiResult, ResultShapeError};
