//! Transport backends.
//!
//! # Design
//! `RequestImplementer` is the only seam between the core and the outside
//! world: it persists cache entries and performs the network call. The core
//! picks one implementer at construction time and may share it with other
//! instances.
//!
//! Contract every backend follows:
//! - `get_cache` never fails; unreadable storage is a miss.
//! - `set_cache` is best effort and swallows storage failures.
//! - `do_request` resolves for any HTTP response, whatever its status, and
//!   errors only when no response arrived (including timeouts).

pub mod callback;
pub mod fetch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::RequestCacheStorage;
use crate::http::{RequestOptions, RequestResponse};

pub use callback::{CallbackImplementer, HostBridge, HostFailure, HostRequest, HostResponse};
pub use fetch::FetchImplementer;

/// Why a transport produced no response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    /// The embedding host reported a failure of its own.
    #[error("host request failed: {0}")]
    Host(String),
}

#[async_trait]
pub trait RequestImplementer: Send + Sync {
    async fn get_cache(&self, key: &str) -> Option<RequestCacheStorage>;

    async fn set_cache(&self, key: &str, entry: &RequestCacheStorage);

    async fn do_request(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<RequestResponse, TransportError>;
}

/// In-process key/value store holding JSON text, like browser local storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().await.get(key).cloned()
    }

    pub async fn set_item(&self, key: &str, value: String) {
        self.items.write().await.insert(key.to_string(), value);
    }

    pub async fn remove_item(&self, key: &str) {
        self.items.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Decode a stored cache entry; anything unreadable counts as absent.
    pub async fn get_entry(&self, key: &str) -> Option<RequestCacheStorage> {
        let text = self.get_item(key).await?;
        match serde_json::from_str(&text) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(key, error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    pub async fn set_entry(&self, key: &str, entry: &RequestCacheStorage) {
        match serde_json::to_string(entry) {
            Ok(text) => self.set_item(key, text).await,
            Err(e) => tracing::debug!(key, error = %e, "cache entry not stored"),
        }
    }
}
