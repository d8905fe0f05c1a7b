//! Storage engine seam.
//!
//! The broker talks to one engine per session through [`CacheStorageEngine`]
//! and resolves that engine through an [`EngineProvider`].

pub mod memory;

use crate::error::StorageResult;
use crate::types::{
    CacheIdentifier, CacheListing, CacheQueryOptions, CacheRequest, ClientOrigin, Record,
    RecordIdentifier, SessionId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use memory::{MemoryEngine, MemoryEngineConfig};

#[async_trait]
pub trait CacheStorageEngine: Send + Sync {
    /// Find or create the cache `name` for `origin`.
    async fn open(&self, origin: &ClientOrigin, name: &str) -> StorageResult<CacheIdentifier>;

    async fn remove(&self, cache: CacheIdentifier) -> StorageResult<CacheIdentifier>;

    /// List the caches of `origin`, or report that `update_counter` is current.
    async fn retrieve_caches(
        &self,
        origin: &ClientOrigin,
        update_counter: u64,
    ) -> StorageResult<CacheListing>;

    /// Records of `cache`, filtered by `url` when given.
    async fn retrieve_records(
        &self,
        cache: CacheIdentifier,
        url: Option<&str>,
    ) -> StorageResult<Vec<Record>>;

    async fn delete_matching_records(
        &self,
        cache: CacheIdentifier,
        request: &CacheRequest,
        options: &CacheQueryOptions,
    ) -> StorageResult<Vec<RecordIdentifier>>;

    /// Insert or replace `records`. Identifiers come back in input order.
    async fn put_records(
        &self,
        cache: CacheIdentifier,
        records: Vec<Record>,
    ) -> StorageResult<Vec<RecordIdentifier>>;

    async fn clear_memory_representation(&self, origin: &ClientOrigin) -> StorageResult<()>;

    fn lock(&self, cache: CacheIdentifier);

    fn unlock(&self, cache: CacheIdentifier);

    /// Diagnostic snapshot of engine state.
    fn representation(&self) -> String;
}

/// Resolves the engine instance that serves a session.
pub trait EngineProvider: Send + Sync {
    fn engine(&self, session: SessionId) -> Arc<dyn CacheStorageEngine>;
}

type EngineFactory = dyn Fn(SessionId) -> Arc<dyn CacheStorageEngine> + Send + Sync;

/// Lazily creates one engine per session and keeps it for the process lifetime.
pub struct SessionEngines {
    engines: Mutex<HashMap<SessionId, Arc<dyn CacheStorageEngine>>>,
    factory: Box<EngineFactory>,
}

impl SessionEngines {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(SessionId) -> Arc<dyn CacheStorageEngine> + Send + Sync + 'static,
    {
        Self {
            engines: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Provider backed by [`MemoryEngine`] instances sharing one config.
    pub fn memory(config: MemoryEngineConfig) -> Self {
        Self::new(move |_| {
            Arc::new(MemoryEngine::new(config.clone())) as Arc<dyn CacheStorageEngine>
        })
    }

    pub fn len(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EngineProvider for SessionEngines {
    fn engine(&self, session: SessionId) -> Arc<dyn CacheStorageEngine> {
        let mut engines = self.engines.lock().unwrap();
        engines
            .entry(session)
            .or_insert_with(|| {
                tracing::debug!(session = %session, "creating cache storage engine");
                (self.factory)(session)
            })
            .clone()
    }
}
