//! Broker between one client connection and the per-session storage engines.
//!
//! Asynchronous operations are spawned onto the current Tokio runtime and
//! return immediately; each completion is sent exactly once through the
//! connection sink, addressed to the session the request came from. An engine
//! operation that panics produces no completion; the broker logs it at
//! `error` with the request identifier and operation name.
//! `reference`/`dereference` are synchronous and drive the advisory locks
//! held with the engine. Dropping the broker releases every lock it still
//! holds.
//!
//! All asynchronous operations must be called from within a Tokio runtime.

use crate::config::BrokerConfig;
use crate::engine::EngineProvider;
use crate::error::StorageResult;
use crate::lock_table::{Dereference, LockTable};
use crate::messages::{CacheStorageRequest, CacheStorageResponse};
use crate::sink::ConnectionSink;
use crate::types::{
    CacheIdentifier, CacheListing, CacheQueryOptions, CacheRequest, ClientOrigin, LockCount,
    Record, RecordIdentifier, RequestIdentifier, SessionId,
};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

pub struct CacheConnectionBroker {
    connection: Uuid,
    engines: Arc<dyn EngineProvider>,
    sink: Arc<dyn ConnectionSink>,
    locks: LockTable,
    config: BrokerConfig,
}

impl CacheConnectionBroker {
    pub fn new(
        engines: Arc<dyn EngineProvider>,
        sink: Arc<dyn ConnectionSink>,
        config: BrokerConfig,
    ) -> Self {
        let connection = Uuid::new_v4();
        tracing::debug!(connection = %connection, "cache storage connection opened");
        Self {
            connection,
            engines,
            sink,
            locks: LockTable::new(),
            config,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection
    }

    /// Route one typed request to its operation.
    pub fn dispatch(&mut self, session: SessionId, request: CacheStorageRequest) {
        match request {
            CacheStorageRequest::Open {
                request_id,
                origin,
                cache_name,
            } => self.open(session, request_id, origin, cache_name),
            CacheStorageRequest::Remove { request_id, cache } => {
                self.remove(session, request_id, cache)
            }
            CacheStorageRequest::Caches {
                request_id,
                origin,
                update_counter,
            } => self.list_caches(session, request_id, origin, update_counter),
            CacheStorageRequest::RetrieveRecords {
                request_id,
                cache,
                url,
            } => self.retrieve_records(session, request_id, cache, url),
            CacheStorageRequest::DeleteMatchingRecords {
                request_id,
                cache,
                request,
                options,
            } => self.delete_matching_records(session, request_id, cache, request, options),
            CacheStorageRequest::PutRecords {
                request_id,
                cache,
                records,
            } => self.put_records(session, request_id, cache, records),
            CacheStorageRequest::Reference { cache } => self.reference(session, cache),
            CacheStorageRequest::Dereference { cache } => self.dereference(session, cache),
            CacheStorageRequest::ClearMemoryRepresentation { request_id, origin } => {
                self.clear_memory_representation(session, request_id, origin)
            }
            CacheStorageRequest::EngineRepresentation { request_id } => {
                let representation = self.engine_representation(session);
                self.sink.send(
                    session,
                    CacheStorageResponse::EngineRepresentationCompleted {
                        request_id,
                        representation,
                    },
                );
            }
        }
    }

    pub fn open(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        origin: ClientOrigin,
        cache_name: String,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                "open"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "open",
            async move { engine.open(&origin, &cache_name).await },
            |identifier: &CacheIdentifier| format!("cache identifier is {identifier}"),
            |request_id, result| CacheStorageResponse::OpenCompleted { request_id, result },
        );
    }

    pub fn remove(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                cache,
                "remove"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "remove",
            async move { engine.remove(cache).await },
            |identifier: &CacheIdentifier| format!("removed cache {identifier}"),
            |request_id, result| CacheStorageResponse::RemoveCompleted { request_id, result },
        );
    }

    pub fn list_caches(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        origin: ClientOrigin,
        update_counter: u64,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                update_counter,
                "caches"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "caches",
            async move { engine.retrieve_caches(&origin, update_counter).await },
            |listing: &CacheListing| match listing {
                CacheListing::Unchanged { update_counter } => {
                    format!("unchanged at {update_counter}")
                }
                CacheListing::Updated(infos) => format!("caches size is {}", infos.infos.len()),
            },
            |request_id, result| CacheStorageResponse::UpdateCaches { request_id, result },
        );
    }

    pub fn retrieve_records(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
        url: Option<String>,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                cache,
                "retrieveRecords"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "retrieveRecords",
            async move { engine.retrieve_records(cache, url.as_deref()).await },
            |records: &Vec<Record>| format!("records size is {}", records.len()),
            |request_id, result| CacheStorageResponse::UpdateRecords { request_id, result },
        );
    }

    pub fn delete_matching_records(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
        request: CacheRequest,
        options: CacheQueryOptions,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                cache,
                "deleteMatchingRecords"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "deleteMatchingRecords",
            async move {
                engine
                    .delete_matching_records(cache, &request, &options)
                    .await
            },
            |deleted: &Vec<RecordIdentifier>| format!("deleted {} records", deleted.len()),
            |request_id, result| CacheStorageResponse::DeleteRecordsCompleted {
                request_id,
                result,
            },
        );
    }

    pub fn put_records(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
        records: Vec<Record>,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                cache,
                records = records.len(),
                "putRecords"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "putRecords",
            async move { engine.put_records(cache, records).await },
            |stored: &Vec<RecordIdentifier>| format!("put {} records", stored.len()),
            |request_id, result| CacheStorageResponse::PutRecordsCompleted {
                request_id,
                result,
            },
        );
    }

    /// Take one reference on `cache`. The first reference locks it with the engine.
    pub fn reference(&mut self, session: SessionId, cache: CacheIdentifier) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                cache,
                "reference cache"
            );
        }
        if self.locks.reference(session, cache) {
            self.engines.engine(session).lock(cache);
        }
    }

    /// Drop one reference on `cache`. The last one unlocks it.
    pub fn dereference(&mut self, session: SessionId, cache: CacheIdentifier) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                cache,
                "dereference cache"
            );
        }
        match self.locks.dereference(session, cache) {
            Dereference::Released => self.engines.engine(session).unlock(cache),
            Dereference::Retained(_) => {}
            Dereference::NotHeld => {
                tracing::debug!(
                    connection = %self.connection,
                    session = %session,
                    cache,
                    "dereference without a matching reference; ignoring"
                );
            }
        }
    }

    pub fn clear_memory_representation(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        origin: ClientOrigin,
    ) {
        if self.logging_allowed(session) {
            tracing::info!(
                connection = %self.connection,
                session = %session,
                request_id,
                "clearMemoryRepresentation"
            );
        }
        let engine = self.engines.engine(session);
        self.complete(
            session,
            request_id,
            "clearMemoryRepresentation",
            async move { engine.clear_memory_representation(&origin).await },
            |_: &()| "cleared".to_string(),
            |request_id, result| CacheStorageResponse::ClearMemoryRepresentationCompleted {
                request_id,
                error: result.err(),
            },
        );
    }

    /// Diagnostic snapshot of the session's engine.
    pub fn engine_representation(&self, session: SessionId) -> String {
        self.engines.engine(session).representation()
    }

    pub fn lock_count(&self, session: SessionId, cache: CacheIdentifier) -> LockCount {
        self.locks.count(session, cache)
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    fn logging_allowed(&self, session: SessionId) -> bool {
        self.config.logging_allowed(session)
    }

    fn complete<T, F>(
        &self,
        session: SessionId,
        request_id: RequestIdentifier,
        operation: &'static str,
        work: F,
        describe: fn(&T) -> String,
        respond: fn(RequestIdentifier, StorageResult<T>) -> CacheStorageResponse,
    ) where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        let sink = Arc::clone(&self.sink);
        let connection = self.connection;
        let log = self.logging_allowed(session);

        let engine_task = tokio::spawn(work);
        tokio::spawn(async move {
            let result = match engine_task.await {
                Ok(result) => result,
                Err(join_error) => {
                    tracing::error!(
                        connection = %connection,
                        session = %session,
                        request_id,
                        operation,
                        panicked = join_error.is_panic(),
                        "engine operation aborted before completing; no response sent"
                    );
                    return;
                }
            };
            if log {
                match &result {
                    Ok(value) => tracing::info!(
                        connection = %connection,
                        session = %session,
                        request_id,
                        operation,
                        "succeeded - {}",
                        describe(value)
                    ),
                    Err(err) => tracing::error!(
                        connection = %connection,
                        session = %session,
                        request_id,
                        operation,
                        code = err.code(),
                        "failed - {}",
                        err
                    ),
                }
            }
            sink.send(session, respond(request_id, result));
        });
    }
}

impl Drop for CacheConnectionBroker {
    fn drop(&mut self) {
        let held = self.locks.drain();
        for (session, cache, count) in &held {
            debug_assert!(*count > 0, "zero-count lock entry for cache {cache}");
            if *count == 0 {
                tracing::error!(
                    connection = %self.connection,
                    session = %session,
                    cache,
                    "lock table entry with no references at teardown"
                );
            }
            self.engines.engine(*session).unlock(*cache);
        }
        if !held.is_empty() {
            tracing::info!(
                connection = %self.connection,
                released = held.len(),
                "released cache locks on connection teardown"
            );
        }
    }
}
