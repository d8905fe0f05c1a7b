#![allow(dead_code)]

use async_trait::async_trait;
use cache_storage_core::{
    BrokerConfig, CacheConnectionBroker, CacheIdentifier, CacheInfo, CacheInfos, CacheListing,
    CacheQueryOptions, CacheRequest, CacheStorageEngine, ChannelSink, ClientOrigin,
    OutboundMessage, Record, RecordIdentifier, SessionEngines, SessionId, StorageError,
    StorageResult,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Identifier every `open` on the stub resolves to.
pub const OPENED_CACHE: CacheIdentifier = 7;
/// Generation the stub reports for every origin.
pub const GENERATION: u64 = 5;
/// Record retrieval on this cache completes after a delay.
pub const SLOW_CACHE: CacheIdentifier = 99;
/// Record retrieval on this cache panics inside the engine.
pub const FAULTY_CACHE: CacheIdentifier = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockOp {
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineCall {
    pub session: SessionId,
    pub op: LockOp,
    pub cache: CacheIdentifier,
}

impl EngineCall {
    pub fn lock(session: SessionId, cache: CacheIdentifier) -> Self {
        Self {
            session,
            op: LockOp::Lock,
            cache,
        }
    }

    pub fn unlock(session: SessionId, cache: CacheIdentifier) -> Self {
        Self {
            session,
            op: LockOp::Unlock,
            cache,
        }
    }
}

/// Engine with canned answers that records lock traffic.
pub struct StubEngine {
    session: SessionId,
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

#[async_trait]
impl CacheStorageEngine for StubEngine {
    async fn open(&self, _origin: &ClientOrigin, name: &str) -> StorageResult<CacheIdentifier> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument);
        }
        Ok(OPENED_CACHE)
    }

    async fn remove(&self, cache: CacheIdentifier) -> StorageResult<CacheIdentifier> {
        if cache == OPENED_CACHE {
            Ok(cache)
        } else {
            Err(StorageError::NotFound)
        }
    }

    async fn retrieve_caches(
        &self,
        _origin: &ClientOrigin,
        update_counter: u64,
    ) -> StorageResult<CacheListing> {
        if update_counter == GENERATION {
            return Ok(CacheListing::Unchanged { update_counter });
        }
        Ok(CacheListing::Updated(CacheInfos {
            infos: vec![CacheInfo {
                identifier: OPENED_CACHE,
                name: "v1".to_string(),
            }],
            update_counter: GENERATION,
        }))
    }

    async fn retrieve_records(
        &self,
        cache: CacheIdentifier,
        _url: Option<&str>,
    ) -> StorageResult<Vec<Record>> {
        if cache == FAULTY_CACHE {
            panic!("engine fault on cache {cache}");
        }
        if cache == SLOW_CACHE {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(Vec::new());
        }
        if cache == OPENED_CACHE {
            Ok(Vec::new())
        } else {
            Err(StorageError::NotFound)
        }
    }

    async fn delete_matching_records(
        &self,
        _cache: CacheIdentifier,
        _request: &CacheRequest,
        _options: &CacheQueryOptions,
    ) -> StorageResult<Vec<RecordIdentifier>> {
        Ok(Vec::new())
    }

    async fn put_records(
        &self,
        cache: CacheIdentifier,
        records: Vec<Record>,
    ) -> StorageResult<Vec<RecordIdentifier>> {
        if cache != OPENED_CACHE {
            return Err(StorageError::NotFound);
        }
        Ok((1..=records.len() as u64).collect())
    }

    async fn clear_memory_representation(&self, _origin: &ClientOrigin) -> StorageResult<()> {
        Err(StorageError::IoFailure)
    }

    fn lock(&self, cache: CacheIdentifier) {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::lock(self.session, cache));
    }

    fn unlock(&self, cache: CacheIdentifier) {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::unlock(self.session, cache));
    }

    fn representation(&self) -> String {
        format!("stub engine for session {}", self.session)
    }
}

pub struct Harness {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    pub responses: UnboundedReceiver<OutboundMessage>,
}

impl Harness {
    /// Broker over stub engines, plus the handle observing it.
    pub fn broker() -> (CacheConnectionBroker, Harness) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine_calls = Arc::clone(&calls);
        let engines = SessionEngines::new(move |session| {
            Arc::new(StubEngine {
                session,
                calls: Arc::clone(&engine_calls),
            }) as Arc<dyn CacheStorageEngine>
        });
        let (sink, responses) = ChannelSink::new();
        let broker =
            CacheConnectionBroker::new(Arc::new(engines), Arc::new(sink), BrokerConfig::default());
        (broker, Harness { calls, responses })
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lock_calls(&self, session: SessionId, cache: CacheIdentifier) -> usize {
        self.count(EngineCall::lock(session, cache))
    }

    pub fn unlock_calls(&self, session: SessionId, cache: CacheIdentifier) -> usize {
        self.count(EngineCall::unlock(session, cache))
    }

    fn count(&self, call: EngineCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub async fn next_response(&mut self) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(2), self.responses.recv())
            .await
            .expect("response within timeout")
            .expect("response channel open")
    }
}

pub fn origin() -> ClientOrigin {
    ClientOrigin::same_origin("https://a.example")
}
