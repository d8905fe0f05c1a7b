//! In-memory engine.
//!
//! Holds every origin's caches in one mutex-guarded state. Used by the stdio
//! server and by tests; it keeps the engine-side contracts the broker relies
//! on (generation counters, deferred removal of locked caches, per-origin
//! quota) without touching disk.

use super::CacheStorageEngine;
use crate::error::{StorageError, StorageResult};
use crate::types::{
    CacheIdentifier, CacheInfo, CacheInfos, CacheListing, CacheQueryOptions, CacheRequest,
    ClientOrigin, LockCount, Record, RecordIdentifier,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use url::Url;

pub const DEFAULT_QUOTA_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryEngineConfig {
    /// Body bytes allowed per origin, summed over all of its caches.
    pub quota_bytes: u64,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

struct StoredCache {
    origin: ClientOrigin,
    name: String,
    records: Vec<Record>,
    /// Removed while locked; dropped on the final unlock.
    removed: bool,
}

impl StoredCache {
    fn body_bytes(&self) -> u64 {
        self.records.iter().map(Record::body_size).sum()
    }
}

#[derive(Default)]
struct OriginState {
    /// Live caches in creation order.
    caches: Vec<CacheIdentifier>,
    update_counter: u64,
    /// Cached listing; rebuilt on demand.
    listing: Option<Vec<CacheInfo>>,
}

impl OriginState {
    fn changed(&mut self) {
        self.update_counter += 1;
        self.listing = None;
    }
}

#[derive(Default)]
struct EngineState {
    last_cache_id: CacheIdentifier,
    last_record_id: RecordIdentifier,
    origins: BTreeMap<ClientOrigin, OriginState>,
    caches: BTreeMap<CacheIdentifier, StoredCache>,
    locks: HashMap<CacheIdentifier, LockCount>,
}

impl EngineState {
    fn live_cache_mut(&mut self, cache: CacheIdentifier) -> StorageResult<&mut StoredCache> {
        self.caches
            .get_mut(&cache)
            .filter(|stored| !stored.removed)
            .ok_or(StorageError::NotFound)
    }

    fn live_cache(&self, cache: CacheIdentifier) -> StorageResult<&StoredCache> {
        self.caches
            .get(&cache)
            .filter(|stored| !stored.removed)
            .ok_or(StorageError::NotFound)
    }

    fn origin_usage_excluding(&self, origin: &ClientOrigin, excluded: CacheIdentifier) -> u64 {
        self.caches
            .iter()
            .filter(|(id, stored)| **id != excluded && stored.origin == *origin)
            .map(|(_, stored)| stored.body_bytes())
            .sum()
    }
}

pub struct MemoryEngine {
    config: MemoryEngineConfig,
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    pub fn new(config: MemoryEngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Current advisory lock count of `cache`.
    pub fn lock_count(&self, cache: CacheIdentifier) -> LockCount {
        let state = self.state.lock().unwrap();
        state.locks.get(&cache).copied().unwrap_or(0)
    }

    /// Whether `cache` still occupies storage, including removed-but-locked caches.
    pub fn contains_cache(&self, cache: CacheIdentifier) -> bool {
        self.state.lock().unwrap().caches.contains_key(&cache)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(MemoryEngineConfig::default())
    }
}

fn normalize_url(raw: &str, ignore_search: bool) -> StorageResult<Url> {
    let mut url = Url::parse(raw)?;
    url.set_fragment(None);
    if ignore_search {
        url.set_query(None);
    }
    Ok(url)
}

fn url_matches(stored: &str, target: &Url, ignore_search: bool) -> bool {
    normalize_url(stored, ignore_search)
        .map(|url| url == *target)
        .unwrap_or(false)
}

fn vary_matches(record: &Record, request: &CacheRequest) -> bool {
    let Some(vary) = record.response.header("vary") else {
        return true;
    };
    vary.split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .all(|field| field != "*" && record.request.header(field) == request.header(field))
}

fn query_matches(
    record: &Record,
    request: &CacheRequest,
    target: &Url,
    options: &CacheQueryOptions,
) -> bool {
    url_matches(&record.request.url, target, options.ignore_search)
        && (options.ignore_vary || vary_matches(record, request))
}

#[async_trait]
impl CacheStorageEngine for MemoryEngine {
    async fn open(&self, origin: &ClientOrigin, name: &str) -> StorageResult<CacheIdentifier> {
        let mut state = self.state.lock().unwrap();
        let EngineState {
            last_cache_id,
            origins,
            caches,
            ..
        } = &mut *state;

        let origin_state = origins.entry(origin.clone()).or_default();
        if let Some(existing) = origin_state
            .caches
            .iter()
            .find(|id| caches.get(*id).is_some_and(|stored| stored.name == name))
        {
            return Ok(*existing);
        }

        *last_cache_id += 1;
        let identifier = *last_cache_id;
        caches.insert(
            identifier,
            StoredCache {
                origin: origin.clone(),
                name: name.to_string(),
                records: Vec::new(),
                removed: false,
            },
        );
        origin_state.caches.push(identifier);
        origin_state.changed();
        Ok(identifier)
    }

    async fn remove(&self, cache: CacheIdentifier) -> StorageResult<CacheIdentifier> {
        let mut state = self.state.lock().unwrap();
        let stored = state.live_cache_mut(cache)?;
        stored.removed = true;
        let origin = stored.origin.clone();

        if let Some(origin_state) = state.origins.get_mut(&origin) {
            origin_state.caches.retain(|id| *id != cache);
            origin_state.changed();
        }

        if state.locks.contains_key(&cache) {
            tracing::debug!(cache, "cache removed while locked; deferring deletion");
        } else {
            state.caches.remove(&cache);
        }
        Ok(cache)
    }

    async fn retrieve_caches(
        &self,
        origin: &ClientOrigin,
        update_counter: u64,
    ) -> StorageResult<CacheListing> {
        let mut state = self.state.lock().unwrap();
        let EngineState {
            origins, caches, ..
        } = &mut *state;

        let Some(origin_state) = origins.get_mut(origin) else {
            if update_counter == 0 {
                return Ok(CacheListing::Unchanged { update_counter });
            }
            return Ok(CacheListing::Updated(CacheInfos::default()));
        };

        if origin_state.update_counter == update_counter {
            return Ok(CacheListing::Unchanged { update_counter });
        }

        if origin_state.listing.is_none() {
            let infos = origin_state
                .caches
                .iter()
                .filter_map(|id| {
                    caches.get(id).map(|stored| CacheInfo {
                        identifier: *id,
                        name: stored.name.clone(),
                    })
                })
                .collect();
            origin_state.listing = Some(infos);
        }
        let infos = origin_state.listing.clone().unwrap_or_default();

        Ok(CacheListing::Updated(CacheInfos {
            infos,
            update_counter: origin_state.update_counter,
        }))
    }

    async fn retrieve_records(
        &self,
        cache: CacheIdentifier,
        url: Option<&str>,
    ) -> StorageResult<Vec<Record>> {
        let state = self.state.lock().unwrap();
        let stored = state.live_cache(cache)?;

        match url.filter(|u| !u.is_empty()) {
            None => Ok(stored.records.clone()),
            Some(raw) => {
                let target = normalize_url(raw, false)?;
                Ok(stored
                    .records
                    .iter()
                    .filter(|record| url_matches(&record.request.url, &target, false))
                    .cloned()
                    .collect())
            }
        }
    }

    async fn delete_matching_records(
        &self,
        cache: CacheIdentifier,
        request: &CacheRequest,
        options: &CacheQueryOptions,
    ) -> StorageResult<Vec<RecordIdentifier>> {
        let target = normalize_url(&request.url, options.ignore_search)?;
        let mut state = self.state.lock().unwrap();
        let stored = state.live_cache_mut(cache)?;

        if !options.ignore_method && !request.method.eq_ignore_ascii_case("GET") {
            return Ok(Vec::new());
        }

        let mut deleted = Vec::new();
        stored.records.retain(|record| {
            if query_matches(record, request, &target, options) {
                deleted.push(record.identifier);
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn put_records(
        &self,
        cache: CacheIdentifier,
        records: Vec<Record>,
    ) -> StorageResult<Vec<RecordIdentifier>> {
        let targets = records
            .iter()
            .map(|record| normalize_url(&record.request.url, false))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut state = self.state.lock().unwrap();
        let origin = state.live_cache(cache)?.origin.clone();
        let other_usage = state.origin_usage_excluding(&origin, cache);

        let mut next_record_id = state.last_record_id;
        let mut staged = state.live_cache(cache)?.records.clone();
        let mut identifiers = Vec::with_capacity(records.len());

        for (mut record, target) in records.into_iter().zip(targets.iter()) {
            let existing = staged.iter_mut().find(|stored| {
                stored.request.method.eq_ignore_ascii_case(&record.request.method)
                    && url_matches(&stored.request.url, target, false)
            });
            match existing {
                Some(stored) => {
                    record.identifier = stored.identifier;
                    record.update_response_counter = stored.update_response_counter + 1;
                    identifiers.push(record.identifier);
                    *stored = record;
                }
                None => {
                    next_record_id += 1;
                    record.identifier = next_record_id;
                    record.update_response_counter = 0;
                    identifiers.push(record.identifier);
                    staged.push(record);
                }
            }
        }

        let staged_usage: u64 = staged.iter().map(Record::body_size).sum();
        if other_usage + staged_usage > self.config.quota_bytes {
            tracing::debug!(
                cache,
                usage = other_usage + staged_usage,
                quota = self.config.quota_bytes,
                "put would exceed origin quota"
            );
            return Err(StorageError::QuotaExceeded);
        }

        state.last_record_id = next_record_id;
        state.live_cache_mut(cache)?.records = staged;
        Ok(identifiers)
    }

    async fn clear_memory_representation(&self, origin: &ClientOrigin) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(origin_state) = state.origins.get_mut(origin) {
            origin_state.listing = None;
        }
        Ok(())
    }

    fn lock(&self, cache: CacheIdentifier) {
        let mut state = self.state.lock().unwrap();
        *state.locks.entry(cache).or_insert(0) += 1;
    }

    fn unlock(&self, cache: CacheIdentifier) {
        let mut state = self.state.lock().unwrap();
        let Some(count) = state.locks.get_mut(&cache) else {
            tracing::warn!(cache, "unlock of a cache that is not locked");
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        state.locks.remove(&cache);
        if state.caches.get(&cache).is_some_and(|stored| stored.removed) {
            tracing::debug!(cache, "dropping removed cache after final unlock");
            state.caches.remove(&cache);
        }
    }

    fn representation(&self) -> String {
        let state = self.state.lock().unwrap();

        let origins: Vec<_> = state
            .origins
            .iter()
            .map(|(origin, origin_state)| {
                let caches: Vec<_> = origin_state
                    .caches
                    .iter()
                    .filter_map(|id| state.caches.get(id).map(|stored| (id, stored)))
                    .map(|(id, stored)| {
                        serde_json::json!({
                            "identifier": id,
                            "name": stored.name,
                            "records": stored.records.len(),
                            "bytes": stored.body_bytes(),
                            "locks": state.locks.get(id).copied().unwrap_or(0),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "origin": origin,
                    "update_counter": origin_state.update_counter,
                    "listing_cached": origin_state.listing.is_some(),
                    "caches": caches,
                })
            })
            .collect();

        let pending_removal: Vec<_> = state
            .caches
            .iter()
            .filter(|(_, stored)| stored.removed)
            .map(|(id, _)| *id)
            .collect();

        serde_json::json!({
            "generated_at": Utc::now().to_rfc3339(),
            "quota_bytes": self.config.quota_bytes,
            "origins": origins,
            "pending_removal": pending_removal,
        })
        .to_string()
    }
}
