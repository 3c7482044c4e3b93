//! Reference in-memory backend: a key → entry map behind a single lock.
//!
//! It never evicts, which makes it suitable for tests and deliberately
//! unsuitable for production. Inserts are staged in the context and become
//! visible atomically at commit; lookups snapshot the entry they resolved so
//! body reads stay consistent even when the entry is replaced mid-stream.

use super::{
    BodyCb, CacheBackend, CacheInfo, CachedResponse, HeadersCb, InsertContext, LookupContext, LookupRequest,
    LookupResult, ReadyCb, Validators,
};
use crate::{cache_control, key::CacheKey, range::AdjustedRange};
use bytes::Bytes;
use http::{header, HeaderValue};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::SystemTime,
};

struct Entry {
    response: CachedResponse,
    body: Bytes,
    /// Freshness anchor when the head carries no parseable `Date`.
    response_time: SystemTime,
}

impl Entry {
    fn date(&self) -> SystemTime {
        self.response.date().unwrap_or(self.response_time)
    }

    fn resolve(&self, request: &LookupRequest) -> LookupResult {
        let body_length = self.body.len() as u64;
        let age = request.timestamp.duration_since(self.date()).unwrap_or_default();
        let lifetime = cache_control::response_effective_max_age(&self.response.headers);
        if !request.force_validation && age < lifetime {
            return LookupResult::Fresh {
                response: self.response.clone(),
                body_length,
            };
        }
        let validators = Validators::from_headers(&self.response.headers);
        if validators.can_validate() {
            LookupResult::RequiresValidation {
                response: self.response.clone(),
                body_length,
                validators,
            }
        } else {
            LookupResult::Unusable
        }
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, Arc<Entry>>,
    size: u64,
}

/// The demo backend.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<RwLock<CacheInner>>,
    max_entry_size: u64,
    max_capacity: u64,
}

impl MemoryCache {
    pub fn new(max_entry_size: u64, max_capacity: u64) -> Self {
        MemoryCache {
            inner: Arc::new(RwLock::new(Default::default())),
            max_entry_size,
            max_capacity,
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of committed bodies.
    pub fn size(&self) -> u64 {
        self.inner.read().unwrap().size
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.inner.read().unwrap().entries.get(key).cloned()
    }

    fn install(&self, key: CacheKey, entry: Arc<Entry>) {
        let mut inner = self.inner.write().unwrap();
        inner.size += entry.body.len() as u64;
        if let Some(replaced) = inner.entries.insert(key, entry) {
            inner.size -= replaced.body.len() as u64;
        }
    }
}

impl CacheBackend for MemoryCache {
    fn make_lookup_context(&self, request: LookupRequest) -> Box<dyn LookupContext> {
        Box::new(MemoryLookupContext {
            cache: self.clone(),
            request,
            snapshot: None,
        })
    }

    fn make_insert_context(&self, lookup: Box<dyn LookupContext>) -> Box<dyn InsertContext> {
        Box::new(MemoryInsertContext {
            cache: self.clone(),
            request: lookup.request().clone(),
            response: None,
            response_time: None,
            body: Vec::new(),
            committed: false,
            aborted: false,
        })
    }

    fn update_headers(&self, request: &LookupRequest, response: CachedResponse) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.entries.get_mut(&request.key) {
            Some(entry) => {
                *entry = Arc::new(Entry {
                    response,
                    body: entry.body.clone(),
                    response_time: entry.response_time,
                });
                true
            }
            None => false,
        }
    }

    fn cache_info(&self) -> CacheInfo {
        CacheInfo { name: "memory".to_owned() }
    }
}

struct MemoryLookupContext {
    cache: MemoryCache,
    request: LookupRequest,
    snapshot: Option<Arc<Entry>>,
}

impl LookupContext for MemoryLookupContext {
    fn request(&self) -> &LookupRequest {
        &self.request
    }

    fn get_headers(&mut self, cb: HeadersCb) {
        debug_assert!(self.snapshot.is_none(), "get_headers invoked twice on one context");
        match self.cache.get(&self.request.key) {
            Some(entry) => {
                let result = entry.resolve(&self.request);
                self.snapshot = Some(entry);
                cb(Ok(result));
            }
            None => cb(Ok(LookupResult::NotFound)),
        }
    }

    fn get_body(&mut self, range: AdjustedRange, cb: BodyCb) {
        let entry = self.snapshot.as_ref().expect("get_body before get_headers");
        let (first, last) = (range.first_byte() as usize, range.last_byte() as usize);
        assert!(last < entry.body.len(), "body read past the cached length");
        cb(Ok(entry.body.slice(first..=last)));
    }
}

struct MemoryInsertContext {
    cache: MemoryCache,
    request: LookupRequest,
    response: Option<CachedResponse>,
    response_time: Option<SystemTime>,
    body: Vec<u8>,
    committed: bool,
    aborted: bool,
}

impl MemoryInsertContext {
    fn over_quota(&self, incoming: usize) -> bool {
        let projected = self.body.len() as u64 + incoming as u64;
        projected > self.cache.max_entry_size || self.cache.size() + projected > self.cache.max_capacity
    }

    fn commit(&mut self) {
        if self.committed || self.aborted {
            return;
        }
        self.committed = true;
        let mut response = self.response.take().expect("insert committed without headers");
        let body = Bytes::from(std::mem::take(&mut self.body));
        // the stored head must frame exactly the stored body
        response.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        let entry = Entry {
            response,
            body,
            response_time: self.response_time.expect("insert committed without headers"),
        };
        debug!("cache commit for {}", self.request.key);
        self.cache.install(self.request.key.clone(), Arc::new(entry));
    }
}

impl InsertContext for MemoryInsertContext {
    fn insert_headers(&mut self, response: CachedResponse, response_time: SystemTime, end_stream: bool) {
        debug_assert!(self.response.is_none(), "insert_headers invoked twice on one context");
        self.response = Some(response);
        self.response_time = Some(response_time);
        if end_stream {
            self.commit();
        }
    }

    fn insert_body(&mut self, chunk: Bytes, ready: ReadyCb, end_stream: bool) {
        if self.committed || self.aborted {
            // a committed context ignores further chunks
            ready(false);
            return;
        }
        if self.over_quota(chunk.len()) {
            debug!("cache insert for {} exceeds quota, aborting ingestion", self.request.key);
            self.aborted = true;
            self.body = Vec::new();
            ready(false);
            return;
        }
        self.body.extend_from_slice(&chunk);
        if end_stream {
            self.commit();
        } else {
            ready(true);
        }
    }
}
