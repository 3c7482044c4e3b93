//! The cache backend contract.
//!
//! A backend is a capability set: it mints staged lookup and insert contexts
//! and performs two administrative operations. No registry is involved — the
//! embedder hands a backend instance to each filter at construction.
//!
//! Contexts are staged: a [`LookupContext`] answers `get_headers` exactly
//! once, then serves any number of `get_body` reads proven in-bounds by that
//! answer. An [`InsertContext`] captures a head and body chunks and commits
//! at the end-of-stream marker; nothing is visible to lookups before commit,
//! and a committed context ignores whatever else it is fed. Once-only versus
//! many-times semantics are documented per method rather than encoded in
//! types.
//!
//! Buffers move by ownership in both directions: after a `get_body` callback
//! delivers a [`Bytes`], the backend no longer references it.

pub mod memory;

use crate::{error::CachetteError, http_date, key::CacheKey, range::AdjustedRange};
use bytes::Bytes;
use http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode};
use std::time::SystemTime;

/// Response head held by the cache: status and headers.
///
/// Entries always carry a status and framing consistent with the stored body;
/// the backend enforces that at commit.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        CachedResponse { status, headers }
    }

    /// Timestamp the response was generated at, from its `Date` header.
    pub fn date(&self) -> Option<SystemTime> {
        http_date::http_time(self.headers.get(header::DATE))
    }
}

/// Validators carried by an entry whose freshness ran out.
#[derive(Clone, Debug, Default)]
pub struct Validators {
    pub etag: Option<HeaderValue>,
    pub last_modified: Option<HeaderValue>,
    pub date: Option<HeaderValue>,
}

impl Validators {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Validators {
            etag: headers.get(header::ETAG).cloned(),
            last_modified: headers.get(header::LAST_MODIFIED).cloned(),
            date: headers.get(header::DATE).cloned(),
        }
    }

    /// The `If-Modified-Since` candidate: `Last-Modified`, falling back to
    /// `Date` when that is absent or unparseable.
    pub fn if_modified_since(&self) -> Option<HeaderValue> {
        if http_date::http_time(self.last_modified.as_ref()).is_some() {
            return self.last_modified.clone();
        }
        if http_date::http_time(self.date.as_ref()).is_some() {
            return self.date.clone();
        }
        None
    }

    /// Whether a conditional request can be built from these at all.
    pub fn can_validate(&self) -> bool {
        self.etag.is_some() || self.if_modified_since().is_some()
    }
}

/// Outcome of a lookup.
#[derive(Debug)]
pub enum LookupResult {
    /// No entry under the key.
    NotFound,
    /// An entry exists but is stale and carries nothing to revalidate with.
    Unusable,
    /// Serve directly, after range adjustment if the request asked for one.
    Fresh { response: CachedResponse, body_length: u64 },
    /// Revalidate upstream before reuse; `validators` feeds the precondition
    /// headers.
    RequiresValidation {
        response: CachedResponse,
        body_length: u64,
        validators: Validators,
    },
}

/// Everything a backend needs to resolve one request: the fingerprint, the
/// moment the request arrived, and whether the request itself insists on
/// revalidation.
#[derive(Clone, Debug)]
pub struct LookupRequest {
    pub key: CacheKey,
    pub timestamp: SystemTime,
    pub force_validation: bool,
}

impl LookupRequest {
    pub fn from_request(head: &Parts, timestamp: SystemTime, key_headers: &[header::HeaderName]) -> Self {
        LookupRequest {
            key: CacheKey::from_request(head, key_headers),
            timestamp,
            force_validation: crate::cache_control::request_forces_validation(&head.headers),
        }
    }
}

/// Delivers the outcome of `get_headers`. Lookup failures fail open: the
/// filter treats an `Err` as [`LookupResult::NotFound`].
pub type HeadersCb = Box<dyn FnOnce(Result<LookupResult, CachetteError>) + Send>;
/// Delivers one `get_body` read. An `Err` after headers were served is fatal
/// to the stream.
pub type BodyCb = Box<dyn FnOnce(Result<Bytes, CachetteError>) + Send>;
/// Delivers cached trailers. Unused by this filter.
pub type TrailersCb = Box<dyn FnOnce(HeaderMap) + Send>;
/// Flow control for inserts: `true` requests the next chunk, `false` aborts
/// the ingestion.
pub type ReadyCb = Box<dyn FnOnce(bool) + Send>;

/// Staged read access to one entry. Exclusive to the stream that created it;
/// never touched from another thread.
pub trait LookupContext: Send {
    /// The request this context resolves.
    fn request(&self) -> &LookupRequest;

    /// Delivers the lookup outcome. Invoked exactly once per context.
    fn get_headers(&mut self, cb: HeadersCb);

    /// Delivers `body[range.first ..= range.last]`. May be invoked many
    /// times with non-overlapping, monotonically advancing ranges, each
    /// proven in-bounds by the body length `get_headers` reported. Reading
    /// past the body is a contract violation and asserts.
    fn get_body(&mut self, range: AdjustedRange, cb: BodyCb);

    /// Trailers are not supported; backends that never advertised any may
    /// fail terminally here.
    fn get_trailers(&mut self, _cb: TrailersCb) {
        unimplemented!("cached trailers are not supported")
    }
}

/// Staged write access for one response, minted from the lookup that missed
/// (or is being replaced).
pub trait InsertContext: Send {
    /// Captures the response head. `response_time` is the moment the
    /// response was received, the freshness anchor when the head has no
    /// usable `Date`. Commits immediately when `end_stream`. Invoked once.
    fn insert_headers(&mut self, response: CachedResponse, response_time: SystemTime, end_stream: bool);

    /// Appends a body chunk; commits when `end_stream`, otherwise answers
    /// through `ready` — `true` to request the next chunk, `false` to abort
    /// ingestion (quota exhaustion). A committed or aborted context ignores
    /// further chunks.
    fn insert_body(&mut self, chunk: Bytes, ready: ReadyCb, end_stream: bool);

    /// Trailers are not supported.
    fn insert_trailers(&mut self, _trailers: HeaderMap) {
        unimplemented!("trailer insertion is not supported")
    }
}

/// Descriptive record for introspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheInfo {
    pub name: String,
}

/// Capability set implemented by pluggable storage.
///
/// A backend may be shared across many streams on many threads and provides
/// its own synchronization for the operations below.
pub trait CacheBackend: Send + Sync {
    /// Mints read access for one request.
    fn make_lookup_context(&self, request: LookupRequest) -> Box<dyn LookupContext>;

    /// Converts a finished lookup into write access under the same key.
    fn make_insert_context(&self, lookup: Box<dyn LookupContext>) -> Box<dyn InsertContext>;

    /// Refreshes the stored head after a successful revalidation, leaving
    /// the body untouched. Atomic with respect to concurrent lookups of the
    /// same key. Returns false when no entry exists under the key.
    fn update_headers(&self, request: &LookupRequest, response: CachedResponse) -> bool;

    /// Descriptive record for introspection.
    fn cache_info(&self) -> CacheInfo;
}
