//! # Cachette is an HTTP caching filter for proxy data paths
//! The goal is to give a reverse proxy a drop-in caching layer without tying
//! it to one storage engine: the filter speaks to its surrounding framework
//! through a small callback contract, and to storage through staged
//! lookup/insert contexts.
//!
//! # Quick Overview
//!
//! A stream's lifecycle through the filter:
//!
//! ```text
//!     decode_headers           encode_headers
//!           |                        |
//!           v                        v
//! +---------+------+       +--------+-------+
//! |    lookup      |  miss |    capture     |
//! |  (suspended)   +------>+  (insert ctx)  |
//! |                |       |                |
//! |  hit: serve    |       |  304: fuse     |
//! |  cached body   |       |  cached body   |
//! +----------------+       +----------------+
//! ```
//!
//! On a hit the filter short-circuits the stream with the cached response,
//! chunking the body to the downstream buffer limit and pausing on watermark
//! notifications. When freshness is uncertain it injects precondition headers,
//! lets the request travel upstream, and on a `304 Not Modified` replaces the
//! upstream head with the refreshed cached one and injects the cached body.
//!
//! The reference [`backend::memory::MemoryCache`] keeps everything in a
//! mutex-guarded map and never evicts; production deployments are expected to
//! bring their own [`backend::CacheBackend`].

#[macro_use]
extern crate log;

/// Cache backend contract and the reference in-memory backend
pub mod backend;
/// Cache-Control directive parsing
pub mod cache_control;
///
pub mod config;
/// The Content-Range response header
pub mod content_range;
/// Per-stream serial job execution
pub mod dispatcher;
/// Error definitions
pub mod error;
/// The per-stream filter state machine
pub mod filter;
/// RFC 7231 date parsing and formatting
pub mod http_date;
/// Request fingerprinting
pub mod key;
/// Contract between the filter and the embedding framework
pub mod proxy;
/// The Range request header
pub mod range;
///
pub mod utils;

///
pub use bytes::Bytes;
///
pub use http;

/// Contains everything you need to embed the filter
pub mod prelude {
    ///
    pub use crate::backend::{memory::MemoryCache, CacheBackend, CachedResponse, InsertContext, LookupContext, LookupRequest, LookupResult};
    ///
    pub use crate::config::CacheFilterConfig;
    ///
    pub use crate::dispatcher::{Dispatcher, QueueDispatcher, TokioDispatcher};
    ///
    pub use crate::error::CachetteError;
    ///
    pub use crate::filter::CacheFilter;
    ///
    pub use crate::proxy::{DecoderCallbacks, EncoderCallbacks, FilterStatus};
    ///
    pub use crate::utils::{Clock, SystemClock};
    ///
    pub use bytes::Bytes;
    ///
    pub use http::header;
    ///
    pub use http::Method;
    ///
    pub use http::StatusCode;
    ///
    pub use http::Uri;
}
