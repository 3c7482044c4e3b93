//! The per-stream caching filter.
//!
//! A `CacheFilter` lives exactly as long as its proxy stream. On the request
//! path it resolves a lookup, and either short-circuits the stream with the
//! cached response or lets the request travel upstream, with precondition
//! headers injected when the entry needs revalidation. On the response path
//! it captures cacheable responses through an insert context and fuses `304
//! Not Modified` answers with the cached body.
//!
//! All suspension is cooperative: entry points return a
//! [`FilterStatus`](crate::proxy::FilterStatus) and resumption happens from
//! jobs posted to the stream's dispatcher. Every posted job carries a weak
//! handle to the filter; a job firing after [`CacheFilter::on_destroy`]
//! upgrades into nothing and becomes a no-op, which is what lets the filter
//! survive a downstream disconnect while a backend read is still in flight.

use crate::{
    backend::{CacheBackend, CachedResponse, InsertContext, LookupContext, LookupRequest, LookupResult, ReadyCb},
    cache_control,
    config::CacheFilterConfig,
    content_range::ContentRange,
    error::CachetteError,
    proxy::{DecoderCallbacks, EncoderCallbacks, FilterStatus},
    range::{self, AdjustedRange, RawByteRange},
    utils::Clock,
};
use bytes::Bytes;
use http::{header, header::HeaderName, request, response, HeaderMap, Method, StatusCode};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

/// Response headers a 304 never overwrites: the cached body is reused, so its
/// framing and coding must survive the refresh.
const HEADERS_KEPT_ON_304: &[HeaderName] = &[
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONTENT_RANGE,
];

/// Progress of a chunked read over the cached body.
struct BodyStream {
    /// Absolute offset of the next byte to read.
    next_offset: u64,
    /// One past the last byte to serve.
    end_offset: u64,
    /// A `get_body` callback has been issued and has not landed yet.
    in_flight: bool,
    /// Chunk that landed while the watermark was up; delivered first on
    /// resume.
    held: Option<Bytes>,
    /// The loop parked itself before issuing a read; resume must re-pump.
    stalled: bool,
}

enum State {
    Initial,
    LookingUp,
    Forwarding,
    ServingFromCache(BodyStream),
    Validating {
        response: CachedResponse,
        body_length: u64,
    },
    InjectingAfterValidation(BodyStream),
    Done,
    Destroyed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Initial => "Initial",
            State::LookingUp => "LookingUp",
            State::Forwarding => "Forwarding",
            State::ServingFromCache(_) => "ServingFromCache",
            State::Validating { .. } => "Validating",
            State::InjectingAfterValidation(_) => "InjectingAfterValidation",
            State::Done => "Done",
            State::Destroyed => "Destroyed",
        }
    }
}

/// The per-stream filter object.
///
/// Entry points mirror the framework contract; see the module docs for the
/// flow. The filter is cheap to construct, one per stream.
pub struct CacheFilter {
    inner: Arc<Mutex<FilterInner>>,
}

struct FilterInner {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    config: CacheFilterConfig,
    decoder: Arc<dyn DecoderCallbacks>,
    encoder: Arc<dyn EncoderCallbacks>,
    state: State,
    lookup: Option<Box<dyn LookupContext>>,
    insert: Option<Box<dyn InsertContext>>,
    /// The backend has asked for the next chunk.
    insert_ready: bool,
    /// The backend answered `ready(false)` during the last feed.
    insert_aborted: bool,
    request: Option<LookupRequest>,
    request_is_get: bool,
    ranges: Vec<RawByteRange>,
    /// Outstanding high-watermark notifications; body emission pauses while
    /// this is above zero.
    watermark_depth: u32,
}

impl CacheFilter {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        config: CacheFilterConfig,
        decoder: Arc<dyn DecoderCallbacks>,
        encoder: Arc<dyn EncoderCallbacks>,
    ) -> Self {
        CacheFilter {
            inner: Arc::new(Mutex::new(FilterInner {
                backend,
                clock,
                config,
                decoder,
                encoder,
                state: State::Initial,
                lookup: None,
                insert: None,
                insert_ready: false,
                insert_aborted: false,
                request: None,
                request_is_get: false,
                ranges: Vec::new(),
                watermark_depth: 0,
            })),
        }
    }

    /// Request headers arriving from downstream.
    pub fn decode_headers(&self, head: &request::Parts, _end_stream: bool) -> FilterStatus {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(matches!(inner.state, State::Initial), "decode_headers in state {}", inner.state.name());
        if head.method != Method::GET {
            inner.state = State::Forwarding;
            return FilterStatus::Continue;
        }
        inner.request_is_get = true;
        inner.ranges = range::parse_range_header(&head.headers, &head.method, inner.config.byte_range_parse_limit);

        let request = LookupRequest::from_request(head, inner.clock.now(), &inner.config.key_headers);
        debug!("cache lookup for {}", request.key);
        let mut lookup = inner.backend.make_lookup_context(request.clone());
        inner.request = Some(request);
        inner.state = State::LookingUp;

        let weak = Arc::downgrade(&self.inner);
        let dispatcher = inner.decoder.dispatcher();
        lookup.get_headers(Box::new(move |result| {
            dispatcher.post(Box::new(move || {
                if let Some(filter) = weak.upgrade() {
                    FilterInner::on_lookup_complete(&filter, result);
                }
            }));
        }));
        inner.lookup = Some(lookup);
        FilterStatus::StopAllIterationAndWatermark
    }

    /// Request body data; nothing for this filter to do with it.
    pub fn decode_data(&self, _data: &Bytes, _end_stream: bool) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Request trailers; nothing for this filter to do with them.
    pub fn decode_trailers(&self, _trailers: &HeaderMap) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Response headers arriving from upstream.
    pub fn encode_headers(&self, head: &mut response::Parts, end_stream: bool) -> FilterStatus {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Forwarding => {
                FilterInner::maybe_start_insert(&mut inner, head, end_stream);
                FilterStatus::Continue
            }
            State::Validating { .. } => {
                let (response, body_length) = match std::mem::replace(&mut inner.state, State::Done) {
                    State::Validating { response, body_length } => (response, body_length),
                    _ => unreachable!(),
                };
                if head.status == StatusCode::NOT_MODIFIED {
                    FilterInner::finish_validation(&self.inner, inner, head, response, body_length)
                } else {
                    debug!("validation answered {} instead of 304, forwarding the new response", head.status);
                    inner.state = State::Forwarding;
                    FilterInner::maybe_start_insert(&mut inner, head, end_stream);
                    FilterStatus::Continue
                }
            }
            _ => FilterStatus::Continue,
        }
    }

    /// Response body data arriving from upstream; fed to an active insert and
    /// passed through untouched.
    pub fn encode_data(&self, data: Bytes, end_stream: bool) -> FilterStatus {
        let mut inner = self.inner.lock().unwrap();
        let mut insert = match inner.insert.take() {
            Some(insert) => insert,
            None => return FilterStatus::Continue,
        };
        if !inner.insert_ready {
            // the backend never asked for more and this filter does not
            // buffer upstream data, so the capture ends here
            debug!("cache backend not ready for the next chunk, abandoning insert");
            return FilterStatus::Continue;
        }
        inner.insert_ready = false;
        drop(inner);

        let weak = Arc::downgrade(&self.inner);
        let ready: ReadyCb = Box::new(move |keep_going| {
            if let Some(filter) = weak.upgrade() {
                let mut inner = filter.lock().unwrap();
                if keep_going {
                    inner.insert_ready = true;
                } else {
                    inner.insert_aborted = true;
                }
            }
        });
        insert.insert_body(data, ready, end_stream);

        let mut inner = self.inner.lock().unwrap();
        if inner.insert_aborted {
            debug!("cache backend aborted the insert");
            inner.insert_aborted = false;
        } else if !end_stream && !matches!(inner.state, State::Destroyed) {
            inner.insert = Some(insert);
        }
        FilterStatus::Continue
    }

    /// Response trailers cannot be cached; an in-progress capture is dropped
    /// and the trailers pass through.
    pub fn encode_trailers(&self, _trailers: &HeaderMap) -> FilterStatus {
        let mut inner = self.inner.lock().unwrap();
        if inner.insert.take().is_some() {
            debug!("upstream response carries trailers, abandoning cache insert");
        }
        FilterStatus::Continue
    }

    /// Downstream cannot keep up; body emission pauses until the matching low
    /// watermark.
    pub fn on_above_high_watermark(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, State::Destroyed) {
            return;
        }
        inner.watermark_depth += 1;
    }

    /// Downstream drained below the low watermark; emission resumes once the
    /// depth returns to zero.
    pub fn on_below_low_watermark(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, State::Destroyed) {
            return;
        }
        if inner.watermark_depth == 0 {
            warn!("low watermark signalled at zero depth, ignoring");
            return;
        }
        inner.watermark_depth -= 1;
        if inner.watermark_depth > 0 {
            return;
        }
        if let Some(chunk) = inner.stream_mut().and_then(|stream| stream.held.take()) {
            FilterInner::deliver(&self.inner, inner, chunk);
        } else if inner.stream_mut().map(|stream| stream.stalled).unwrap_or(false) {
            FilterInner::pump(&self.inner, inner);
        }
    }

    /// The stream is going away. Posted callbacks still in flight observe the
    /// destroyed state and become no-ops; no downstream callback is ever
    /// issued past this point.
    pub fn on_destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Destroyed;
        inner.lookup = None;
        inner.insert = None;
    }
}

impl FilterInner {
    fn stream_mut(&mut self) -> Option<&mut BodyStream> {
        match &mut self.state {
            State::ServingFromCache(stream) | State::InjectingAfterValidation(stream) => Some(stream),
            _ => None,
        }
    }

    /// Lookup outcome, posted to the dispatcher by `decode_headers`.
    fn on_lookup_complete(filter: &Arc<Mutex<FilterInner>>, result: Result<LookupResult, CachetteError>) {
        let mut inner = filter.lock().unwrap();
        match inner.state {
            State::LookingUp => {}
            State::Destroyed => return,
            _ => {
                warn!("lookup completed in state {}, dropping", inner.state.name());
                return;
            }
        }
        let result = result.unwrap_or_else(|e| {
            // lookup failures fail open toward upstream
            debug!("cache lookup failed, bypassing: {}", e);
            LookupResult::NotFound
        });
        match result {
            LookupResult::NotFound | LookupResult::Unusable => {
                inner.state = State::Forwarding;
                inner.decoder.continue_decoding();
            }
            LookupResult::Fresh { response, body_length } => {
                Self::serve_from_cache(filter, inner, response, body_length);
            }
            LookupResult::RequiresValidation {
                response,
                body_length,
                validators,
            } => {
                if let Some(etag) = validators.etag.clone() {
                    inner.decoder.insert_request_header(header::IF_NONE_MATCH, etag);
                }
                if let Some(since) = validators.if_modified_since() {
                    inner.decoder.insert_request_header(header::IF_MODIFIED_SINCE, since);
                }
                inner.state = State::Validating { response, body_length };
                inner.decoder.continue_decoding();
            }
        }
    }

    /// Serves a fresh hit downstream, honoring a single satisfiable range.
    fn serve_from_cache(
        filter: &Arc<Mutex<FilterInner>>,
        mut inner: MutexGuard<'_, FilterInner>,
        mut response: CachedResponse,
        body_length: u64,
    ) {
        let now = inner.clock.now();
        let age = response
            .date()
            .and_then(|date| now.duration_since(date).ok())
            .unwrap_or_default();
        response.headers.insert(header::AGE, age.as_secs().into());

        if inner.ranges.len() == 1 {
            match inner.ranges[0].adjust(body_length) {
                Some(adjusted) => {
                    response.status = StatusCode::PARTIAL_CONTENT;
                    response.headers.insert(
                        header::CONTENT_RANGE,
                        ContentRange::Satisfied {
                            range: adjusted,
                            complete_length: body_length,
                        }
                        .to_header_value(),
                    );
                    response.headers.insert(header::CONTENT_LENGTH, adjusted.len().into());
                    inner.decoder.encode_headers(response, false);
                    Self::start_stream(filter, inner, adjusted, false);
                }
                None => {
                    debug!("unsatisfiable range {} against {} bytes", inner.ranges[0], body_length);
                    response.status = StatusCode::RANGE_NOT_SATISFIABLE;
                    response.headers.insert(
                        header::CONTENT_RANGE,
                        ContentRange::Unsatisfied { complete_length: body_length }.to_header_value(),
                    );
                    response.headers.insert(header::CONTENT_LENGTH, 0u64.into());
                    inner.state = State::Done;
                    inner.lookup = None;
                    inner.decoder.encode_headers(response, true);
                }
            }
            return;
        }

        // zero or several ranges: the full representation (no multipart)
        if body_length == 0 {
            inner.state = State::Done;
            inner.lookup = None;
            inner.decoder.encode_headers(response, true);
        } else {
            inner.decoder.encode_headers(response, false);
            Self::start_stream(filter, inner, AdjustedRange::new(0, body_length - 1), false);
        }
    }

    /// A 304 landed for the entry being validated: refresh the stored head,
    /// swap the upstream head for the cached one and inject the cached body.
    fn finish_validation(
        filter: &Arc<Mutex<FilterInner>>,
        mut inner: MutexGuard<'_, FilterInner>,
        head: &mut response::Parts,
        cached: CachedResponse,
        body_length: u64,
    ) -> FilterStatus {
        let mut merged = cached;
        merge_refreshed_headers(&mut merged.headers, &head.headers);
        let request = inner.request.clone().expect("validating without a lookup request");
        if !inner.backend.update_headers(&request, merged.clone()) {
            // the entry vanished under us; downstream gets the upstream 304
            warn!("304 arrived for an absent entry, forwarding it");
            inner.state = State::Done;
            inner.lookup = None;
            return FilterStatus::Continue;
        }
        debug!("revalidated {}, serving refreshed entry", request.key);
        head.status = merged.status;
        head.headers = merged.headers;
        if body_length == 0 {
            inner.state = State::Done;
            inner.lookup = None;
            return FilterStatus::Continue;
        }
        Self::start_stream(filter, inner, AdjustedRange::new(0, body_length - 1), true);
        FilterStatus::ContinueAndDontEndStream
    }

    /// Opens an insert context when the response is cacheable: a GET answered
    /// with a 2xx other than 206, not marked no-store or private.
    fn maybe_start_insert(inner: &mut FilterInner, head: &response::Parts, end_stream: bool) {
        if !inner.request_is_get || inner.lookup.is_none() {
            return;
        }
        if !head.status.is_success() || head.status == StatusCode::PARTIAL_CONTENT {
            return;
        }
        if !cache_control::response_is_storable(&head.headers) {
            debug!("response is not storable, bypassing capture");
            return;
        }
        let lookup = inner.lookup.take().expect("checked above");
        let mut insert = inner.backend.make_insert_context(lookup);
        let response = CachedResponse::new(head.status, head.headers.clone());
        insert.insert_headers(response, inner.clock.now(), end_stream);
        if !end_stream {
            inner.insert = Some(insert);
            inner.insert_ready = true;
        }
    }

    /// Begins the chunked body read covering `range`, emitting downstream
    /// (`injecting == false`) or into the encoded stream (`injecting ==
    /// true`).
    fn start_stream(filter: &Arc<Mutex<FilterInner>>, mut inner: MutexGuard<'_, FilterInner>, range: AdjustedRange, injecting: bool) {
        let stream = BodyStream {
            next_offset: range.first_byte(),
            end_offset: range.last_byte() + 1,
            in_flight: false,
            held: None,
            stalled: false,
        };
        inner.state = if injecting {
            State::InjectingAfterValidation(stream)
        } else {
            State::ServingFromCache(stream)
        };
        Self::pump(filter, inner);
    }

    /// Issues the next `get_body` read unless the stream is parked, mid-read
    /// or finished. Chunks are bounded by the downstream buffer limit.
    fn pump(filter: &Arc<Mutex<FilterInner>>, mut inner: MutexGuard<'_, FilterInner>) {
        let limit = match inner.state {
            State::InjectingAfterValidation(_) => inner.encoder.buffer_limit(),
            _ => inner.decoder.buffer_limit(),
        };
        let dispatcher = inner.decoder.dispatcher();
        let depth = inner.watermark_depth;
        let range = {
            let stream = match inner.stream_mut() {
                Some(stream) => stream,
                None => return,
            };
            if stream.in_flight || stream.held.is_some() {
                return;
            }
            if depth > 0 {
                stream.stalled = true;
                return;
            }
            stream.stalled = false;
            debug_assert!(stream.next_offset < stream.end_offset, "pumped past the end of the body");
            let remaining = stream.end_offset - stream.next_offset;
            let len = if limit == 0 { remaining } else { remaining.min(limit as u64) };
            stream.in_flight = true;
            AdjustedRange::new(stream.next_offset, stream.next_offset + len - 1)
        };

        let weak = Arc::downgrade(filter);
        inner
            .lookup
            .as_mut()
            .expect("body stream without a lookup context")
            .get_body(
                range,
                Box::new(move |result| {
                    dispatcher.post(Box::new(move || {
                        if let Some(filter) = weak.upgrade() {
                            FilterInner::on_body_chunk(&filter, result);
                        }
                    }));
                }),
            );
    }

    /// One `get_body` read landed, posted to the dispatcher.
    fn on_body_chunk(filter: &Arc<Mutex<FilterInner>>, result: Result<Bytes, CachetteError>) {
        let mut inner = filter.lock().unwrap();
        if matches!(inner.state, State::Destroyed) {
            return;
        }
        let injecting = matches!(inner.state, State::InjectingAfterValidation(_));
        let depth = inner.watermark_depth;
        let chunk = match result {
            Ok(chunk) => chunk,
            Err(e) => {
                // headers already went downstream, a reset is all that is left
                warn!("cached body read failed mid-stream, resetting: {}", e);
                if injecting {
                    inner.encoder.reset_stream();
                } else {
                    inner.decoder.reset_stream();
                }
                inner.state = State::Done;
                inner.lookup = None;
                return;
            }
        };
        {
            let stream = match inner.stream_mut() {
                Some(stream) => stream,
                None => return,
            };
            stream.in_flight = false;
            if depth > 0 {
                stream.held = Some(chunk);
                return;
            }
        }
        Self::deliver(filter, inner, chunk);
    }

    /// Emits one chunk in offset order and keeps the loop going.
    fn deliver(filter: &Arc<Mutex<FilterInner>>, mut inner: MutexGuard<'_, FilterInner>, chunk: Bytes) {
        let injecting = matches!(inner.state, State::InjectingAfterValidation(_));
        let end_stream = {
            let stream = match inner.stream_mut() {
                Some(stream) => stream,
                None => return,
            };
            stream.next_offset += chunk.len() as u64;
            stream.next_offset >= stream.end_offset
        };
        if injecting {
            inner.encoder.inject_encoded_data(chunk, end_stream);
        } else {
            inner.decoder.encode_data(chunk, end_stream);
        }
        if end_stream {
            inner.state = State::Done;
            inner.lookup = None;
        } else {
            Self::pump(filter, inner);
        }
    }
}

/// Applies the fresher headers of a 304 onto the cached head, everything but
/// the body-framing set the stored body still owns.
fn merge_refreshed_headers(cached: &mut HeaderMap, fresh: &HeaderMap) {
    let mut replaced: HashSet<&HeaderName> = HashSet::new();
    for (name, value) in fresh {
        if HEADERS_KEPT_ON_304.contains(name) {
            continue;
        }
        if replaced.insert(name) {
            cached.insert(name.clone(), value.clone());
        } else {
            cached.append(name.clone(), value.clone());
        }
    }
}
