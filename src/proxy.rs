//! Contract between the filter and the embedding proxy framework.
//!
//! The filter never owns a socket or a codec; it observes a stream through
//! its entry points and acts on it through the two callback handles below,
//! which the framework implements once per stream. Callback implementations
//! must not re-enter the filter synchronously — the framework drives the
//! filter from its own event flow and from the stream's
//! [`Dispatcher`](crate::dispatcher::Dispatcher).

use crate::{backend::CachedResponse, dispatcher::Dispatcher};
use bytes::Bytes;
use http::{header::HeaderName, HeaderValue};
use std::sync::Arc;

/// Iteration verdict returned by every filter entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// Keep iterating through the filter chain.
    Continue,
    /// Suspend this filter's iteration with watermark discipline; the filter
    /// resumes it later from a posted callback.
    StopAllIterationAndWatermark,
    /// Continue header encoding but do not end the stream: this filter will
    /// inject the body.
    ContinueAndDontEndStream,
}

/// Handle onto the request half of the stream.
pub trait DecoderCallbacks: Send + Sync {
    /// Resumes request iteration toward upstream after a
    /// [`FilterStatus::StopAllIterationAndWatermark`].
    fn continue_decoding(&self);

    /// Short-circuits the stream with a locally generated response; the
    /// upstream is never contacted. Headers are delivered downstream exactly
    /// once and before any data.
    fn encode_headers(&self, response: CachedResponse, end_stream: bool);

    /// Streams a chunk of a locally generated response body, in offset order.
    fn encode_data(&self, data: Bytes, end_stream: bool);

    /// Adds a header to the framework-owned request head before iteration
    /// resumes toward upstream. Replaces any existing value.
    fn insert_request_header(&self, name: HeaderName, value: HeaderValue);

    /// Downstream buffer limit; cached bodies are chunked to at most this
    /// many bytes. Zero means unlimited.
    fn buffer_limit(&self) -> usize;

    /// Tears the stream down. Used when a cached body read fails after
    /// headers already went downstream.
    fn reset_stream(&self);

    /// The stream's serial dispatcher. All backend completions are posted
    /// here before they touch filter state.
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;
}

/// Handle onto the response half of the stream.
pub trait EncoderCallbacks: Send + Sync {
    /// Appends filter-produced data to the encoded response, after the
    /// headers this filter let through with
    /// [`FilterStatus::ContinueAndDontEndStream`].
    fn inject_encoded_data(&self, data: Bytes, end_stream: bool);

    /// Encoder buffer limit; injected chunks are bounded by it. Zero means
    /// unlimited.
    fn buffer_limit(&self) -> usize;

    /// Tears the stream down.
    fn reset_stream(&self);
}
