//! `Content-Range` response header, described in
//! [RFC 7233 §4.2](https://tools.ietf.org/html/rfc7233#section-4.2).
//!
//! # ABNF
//!
//! ```text
//! byte-content-range  = bytes-unit SP
//!                       ( byte-range-resp / unsatisfied-range )
//!
//! byte-range-resp     = byte-range "/" ( complete-length / "*" )
//! byte-range          = first-byte-pos "-" last-byte-pos
//! unsatisfied-range   = "*/" complete-length
//! ```
//!
//! Only the two forms this filter emits are modelled: a satisfied byte range
//! with a known complete length (`206` responses) and the unsatisfied form
//! (`416` responses).

use crate::range::AdjustedRange;
use http::HeaderValue;
use std::fmt::{self, Display};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes F-L/N`
    Satisfied {
        range: AdjustedRange,
        complete_length: u64,
    },
    /// `bytes */N`
    Unsatisfied { complete_length: u64 },
}

impl Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRange::Satisfied { range, complete_length } => write!(f, "bytes {}/{}", range, complete_length),
            ContentRange::Unsatisfied { complete_length } => write!(f, "bytes */{}", complete_length),
        }
    }
}

impl ContentRange {
    pub fn to_header_value(self) -> HeaderValue {
        HeaderValue::from_str(&self.to_string()).expect("content-range renders to visible ascii")
    }
}
