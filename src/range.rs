//! `Range` header parsing, defined in
//! [RFC 7233 §3.1](https://tools.ietf.org/html/rfc7233#section-3.1).
//!
//! Only the `bytes` unit is understood:
//!
//! ```text
//! byte-ranges-specifier = "bytes=" byte-range-spec *( "," byte-range-spec )
//! byte-range-spec       = ( first-byte-pos "-" [ last-byte-pos ] )
//!                       / ( "-" suffix-length )
//! ```
//!
//! The grammar is enforced strictly: a single malformed spec, a stray byte
//! between specs, or a trailing comma discards the whole header. Rejection is
//! never a stream error, the request simply proceeds as if no `Range` were
//! present.

use crate::utils::{read_digits, DigitRun};
use http::{header, HeaderMap, Method};
use std::fmt::{self, Display};

/// Values of a `Range` header longer than this are discarded unparsed when no
/// explicit range-count limit is configured. Caps parse time and bounds the
/// accepted range count at roughly ten.
const RANGE_HEADER_BYTE_CAP: usize = 100;

/// A byte interval as requested, before adjustment against the body length.
///
/// The `u64::MAX` value is reserved in the `first` slot to mark a suffix
/// range (`bytes=-N`), in which case `last` holds the suffix length. For all
/// other ranges `first <= last` holds, an open-ended `first-` spec carrying
/// `u64::MAX` as its last byte position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawByteRange {
    first: u64,
    last: u64,
}

impl RawByteRange {
    /// Builds a regular (non-suffix) range.
    ///
    /// # Panics
    /// Panics when `first > last`; requesting an inverted interval is a bug
    /// in the caller, the parser never produces one.
    pub fn new(first: u64, last: u64) -> Self {
        assert!(first <= last, "byte range with first ({}) > last ({})", first, last);
        RawByteRange { first, last }
    }

    /// Builds a suffix range requesting the trailing `suffix_length` bytes.
    pub fn suffix(suffix_length: u64) -> Self {
        RawByteRange {
            first: u64::MAX,
            last: suffix_length,
        }
    }

    pub fn is_suffix(&self) -> bool {
        self.first == u64::MAX
    }

    pub fn first_byte(&self) -> u64 {
        self.first
    }

    pub fn last_byte(&self) -> u64 {
        self.last
    }

    /// Resolves the request against the actual body length, following
    /// [RFC 7233 §2.1](https://tools.ietf.org/html/rfc7233#section-2.1):
    /// a suffix longer than the body covers the whole body, a last-byte-pos
    /// past the end is clamped to `length - 1`, and a first-byte-pos at or
    /// past the end is unsatisfiable.
    pub fn adjust(&self, body_length: u64) -> Option<AdjustedRange> {
        if body_length == 0 {
            return None;
        }
        if self.is_suffix() {
            if self.last == 0 {
                return None;
            }
            Some(AdjustedRange {
                first: body_length.saturating_sub(self.last),
                last: body_length - 1,
            })
        } else {
            if self.first >= body_length {
                return None;
            }
            Some(AdjustedRange {
                first: self.first,
                last: self.last.min(body_length - 1),
            })
        }
    }
}

impl Display for RawByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_suffix() {
            write!(f, "-{}", self.last)
        } else if self.last == u64::MAX {
            write!(f, "{}-", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// A byte interval resolved against a known body length: both ends are
/// concrete, inclusive, and `last` is known to lie within the body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdjustedRange {
    first: u64,
    last: u64,
}

impl AdjustedRange {
    pub fn new(first: u64, last: u64) -> Self {
        assert!(first <= last, "adjusted range with first ({}) > last ({})", first, last);
        AdjustedRange { first, last }
    }

    pub fn first_byte(&self) -> u64 {
        self.first
    }

    pub fn last_byte(&self) -> u64 {
        self.last
    }

    /// Number of bytes covered; never zero.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }
}

impl Display for AdjustedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Extracts the byte ranges requested by `headers`.
///
/// Returns an empty vector for: non-GET methods, a multi-valued `Range`
/// header, a value over the length cap (or over `byte_range_parse_limit`
/// specs when that is configured, in which case the length cap is waived),
/// and any grammar violation. The returned ranges are raw; adjustment against
/// the body length is the backend's business.
pub fn parse_range_header(headers: &HeaderMap, method: &Method, byte_range_parse_limit: Option<usize>) -> Vec<RawByteRange> {
    if method != Method::GET {
        return Vec::new();
    }
    let mut values = headers.get_all(header::RANGE).iter();
    let value = match (values.next(), values.next()) {
        (Some(value), None) => value.as_bytes(),
        (Some(_), Some(_)) => {
            debug!("multi-valued range header, ignoring");
            return Vec::new();
        }
        _ => return Vec::new(),
    };
    if byte_range_parse_limit.is_none() && value.len() > RANGE_HEADER_BYTE_CAP {
        debug!("range header value over {} bytes, ignoring", RANGE_HEADER_BYTE_CAP);
        return Vec::new();
    }
    let mut rest = match value.strip_prefix(b"bytes=") {
        Some(rest) => rest,
        None => return Vec::new(),
    };

    let mut ranges = Vec::new();
    loop {
        let spec = match read_byte_range_spec(&mut rest) {
            Some(spec) => spec,
            None => return Vec::new(),
        };
        ranges.push(spec);
        if let Some(limit) = byte_range_parse_limit {
            if ranges.len() > limit {
                debug!("range header carries more than {} specs, ignoring", limit);
                return Vec::new();
            }
        }
        match rest.split_first() {
            None => break,
            Some((b',', after)) if !after.is_empty() => rest = after,
            // trailing comma or stray bytes between specs
            Some(_) => return Vec::new(),
        }
    }
    ranges
}

fn read_byte_range_spec(rest: &mut &[u8]) -> Option<RawByteRange> {
    if let Some(after) = rest.strip_prefix(b"-") {
        // suffix-byte-range-spec
        let (run, consumed) = read_digits(after)?;
        let suffix_length = match run {
            DigitRun::Value(v) => v,
            DigitRun::Overflow => return None,
        };
        *rest = &after[consumed..];
        return Some(RawByteRange::suffix(suffix_length));
    }

    let (run, consumed) = read_digits(rest)?;
    let first = match run {
        DigitRun::Value(v) => v,
        DigitRun::Overflow => return None,
    };
    if first == u64::MAX {
        // the sentinel is reserved for suffix ranges
        return None;
    }
    let after = rest[consumed..].strip_prefix(b"-")?;
    match read_digits(after) {
        Some((run, consumed)) => {
            let last = match run {
                DigitRun::Value(v) => v,
                DigitRun::Overflow => return None,
            };
            if first > last {
                return None;
            }
            *rest = &after[consumed..];
            Some(RawByteRange::new(first, last))
        }
        // open-ended "first-", everything from first to the end of the body
        None => {
            *rest = after;
            Some(RawByteRange::new(first, u64::MAX))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn parse(value: &str) -> Vec<RawByteRange> {
        parse_with(value, &Method::GET, None)
    }

    fn parse_with(value: &str, method: &Method, limit: Option<usize>) -> Vec<RawByteRange> {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        parse_range_header(&headers, method, limit)
    }

    #[test]
    fn single_range() {
        assert_eq!(parse("bytes=1-2"), vec![RawByteRange::new(1, 2)]);
    }

    #[test]
    fn suffix_range() {
        assert_eq!(parse("bytes=-500"), vec![RawByteRange::suffix(500)]);
    }

    #[test]
    fn open_ended_range() {
        assert_eq!(parse("bytes=500-"), vec![RawByteRange::new(500, u64::MAX)]);
    }

    #[test]
    fn several_ranges() {
        assert_eq!(
            parse("bytes=10-20,30-40,50-50,-1"),
            vec![
                RawByteRange::new(10, 20),
                RawByteRange::new(30, 40),
                RawByteRange::new(50, 50),
                RawByteRange::suffix(1),
            ]
        );
    }

    #[test]
    fn extreme_positions() {
        assert_eq!(
            parse("bytes=18446744073709551614-18446744073709551615"),
            vec![RawByteRange::new(u64::MAX - 1, u64::MAX)]
        );
        // a literal first byte of u64::MAX collides with the suffix sentinel
        assert_eq!(parse("bytes=18446744073709551615-18446744073709551616"), vec![]);
        assert_eq!(parse("bytes=18446744073709551615-"), vec![]);
        // overflow anywhere rejects
        assert_eq!(parse("bytes=0-18446744073709551616"), vec![]);
        assert_eq!(parse("bytes=-18446744073709551616"), vec![]);
    }

    #[test]
    fn malformed_specs() {
        assert_eq!(parse("bytes=1-2,3-4,a"), vec![]);
        assert_eq!(parse("bytes=1-2-3"), vec![]);
        assert_eq!(parse("bytes=a-"), vec![]);
        assert_eq!(parse("bytes=--2"), vec![]);
        assert_eq!(parse("bytes=2--"), vec![]);
        assert_eq!(parse("bytes="), vec![]);
        assert_eq!(parse("bytes=2-1"), vec![]);
        assert_eq!(parse("bytes=1-2,"), vec![]);
        assert_eq!(parse("bytes=1-2, 3-4"), vec![]);
        assert_eq!(parse("bytes=1-2,,3-4"), vec![]);
        assert_eq!(parse("octets=1-2"), vec![]);
        assert_eq!(parse("1-2"), vec![]);
    }

    #[test]
    fn non_get_methods_are_ignored() {
        assert_eq!(parse_with("bytes=1-2", &Method::POST, None), vec![]);
        assert_eq!(parse_with("bytes=1-2", &Method::HEAD, None), vec![]);
    }

    #[test]
    fn multi_valued_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.append(header::RANGE, HeaderValue::from_static("bytes=1-2"));
        headers.append(header::RANGE, HeaderValue::from_static("bytes=3-4"));
        assert_eq!(parse_range_header(&headers, &Method::GET, None), vec![]);
    }

    #[test]
    fn length_cap_applies_without_a_spec_limit() {
        let long = format!("bytes=0-1{}", ",0-1".repeat(30));
        assert!(long.len() > 100);
        assert_eq!(parse(&long), vec![]);
        // an explicit spec limit waives the byte cap
        assert_eq!(parse_with(&long, &Method::GET, Some(40)).len(), 31);
        assert_eq!(parse_with(&long, &Method::GET, Some(10)), vec![]);
    }

    #[test]
    fn every_parsed_range_satisfies_the_suffix_invariant() {
        for value in ["bytes=1-2", "bytes=-500", "bytes=500-", "bytes=10-20,30-40,50-50,-1"] {
            for range in parse(value) {
                assert!(range.is_suffix() || range.first_byte() <= range.last_byte());
            }
        }
    }

    #[test]
    fn adjustment() {
        // suffix: trailing bytes, clamped to the whole body when longer
        assert_eq!(RawByteRange::suffix(2).adjust(3), Some(AdjustedRange::new(1, 2)));
        assert_eq!(RawByteRange::suffix(5).adjust(3), Some(AdjustedRange::new(0, 2)));
        assert_eq!(RawByteRange::suffix(0).adjust(3), None);
        // open-ended and overlong ranges clamp to the end of the body
        assert_eq!(RawByteRange::new(1, u64::MAX).adjust(3), Some(AdjustedRange::new(1, 2)));
        assert_eq!(RawByteRange::new(0, 10).adjust(3), Some(AdjustedRange::new(0, 2)));
        assert_eq!(RawByteRange::new(1, 2).adjust(3), Some(AdjustedRange::new(1, 2)));
        // first at or past the end is unsatisfiable
        assert_eq!(RawByteRange::new(3, 5).adjust(3), None);
        assert_eq!(RawByteRange::new(123, u64::MAX).adjust(3), None);
        // empty bodies satisfy nothing
        assert_eq!(RawByteRange::new(0, 0).adjust(0), None);
        assert_eq!(RawByteRange::suffix(1).adjust(0), None);
    }

    #[test]
    fn adjusted_ranges_stay_inside_the_body() {
        for value in ["bytes=1-2", "bytes=-500", "bytes=500-", "bytes=0-0"] {
            for range in parse(value) {
                for length in [1u64, 3, 100, 1000] {
                    if let Some(adjusted) = range.adjust(length) {
                        assert!(adjusted.last_byte() < length);
                        assert!(adjusted.first_byte() <= adjusted.last_byte());
                    }
                }
            }
        }
    }

    #[test]
    fn display() {
        assert_eq!(RawByteRange::new(1, 2).to_string(), "1-2");
        assert_eq!(RawByteRange::new(5, u64::MAX).to_string(), "5-");
        assert_eq!(RawByteRange::suffix(7).to_string(), "-7");
        assert_eq!(AdjustedRange::new(0, 9).to_string(), "0-9");
    }
}
