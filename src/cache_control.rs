//! `Cache-Control` directive parsing, following the grammar of
//! [RFC 7234 §5.2](https://tools.ietf.org/html/rfc7234#section-5.2):
//!
//! ```text
//! Cache-Control   = 1#cache-directive
//! cache-directive = token [ "=" ( token / quoted-string ) ]
//! ```
//!
//! with `token` / `tchar` as in
//! [RFC 7230 §3.2.6](https://tools.ietf.org/html/rfc7230#section-3.2.6).
//!
//! The crate does not keep a full directive map around; freshness boils down
//! to one effective lifetime ([`effective_max_age`]) plus two yes/no questions
//! ([`response_is_storable`], [`request_forces_validation`]). Anything the
//! walker cannot make sense of yields the conservative answer: a zero
//! lifetime, i.e. "validate before reuse".

use crate::utils::{read_digits, DigitRun};
use http::{header, HeaderMap};
use std::time::Duration;

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
        )
}

fn is_ows(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// A directive argument; only token arguments carry a value the parsers read.
enum Argument<'a> {
    Token(&'a [u8]),
    Quoted,
}

/// Walks `token [ "=" ( token / quoted-string ) ]` elements of a comma
/// separated list. Empty elements are skipped; any grammar violation flips
/// `malformed` and ends the iteration.
struct Directives<'a> {
    rest: &'a [u8],
    malformed: bool,
}

impl<'a> Directives<'a> {
    fn new(value: &'a [u8]) -> Self {
        Directives { rest: value, malformed: false }
    }

    fn fail(&mut self) -> Option<(&'a [u8], Option<Argument<'a>>)> {
        self.malformed = true;
        None
    }
}

impl<'a> Iterator for Directives<'a> {
    type Item = (&'a [u8], Option<Argument<'a>>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.malformed {
            return None;
        }
        while let Some((&b, rest)) = self.rest.split_first() {
            if is_ows(b) || b == b',' {
                self.rest = rest;
            } else {
                break;
            }
        }
        if self.rest.is_empty() {
            return None;
        }

        let name_len = self.rest.iter().take_while(|&&b| is_tchar(b)).count();
        if name_len == 0 {
            // directive starting with a non-tchar byte
            return self.fail();
        }
        let (name, mut rest) = self.rest.split_at(name_len);

        let mut argument = None;
        if let Some(r) = rest.strip_prefix(b"=") {
            if let Some(q) = r.strip_prefix(b"\"") {
                // quoted-string, with backslash quoted-pairs
                let mut i = 0;
                loop {
                    match q.get(i) {
                        Some(b'"') => break,
                        Some(b'\\') => i += 2,
                        Some(_) => i += 1,
                        None => return self.fail(),
                    }
                }
                argument = Some(Argument::Quoted);
                rest = &q[i + 1..];
            } else {
                let arg_len = r.iter().take_while(|&&b| is_tchar(b)).count();
                if arg_len == 0 {
                    return self.fail();
                }
                argument = Some(Argument::Token(&r[..arg_len]));
                rest = &r[arg_len..];
            }
        }

        // a directive ends at optional whitespace followed by a comma or the
        // end of input; anything else poisons the whole header value
        let tail_ws = rest.iter().take_while(|&&b| is_ows(b)).count();
        match rest.get(tail_ws) {
            None | Some(b',') => {}
            Some(_) => return self.fail(),
        }
        self.rest = &rest[tail_ws..];
        Some((name, argument))
    }
}

/// Reads a `delta-seconds` argument of `max-age` / `s-maxage`.
///
/// Values past `i64::MAX` seconds, including runs that overflow 64 bits
/// entirely, saturate to [`Duration::MAX`]. A missing, quoted, or
/// non-numeric argument is invalid and yields `None`.
fn delta_seconds(argument: Option<Argument<'_>>) -> Option<Duration> {
    let token = match argument {
        Some(Argument::Token(t)) => t,
        _ => return None,
    };
    let (run, consumed) = read_digits(token)?;
    if consumed != token.len() {
        // unexpected bytes after the digit run, e.g. "max-age=100z"
        return None;
    }
    match run {
        DigitRun::Overflow => Some(Duration::MAX),
        DigitRun::Value(v) if v > i64::MAX as u64 => Some(Duration::MAX),
        DigitRun::Value(v) => Some(Duration::from_secs(v)),
    }
}

/// Computes the effective freshness lifetime of a `Cache-Control` value.
///
/// `no-cache` (as a complete directive name) and every malformed input yield
/// [`Duration::ZERO`], meaning "validation required". `s-maxage` is sticky:
/// once observed, later `max-age` directives are ignored.
pub fn effective_max_age(value: &[u8]) -> Duration {
    let mut lifetime = Duration::ZERO;
    let mut s_maxage_seen = false;
    let mut directives = Directives::new(value);
    for (name, argument) in directives.by_ref() {
        match name {
            b"no-cache" => return Duration::ZERO,
            b"s-maxage" => match delta_seconds(argument) {
                Some(secs) => {
                    lifetime = secs;
                    s_maxage_seen = true;
                }
                None => return Duration::ZERO,
            },
            b"max-age" => match delta_seconds(argument) {
                Some(secs) => {
                    if !s_maxage_seen {
                        lifetime = secs;
                    }
                }
                None => return Duration::ZERO,
            },
            _ => {}
        }
    }
    if directives.malformed {
        debug!("malformed cache-control value, treating as requiring validation");
        return Duration::ZERO;
    }
    lifetime
}

/// Effective freshness lifetime of a response, folding every `Cache-Control`
/// header the response carries into one list before parsing.
pub fn response_effective_max_age(headers: &HeaderMap) -> Duration {
    effective_max_age(&joined_cache_control(headers))
}

/// Whether a response may be stored at all: false when `Cache-Control`
/// contains `no-store` or `private`, or cannot be parsed.
pub fn response_is_storable(headers: &HeaderMap) -> bool {
    let joined = joined_cache_control(headers);
    let mut directives = Directives::new(&joined);
    for (name, _) in directives.by_ref() {
        if name == b"no-store" || name == b"private" {
            return false;
        }
    }
    !directives.malformed
}

/// Whether a request insists on revalidation of a fresh entry, i.e. carries a
/// `Cache-Control` whose effective lifetime is zero (`no-cache`,
/// `max-age=0`). A request without the header never forces validation.
pub fn request_forces_validation(headers: &HeaderMap) -> bool {
    match headers.get(header::CACHE_CONTROL) {
        Some(value) => effective_max_age(value.as_bytes()) == Duration::ZERO,
        None => false,
    }
}

fn joined_cache_control(headers: &HeaderMap) -> Vec<u8> {
    let mut joined = Vec::new();
    for value in headers.get_all(header::CACHE_CONTROL) {
        if !joined.is_empty() {
            joined.push(b',');
        }
        joined.extend_from_slice(value.as_bytes());
    }
    joined
}
