//! HTTP timestamp parsing per
//! [RFC 7231 §7.1.1.1](https://tools.ietf.org/html/rfc7231#section-7.1.1.1).
//!
//! Recipients must accept three formats, tried here in this order:
//!
//! ```text
//! Sun, 06 Nov 1994 08:49:37 GMT    ; IMF-fixdate
//! Sunday, 06-Nov-94 08:49:37 GMT   ; obsolete RFC 850 format
//! Sun Nov  6 08:49:37 1994         ; ANSI C asctime() format
//! ```
//!
//! A format only matches when it consumes the entire value. Anything else is
//! the null time, expressed as `None`.

use http::HeaderValue;
use std::time::SystemTime;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime};

const IMF_FIXDATE: &[FormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");
const RFC_850: &[FormatItem<'static>] =
    format_description!("[weekday], [day]-[month repr:short]-[year] [hour]:[minute]:[second] GMT");
const ASCTIME: &[FormatItem<'static>] =
    format_description!("[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]");

/// Parses an HTTP date header value into an absolute timestamp.
///
/// `None` in (missing header) or any unparseable value is the null time,
/// `None` out.
pub fn http_time(value: Option<&HeaderValue>) -> Option<SystemTime> {
    let input = value?.to_str().ok()?;
    PrimitiveDateTime::parse(input, &IMF_FIXDATE)
        .ok()
        .or_else(|| parse_rfc_850(input))
        .or_else(|| PrimitiveDateTime::parse(input, &ASCTIME).ok())
        .map(|datetime| SystemTime::from(datetime.assume_utc()))
}

/// Renders a timestamp as IMF-fixdate, the format senders must generate.
pub fn format_http_time(time: SystemTime) -> String {
    OffsetDateTime::from(time).format(&IMF_FIXDATE).unwrap_or_default()
}

/// The RFC 850 format carries a two digit year, which `time` cannot expand on
/// its own. The conventional pivot applies: 00-69 land in the 2000s, 70-99 in
/// the 1900s. The year is widened before handing the string over.
fn parse_rfc_850(input: &str) -> Option<PrimitiveDateTime> {
    let (weekday, rest) = input.split_once(", ")?;
    let (date, clock) = rest.split_once(' ')?;
    let mut segments = date.splitn(3, '-');
    let (day, month, year) = (segments.next()?, segments.next()?, segments.next()?);
    if year.len() != 2 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: u16 = year.parse().ok()?;
    let century = if year < 70 { 2000 } else { 1900 };
    let widened = format!("{weekday}, {day}-{month}-{} {clock}", century + year);
    PrimitiveDateTime::parse(&widened, &RFC_850).ok()
}
