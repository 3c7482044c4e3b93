use std::time::SystemTime;

/// Outcome of reading a run of decimal digits as an unsigned 64-bit integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DigitRun {
    Value(u64),
    /// The run was well-formed but does not fit in 64 bits
    Overflow,
}

/// Reads the leading decimal digit run of `input`.
///
/// Returns the parsed run and the number of bytes consumed, or `None` when
/// `input` does not start with a digit. Overflow is reported rather than
/// wrapped; the caller decides whether a saturating interpretation applies.
/// Shared by the Cache-Control and Range parsers.
pub(crate) fn read_digits(input: &[u8]) -> Option<(DigitRun, usize)> {
    let mut value: u64 = 0;
    let mut overflow = false;
    let mut len = 0;
    for &b in input {
        if !b.is_ascii_digit() {
            break;
        }
        len += 1;
        if !overflow {
            match value.checked_mul(10).and_then(|v| v.checked_add(u64::from(b - b'0'))) {
                Some(v) => value = v,
                None => overflow = true,
            }
        }
    }
    if len == 0 {
        return None;
    }
    let run = if overflow { DigitRun::Overflow } else { DigitRun::Value(value) };
    Some((run, len))
}

/// Time source injected into the filter.
///
/// Everything that needs "now" (freshness decisions, `Age` computation,
/// response-time stamping) reads it through this trait so tests can pin the
/// clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The process wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_plain_run() {
        assert_eq!(read_digits(b"3600, public"), Some((DigitRun::Value(3600), 4)));
        assert_eq!(read_digits(b"0"), Some((DigitRun::Value(0), 1)));
    }

    #[test]
    fn no_leading_digit() {
        assert_eq!(read_digits(b""), None);
        assert_eq!(read_digits(b"-1"), None);
        assert_eq!(read_digits(b"x12"), None);
    }

    #[test]
    fn max_and_overflow() {
        assert_eq!(read_digits(b"18446744073709551615"), Some((DigitRun::Value(u64::MAX), 20)));
        assert_eq!(read_digits(b"18446744073709551616"), Some((DigitRun::Overflow, 20)));
        assert_eq!(read_digits(b"99999999999999999999999z"), Some((DigitRun::Overflow, 23)));
    }
}
