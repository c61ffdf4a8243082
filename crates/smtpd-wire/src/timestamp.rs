use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid timestamp {candidate:?}")]
pub struct TimestampParseError {
    pub(crate) candidate: String,
}

/// Parse the host's fractional-seconds-since-epoch timestamps, e.g.
/// `1576146008.006099`, into a wall-clock instant.
///
/// The integer part becomes the seconds, the fraction is rounded to
/// nanoseconds. The decomposition works on the decimal digits rather
/// than going through an `f64`, which would not have enough mantissa
/// for nanosecond precision at current epoch values.
pub fn parse_timestamp(candidate: &str) -> Result<DateTime<Utc>, TimestampParseError> {
    let error = || TimestampParseError {
        candidate: candidate.to_string(),
    };

    let (secs, frac) = match candidate.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (candidate, ""),
    };
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return Err(error());
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(error());
    }

    let mut seconds: i64 = secs.parse().map_err(|_| error())?;
    let mut nanos: u32 = 0;
    for (i, b) in frac.bytes().take(9).enumerate() {
        nanos += u32::from(b - b'0') * 10u32.pow(8 - i as u32);
    }
    // round up from the tenth fractional digit
    if frac.len() > 9 && frac.as_bytes()[9] >= b'5' {
        nanos += 1;
        if nanos == 1_000_000_000 {
            seconds += 1;
            nanos = 0;
        }
    }

    Utc.timestamp_opt(seconds, nanos).single().ok_or_else(error)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_seconds_and_nanos() {
        let ts = parse_timestamp("1576146008.006099").unwrap();
        assert_eq!(ts.timestamp(), 1576146008);
        assert_eq!(ts.timestamp_subsec_nanos(), 6_099_000);

        let ts = parse_timestamp("1576146008").unwrap();
        assert_eq!(ts.timestamp(), 1576146008);
        assert_eq!(ts.timestamp_subsec_nanos(), 0);

        let ts = parse_timestamp("0.5").unwrap();
        assert_eq!(ts.timestamp(), 0);
        assert_eq!(ts.timestamp_subsec_nanos(), 500_000_000);
    }

    #[test]
    fn no_precision_lost_below_nanoseconds() {
        let ts = parse_timestamp("1576146008.123456789").unwrap();
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_789);

        // the tenth digit rounds
        let ts = parse_timestamp("1576146008.1234567891").unwrap();
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_789);
        let ts = parse_timestamp("1576146008.1234567895").unwrap();
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_790);

        // rounding can carry into the seconds
        let ts = parse_timestamp("41.9999999995").unwrap();
        assert_eq!(ts.timestamp(), 42);
        assert_eq!(ts.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", ".", ".5", "abc", "12a.4", "1.2.3", "-4.0", "1.-2", "1e9"] {
            assert!(parse_timestamp(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
