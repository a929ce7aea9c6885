//! Receive-buffer helpers shared by the parsers
//!
//! Every byte removed from the buffer goes through these functions so the
//! `rx_bytes` counter always equals the number of bytes drained.

use crate::metrics::StatsSink;
use bytes::{Buf, BytesMut};
use memchr::memmem;
use std::str::FromStr;

/// Find `pattern` in `buf`
#[inline]
pub(crate) fn find(buf: &[u8], pattern: &[u8]) -> Option<usize> {
    memmem::find(buf, pattern)
}

/// Remove one CRLF-terminated line, returning it without the terminator
pub(crate) fn take_line(input: &mut BytesMut, stats: &dyn StatsSink) -> Option<BytesMut> {
    let pos = find(input, b"\r\n")?;
    let mut line = input.split_to(pos + 2);
    stats.add_rx_bytes((pos + 2) as u64);
    line.truncate(pos);
    Some(line)
}

/// Drain exactly `n` bytes
#[inline]
pub(crate) fn drain(input: &mut BytesMut, n: usize, stats: &dyn StatsSink) {
    input.advance(n);
    stats.add_rx_bytes(n as u64);
}

/// Drain everything except the last `keep` bytes
pub(crate) fn drain_keeping(input: &mut BytesMut, keep: usize, stats: &dyn StatsSink) {
    let n = input.len().saturating_sub(keep);
    if n > 0 {
        drain(input, n, stats);
    }
}

/// Parse an ASCII decimal field, ignoring surrounding whitespace
pub(crate) fn parse_decimal<T: FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Lossy rendering of wire bytes for error messages
pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ConnectionStats;

    #[test]
    fn test_take_line() {
        let stats = ConnectionStats::new();
        let mut buf = BytesMut::from(&b"END\r\nSTO"[..]);

        let line = take_line(&mut buf, &stats).unwrap();
        assert_eq!(&line[..], b"END");
        assert_eq!(&buf[..], b"STO");
        assert_eq!(stats.rx_bytes(), 5);

        assert!(take_line(&mut buf, &stats).is_none());
        assert_eq!(&buf[..], b"STO");
    }

    #[test]
    fn test_lone_cr_is_not_a_line_end() {
        let stats = ConnectionStats::new();
        let mut buf = BytesMut::from(&b"a\rb\r\n"[..]);
        let line = take_line(&mut buf, &stats).unwrap();
        assert_eq!(&line[..], b"a\rb");
    }

    #[test]
    fn test_drain_keeping() {
        let stats = ConnectionStats::new();
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        drain_keeping(&mut buf, 4, &stats);
        assert_eq!(&buf[..], b"6789");
        assert_eq!(stats.rx_bytes(), 6);

        drain_keeping(&mut buf, 14, &stats);
        assert_eq!(&buf[..], b"6789");
        assert_eq!(stats.rx_bytes(), 6);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal::<usize>(b" 42 "), Some(42));
        assert_eq!(parse_decimal::<u32>(b"7"), Some(7));
        assert_eq!(parse_decimal::<u32>(b"x7"), None);
    }
}
