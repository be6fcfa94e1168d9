//! ASCII decimal counters shared by the store adapters.

use bytes::Bytes;

/// Direction of a numeric mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Direction {
    /// Adds the delta, wrapping at `u64::MAX`.
    #[display("incr")]
    Increment,
    /// Subtracts the delta, stopping at zero.
    #[display("decr")]
    Decrement,
}

impl Direction {
    /// Applies `delta` to `current` in this direction.
    pub fn apply(self, current: u64, delta: u64) -> u64 {
        match self {
            Self::Increment => current.wrapping_add(delta),
            Self::Decrement => current.saturating_sub(delta),
        }
    }
}

/// Parses a stored counter.
pub(crate) fn parse(bytes: &[u8]) -> Result<u64, String> {
    std::str::from_utf8(bytes)
        .ok()
        .map(str::trim)
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| "cannot increment or decrement non-numeric value".to_string())
}

/// Formats a counter the way it is stored.
pub(crate) fn format(value: u64) -> Bytes {
    Bytes::from(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_wraps() {
        assert_eq!(Direction::Increment.apply(100, 5), 105);
        assert_eq!(Direction::Increment.apply(u64::MAX, 2), 1);
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        assert_eq!(Direction::Decrement.apply(10, 3), 7);
        assert_eq!(Direction::Decrement.apply(3, 10), 0);
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse(b"42"), Ok(42));
        assert_eq!(parse(b"42 "), Ok(42));
        assert!(parse(b"\"text\"").is_err());
        assert!(parse(b"-1").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format(105), Bytes::from_static(b"105"));
    }
}
