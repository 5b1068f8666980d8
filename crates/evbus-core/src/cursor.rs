//! Cursor codec.
//!
//! A cursor is an event-id watermark rendered as a decimal string. Callers
//! treat it as opaque; anything that does not decode to a positive id means
//! "start of history".

/// Render an event id as a cursor.
pub fn encode_cursor(event_id: i64) -> String {
    event_id.to_string()
}

/// Decode a cursor into an event id.
///
/// Returns `None` for unparsable, zero, or negative input.
pub fn decode_cursor(cursor: &str) -> Option<i64> {
    cursor.trim().parse::<i64>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_decimal() {
        assert_eq!(encode_cursor(42), "42");
    }

    #[test]
    fn decode_valid() {
        assert_eq!(decode_cursor("42"), Some(42));
        assert_eq!(decode_cursor(" 7 "), Some(7));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_cursor(""), None);
        assert_eq!(decode_cursor("abc"), None);
        assert_eq!(decode_cursor("12abc"), None);
        assert_eq!(decode_cursor("1.5"), None);
    }

    #[test]
    fn decode_rejects_non_positive() {
        assert_eq!(decode_cursor("0"), None);
        assert_eq!(decode_cursor("-3"), None);
    }

    #[test]
    fn decode_inverts_encode() {
        for id in [1, 9, 10, 1_000_000, i64::MAX] {
            assert_eq!(decode_cursor(&encode_cursor(id)), Some(id));
        }
    }
}
