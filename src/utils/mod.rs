//! Utility modules for common functionality

pub mod retry;

pub use retry::{RetryConfig, RetryError, retry_with_check};

/// Truncate a string to at most `max_bytes` bytes, ensuring the cut lands on a
/// valid UTF-8 char boundary. Returns the longest prefix that fits.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_ascii() {
        assert_eq!(truncate_str("hola mundo", 4), "hola");
        assert_eq!(truncate_str("hola", 10), "hola");
    }

    #[test]
    fn test_truncate_str_multibyte_boundary() {
        // "ñ" is 2 bytes in UTF-8
        let s = "señal";
        assert_eq!(truncate_str(s, 2), "se");
        assert_eq!(truncate_str(s, 3), "se");
        assert_eq!(truncate_str(s, 4), "señ");
    }

    #[test]
    fn test_truncate_str_zero_and_empty() {
        assert_eq!(truncate_str("hello", 0), "");
        assert_eq!(truncate_str("", 5), "");
    }
}
