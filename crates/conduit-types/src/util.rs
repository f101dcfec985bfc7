//! String helpers for display previews.

use std::borrow::Cow;

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..end]
}

/// Like [`truncate_str`], but marks a cut with the number of bytes dropped.
pub fn preview(s: &str, max_bytes: usize) -> Cow<'_, str> {
    let head = truncate_str(s, max_bytes);
    if head.len() == s.len() {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{head}… [{} more bytes]", s.len() - head.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_untouched() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
        assert_eq!(truncate_str("", 5), "");
    }

    #[test]
    fn ascii_cut() {
        assert_eq!(truncate_str("hello world", 5), "hello");
        assert_eq!(truncate_str("hello", 0), "");
    }

    #[test]
    fn never_splits_multibyte_chars() {
        // 4-byte emoji, 3-byte CJK, 2-byte accented letter
        assert_eq!(truncate_str("\u{1F600}\u{1F601}", 6), "\u{1F600}");
        assert_eq!(truncate_str("\u{4e16}\u{754c}", 5), "\u{4e16}");
        assert_eq!(truncate_str("caf\u{e9}", 4), "caf");
        assert_eq!(truncate_str("\u{1F600}", 3), "");
    }

    #[test]
    fn preview_borrows_when_short() {
        assert!(matches!(preview("ok", 10), Cow::Borrowed("ok")));
    }

    #[test]
    fn preview_reports_dropped_bytes() {
        assert_eq!(preview("abcdefgh", 3), "abc… [5 more bytes]");
    }
}
