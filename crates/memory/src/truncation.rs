/// Marker appended to text cut by [`truncate_chars`].
pub const TRUNCATED_MARKER: &str = " [TRUNCATED]";

/// Largest char boundary `<= index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Cap `content` at `max_bytes` (on a UTF-8 boundary) and mark the cut.
pub fn truncate_chars(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let boundary = floor_char_boundary(content, max_bytes);
    let mut out = content[..boundary].to_string();
    out.push_str(TRUNCATED_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn long_text_is_cut_and_marked() {
        let out = truncate_chars("abcdefghij", 4);
        assert_eq!(out, "abcd [TRUNCATED]");
    }

    #[test]
    fn never_splits_a_code_point() {
        // 'é' is two bytes; cutting at 1 must back off to 0.
        let out = truncate_chars("éa", 1);
        assert_eq!(out, " [TRUNCATED]");
        let out = truncate_chars("aéb", 2);
        assert_eq!(out, "a [TRUNCATED]");
    }
}
