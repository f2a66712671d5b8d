use crate::constants::buffers::MAX_ERROR_MESSAGE_BYTES;

pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Bounds error text before it is stored or returned.
pub fn clip_message(value: &str) -> String {
    truncate_utf8_prefix(value.trim(), MAX_ERROR_MESSAGE_BYTES)
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
pub fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{clip_message, encode_component, truncate_utf8_prefix};

    #[test]
    fn truncate_utf8_prefix_handles_ascii() {
        assert_eq!(truncate_utf8_prefix("hello", 3), "hel");
    }

    #[test]
    fn truncate_utf8_prefix_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 2), "a");
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 5), "a\u{1F600}");
    }

    #[test]
    fn clip_message_bounds_length() {
        assert_eq!(clip_message(&"x".repeat(5000)).len(), 1024);
    }

    #[test]
    fn encode_component_escapes_reserved_bytes() {
        assert_eq!(encode_component("Paris"), "Paris");
        assert_eq!(encode_component("a b/c?d"), "a%20b%2Fc%3Fd");
        assert_eq!(encode_component("é"), "%C3%A9");
    }
}
