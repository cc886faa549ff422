//! Byte-preserving text view over raw chunk bytes.
//!
//! Backups mix single-byte text, UTF-16LE text and binary page structures in
//! the same file. Decoding up front with a multi-byte aware decoder would
//! mangle exactly the bytes the detectors need, so every byte is treated as
//! one code unit of the same value (a Latin-1 view). Detectors search the
//! bytes directly with Unicode-disabled regexes, which is the same search
//! over the same view, and text is only materialized for accepted findings.

/// A lossless one-unit-per-byte view of a byte slice
#[derive(Debug, Clone, Copy)]
pub struct ByteText<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteText<'a> {
    /// Wraps the given bytes
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// The underlying bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Length in code units, which equals the length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the view is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Maps each byte to the char of the same value. Never fails.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Removes null bytes, undoing UTF-16LE interleaving for Latin text
pub fn strip_nulls(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|&b| b != 0).collect()
}

/// Find a subsequence within a byte slice
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Returns true if `needle` occurs anywhere in `haystack`
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find_subsequence(haystack, needle).is_some()
}

/// Replaces bytes outside printable ASCII with `.`
pub fn sanitize_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if (0x20..=0x7E).contains(&b) {
                char::from(b)
            } else {
                '.'
            }
        })
        .collect()
}

/// Builds a single-line excerpt of at most `max_chars` characters.
///
/// Whitespace runs collapse to one space and other control bytes become `.`.
pub fn preview(bytes: &[u8], max_chars: usize) -> String {
    let mut out = String::with_capacity(max_chars.min(bytes.len()));
    let mut count = 0;
    let mut last_space = false;

    for &b in bytes {
        if count >= max_chars {
            break;
        }
        let c = match b {
            b' ' | b'\t' | b'\r' | b'\n' | 0x0B | 0x0C => {
                if last_space {
                    continue;
                }
                last_space = true;
                ' '
            }
            0x00..=0x1F | 0x7F => {
                last_space = false;
                '.'
            }
            _ => {
                last_space = false;
                char::from(b)
            }
        };
        out.push(c);
        count += 1;
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_is_lossless() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = decode(&bytes);
        assert_eq!(text.chars().count(), 256);
        let back: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_strip_nulls_utf16() {
        let utf16: Vec<u8> = "CREATE".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(strip_nulls(&utf16), b"CREATE".to_vec());
    }

    #[test]
    fn test_find_subsequence() {
        let data = b"hello.CREATE.world";
        assert_eq!(find_subsequence(data, b"CREATE"), Some(6));
        assert_eq!(find_subsequence(data, b"world"), Some(13));
        assert_eq!(find_subsequence(data, b"missing"), None);
        assert!(contains(data, b"hello"));
    }

    #[test]
    fn test_sanitize_ascii() {
        assert_eq!(sanitize_ascii(b"TAPE\x00\x01\xffok"), "TAPE...ok");
    }

    #[test]
    fn test_preview_collapses_whitespace() {
        assert_eq!(preview(b"CREATE\r\n\t  VIEW\x01v", 100), "CREATE VIEW.v");
        assert_eq!(preview(b"abcdef", 3), "abc");
    }

    #[test]
    fn test_view_len() {
        let view = ByteText::new(b"\x00\xff");
        assert_eq!(view.len(), 2);
        assert!(!view.is_empty());
        assert_eq!(decode(view.as_bytes()), "\u{0}\u{ff}");
    }
}
