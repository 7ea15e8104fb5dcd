//! Incremental UTF-8 decoding of response chunks.

/// Decodes a byte stream chunk by chunk.
///
/// A multi-byte sequence split across two chunks is held back until the
/// rest arrives. Invalid bytes become U+FFFD. Carriage returns are stripped
/// from every decoded piece.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            rest = &rest[valid..];
                            break;
                        }
                    }
                }
            }
        }
        let leftover = rest.to_vec();
        self.pending = leftover;

        strip_cr(out)
    }

    /// Flush at end of stream. A dangling partial sequence decodes to U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

pub fn strip_cr(s: String) -> String {
    if s.contains('\r') {
        s.replace('\r', "")
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(b"hello "), "hello ");
        assert_eq!(d.decode(b"world"), "world");
        assert!(!d.has_pending());
    }

    #[test]
    fn split_two_byte_sequence() {
        let bytes = "café".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 1);
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(a), "caf");
        assert!(d.has_pending());
        assert_eq!(d.decode(b), "é");
        assert!(!d.has_pending());
    }

    #[test]
    fn three_byte_sequence_one_byte_at_a_time() {
        let mut d = Utf8ChunkDecoder::new();
        let mut out = String::new();
        for b in "€5".as_bytes() {
            out.push_str(&d.decode(&[*b]));
        }
        assert_eq!(out, "€5");
    }

    #[test]
    fn invalid_byte_is_replaced() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn carriage_returns_stripped() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(b"line one\r\nline two\r"), "line one\nline two");
    }

    #[test]
    fn finish_flushes_dangling_sequence() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&[0xE2, 0x82]), "");
        assert_eq!(d.finish(), "\u{FFFD}");
        assert_eq!(d.finish(), "");
    }
}
