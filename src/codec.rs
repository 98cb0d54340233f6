use bytes::{BufMut, BytesMut};

use crate::frame::Frame;

/// Escape a STOMP 1.2 header value for wire transmission.
///
/// The escape set is:
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - backslash (0x5c) → `\\`
/// - colon (0x3a) → `\c`
///
/// Escaping is applied per character, so no sequence is ever double-escaped
/// regardless of input.
pub fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            '\\' => result.push_str("\\\\"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverse [`escape_header_value`] on raw header bytes from the wire.
///
/// Returns an error for an unknown escape sequence or a dangling backslash
/// at the end of the input; STOMP 1.2 treats both as fatal.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut result = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            result.push(b);
            continue;
        }
        match iter.next() {
            Some(b'r') => result.push(b'\r'),
            Some(b'n') => result.push(b'\n'),
            Some(b'\\') => result.push(b'\\'),
            Some(b'c') => result.push(b':'),
            Some(&other) => {
                return Err(format!("invalid escape sequence \\{}", other as char));
            }
            None => return Err("incomplete escape at end of value".to_string()),
        }
    }
    Ok(result)
}

/// Encode an outbound frame into `dst` in STOMP 1.2 wire form.
///
/// Lines are CRLF-terminated: the command, one `name:value` line per header
/// (values escape-encoded, names written as-is), and a blank line. A frame
/// that carries a `content-length` header is finished with its body bytes
/// and a single NULL. A bodyless frame is finished with NULL followed by one
/// more CRLF, which brokers accept as inter-frame whitespace.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.extend_from_slice(frame.command.as_bytes());
    dst.put_slice(b"\r\n");

    for (name, value) in &frame.headers {
        dst.extend_from_slice(name.as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(escape_header_value(value).as_bytes());
        dst.put_slice(b"\r\n");
    }

    dst.put_slice(b"\r\n");

    let has_content_length = frame
        .headers
        .iter()
        .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
    if has_content_length || !frame.body.is_empty() {
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
    } else {
        dst.put_u8(0);
        dst.put_slice(b"\r\n");
    }
}

/// Convenience wrapper returning the encoded bytes as a fresh buffer.
pub fn encode_frame_to_vec(frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_all_special_characters() {
        assert_eq!(escape_header_value("a\nb\rc\\d:e"), "a\\nb\\rc\\\\d\\ce");
    }

    #[test]
    fn escape_leaves_plain_values_alone() {
        assert_eq!(escape_header_value("/queue/test"), "/queue/test");
    }

    #[test]
    fn unescape_reverses_escape() {
        let original = "path\\to\\file\nkey:value\r\nend";
        let escaped = escape_header_value(original);
        let back = unescape_header_value(escaped.as_bytes()).unwrap();
        assert_eq!(back, original.as_bytes());
    }

    #[test]
    fn unescape_rejects_unknown_sequence() {
        let err = unescape_header_value(b"bad\\xescape").unwrap_err();
        assert!(err.contains("invalid escape"));
    }

    #[test]
    fn unescape_rejects_dangling_backslash() {
        let err = unescape_header_value(b"trailing\\").unwrap_err();
        assert!(err.contains("incomplete escape"));
    }

    #[test]
    fn bodyless_frame_finishes_with_nul_and_crlf() {
        let frame = Frame::new("BEGIN").header("transaction", "tx1");
        let bytes = encode_frame_to_vec(&frame);
        assert_eq!(bytes, b"BEGIN\r\ntransaction:tx1\r\n\r\n\0\r\n");
    }

    #[test]
    fn body_frame_finishes_with_nul_only() {
        let frame = Frame::new("SEND")
            .header("destination", "/q")
            .header("content-length", "5")
            .set_body(b"hello".to_vec());
        let bytes = encode_frame_to_vec(&frame);
        assert_eq!(
            bytes,
            b"SEND\r\ndestination:/q\r\ncontent-length:5\r\n\r\nhello\0"
        );
    }
}
