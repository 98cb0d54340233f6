//! Incremental STOMP frame parser.
//!
//! [`parse_frame_slice`] inspects a byte buffer and either produces one
//! complete wire item plus the number of bytes it consumed, reports that
//! more bytes are needed, or fails on a protocol violation. The caller owns
//! the buffer and advances it by the consumed count, so parsing works across
//! arbitrary read-chunk boundaries.

use crate::codec::unescape_header_value;
use crate::frame::Frame;

/// One decoded unit from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireItem {
    /// An empty line: CR, LF, or CRLF.
    Heartbeat,
    /// A complete frame with command, headers, and body.
    Frame(Frame),
}

/// Parse one wire item from the front of `input`.
///
/// Returns `Ok(Some((item, consumed)))` for a complete item, `Ok(None)` when
/// more bytes are required, and `Err` on malformed input (bad UTF-8, invalid
/// escapes, invalid `content-length`, missing NULL terminator).
///
/// Bytes between frames are not skipped here: every empty line decodes as
/// its own [`WireItem::Heartbeat`], which the dispatch loop counts as
/// liveness and moves past.
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<(WireItem, usize)>, String> {
    if input.is_empty() {
        return Ok(None);
    }

    // Empty line: LF, CRLF, or a CR on its own.
    match input[0] {
        b'\n' => return Ok(Some((WireItem::Heartbeat, 1))),
        b'\r' => {
            if input.len() == 1 {
                // could be the first half of CRLF
                return Ok(None);
            }
            let consumed = if input[1] == b'\n' { 2 } else { 1 };
            return Ok(Some((WireItem::Heartbeat, consumed)));
        }
        _ => {}
    }

    // Command line.
    let (command_line, mut pos) = match split_line(input, 0) {
        Some(v) => v,
        None => return Ok(None),
    };
    let command = String::from_utf8(command_line.to_vec())
        .map_err(|e| format!("invalid utf8 in command: {}", e))?;

    // Header lines, until a blank line or a line without a colon.
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut content_length: Option<usize> = None;
    loop {
        let (line, next) = match split_line(input, pos) {
            Some(v) => v,
            None => return Ok(None),
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        let colon = match line.iter().position(|&b| b == b':') {
            Some(c) => c,
            // A line without a colon ends the header block.
            None => break,
        };
        let name = decode_header_part(&line[..colon], "header name")?;
        let value = decode_header_part(&line[colon + 1..], "header value")?;
        if content_length.is_none() && name.eq_ignore_ascii_case("content-length") {
            content_length = Some(parse_content_length(&value)?);
        }
        headers.push((name, value));
    }

    // Body: exact read when content-length is known, NULL scan otherwise.
    let (body, consumed) = match content_length {
        Some(len) => {
            if pos + len + 1 > input.len() {
                return Ok(None);
            }
            if input[pos + len] != 0 {
                return Err("missing NULL terminator after content-length body".to_string());
            }
            (input[pos..pos + len].to_vec(), pos + len + 1)
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(rel) => (input[pos..pos + rel].to_vec(), pos + rel + 1),
            None => return Ok(None),
        },
    };

    let frame = Frame {
        command,
        headers,
        body,
    };
    Ok(Some((WireItem::Frame(frame), consumed)))
}

/// Slice one LF-terminated line starting at `pos`, stripping the terminator
/// and any trailing CR. Returns the line and the position after it.
fn split_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rel = input[pos..].iter().position(|&b| b == b'\n')?;
    let mut line = &input[pos..pos + rel];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    Some((line, pos + rel + 1))
}

fn decode_header_part(raw: &[u8], what: &str) -> Result<String, String> {
    let unescaped =
        unescape_header_value(raw).map_err(|e| format!("invalid escape in {}: {}", what, e))?;
    String::from_utf8(unescaped).map_err(|e| format!("invalid utf8 in {}: {}", what, e))
}

fn parse_content_length(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("empty content-length".to_string());
    }
    trimmed
        .parse::<usize>()
        .map_err(|e| format!("invalid content-length '{}': {}", trimmed, e))
}
