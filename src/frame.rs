use std::fmt;

/// One STOMP frame: command, ordered headers, raw body bytes.
///
/// Inbound frames preserve header order and case as received; lookups via
/// [`Frame::get_header`] are case-insensitive and return the first
/// occurrence. Heartbeats are represented by the [`HEARTBEAT`] pseudo-command
/// with no headers and no body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, MESSAGE).
    pub command: String,
    /// Ordered headers as (name, value) pairs, escape-decoded.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes, possibly empty.
    pub body: Vec<u8>,
}

/// Pseudo-command used for zero-content liveness frames.
pub const HEARTBEAT: &str = "HEARTBEAT";

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header by name, case-insensitively.
    ///
    /// Returns the first matching value, which is the one that wins when the
    /// broker repeats a header name.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True for the zero-content liveness frame.
    pub fn is_heartbeat(&self) -> bool {
        self.command == HEARTBEAT
    }

    /// The body interpreted as UTF-8, lossily.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_first_wins() {
        let f = Frame::new("MESSAGE")
            .header("Content-Type", "text/plain")
            .header("content-type", "application/json");
        assert_eq!(f.get_header("content-type"), Some("text/plain"));
        assert_eq!(f.get_header("CONTENT-TYPE"), Some("text/plain"));
        // iteration still sees both, in order, with original case
        assert_eq!(f.headers[0].0, "Content-Type");
        assert_eq!(f.headers[1].0, "content-type");
    }

    #[test]
    fn display_shows_command_and_body_size() {
        let f = Frame::new("SEND").set_body(b"hello".to_vec());
        let s = format!("{}", f);
        assert!(s.contains("SEND"));
        assert!(s.contains("Body (5 bytes)"));
    }
}
