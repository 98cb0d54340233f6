use std::io;
use thiserror::Error;

/// Errors surfaced by [`Client`](crate::client::Client) operations.
///
/// None of these are retried internally; every error propagates to the
/// caller of the public operation (or of the dispatch loop) that triggered
/// it.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The operation requires an open session.
    #[error("not connected")]
    NotConnected,
    /// The connection URI is not a valid `stomp` / `stomp+ssl` URI.
    #[error("unsupported URI scheme: {0}")]
    BadScheme(String),
    /// An ack mode other than `auto`, `client`, or `client-individual`.
    #[error("invalid ack mode: {0}")]
    BadAckMode(String),
    /// The broker violated the protocol: an ERROR frame reached the default
    /// error handler, a frame other than CONNECTED answered CONNECT, or an
    /// inbound frame was malformed.
    #[error("protocol error: {message}")]
    Protocol {
        /// The broker's `message` header, or a description of the violation.
        message: String,
        /// The ERROR frame payload with trailing newlines stripped, if any.
        body: Option<String>,
    },
    /// The heartbeat watchdog fired with no traffic from the server.
    #[error("server heartbeat missed (last activity at {last_activity_ms} ms since epoch)")]
    HeartbeatTimeout {
        /// Wall-clock milliseconds of the last observed inbound activity.
        last_activity_ms: u64,
    },
    /// The underlying byte stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}
