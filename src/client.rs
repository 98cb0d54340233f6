//! The STOMP session: state, command emitter, and dispatch loop.
//!
//! A [`Client`] owns its byte stream exclusively and is not safe for
//! concurrent use; every operation assumes exclusive access. Outbound frames
//! are serialized in call order, inbound frames are delivered to handlers in
//! broker-emission order, and a handler completes before the next frame is
//! parsed.

use std::io;
use std::str::FromStr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::{debug, warn};

use crate::codec::encode_frame;
use crate::error::ClientError;
use crate::frame::{Frame, HEARTBEAT};
use crate::parser::{parse_frame_slice, WireItem};
use crate::transport::Transport;
use crate::uri::StompUri;

/// Bytes requested from the transport per read while assembling a frame.
const READ_CHUNK: usize = 8 * 1024;

/// Wiggle room added to the heartbeat interval before the watchdog fires.
const WATCHDOG_GRACE_MS: u64 = 1000;

/// Subscription acknowledgement modes defined by STOMP 1.2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The server considers a message delivered as soon as it is sent.
    #[default]
    Auto,
    /// Cumulative client acknowledgement.
    Client,
    /// Per-message client acknowledgement.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl FromStr for AckMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(ClientError::BadAckMode(other.to_string())),
        }
    }
}

/// Parse a STOMP `heart-beat` header value (format: "sx,sy").
///
/// Returns the two interval values in milliseconds; missing or invalid
/// fields default to 0.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let sx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let sy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (sx, sy)
}

/// Watchdog interval after the CONNECTED exchange.
///
/// With no `heart-beat` header from the server the configured interval
/// stands. A server header with a zero outgoing interval disables the
/// watchdog; otherwise the effective interval is the slower of the two
/// sides.
fn negotiated_watchdog_ms(configured_ms: u64, server_header: Option<&str>) -> u64 {
    match server_header {
        None => configured_ms,
        Some(header) => {
            let (server_out, _) = parse_heartbeat_header(header);
            if server_out == 0 || configured_ms == 0 {
                0
            } else {
                configured_ms.max(server_out)
            }
        }
    }
}

/// Handler for a dispatched frame. Receives the client, so it may invoke any
/// operation, including `disconnect`, `send`, `ack`, and `nack`.
pub type FrameHandler<T> = Box<dyn FnMut(&mut Client<T>, &Frame) -> Result<(), ClientError>>;
/// Handler for the missed-heartbeat event, which carries no frame.
pub type SessionHandler<T> = Box<dyn FnMut(&mut Client<T>) -> Result<(), ClientError>>;

struct Handlers<T: Transport> {
    connected: Option<FrameHandler<T>>,
    error: Option<FrameHandler<T>>,
    heartbeat: Option<FrameHandler<T>>,
    message: Option<FrameHandler<T>>,
    missed_heartbeat: Option<SessionHandler<T>>,
    receipt: Option<FrameHandler<T>>,
}

impl<T: Transport> Handlers<T> {
    fn new() -> Self {
        Self {
            connected: None,
            error: None,
            heartbeat: None,
            message: None,
            missed_heartbeat: None,
            receipt: None,
        }
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Connected,
    Heartbeat,
    Message,
    Receipt,
}

/// A blocking STOMP 1.2 client session over a [`Transport`].
pub struct Client<T: Transport> {
    transport: T,
    uri: StompUri,
    connected: bool,
    read_buf: BytesMut,
    last_activity_ms: u64,
    watchdog_ms: u64,
    subscriptions: Vec<String>,
    transactions: Vec<String>,
    server_headers: Vec<(String, String)>,
    handlers: Handlers<T>,
}

impl<T: Transport> Client<T> {
    /// Create a session over an already-open byte stream.
    ///
    /// For `stomp+ssl` URIs the stream must be TLS-wrapped by the caller
    /// before it is handed over.
    pub fn new(transport: T, uri: StompUri) -> Self {
        let watchdog_ms = uri.heartbeat_secs.saturating_mul(1000);
        Self {
            transport,
            uri,
            connected: false,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            last_activity_ms: 0,
            watchdog_ms,
            subscriptions: Vec::new(),
            transactions: Vec::new(),
            server_headers: Vec::new(),
            handlers: Handlers::new(),
        }
    }

    /// True between a received CONNECTED frame and a terminal close.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The parsed connection URI this session was built from.
    pub fn uri(&self) -> &StompUri {
        &self.uri
    }

    /// Server metadata captured from the CONNECTED frame, in header order.
    pub fn server_headers(&self) -> &[(String, String)] {
        &self.server_headers
    }

    /// Look up one server metadata header, case-insensitively.
    pub fn server_header(&self, name: &str) -> Option<&str> {
        self.server_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Subscribed destinations by subscription id; tombstoned slots are
    /// empty strings.
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Currently open transaction identifiers, in begin order.
    pub fn transactions(&self) -> &[String] {
        &self.transactions
    }

    /// Wall-clock milliseconds of the last inbound read attempt.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// Effective watchdog interval in milliseconds after negotiation;
    /// 0 when heartbeats are off.
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.watchdog_ms
    }

    // ------------------------------------------------------------------
    // Handler registration
    // ------------------------------------------------------------------

    /// Called once the CONNECTED frame has been processed.
    pub fn on_connected(
        &mut self,
        handler: impl FnMut(&mut Client<T>, &Frame) -> Result<(), ClientError> + 'static,
    ) {
        self.handlers.connected = Some(Box::new(handler));
    }

    /// Called for ERROR frames. When absent, the built-in behavior closes
    /// the stream, marks the session disconnected, and raises
    /// [`ClientError::Protocol`].
    pub fn on_error(
        &mut self,
        handler: impl FnMut(&mut Client<T>, &Frame) -> Result<(), ClientError> + 'static,
    ) {
        self.handlers.error = Some(Box::new(handler));
    }

    /// Called for each heartbeat frame.
    pub fn on_heartbeat(
        &mut self,
        handler: impl FnMut(&mut Client<T>, &Frame) -> Result<(), ClientError> + 'static,
    ) {
        self.handlers.heartbeat = Some(Box::new(handler));
    }

    /// Called for MESSAGE frames.
    pub fn on_message(
        &mut self,
        handler: impl FnMut(&mut Client<T>, &Frame) -> Result<(), ClientError> + 'static,
    ) {
        self.handlers.message = Some(Box::new(handler));
    }

    /// Called when the heartbeat watchdog fires. When absent, the built-in
    /// behavior closes the stream, marks the session disconnected, and
    /// raises [`ClientError::HeartbeatTimeout`].
    pub fn on_missed_heartbeat(
        &mut self,
        handler: impl FnMut(&mut Client<T>) -> Result<(), ClientError> + 'static,
    ) {
        self.handlers.missed_heartbeat = Some(Box::new(handler));
    }

    /// Called for RECEIPT frames.
    pub fn on_receipt(
        &mut self,
        handler: impl FnMut(&mut Client<T>, &Frame) -> Result<(), ClientError> + 'static,
    ) {
        self.handlers.receipt = Some(Box::new(handler));
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Perform the CONNECT handshake.
    ///
    /// Sends CONNECT with `accept-version:1.2` and the vhost (or hostname)
    /// as `host`, plus credentials and the heartbeat request when
    /// configured. On CONNECTED, captures the server metadata, honors the
    /// server's offered `heart-beat` interval for the watchdog, and invokes
    /// the connected handler. Any other frame is routed to the error
    /// handler.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        let mut frame = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", self.uri.host_header().to_string());
        if let Some(login) = &self.uri.username {
            frame = frame.header("login", login.clone());
        }
        if let Some(passcode) = &self.uri.password {
            frame = frame.header("passcode", passcode.clone());
        }
        let configured_ms = self.uri.heartbeat_secs.saturating_mul(1000);
        if configured_ms > 0 {
            // We never send heartbeats; we only ask the server for them.
            frame = frame.header("heart-beat", format!("0,{}", configured_ms));
        }
        self.write_frame(&frame)?;

        let response = loop {
            match self.read_item()? {
                WireItem::Heartbeat => continue,
                WireItem::Frame(f) => break f,
            }
        };

        if response.command != "CONNECTED" {
            return self.handle_error_frame(&response);
        }

        self.server_headers = response.headers.clone();
        self.watchdog_ms =
            negotiated_watchdog_ms(configured_ms, response.get_header("heart-beat"));
        self.connected = true;
        debug!(
            "connected to {} (vhost {:?}, watchdog {} ms)",
            self.uri.host, self.uri.vhost, self.watchdog_ms
        );
        self.dispatch(Slot::Connected, &response)
    }

    /// Send DISCONNECT and close the stream. A no-op when the session is
    /// already disconnected.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        if !self.connected {
            return Ok(());
        }
        let result = self.write_frame(&Frame::new("DISCONNECT"));
        self.close();
        result
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Publish `body` to `destination`.
    ///
    /// `content-length` is always attached and equals the body length in
    /// bytes. When exactly one transaction is open and the caller supplied
    /// no `transaction` header, the open transaction is attached
    /// automatically.
    pub fn send(
        &mut self,
        destination: &str,
        body: &[u8],
        content_type: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> Result<(), ClientError> {
        self.require_connected()?;
        let mut frame = Frame::new("SEND")
            .header("destination", destination)
            .header("content-length", body.len().to_string());
        if let Some(content_type) = content_type {
            frame = frame.header("content-type", content_type);
        }
        for (name, value) in extra_headers {
            frame = frame.header(*name, *value);
        }
        if let Some(transaction) = self.implicit_transaction(extra_headers) {
            frame = frame.header("transaction", transaction);
        }
        frame = frame.set_body(body.to_vec());
        self.write_frame(&frame)
    }

    /// Subscribe to `destination` with an auto-assigned integer id.
    pub fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<String, ClientError> {
        self.subscribe_with_headers(destination, ack, None, &[])
    }

    /// Subscribe with an explicit id and/or extra headers.
    ///
    /// The auto-assigned id is the current length of the subscription
    /// table, which stays stable because unsubscribed slots are tombstoned
    /// rather than removed. The `ack` header is attached for the two client
    /// acknowledgement modes only. Returns the id used.
    pub fn subscribe_with_headers(
        &mut self,
        destination: &str,
        ack: AckMode,
        id: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> Result<String, ClientError> {
        self.require_connected()?;
        let id = match id {
            Some(id) => id.to_string(),
            None => self.subscriptions.len().to_string(),
        };
        let mut frame = Frame::new("SUBSCRIBE")
            .header("destination", destination)
            .header("id", id.clone());
        if ack != AckMode::Auto {
            frame = frame.header("ack", ack.as_str());
        }
        for (name, value) in extra_headers {
            frame = frame.header(*name, *value);
        }
        self.write_frame(&frame)?;
        self.subscriptions.push(destination.to_string());
        Ok(id)
    }

    /// Unsubscribe the first subscription matching `destination`.
    ///
    /// The slot is tombstoned (emptied) instead of removed so the ids of
    /// later subscriptions keep pointing at the right slots. Unknown
    /// destinations are ignored.
    pub fn unsubscribe(&mut self, destination: &str) -> Result<(), ClientError> {
        self.unsubscribe_with_headers(destination, &[])
    }

    /// [`Client::unsubscribe`] with extra headers on the UNSUBSCRIBE frame.
    pub fn unsubscribe_with_headers(
        &mut self,
        destination: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<(), ClientError> {
        self.require_connected()?;
        let index = match self.subscriptions.iter().position(|d| d == destination) {
            Some(index) => index,
            None => {
                warn!("unsubscribe: no subscription for {}", destination);
                return Ok(());
            }
        };
        let mut frame = Frame::new("UNSUBSCRIBE").header("id", index.to_string());
        for (name, value) in extra_headers {
            frame = frame.header(*name, *value);
        }
        self.write_frame(&frame)?;
        self.subscriptions[index].clear();
        Ok(())
    }

    /// Open a transaction. Identifiers must be unique among currently open
    /// transactions for automatic attachment to stay unambiguous.
    pub fn begin(&mut self, transaction: &str) -> Result<(), ClientError> {
        self.require_connected()?;
        self.write_frame(&Frame::new("BEGIN").header("transaction", transaction))?;
        self.transactions.push(transaction.to_string());
        Ok(())
    }

    /// Commit a transaction; defaults to the most recently begun one. A
    /// no-op when nothing is open and no id was given.
    pub fn commit(&mut self, transaction: Option<&str>) -> Result<(), ClientError> {
        self.finish_transaction("COMMIT", transaction)
    }

    /// Abort a transaction; defaults to the most recently begun one. A
    /// no-op when nothing is open and no id was given.
    pub fn abort(&mut self, transaction: Option<&str>) -> Result<(), ClientError> {
        self.finish_transaction("ABORT", transaction)
    }

    fn finish_transaction(
        &mut self,
        verb: &str,
        transaction: Option<&str>,
    ) -> Result<(), ClientError> {
        self.require_connected()?;
        let id = match transaction {
            Some(id) => id.to_string(),
            None => match self.transactions.last() {
                Some(id) => id.clone(),
                None => return Ok(()),
            },
        };
        self.write_frame(&Frame::new(verb).header("transaction", id.clone()))?;
        if let Some(position) = self.transactions.iter().position(|t| *t == id) {
            self.transactions.remove(position);
        }
        Ok(())
    }

    /// Acknowledge a message by its `id` header value. The single open
    /// transaction is attached automatically when the caller passes none.
    pub fn ack(&mut self, message_id: &str, transaction: Option<&str>) -> Result<(), ClientError> {
        self.acknowledge("ACK", message_id, transaction)
    }

    /// Negative-acknowledge a message by its `id` header value.
    pub fn nack(&mut self, message_id: &str, transaction: Option<&str>) -> Result<(), ClientError> {
        self.acknowledge("NACK", message_id, transaction)
    }

    fn acknowledge(
        &mut self,
        verb: &str,
        message_id: &str,
        transaction: Option<&str>,
    ) -> Result<(), ClientError> {
        self.require_connected()?;
        let mut frame = Frame::new(verb).header("id", message_id);
        match transaction {
            Some(transaction) => frame = frame.header("transaction", transaction),
            None => {
                if let Some(transaction) = self.implicit_transaction(&[]) {
                    frame = frame.header("transaction", transaction);
                }
            }
        }
        self.write_frame(&frame)
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    /// Receive and dispatch inbound frames.
    ///
    /// Blocks on the transport's read-ready primitive for the watchdog
    /// interval plus one second of grace (indefinitely when heartbeats are
    /// off). A timeout fires the missed-heartbeat handler; readiness parses
    /// one item and routes it by kind. With `keep_looping` false the loop
    /// returns after one non-heartbeat frame has been processed —
    /// heartbeat frames never consume that budget.
    pub fn wait_for_messages(&mut self, keep_looping: bool) -> Result<(), ClientError> {
        loop {
            // A complete item may already sit in the read buffer (frames
            // arriving back-to-back in one segment); the socket poll cannot
            // see it, so it must not gate its dispatch.
            let buffered = !matches!(parse_frame_slice(self.read_buf.as_ref()), Ok(None));
            if !buffered {
                let timeout = if self.watchdog_ms > 0 {
                    Some(Duration::from_millis(self.watchdog_ms + WATCHDOG_GRACE_MS))
                } else {
                    None
                };
                if !self.transport.poll_readable(timeout)? {
                    self.handle_missed_heartbeat()?;
                    if keep_looping {
                        continue;
                    }
                    return Ok(());
                }
            }

            match self.read_item()? {
                WireItem::Heartbeat => {
                    debug!("<- heartbeat");
                    let beat = Frame::new(HEARTBEAT);
                    self.dispatch(Slot::Heartbeat, &beat)?;
                }
                WireItem::Frame(frame) => {
                    debug!("<- {} ({} byte body)", frame.command, frame.body.len());
                    match frame.command.as_str() {
                        "MESSAGE" => self.dispatch(Slot::Message, &frame)?,
                        "RECEIPT" => self.dispatch(Slot::Receipt, &frame)?,
                        "ERROR" => self.handle_error_frame(&frame)?,
                        other => debug!("ignoring {} frame", other),
                    }
                    if !keep_looping {
                        return Ok(());
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// The transaction to auto-attach: the open one, iff exactly one is
    /// open and the caller did not supply a `transaction` header.
    fn implicit_transaction(&self, extra_headers: &[(&str, &str)]) -> Option<String> {
        let caller_supplied = extra_headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("transaction"));
        if !caller_supplied && self.transactions.len() == 1 {
            Some(self.transactions[0].clone())
        } else {
            None
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let mut buf = BytesMut::new();
        encode_frame(frame, &mut buf);
        debug!("-> {} ({} bytes)", frame.command, buf.len());
        self.transport.write_all(&buf)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Read one wire item, buffering transport reads as needed.
    ///
    /// Stamps the last-activity timestamp before reading anything, for the
    /// watchdog. A read timing out here (as opposed to the read-ready
    /// primitive timing out) is a transport failure, not a missed
    /// heartbeat. Every failure on this path is terminal: the stream is
    /// closed and the session marked disconnected before the error is
    /// returned.
    fn read_item(&mut self) -> Result<WireItem, ClientError> {
        self.last_activity_ms = current_millis();
        loop {
            match parse_frame_slice(self.read_buf.as_ref()) {
                Ok(Some((item, consumed))) => {
                    self.read_buf.advance(consumed);
                    return Ok(item);
                }
                Ok(None) => {
                    let mut chunk = [0u8; READ_CHUNK];
                    let n = match self.transport.read(&mut chunk) {
                        Ok(n) => n,
                        Err(e) => {
                            self.close();
                            return Err(ClientError::Transport(e));
                        }
                    };
                    if n == 0 {
                        self.close();
                        return Err(ClientError::Transport(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by server",
                        )));
                    }
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                Err(message) => {
                    self.close();
                    return Err(ClientError::Protocol {
                        message,
                        body: None,
                    });
                }
            }
        }
    }

    /// Route a frame to the error slot, or apply the built-in behavior:
    /// close, mark disconnected, and raise [`ClientError::Protocol`] built
    /// from the broker's `message` header and payload.
    fn handle_error_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        if let Some(mut handler) = self.handlers.error.take() {
            let result = handler(self, frame);
            if self.handlers.error.is_none() {
                self.handlers.error = Some(handler);
            }
            return result;
        }
        self.close();
        let message = match frame.get_header("message") {
            Some(message) => message.to_string(),
            None => format!("unexpected {} frame", frame.command),
        };
        let body = frame.body_text();
        let body = body.trim_end_matches(['\r', '\n']);
        Err(ClientError::Protocol {
            message,
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
        })
    }

    /// Fire the missed-heartbeat slot, or apply the built-in behavior:
    /// close, mark disconnected, and raise [`ClientError::HeartbeatTimeout`].
    fn handle_missed_heartbeat(&mut self) -> Result<(), ClientError> {
        warn!(
            "no server traffic within {} ms",
            self.watchdog_ms + WATCHDOG_GRACE_MS
        );
        if let Some(mut handler) = self.handlers.missed_heartbeat.take() {
            let result = handler(self);
            if self.handlers.missed_heartbeat.is_none() {
                self.handlers.missed_heartbeat = Some(handler);
            }
            return result;
        }
        self.close();
        Err(ClientError::HeartbeatTimeout {
            last_activity_ms: self.last_activity_ms,
        })
    }

    fn dispatch(&mut self, slot: Slot, frame: &Frame) -> Result<(), ClientError> {
        // The slot is taken for the duration of the call so the handler can
        // borrow the client; a handler that installs a replacement wins.
        let taken = match slot {
            Slot::Connected => self.handlers.connected.take(),
            Slot::Heartbeat => self.handlers.heartbeat.take(),
            Slot::Message => self.handlers.message.take(),
            Slot::Receipt => self.handlers.receipt.take(),
        };
        let Some(mut handler) = taken else {
            return Ok(());
        };
        let result = handler(self, frame);
        let slot_ref = match slot {
            Slot::Connected => &mut self.handlers.connected,
            Slot::Heartbeat => &mut self.handlers.heartbeat,
            Slot::Message => &mut self.handlers.message,
            Slot::Receipt => &mut self.handlers.receipt,
        };
        if slot_ref.is_none() {
            *slot_ref = Some(handler);
        }
        result
    }

    /// Close the stream and mark the session disconnected.
    ///
    /// Public so replacement error and missed-heartbeat handlers can decide
    /// to tear the session down themselves.
    pub fn close(&mut self) {
        let _ = self.transport.shutdown();
        self.connected = false;
    }
}

fn current_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
