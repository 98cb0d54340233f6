//! Tests for the CONNECT handshake: server metadata capture, rejection
//! handling, and heartbeat negotiation.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use cobalt_stomp::{Client, ClientError, StompUri};
use common::{connected_client, MockTransport, CONNECTED_FRAME};

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn connected_frame_flips_the_state_and_captures_metadata() {
    let (client, _state) = connected_client(b"");
    assert!(client.is_connected());
    assert_eq!(client.server_header("server"), Some("mock"));
    assert_eq!(client.server_header("SERVER"), Some("mock"));
    assert_eq!(client.server_header("version"), Some("1.2"));
    assert_eq!(client.server_header("absent"), None);
}

#[test]
fn connected_handler_fires_with_the_frame() {
    let uri = StompUri::parse("stomp://h").unwrap();
    let (transport, _state) = MockTransport::scripted(CONNECTED_FRAME);
    let mut client = Client::new(transport, uri);

    let seen: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let seen_in_handler = seen.clone();
    client.on_connected(move |client, frame| {
        assert!(client.is_connected());
        *seen_in_handler.borrow_mut() = frame.get_header("server").map(str::to_string);
        Ok(())
    });

    client.connect().unwrap();
    assert_eq!(seen.borrow().as_deref(), Some("mock"));
}

#[test]
fn heartbeats_before_connected_are_skipped() {
    let uri = StompUri::parse("stomp://h").unwrap();
    let mut script = b"\n\r\n".to_vec();
    script.extend_from_slice(CONNECTED_FRAME);
    let (transport, _state) = MockTransport::scripted(&script);
    let mut client = Client::new(transport, uri);
    client.connect().unwrap();
    assert!(client.is_connected());
}

// =============================================================================
// Heartbeat negotiation
// =============================================================================

#[test]
fn configured_interval_stands_without_a_server_offer() {
    let uri = StompUri::parse("stomp://h?heartbeat=5").unwrap();
    let (transport, _state) = MockTransport::scripted(CONNECTED_FRAME);
    let mut client = Client::new(transport, uri);
    client.connect().unwrap();
    assert_eq!(client.heartbeat_interval_ms(), 5000);
}

#[test]
fn slower_server_offer_stretches_the_watchdog() {
    let uri = StompUri::parse("stomp://h?heartbeat=5").unwrap();
    let (transport, _state) =
        MockTransport::scripted(b"CONNECTED\nheart-beat:8000,0\n\n\0");
    let mut client = Client::new(transport, uri);
    client.connect().unwrap();
    assert_eq!(client.heartbeat_interval_ms(), 8000);
}

#[test]
fn server_declining_heartbeats_disables_the_watchdog() {
    let uri = StompUri::parse("stomp://h?heartbeat=5").unwrap();
    let (transport, _state) = MockTransport::scripted(b"CONNECTED\nheart-beat:0,0\n\n\0");
    let mut client = Client::new(transport, uri);
    client.connect().unwrap();
    assert_eq!(client.heartbeat_interval_ms(), 0);
}

// =============================================================================
// Rejection
// =============================================================================

#[test]
fn error_frame_during_connect_raises_protocol_error() {
    let uri = StompUri::parse("stomp://u:wrong@h").unwrap();
    let (transport, state) = MockTransport::scripted(
        b"ERROR\nmessage:Authentication failed\n\nInvalid credentials\n\0",
    );
    let mut client = Client::new(transport, uri);

    match client.connect() {
        Err(ClientError::Protocol { message, body }) => {
            assert_eq!(message, "Authentication failed");
            assert_eq!(body.as_deref(), Some("Invalid credentials"));
        }
        other => panic!("expected Protocol error, got {:?}", other.err()),
    }
    assert!(!client.is_connected());
    assert_eq!(state.borrow().shutdowns, 1);
}

#[test]
fn unexpected_frame_during_connect_raises_protocol_error() {
    let uri = StompUri::parse("stomp://h").unwrap();
    let (transport, _state) = MockTransport::scripted(b"RECEIPT\nreceipt-id:1\n\n\0");
    let mut client = Client::new(transport, uri);

    match client.connect() {
        Err(ClientError::Protocol { message, .. }) => {
            assert!(message.contains("RECEIPT"));
        }
        other => panic!("expected Protocol error, got {:?}", other.err()),
    }
    assert!(!client.is_connected());
}

#[test]
fn custom_error_handler_decides_the_outcome_during_connect() {
    let uri = StompUri::parse("stomp://h").unwrap();
    let (transport, state) = MockTransport::scripted(b"ERROR\nmessage:nope\n\n\0");
    let mut client = Client::new(transport, uri);

    client.on_error(|_client, frame| {
        assert_eq!(frame.get_header("message"), Some("nope"));
        Ok(())
    });
    // the handler swallowed the rejection, so connect reports success
    // without flipping the connected flag
    client.connect().unwrap();
    assert!(!client.is_connected());
    assert_eq!(state.borrow().shutdowns, 0);
}

#[test]
fn stalled_stream_during_connect_is_a_transport_error() {
    let uri = StompUri::parse("stomp://h").unwrap();
    // a truncated reply: the next read times out mid-frame
    let (transport, _state) = MockTransport::scripted(b"CONNEC");
    let mut client = Client::new(transport, uri);

    match client.connect() {
        Err(ClientError::Transport(_)) => {}
        other => panic!("expected Transport error, got {:?}", other.err()),
    }
}
