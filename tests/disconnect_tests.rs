//! Session teardown semantics.

mod common;

use cobalt_stomp::ClientError;
use common::connected_client;

#[test]
fn disconnect_is_idempotent() {
    let (mut client, state) = connected_client(b"");
    client.disconnect().unwrap();
    assert!(!client.is_connected());

    // a second call does nothing at all
    client.disconnect().unwrap();
    assert!(!client.is_connected());
    assert_eq!(state.borrow().shutdowns, 1);

    assert_eq!(
        state.borrow().written,
        b"DISCONNECT\r\n\r\n\0\r\n",
        "exactly one DISCONNECT frame on the wire"
    );
}

#[test]
fn operations_after_disconnect_fail_with_not_connected() {
    let (mut client, _state) = connected_client(b"");
    client.disconnect().unwrap();

    assert!(matches!(
        client.send("/q", b"x", None, &[]),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.subscribe("/q", cobalt_stomp::AckMode::Auto),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(client.begin("t1"), Err(ClientError::NotConnected)));
    assert!(matches!(client.ack("m1", None), Err(ClientError::NotConnected)));
}

#[test]
fn session_state_survives_disconnect_for_inspection() {
    let (mut client, _state) = connected_client(b"");
    client.subscribe("/a", cobalt_stomp::AckMode::Auto).unwrap();
    client.begin("t1").unwrap();
    client.disconnect().unwrap();

    assert_eq!(client.subscriptions(), ["/a"]);
    assert_eq!(client.transactions(), ["t1"]);
    assert_eq!(client.server_header("server"), Some("mock"));
}
