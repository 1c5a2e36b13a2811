//! Integration tests for portlink.
//!
//! Exercises two sockets over a linked in-memory transport, plus the raw
//! packet surface of the dispatch loop (expired requests, unknown ids,
//! invalid kinds, passthrough traffic).

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use portlink::error::PortlinkError;
use portlink::rpc::RpcSocket;
use portlink::transport::{channel, InboundEndpoint, OutboundEndpoint};

/// Epoch milliseconds for building raw expiry stamps.
fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Round-trip: register echo, call it, get the argument back.
#[tokio::test]
async fn test_echo_round_trip() {
    let (local, remote) = channel::link();

    let _server = RpcSocket::builder()
        .handle("echo", |v: Value| async move { Ok(v) })
        .start(remote.0, remote.1);
    let client = RpcSocket::builder().start(local.0, local.1);

    let reply = timeout(
        Duration::from_secs(1),
        client.call("echo", json!({"v": 5})),
    )
    .await
    .expect("call must settle")
    .expect("call must succeed");
    assert_eq!(reply, json!({"v": 5}));
}

/// Calls are dispatched both ways over the same endpoint pair.
#[tokio::test]
async fn test_bidirectional_dispatch() {
    let (local, remote) = channel::link();

    let a = RpcSocket::builder()
        .handle("side", |_: Value| async move { Ok("a") })
        .start(local.0, local.1);
    let b = RpcSocket::builder()
        .handle("side", |_: Value| async move { Ok("b") })
        .start(remote.0, remote.1);

    let from_a = timeout(Duration::from_secs(1), a.call("side", json!(null)))
        .await
        .unwrap()
        .unwrap();
    let from_b = timeout(Duration::from_secs(1), b.call("side", json!(null)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_a, json!("b"));
    assert_eq!(from_b, json!("a"));
}

/// Unregistered function rejects with a reason naming the function.
#[tokio::test]
async fn test_unregistered_function_rejects() {
    let (local, remote) = channel::link();

    let _server = RpcSocket::builder().start(remote.0, remote.1);
    let client = RpcSocket::builder().start(local.0, local.1);

    let err = timeout(Duration::from_secs(1), client.call("missing", json!({})))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
}

/// Handler failures surface as the caller's rejection, not a loop failure.
#[tokio::test]
async fn test_handler_error_becomes_remote_rejection() {
    let (local, remote) = channel::link();

    let _server = RpcSocket::builder()
        .handle("explode", |_: Value| async move {
            Err::<Value, _>(PortlinkError::Protocol("kaboom".into()))
        })
        .start(remote.0, remote.1);
    let client = RpcSocket::builder().start(local.0, local.1);

    let err = timeout(Duration::from_secs(1), client.call("explode", json!({})))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, PortlinkError::Remote(_)));
    assert!(err.to_string().contains("kaboom"));

    // The dispatch loop survived: a later call still works.
    let err2 = timeout(Duration::from_secs(1), client.call("still-missing", json!({})))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err2.to_string().contains("still-missing"));
}

/// Resolving one pending call does not affect another; completion order is
/// decoupled from send order.
#[tokio::test]
async fn test_independent_pending_calls_complete_out_of_order() {
    let (local, remote) = channel::link();

    let gate = Arc::new(tokio::sync::Notify::new());
    let gate_handler = gate.clone();
    let _server = RpcSocket::builder()
        .handle("slow", move |_: Value| {
            let gate = gate_handler.clone();
            async move {
                gate.notified().await;
                Ok("slow done")
            }
        })
        .handle("fast", |_: Value| async move { Ok("fast done") })
        .start(remote.0, remote.1);
    let client = Arc::new(RpcSocket::builder().start(local.0, local.1));

    let slow_client = client.clone();
    let slow = tokio::spawn(async move { slow_client.call("slow", json!(null)).await });

    // The later call completes while the earlier one is still pending.
    let fast = timeout(Duration::from_secs(1), client.call("fast", json!(null)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fast, json!("fast done"));
    assert!(!slow.is_finished());

    gate.notify_one();
    let slow = timeout(Duration::from_secs(1), slow)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(slow, json!("slow done"));
}

/// Timeout rejects the call locally, discards the pending entry and never
/// notifies the peer.
#[tokio::test]
async fn test_call_timeout_discards_pending_entry() {
    tokio::time::pause();
    let (local, _silent_peer) = channel::link();

    // No socket on the peer side: nothing will ever respond.
    let client = RpcSocket::builder().start(local.0, local.1);

    let err = client
        .call_with(
            "void",
            json!({}),
            Vec::new(),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PortlinkError::CallTimeout(_)));
    assert_eq!(client.pending_calls(), 0);
}

/// Endpoint closure settles every pending call with `Closed` instead of
/// leaving its awaiter hanging, and rejects calls made afterwards.
#[tokio::test]
async fn test_endpoint_closure_fails_pending_calls() {
    let (local, remote) = channel::link();
    let client = Arc::new(RpcSocket::builder().start(local.0, local.1));

    // In flight, with no per-call timeout, when the peer goes away.
    let in_flight_client = client.clone();
    let in_flight =
        tokio::spawn(async move { in_flight_client.call("anything", json!(null)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(remote);

    let err = timeout(Duration::from_secs(1), in_flight)
        .await
        .expect("call on a closed endpoint must settle")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, PortlinkError::Closed));
    assert_eq!(client.pending_calls(), 0);

    // A call issued after closure fails immediately.
    let err = timeout(Duration::from_secs(1), client.call("more", json!(null)))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, PortlinkError::Closed));
}

/// Passthrough traffic arriving before the receiver is taken is dropped,
/// not buffered.
#[tokio::test]
async fn test_passthrough_dropped_until_receiver_taken() {
    let (local, remote) = channel::link();
    let (_probe_in, mut probe_out) = (remote.0, remote.1);

    let socket = RpcSocket::builder().start(local.0, local.1);

    probe_out
        .send(json!({"topic": "early"}), Vec::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut passthrough = socket.take_passthrough().expect("first take");
    assert!(
        timeout(Duration::from_millis(100), passthrough.recv())
            .await
            .is_err(),
        "message before the receiver was taken must not be retained"
    );

    probe_out
        .send(json!({"topic": "late"}), Vec::new())
        .await
        .unwrap();
    let message = timeout(Duration::from_secs(1), passthrough.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message, json!({"topic": "late"}));
}

/// A response for an unknown id is dropped silently: no outbound packet, no
/// state change, and the socket keeps working.
#[tokio::test]
async fn test_unknown_id_response_is_idempotent_drop() {
    let (local, remote) = channel::link();
    let (mut probe_in, mut probe_out) = (remote.0, remote.1);

    let client = RpcSocket::builder()
        .handle("echo", |v: Value| async move { Ok(v) })
        .start(local.0, local.1);

    probe_out
        .send(json!({"id": 424242, "kind": "response", "value": 1}), Vec::new())
        .await
        .unwrap();
    probe_out
        .send(json!({"id": 424243, "kind": "error", "reason": "late"}), Vec::new())
        .await
        .unwrap();

    // No observable side effect may reach the wire.
    assert!(
        timeout(Duration::from_millis(100), probe_in.recv())
            .await
            .is_err(),
        "unknown-id packets must be dropped silently"
    );
    assert_eq!(client.pending_calls(), 0);

    // The socket is unaffected: a request from the probe side still works.
    probe_out
        .send(
            json!({"id": 1, "kind": "request", "functionName": "echo", "args": 7}),
            Vec::new(),
        )
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(1), probe_in.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, json!({"id": 1, "kind": "response", "value": 7}));
}

/// A request whose expiry already passed produces no outbound packet.
#[tokio::test]
async fn test_expired_request_dropped_without_response() {
    let (local, remote) = channel::link();
    let (mut probe_in, mut probe_out) = (remote.0, remote.1);

    let _socket = RpcSocket::builder()
        .handle("echo", |v: Value| async move { Ok(v) })
        .start(local.0, local.1);

    let stale = now_ms().saturating_sub(10_000);
    probe_out
        .send(
            json!({
                "id": 9,
                "kind": "request",
                "functionName": "echo",
                "args": 1,
                "expiry": stale,
            }),
            Vec::new(),
        )
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(100), probe_in.recv())
            .await
            .is_err(),
        "expired request must be dropped without a response"
    );
}

/// Clock skew tolerance keeps a just-expired request answerable.
#[tokio::test]
async fn test_skew_tolerance_admits_recently_expired_request() {
    let (local, remote) = channel::link();
    let (mut probe_in, mut probe_out) = (remote.0, remote.1);

    let _socket = RpcSocket::builder()
        .clock_skew_tolerance(Duration::from_secs(60))
        .handle("echo", |v: Value| async move { Ok(v) })
        .start(local.0, local.1);

    // Expired a second ago, well inside the tolerance window.
    let barely_stale = now_ms().saturating_sub(1_000);
    probe_out
        .send(
            json!({
                "id": 11,
                "kind": "request",
                "functionName": "echo",
                "args": "hi",
                "expiry": barely_stale,
            }),
            Vec::new(),
        )
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(1), probe_in.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, json!({"id": 11, "kind": "response", "value": "hi"}));
}

/// Unknown kinds are answered with an error packet echoing the id.
#[tokio::test]
async fn test_invalid_kind_answered_with_error_packet() {
    let (local, remote) = channel::link();
    let (mut probe_in, mut probe_out) = (remote.0, remote.1);

    let _socket = RpcSocket::builder().start(local.0, local.1);

    probe_out
        .send(json!({"id": "weird-77", "kind": "subscribe"}), Vec::new())
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(1), probe_in.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        reply,
        json!({"id": "weird-77", "kind": "error", "reason": "invalid packet"})
    );
}

/// Traffic without a correlation id passes through untouched.
#[tokio::test]
async fn test_non_protocol_traffic_passes_through() {
    let (local, remote) = channel::link();
    let (mut probe_in, mut probe_out) = (remote.0, remote.1);

    let socket = RpcSocket::builder().start(local.0, local.1);
    let mut passthrough = socket.take_passthrough().expect("first take");
    assert!(socket.take_passthrough().is_none(), "single receiver only");

    probe_out
        .send(json!({"topic": "presence", "user": "ada"}), Vec::new())
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(1), passthrough.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message, json!({"topic": "presence", "user": "ada"}));
    // And no error packet went out for it.
    assert!(timeout(Duration::from_millis(100), probe_in.recv())
        .await
        .is_err());
}

/// Runtime register/unregister: last write wins, lookup happens at arrival.
#[tokio::test]
async fn test_runtime_registration_last_write_wins() {
    let (local, remote) = channel::link();

    let server = RpcSocket::builder().start(remote.0, remote.1);
    let client = RpcSocket::builder().start(local.0, local.1);

    server.register("greet", |_: Value| async move { Ok("first") });
    server.register("greet", |_: Value| async move { Ok("second") });

    let reply = timeout(Duration::from_secs(1), client.call("greet", json!(null)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, json!("second"));

    assert!(server.unregister("greet"));
    let err = timeout(Duration::from_secs(1), client.call("greet", json!(null)))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("greet"));
}

/// The transfer hint travels with the request without disturbing the wire
/// shape (the channel transport ignores it).
#[tokio::test]
async fn test_call_with_transfer_hint() {
    let (local, remote) = channel::link();

    let _server = RpcSocket::builder()
        .handle("store", |v: Value| async move { Ok(v) })
        .start(remote.0, remote.1);
    let client = RpcSocket::builder().start(local.0, local.1);

    let reply = timeout(
        Duration::from_secs(1),
        client.call_with(
            "store",
            json!({"blob": [1, 2, 3]}),
            vec!["/blob".to_string()],
            Some(Duration::from_secs(5)),
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply, json!({"blob": [1, 2, 3]}));
}
