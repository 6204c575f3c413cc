use std::time::Duration;

use flowlink_core::{RouteField, RouteLayout};
use flowlink_fabric::{
    protocol::{ConnectTarget, FlowComplete, ListRoutes, NodeResult, RouteMapping, ServerEvent},
    transport::{memory, ws, Address, Link, MemoryListener},
    Client, ClientConfig, ConnectionState, Error,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn config(request_timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        request_timeout_ms,
        ..ClientConfig::default()
    }
}

/// Client connected to an in-process backend
async fn connected(config: ClientConfig) -> (Client, Link, MemoryListener) {
    let (connector, mut listener) = memory::channel();
    let client = Client::new(connector, config);
    client.connect(Address::new("memory", 0));
    let server = listener.accept().await.unwrap();
    client
        .state_changes()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();
    (client, server, listener)
}

async fn next_request(server: &mut Link) -> Value {
    let frame = server.source.receive().await.unwrap();
    serde_json::from_slice(&frame).unwrap()
}

async fn push(server: &mut Link, message: Value) {
    let frame = serde_json::to_vec(&message).unwrap();
    server.sink.send(&frame).await.unwrap();
}

/// Forward every payload of `event` into a channel
fn capture(client: &Client, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(event, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

#[tokio::test]
async fn call_while_disconnected_fails_immediately() {
    let (connector, _listener) = memory::channel();
    let client = Client::new(connector, ClientConfig::default());

    let handle = client.call("route.list", None);
    assert!(handle.id().is_none());
    assert!(matches!(handle.await, Err(Error::NotConnected)));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn reply_settles_call_exactly_once() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let mut strays = capture(&client, "route.list");

    let handle = client.call("route.list", None);
    let id = handle.id().unwrap().to_string();
    assert_eq!(client.pending_calls(), 1);

    let request = next_request(&mut server).await;
    assert_eq!(request, json!({"id": id, "action": "route.list"}));

    let reply = json!({"id": id, "event": "route.list", "payload": {"routes": []}});
    push(&mut server, reply.clone()).await;
    push(&mut server, reply).await;

    assert_eq!(handle.await.unwrap(), json!({"routes": []}));
    assert_eq!(client.pending_calls(), 0);

    // The duplicate matches no pending call and surfaces as an event
    assert_eq!(strays.recv().await.unwrap(), json!({"routes": []}));
}

#[tokio::test]
async fn concurrent_calls_are_correlated_by_id() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let first = client.call("proto.list", None);
    let second = client.call("route.list", None);
    assert_ne!(first.id(), second.id());

    let a = next_request(&mut server).await;
    let b = next_request(&mut server).await;

    // Answer in reverse order
    push(&mut server, json!({"id": b["id"], "event": "route.list", "payload": 2})).await;
    push(&mut server, json!({"id": a["id"], "event": "proto.list", "payload": 1})).await;

    assert_eq!(first.await.unwrap(), json!(1));
    assert_eq!(second.await.unwrap(), json!(2));
}

#[tokio::test]
async fn reply_without_payload_resolves_to_null() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let handle = client.call("flow.stop", None);
    let request = next_request(&mut server).await;
    push(&mut server, json!({"id": request["id"], "event": "flow.stop"})).await;

    assert_eq!(handle.await.unwrap(), Value::Null);
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out() {
    let (client, mut server, _listener) = connected(config(500)).await;
    let mut strays = capture(&client, "route.list");

    let handle = client.call("route.list", None);
    let id = handle.id().unwrap().to_string();
    let _ = next_request(&mut server).await;

    let started = tokio::time::Instant::now();
    match handle.await {
        Err(Error::Timeout { action, after }) => {
            assert_eq!(action, "route.list");
            assert_eq!(after, Duration::from_millis(500));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(client.pending_calls(), 0);

    // A late reply settles nothing
    push(&mut server, json!({"id": id, "event": "route.list", "payload": "late"})).await;
    assert_eq!(strays.recv().await.unwrap(), json!("late"));
    assert!(client.is_connected());
}

#[tokio::test]
async fn error_reply_rejects_with_server_message() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let handle = client.call("conn.connect", Some(json!({"host": "10.0.0.2", "port": 9001})));
    let request = next_request(&mut server).await;
    assert_eq!(request["payload"]["port"], 9001);

    push(
        &mut server,
        json!({"id": request["id"], "event": "error", "payload": {"message": "Not connected to game server"}}),
    )
    .await;

    match handle.await {
        Err(Error::Protocol(message)) => assert_eq!(message, "Not connected to game server"),
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn error_reply_without_message_uses_fallback() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let handle = client.call("route.delete", None);
    let request = next_request(&mut server).await;
    push(&mut server, json!({"id": request["id"], "event": "error"})).await;

    assert!(matches!(handle.await, Err(Error::Protocol(m)) if m == "Unknown error"));
}

#[tokio::test]
async fn disconnect_rejects_pending_calls() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let first = client.call("flow.execute", Some(json!({"nodes": [], "edges": []})));
    let second = client.call("route.list", None);
    let _ = next_request(&mut server).await;
    assert_eq!(client.pending_calls(), 2);

    client.disconnect();

    assert!(matches!(first.await, Err(Error::ConnectionClosed)));
    assert!(matches!(second.await, Err(Error::ConnectionClosed)));
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn lost_link_rejects_pending_calls() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let handle = client.call("route.list", None);
    let _ = next_request(&mut server).await;
    drop(server);

    assert!(matches!(handle.await, Err(Error::ConnectionClosed)));
    assert_eq!(client.state(), ConnectionState::Reconnecting);
}

#[tokio::test]
async fn dropping_the_client_rejects_pending_calls() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let handle = client.call("route.list", None);
    let _ = next_request(&mut server).await;
    drop(client);

    assert!(matches!(handle.await, Err(Error::ConnectionClosed)));
    assert!(matches!(
        server.source.receive().await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn status_callback_sees_transitions() {
    let (connector, mut listener) = memory::channel();
    let client = Client::new(connector, ClientConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.set_status_callback(move |state| {
        let _ = tx.send(state);
    });

    client.connect(Address::new("memory", 0));
    let _server = listener.accept().await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), ConnectionState::Connecting);
    assert_eq!(rx.recv().await.unwrap(), ConnectionState::Connected);

    client.disconnect();
    assert_eq!(rx.recv().await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn push_events_reach_listeners() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let mut broadcasts = capture(&client, "test.broadcast");
    let mut completions = capture(&client, "flow.complete");

    push(&mut server, json!({"event": "test.broadcast", "payload": "hello"})).await;
    push(&mut server, json!({"event": "flow.complete"})).await;

    assert_eq!(broadcasts.recv().await.unwrap(), json!("hello"));
    assert_eq!(completions.recv().await.unwrap(), Value::Null);
}

#[tokio::test]
async fn unsubscribed_listener_hears_nothing() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let (tx, mut removed) = mpsc::unbounded_channel();
    let sub = client.subscribe("node.start", move |payload| {
        let _ = tx.send(payload.clone());
    });
    let mut kept = capture(&client, "node.start");

    sub.unsubscribe();
    push(&mut server, json!({"event": "node.start", "payload": {"nodeId": "n1"}})).await;

    assert_eq!(kept.recv().await.unwrap(), json!({"nodeId": "n1"}));
    assert!(removed.try_recv().is_err());
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let mut events = capture(&client, "flow.started");

    server.sink.send(b"not json").await.unwrap();
    server.sink.send(br#"{"id":"x"}"#).await.unwrap();
    push(&mut server, json!({"event": "flow.started"})).await;

    assert_eq!(events.recv().await.unwrap(), Value::Null);
    assert!(client.is_connected());
}

#[tokio::test]
async fn typed_invoke_round_trip() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;

    let backend = async {
        let request = next_request(&mut server).await;
        assert_eq!(request["action"], "route.list");
        assert!(request.get("payload").is_none());
        push(
            &mut server,
            json!({
                "id": request["id"],
                "event": "route.list",
                "payload": {"routes": [{"route": 258, "requestMsg": "LoginReq", "responseMsg": "LoginResp"}]}
            }),
        )
        .await;
    };

    let (reply, ()) = tokio::join!(client.invoke(&ListRoutes), backend);
    assert_eq!(
        reply.unwrap().routes,
        [RouteMapping {
            route: 258,
            request_msg: "LoginReq".into(),
            response_msg: "LoginResp".into(),
        }]
    );
}

#[tokio::test]
async fn typed_invoke_sends_layout_and_checks_reply() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let layout = RouteLayout::new(vec![
        RouteField::plain("len", 4),
        RouteField::route("cmd", 1),
        RouteField::route("act", 1),
    ])
    .unwrap();

    let backend = async {
        let request = next_request(&mut server).await;
        assert_eq!(request["action"], "conn.connect");
        assert_eq!(request["payload"]["frameFields"][1]["isRoute"], true);
        // Reply shape does not match the action's schema
        push(
            &mut server,
            json!({"id": request["id"], "event": "conn.connect", "payload": {"ok": true}}),
        )
        .await;
    };

    let target = ConnectTarget::new("10.0.0.2", 9001).with_layout(layout);
    let (reply, ()) = tokio::join!(client.invoke(&target), backend);
    assert!(matches!(reply, Err(Error::Codec(m)) if m.contains("conn.connect")));
}

#[tokio::test]
async fn typed_listeners_decode_payloads() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let (tx, mut results) = mpsc::unbounded_channel();
    let _sub = client.on(move |result: NodeResult| {
        let _ = tx.send(result);
    });
    let (done_tx, mut done) = mpsc::unbounded_channel();
    let _done = client.on(move |_: FlowComplete| {
        let _ = done_tx.send(());
    });

    // Invalid payload is skipped, the valid one gets through
    push(&mut server, json!({"event": "node.result", "payload": {"nodeId": 7}})).await;
    push(
        &mut server,
        json!({"event": "node.result", "payload": {"nodeId": "n2", "duration": 31}}),
    )
    .await;
    push(&mut server, json!({"event": "flow.complete"})).await;

    let result = results.recv().await.unwrap();
    assert_eq!(result.node_id, "n2");
    assert_eq!(result.duration, Some(31));
    done.recv().await.unwrap();
    assert!(results.try_recv().is_err());
}

#[tokio::test]
async fn server_event_listener_covers_every_event() {
    let (client, mut server, _listener) = connected(ClientConfig::default()).await;
    let (tx, mut events) = mpsc::unbounded_channel();
    let subs = client.on_server_event(move |event| {
        let _ = tx.send(event);
    });
    assert_eq!(subs.len(), ServerEvent::NAMES.len());

    push(&mut server, json!({"event": "flow.started"})).await;
    push(&mut server, json!({"event": "flow.error", "payload": {"error": "boom"}})).await;

    assert_eq!(events.recv().await.unwrap(), ServerEvent::FlowStarted);
    match events.recv().await.unwrap() {
        ServerEvent::FlowError(e) => assert_eq!(e.error, "boom"),
        other => panic!("unexpected event {:?}", other),
    }

    for sub in &subs {
        sub.unsubscribe();
    }
    assert_eq!(client.dispatcher().listener_count("flow.started"), 0);
}

#[tokio::test]
async fn websocket_backend_end_to_end() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut link = ws::accept(stream).await.unwrap();
        let request: Value = serde_json::from_slice(&link.source.receive().await.unwrap()).unwrap();
        let reply = json!({"id": request["id"], "event": "conn.status", "payload": {"state": "connected"}});
        link.sink.send(&serde_json::to_vec(&reply).unwrap()).await.unwrap();
        let event = json!({"event": "flow.complete"});
        link.sink.send(&serde_json::to_vec(&event).unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let client = Client::websocket(ClientConfig::default());
    let (tx, mut done) = mpsc::unbounded_channel();
    let _sub = client.on(move |_: FlowComplete| {
        let _ = tx.send(());
    });
    client.connect_backend(Some(port));
    client
        .state_changes()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();

    let status = client
        .invoke(&flowlink_fabric::protocol::GetLinkStatus)
        .await
        .unwrap();
    assert_eq!(
        status.state,
        flowlink_fabric::protocol::BackendLinkState::Connected
    );
    done.recv().await.unwrap();
}
