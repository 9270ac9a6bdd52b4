// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server behavior tests over real sockets: method dispatch, auth,
//! broadcast delivery, framing resynchronization, connection limits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use od_core::{CoreError, ErrorCode};

use super::*;
use crate::client::{ClientConfig, ClientError, RpcClient};
use crate::frame::encode_frame;
use crate::jsonrpc::codes;

/// Methods used across these tests.
fn test_methods() -> Methods {
    let methods = Methods::new();
    methods
        .register(
            "echo",
            Arc::new(|params, _conn| Box::pin(async move { Ok(params) })),
        )
        .unwrap();
    methods
        .register(
            "add",
            Arc::new(|params: Value, _conn| {
                Box::pin(async move {
                    let a = params["a"].as_i64().unwrap_or(0);
                    let b = params["b"].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                })
            }),
        )
        .unwrap();
    methods
        .register(
            "slow",
            Arc::new(|params: Value, _conn| {
                Box::pin(async move {
                    let ms = params["ms"].as_u64().unwrap_or(100);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(json!("done"))
                })
            }),
        )
        .unwrap();
    methods
        .register(
            "fail",
            Arc::new(|_params, _conn| {
                Box::pin(async move {
                    Err::<Value, _>(
                        CoreError::new(ErrorCode::ProcessNotFound, "no process named \"ghost\"")
                            .with_process("ghost"),
                    )
                })
            }),
        )
        .unwrap();
    methods
}

async fn start_server(dir: &std::path::Path) -> (RpcServer, Endpoint) {
    let endpoint = Endpoint::Unix(dir.join("test.sock"));
    let server = RpcServer::bind(ServerConfig::new(endpoint.clone()), test_methods())
        .await
        .unwrap();
    (server, endpoint)
}

async fn client_for(endpoint: &Endpoint) -> RpcClient {
    RpcClient::connect(ClientConfig::new(endpoint.clone()))
        .await
        .unwrap()
}

#[tokio::test]
async fn unknown_method_is_32601_and_connection_survives() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let client = client_for(&endpoint).await;

    let err = client.call("no-such-method", json!({})).await.unwrap_err();
    match err {
        ClientError::Rpc(e) => {
            assert_eq!(e.code, codes::METHOD_NOT_FOUND);
            assert!(e.message.contains("no-such-method"));
        }
        other => panic!("expected RPC error, got {other:?}"),
    }

    // Same connection still serves known methods.
    let sum = client.call("add", json!({"a": 2, "b": 3})).await.unwrap();
    assert_eq!(sum, json!(5));

    server.shutdown().await;
}

#[tokio::test]
async fn handler_error_carries_domain_code() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let client = client_for(&endpoint).await;

    let err = client.call("fail", json!({"name": "ghost"})).await.unwrap_err();
    match err {
        ClientError::Rpc(e) => {
            assert_eq!(e.code, codes::INTERNAL_ERROR);
            assert!(e.message.contains("ghost"));
            assert_eq!(e.domain_code(), Some(ErrorCode::ProcessNotFound));
        }
        other => panic!("expected RPC error, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn broadcast_reaches_each_client_exactly_once() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;

    let c1 = client_for(&endpoint).await;
    let c2 = client_for(&endpoint).await;

    let seen1: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let s1 = Arc::clone(&seen1);
    c1.on_notification(Arc::new(move |method, params| {
        s1.lock().push((method.to_string(), params.clone()));
    }));
    let s2 = Arc::clone(&seen2);
    c2.on_notification(Arc::new(move |method, params| {
        s2.lock().push((method.to_string(), params.clone()));
    }));

    // Both clients must be registered before the broadcast; a ping makes
    // sure their connections are fully set up server-side.
    c1.call("echo", json!(1)).await.unwrap();
    c2.call("echo", json!(1)).await.unwrap();
    assert_eq!(server.connection_count(), 2);

    server.broadcast("evt", json!({"x": 1}));

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !seen1.lock().is_empty() && !seen2.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("broadcast not delivered");

    assert_eq!(*seen1.lock(), vec![("evt".to_string(), json!({"x": 1}))]);
    assert_eq!(*seen2.lock(), vec![("evt".to_string(), json!({"x": 1}))]);

    server.shutdown().await;
}

#[tokio::test]
async fn auth_token_is_required_and_stripped() {
    let dir = tempdir().unwrap();
    let endpoint = Endpoint::Unix(dir.path().join("auth.sock"));
    let mut config = ServerConfig::new(endpoint.clone());
    config.auth_token = Some("sesame".to_string());
    let server = RpcServer::bind(config, test_methods()).await.unwrap();

    // Without the token: invalid-request.
    let bare = client_for(&endpoint).await;
    let err = bare.call("echo", json!({"v": 1})).await.unwrap_err();
    match err {
        ClientError::Rpc(e) => {
            assert_eq!(e.code, codes::INVALID_REQUEST);
            assert_eq!(e.message, "Invalid auth token");
        }
        other => panic!("expected RPC error, got {other:?}"),
    }

    // With the token: accepted, and the reserved key never reaches the
    // handler.
    let mut cc = ClientConfig::new(endpoint.clone());
    cc.auth_token = Some("sesame".to_string());
    let authed = RpcClient::connect(cc).await.unwrap();
    let echoed = authed.call("echo", json!({"v": 1})).await.unwrap();
    assert_eq!(echoed, json!({"v": 1}));

    // Wrong token: rejected.
    let mut cc = ClientConfig::new(endpoint.clone());
    cc.auth_token = Some("wrong".to_string());
    let bad = RpcClient::connect(cc).await.unwrap();
    let err = bad.call("echo", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(e) if e.code == codes::INVALID_REQUEST));

    server.shutdown().await;
}

#[tokio::test]
async fn excess_connections_are_closed() {
    let dir = tempdir().unwrap();
    let endpoint = Endpoint::Unix(dir.path().join("limit.sock"));
    let mut config = ServerConfig::new(endpoint.clone());
    config.max_connections = 1;
    let server = RpcServer::bind(config, test_methods()).await.unwrap();

    let first = client_for(&endpoint).await;
    first.call("echo", json!(1)).await.unwrap();

    // The second connection is accepted then immediately closed; its first
    // call fails.
    let second = client_for(&endpoint).await;
    let err = second
        .call_with_timeout("echo", json!(1), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ClientError::ConnectionClosed | ClientError::Timeout(_)),
        "unexpected error: {err:?}"
    );

    // The first connection is unaffected.
    first.call("echo", json!(2)).await.unwrap();

    server.shutdown().await;
}

/// Raw-socket helper: read frames off a unix stream.
async fn read_raw_frame(stream: &mut UnixStream, dec: &mut FrameDecoder) -> Frame {
    use tokio::io::AsyncReadExt;
    loop {
        if let Some(frame) = dec.next_frame().unwrap() {
            return frame;
        }
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed connection");
        dec.extend(&buf[..n]);
    }
}

fn raw_request(id: i64, method: &str, params: Value) -> Vec<u8> {
    let payload = serde_json::to_vec(&RpcRequest::call(id, method, params)).unwrap();
    encode_frame(
        &Frame::new(FrameKind::Request, payload),
        DEFAULT_MAX_MESSAGE_SIZE,
    )
    .unwrap()
}

#[tokio::test]
async fn two_requests_in_one_write_yield_two_responses() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let Endpoint::Unix(path) = &endpoint else {
        panic!("expected unix endpoint")
    };

    let mut stream = UnixStream::connect(path).await.unwrap();
    let mut wire = raw_request(1, "add", json!({"a": 1, "b": 1}));
    wire.extend(raw_request(2, "add", json!({"a": 2, "b": 2})));
    stream.write_all(&wire).await.unwrap();

    let mut dec = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
    let mut ids = Vec::new();
    for _ in 0..2 {
        let frame = read_raw_frame(&mut stream, &mut dec).await;
        assert_eq!(frame.kind, FrameKind::Response);
        let resp: RpcResponse = serde_json::from_slice(&frame.payload).unwrap();
        ids.push(resp.id.clone());
    }
    ids.sort_by_key(|id| match id {
        RequestId::Number(n) => *n,
        _ => i64::MAX,
    });
    assert_eq!(ids, vec![RequestId::Number(1), RequestId::Number(2)]);

    server.shutdown().await;
}

#[tokio::test]
async fn partial_frame_completes_only_after_last_byte() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let Endpoint::Unix(path) = &endpoint else {
        panic!("expected unix endpoint")
    };

    let mut stream = UnixStream::connect(path).await.unwrap();
    let wire = raw_request(7, "echo", json!({"partial": true}));
    let (head, tail) = wire.split_at(wire.len() - 3);

    stream.write_all(head).await.unwrap();
    stream.flush().await.unwrap();

    // No response while the frame is incomplete.
    let mut dec = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
    let premature = tokio::time::timeout(
        Duration::from_millis(200),
        read_raw_frame(&mut stream, &mut dec),
    )
    .await;
    assert!(premature.is_err(), "response arrived before frame completed");

    stream.write_all(tail).await.unwrap();
    let frame = tokio::time::timeout(
        Duration::from_secs(2),
        read_raw_frame(&mut stream, &mut dec),
    )
    .await
    .unwrap();
    let resp: RpcResponse = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(resp.id, RequestId::Number(7));
    assert_eq!(resp.into_result().unwrap(), json!({"partial": true}));

    server.shutdown().await;
}

#[tokio::test]
async fn heartbeat_frames_are_echoed() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let Endpoint::Unix(path) = &endpoint else {
        panic!("expected unix endpoint")
    };

    let mut stream = UnixStream::connect(path).await.unwrap();
    let wire = encode_frame(&Frame::heartbeat(), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    stream.write_all(&wire).await.unwrap();

    let mut dec = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
    let frame = read_raw_frame(&mut stream, &mut dec).await;
    assert_eq!(frame, Frame::heartbeat());

    server.shutdown().await;
}

#[tokio::test]
async fn notifications_receive_no_response() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let Endpoint::Unix(path) = &endpoint else {
        panic!("expected unix endpoint")
    };

    let mut stream = UnixStream::connect(path).await.unwrap();
    let note = serde_json::to_vec(&RpcRequest::notification("echo", json!(1))).unwrap();
    let mut wire =
        encode_frame(&Frame::new(FrameKind::Notification, note), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    // Follow with a request; the only response must be for the request.
    wire.extend(raw_request(9, "echo", json!("after")));
    stream.write_all(&wire).await.unwrap();

    let mut dec = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
    let frame = read_raw_frame(&mut stream, &mut dec).await;
    let resp: RpcResponse = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(resp.id, RequestId::Number(9));

    server.shutdown().await;
}

#[tokio::test]
async fn oversize_payload_triggers_invalid_request() {
    let dir = tempdir().unwrap();
    let endpoint = Endpoint::Unix(dir.path().join("big.sock"));
    let mut config = ServerConfig::new(endpoint.clone());
    config.max_message_size = 64;
    let server = RpcServer::bind(config, test_methods()).await.unwrap();

    let Endpoint::Unix(path) = &endpoint else {
        panic!("expected unix endpoint")
    };
    let mut stream = UnixStream::connect(path).await.unwrap();

    // Header declares a 1 KiB payload against a 64-byte limit.
    let mut wire = vec![FrameKind::Request.as_u8()];
    wire.extend_from_slice(&1024u32.to_be_bytes());
    stream.write_all(&wire).await.unwrap();

    let mut dec = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
    let frame = read_raw_frame(&mut stream, &mut dec).await;
    let resp: RpcResponse = serde_json::from_slice(&frame.payload).unwrap();
    let err = resp.into_result().unwrap_err();
    assert_eq!(err.code, codes::INVALID_REQUEST);
    assert!(err.message.contains("too large"));

    server.shutdown().await;
}

#[tokio::test]
async fn tcp_endpoint_works_end_to_end() {
    let endpoint = Endpoint::Tcp("127.0.0.1:0".parse().unwrap());
    let server = RpcServer::bind(ServerConfig::new(endpoint), test_methods())
        .await
        .unwrap();
    let bound = server.local_endpoint().clone();

    let client = client_for(&bound).await;
    let sum = client.call("add", json!({"a": 20, "b": 22})).await.unwrap();
    assert_eq!(sum, json!(42));

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_removes_unix_socket_file() {
    let dir = tempdir().unwrap();
    let (server, endpoint) = start_server(dir.path()).await;
    let Endpoint::Unix(path) = endpoint else {
        panic!("expected unix endpoint")
    };
    assert!(path.exists());
    server.shutdown().await;
    assert!(!path.exists());
}
