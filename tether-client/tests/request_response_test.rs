//! Integration tests for request/response correlation

mod common;

use common::*;
use serde_json::{json, Value};
use std::time::Duration;
use tether_client::{Connection, Reply};
use tether_core::{Error, Id, JsonRpcResponse, SendError};

#[tokio::test]
async fn test_send_message_correlates_response() {
    let server = MockWsServer::with_handler(|request| {
        vec![Action::Send(mock_response(
            &request["id"],
            json!({"echo": request["params"]}),
        ))]
    })
    .await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let reply = conn
        .send_message(json!({"jsonrpc": "2.0", "id": 7, "method": "public/echo", "params": {"x": 1}}))
        .await
        .unwrap();

    assert_eq!(
        reply,
        Reply::Response(JsonRpcResponse::success(json!({"echo": {"x": 1}}), Id::Number(7)))
    );
    conn.close().await;
}

#[tokio::test]
async fn test_message_without_id_is_acknowledged() {
    let mut server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let reply = conn
        .send_message(json!({"jsonrpc": "2.0", "method": "public/hello", "params": {}}))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Ack);

    let received = server.wait_for_message().await.unwrap();
    assert_eq!(received["method"], "public/hello");
    conn.close().await;
}

#[tokio::test]
async fn test_request_deserializes_result() {
    let server = MockWsServer::with_handler(|request| {
        vec![Action::Send(mock_response(&request["id"], json!(1_700_000_000_000u64)))]
    })
    .await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let time: u64 = conn.request("public/get_time", json!({})).await.unwrap();
    assert_eq!(time, 1_700_000_000_000);
    conn.close().await;
}

#[tokio::test]
async fn test_request_surfaces_peer_error() {
    let server = MockWsServer::with_handler(|request| {
        vec![Action::Send(mock_error_response(
            &request["id"],
            13009,
            "unauthorized",
        ))]
    })
    .await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let err = conn
        .request::<_, Value>("private/get_positions", json!({"currency": "BTC"}))
        .await
        .unwrap_err();

    match err {
        Error::JsonRpc(data) => {
            assert_eq!(data.code, 13009);
            assert_eq!(data.message, "unauthorized");
        }
        other => panic!("expected peer error, got {:?}", other),
    }
    conn.close().await;
}

#[tokio::test]
async fn test_request_timeout_clears_pending() {
    let server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let err = conn
        .send_message_with_timeout(
            json!({"jsonrpc": "2.0", "id": 1, "method": "public/slow"}),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

    assert_eq!(err, SendError::Timeout);
    assert!(conn.status().await.pending.is_empty());
    assert!(conn.is_connected());
    conn.close().await;
}

#[tokio::test]
async fn test_duplicate_response_delivered_once() {
    let server = MockWsServer::with_handler(|request| {
        let response = mock_response(&request["id"], json!("first"));
        vec![
            Action::Send(response),
            Action::Send(mock_response(&request["id"], json!("second"))),
        ]
    })
    .await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let reply = conn
        .send_message(json!({"jsonrpc": "2.0", "id": 1, "method": "public/test"}))
        .await
        .unwrap();
    let response = reply.into_response().unwrap();
    assert_eq!(response.result, Some(json!("first")));

    // the second copy is dropped without disturbing later requests
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.status().await.pending.is_empty());

    let value: String = conn.request("public/test", json!({})).await.unwrap();
    assert_eq!(value, "first");
    conn.close().await;
}

#[tokio::test]
async fn test_duplicate_outstanding_id_is_rejected() {
    let server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let first = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.send_message_with_timeout(
                json!({"jsonrpc": "2.0", "id": "abc", "method": "public/slow"}),
                Duration::from_millis(500),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = conn
        .send_message(json!({"jsonrpc": "2.0", "id": "abc", "method": "public/slow"}))
        .await
        .unwrap_err();
    assert_eq!(err, SendError::DuplicateId(Id::String("abc".into())));

    assert_eq!(first.await.unwrap().unwrap_err(), SendError::Timeout);
    conn.close().await;
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let mut calls = Vec::new();
    for id in 1..=3 {
        let conn = conn.clone();
        calls.push(tokio::spawn(async move {
            conn.send_message(json!({"jsonrpc": "2.0", "id": id, "method": "public/test"}))
                .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(conn.status().await.pending.len(), 3);

    for id in [3, 1, 2] {
        server.push(mock_response(&json!(id), json!(id * 10)));
    }

    for (i, call) in calls.into_iter().enumerate() {
        let response = call.await.unwrap().unwrap().into_response().unwrap();
        let id = i as i64 + 1;
        assert_eq!(response.id, Id::Number(id));
        assert_eq!(response.result, Some(json!(id * 10)));
    }
    conn.close().await;
}

#[tokio::test]
async fn test_batch_response_resolves_each_request() {
    let server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let a = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.request::<_, i64>("public/a", json!({})).await })
    };
    let b = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.request::<_, i64>("public/b", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pending = conn.status().await.pending;
    assert_eq!(pending.len(), 2);
    let batch: Vec<Value> = pending
        .iter()
        .map(|p| {
            let Id::Number(n) = p.id else { panic!("numeric id expected") };
            json!({"jsonrpc": "2.0", "id": n, "result": n * 100})
        })
        .collect();
    server.push(Value::Array(batch).to_string());

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a % 100, 0);
    assert_eq!(b % 100, 0);
    assert_ne!(a, b);
    conn.close().await;
}

#[tokio::test]
async fn test_invalid_id_type_is_rejected_locally() {
    let mut server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let err = conn
        .send_message(json!({"jsonrpc": "2.0", "id": {"nested": true}, "method": "public/test"}))
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::EncodeFailed(_)));

    conn.notify("public/marker", json!({})).await.unwrap();
    let first = server.wait_for_message().await.unwrap();
    assert_eq!(first["method"], "public/marker");
    conn.close().await;
}

#[tokio::test]
async fn test_unbounded_timeout_keeps_connection_usable() {
    let server = MockWsServer::with_handler(|request| match request["method"].as_str() {
        Some("public/hang") => Vec::new(),
        _ => respond_ok(request),
    })
    .await;
    let conn = Connection::connect(
        &server.url(),
        fast_config().with_request_timeout(Duration::MAX),
    )
    .await
    .unwrap();

    let hanging = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.send_message_with_timeout(
                json!({"jsonrpc": "2.0", "id": "forever", "method": "public/hang"}),
                Duration::MAX,
            )
            .await
        })
    };
    let defaulted = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.send_message(json!({"jsonrpc": "2.0", "id": "default", "method": "public/hang"}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(conn.is_connected());
    let pending = conn.status().await.pending;
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|p| p.remaining > Duration::from_secs(86400)));

    let value: String = conn.request("public/test", json!({})).await.unwrap();
    assert_eq!(value, "ok");

    conn.close().await;
    assert_eq!(hanging.await.unwrap().unwrap_err(), SendError::ConnectionClosed);
    assert_eq!(defaulted.await.unwrap().unwrap_err(), SendError::ConnectionClosed);
}

#[tokio::test]
async fn test_batch_with_malformed_element_resolves_the_rest() {
    let server = MockWsServer::with_handler(silent).await;
    let conn = Connection::connect(&server.url(), fast_config()).await.unwrap();

    let mut calls = Vec::new();
    for id in 1..=2 {
        let conn = conn.clone();
        calls.push(tokio::spawn(async move {
            conn.send_message_with_timeout(
                json!({"jsonrpc": "2.0", "id": id, "method": "public/test"}),
                Duration::from_secs(2),
            )
            .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(conn.status().await.pending.len(), 2);

    server.push(
        json!([
            {"jsonrpc": "2.0", "id": 1, "result": "valid-for-1"},
            {"jsonrpc": "2.0", "id": 2}
        ])
        .to_string(),
    );

    let second = calls.pop().unwrap().await.unwrap();
    let first = calls.pop().unwrap().await.unwrap();

    let response = first.unwrap().into_response().unwrap();
    assert_eq!(response.result, Some(json!("valid-for-1")));
    assert!(matches!(second, Err(SendError::DecodeFailed(_))));

    assert!(conn.status().await.pending.is_empty());
    assert!(conn.is_connected());
    conn.close().await;
}
