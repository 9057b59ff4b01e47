//! End-to-end tests for the native messaging host.

use serde_json::{json, Value};
use std::sync::Arc;
use step_recorder::host::{self, read_message};
use step_recorder::{CaptureSession, Config, NullCapture};
use tokio::io::{AsyncWriteExt, DuplexStream};

async fn send(stream: &mut DuplexStream, message: Value) {
    let body = serde_json::to_vec(&message).unwrap();
    stream
        .write_all(&(body.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stream.write_all(&body).await.unwrap();
}

async fn receive(stream: &mut DuplexStream) -> Value {
    let buffer = read_message(stream).await.unwrap().expect("response");
    serde_json::from_slice(&buffer).unwrap()
}

fn spawn_host() -> (DuplexStream, DuplexStream, tokio::task::JoinHandle<()>) {
    let session = CaptureSession::from_config(&Config::default(), Arc::new(NullCapture));
    let (to_host, host_in) = tokio::io::duplex(64 * 1024);
    let (host_out, from_host) = tokio::io::duplex(64 * 1024);

    let handle = tokio::spawn(async move {
        host::run(session, host_in, host_out).await.unwrap();
    });
    (to_host, from_host, handle)
}

#[tokio::test(start_paused = true)]
async fn test_record_session_over_native_messaging() {
    let (mut to_host, mut from_host, handle) = spawn_host();

    send(&mut to_host, json!({"type": "start"})).await;
    let started = receive(&mut from_host).await;
    assert_eq!(started["type"], "ok");
    assert!(started["sessionId"].is_string());

    send(
        &mut to_host,
        json!({
            "type": "action",
            "capture": false,
            "record": {
                "kind": "input",
                "url": "https://example.com/signup",
                "subjectPath": "#email",
                "value": "ada@example.com",
                "timestamp": 1000
            }
        }),
    )
    .await;
    let queued = receive(&mut from_host).await;
    assert_eq!(queued["type"], "ok");
    assert_eq!(queued["stepCount"], 1);

    // Stop right away: the pending input must still be committed
    send(&mut to_host, json!({"type": "stop"})).await;
    let stopped = receive(&mut from_host).await;
    assert_eq!(stopped["type"], "steps");
    let steps = stopped["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["kind"], "input");
    assert_eq!(steps[0]["value"], "ada@example.com");
    assert_eq!(steps[0]["instruction"], "Type \"ada@example.com\" in #email");
    assert!(steps[0]["artifact"].is_null());

    drop(to_host);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_messages_get_error_responses() {
    let (mut to_host, mut from_host, handle) = spawn_host();

    send(&mut to_host, json!({"type": "unknown"})).await;
    let response = receive(&mut from_host).await;
    assert_eq!(response["type"], "error");

    send(&mut to_host, json!({"type": "ping"})).await;
    assert_eq!(receive(&mut from_host).await["type"], "pong");

    drop(to_host);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_action_without_kind_is_recorded_as_other() {
    let (mut to_host, mut from_host, handle) = spawn_host();

    send(&mut to_host, json!({"type": "start"})).await;
    receive(&mut from_host).await;

    send(
        &mut to_host,
        json!({"type": "action", "capture": false, "record": {"url": "https://example.com"}}),
    )
    .await;
    receive(&mut from_host).await;

    send(&mut to_host, json!({"type": "stop"})).await;
    let stopped = receive(&mut from_host).await;
    let steps = stopped["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["kind"], "other");
    assert!(steps[0]["timestamp"].as_i64().unwrap() > 0);

    send(&mut to_host, json!({"type": "status"})).await;
    let status = receive(&mut from_host).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["status"]["active"], false);
    assert_eq!(status["status"]["steps"], 1);

    send(&mut to_host, json!({"type": "clear"})).await;
    assert_eq!(receive(&mut from_host).await["applied"], true);

    send(&mut to_host, json!({"type": "steps"})).await;
    let listed = receive(&mut from_host).await;
    assert_eq!(listed["steps"].as_array().unwrap().len(), 0);

    drop(to_host);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_actions_while_idle_are_dropped() {
    let (mut to_host, mut from_host, handle) = spawn_host();

    send(
        &mut to_host,
        json!({"type": "action", "record": {"kind": "click", "url": "https://example.com"}}),
    )
    .await;
    let response = receive(&mut from_host).await;
    assert_eq!(response["stepCount"], 0);

    drop(to_host);
    handle.await.unwrap();
}
