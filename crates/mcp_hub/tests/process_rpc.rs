//! Process handle behavior: correlation, timeouts, framing, shutdown.

mod support;

use std::time::Duration;

use mcp_hub::{HubError, ProcessHandle, SpawnOptions};
use serde_json::{json, Value};
use tokio::time;

async fn spawn_fake(extra_env: &[(&str, &str)]) -> (tempfile::TempDir, ProcessHandle) {
    let (dir, path) = support::write_fake_server();
    let mut env = support::base_env();
    for (key, value) in extra_env {
        env.insert(key.to_string(), value.to_string());
    }
    let handle = ProcessHandle::spawn(SpawnOptions {
        command: path.to_string_lossy().into_owned(),
        args: Vec::new(),
        env,
        cwd: None,
    })
    .await
    .expect("spawn fake server");
    (dir, handle)
}

fn call_params(tool: &str, arguments: Value) -> Value {
    json!({ "name": tool, "arguments": arguments })
}

fn first_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("text part")
}

#[tokio::test]
async fn responses_are_correlated_by_id_not_arrival_order() {
    let (_dir, handle) = spawn_fake(&[]).await;

    let slow = handle.call(
        "tools/call",
        call_params("sleep_ms", json!({"ms": 400, "tag": "slow"})),
        Duration::from_secs(5),
    );
    let fast = handle.call(
        "tools/call",
        call_params("echo", json!({"tag": "fast"})),
        Duration::from_secs(5),
    );

    let (slow, fast) = tokio::join!(slow, fast);
    let slow = slow.expect("slow result");
    let fast = fast.expect("fast result");

    assert!(first_text(&slow).contains("\"tag\": \"slow\""));
    assert!(first_text(&fast).contains("\"tag\": \"fast\""));
}

#[tokio::test]
async fn timed_out_calls_free_their_slot_and_later_calls_succeed() {
    let (_dir, handle) = spawn_fake(&[]).await;

    let err = handle
        .call(
            "tools/call",
            call_params("sleep_ms", json!({"ms": 2000})),
            Duration::from_millis(100),
        )
        .await
        .expect_err("deadline must trip");
    assert!(matches!(err, HubError::Timeout(_)));

    // The late response for the timed-out id is discarded; the handle
    // keeps serving new calls.
    let result = handle
        .call(
            "tools/call",
            call_params("echo", json!({"after": "timeout"})),
            Duration::from_secs(5),
        )
        .await
        .expect("handle still healthy");
    assert!(first_text(&result).contains("after"));
}

#[tokio::test]
async fn child_death_fails_in_flight_calls_with_child_gone() {
    let (_dir, handle) = spawn_fake(&[]).await;

    let err = handle
        .call(
            "tools/call",
            call_params("crash", json!({})),
            Duration::from_secs(5),
        )
        .await
        .expect_err("child exits without replying");
    assert!(matches!(err, HubError::ChildGone));
}

#[tokio::test]
async fn non_json_stdout_lines_are_diverted_not_fatal() {
    let (_dir, handle) = spawn_fake(&[("FAKE_EMIT_GARBAGE", "1")]).await;

    let result = handle
        .call("tools/list", json!({}), Duration::from_secs(5))
        .await
        .expect("list tools despite garbage line");
    assert!(result["tools"].as_array().is_some_and(|t| !t.is_empty()));
    assert!(handle.stderr_tail().contains("not json at all"));
}

#[tokio::test]
async fn stderr_output_is_captured_in_the_ring_buffer() {
    let (_dir, handle) = spawn_fake(&[]).await;

    // The banner is written before the server answers anything.
    let _ = handle
        .call("tools/list", json!({}), Duration::from_secs(5))
        .await
        .expect("list tools");
    assert!(handle.stderr_tail().contains("fake-mcp-server booting"));
}

#[tokio::test]
async fn protocol_errors_surface_code_and_message() {
    let (_dir, handle) = spawn_fake(&[]).await;

    let err = handle
        .call(
            "tools/call",
            call_params("no_such_tool", json!({})),
            Duration::from_secs(5),
        )
        .await
        .expect_err("unknown tool");
    match err {
        HubError::Rpc { code, message, .. } => {
            assert_eq!(code, -32602);
            assert!(message.contains("no_such_tool"));
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn notifications_need_no_correlation() {
    let (_dir, handle) = spawn_fake(&[]).await;

    handle
        .notify("notifications/initialized", Value::Null)
        .expect("notify");
    let result = handle
        .call("tools/list", json!({}), Duration::from_secs(5))
        .await
        .expect("list after notify");
    assert_eq!(result["tools"].as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn shutdown_reaps_the_child_and_fails_stragglers() {
    let (_dir, handle) = spawn_fake(&[]).await;

    let pending = handle.call(
        "tools/call",
        call_params("sleep_ms", json!({"ms": 10_000})),
        Duration::from_secs(30),
    );
    let shutdown = async {
        // Give the pending call a head start so it is registered.
        time::sleep(Duration::from_millis(100)).await;
        handle.shutdown(Duration::from_secs(2)).await
    };

    let (pending, status) = tokio::join!(pending, shutdown);
    assert!(matches!(pending, Err(HubError::ChildGone)));
    // Closing stdin ends the fake server's read loop promptly.
    assert!(status.is_some());

    let err = handle
        .call("tools/list", json!({}), Duration::from_secs(1))
        .await
        .expect_err("handle is closed");
    assert!(matches!(err, HubError::ChildGone | HubError::Timeout(_)));
}

#[tokio::test]
async fn spawn_failure_is_reported_not_panicked() {
    let err = ProcessHandle::spawn(SpawnOptions {
        command: "/nonexistent/mcp-server-binary".to_string(),
        args: Vec::new(),
        env: support::base_env(),
        cwd: None,
    })
    .await
    .expect_err("missing executable");
    assert!(matches!(err, HubError::Spawn { .. }));
}
