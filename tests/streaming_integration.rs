//! Integration tests for SSE streaming via message/stream.
//!
//! These tests verify that the server correctly streams SSE events
//! for streaming requests.

mod common;

use common::{start_test_server, EchoBackend};
use std::sync::Arc;

/// Test that message/stream returns an SSE response with proper content type.
#[tokio::test]
async fn message_stream_returns_sse() {
    let (base_url, _handle) = start_test_server(Arc::new(EchoBackend)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/stream",
        "params": {
            "message": {
                "messageId": "m1",
                "role": "user",
                "parts": [{"kind": "text", "text": "Stream this"}]
            }
        }
    });

    let resp = client
        .post(format!("{}/a2a", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);

    // Should be an SSE response (text/event-stream)
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(
        content_type.contains("text/event-stream"),
        "Expected text/event-stream, got: {}",
        content_type
    );

    // Read the full body as text and verify it contains SSE data frames
    let body = resp.text().await.unwrap();
    assert!(body.contains("data:"), "Expected SSE data frames in body: {}", body);
}

/// Parse SSE `data:` frames from the raw text body into parsed JSON values.
/// Each event is framed as a single `data: <json>` line followed by a blank line;
/// there is no separate `event:` line, so the event kind lives in the JSON payload.
fn parse_sse_data_frames(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).expect("SSE data frame should be valid JSON"))
        .collect()
}

/// Test that SSE stream includes a working status-update and a final status-update.
#[tokio::test]
async fn message_stream_contains_status_events() {
    let (base_url, _handle) = start_test_server(Arc::new(EchoBackend)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/stream",
        "params": {
            "message": {
                "messageId": "m1",
                "role": "user",
                "parts": [{"kind": "text", "text": "Hello streaming"}]
            }
        }
    });

    let resp = client
        .post(format!("{}/a2a", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();

    let raw_body = resp.text().await.unwrap();
    let frames = parse_sse_data_frames(&raw_body);

    let status_updates: Vec<_> = frames
        .iter()
        .filter(|f| f["result"]["kind"] == "status-update")
        .collect();

    assert!(
        !status_updates.is_empty(),
        "Expected at least one status-update frame in SSE stream: {}",
        raw_body
    );
    assert!(
        status_updates.iter().any(|f| f["result"]["final"] == true),
        "Expected a final status-update frame in SSE stream: {}",
        raw_body
    );
}

/// Test that SSE stream from the echo backend contains artifact-update events.
#[tokio::test]
async fn message_stream_with_artifacts() {
    let (base_url, _handle) = start_test_server(Arc::new(EchoBackend)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/stream",
        "params": {
            "message": {
                "messageId": "m1",
                "role": "user",
                "parts": [{"kind": "text", "text": "Stream with artifacts"}]
            }
        }
    });

    let resp = client
        .post(format!("{}/a2a", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();

    let raw_body = resp.text().await.unwrap();
    let frames = parse_sse_data_frames(&raw_body);

    assert!(
        frames.iter().any(|f| f["result"]["kind"] == "artifact-update"),
        "Expected artifact-update frame in SSE stream: {}",
        raw_body
    );
}

/// Test that SSE events are properly formatted JSON-RPC envelopes.
#[tokio::test]
async fn sse_events_have_valid_json_data() {
    let (base_url, _handle) = start_test_server(Arc::new(EchoBackend)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/stream",
        "params": {
            "message": {
                "messageId": "m1",
                "role": "user",
                "parts": [{"kind": "text", "text": "Test JSON parsing"}]
            }
        }
    });

    let resp = client
        .post(format!("{}/a2a", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();

    let raw_body = resp.text().await.unwrap();
    let frames = parse_sse_data_frames(&raw_body);

    assert!(!frames.is_empty(), "Expected at least one SSE data frame");

    for json in &frames {
        assert_eq!(json["jsonrpc"], "2.0", "Expected JSON-RPC 2.0 envelope");
        assert!(
            json["result"].is_object(),
            "Expected 'result' field in envelope"
        );

        let result = &json["result"];
        if result["kind"] == "status-update" {
            assert!(result["taskId"].is_string());
            assert!(result["contextId"].is_string());
            assert!(result["status"]["state"].is_string());
        }
    }
}

/// Test that the final status-update event has final=true.
#[tokio::test]
async fn sse_final_event_has_final_true() {
    let (base_url, _handle) = start_test_server(Arc::new(EchoBackend)).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "message/stream",
        "params": {
            "message": {
                "messageId": "m1",
                "role": "user",
                "parts": [{"kind": "text", "text": "Check final flag"}]
            }
        }
    });

    let resp = client
        .post(format!("{}/a2a", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();

    let raw_body = resp.text().await.unwrap();
    let frames = parse_sse_data_frames(&raw_body);

    let status_updates: Vec<_> = frames
        .iter()
        .filter(|f| f["result"]["kind"] == "status-update")
        .collect();

    assert!(
        !status_updates.is_empty(),
        "Expected at least one status-update event"
    );

    let last_update = status_updates.last().unwrap();
    assert_eq!(
        last_update["result"]["final"], true,
        "Last status-update event should have final=true"
    );
}
