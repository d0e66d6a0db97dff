//! Axum integration — ready-made HTTP routes for A2A servers.
//!
//! - `GET /.well-known/agent.json` — agent card discovery
//! - `POST /a2a` — JSON-RPC 2.0 dispatch for the six methods this crate serves
//!
//! Decoding and dispatch are handled by hand rather than via axum's `Json`
//! extractor, so a malformed body maps to JSON-RPC `-32700` (not a generic
//! 400) and each method can report `-32602` against its own params shape.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::http::HeaderValue;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, warn};

use crate::error::{self, A2AError};
use crate::types::{AgentCard, JsonRpcError as A2AJsonRpcError, Message, StreamResponse};

use super::lifecycle::ServerOptions;
use super::request_handler::{
    CancelTaskParams, GetTaskParams, ListTasksParams, RequestHandler, SendMessageConfiguration,
    SendMessageParams, SubscribeToTaskParams, SubscriptionOutcome,
};

struct AppState {
    handler: Arc<dyn RequestHandler>,
    agent_card: AgentCard,
}

/// Build the router with default [`ServerOptions`] (only `max_body_size` is
/// consulted here — the rest govern handler-side behavior already baked into
/// `handler`).
pub fn a2a_router(handler: Arc<dyn RequestHandler>, agent_card: AgentCard) -> Router {
    a2a_router_with_options(handler, agent_card, ServerOptions::default())
}

/// Build the router, applying `options.max_body_size` as a
/// [`RequestBodyLimitLayer`] on `POST /a2a`.
pub fn a2a_router_with_options(
    handler: Arc<dyn RequestHandler>,
    agent_card: AgentCard,
    options: ServerOptions,
) -> Router {
    let state = Arc::new(AppState {
        handler,
        agent_card,
    });

    Router::new()
        .route("/.well-known/agent.json", get(handle_agent_card))
        .route(
            "/a2a",
            post(handle_jsonrpc).layer(RequestBodyLimitLayer::new(options.max_body_size)),
        )
        .with_state(state)
}

async fn handle_agent_card(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(&state.agent_card)
}

#[derive(Debug, serde::Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<A2AJsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(A2AJsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    fn from_a2a_error(id: Option<Value>, err: A2AError) -> Self {
        let rpc_err: A2AJsonRpcError = err.into();
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(rpc_err),
        }
    }
}

fn json_error(id: Option<Value>, code: i64, message: impl Into<String>) -> Response {
    Json(JsonRpcResponse::error(id, code, message.into())).into_response()
}

fn json_a2a_error(id: Option<Value>, err: A2AError) -> Response {
    Json(JsonRpcResponse::from_a2a_error(id, err)).into_response()
}

fn json_result(id: Option<Value>, value: impl serde::Serialize) -> Response {
    match serde_json::to_value(&value) {
        Ok(v) => Json(JsonRpcResponse::success(id, v)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize JSON-RPC result");
            json_error(id, error::INTERNAL_ERROR, format!("internal error: {e}"))
        }
    }
}

/// `POST /a2a` entry point: decode, dispatch, respond.
async fn handle_jsonrpc(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Failed to parse JSON-RPC request body");
            return json_error(None, error::PARSE_ERROR, format!("parse error: {e}"));
        }
    };

    if request.jsonrpc != "2.0" {
        warn!(jsonrpc = %request.jsonrpc, "Rejecting non-2.0 JSON-RPC request");
        return json_error(
            request.id,
            error::INVALID_REQUEST,
            format!("unsupported jsonrpc version: {}", request.jsonrpc),
        );
    }

    debug!(method = %request.method, "JSON-RPC request received");

    match request.method.as_str() {
        "message/send" => handle_message_send(state, request).await,
        "message/stream" => handle_message_stream(state, request).await,
        "tasks/get" => handle_tasks_get(state, request).await,
        "tasks/cancel" => handle_tasks_cancel(state, request).await,
        "tasks/list" => handle_tasks_list(state, request).await,
        "tasks/subscribe" => handle_tasks_subscribe(state, request).await,
        method => {
            warn!(method = %method, "Unknown JSON-RPC method");
            json_error(
                request.id,
                error::METHOD_NOT_FOUND,
                format!("method not found: {method}"),
            )
        }
    }
}

fn parse_send_message_params(params: Value) -> Result<SendMessageParams, String> {
    let obj = params.as_object().ok_or("params must be an object")?;

    let message: Message = serde_json::from_value(
        obj.get("message")
            .cloned()
            .ok_or("missing 'message' field")?,
    )
    .map_err(|e| format!("invalid message: {e}"))?;

    let configuration = obj
        .get("configuration")
        .filter(|v| !v.is_null())
        .map(|v| parse_send_config(v.clone()))
        .transpose()?;

    Ok(SendMessageParams {
        message,
        configuration,
    })
}

fn parse_send_config(value: Value) -> Result<SendMessageConfiguration, String> {
    let obj = value.as_object().ok_or("configuration must be an object")?;
    Ok(SendMessageConfiguration {
        blocking: obj.get("blocking").and_then(|v| v.as_bool()),
    })
}

fn parse_id_param(params: Value) -> Result<String, String> {
    let obj = params.as_object().ok_or("params must be an object")?;
    obj.get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| "missing 'id' field".to_string())
}

fn parse_list_tasks_params(params: Value) -> Result<ListTasksParams, String> {
    if params.is_null() {
        return Ok(ListTasksParams::default());
    }
    let obj = params.as_object().ok_or("params must be an object")?;
    let context_id = obj
        .get("contextId")
        .and_then(|v| v.as_str().map(String::from));
    let page_size = obj.get("pageSize").and_then(|v| v.as_i64());
    Ok(ListTasksParams {
        context_id,
        page_size,
    })
}

async fn handle_message_send(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params = match parse_send_message_params(request.params) {
        Ok(p) => p,
        Err(e) => {
            return json_error(
                request.id,
                error::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        }
    };

    match state.handler.on_message_send(params).await {
        Ok(task) => json_result(request.id, task),
        Err(e) => json_a2a_error(request.id, e),
    }
}

async fn handle_message_stream(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params = match parse_send_message_params(request.params) {
        Ok(p) => p,
        Err(e) => {
            return json_error(
                request.id,
                error::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        }
    };

    match state.handler.on_message_stream(params).await {
        Ok(handle) => sse_response(request.id, handle.subscription),
        Err(e) => json_a2a_error(request.id, e),
    }
}

async fn handle_tasks_get(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let id = match parse_id_param(request.params) {
        Ok(id) => id,
        Err(e) => {
            return json_error(
                request.id,
                error::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        }
    };

    match state.handler.on_get_task(GetTaskParams { id }).await {
        Ok(task) => json_result(request.id, task),
        Err(e) => json_a2a_error(request.id, e),
    }
}

async fn handle_tasks_cancel(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let id = match parse_id_param(request.params) {
        Ok(id) => id,
        Err(e) => {
            return json_error(
                request.id,
                error::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        }
    };

    match state.handler.on_cancel_task(CancelTaskParams { id }).await {
        Ok(task) => json_result(request.id, task),
        Err(e) => json_a2a_error(request.id, e),
    }
}

async fn handle_tasks_list(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let params = match parse_list_tasks_params(request.params) {
        Ok(p) => p,
        Err(e) => {
            return json_error(
                request.id,
                error::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        }
    };

    match state.handler.on_list_tasks(params).await {
        Ok(response) => {
            let mut result = serde_json::Map::new();
            result.insert(
                "tasks".to_string(),
                serde_json::to_value(&response.tasks).unwrap_or(Value::Null),
            );
            result.insert(
                "pageSize".to_string(),
                Value::from(response.page_size as u64),
            );
            json_result(request.id, Value::Object(result))
        }
        Err(e) => json_a2a_error(request.id, e),
    }
}

async fn handle_tasks_subscribe(state: Arc<AppState>, request: JsonRpcRequest) -> Response {
    let id = match parse_id_param(request.params) {
        Ok(id) => id,
        Err(e) => {
            return json_error(
                request.id,
                error::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        }
    };

    match state.handler.on_subscribe_to_task(SubscribeToTaskParams { id }).await {
        Ok(SubscriptionOutcome::Live(subscription)) => sse_response(request.id, subscription),
        Ok(SubscriptionOutcome::Snapshot(event)) => {
            sse_response(request.id, stream::once(async move { event }))
        }
        Err(e) => json_a2a_error(request.id, e),
    }
}

/// Frame a `StreamResponse` source as an SSE response: each item becomes one
/// `data: <json-encoded JSON-RPC response>\n\n` event, with the transport
/// headers §6 calls for set on the response.
fn sse_response<S>(request_id: Option<Value>, source: S) -> Response
where
    S: Stream<Item = StreamResponse> + Send + 'static,
{
    let stream = event_stream(request_id, source);
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();

    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn event_stream<S>(
    request_id: Option<Value>,
    source: S,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = StreamResponse> + Send + 'static,
{
    async_stream::stream! {
        tokio::pin!(source);
        while let Some(event) = source.next().await {
            match serde_json::to_value(&event) {
                Ok(result) => {
                    let rpc_response = JsonRpcResponse::success(request_id.clone(), result);
                    match serde_json::to_string(&rpc_response) {
                        Ok(json) => yield Ok(Event::default().data(json)),
                        Err(e) => error!(error = %e, "Failed to serialize SSE JSON-RPC response"),
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize SSE event"),
            }
        }
    }
}
