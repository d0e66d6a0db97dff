//! A2A server core — task store, broadcaster, conversation registry, request
//! dispatch, and the axum HTTP/SSE wiring.
//!
//! - [`task_store`] — per-task state machine, pagination, TTL eviction
//! - [`broadcaster`] — per-task fan-out of SSE payloads to N subscribers
//! - [`conversation`] — [`ConversationBackend`] seam + per-context registry
//! - [`request_handler`] — the six JSON-RPC methods this crate serves
//! - [`lifecycle`] — [`ServerOptions`] and the background eviction loop
//! - [`axum_integration`] — [`a2a_router`], the ready-made HTTP routes
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use a2a_server_core::server::{
//!     a2a_router, ConversationBackend, DefaultRequestHandler, InMemoryTaskStore, SendOutcome,
//! };
//! use a2a_server_core::AgentCardBuilder;
//! use a2a_server_core::error::A2AResult;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct EchoBackend;
//!
//! #[async_trait]
//! impl ConversationBackend for EchoBackend {
//!     async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
//!         Ok(SendOutcome::text(format!("Echo: {text}")))
//!     }
//! }
//!
//! let card = AgentCardBuilder::new("Echo Agent", "Echoes messages back", "1.0.0").build();
//! let store = Arc::new(InMemoryTaskStore::new());
//! let handler = Arc::new(DefaultRequestHandler::new(
//!     store,
//!     Default::default(),
//!     Arc::new(|_context_id: &str| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>)),
//! ));
//! let app = a2a_router(handler, card);
//! ```

pub mod axum_integration;
pub mod broadcaster;
pub mod conversation;
pub mod lifecycle;
pub mod request_handler;
pub mod task_store;

pub use axum_integration::{a2a_router, a2a_router_with_options};
pub use broadcaster::{Broadcaster, BroadcasterRegistry, DEFAULT_SUBSCRIBER_CAPACITY};
pub use conversation::{
    Chunk, ChunkStream, ConversationBackend, ConversationOpener, ConversationRegistry, SendOutcome,
};
pub use lifecycle::{shutdown, spawn_eviction_task, ServerOptions};
pub use request_handler::{
    BroadcastSubscription, CancelTaskParams, DefaultRequestHandler, GetTaskParams,
    ListTasksParams, ListTasksResponse, RequestHandler, SendMessageConfiguration,
    SendMessageParams, StreamHandle, SubscribeToTaskParams, SubscriptionOutcome,
    DEFAULT_PAGE_SIZE,
};
pub use task_store::{InMemoryTaskStore, TaskListParams, TaskStore};
