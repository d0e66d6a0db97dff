//! # a2a-server-core — Rust server core for the Agent-to-Agent (A2A) protocol
//!
//! This crate implements the server half of the
//! [A2A protocol](https://a2a-protocol.org/latest/specification/): it exposes
//! long-lived, stateful conversations as remote agents over JSON-RPC 2.0 with
//! Server-Sent Event (SSE) streaming.
//!
//! It composes:
//! - a per-task state machine with strict transition rules ([`server::task_store`]),
//! - a fan-out broadcaster multiplexing one live stream to N late subscribers
//!   ([`server::broadcaster`]),
//! - a conversation-per-context registry with idle-TTL eviction
//!   ([`server::conversation`]),
//! - cancellation and cleanup across the HTTP request, background send, and
//!   live stream lifetimes,
//! - translation of a conversation backend's chunked output into A2A-compliant
//!   artifact and status events ([`server::request_handler`]).
//!
//! Agent logic is supplied externally by implementing [`server::ConversationBackend`];
//! this crate does not ship prompt loading, LLM provider clients, or a CLI.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use a2a_server_core::server::{
//!     a2a_router, ConversationBackend, DefaultRequestHandler, InMemoryTaskStore, SendOutcome,
//! };
//! use a2a_server_core::AgentCardBuilder;
//! use a2a_server_core::error::A2AResult;
//! use async_trait::async_trait;
//! use std::sync::Arc;
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
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let card = AgentCardBuilder::new("Echo Agent", "Echoes messages back", "1.0.0")
//!         .with_jsonrpc_interface("http://localhost:3000/a2a")
//!         .build();
//!
//!     let store = Arc::new(InMemoryTaskStore::new());
//!     let handler = Arc::new(DefaultRequestHandler::new(
//!         store,
//!         Default::default(),
//!         Arc::new(|_context_id: &str| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>)),
//!     ));
//!     let app = a2a_router(handler, card);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! Supported JSON-RPC methods: `message/send`, `message/stream`, `tasks/get`,
//! `tasks/list`, `tasks/cancel`, `tasks/subscribe`.
//!
//! `GET /.well-known/agent.json` serves the agent card.

pub mod builders;
pub mod error;
pub mod server;
pub mod types;
pub mod utils;

/// Prelude module that re-exports commonly used types and traits.
///
/// Import this module with `use a2a_server_core::prelude::*;` to get access to
/// the most frequently used types without having to import them individually.
pub mod prelude {
    // Core types
    pub use crate::types::{
        AgentCapabilities, AgentCard, AgentInterface, AgentSkill, Artifact, FileContent,
        FileWithBytes, FileWithUri, Message, Part, Role, SendMessageConfiguration,
        SendMessageParams, StreamResponse, Task, TaskArtifactUpdateEvent, TaskState, TaskStatus,
        TaskStatusUpdateEvent,
    };

    // Error types
    pub use crate::error::{A2AError, A2AResult};

    // Builders
    pub use crate::builders::{AgentCardBuilder, ServerBuilder};

    pub use crate::server::{
        a2a_router, Broadcaster, BroadcasterRegistry, Chunk, ConversationBackend,
        ConversationRegistry, DefaultRequestHandler, InMemoryTaskStore, RequestHandler,
        SendOutcome, ServerOptions, TaskStore,
    };
}

// Re-export core types at crate root for convenience.
pub use builders::{AgentCardBuilder, ServerBuilder};
pub use error::{A2AError, A2AResult};
pub use types::*;
