//! Conversation backend seam and per-context conversation registry.
//!
//! The actual agent logic — prompt assembly, tool dispatch, LLM calls — lives
//! outside this crate entirely. [`ConversationBackend`] is the narrow
//! interface this crate calls through: a synchronous `send` and an optional
//! streaming `stream`, each driven per `context_id` by the [`ConversationRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{A2AError, A2AResult};
use crate::types::Part;

/// A single chunk of a streaming conversation turn.
///
/// Mirrors the event-translation rules a streaming handler applies: text and
/// media chunks become artifact updates, tool-call chunks are suppressed
/// entirely (agent opacity), and `Done`/`Error` end the stream.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// A text fragment, appended to the task's running text artifact.
    Text(String),
    /// A media fragment with an explicit MIME type.
    Media { mime_type: String, data: Vec<u8> },
    /// Marks that the backend invoked a tool. Never surfaced to the client.
    ToolCall,
    /// The backend has finished producing output for this turn.
    Done,
    /// The backend failed; carries a human-readable reason.
    Error(String),
}

/// The result of a non-streaming conversation turn.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    /// Content parts produced by this turn.
    pub parts: Vec<Part>,
    /// Whether the backend is now waiting on a tool/user before it can
    /// finish — causes the task to transition to `input-required` instead
    /// of `completed`.
    pub pending_tools: bool,
}

impl SendOutcome {
    /// Build an outcome from a single text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text {
                text: text.into(),
                metadata: None,
            }],
            pending_tools: false,
        }
    }

    /// Mark this outcome as pending further input (e.g. a tool call the
    /// caller must resolve) rather than complete.
    pub fn pending(mut self) -> Self {
        self.pending_tools = true;
        self
    }

    /// Concatenation of every text part, used as the fallback text accessor
    /// when a handler needs to synthesize a single artifact from an outcome
    /// that carries no parts at all.
    pub fn text_accessor(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A stream of [`Chunk`]s produced by a streaming conversation turn.
pub type ChunkStream = BoxStream<'static, Chunk>;

/// The interface this crate calls through to run agent logic.
///
/// Implementations are supplied by the embedder; this crate ships no prompt
/// loading, tool execution, or LLM client of its own.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Run one turn synchronously and return its outcome.
    ///
    /// `cancellation` mirrors the Go interface's `ctx`: a cooperative
    /// backend checks it (or races it) and returns promptly once canceled.
    /// The unary send handler also races this call against the same token,
    /// so a backend that ignores it still gets torn down at the handler
    /// boundary — but a backend that does observe it can stop expensive
    /// work (an in-flight LLM call) immediately instead of after the fact.
    async fn send(&self, text: String, cancellation: CancellationToken) -> A2AResult<SendOutcome>;

    /// Whether this backend supports [`ConversationBackend::stream`].
    ///
    /// The streaming handler replies `-32601` when a client requests
    /// `message/stream` against a backend that returns `false` here.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Run one turn as a stream of chunks.
    ///
    /// Only called when [`ConversationBackend::supports_streaming`] returns
    /// `true`. The default implementation is unreachable in that case.
    async fn stream(&self, _text: String, _cancellation: CancellationToken) -> A2AResult<ChunkStream> {
        Err(A2AError::unsupported_operation(
            "this backend does not support streaming",
        ))
    }

    /// Release any resources held for this conversation (e.g. a model
    /// session). Called on idle-TTL eviction and server shutdown.
    async fn close(&self) -> A2AResult<()> {
        Ok(())
    }
}

/// Opens (creates) the backend for a new `context_id`.
///
/// Called at most once per context by [`ConversationRegistry::get_or_create`].
pub type ConversationOpener =
    Arc<dyn Fn(&str) -> A2AResult<Arc<dyn ConversationBackend>> + Send + Sync>;

struct Entry {
    backend: Arc<dyn ConversationBackend>,
    last_use: Instant,
}

/// Registry of conversations keyed by `context_id`, with idle-TTL eviction.
///
/// Uses double-checked locking in [`get_or_create`](Self::get_or_create): a
/// read under the lock first, and only the (rare) miss path takes the lock
/// again to open and insert, so concurrent requests for an already-open
/// context never race to open it twice.
pub struct ConversationRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    opener: ConversationOpener,
}

impl ConversationRegistry {
    /// Create a new registry that opens conversations via `opener`.
    pub fn new(opener: ConversationOpener) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            opener,
        }
    }

    /// Get the conversation for `context_id`, opening a new one if this is
    /// the first time this context has been seen.
    pub async fn get_or_create(&self, context_id: &str) -> A2AResult<Arc<dyn ConversationBackend>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(context_id) {
            entry.last_use = Instant::now();
            return Ok(entry.backend.clone());
        }

        let backend = (self.opener)(context_id)?;
        entries.insert(
            context_id.to_string(),
            Entry {
                backend: backend.clone(),
                last_use: Instant::now(),
            },
        );
        debug!(context_id = %context_id, "Conversation opened");
        Ok(backend)
    }

    /// Touch `context_id`'s last-use time without opening or creating it.
    pub async fn touch(&self, context_id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(context_id) {
            entry.last_use = Instant::now();
        }
    }

    /// Evict and `close()` every conversation idle longer than `ttl`.
    pub async fn evict_idle(&self, ttl: std::time::Duration) -> usize {
        let stale: Vec<(String, Arc<dyn ConversationBackend>)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| e.last_use.elapsed() >= ttl)
                .map(|(id, e)| (id.clone(), e.backend.clone()))
                .collect()
        };

        for (id, backend) in &stale {
            let _ = backend.close().await;
            let mut entries = self.entries.lock().await;
            entries.remove(id);
        }

        if !stale.is_empty() {
            debug!(count = stale.len(), "Evicted idle conversations");
        }
        stale.len()
    }

    /// Close every conversation in the registry. Used on server shutdown.
    pub async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            let _ = entry.backend.close().await;
        }
    }
}
