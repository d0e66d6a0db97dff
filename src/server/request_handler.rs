//! Request handler — coordinates the task store, conversation registry, and
//! broadcaster behind the six JSON-RPC methods this crate serves.
//!
//! [`DefaultRequestHandler`] is the only [`RequestHandler`] implementation:
//! it owns the cancellation-token map keyed by `task_id` (consulted by
//! `tasks/cancel` and by client-disconnect teardown), drives the unary send
//! and streaming translation as detached tasks, and is the sole writer of
//! task state outside of eviction.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

use crate::error::{A2AError, A2AResult};
use crate::types::{
    Artifact, FileContent, FileWithBytes, Message, Part, Role, StreamResponse, Task,
    TaskArtifactUpdateEvent, TaskState, TaskStatus, TaskStatusUpdateEvent,
};
use crate::utils::ids::new_id;
use crate::utils::message::get_message_text;

use super::broadcaster::{Broadcaster, BroadcasterRegistry};
use super::conversation::{Chunk, ConversationOpener, ConversationRegistry};
use super::lifecycle::ServerOptions;
use super::task_store::{TaskListParams, TaskStore};

/// Default page size for `tasks/list` when the caller passes `page_size <= 0`.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Parameters for `message/send` and `message/stream`.
#[derive(Debug, Clone)]
pub struct SendMessageParams {
    /// The message to send to the agent.
    pub message: Message,
    /// Optional configuration for the send operation.
    pub configuration: Option<SendMessageConfiguration>,
}

/// Configuration options for message sending.
#[derive(Debug, Clone, Default)]
pub struct SendMessageConfiguration {
    /// If `true`, `message/send` awaits the background task's completion
    /// instead of returning after the settle grace.
    pub blocking: Option<bool>,
}

/// Parameters for `tasks/get`.
#[derive(Debug, Clone)]
pub struct GetTaskParams {
    /// The task ID to retrieve.
    pub id: String,
}

/// Parameters for `tasks/cancel`.
#[derive(Debug, Clone)]
pub struct CancelTaskParams {
    /// The task ID to cancel.
    pub id: String,
}

/// Parameters for `tasks/subscribe`.
#[derive(Debug, Clone)]
pub struct SubscribeToTaskParams {
    /// The task ID to subscribe to.
    pub id: String,
}

/// Parameters for `tasks/list`.
#[derive(Debug, Clone, Default)]
pub struct ListTasksParams {
    /// Restrict results to this context. `None` or empty means "all".
    pub context_id: Option<String>,
    /// Page size; `<= 0` falls back to [`DEFAULT_PAGE_SIZE`].
    pub page_size: Option<i64>,
}

/// Response for `tasks/list`.
#[derive(Debug, Clone)]
pub struct ListTasksResponse {
    /// The matching tasks, after the page-size truncation was applied.
    pub tasks: Vec<Task>,
    /// The page size that was actually applied (the request's, or the default).
    pub page_size: usize,
}

/// A live, cancel-safe SSE subscription handed back to the axum layer.
///
/// Polls the broadcaster subscription directly; on drop (e.g. the client
/// disconnected and axum dropped the response body), unsubscribes from the
/// broadcaster so the writer stops wasting `try_send` calls on it.
///
/// The `message/stream` handler additionally attaches `cancel_guard`: the
/// same [`CancellationToken`] that `run_stream_translation` races against.
/// This is what actually ties the backend's lifetime to the HTTP response
/// body's lifetime per §4.6 — when axum drops this subscription (client
/// disconnect), the guard cancels the token, which is what unblocks the
/// `token.cancelled()` arm in the streaming translation loop. Late joiners
/// via `tasks/subscribe` get `cancel_guard: None`, since one subscriber
/// disconnecting must never cancel a task other subscribers are still
/// watching.
pub struct BroadcastSubscription {
    broadcaster: Arc<Broadcaster>,
    subscriber_id: u64,
    receiver: mpsc::Receiver<StreamResponse>,
    cancel_guard: Option<CancellationToken>,
}

impl Stream for BroadcastSubscription {
    type Item = StreamResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for BroadcastSubscription {
    fn drop(&mut self) {
        if let Some(token) = &self.cancel_guard {
            token.cancel();
        }
        let broadcaster = Arc::clone(&self.broadcaster);
        let id = self.subscriber_id;
        tokio::spawn(async move { broadcaster.unsubscribe(id).await });
    }
}

/// The result of `tasks/subscribe`: either a live tap into a running task's
/// broadcaster, or — for a task that already finished — a single terminal
/// snapshot event.
pub enum SubscriptionOutcome {
    /// Subscribed to the task's live broadcaster.
    Live(BroadcastSubscription),
    /// The task was already terminal; this is its one-shot status snapshot.
    Snapshot(StreamResponse),
}

/// The result of `message/stream`: the freshly created task plus a live
/// subscription that also carries the client-disconnect cancellation guard.
pub struct StreamHandle {
    /// The task as created, in `submitted` state (the caller typically
    /// doesn't render this — the first SSE frame carries `working`).
    pub task: Task,
    /// The subscription the axum layer turns into an SSE body. Dropping it
    /// (client disconnect) cancels the backend via the attached guard.
    pub subscription: BroadcastSubscription,
}

/// Trait for handling A2A JSON-RPC requests.
///
/// Each method corresponds to one of the six JSON-RPC methods this crate
/// serves; the axum integration layer dispatches decoded requests here.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle `message/send`.
    async fn on_message_send(&self, params: SendMessageParams) -> A2AResult<Task>;

    /// Handle `message/stream`.
    async fn on_message_stream(&self, params: SendMessageParams) -> A2AResult<StreamHandle>;

    /// Handle `tasks/get`.
    async fn on_get_task(&self, params: GetTaskParams) -> A2AResult<Task>;

    /// Handle `tasks/cancel`.
    async fn on_cancel_task(&self, params: CancelTaskParams) -> A2AResult<Task>;

    /// Handle `tasks/list`.
    async fn on_list_tasks(&self, params: ListTasksParams) -> A2AResult<ListTasksResponse>;

    /// Handle `tasks/subscribe`.
    async fn on_subscribe_to_task(
        &self,
        params: SubscribeToTaskParams,
    ) -> A2AResult<SubscriptionOutcome>;
}

fn is_terminal(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
    )
}

fn agent_text_status_message(task_id: &str, text: impl Into<String>) -> Message {
    Message {
        message_id: new_id(),
        role: Role::Agent,
        kind: "message".to_string(),
        parts: vec![Part::Text {
            text: text.into(),
            metadata: None,
        }],
        context_id: None,
        task_id: Some(task_id.to_string()),
        metadata: None,
        extensions: None,
        reference_task_ids: None,
    }
}

fn status_update_event(task: &Task, r#final: bool) -> StreamResponse {
    StreamResponse::StatusUpdate(TaskStatusUpdateEvent {
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        kind: "status-update".to_string(),
        status: task.status.clone(),
        r#final,
        metadata: None,
    })
}

fn text_artifact(index: u64, text: String) -> Artifact {
    Artifact {
        artifact_id: format!("artifact-{index}"),
        name: None,
        description: None,
        parts: vec![Part::Text {
            text,
            metadata: None,
        }],
        metadata: None,
        extensions: None,
    }
}

fn media_artifact(index: u64, mime_type: String, data: Vec<u8>) -> Artifact {
    use base64::Engine;
    Artifact {
        artifact_id: format!("artifact-{index}"),
        name: None,
        description: None,
        parts: vec![Part::File {
            file: FileContent::Bytes(FileWithBytes {
                bytes: base64::engine::general_purpose::STANDARD.encode(data),
                mime_type: Some(mime_type),
                name: None,
            }),
            metadata: None,
        }],
        metadata: None,
        extensions: None,
    }
}

/// Default request handler — wires [`TaskStore`], [`ConversationRegistry`],
/// and [`BroadcasterRegistry`] together per §4.5-§4.9 of this crate's design.
pub struct DefaultRequestHandler {
    task_store: Arc<dyn TaskStore>,
    conversations: Arc<ConversationRegistry>,
    broadcasters: Arc<BroadcasterRegistry>,
    /// Cancellation token per in-flight task, consulted by `tasks/cancel`
    /// and by the streaming handler's disconnect teardown.
    cancellations: Mutex<HashMap<String, CancellationToken>>,
    options: ServerOptions,
}

impl DefaultRequestHandler {
    /// Create a new handler. `opener` is called by the conversation registry
    /// at most once per `context_id`.
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        options: ServerOptions,
        opener: ConversationOpener,
    ) -> Self {
        Self {
            task_store,
            conversations: Arc::new(ConversationRegistry::new(opener)),
            broadcasters: Arc::new(BroadcasterRegistry::with_capacity(
                options.subscriber_queue_capacity,
            )),
            cancellations: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Expose the conversation registry for the lifecycle eviction loop.
    pub fn conversations(&self) -> Arc<ConversationRegistry> {
        Arc::clone(&self.conversations)
    }

    /// Expose the broadcaster registry for the lifecycle eviction loop.
    pub fn broadcasters(&self) -> Arc<BroadcasterRegistry> {
        Arc::clone(&self.broadcasters)
    }

    /// Expose the task store for the lifecycle eviction loop.
    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.task_store)
    }

    async fn register_cancellation(&self, task_id: &str, token: CancellationToken) {
        let mut map = self.cancellations.lock().await;
        map.insert(task_id.to_string(), token);
    }

    async fn take_cancellation(&self, task_id: &str) -> Option<CancellationToken> {
        let mut map = self.cancellations.lock().await;
        map.remove(task_id)
    }

    /// Cancel every in-flight task's registered context and drop the map.
    ///
    /// Used by server shutdown (§4.11): every background sender and stream
    /// translation loop observes its token as cancelled and tears itself
    /// down without overwriting task state (the same race-free path a
    /// client-initiated `tasks/cancel` or disconnect takes).
    pub async fn cancel_all_tasks(&self) {
        let mut map = self.cancellations.lock().await;
        for (task_id, token) in map.drain() {
            debug!(task_id, "Cancelling in-flight task for shutdown");
            token.cancel();
        }
    }

    fn resolve_context_id(message: &Message) -> String {
        message.context_id.clone().unwrap_or_else(new_id)
    }

    /// Spawn the unary `message/send` background task and return a receiver
    /// that resolves once it finishes (for the caller to await settle-grace
    /// or blocking completion).
    ///
    /// Uses a one-shot channel rather than `tokio::sync::Notify`: `Notify`
    /// only wakes waiters that are already polling at the moment
    /// `notify_waiters()` fires, so a caller that hasn't yet constructed its
    /// `.notified()` future when the spawned task completes would miss the
    /// signal and hang forever under a multi-thread runtime. A one-shot
    /// sender queues its value regardless of when the receiver is polled.
    async fn spawn_unary_send(
        self: &Arc<Self>,
        task_id: String,
        context_id: String,
        text: String,
    ) -> tokio::sync::oneshot::Receiver<()> {
        let token = CancellationToken::new();
        self.register_cancellation(&task_id, token.clone()).await;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let handler = Arc::clone(self);
        let span = tracing::info_span!("unary_send", task_id = %task_id, context_id = %context_id);

        tokio::spawn(
            async move {
                handler
                    .run_unary_send(task_id, context_id, text, token)
                    .await;
                let _ = done_tx.send(());
            }
            .instrument(span),
        );

        done_rx
    }

    async fn run_unary_send(
        &self,
        task_id: String,
        context_id: String,
        text: String,
        token: CancellationToken,
    ) {
        if let Err(e) = self
            .task_store
            .set_state(&task_id, TaskState::Working, None)
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to mark task working");
        }

        let backend = match self.conversations.get_or_create(&context_id).await {
            Ok(b) => b,
            Err(e) => {
                self.fail_task(&task_id, &format!("failed to open conversation: {e}"))
                    .await;
                self.take_cancellation(&task_id).await;
                return;
            }
        };

        let send_future = backend.send(text, token.clone());
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(task_id = %task_id, "Unary send canceled before completion");
            }
            result = send_future => {
                match result {
                    Err(_) if token.is_cancelled() => {
                        debug!(task_id = %task_id, "Backend send errored after cancellation; leaving state to the cancel handler");
                    }
                    Err(e) => {
                        self.fail_task(&task_id, &e.to_string()).await;
                    }
                    Ok(outcome) if outcome.pending_tools => {
                        if let Err(e) = self
                            .task_store
                            .set_state(&task_id, TaskState::InputRequired, None)
                            .await
                        {
                            warn!(task_id = %task_id, error = %e, "Failed to mark task input-required");
                        }
                    }
                    Ok(outcome) => {
                        let parts = if outcome.parts.is_empty() {
                            let text = outcome.text_accessor();
                            if text.is_empty() {
                                Vec::new()
                            } else {
                                vec![Part::Text { text, metadata: None }]
                            }
                        } else {
                            outcome.parts
                        };

                        if !parts.is_empty() {
                            let artifact = Artifact {
                                artifact_id: "artifact-1".to_string(),
                                name: None,
                                description: None,
                                parts,
                                metadata: None,
                                extensions: None,
                            };
                            if let Err(e) = self.task_store.add_artifacts(&task_id, vec![artifact]).await {
                                warn!(task_id = %task_id, error = %e, "Failed to append artifact");
                            }
                        }

                        if let Err(e) = self
                            .task_store
                            .set_state(&task_id, TaskState::Completed, None)
                            .await
                        {
                            warn!(task_id = %task_id, error = %e, "Failed to mark task completed");
                        }
                    }
                }
            }
        }

        self.take_cancellation(&task_id).await;
    }

    async fn fail_task(&self, task_id: &str, reason: &str) {
        let message = agent_text_status_message(task_id, reason);
        if let Err(e) = self
            .task_store
            .set_state(task_id, TaskState::Failed, Some(message))
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to mark task failed");
        }
    }

    /// Runs the streaming translation loop (§4.6). Owns the broadcaster for
    /// the life of the task: closes and removes it from the registry on
    /// every exit path.
    async fn run_stream_translation(
        self: Arc<Self>,
        task_id: String,
        context_id: String,
        text: String,
        token: CancellationToken,
    ) {
        let broadcaster = self.broadcasters.get_or_create(&task_id).await;

        if let Err(e) = self
            .task_store
            .set_state(&task_id, TaskState::Working, None)
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to mark task working");
        }
        if let Ok(Some(task)) = self.task_store.get(&task_id).await {
            broadcaster.send(status_update_event(&task, false)).await;
        }

        let backend = match self.conversations.get_or_create(&context_id).await {
            Ok(b) => b,
            Err(e) => {
                self.fail_and_close(&task_id, &broadcaster, &format!("failed to open conversation: {e}"))
                    .await;
                self.teardown(&task_id).await;
                return;
            }
        };

        if !backend.supports_streaming() {
            self.fail_and_close(
                &task_id,
                &broadcaster,
                "conversation backend does not support streaming",
            )
            .await;
            self.teardown(&task_id).await;
            return;
        }

        let mut chunks = match backend.stream(text, token.clone()).await {
            Ok(s) => s,
            Err(e) => {
                self.fail_and_close(&task_id, &broadcaster, &e.to_string())
                    .await;
                self.teardown(&task_id).await;
                return;
            }
        };

        let mut artifact_index: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(task_id = %task_id, "Stream canceled (disconnect or tasks/cancel)");
                    broadcaster.close().await;
                    self.teardown(&task_id).await;
                    return;
                }
                next = chunks.next() => {
                    match next {
                        Some(Chunk::Text(text)) => {
                            artifact_index += 1;
                            let artifact = text_artifact(artifact_index, text);
                            if let Err(e) = self.task_store.add_artifacts(&task_id, vec![artifact.clone()]).await {
                                warn!(task_id = %task_id, error = %e, "Failed to append text artifact");
                            }
                            broadcaster.send(StreamResponse::ArtifactUpdate(TaskArtifactUpdateEvent {
                                task_id: task_id.clone(),
                                context_id: context_id.clone(),
                                kind: "artifact-update".to_string(),
                                artifact,
                                append: Some(true),
                                last_chunk: None,
                                metadata: None,
                            })).await;
                        }
                        Some(Chunk::Media { mime_type, data }) => {
                            artifact_index += 1;
                            let artifact = media_artifact(artifact_index, mime_type, data);
                            if let Err(e) = self.task_store.add_artifacts(&task_id, vec![artifact.clone()]).await {
                                warn!(task_id = %task_id, error = %e, "Failed to append media artifact");
                            }
                            broadcaster.send(StreamResponse::ArtifactUpdate(TaskArtifactUpdateEvent {
                                task_id: task_id.clone(),
                                context_id: context_id.clone(),
                                kind: "artifact-update".to_string(),
                                artifact,
                                append: Some(true),
                                last_chunk: None,
                                metadata: None,
                            })).await;
                        }
                        Some(Chunk::ToolCall) => {
                            debug!(task_id = %task_id, "Suppressing tool-call chunk (agent opacity)");
                        }
                        Some(Chunk::Done) | None => {
                            if let Err(e) = self.task_store.set_state(&task_id, TaskState::Completed, None).await {
                                warn!(task_id = %task_id, error = %e, "Failed to mark task completed");
                            }
                            if let Ok(Some(task)) = self.task_store.get(&task_id).await {
                                broadcaster.send(status_update_event(&task, true)).await;
                            }
                            broadcaster.close().await;
                            self.teardown(&task_id).await;
                            return;
                        }
                        Some(Chunk::Error(reason)) => {
                            self.fail_and_close(&task_id, &broadcaster, &reason).await;
                            self.teardown(&task_id).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn fail_and_close(&self, task_id: &str, broadcaster: &Broadcaster, reason: &str) {
        self.fail_task(task_id, reason).await;
        if let Ok(Some(task)) = self.task_store.get(task_id).await {
            broadcaster.send(status_update_event(&task, true)).await;
        }
        broadcaster.close().await;
    }

    async fn teardown(&self, task_id: &str) {
        self.take_cancellation(task_id).await;
        self.broadcasters.remove(task_id).await;
    }
}

#[async_trait]
impl RequestHandler for Arc<DefaultRequestHandler> {
    async fn on_message_send(&self, params: SendMessageParams) -> A2AResult<Task> {
        let context_id = DefaultRequestHandler::resolve_context_id(&params.message);
        let task_id = new_id();
        let task = self.task_store.create(&task_id, &context_id).await?;

        let text = get_message_text(&params.message, "\n");
        let done = self
            .spawn_unary_send(task_id.clone(), context_id, text)
            .await;

        let blocking = params
            .configuration
            .as_ref()
            .and_then(|c| c.blocking)
            .unwrap_or(false);

        if blocking {
            let _ = done.await;
        } else {
            let _ = tokio::time::timeout(self.options.settle_grace, done).await;
        }

        self.task_store
            .get(&task_id)
            .await?
            .ok_or_else(|| A2AError::task_not_found(format!("task {task_id} vanished")))
            .or(Ok(task))
    }

    async fn on_message_stream(&self, params: SendMessageParams) -> A2AResult<StreamHandle> {
        let context_id = DefaultRequestHandler::resolve_context_id(&params.message);

        // Acquiring the conversation here (rather than inside the spawned
        // task) lets an opener failure or a non-streaming backend surface
        // synchronously as a JSON-RPC error instead of as a task failure.
        let backend = self.conversations.get_or_create(&context_id).await?;
        if !backend.supports_streaming() {
            return Err(A2AError::method_not_found(
                "this conversation backend does not support message/stream",
            ));
        }

        let task_id = new_id();
        let task = self.task_store.create(&task_id, &context_id).await?;
        let broadcaster = self.broadcasters.get_or_create(&task_id).await;

        let token = CancellationToken::new();
        self.register_cancellation(&task_id, token.clone()).await;

        let (subscriber_id, receiver) = broadcaster.subscribe().await;
        let subscription = BroadcastSubscription {
            broadcaster: Arc::clone(&broadcaster),
            subscriber_id,
            receiver,
            cancel_guard: Some(token.clone()),
        };

        let text = get_message_text(&params.message, "\n");
        let handler = Arc::clone(self);
        let span =
            tracing::info_span!("stream_send", task_id = %task_id, context_id = %context_id);
        let spawned_task_id = task_id.clone();
        let spawned_context_id = context_id.clone();
        tokio::spawn(
            async move {
                handler
                    .run_stream_translation(spawned_task_id, spawned_context_id, text, token)
                    .await;
            }
            .instrument(span),
        );

        Ok(StreamHandle { task, subscription })
    }

    async fn on_get_task(&self, params: GetTaskParams) -> A2AResult<Task> {
        self.task_store
            .get(&params.id)
            .await?
            .ok_or_else(|| A2AError::task_not_found(format!("task {} not found", params.id)))
    }

    async fn on_cancel_task(&self, params: CancelTaskParams) -> A2AResult<Task> {
        if let Some(token) = self.take_cancellation(&params.id).await {
            token.cancel();
        }
        self.task_store.cancel(&params.id).await
    }

    async fn on_list_tasks(&self, params: ListTasksParams) -> A2AResult<ListTasksResponse> {
        let page_size = match params.page_size {
            Some(n) if n > 0 => n as usize,
            _ => DEFAULT_PAGE_SIZE,
        };

        let tasks = self
            .task_store
            .list(&TaskListParams {
                context_id: params.context_id,
                offset: 0,
                limit: Some(page_size),
            })
            .await?;

        Ok(ListTasksResponse { tasks, page_size })
    }

    async fn on_subscribe_to_task(
        &self,
        params: SubscribeToTaskParams,
    ) -> A2AResult<SubscriptionOutcome> {
        if let Some(broadcaster) = self.broadcasters.get(&params.id).await {
            let (subscriber_id, receiver) = broadcaster.subscribe().await;
            return Ok(SubscriptionOutcome::Live(BroadcastSubscription {
                broadcaster,
                subscriber_id,
                receiver,
                cancel_guard: None,
            }));
        }

        let task = self
            .task_store
            .get(&params.id)
            .await?
            .ok_or_else(|| A2AError::task_not_found(format!("task {} not found", params.id)))?;

        Ok(SubscriptionOutcome::Snapshot(status_update_event(
            &task,
            is_terminal(task.status.state),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::conversation::{ChunkStream, ConversationBackend, ConversationOpener, SendOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EchoBackend;

    #[async_trait]
    impl ConversationBackend for EchoBackend {
        async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
            Ok(SendOutcome::text(format!("echo:{text}")))
        }
    }

    struct PendingBackend;

    #[async_trait]
    impl ConversationBackend for PendingBackend {
        async fn send(&self, _text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
            Ok(SendOutcome::text("waiting").pending())
        }
    }

    struct StallingBackend {
        observed_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ConversationBackend for StallingBackend {
        async fn send(&self, _text: String, cancellation: CancellationToken) -> A2AResult<SendOutcome> {
            cancellation.cancelled().await;
            self.observed_cancel.store(true, Ordering::SeqCst);
            Err(A2AError::internal_error("canceled"))
        }
    }

    fn text_message(text: &str) -> Message {
        Message {
            message_id: new_id(),
            role: Role::User,
            kind: "message".to_string(),
            parts: vec![Part::Text {
                text: text.to_string(),
                metadata: None,
            }],
            context_id: None,
            task_id: None,
            metadata: None,
            extensions: None,
            reference_task_ids: None,
        }
    }

    fn handler_with(opener: ConversationOpener) -> Arc<DefaultRequestHandler> {
        Arc::new(DefaultRequestHandler::new(
            Arc::new(super::super::task_store::InMemoryTaskStore::new()),
            ServerOptions::default(),
            opener,
        ))
    }

    #[tokio::test]
    async fn blocking_unary_send_completes_with_artifact() {
        let opener: ConversationOpener = Arc::new(|_ctx| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>));
        let handler = handler_with(opener);

        let task = handler
            .on_message_send(SendMessageParams {
                message: text_message("hi"),
                configuration: Some(SendMessageConfiguration { blocking: Some(true) }),
            })
            .await
            .unwrap();

        assert_eq!(task.status.state, TaskState::Completed);
        let artifacts = task.artifacts.unwrap();
        assert_eq!(artifacts[0].artifact_id, "artifact-1");
        match &artifacts[0].parts[0] {
            Part::Text { text, .. } => assert_eq!(text, "echo:hi"),
            _ => panic!("expected text part"),
        }
    }

    #[tokio::test]
    async fn pending_tools_result_in_input_required() {
        let opener: ConversationOpener = Arc::new(|_ctx| Ok(Arc::new(PendingBackend) as Arc<dyn ConversationBackend>));
        let handler = handler_with(opener);

        let task = handler
            .on_message_send(SendMessageParams {
                message: text_message("hi"),
                configuration: Some(SendMessageConfiguration { blocking: Some(true) }),
            })
            .await
            .unwrap();

        assert_eq!(task.status.state, TaskState::InputRequired);
        assert!(task.artifacts.is_none());
    }

    #[tokio::test]
    async fn non_blocking_send_returns_within_settle_grace() {
        let opener: ConversationOpener = Arc::new(|_ctx| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>));
        let handler = handler_with(opener);

        let started = std::time::Instant::now();
        let task = handler
            .on_message_send(SendMessageParams {
                message: text_message("hi"),
                configuration: None,
            })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        // The echo backend is fast enough to settle within the grace window.
        assert_eq!(task.status.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn cancel_in_flight_transitions_to_canceled_not_failed() {
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = Arc::clone(&observed);
        let opener: ConversationOpener = Arc::new(move |_ctx| {
            Ok(Arc::new(StallingBackend {
                observed_cancel: Arc::clone(&observed_clone),
            }) as Arc<dyn ConversationBackend>)
        });
        let handler = handler_with(opener);

        let context_id = new_id();
        let task_id = new_id();
        handler.task_store.create(&task_id, &context_id).await.unwrap();
        let _done = handler
            .spawn_unary_send(task_id.clone(), context_id, "hi".to_string())
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let task = handler.on_cancel_task(CancelTaskParams { id: task_id.clone() }).await.unwrap();
        assert_eq!(task.status.state, TaskState::Canceled);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(observed.load(Ordering::SeqCst));

        // The stalling backend's own error-after-cancel must not flip the
        // task back to `failed`.
        let final_task = handler.task_store.get(&task_id).await.unwrap().unwrap();
        assert_eq!(final_task.status.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn cancel_all_tasks_cancels_every_in_flight_backend() {
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = Arc::clone(&observed);
        let opener: ConversationOpener = Arc::new(move |_ctx| {
            Ok(Arc::new(StallingBackend {
                observed_cancel: Arc::clone(&observed_clone),
            }) as Arc<dyn ConversationBackend>)
        });
        let handler = handler_with(opener);

        let context_id = new_id();
        let task_id = new_id();
        handler.task_store.create(&task_id, &context_id).await.unwrap();
        let _done = handler
            .spawn_unary_send(task_id.clone(), context_id, "hi".to_string())
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        handler.cancel_all_tasks().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(observed.load(Ordering::SeqCst));
        assert!(handler.take_cancellation(&task_id).await.is_none());
    }

    #[tokio::test]
    async fn subscribe_to_completed_task_returns_single_snapshot() {
        let opener: ConversationOpener = Arc::new(|_ctx| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>));
        let handler = handler_with(opener);

        let task = handler
            .on_message_send(SendMessageParams {
                message: text_message("hi"),
                configuration: Some(SendMessageConfiguration { blocking: Some(true) }),
            })
            .await
            .unwrap();

        let outcome = handler
            .on_subscribe_to_task(SubscribeToTaskParams { id: task.id.clone() })
            .await
            .unwrap();

        match outcome {
            SubscriptionOutcome::Snapshot(StreamResponse::StatusUpdate(update)) => {
                assert!(update.r#final);
                assert_eq!(update.status.state, TaskState::Completed);
            }
            _ => panic!("expected a terminal snapshot"),
        }
    }

    #[tokio::test]
    async fn list_tasks_defaults_page_size() {
        let opener: ConversationOpener = Arc::new(|_ctx| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>));
        let handler = handler_with(opener);
        handler.task_store.create("t1", "c1").await.unwrap();

        let response = handler
            .on_list_tasks(ListTasksParams {
                context_id: Some("c1".to_string()),
                page_size: None,
            })
            .await
            .unwrap();

        assert_eq!(response.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(response.tasks.len(), 1);
    }

    struct ToolCallingBackend;

    #[async_trait]
    impl ConversationBackend for ToolCallingBackend {
        async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
            Ok(SendOutcome::text(format!("echo:{text}")))
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn stream(&self, text: String, _cancellation: CancellationToken) -> A2AResult<ChunkStream> {
            Ok(Box::pin(futures::stream::iter(vec![
                Chunk::Text(format!("part-one:{text}")),
                Chunk::ToolCall,
                Chunk::Text("part-two".to_string()),
                Chunk::Done,
            ])))
        }
    }

    #[tokio::test]
    async fn tool_call_chunks_are_suppressed_from_the_stream() {
        let opener: ConversationOpener =
            Arc::new(|_ctx| Ok(Arc::new(ToolCallingBackend) as Arc<dyn ConversationBackend>));
        let handler = handler_with(opener);

        let StreamHandle { mut subscription, .. } = handler
            .on_message_stream(SendMessageParams {
                message: text_message("hi"),
                configuration: None,
            })
            .await
            .unwrap();

        let mut artifact_updates = 0;
        let mut saw_working = false;
        let mut saw_completed = false;
        while let Some(event) = subscription.next().await {
            match event {
                StreamResponse::ArtifactUpdate(_) => artifact_updates += 1,
                StreamResponse::StatusUpdate(update) => match update.status.state {
                    TaskState::Working => saw_working = true,
                    TaskState::Completed => {
                        saw_completed = true;
                        assert!(update.r#final);
                    }
                    other => panic!("unexpected status {other:?}"),
                },
                other => panic!("unexpected stream event {other:?}"),
            }
        }

        // Exactly the two text chunks become artifact updates; the tool-call
        // chunk in between never reaches the client.
        assert_eq!(artifact_updates, 2);
        assert!(saw_working);
        assert!(saw_completed);
    }

    /// A backend whose stream never yields on its own; the test only cares
    /// that its cancellation token gets fired once the client disconnects.
    ///
    /// Watches that token from an independently spawned task rather than
    /// from inside the returned `ChunkStream`'s own future: the streaming
    /// loop's `select!` is biased toward its own `token.cancelled()` arm, so
    /// once that arm wins it drops `chunks.next()`'s future without polling
    /// it again — code living inside that future would never get to run.
    struct BlockingStreamBackend {
        observed_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ConversationBackend for BlockingStreamBackend {
        async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
            Ok(SendOutcome::text(format!("echo:{text}")))
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn stream(&self, _text: String, cancellation: CancellationToken) -> A2AResult<ChunkStream> {
            let observed_cancel = Arc::clone(&self.observed_cancel);
            tokio::spawn(async move {
                cancellation.cancelled().await;
                observed_cancel.store(true, Ordering::SeqCst);
            });
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_subscription_cancels_the_backend_without_failing_the_task() {
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let opener: ConversationOpener = {
            let observed_cancel = Arc::clone(&observed_cancel);
            Arc::new(move |_ctx| {
                Ok(Arc::new(BlockingStreamBackend {
                    observed_cancel: Arc::clone(&observed_cancel),
                }) as Arc<dyn ConversationBackend>)
            })
        };
        let handler = handler_with(opener);

        let StreamHandle { task, subscription } = handler
            .on_message_stream(SendMessageParams {
                message: text_message("hi"),
                configuration: None,
            })
            .await
            .unwrap();

        // Let the backend start (and transition the task to `working`)
        // before the client disconnects.
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(subscription);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(
            observed_cancel.load(Ordering::SeqCst),
            "dropping the subscription must cancel the backend's token"
        );

        let final_task = handler.task_store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(
            final_task.status.state,
            TaskState::Working,
            "a disconnected client must not flip the task to failed"
        );
    }

    /// Yields one chunk, then waits on `release` before yielding the rest —
    /// gives a test a deterministic window in which the task is still
    /// `working` to subscribe a second, late reader into.
    struct PacedStreamBackend {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl ConversationBackend for PacedStreamBackend {
        async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
            Ok(SendOutcome::text(format!("echo:{text}")))
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn stream(&self, text: String, _cancellation: CancellationToken) -> A2AResult<ChunkStream> {
            let release = Arc::clone(&self.release);
            Ok(Box::pin(async_stream::stream! {
                yield Chunk::Text(format!("part-one:{text}"));
                release.notified().await;
                yield Chunk::ToolCall;
                yield Chunk::Text("part-two".to_string());
                yield Chunk::Done;
            }))
        }
    }

    #[tokio::test]
    async fn late_subscriber_receives_remaining_events_through_completion() {
        let release = Arc::new(tokio::sync::Notify::new());
        let opener: ConversationOpener = {
            let release = Arc::clone(&release);
            Arc::new(move |_ctx| {
                Ok(Arc::new(PacedStreamBackend {
                    release: Arc::clone(&release),
                }) as Arc<dyn ConversationBackend>)
            })
        };
        let handler = handler_with(opener);

        let StreamHandle { task, mut subscription } = handler
            .on_message_stream(SendMessageParams {
                message: text_message("hi"),
                configuration: None,
            })
            .await
            .unwrap();

        // Consume the working status and the first artifact; the backend is
        // now parked waiting on `release`, so the task is still `working`.
        let first = subscription.next().await.unwrap();
        assert!(matches!(first, StreamResponse::StatusUpdate(ref u) if u.status.state == TaskState::Working));
        let second = subscription.next().await.unwrap();
        assert!(matches!(second, StreamResponse::ArtifactUpdate(_)));

        let outcome = handler
            .on_subscribe_to_task(SubscribeToTaskParams { id: task.id.clone() })
            .await
            .unwrap();
        let mut late = match outcome {
            SubscriptionOutcome::Live(sub) => sub,
            SubscriptionOutcome::Snapshot(_) => panic!("task should still be running"),
        };

        release.notify_one();

        let mut artifact_updates = 0;
        let mut saw_completed = false;
        while let Some(event) = late.next().await {
            match event {
                StreamResponse::ArtifactUpdate(_) => artifact_updates += 1,
                StreamResponse::StatusUpdate(update) if update.status.state == TaskState::Completed => {
                    assert!(update.r#final);
                    saw_completed = true;
                }
                StreamResponse::StatusUpdate(_) => {}
                other => panic!("unexpected stream event {other:?}"),
            }
        }

        // The suppressed tool-call chunk and the one artifact the late
        // subscriber already missed mean exactly one more artifact update.
        assert_eq!(artifact_updates, 1);
        assert!(saw_completed, "late subscriber must observe the terminal event");
    }
}
