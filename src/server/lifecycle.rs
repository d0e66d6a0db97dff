//! Server configuration and the background eviction loop.
//!
//! [`ServerOptions`] carries every tunable named in this crate's external
//! interface — timeouts, TTLs, body cap, settle grace, subscriber queue
//! capacity — with no file or environment-variable loading; wiring it into
//! the router is left to the embedder, exactly as the out-of-scope CLI/config
//! declaration requires.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::broadcaster::BroadcasterRegistry;
use super::conversation::ConversationRegistry;
use super::request_handler::DefaultRequestHandler;
use super::task_store::TaskStore;

/// Server-wide configuration.
#[derive(Clone)]
pub struct ServerOptions {
    /// Time a request may spend reading headers before the server gives up.
    pub read_header_timeout: Duration,
    /// Time a request may spend reading its full body.
    pub read_timeout: Duration,
    /// Time a handler may spend writing its response.
    pub write_timeout: Duration,
    /// Time an idle keep-alive connection is held open.
    pub idle_timeout: Duration,
    /// Maximum accepted request body size.
    pub max_body_size: usize,
    /// How long a terminal task is kept before [`TaskStore::evict_terminal`]
    /// removes it. `Duration::ZERO` disables eviction.
    pub task_ttl: Duration,
    /// How long an idle conversation is kept before
    /// [`ConversationRegistry::evict_idle`] closes it. `Duration::ZERO`
    /// disables eviction.
    pub conversation_ttl: Duration,
    /// Cadence of the background eviction tick.
    pub eviction_interval: Duration,
    /// Grace period the unary handler waits for a fast non-blocking send to
    /// settle into a terminal state before returning the task snapshot.
    pub settle_grace: Duration,
    /// Per-subscriber bounded queue capacity in the broadcaster.
    pub subscriber_queue_capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_header_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            max_body_size: 10 * 1024 * 1024,
            task_ttl: Duration::from_secs(3600),
            conversation_ttl: Duration::from_secs(3600),
            eviction_interval: Duration::from_secs(60),
            settle_grace: Duration::from_millis(5),
            subscriber_queue_capacity: super::broadcaster::DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Spawn the periodic eviction task described in the lifecycle contract.
///
/// Only runs while `task_ttl > 0` or `conversation_ttl > 0`; each tick evicts
/// terminal tasks older than `task_ttl`, drops broadcasters whose closed flag
/// is set, and closes conversations idle longer than `conversation_ttl`.
/// Returns `None` (and starts nothing) if both TTLs are zero.
pub fn spawn_eviction_task(
    task_store: Arc<dyn TaskStore>,
    broadcasters: Arc<BroadcasterRegistry>,
    conversations: Arc<ConversationRegistry>,
    options: ServerOptions,
) -> Option<tokio::task::JoinHandle<()>> {
    if options.task_ttl.is_zero() && options.conversation_ttl.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(options.eviction_interval);
        loop {
            ticker.tick().await;
            run_eviction_tick(&task_store, &broadcasters, &conversations, &options).await;
        }
    }))
}

async fn run_eviction_tick(
    task_store: &Arc<dyn TaskStore>,
    broadcasters: &Arc<BroadcasterRegistry>,
    conversations: &Arc<ConversationRegistry>,
    options: &ServerOptions,
) {
    let mut evicted_tasks = 0;
    if !options.task_ttl.is_zero() {
        let cutoff = (chrono::Utc::now() - chrono_duration(options.task_ttl)).to_rfc3339();
        evicted_tasks = task_store.evict_terminal(&cutoff).await.unwrap_or(0);
    }

    broadcasters.remove_closed().await;

    let mut evicted_conversations = 0;
    if !options.conversation_ttl.is_zero() {
        evicted_conversations = conversations.evict_idle(options.conversation_ttl).await;
    }

    debug!(
        evicted_tasks,
        evicted_conversations, "Eviction tick complete"
    );
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

/// Run the shutdown sequence: cancel every registered task's context, close
/// every broadcaster, and close every registered conversation. Mirrors
/// §4.11's ordering — cancellation first, so in-flight senders observe a
/// cancelled token before their broadcaster disappears out from under them.
pub async fn shutdown(
    handler: &DefaultRequestHandler,
    broadcasters: &BroadcasterRegistry,
    conversations: &ConversationRegistry,
) {
    handler.cancel_all_tasks().await;
    broadcasters.close_all().await;
    conversations.close_all().await;
    debug!("Server shutdown: tasks cancelled, registries closed");
}
