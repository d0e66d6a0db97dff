//! Task store — persistence layer and state machine for A2A tasks.
//!
//! A task moves through a small, strict state machine (submitted -> working ->
//! {completed, failed, canceled, input-required, auth-required, rejected}).
//! `input-required` and `auth-required` can return to `working` or be
//! canceled; the remaining four states are terminal and accept no further
//! transitions except through [`TaskStore::cancel`], which is an override
//! allowed from any non-terminal state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};
use crate::types::{Artifact, Message, Task, TaskState, TaskStatus};
use crate::utils::ids::new_id;

/// Parameters for listing tasks with optional context filtering and
/// offset/limit pagination.
#[derive(Debug, Clone, Default)]
pub struct TaskListParams {
    /// Restrict results to this context. `None` (or empty) matches all tasks.
    pub context_id: Option<String>,

    /// Number of matching tasks to skip before collecting results.
    pub offset: usize,

    /// Maximum number of tasks to return. `None` means unlimited.
    pub limit: Option<usize>,
}

/// Returns whether `from -> to` is a permitted transition.
///
/// `cancel` does not go through this table — [`TaskStore::cancel`] is an
/// explicit override allowed from any non-terminal state.
pub fn is_valid_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    match from {
        Submitted => matches!(to, Working),
        Working => matches!(
            to,
            Completed | Failed | Canceled | InputRequired | AuthRequired | Rejected
        ),
        InputRequired => matches!(to, Working | Canceled),
        AuthRequired => matches!(to, Working | Canceled),
        Completed | Failed | Canceled | Rejected | Unknown => false,
    }
}

fn is_terminal(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
    )
}

/// Trait for persisting and transitioning A2A tasks.
///
/// Implementations must be `Send + Sync`; the in-memory implementation uses a
/// single `RwLock` guarding both the task map and insertion order, so callers
/// never observe a task mid-update.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a new task in the `submitted` state.
    ///
    /// Returns [`A2AError::TaskAlreadyExists`] if `task_id` is already
    /// present.
    async fn create(&self, task_id: &str, context_id: &str) -> A2AResult<Task>;

    /// Fetch a task by id, or `None` if it does not exist.
    async fn get(&self, task_id: &str) -> A2AResult<Option<Task>>;

    /// Transition a task to `new_state`, optionally attaching a status
    /// message (e.g. the agent's "thinking" text, or a failure reason).
    ///
    /// Returns [`A2AError::TaskNotFound`] if the task doesn't exist, or
    /// [`A2AError::InvalidTransition`] if the transition isn't permitted by
    /// the state machine.
    async fn set_state(
        &self,
        task_id: &str,
        new_state: TaskState,
        message: Option<Message>,
    ) -> A2AResult<Task>;

    /// Append artifacts to a task, assigning each a monotonic `artifact-N` id
    /// if it doesn't already carry one.
    async fn add_artifacts(&self, task_id: &str, artifacts: Vec<Artifact>) -> A2AResult<Task>;

    /// Force a task into the `canceled` state from any non-terminal state.
    ///
    /// Returns [`A2AError::TaskNotCancelable`] if the task is already
    /// terminal.
    async fn cancel(&self, task_id: &str) -> A2AResult<Task>;

    /// List tasks, optionally filtered by context, applying `offset` then
    /// `limit` over the remaining matches in creation order.
    async fn list(&self, params: &TaskListParams) -> A2AResult<Vec<Task>>;

    /// Remove all terminal tasks whose last status timestamp is older than
    /// `cutoff` (an RFC3339 string, compared lexically since timestamps are
    /// always UTC and zero-padded).
    async fn evict_terminal(&self, cutoff: &str) -> A2AResult<usize>;
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// In-memory task store backed by a `HashMap`, guarded by a single
/// `tokio::sync::RwLock` so creation, transition, and listing never
/// interleave inconsistently.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    insertion_order: Vec<String>,
}

impl InMemoryTaskStore {
    /// Create a new empty in-memory task store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task_id: &str, context_id: &str) -> A2AResult<Task> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(task_id) {
            warn!(task_id = %task_id, "Attempted to create a task that already exists");
            return Err(A2AError::task_already_exists(format!(
                "task {task_id} already exists"
            )));
        }

        let task = Task {
            id: task_id.to_string(),
            context_id: context_id.to_string(),
            kind: "task".to_string(),
            status: TaskStatus {
                state: TaskState::Submitted,
                message: None,
                timestamp: Some(now_rfc3339()),
            },
            artifacts: None,
            history: None,
            metadata: None,
        };

        inner.tasks.insert(task_id.to_string(), task.clone());
        inner.insertion_order.push(task_id.to_string());
        debug!(task_id = %task_id, context_id = %context_id, "Task created");
        Ok(task)
    }

    async fn get(&self, task_id: &str) -> A2AResult<Option<Task>> {
        let inner = self.inner.read().await;
        let task = inner.tasks.get(task_id).cloned();
        debug!(task_id = %task_id, found = task.is_some(), "Task lookup");
        Ok(task)
    }

    async fn set_state(
        &self,
        task_id: &str,
        new_state: TaskState,
        message: Option<Message>,
    ) -> A2AResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| A2AError::task_not_found(format!("task {task_id} not found")))?;

        let from = task.status.state;
        if !is_valid_transition(from, new_state) {
            warn!(task_id = %task_id, ?from, ?new_state, "Rejected invalid transition");
            return Err(A2AError::invalid_transition(format!(
                "{from:?} -> {new_state:?} is not a permitted transition"
            )));
        }

        task.status = TaskStatus {
            state: new_state,
            message,
            timestamp: Some(now_rfc3339()),
        };
        debug!(task_id = %task_id, ?from, ?new_state, "Task transitioned");
        Ok(task.clone())
    }

    async fn add_artifacts(&self, task_id: &str, artifacts: Vec<Artifact>) -> A2AResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| A2AError::task_not_found(format!("task {task_id} not found")))?;

        let list = task.artifacts.get_or_insert_with(Vec::new);
        for mut artifact in artifacts {
            if artifact.artifact_id.is_empty() {
                artifact.artifact_id = format!("artifact-{}", list.len() + 1);
            }
            list.push(artifact);
        }
        debug!(task_id = %task_id, count = list.len(), "Artifacts appended");
        Ok(task.clone())
    }

    async fn cancel(&self, task_id: &str) -> A2AResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| A2AError::task_not_found(format!("task {task_id} not found")))?;

        if is_terminal(task.status.state) {
            warn!(task_id = %task_id, state = ?task.status.state, "Cannot cancel a terminal task");
            return Err(A2AError::task_not_cancelable(format!(
                "task {task_id} is already {:?}",
                task.status.state
            )));
        }

        task.status = TaskStatus {
            state: TaskState::Canceled,
            message: None,
            timestamp: Some(now_rfc3339()),
        };
        debug!(task_id = %task_id, "Task canceled");
        Ok(task.clone())
    }

    async fn list(&self, params: &TaskListParams) -> A2AResult<Vec<Task>> {
        let inner = self.inner.read().await;
        let limit = params.limit.unwrap_or(usize::MAX);

        let matches = inner.insertion_order.iter().filter_map(|id| {
            let task = inner.tasks.get(id)?;
            match &params.context_id {
                Some(ctx) if !ctx.is_empty() && task.context_id != *ctx => None,
                _ => Some(task.clone()),
            }
        });

        let result: Vec<Task> = matches.skip(params.offset).take(limit).collect();
        debug!(count = result.len(), "Listed tasks");
        Ok(result)
    }

    async fn evict_terminal(&self, cutoff: &str) -> A2AResult<usize> {
        let mut inner = self.inner.write().await;
        let to_remove: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| {
                is_terminal(t.status.state)
                    && t.status
                        .timestamp
                        .as_deref()
                        .map(|ts| ts < cutoff)
                        .unwrap_or(false)
            })
            .map(|t| t.id.clone())
            .collect();

        for id in &to_remove {
            inner.tasks.remove(id);
        }
        inner.insertion_order.retain(|id| !to_remove.contains(id));

        if !to_remove.is_empty() {
            debug!(count = to_remove.len(), "Evicted terminal tasks");
        }
        Ok(to_remove.len())
    }
}

/// Generate a new task id using the crate's id scheme (16 random bytes, hex).
pub fn new_task_id() -> String {
    new_id()
}

/// Generate a new context id using the crate's id scheme.
pub fn new_context_id() -> String {
    new_id()
}
