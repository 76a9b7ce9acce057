//! Per-`(worldId, chatId)` FIFO LLM work queue (C5): at most one work unit per key
//! executes at a time, with cooperative cancellation.
//!
//! No `tokio-util` dependency is introduced for `CancellationToken`; the grounding
//! repo reaches for `tokio::spawn` plus hand-rolled shared state rather than an extra
//! crate for small coordination primitives, so cancellation here is a plain
//! `Arc<AtomicBool>` wrapper.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type WorkFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>;

/// A cooperative cancellation signal. Work units are expected to poll
/// `is_cancelled()` at each suspension point (every LLM chunk boundary, before each
/// persistence write) per `SPEC_FULL.md` §5.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type Key = (String, String);

struct PendingTask {
    task_id: u64,
    token: CancellationToken,
    work: WorkFn,
}

#[derive(Default)]
struct ChatQueueState {
    running: Option<(u64, CancellationToken, JoinHandle<()>)>,
    pending: VecDeque<PendingTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: bool,
}

/// The result of [`LlmQueue::stop_message`]: whether there was an active (running or
/// queued) task to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NoActiveProcess,
}

/// A submitted task's handle: its id plus a way to cancel only it before it starts
/// (cancelling a running task is `LlmQueue::stop_message`'s job, since at most one runs
/// per key).
pub struct SubmitHandle {
    pub task_id: u64,
    token: CancellationToken,
}

impl SubmitHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

pub struct LlmQueue {
    states: Mutex<HashMap<Key, ChatQueueState>>,
    next_task_id: AtomicU64,
}

impl LlmQueue {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
        }
    }

    /// Enqueue `work` for `(world_id, chat_id)`. If no task is currently running for
    /// that key, it starts immediately; otherwise it waits in strict FIFO order.
    pub async fn submit(
        &self,
        world_id: impl Into<String>,
        chat_id: impl Into<String>,
        work: WorkFn,
    ) -> SubmitHandle {
        let key = (world_id.into(), chat_id.into());
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let mut states = self.states.lock().await;
        let state = states.entry(key.clone()).or_default();
        state.pending.push_back(PendingTask {
            task_id,
            token: token.clone(),
            work,
        });
        self.drain_locked(&key, &mut states);

        SubmitHandle { task_id, token }
    }

    /// `stopMessage` (§6, testable property #7): cancel every pending task for
    /// `(world_id, chat_id)` and signal the running one, if any, without removing it
    /// from `running` (it transitions out on completion when the work unit itself
    /// observes the cancellation). Returns `Stopped` only when this call actually
    /// cancelled something new — a nonempty pending queue, or a running task whose
    /// token wasn't already cancelled — and `NoActiveProcess` otherwise. A running
    /// task that's already been signalled (but hasn't finished draining yet) no longer
    /// counts as something to stop, so N consecutive calls against one chat yield
    /// exactly one `Stopped` followed by `NoActiveProcess` for the rest.
    pub async fn stop_message(&self, world_id: &str, chat_id: &str) -> StopOutcome {
        let key = (world_id.to_string(), chat_id.to_string());
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(&key) else {
            return StopOutcome::NoActiveProcess;
        };
        let had_pending = !state.pending.is_empty();
        let running_was_fresh = state
            .running
            .as_ref()
            .map(|(_, token, _)| !token.is_cancelled())
            .unwrap_or(false);
        state.pending.clear();
        if let Some((_, token, _)) = &state.running {
            token.cancel();
        }
        if had_pending || running_was_fresh {
            StopOutcome::Stopped
        } else {
            StopOutcome::NoActiveProcess
        }
    }

    pub async fn status(&self, world_id: &str, chat_id: &str) -> QueueStatus {
        let key = (world_id.to_string(), chat_id.to_string());
        let states = self.states.lock().await;
        match states.get(&key) {
            Some(state) => QueueStatus {
                queued: state.pending.len(),
                running: state.running.is_some(),
            },
            None => QueueStatus {
                queued: 0,
                running: false,
            },
        }
    }

    /// Start the next pending task for `key` if nothing is currently running for it.
    /// Called with the map already locked, both right after `submit` and from the
    /// spawned task's completion continuation.
    fn drain_locked(&self, key: &Key, states: &mut HashMap<Key, ChatQueueState>) {
        let state = match states.get_mut(key) {
            Some(s) => s,
            None => return,
        };
        if state.running.is_some() {
            return;
        }
        let Some(task) = state.pending.pop_front() else {
            return;
        };

        let fut = (task.work)(task.token.clone());
        let handle = tokio::spawn(fut);
        state.running = Some((task.task_id, task.token, handle));
    }

    /// Mark the running task for `key` complete and drain the next pending one, if any.
    /// Work units are expected to call this via [`LlmQueue::finish`] when they return;
    /// in this crate that happens from within the spawned future itself via a wrapper,
    /// so callers of `submit` never need to call it directly.
    async fn finish(&self, key: Key) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&key) {
            state.running = None;
        }
        self.drain_locked(&key, &mut states);
    }
}

impl Default for LlmQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap `work` so that, once it completes, the queue immediately starts the next
/// pending task for `key`. `LlmQueue::submit` callers should route their work through
/// this helper rather than spawning the bare future, or drain never advances past the
/// first task.
pub fn with_completion_hook(
    queue: Arc<LlmQueue>,
    key: Key,
    work: impl FnOnce(CancellationToken) -> BoxFuture + Send + 'static,
) -> WorkFn {
    Box::new(move |token: CancellationToken| -> BoxFuture {
        Box::pin(async move {
            work(token).await;
            queue.finish(key).await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn work(counter: Arc<AtomicUsize>, order: Arc<Mutex<Vec<usize>>>, id: usize) -> impl FnOnce(CancellationToken) -> BoxFuture + Send + 'static {
        move |_token: CancellationToken| -> BoxFuture {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                order.lock().await.push(id);
            })
        }
    }

    #[tokio::test]
    async fn runs_single_submission() {
        let queue = Arc::new(LlmQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let key = ("w1".to_string(), "c1".to_string());

        let wrapped = with_completion_hook(queue.clone(), key.clone(), work(counter.clone(), order.clone(), 1));
        let handle = queue.submit("w1", "c1", wrapped).await;
        assert_eq!(handle.task_id, 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serializes_same_key_in_fifo_order() {
        let queue = Arc::new(LlmQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let key = ("w1".to_string(), "c1".to_string());

        let notify = Arc::new(Notify::new());
        let notify_clone = notify.clone();
        let first: WorkFn = {
            let queue = queue.clone();
            let key = key.clone();
            with_completion_hook(queue, key, move |_token| -> BoxFuture {
                Box::pin(async move {
                    notify_clone.notified().await;
                })
            })
        };
        let second = with_completion_hook(queue.clone(), key.clone(), work(counter.clone(), order.clone(), 2));

        queue.submit("w1", "c1", first).await;
        queue.submit("w1", "c1", second).await;

        assert_eq!(queue.status("w1", "c1").await.queued, 1);
        notify.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.status("w1", "c1").await.queued, 0);
    }

    #[tokio::test]
    async fn stop_message_clears_pending_and_signals_running() {
        let queue = Arc::new(LlmQueue::new());
        let key = ("w1".to_string(), "c1".to_string());
        let notify = Arc::new(Notify::new());
        let notify_clone = notify.clone();
        let seen_cancel = Arc::new(AtomicBool::new(false));
        let seen_cancel_clone = seen_cancel.clone();

        let first: WorkFn = with_completion_hook(queue.clone(), key.clone(), move |token| -> BoxFuture {
            Box::pin(async move {
                notify_clone.notified().await;
                seen_cancel_clone.store(token.is_cancelled(), Ordering::SeqCst);
            })
        });
        let never_runs = Arc::new(AtomicUsize::new(0));
        let second = with_completion_hook(
            queue.clone(),
            key.clone(),
            work(never_runs.clone(), Arc::new(Mutex::new(Vec::new())), 2),
        );

        queue.submit("w1", "c1", first).await;
        queue.submit("w1", "c1", second).await;

        assert_eq!(queue.stop_message("w1", "c1").await, StopOutcome::Stopped);
        assert_eq!(queue.status("w1", "c1").await.queued, 0);

        notify.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(seen_cancel.load(Ordering::SeqCst));
        assert_eq!(never_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_message_on_an_unknown_chat_is_a_no_active_process() {
        let queue = Arc::new(LlmQueue::new());
        assert_eq!(queue.stop_message("w1", "c1").await, StopOutcome::NoActiveProcess);
    }

    #[tokio::test]
    async fn repeated_stop_message_yields_one_stopped_then_no_active_process() {
        let queue = Arc::new(LlmQueue::new());
        let key = ("w1".to_string(), "c1".to_string());
        let notify = Arc::new(Notify::new());
        let notify_clone = notify.clone();

        let work: WorkFn = with_completion_hook(queue.clone(), key, move |_token| -> BoxFuture {
            Box::pin(async move {
                notify_clone.notified().await;
            })
        });
        queue.submit("w1", "c1", work).await;

        assert_eq!(queue.stop_message("w1", "c1").await, StopOutcome::Stopped);
        assert_eq!(queue.stop_message("w1", "c1").await, StopOutcome::NoActiveProcess);
        assert_eq!(queue.stop_message("w1", "c1").await, StopOutcome::NoActiveProcess);

        notify.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
