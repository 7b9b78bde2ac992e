//! The worker pool and task dispatcher.
//!
//! The pool owns a bounded set of workers sized at construction, an ordered
//! pending queue, and the append-only channel registration history. Replies
//! are correlated to completion handles by task id through an in-flight
//! table; workers that exit unexpectedly are replaced, and every
//! replacement receives the full registration history before it is marked
//! idle.

use crate::registry::{EntryKind, TaskRegistry};
use crate::worker::{WorkerEvent, WorkerHandle, WorkerRequest};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use weft_core::{Channel, ChannelId, Result, TaskId, Value, WeftError, WorkerId};

/// Default bound on the pending queue.
const DEFAULT_MAX_PENDING: usize = 1024;

/// Configuration for a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers the pool maintains.
    pub workers: usize,
    /// Maximum number of queued-but-undispatched tasks.
    pub max_pending: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl PoolConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads `WEFT_WORKERS` (worker count) and `WEFT_MAX_PENDING` (pending
    /// queue bound); unset or unparseable variables fall back to defaults.
    pub fn from_env() -> Self {
        let workers = std::env::var("WEFT_WORKERS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or_else(default_workers);

        let max_pending = std::env::var("WEFT_MAX_PENDING")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_PENDING);

        Self {
            workers: workers.max(1),
            max_pending,
        }
    }

    /// Set the worker count (at least 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the pending queue bound.
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

/// Completion handle for one submitted task.
///
/// Resolves exactly once: with the task's value, the task's error, a
/// `WorkerFailure` if the executing worker died, or `Shutdown` if the pool
/// discarded the task.
pub struct TaskHandle {
    task_id: TaskId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl TaskHandle {
    /// The submission's unique id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.task_id
    }

    /// Wait for the task to complete.
    pub async fn join(self) -> Result<Value> {
        self.rx.await.unwrap_or(Err(WeftError::Shutdown))
    }

    #[cfg(test)]
    pub(crate) fn from_parts(task_id: TaskId, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { task_id, rx }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .finish()
    }
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers currently alive.
    pub workers: usize,
    /// Workers currently idle.
    pub idle: usize,
    /// Tasks queued but not yet dispatched.
    pub pending: usize,
    /// Total tasks accepted by `submit`/`submit_shared`.
    pub submitted: usize,
    /// Total tasks that resolved successfully.
    pub completed: usize,
    /// Total tasks that rejected (task error, worker failure, shutdown).
    pub failed: usize,
    /// Total replacement workers spawned.
    pub replaced: usize,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "workers={}({} idle) pending={} submitted={} completed={} failed={} replaced={}",
            self.workers,
            self.idle,
            self.pending,
            self.submitted,
            self.completed,
            self.failed,
            self.replaced,
        )
    }
}

/// A queued submission.
struct Submission {
    task_id: TaskId,
    name: String,
    args: Vec<Value>,
    entry: EntryKind,
}

/// State guarded by the pool mutex.
struct State {
    workers: HashMap<WorkerId, WorkerHandle>,
    idle: VecDeque<WorkerId>,
    assigned: HashMap<WorkerId, TaskId>,
    pending: VecDeque<Submission>,
    registrations: Vec<(ChannelId, Channel)>,
    next_worker_id: u32,
    shutting_down: bool,
}

struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    replaced: AtomicUsize,
}

struct Shared {
    registry: Arc<TaskRegistry>,
    config: PoolConfig,
    state: Mutex<State>,
    in_flight: DashMap<TaskId, oneshot::Sender<Result<Value>>>,
    events_tx: UnboundedSender<WorkerEvent>,
    counters: Counters,
}

/// A bounded pool of task-executing workers.
///
/// Construction spawns the workers and an event pump; call
/// [`Pool::terminate`] for an orderly shutdown. Requires a running tokio
/// runtime.
pub struct Pool {
    shared: Arc<Shared>,
    pump: tokio::task::JoinHandle<()>,
}

impl Pool {
    /// Create a pool with the default configuration.
    pub fn new(registry: TaskRegistry) -> Result<Self> {
        Self::with_config(registry, PoolConfig::default())
    }

    /// Create a pool with an explicit configuration.
    pub fn with_config(registry: TaskRegistry, config: PoolConfig) -> Result<Self> {
        let (events_tx, events_rx) = unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Arc::new(registry),
            config,
            state: Mutex::new(State {
                workers: HashMap::new(),
                idle: VecDeque::new(),
                assigned: HashMap::new(),
                pending: VecDeque::new(),
                registrations: Vec::new(),
                next_worker_id: 0,
                shutting_down: false,
            }),
            in_flight: DashMap::new(),
            events_tx,
            counters: Counters {
                submitted: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                replaced: AtomicUsize::new(0),
            },
        });

        {
            let mut state = shared.state.lock();
            for _ in 0..shared.config.workers {
                shared.spawn_worker_locked(&mut state)?;
            }
        }
        tracing::info!(workers = shared.config.workers, "pool started");

        let pump = tokio::spawn(pump_events(Arc::clone(&shared), events_rx));
        Ok(Self { shared, pump })
    }

    /// Submit a plain task registered under `name`.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the pool is terminating; `QueueFull` if the pending
    /// queue is at its bound. Unknown names are reported through the
    /// returned handle, not here, since only workers consult the registry.
    pub fn submit(&self, name: impl Into<String>, args: Vec<Value>) -> Result<TaskHandle> {
        self.submit_inner(name.into(), args, EntryKind::Plain)
    }

    /// Submit a shared task registered under `name`; the task receives the
    /// worker's channel-lookup view as its first parameter.
    pub fn submit_shared(&self, name: impl Into<String>, args: Vec<Value>) -> Result<TaskHandle> {
        self.submit_inner(name.into(), args, EntryKind::Shared)
    }

    fn submit_inner(&self, name: String, args: Vec<Value>, entry: EntryKind) -> Result<TaskHandle> {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            return Err(WeftError::Shutdown);
        }
        if state.pending.len() >= self.shared.config.max_pending {
            return Err(WeftError::QueueFull {
                current: state.pending.len(),
                max: self.shared.config.max_pending,
            });
        }

        let task_id = TaskId::new();
        let (tx, rx) = oneshot::channel();
        self.shared.in_flight.insert(task_id, tx);
        state.pending.push_back(Submission {
            task_id,
            name,
            args,
            entry,
        });
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.dispatch_locked(&mut state);

        tracing::debug!(task = %task_id, "submitted task");
        Ok(TaskHandle { task_id, rx })
    }

    /// Register a channel under `id` with every worker.
    ///
    /// The registration is recorded so replacement workers receive it too;
    /// re-registering an id replaces the previous handle on every worker.
    pub fn register_channel(&self, id: impl Into<ChannelId>, channel: Channel) {
        let id = id.into();
        let mut state = self.shared.state.lock();
        state.registrations.push((id.clone(), channel.clone()));
        for handle in state.workers.values() {
            // Unreachable workers surface through their termination event.
            let _ = handle.send(WorkerRequest::Register {
                id: id.clone(),
                channel: channel.clone(),
            });
        }
        tracing::debug!(channel = %id, workers = state.workers.len(), "registered channel");
    }

    /// Ids of the workers currently alive.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let state = self.shared.state.lock();
        let mut ids: Vec<WorkerId> = state.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Forcibly stop one worker, bypassing graceful shutdown.
    ///
    /// The pool treats this as a worker failure: a replacement is spawned
    /// (receiving the registration history) and any task assigned to the
    /// victim is rejected with `WorkerFailure`. Returns false if no such
    /// worker exists.
    pub fn kill_worker(&self, id: WorkerId) -> bool {
        let state = self.shared.state.lock();
        match state.workers.get(&id) {
            Some(handle) => handle.send(WorkerRequest::Abort).is_ok(),
            None => false,
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            workers: state.workers.len(),
            idle: state.idle.len(),
            pending: state.pending.len(),
            submitted: self.shared.counters.submitted.load(Ordering::Relaxed),
            completed: self.shared.counters.completed.load(Ordering::Relaxed),
            failed: self.shared.counters.failed.load(Ordering::Relaxed),
            replaced: self.shared.counters.replaced.load(Ordering::Relaxed),
        }
    }

    /// Shut the pool down.
    ///
    /// Already-dispatched tasks run to completion (their handles resolve
    /// normally); queued tasks are discarded and their handles fail with
    /// `Shutdown`. Waits for every worker thread to terminate. Idempotent.
    pub async fn terminate(&self) {
        let (threads, discarded) = {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
            let discarded: Vec<TaskId> = state.pending.drain(..).map(|s| s.task_id).collect();
            for handle in state.workers.values() {
                let _ = handle.send(WorkerRequest::Shutdown);
            }
            let threads: Vec<(WorkerId, std::thread::JoinHandle<()>)> = state
                .workers
                .values_mut()
                .filter_map(|h| h.thread.take().map(|t| (h.id, t)))
                .collect();
            state.idle.clear();
            (threads, discarded)
        };

        for task_id in discarded {
            if let Some((_, tx)) = self.shared.in_flight.remove(&task_id) {
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(Err(WeftError::Shutdown));
            }
        }

        for (worker_id, thread) in threads {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!(worker = %worker_id, "worker thread did not shut down cleanly");
            }
        }

        let mut state = self.shared.state.lock();
        state.workers.clear();
        state.assigned.clear();
        tracing::info!("pool terminated");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Workers notice their inbox closing once the state (and with it
        // every WorkerHandle) is dropped; the pump has nothing left to do.
        self.pump.abort();
    }
}

impl Shared {
    /// Spawn a worker, replay the registration history into it, and mark it
    /// idle. Caller holds the state lock.
    fn spawn_worker_locked(&self, state: &mut State) -> Result<WorkerId> {
        let id = WorkerId::new(state.next_worker_id);
        state.next_worker_id += 1;

        let handle = WorkerHandle::spawn(id, Arc::clone(&self.registry), self.events_tx.clone())?;
        for (channel_id, channel) in &state.registrations {
            handle.send(WorkerRequest::Register {
                id: channel_id.clone(),
                channel: channel.clone(),
            })?;
        }

        tracing::debug!(worker = %id, replayed = state.registrations.len(), "spawned worker");
        state.workers.insert(id, handle);
        state.idle.push_back(id);
        Ok(id)
    }

    /// Pair pending tasks with idle workers. Caller holds the state lock.
    fn dispatch_locked(&self, state: &mut State) {
        while !state.pending.is_empty() {
            let Some(worker_id) = state.idle.pop_front() else {
                break;
            };
            let Some(submission) = state.pending.pop_front() else {
                state.idle.push_front(worker_id);
                break;
            };

            let delivered = match state.workers.get(&worker_id) {
                Some(handle) => handle
                    .send(WorkerRequest::Execute {
                        task_id: submission.task_id,
                        name: submission.name.clone(),
                        args: submission.args.clone(),
                        entry: submission.entry,
                    })
                    .is_ok(),
                None => false,
            };

            if delivered {
                tracing::debug!(task = %submission.task_id, worker = %worker_id, "dispatched task");
                state.assigned.insert(worker_id, submission.task_id);
            } else {
                // Task was not taken; requeue it ahead of the line. The
                // worker's termination event handles replacement.
                tracing::warn!(worker = %worker_id, "worker unreachable at dispatch");
                state.workers.remove(&worker_id);
                state.pending.push_front(submission);
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply {
                worker_id,
                task_id,
                result,
            } => {
                if let Some((_, tx)) = self.in_flight.remove(&task_id) {
                    let counter = if result.is_ok() {
                        &self.counters.completed
                    } else {
                        &self.counters.failed
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(result);
                }

                let mut state = self.state.lock();
                state.assigned.remove(&worker_id);
                if !state.shutting_down && state.workers.contains_key(&worker_id) {
                    state.idle.push_back(worker_id);
                    self.dispatch_locked(&mut state);
                }
            }
            WorkerEvent::Terminated {
                worker_id,
                graceful,
            } => {
                let mut state = self.state.lock();
                state.workers.remove(&worker_id);
                state.idle.retain(|id| *id != worker_id);
                let orphaned = state.assigned.remove(&worker_id);

                if graceful || state.shutting_down {
                    return;
                }

                tracing::warn!(worker = %worker_id, "worker exited unexpectedly");
                if let Some(task_id) = orphaned {
                    if let Some((_, tx)) = self.in_flight.remove(&task_id) {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        let _ = tx.send(Err(WeftError::WorkerFailure {
                            worker_id,
                            cause: "worker exited while the task was assigned".to_string(),
                        }));
                    }
                }

                if state.workers.len() < self.config.workers {
                    match self.spawn_worker_locked(&mut state) {
                        Ok(replacement) => {
                            self.counters.replaced.fetch_add(1, Ordering::Relaxed);
                            tracing::info!(
                                failed = %worker_id,
                                replacement = %replacement,
                                "replaced worker"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to spawn replacement worker");
                        }
                    }
                }
                self.dispatch_locked(&mut state);
            }
        }
    }
}

async fn pump_events(shared: Arc<Shared>, mut events: UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        shared.handle_event(event);
    }
}
