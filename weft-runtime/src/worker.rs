//! Worker execution contexts.
//!
//! A worker is a long-lived OS thread, single-threaded internally, that
//! consumes requests from its inbox: channel registrations, task
//! executions, and termination. Exactly one reply event is produced per
//! execution; panics inside task bodies are caught and reported as errors.

use crate::registry::{ChannelLookup, EntryKind, TaskEntry, TaskRegistry};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use weft_core::{Channel, ChannelId, Result, TaskId, Value, WeftError, WorkerId};

/// A request delivered to a worker's inbox.
pub(crate) enum WorkerRequest {
    /// Add or replace a channel registration.
    Register { id: ChannelId, channel: Channel },
    /// Execute a registered task and reply with its result.
    Execute {
        task_id: TaskId,
        name: String,
        args: Vec<Value>,
        entry: EntryKind,
    },
    /// Finish the current request stream and exit gracefully.
    Shutdown,
    /// Exit immediately without the graceful mark (crash injection).
    Abort,
}

/// An event a worker reports back to the pool.
pub(crate) enum WorkerEvent {
    /// Result of one task execution.
    Reply {
        worker_id: WorkerId,
        task_id: TaskId,
        result: Result<Value>,
    },
    /// The worker's thread is exiting.
    Terminated { worker_id: WorkerId, graceful: bool },
}

/// Pool-side handle to a spawned worker.
pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    inbox: UnboundedSender<WorkerRequest>,
    pub thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker thread wired to the pool's event stream.
    pub fn spawn(
        id: WorkerId,
        registry: Arc<TaskRegistry>,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let (inbox_tx, inbox_rx) = unbounded_channel();
        let thread = thread::Builder::new()
            .name(format!("{}", id))
            .spawn(move || run(id, &registry, inbox_rx, &events))
            .map_err(|e| WeftError::WorkerFailure {
                worker_id: id,
                cause: format!("failed to spawn thread: {}", e),
            })?;

        Ok(Self {
            id,
            inbox: inbox_tx,
            thread: Some(thread),
        })
    }

    /// Deliver a request. Fails if the worker thread is gone.
    pub fn send(&self, request: WorkerRequest) -> Result<()> {
        self.inbox
            .send(request)
            .map_err(|_| WeftError::WorkerFailure {
                worker_id: self.id,
                cause: "worker inbox is closed".to_string(),
            })
    }
}

/// Worker thread main loop.
fn run(
    id: WorkerId,
    registry: &TaskRegistry,
    mut inbox: UnboundedReceiver<WorkerRequest>,
    events: &UnboundedSender<WorkerEvent>,
) {
    tracing::debug!(worker = %id, "worker started");
    let mut channels: HashMap<ChannelId, Channel> = HashMap::new();
    let mut graceful = false;

    while let Some(request) = inbox.blocking_recv() {
        match request {
            WorkerRequest::Register { id: channel_id, channel } => {
                tracing::debug!(worker = %id, channel = %channel_id, "registered channel");
                channels.insert(channel_id, channel);
            }
            WorkerRequest::Execute {
                task_id,
                name,
                args,
                entry,
            } => {
                let result = execute(registry, &channels, &name, args, entry);
                if let Err(ref e) = result {
                    tracing::debug!(worker = %id, task = %task_id, error = %e, "task failed");
                }
                let reply = WorkerEvent::Reply {
                    worker_id: id,
                    task_id,
                    result,
                };
                if events.send(reply).is_err() {
                    // Pool is gone; nothing left to serve.
                    break;
                }
            }
            WorkerRequest::Shutdown => {
                graceful = true;
                break;
            }
            WorkerRequest::Abort => break,
        }
    }

    let _ = events.send(WorkerEvent::Terminated {
        worker_id: id,
        graceful,
    });
    tracing::debug!(worker = %id, graceful, "worker stopped");
}

/// Run one task invocation, converting panics into error results.
fn execute(
    registry: &TaskRegistry,
    channels: &HashMap<ChannelId, Channel>,
    name: &str,
    args: Vec<Value>,
    entry: EntryKind,
) -> Result<Value> {
    let task = registry.get(name).ok_or_else(|| WeftError::TaskNotFound {
        name: name.to_string(),
    })?;

    if task.kind() != entry {
        return Err(WeftError::TaskFailed {
            cause: format!(
                "task '{}' is registered with the {} entry point but was submitted as {}",
                name,
                task.kind(),
                entry
            ),
        });
    }

    let outcome = match task {
        TaskEntry::Plain(f) => catch_unwind(AssertUnwindSafe(|| f.as_ref()(args))),
        TaskEntry::Shared(f) => {
            let lookup = ChannelLookup::new(channels);
            catch_unwind(AssertUnwindSafe(|| f.as_ref()(&lookup, args)))
        }
    };

    match outcome {
        Ok(result) => result,
        Err(payload) => Err(WeftError::TaskFailed {
            cause: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry.register("echo", |mut args| {
            Ok(args.pop().unwrap_or_else(Value::null))
        });
        registry.register("boom", |_| -> Result<Value> { panic!("boom") });
        registry.register_shared("count_channels", |channels, _| {
            Ok(Value::int(channels.len() as i64))
        });
        Arc::new(registry)
    }

    fn recv_reply(events: &mut UnboundedReceiver<WorkerEvent>) -> (TaskId, Result<Value>) {
        loop {
            match events.blocking_recv().expect("event stream open") {
                WorkerEvent::Reply {
                    task_id, result, ..
                } => return (task_id, result),
                WorkerEvent::Terminated { .. } => panic!("worker terminated early"),
            }
        }
    }

    #[test]
    fn executes_and_replies() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let worker = WorkerHandle::spawn(WorkerId::new(0), test_registry(), events_tx).unwrap();

        let task_id = TaskId::new();
        worker
            .send(WorkerRequest::Execute {
                task_id,
                name: "echo".to_string(),
                args: vec![Value::int(7)],
                entry: EntryKind::Plain,
            })
            .unwrap();

        let (replied_id, result) = recv_reply(&mut events_rx);
        assert_eq!(replied_id, task_id);
        assert_eq!(result.unwrap(), Value::int(7));

        worker.send(WorkerRequest::Shutdown).unwrap();
    }

    #[test]
    fn panic_becomes_error_reply_and_worker_survives() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let worker = WorkerHandle::spawn(WorkerId::new(1), test_registry(), events_tx).unwrap();

        worker
            .send(WorkerRequest::Execute {
                task_id: TaskId::new(),
                name: "boom".to_string(),
                args: vec![],
                entry: EntryKind::Plain,
            })
            .unwrap();
        let (_, result) = recv_reply(&mut events_rx);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("boom"));

        // The worker keeps serving after a caught panic.
        worker
            .send(WorkerRequest::Execute {
                task_id: TaskId::new(),
                name: "echo".to_string(),
                args: vec![Value::int(1)],
                entry: EntryKind::Plain,
            })
            .unwrap();
        let (_, result) = recv_reply(&mut events_rx);
        assert_eq!(result.unwrap(), Value::int(1));

        worker.send(WorkerRequest::Shutdown).unwrap();
    }

    #[test]
    fn unknown_task_is_reported() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let worker = WorkerHandle::spawn(WorkerId::new(2), test_registry(), events_tx).unwrap();

        worker
            .send(WorkerRequest::Execute {
                task_id: TaskId::new(),
                name: "missing".to_string(),
                args: vec![],
                entry: EntryKind::Plain,
            })
            .unwrap();
        let (_, result) = recv_reply(&mut events_rx);
        assert_eq!(
            result.unwrap_err(),
            WeftError::TaskNotFound {
                name: "missing".to_string()
            }
        );
        worker.send(WorkerRequest::Shutdown).unwrap();
    }

    #[test]
    fn entry_kind_mismatch_is_rejected() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let worker = WorkerHandle::spawn(WorkerId::new(3), test_registry(), events_tx).unwrap();

        worker
            .send(WorkerRequest::Execute {
                task_id: TaskId::new(),
                name: "count_channels".to_string(),
                args: vec![],
                entry: EntryKind::Plain,
            })
            .unwrap();
        let (_, result) = recv_reply(&mut events_rx);
        assert_eq!(result.unwrap_err().code(), "E205");
        worker.send(WorkerRequest::Shutdown).unwrap();
    }

    #[test]
    fn registration_is_visible_to_shared_tasks() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let worker = WorkerHandle::spawn(WorkerId::new(4), test_registry(), events_tx).unwrap();

        let chan = Channel::create(1, 64).unwrap();
        worker
            .send(WorkerRequest::Register {
                id: ChannelId::new("data"),
                channel: chan.clone(),
            })
            .unwrap();
        // Re-registration under the same id replaces, not duplicates.
        worker
            .send(WorkerRequest::Register {
                id: ChannelId::new("data"),
                channel: chan,
            })
            .unwrap();

        worker
            .send(WorkerRequest::Execute {
                task_id: TaskId::new(),
                name: "count_channels".to_string(),
                args: vec![],
                entry: EntryKind::Shared,
            })
            .unwrap();
        let (_, result) = recv_reply(&mut events_rx);
        assert_eq!(result.unwrap(), Value::int(1));
        worker.send(WorkerRequest::Shutdown).unwrap();
    }

    #[test]
    fn abort_terminates_without_graceful_mark() {
        let (events_tx, mut events_rx) = unbounded_channel();
        let worker = WorkerHandle::spawn(WorkerId::new(5), test_registry(), events_tx).unwrap();

        worker.send(WorkerRequest::Abort).unwrap();
        loop {
            match events_rx.blocking_recv().expect("event stream open") {
                WorkerEvent::Terminated { graceful, .. } => {
                    assert!(!graceful);
                    break;
                }
                WorkerEvent::Reply { .. } => {}
            }
        }
    }
}
