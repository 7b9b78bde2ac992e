//! Name-keyed registry of task functions.
//!
//! Every worker holds the same registry, so a task body never travels over
//! the wire: a submission carries only a name and arguments. The two entry
//! kinds are distinct registrations; whether a task receives the channel
//! lookup capability is decided here, at registration time.

use std::collections::HashMap;
use std::sync::Arc;
use weft_core::{Channel, ChannelId, Result, Value};

/// Result of one task invocation.
pub type TaskResult = Result<Value>;

type PlainFn = Arc<dyn Fn(Vec<Value>) -> TaskResult + Send + Sync>;
type SharedFn = Arc<dyn Fn(&ChannelLookup<'_>, Vec<Value>) -> TaskResult + Send + Sync>;

/// Which entry point a task was registered (and must be submitted) under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Arguments are passed verbatim.
    Plain,
    /// A [`ChannelLookup`] view is injected as the first parameter.
    Shared,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

pub(crate) enum TaskEntry {
    Plain(PlainFn),
    Shared(SharedFn),
}

impl TaskEntry {
    pub(crate) fn kind(&self) -> EntryKind {
        match self {
            Self::Plain(_) => EntryKind::Plain,
            Self::Shared(_) => EntryKind::Shared,
        }
    }
}

/// Read-only view over a worker's registered channels, injected into shared
/// tasks as their first parameter.
pub struct ChannelLookup<'a> {
    channels: &'a HashMap<ChannelId, Channel>,
}

impl<'a> ChannelLookup<'a> {
    pub(crate) fn new(channels: &'a HashMap<ChannelId, Channel>) -> Self {
        Self { channels }
    }

    /// Resolve a channel handle by registered id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Channel> {
        self.channels.get(&ChannelId::new(id)).cloned()
    }

    /// Ids currently registered with this worker.
    pub fn ids(&self) -> impl Iterator<Item = &ChannelId> {
        self.channels.keys()
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Registry mapping stable task names to invokable bodies.
///
/// Built by the host before pool construction; every worker (including
/// replacements) executes out of the same registry.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskEntry>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain task: arguments in, value out.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Fn(Vec<Value>) -> TaskResult + Send + Sync + 'static,
    {
        self.tasks
            .insert(name.into(), TaskEntry::Plain(Arc::new(task)));
    }

    /// Register a shared task: it receives the worker's [`ChannelLookup`]
    /// as a distinct first parameter, then the arguments.
    pub fn register_shared<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Fn(&ChannelLookup<'_>, Vec<Value>) -> TaskResult + Send + Sync + 'static,
    {
        self.tasks
            .insert(name.into(), TaskEntry::Shared(Arc::new(task)));
    }

    /// Whether a task is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&TaskEntry> {
        self.tasks.get(name)
    }
}
