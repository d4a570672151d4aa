//! Keyed, cancellable delayed tasks.
//!
//! At most one task is pending per key. Scheduling under a key that already
//! has a pending task aborts the old one, so a new bump replaces a stale
//! reminder deterministically.

use crate::ids::{ChannelId, GuildId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

/// Keys for the bot's delayed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    BumpReminder(GuildId),
    ChannelTeardown(ChannelId),
}

/// Pending delayed tasks by key.
#[derive(Default)]
pub struct Scheduler {
    tasks: Arc<DashMap<TaskKey, (u64, AbortHandle)>>,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing whatever was pending under `key`.
    ///
    /// Returns true if a pending task was replaced.
    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let task_key = key;

        // Hold the entry while spawning so the task cannot clear its slot
        // before the slot exists.
        let entry = self.tasks.entry(key);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            tasks.remove_if(&task_key, |_, (current, _)| *current == generation);
        });
        let abort = handle.abort_handle();

        match entry {
            Entry::Occupied(mut occupied) => {
                let (_, stale) = occupied.insert((generation, abort));
                stale.abort();
                debug!(key = ?occupied.key(), "Replaced pending task");
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert((generation, abort));
                false
            }
        }
    }

    /// Abort the task pending under `key`. Returns false if none was pending.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks.remove(key) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of pending tasks.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().1.abort();
        }
    }
}
