//! Per-key delayed tasks where a newer schedule replaces the pending one.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Runs a task once a key has been quiet for `delay`.
///
/// Scheduling a key again before its delay elapsed aborts the pending task,
/// so a burst of schedules results in a single run of the last task. A task
/// that has already started is left to finish.
pub struct DebounceScheduler<K> {
    delay: Duration,
    tasks: Mutex<HashMap<K, Pending>>,
}

struct Pending {
    handle: JoinHandle<()>,
    /// Set by whichever comes first: the task starting or a cancellation.
    claimed: Arc<AtomicBool>,
}

impl Pending {
    /// Abort the task if it is still waiting. Returns whether it was.
    fn cancel(self) -> bool {
        if self.claimed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.handle.abort();
        true
    }
}

impl<K> DebounceScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless `key` is scheduled again first.
    pub async fn schedule<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let claimed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn({
            let claimed = claimed.clone();
            async move {
                tokio::time::sleep(delay).await;
                if claimed.swap(true, Ordering::SeqCst) {
                    return;
                }
                task.await;
            }
        });

        if let Some(previous) = self.tasks.lock().await.insert(key, Pending { handle, claimed }) {
            previous.cancel();
        }
    }

    /// Drop the pending task of `key`. Returns whether one was still waiting.
    pub async fn cancel(&self, key: &K) -> bool {
        self.tasks
            .lock()
            .await
            .remove(key)
            .is_some_and(Pending::cancel)
    }

    /// Drop every pending task.
    pub async fn cancel_all(&self) {
        for (_, pending) in self.tasks.lock().await.drain() {
            pending.cancel();
        }
    }
}
