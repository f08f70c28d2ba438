use std::{
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{sync::oneshot, task::JoinHandle, time::sleep};
use uuid::Uuid;

use crate::dao::models::UserId;

/// Deadline a session can be waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// The chooser must pick a category.
    QuizCategory,
    /// Unanswered questions are filled in as wrong.
    QuizQuestion,
    /// Pause between two rounds.
    QuizRoundBreak,
    /// Heads-up shortly before a turn deadline.
    TodWarning,
    /// The awaited player forfeits.
    TodDeadline,
}

/// Timers keyed by session and deadline kind.
pub type TimerSet = TaskSet<(Uuid, TimerKind)>;
/// Matchmaking search loops keyed by user.
pub type SearchTasks = TaskSet<UserId>;

struct TaskEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Supervised background tasks, at most one per key.
///
/// Scheduling under an occupied key aborts the previous task. A task unregisters itself
/// when it starts running its body, so a body that reschedules its own key is never aborted.
pub struct TaskSet<K: Eq + Hash> {
    entries: Arc<DashMap<K, TaskEntry>>,
    generation: Arc<AtomicU64>,
}

impl<K: Eq + Hash> Clone for TaskSet<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<K: Eq + Hash> Default for TaskSet<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<K> TaskSet<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Empty set; nothing is scheduled until [`TaskSet::spawn`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing whatever was registered under `key`.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let own_key = key.clone();

        let (registered, wait_registered) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = wait_registered.await;
            if !delay.is_zero() {
                sleep(delay).await;
            }
            entries.remove_if(&own_key, |_, entry| entry.generation == generation);
            task.await;
        });

        self.register(key, generation, handle);
        let _ = registered.send(());
    }

    /// Run `task` immediately under `key`. The entry stays registered until the body ends.
    pub fn spawn<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let own_key = key.clone();

        let (registered, wait_registered) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = wait_registered.await;
            task.await;
            entries.remove_if(&own_key, |_, entry| entry.generation == generation);
        });

        self.register(key, generation, handle);
        let _ = registered.send(());
    }

    fn register(&self, key: K, generation: u64, handle: JoinHandle<()>) {
        if let Some(previous) = self.entries.insert(key, TaskEntry { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Abort the task registered under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every task whose key matches `predicate`.
    pub fn cancel_where(&self, predicate: impl Fn(&K) -> bool) {
        self.entries.retain(|key, entry| {
            if predicate(key) {
                entry.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Whether a task for `key` is registered and has not finished.
    pub fn is_pending(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of running tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is running.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TimerSet {
    /// Abort every timer of `session`.
    pub fn cancel_session(&self, session: Uuid) {
        self.cancel_where(|(id, _)| *id == session);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replaced_timer_never_fires() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let session = Uuid::new_v4();

        for _ in 0..3 {
            let fired = fired.clone();
            timers.schedule(
                (session, TimerKind::QuizQuestion),
                Duration::from_secs(25),
                async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_is_dropped() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let session = Uuid::new_v4();
        let key = (session, TimerKind::TodDeadline);

        let counter = fired.clone();
        timers.schedule(key, Duration::from_secs(60), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.is_pending(&key));
        assert!(timers.cancel(&key));

        sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_session_keeps_other_sessions() {
        let timers = TimerSet::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        timers.schedule((first, TimerKind::TodWarning), Duration::from_secs(5), async {});
        timers.schedule((first, TimerKind::TodDeadline), Duration::from_secs(5), async {});
        timers.schedule((second, TimerKind::TodDeadline), Duration::from_secs(5), async {});

        timers.cancel_session(first);
        assert_eq!(timers.len(), 1);
        assert!(timers.is_pending(&(second, TimerKind::TodDeadline)));
    }

    #[tokio::test(start_paused = true)]
    async fn body_can_reschedule_its_own_key() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = (Uuid::new_v4(), TimerKind::QuizQuestion);

        let inner_timers = timers.clone();
        let counter = fired.clone();
        timers.schedule(key, Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = counter.clone();
            inner_timers.schedule(key, Duration::from_secs(1), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
