//! One-shot timers for deferred attribute persistence.
//!
//! The data model only needs "run this once after a delay", "is a timer for
//! this key armed" and "cancel it". [`TokioScheduler`] backs that with tasks
//! on a tokio runtime; [`ManualScheduler`] queues the work until the owner
//! calls [`ManualScheduler::fire_all`], which suits tests and hosts that
//! drive their own event loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::{DataModelError, Result};
use crate::matter::attribute::AttributeHandle;

pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

pub trait DeferredScheduler: Send + Sync {
    /// Arm a one-shot timer for `key`. Arming an already pending key
    /// replaces its task.
    fn schedule_once(&self, key: AttributeHandle, delay: Duration, task: DeferredTask);

    fn is_pending(&self, key: &AttributeHandle) -> bool;

    /// Disarm the timer for `key`, if any.
    fn cancel(&self, key: &AttributeHandle);
}

struct PendingTask {
    generation: u64,
    abort: AbortHandle,
}

type PendingTasks = Mutex<HashMap<AttributeHandle, PendingTask>>;

/// Remove the entry for `key` if it still belongs to `generation`. A task
/// that lost the entry to a reschedule or a cancel must not run.
fn take_if_current(tasks: &PendingTasks, key: &AttributeHandle, generation: u64) -> bool {
    let mut tasks = tasks.lock();
    match tasks.get(key) {
        Some(pending) if pending.generation == generation => {
            tasks.remove(key);
            true
        }
        _ => false,
    }
}

/// Scheduler spawning one sleeping task per key on a tokio runtime.
pub struct TokioScheduler {
    runtime: Handle,
    tasks: Arc<PendingTasks>,
    next_generation: AtomicU64,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Scheduler on the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            DataModelError::InvalidState(format!("no tokio runtime available: {}", e))
        })?;
        Ok(Self::new(runtime))
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl DeferredScheduler for TokioScheduler {
    fn schedule_once(&self, key: AttributeHandle, delay: Duration, task: DeferredTask) {
        let tasks = self.tasks.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        // Hold the map lock across the spawn so a zero delay task cannot
        // look for its entry before it is inserted.
        let mut guard = self.tasks.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if take_if_current(&tasks, &key, generation) {
                task();
            }
        });
        let pending = PendingTask {
            generation,
            abort: join.abort_handle(),
        };
        if let Some(previous) = guard.insert(key, pending) {
            previous.abort.abort();
        }
    }

    fn is_pending(&self, key: &AttributeHandle) -> bool {
        self.tasks.lock().contains_key(key)
    }

    fn cancel(&self, key: &AttributeHandle) {
        if let Some(pending) = self.tasks.lock().remove(key) {
            debug!("Cancelled deferred task for {}", key.path());
            pending.abort.abort();
        }
    }
}

/// Scheduler that runs queued tasks only when told to.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(AttributeHandle, Duration, DeferredTask)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run every queued task regardless of its delay. Returns how many ran.
    pub fn fire_all(&self) -> usize {
        let due = std::mem::take(&mut *self.queue.lock());
        let count = due.len();
        for (_, _, task) in due {
            task();
        }
        count
    }
}

impl DeferredScheduler for ManualScheduler {
    fn schedule_once(&self, key: AttributeHandle, delay: Duration, task: DeferredTask) {
        let mut queue = self.queue.lock();
        queue.retain(|(queued, _, _)| *queued != key);
        queue.push((key, delay, task));
    }

    fn is_pending(&self, key: &AttributeHandle) -> bool {
        self.queue.lock().iter().any(|(queued, _, _)| queued == key)
    }

    fn cancel(&self, key: &AttributeHandle) {
        self.queue.lock().retain(|(queued, _, _)| queued != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matter::attribute::{Attribute, AttributeFlags, AttributePath};
    use crate::matter::value::AttrValue;
    use std::sync::atomic::AtomicUsize;

    fn handle() -> AttributeHandle {
        Attribute::new(
            AttributePath::new(1, 0x0006, 0x0000),
            AttributeFlags::NONVOLATILE,
            AttrValue::boolean(false),
            0,
        )
        .handle_at(1, 0x0006)
    }

    fn counting_task(counter: &Arc<AtomicUsize>) -> DeferredTask {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_scheduler_fires_once() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = handle();

        scheduler.schedule_once(key, Duration::from_secs(3), counting_task(&counter));
        scheduler.schedule_once(key, Duration::from_secs(3), counting_task(&counter));
        assert!(scheduler.is_pending(&key));
        assert_eq!(scheduler.pending_count(), 1);

        assert_eq!(scheduler.fire_all(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending(&key));
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = handle();

        scheduler.schedule_once(key, Duration::ZERO, counting_task(&counter));
        scheduler.cancel(&key);
        assert_eq!(scheduler.fire_all(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_runs_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = handle();

        scheduler.schedule_once(key, Duration::from_millis(10), counting_task(&counter));
        assert!(scheduler.is_pending(&key));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending(&key));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_cancel() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = handle();

        scheduler.schedule_once(key, Duration::from_millis(20), counting_task(&counter));
        scheduler.cancel(&key);
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tokio_scheduler_reschedule_replaces_task() {
        tokio_test::block_on(async {
            let scheduler = TokioScheduler::current().unwrap();
            let counter = Arc::new(AtomicUsize::new(0));
            let key = handle();

            scheduler.schedule_once(key, Duration::from_millis(10), counting_task(&counter));
            scheduler.schedule_once(key, Duration::from_millis(10), counting_task(&counter));
            assert_eq!(scheduler.pending_count(), 1);

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        });
    }

    #[tokio::test]
    async fn test_tokio_scheduler_reschedule_keeps_later_deadline() {
        let scheduler = TokioScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = handle();

        scheduler.schedule_once(key, Duration::from_millis(10), counting_task(&counter));
        scheduler.schedule_once(key, Duration::from_millis(80), counting_task(&counter));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(scheduler.is_pending(&key));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!scheduler.is_pending(&key));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_superseded_task_leaves_replacement_pending() {
        let tasks: PendingTasks = Mutex::new(HashMap::new());
        let key = handle();
        let replacement = tokio::spawn(async {});
        tasks.lock().insert(
            key,
            PendingTask {
                generation: 2,
                abort: replacement.abort_handle(),
            },
        );

        // the task armed first wakes up after its replacement was inserted
        assert!(!take_if_current(&tasks, &key, 1));
        assert!(tasks.lock().contains_key(&key));

        assert!(take_if_current(&tasks, &key, 2));
        assert!(tasks.lock().is_empty());
        assert!(!take_if_current(&tasks, &key, 2));
    }

    #[test]
    fn test_current_without_runtime() {
        assert!(TokioScheduler::current().is_err());
    }
}
