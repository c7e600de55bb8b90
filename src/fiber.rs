//! Scheduling of cooperative worker tasks.
//!
//! A pipeline reserves one [`Worker`] from a user-supplied [`Scheduler`]
//! and submits exactly one task to it. The task suspends cooperatively (on
//! a [`ParkLatch`](crate::ParkLatch)) and is cancelled through a
//! [`FiberHandle`]: aborting wakes the task so a suspended worker is
//! dropped promptly rather than waiting for its next wake-up.
//!
//! Dropping a worker task is the crate's unwinding path. Pipeline tasks
//! carry their teardown in a drop guard, so "cancel while suspended" and
//! "ran to completion" release resources the same way.

use futures::future::{abortable, AbortHandle, BoxFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use wasm_safe_mutex::Mutex;

/// A unit of work submitted to a [`Worker`].
pub type FiberTask = BoxFuture<'static, ()>;

/// Source of [`Worker`]s. Each pipeline calls `create_worker` once.
pub trait Scheduler {
    type Worker: Worker;
    fn create_worker(&self) -> Self::Worker;
}

/// A disposable executor for cooperative tasks.
pub trait Worker: Send + Sync + 'static {
    /// Submit a task. Tasks submitted after [`dispose`](Worker::dispose)
    /// are dropped without running.
    fn schedule(&self, task: FiberTask);

    /// Release the worker. Idempotent; drops tasks that never started and
    /// lets the worker's thread wind down. Must not block and must not
    /// panic across this boundary.
    fn dispose(&self);
}

/// Cancel-capable handle to a spawned task.
///
/// Cancelling wakes the task if it is suspended; the task is then dropped
/// instead of being polled again.
pub struct FiberHandle {
    abort: AbortHandle,
}

impl FiberHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// Wrap a task so it can be cancelled remotely.
///
/// Returns the task to submit to a [`Worker`] and the [`FiberHandle`] that
/// cancels it. Cancelling an already-finished task is a no-op.
pub fn cancellable(task: BoxFuture<'static, ()>) -> (FiberTask, FiberHandle) {
    let (wrapped, abort) = abortable(task);
    let task: FiberTask = Box::pin(async move {
        let _ = wrapped.await;
    });
    (task, FiberHandle { abort })
}

/// One-shot teardown closure; taking it under the lock makes it run exactly
/// once no matter which side gets there first.
pub(crate) struct Cleanup {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Cleanup {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Cleanup {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    pub(crate) fn run(&self) {
        let action = self.action.lock_sync().take();
        if let Some(action) = action {
            action();
        }
    }
}

enum Slot {
    Empty,
    Running(FiberHandle),
    Terminated,
}

/// The pipeline's fiber slot: `{empty, running(handle), terminated}`.
///
/// Resolves the race between "spawn task" and "cancel or terminate before
/// the handle is stored": installing into a terminated slot cancels the
/// incoming handle instead.
pub(crate) struct FiberCell {
    slot: Mutex<Slot>,
}

impl FiberCell {
    pub(crate) fn new() -> Self {
        FiberCell {
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Install a freshly spawned handle. If the slot is already occupied
    /// or the pipeline already reached a terminal state, the incoming
    /// handle is cancelled on the spot.
    pub(crate) fn set(&self, handle: FiberHandle) {
        let mut slot = self.slot.lock_sync();
        match &*slot {
            Slot::Empty => *slot = Slot::Running(handle),
            Slot::Running(_) | Slot::Terminated => {
                drop(slot);
                handle.cancel();
            }
        }
    }

    /// Mark the pipeline terminal, returning a running handle if one was
    /// installed. Later `set` calls cancel their handle.
    pub(crate) fn terminate(&self) -> Option<FiberHandle> {
        let mut slot = self.slot.lock_sync();
        match std::mem::replace(&mut *slot, Slot::Terminated) {
            Slot::Running(handle) => Some(handle),
            Slot::Empty | Slot::Terminated => None,
        }
    }
}

/// A [`Scheduler`] backed by one dedicated thread per worker.
///
/// Each worker owns a thread that drives submitted tasks to completion one
/// at a time with `futures::executor::block_on`; a suspended task parks the
/// thread until a latch resume (or an abort) wakes it. Disposing the worker
/// closes its queue: tasks that never started are dropped, and the thread
/// exits once the current task finishes.
///
/// # Examples
///
/// ```
/// use fiber_flow::{Scheduler, Worker};
///
/// let scheduler = fiber_flow::ThreadScheduler::new();
/// let worker = scheduler.create_worker();
/// worker.schedule(Box::pin(async {}));
/// worker.dispose();
/// ```
pub struct ThreadScheduler;

impl ThreadScheduler {
    pub fn new() -> Self {
        ThreadScheduler
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    type Worker = ThreadWorker;

    fn create_worker(&self) -> ThreadWorker {
        let (sender, receiver) = mpsc::channel::<FiberTask>();
        // The thread is detached; it exits when the channel closes.
        let _ = thread::Builder::new()
            .name("fiber-worker".into())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    futures::executor::block_on(task);
                }
            })
            .expect("failed to spawn fiber worker thread");
        ThreadWorker {
            sender: Mutex::new(Some(sender)),
            disposed: AtomicBool::new(false),
        }
    }
}

/// Worker half of [`ThreadScheduler`].
pub struct ThreadWorker {
    sender: Mutex<Option<mpsc::Sender<FiberTask>>>,
    disposed: AtomicBool,
}

impl Worker for ThreadWorker {
    fn schedule(&self, task: FiberTask) {
        // The lock is released before the task can be dropped: a dropped
        // pipeline task runs its teardown guard, which disposes this worker.
        let sender = self.sender.lock_sync().clone();
        match sender {
            // A send only fails when the thread is already gone; the task
            // is dropped either way, which runs its teardown guard.
            Some(sender) => {
                let _ = sender.send(task);
            }
            None => drop(task),
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Closing the channel drops queued tasks and ends the thread's
        // receive loop after the task in flight completes.
        self.sender.lock_sync().take();
    }
}
