//! A one-shot-reusable park/unpark point for a single cooperative task.

use atomic_waker::AtomicWaker;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

/// A single-waiter suspension primitive with an idempotent wake.
///
/// One task calls [`wait`](ParkLatch::wait); any number of threads may call
/// [`resume`](ParkLatch::resume). A `resume` deposits a permit; a `wait`
/// consumes it, suspending first if none is present. The permit is a flag,
/// not a count: resuming twice before a wait still satisfies only one wait.
/// A `resume` that precedes the `wait` makes that wait return immediately,
/// exactly once.
///
/// Any write made before `resume` is visible after the paired `wait`
/// returns.
///
/// # Examples
///
/// ```
/// # async fn example() {
/// use fiber_flow::ParkLatch;
/// use std::sync::Arc;
/// use std::thread;
///
/// let latch = Arc::new(ParkLatch::new());
/// let signal = latch.clone();
/// thread::spawn(move || {
///     signal.resume();
/// });
/// latch.wait().await;
/// # }
/// ```
pub struct ParkLatch {
    permit: AtomicBool,
    waker: AtomicWaker,
}

impl ParkLatch {
    pub fn new() -> Self {
        ParkLatch {
            permit: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Deposit the permit and wake a parked waiter, if any.
    ///
    /// Idempotent while the permit is unclaimed.
    pub fn resume(&self) {
        self.permit.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Suspend until a permit is available, then consume it.
    ///
    /// Only one task may wait at a time.
    pub fn wait(&self) -> Wait<'_> {
        Wait { latch: self }
    }

    fn try_claim(&self) -> bool {
        self.permit.swap(false, Ordering::AcqRel)
    }
}

impl Default for ParkLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`ParkLatch::wait`].
pub struct Wait<'a> {
    latch: &'a ParkLatch,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let latch = self.latch;
        if latch.try_claim() {
            return Poll::Ready(());
        }
        latch.waker.register(cx.waker());
        // A resume may have landed between the claim attempt and the
        // registration; the re-check keeps that permit from being stranded.
        if latch.try_claim() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
