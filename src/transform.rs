//! The queue-coupled pipeline: an upstream flow is buffered into a bounded
//! queue and drained by a cooperative worker task that runs a per-item
//! transformer and pushes results downstream with backpressure.

use crate::emitter::{EmitterState, FiberEmitter, FiberTransformer};
use crate::fiber::{cancellable, Cleanup, FiberCell, Scheduler, Worker};
use crate::flow::{is_stop, FlowError, Publisher, Subscriber, Subscription};
use crate::latch::ParkLatch;
use crossbeam_queue::ArrayQueue;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wasm_safe_mutex::Mutex;

/// Publisher returned by [`transform()`](crate::transform()).
///
/// Subscribing reserves one worker from the scheduler, subscribes to the
/// source with `prefetch` initial demand, and drains the arriving items on
/// the worker's task: each is handed to the transformer, whose `emit`
/// calls suspend while downstream demand is exhausted. Upstream demand is
/// topped up by `prefetch - prefetch/4` every time that many items have
/// been consumed, so the buffer never holds more than `prefetch` items.
pub struct FiberTransform<T, R, P, F, Sch> {
    source: P,
    transformer: F,
    scheduler: Sch,
    prefetch: usize,
    _items: PhantomData<fn(T) -> R>,
}

impl<T, R, P, F, Sch> FiberTransform<T, R, P, F, Sch> {
    pub(crate) fn new(source: P, scheduler: Sch, transformer: F, prefetch: usize) -> Self {
        assert!(prefetch > 0, "prefetch must be positive");
        FiberTransform {
            source,
            transformer,
            scheduler,
            prefetch,
            _items: PhantomData,
        }
    }

    /// Replace the buffer capacity and upstream demand unit.
    ///
    /// # Panics
    ///
    /// Panics if `prefetch` is zero.
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        assert!(prefetch > 0, "prefetch must be positive");
        self.prefetch = prefetch;
        self
    }
}

impl<T, R, P, F, Sch> Publisher<R> for FiberTransform<T, R, P, F, Sch>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Publisher<T>,
    F: FiberTransformer<T, R> + 'static,
    F::Future: 'static,
    Sch: Scheduler,
{
    fn subscribe<S>(self, subscriber: S)
    where
        S: Subscriber<R> + 'static,
    {
        let worker = Arc::new(self.scheduler.create_worker());
        let inner = Arc::new(TransformInner {
            out: Arc::new(EmitterState::new(Box::new(subscriber))),
            queue: ArrayQueue::new(self.prefetch),
            prefetch: self.prefetch,
            wip: AtomicU64::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            upstream: Mutex::new(None),
            producer_ready: ParkLatch::new(),
            fiber: FiberCell::new(),
            cleanup: Cleanup::new({
                let worker = worker.clone();
                move || worker.dispose()
            }),
        });

        self.source.subscribe(UpstreamBridge {
            inner: inner.clone(),
        });

        let (task, handle) = cancellable(Box::pin(run(inner.clone(), self.transformer)));
        worker.schedule(task);
        inner.fiber.set(handle);
    }
}

struct TransformInner<T: Send, R: Send> {
    out: Arc<EmitterState<R>>,
    queue: ArrayQueue<T>,
    prefetch: usize,
    /// Producer/worker handoff arbiter: bumped by every upstream signal,
    /// settled down by the worker before it parks.
    wip: AtomicU64,
    done: AtomicBool,
    error: Mutex<Option<FlowError>>,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    producer_ready: ParkLatch,
    fiber: FiberCell,
    cleanup: Cleanup,
}

impl<T: Send, R: Send> TransformInner<T, R> {
    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock_sync().clone()
    }

    /// Upstream signalled; wake the worker on the 0 -> 1 transition.
    fn bump_wip(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.producer_ready.resume();
        }
    }

    fn drain_queue(&self) {
        while self.queue.pop().is_some() {}
    }
}

/// Subscriber installed on the source flow.
struct UpstreamBridge<T: Send, R: Send> {
    inner: Arc<TransformInner<T, R>>,
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for UpstreamBridge<T, R> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.inner.upstream.lock_sync() = Some(subscription.clone());
        self.inner.out.on_subscribe(Arc::new(TransformSubscription {
            inner: self.inner.clone(),
        }));
        subscription.request(self.inner.prefetch as u64);
    }

    fn on_next(&mut self, item: T) {
        // Upstream holds at most `prefetch` outstanding, so the push
        // cannot overflow a well-behaved flow; an excess item is dropped.
        let _ = self.inner.queue.push(item);
        self.inner.bump_wip();
    }

    fn on_error(&mut self, error: FlowError) {
        *self.inner.error.lock_sync() = Some(error);
        self.inner.done.store(true, Ordering::Release);
        self.inner.bump_wip();
    }

    fn on_complete(&mut self) {
        self.inner.done.store(true, Ordering::Release);
        self.inner.bump_wip();
    }
}

/// Subscription presented downstream.
struct TransformSubscription<T: Send, R: Send> {
    inner: Arc<TransformInner<T, R>>,
}

impl<T: Send + 'static, R: Send + 'static> Subscription for TransformSubscription<T, R> {
    fn request(&self, n: u64) {
        self.inner.out.request(n);
    }

    fn cancel(&self) {
        self.inner.out.set_cancelled();
        if let Some(handle) = self.inner.fiber.terminate() {
            handle.cancel();
        }
        self.inner.cleanup.run();
        self.inner.producer_ready.resume();
        self.inner.out.consumer_ready.resume();
    }
}

/// Releases the pipeline on every exit path, including an aborted task
/// being dropped mid-suspension.
struct TransformGuard<T: Send, R: Send> {
    inner: Arc<TransformInner<T, R>>,
}

impl<T: Send, R: Send> Drop for TransformGuard<T, R> {
    fn drop(&mut self) {
        self.inner.drain_queue();
        self.inner.fiber.terminate();
        drop(self.inner.out.take_downstream());
        self.inner.cleanup.run();
    }
}

async fn run<T, R, F>(inner: Arc<TransformInner<T, R>>, mut transformer: F)
where
    T: Send,
    R: Send,
    F: FiberTransformer<T, R>,
{
    let _guard = TransformGuard {
        inner: inner.clone(),
    };
    let outcome = drain(&inner, &mut transformer).await;
    if let Err(error) = outcome {
        if !is_stop(&error) && !inner.out.is_cancelled() {
            if let Some(upstream) = inner.upstream() {
                upstream.cancel();
            }
            if let Some(mut downstream) = inner.out.take_downstream() {
                downstream.on_error(error);
            }
        }
    }
}

async fn drain<T, R, F>(
    inner: &Arc<TransformInner<T, R>>,
    transformer: &mut F,
) -> Result<(), FlowError>
where
    T: Send,
    R: Send,
    F: FiberTransformer<T, R>,
{
    let limit = inner.prefetch - (inner.prefetch >> 2);
    let mut consumed = 0usize;
    let mut wip_seen = 0u64;

    while !inner.out.is_cancelled() {
        // `done` is read before the poll: a terminal signal follows the
        // last offer, so an empty poll after observing `done` means the
        // queue really is drained.
        let done = inner.done.load(Ordering::Acquire);
        match inner.queue.pop() {
            Some(item) => {
                consumed += 1;
                if consumed == limit {
                    consumed = 0;
                    if let Some(upstream) = inner.upstream() {
                        upstream.request(limit as u64);
                    }
                }
                transformer
                    .transform(item, FiberEmitter::new(inner.out.clone()))
                    .await?;
            }
            None if done => {
                let failure = inner.error.lock_sync().take();
                if let Some(mut downstream) = inner.out.take_downstream() {
                    match failure {
                        Some(error) => downstream.on_error(error),
                        None => downstream.on_complete(),
                    }
                }
                break;
            }
            None => {
                wip_seen = inner.wip.fetch_sub(wip_seen, Ordering::AcqRel) - wip_seen;
                if wip_seen == 0 {
                    inner.producer_ready.wait().await;
                }
            }
        }
    }
    Ok(())
}
