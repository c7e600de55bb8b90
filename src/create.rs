//! The generator-driven pipeline: a user callback runs on a cooperative
//! task and pushes items downstream through a demand-aware emitter.

use crate::emitter::{EmitterState, FiberEmitter, FiberGenerator};
use crate::fiber::{cancellable, Cleanup, FiberCell, Scheduler, Worker};
use crate::flow::{is_stop, Publisher, Subscriber, Subscription};
use std::marker::PhantomData;
use std::sync::Arc;

/// Publisher returned by [`create()`](crate::create()).
///
/// Subscribing reserves one worker from the scheduler, announces the
/// subscription downstream, then runs the generator on the worker's task.
/// The generator's `emit` calls suspend whenever downstream demand is
/// exhausted and resume on `request`; cancelling wakes and releases the
/// task promptly.
pub struct FiberCreate<T, G, Sch> {
    generator: G,
    scheduler: Sch,
    _item: PhantomData<fn() -> T>,
}

impl<T, G, Sch> FiberCreate<T, G, Sch> {
    pub(crate) fn new(scheduler: Sch, generator: G) -> Self {
        FiberCreate {
            generator,
            scheduler,
            _item: PhantomData,
        }
    }
}

impl<T, G, Sch> Publisher<T> for FiberCreate<T, G, Sch>
where
    T: Send + 'static,
    G: FiberGenerator<T> + 'static,
    G::Future: 'static,
    Sch: Scheduler,
{
    fn subscribe<S>(self, subscriber: S)
    where
        S: Subscriber<T> + 'static,
    {
        let worker = Arc::new(self.scheduler.create_worker());
        let inner = Arc::new(CreateInner {
            out: Arc::new(EmitterState::new(Box::new(subscriber))),
            fiber: FiberCell::new(),
            cleanup: Cleanup::new({
                let worker = worker.clone();
                move || worker.dispose()
            }),
        });

        inner
            .out
            .on_subscribe(Arc::new(CreateSubscription {
                inner: inner.clone(),
            }));

        let (task, handle) = cancellable(Box::pin(run(inner.clone(), self.generator)));
        worker.schedule(task);
        inner.fiber.set(handle);
    }
}

struct CreateInner<T: Send> {
    out: Arc<EmitterState<T>>,
    fiber: FiberCell,
    cleanup: Cleanup,
}

struct CreateSubscription<T: Send> {
    inner: Arc<CreateInner<T>>,
}

impl<T: Send + 'static> Subscription for CreateSubscription<T> {
    fn request(&self, n: u64) {
        self.inner.out.request(n);
    }

    fn cancel(&self) {
        self.inner.out.set_cancelled();
        if let Some(handle) = self.inner.fiber.terminate() {
            handle.cancel();
        }
        // One unit of phantom demand so a suspended emit wakes and
        // observes the cancellation.
        self.inner.out.request(1);
    }
}

/// Releases the pipeline on every exit path, including an aborted task
/// being dropped mid-suspension.
struct CreateGuard<T: Send> {
    inner: Arc<CreateInner<T>>,
}

impl<T: Send> Drop for CreateGuard<T> {
    fn drop(&mut self) {
        self.inner.fiber.terminate();
        drop(self.inner.out.take_downstream());
        self.inner.cleanup.run();
    }
}

async fn run<T, G>(inner: Arc<CreateInner<T>>, generator: G)
where
    T: Send,
    G: FiberGenerator<T>,
{
    let _guard = CreateGuard {
        inner: inner.clone(),
    };
    let emitter = FiberEmitter::new(inner.out.clone());
    match generator.generate(emitter).await {
        Ok(()) => {
            if !inner.out.is_cancelled() {
                if let Some(mut downstream) = inner.out.take_downstream() {
                    downstream.on_complete();
                }
            }
        }
        Err(error) => {
            if !is_stop(&error) && !inner.out.is_cancelled() {
                if let Some(mut downstream) = inner.out.take_downstream() {
                    downstream.on_error(error);
                }
            }
        }
    }
}
