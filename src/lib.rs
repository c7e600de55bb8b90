//! Backpressure-aware bridging between reactive flows and cooperative
//! fiber tasks.
//!
//! This crate couples two independent asynchronous rates (a producer and a
//! consumer) through a demand counter and a bounded buffer, running the
//! user's code on a cooperative task that suspends instead of blocking or
//! dropping. It offers two operators:
//!
//! * [`create()`]: runs a generator callback on a fiber; its
//!   [`emit`](FiberEmitter::emit) suspends whenever downstream demand is
//!   exhausted and resumes when more items are requested.
//! * [`transform()`]: consumes an upstream [`Publisher`] through a bounded
//!   single-producer/single-consumer buffer and runs a per-item transformer
//!   on a fiber, propagating backpressure in both directions.
//!
//! # Key Features
//!
//! * **Demand-driven suspension**: producers never outrun consumers; a
//!   fiber parks on a [`ParkLatch`] until `request` raises demand.
//! * **Bounded buffering**: `transform` holds at most `prefetch` items,
//!   topping upstream demand back up at a 75% consumption watermark.
//! * **Prompt cancellation**: `cancel` is non-blocking, wakes both park
//!   points, and releases the fiber's worker exactly once.
//! * **Scheduler-agnostic**: pipelines run on any [`Scheduler`]; a
//!   dedicated-thread [`ThreadScheduler`] is included.
//!
//! # Design Philosophy
//!
//! * Signal paths (`request`, `cancel`, upstream `on_next`) are synchronous
//!   and wait-free; only the fiber itself ever suspends.
//! * Cancellation is cooperative: a suspended `emit` wakes and returns the
//!   [`Stop`] sentinel so user callbacks unwind through `?`, and a fiber
//!   that cannot make progress is woken and dropped.
//! * The worker task is the only caller of downstream signals, so the
//!   reactive serialization rules hold by construction.
//!
//! # Examples
//!
//! ## Generating a flow
//!
//! ```
//! use fiber_flow::{create, FiberEmitter, FlowError, Publisher, Subscriber, Subscription,
//!                  ThreadScheduler, UNBOUNDED};
//! use std::sync::{mpsc, Arc};
//!
//! struct Collect(mpsc::Sender<Option<u32>>);
//!
//! impl Subscriber<u32> for Collect {
//!     fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
//!         subscription.request(UNBOUNDED);
//!     }
//!     fn on_next(&mut self, item: u32) {
//!         self.0.send(Some(item)).unwrap();
//!     }
//!     fn on_error(&mut self, _error: FlowError) {
//!         self.0.send(None).unwrap();
//!     }
//!     fn on_complete(&mut self) {
//!         self.0.send(None).unwrap();
//!     }
//! }
//!
//! let (tx, rx) = mpsc::channel();
//! create(ThreadScheduler::new(), |emitter: FiberEmitter<u32>| async move {
//!     for i in 1..=3 {
//!         emitter.emit(i).await?;
//!     }
//!     Ok(())
//! })
//! .subscribe(Collect(tx));
//!
//! let mut received = Vec::new();
//! while let Some(item) = rx.recv().unwrap() {
//!     received.push(item);
//! }
//! assert_eq!(received, vec![1, 2, 3]);
//! ```
//!
//! ## Transforming a flow
//!
//! ```
//! use fiber_flow::{create, transform, FiberEmitter, Publisher, ThreadScheduler};
//! # use fiber_flow::{FlowError, Subscriber, Subscription, UNBOUNDED};
//! # use std::sync::{mpsc, Arc};
//! # struct Collect(mpsc::Sender<Option<u32>>);
//! # impl Subscriber<u32> for Collect {
//! #     fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
//! #         subscription.request(UNBOUNDED);
//! #     }
//! #     fn on_next(&mut self, item: u32) { self.0.send(Some(item)).unwrap(); }
//! #     fn on_error(&mut self, _error: FlowError) { self.0.send(None).unwrap(); }
//! #     fn on_complete(&mut self) { self.0.send(None).unwrap(); }
//! # }
//!
//! let numbers = create(ThreadScheduler::new(), |emitter: FiberEmitter<u32>| async move {
//!     for i in 1..=4 {
//!         emitter.emit(i).await?;
//!     }
//!     Ok(())
//! });
//!
//! let doubled = transform(numbers, ThreadScheduler::new(),
//!     |value: u32, emitter: FiberEmitter<u32>| async move {
//!         emitter.emit(value * 2).await
//!     });
//!
//! let (tx, rx) = mpsc::channel();
//! doubled.subscribe(Collect(tx));
//! let received: Vec<u32> = std::iter::from_fn(|| rx.recv().unwrap()).collect();
//! assert_eq!(received, vec![2, 4, 6, 8]);
//! ```

mod create;
mod demand;
mod emitter;
mod fiber;
mod flow;
mod latch;
#[cfg(test)]
pub(crate) mod testing;
mod transform;

pub use crate::create::FiberCreate;
pub use crate::demand::{Demand, UNBOUNDED};
pub use crate::emitter::{FiberEmitter, FiberGenerator, FiberTransformer};
pub use crate::fiber::{
    cancellable, FiberHandle, FiberTask, Scheduler, ThreadScheduler, ThreadWorker, Worker,
};
pub use crate::flow::{FlowError, Publisher, Stop, Subscriber, Subscription};
pub use crate::latch::{ParkLatch, Wait};
pub use crate::transform::FiberTransform;

/// Default number of upstream items buffered ahead of the worker, and the
/// unit of the initial upstream request.
///
/// 64 keeps a fast upstream from stalling on every refill while bounding
/// per-pipeline memory; override it with [`FiberTransform::prefetch`].
pub const DEFAULT_PREFETCH: usize = 64;

/// Run `generator` on a fiber scheduled by `scheduler`, producing a cold
/// flow of the items it emits.
///
/// The generator is invoked once per subscription with a [`FiberEmitter`];
/// returning `Ok(())` completes the flow, returning an error fails it, and
/// after cancellation the emitter's [`Stop`] error unwinds it silently.
pub fn create<T, G, Sch>(scheduler: Sch, generator: G) -> FiberCreate<T, G, Sch>
where
    T: Send + 'static,
    G: FiberGenerator<T> + 'static,
    Sch: Scheduler,
{
    FiberCreate::new(scheduler, generator)
}

/// Run `transformer` over each item of `source` on a fiber scheduled by
/// `scheduler`, producing a cold flow of the emitted results.
///
/// The source is buffered through a queue of [`DEFAULT_PREFETCH`] items
/// (tune with [`FiberTransform::prefetch`]); the transformer may emit any
/// number of results per input, suspending whenever downstream demand is
/// exhausted.
pub fn transform<T, R, P, F, Sch>(
    source: P,
    scheduler: Sch,
    transformer: F,
) -> FiberTransform<T, R, P, F, Sch>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Publisher<T>,
    F: FiberTransformer<T, R> + 'static,
    Sch: Scheduler,
{
    FiberTransform::new(source, scheduler, transformer, DEFAULT_PREFETCH)
}
