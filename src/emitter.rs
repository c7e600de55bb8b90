//! The user-facing, demand-aware `emit` shared by both pipelines.

use crate::demand::Demand;
use crate::flow::{FlowError, Stop, Subscriber, Subscription};
use crate::latch::ParkLatch;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wasm_safe_mutex::Mutex;

/// State shared between a pipeline's subscription (demand side) and its
/// worker task (delivery side).
///
/// `produced` is written only by the worker; the subscription threads touch
/// `requested`, `cancelled` and the latch. The downstream slot is taken on
/// the terminal path so no signal can follow a terminal one.
pub(crate) struct EmitterState<T: Send> {
    requested: Demand,
    pub(crate) consumer_ready: ParkLatch,
    cancelled: AtomicBool,
    produced: AtomicU64,
    downstream: Mutex<Option<Box<dyn Subscriber<T>>>>,
}

impl<T: Send> EmitterState<T> {
    pub(crate) fn new(downstream: Box<dyn Subscriber<T>>) -> Self {
        EmitterState {
            requested: Demand::new(),
            consumer_ready: ParkLatch::new(),
            cancelled: AtomicBool::new(false),
            produced: AtomicU64::new(0),
            downstream: Mutex::new(Some(downstream)),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn set_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Demand-side entry shared by both pipelines' subscriptions.
    pub(crate) fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.requested.add(n);
        self.consumer_ready.resume();
    }

    pub(crate) fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if let Some(downstream) = self.downstream.lock_sync().as_mut() {
            downstream.on_subscribe(subscription);
        }
    }

    pub(crate) fn take_downstream(&self) -> Option<Box<dyn Subscriber<T>>> {
        self.downstream.lock_sync().take()
    }
}

/// Pushes items into an active flow, honoring downstream demand.
///
/// Handed to [`FiberGenerator`] and [`FiberTransformer`] callbacks. `emit`
/// suspends the calling task while downstream demand is exhausted and
/// resumes when more is requested; after cancellation it returns the
/// [`Stop`] sentinel so the callback unwinds through `?`.
pub struct FiberEmitter<T: Send> {
    state: Arc<EmitterState<T>>,
}

impl<T: Send> Clone for FiberEmitter<T> {
    fn clone(&self) -> Self {
        FiberEmitter {
            state: self.state.clone(),
        }
    }
}

impl<T: Send> FiberEmitter<T> {
    pub(crate) fn new(state: Arc<EmitterState<T>>) -> Self {
        FiberEmitter { state }
    }

    /// Deliver `item` downstream, suspending first if no demand is
    /// outstanding.
    ///
    /// Demand equal to [`UNBOUNDED`](crate::UNBOUNDED) never suspends.
    /// Returns `Err(Stop)` once the flow is cancelled; the item is then
    /// dropped undelivered.
    pub async fn emit(&self, item: T) -> Result<(), FlowError> {
        let state = &self.state;
        let p = state.produced.load(Ordering::Relaxed);
        while state.requested.get() == p && !state.is_cancelled() {
            state.consumer_ready.wait().await;
        }
        if state.is_cancelled() {
            return Err(Box::new(Stop));
        }
        if let Some(downstream) = state.downstream.lock_sync().as_mut() {
            downstream.on_next(item);
        }
        state.produced.store(p + 1, Ordering::Relaxed);
        Ok(())
    }
}

/// A generator callback: invoked once, emits any number of items, then
/// finishes the flow by returning.
///
/// `Ok(())` completes the flow; an error fails it, except for the
/// [`Stop`] sentinel, which unwinds silently after cancellation. Implemented
/// for `FnOnce(FiberEmitter<T>) -> impl Future`.
pub trait FiberGenerator<T: Send>: Send {
    type Future: Future<Output = Result<(), FlowError>> + Send;
    fn generate(self, emitter: FiberEmitter<T>) -> Self::Future;
}

impl<T, G, Fut> FiberGenerator<T> for G
where
    T: Send,
    G: FnOnce(FiberEmitter<T>) -> Fut + Send,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    type Future = Fut;

    fn generate(self, emitter: FiberEmitter<T>) -> Fut {
        self(emitter)
    }
}

/// A per-item transformer callback: invoked for each upstream item, emits
/// zero or more results.
///
/// An error other than [`Stop`] cancels the upstream and fails the flow.
/// Implemented for `FnMut(T, FiberEmitter<R>) -> impl Future`.
pub trait FiberTransformer<T: Send, R: Send>: Send {
    type Future: Future<Output = Result<(), FlowError>> + Send;
    fn transform(&mut self, value: T, emitter: FiberEmitter<R>) -> Self::Future;
}

impl<T, R, F, Fut> FiberTransformer<T, R> for F
where
    T: Send,
    R: Send,
    F: FnMut(T, FiberEmitter<R>) -> Fut + Send,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    type Future = Fut;

    fn transform(&mut self, value: T, emitter: FiberEmitter<R>) -> Fut {
        self(value, emitter)
    }
}
