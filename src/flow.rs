//! The reactive-streams contract the pipelines program against.
//!
//! These traits are the crate-local rendering of the usual
//! publisher/subscriber/subscription triple. Signal methods follow the
//! reactive-streams serialization rules: `on_next`, `on_error` and
//! `on_complete` are never invoked concurrently on the same subscriber,
//! while `request` and `cancel` may be called from any thread at any time.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Errors carried through a flow's `on_error` signal.
///
/// Boxed so user callbacks can fail with anything `?`-compatible:
///
/// ```
/// # use fiber_flow::FlowError;
/// fn parse(input: &str) -> Result<u32, FlowError> {
///     Ok(input.trim().parse()?)
/// }
/// ```
pub type FlowError = Box<dyn Error + Send + Sync>;

/// The demand side of an active flow, handed to the downstream subscriber.
///
/// Both methods are non-blocking and safe to call from any thread,
/// concurrently with upstream signals and with each other.
pub trait Subscription: Send + Sync {
    /// Request `n` more items. Demand accumulates and saturates at
    /// [`UNBOUNDED`](crate::UNBOUNDED); requesting zero is a no-op.
    fn request(&self, n: u64);

    /// Stop the flow. Idempotent. After this call at most one more item
    /// (one already in flight) may arrive, and no terminal signal will.
    fn cancel(&self);
}

/// The receiving end of a flow.
///
/// `on_subscribe` is delivered exactly once, before any other signal.
/// After a terminal signal (`on_error` or `on_complete`) nothing further
/// is delivered.
pub trait Subscriber<T: Send>: Send {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);
    fn on_next(&mut self, item: T);
    fn on_error(&mut self, error: FlowError);
    fn on_complete(&mut self);
}

/// A cold, one-shot source of items.
///
/// `subscribe` consumes the publisher: each value describes a single flow.
/// Fan-out to multiple subscribers is deliberately not modeled here.
pub trait Publisher<T: Send>: Sized {
    fn subscribe<S>(self, subscriber: S)
    where
        S: Subscriber<T> + 'static;
}

/// Internal cancellation sentinel.
///
/// When a pipeline is cancelled while a callback is suspended in
/// [`emit`](crate::FiberEmitter::emit), `emit` returns this error so the
/// callback unwinds through `?` without performing further work. The worker
/// recognises it by type (`downcast_ref::<Stop>`) and swallows it; it is
/// never delivered downstream.
#[derive(Debug)]
pub struct Stop;

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "downstream cancelled")
    }
}

impl Error for Stop {}

/// Returns true when `error` is the internal cancellation sentinel.
pub(crate) fn is_stop(error: &FlowError) -> bool {
    error.downcast_ref::<Stop>().is_some()
}
