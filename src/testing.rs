//! Shared fixtures for the pipeline tests: a recording downstream
//! subscriber driven over a channel, and a scriptable upstream source.

use crate::demand::Demand;
use crate::flow::{FlowError, Publisher, Subscriber, Subscription};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use wasm_safe_mutex::Mutex;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
pub(crate) enum Event<T> {
    Next(T),
    Error(String),
    Complete,
}

type SubscriptionSlot = Arc<Mutex<Option<Arc<dyn Subscription>>>>;

/// Downstream subscriber that forwards every signal to a probe.
pub(crate) struct TestSubscriber<T> {
    events: mpsc::Sender<Event<T>>,
    subscription: SubscriptionSlot,
    initial_request: u64,
    cancel_after: Option<u64>,
    received: u64,
}

pub(crate) struct SubscriberProbe<T> {
    events: mpsc::Receiver<Event<T>>,
    subscription: SubscriptionSlot,
}

/// A subscriber that requests `initial_request` on subscription.
pub(crate) fn subscriber<T: Send>(initial_request: u64) -> (TestSubscriber<T>, SubscriberProbe<T>) {
    subscriber_with(initial_request, None)
}

/// A subscriber that additionally cancels from inside `on_next` once it has
/// received `cancel_after` items.
pub(crate) fn cancelling_subscriber<T: Send>(
    initial_request: u64,
    cancel_after: u64,
) -> (TestSubscriber<T>, SubscriberProbe<T>) {
    subscriber_with(initial_request, Some(cancel_after))
}

fn subscriber_with<T: Send>(
    initial_request: u64,
    cancel_after: Option<u64>,
) -> (TestSubscriber<T>, SubscriberProbe<T>) {
    let (tx, rx) = mpsc::channel();
    let slot: SubscriptionSlot = Arc::new(Mutex::new(None));
    (
        TestSubscriber {
            events: tx,
            subscription: slot.clone(),
            initial_request,
            cancel_after,
            received: 0,
        },
        SubscriberProbe {
            events: rx,
            subscription: slot,
        },
    )
}

impl<T: Send> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock_sync() = Some(subscription.clone());
        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&mut self, item: T) {
        self.received += 1;
        self.events.send(Event::Next(item)).ok();
        if self.cancel_after == Some(self.received) {
            if let Some(subscription) = self.subscription.lock_sync().as_ref() {
                subscription.cancel();
            }
        }
    }

    fn on_error(&mut self, error: FlowError) {
        self.events.send(Event::Error(error.to_string())).ok();
    }

    fn on_complete(&mut self) {
        self.events.send(Event::Complete).ok();
    }
}

impl<T: Send + Debug + PartialEq> SubscriberProbe<T> {
    pub(crate) fn expect_next(&self, expected: T) {
        match self.events.recv_timeout(WAIT) {
            Ok(Event::Next(item)) => assert_eq!(item, expected),
            other => panic!("expected Next({expected:?}), got {other:?}"),
        }
    }

    pub(crate) fn expect_complete(&self) {
        match self.events.recv_timeout(WAIT) {
            Ok(Event::Complete) => {}
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    pub(crate) fn expect_error(&self) -> String {
        match self.events.recv_timeout(WAIT) {
            Ok(Event::Error(message)) => message,
            other => panic!("expected Error, got {other:?}"),
        }
    }

    pub(crate) fn expect_silence(&self, period: Duration) {
        match self.events.recv_timeout(period) {
            Err(_) => {}
            Ok(event) => panic!("expected silence, got {event:?}"),
        }
    }

    pub(crate) fn request(&self, n: u64) {
        let subscription = self
            .subscription
            .lock_sync()
            .clone()
            .expect("not subscribed yet");
        subscription.request(n);
    }

    pub(crate) fn cancel(&self) {
        let subscription = self
            .subscription
            .lock_sync()
            .clone()
            .expect("not subscribed yet");
        subscription.cancel();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Terminal {
    None,
    Complete,
    Error(&'static str),
}

/// Upstream source for transform tests.
///
/// In scripted mode it answers each `request(n)` by delivering queued items
/// up to the accumulated demand, then its terminal signal. In manual mode
/// the probe side pushes signals explicitly.
pub(crate) struct TestSource<T> {
    state: Arc<SourceState<T>>,
}

struct SourceState<T> {
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    pending: Mutex<VecDeque<T>>,
    terminal: Mutex<Terminal>,
    demand: Demand,
    requests: Mutex<Vec<u64>>,
    cancelled: AtomicBool,
}

pub(crate) struct SourceProbe<T> {
    state: Arc<SourceState<T>>,
}

impl<T: Send + 'static> TestSource<T> {
    /// Deliver `items` as demand arrives, then `terminal`.
    pub(crate) fn scripted(
        items: impl IntoIterator<Item = T>,
        terminal: Terminal,
    ) -> (TestSource<T>, SourceProbe<T>) {
        let state = Arc::new(SourceState {
            subscriber: Mutex::new(None),
            pending: Mutex::new(items.into_iter().collect()),
            terminal: Mutex::new(terminal),
            demand: Demand::new(),
            requests: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        });
        (
            TestSource {
                state: state.clone(),
            },
            SourceProbe { state },
        )
    }

    /// A source that emits nothing until the probe pushes signals.
    pub(crate) fn manual() -> (TestSource<T>, SourceProbe<T>) {
        Self::scripted([], Terminal::None)
    }
}

impl<T: Send + 'static> Publisher<T> for TestSource<T> {
    fn subscribe<S>(self, subscriber: S)
    where
        S: Subscriber<T> + 'static,
    {
        let mut boxed: Box<dyn Subscriber<T>> = Box::new(subscriber);
        boxed.on_subscribe(Arc::new(TestSourceSubscription {
            state: self.state.clone(),
        }));
        *self.state.subscriber.lock_sync() = Some(boxed);
        self.state.deliver();
    }
}

struct TestSourceSubscription<T> {
    state: Arc<SourceState<T>>,
}

impl<T: Send + 'static> Subscription for TestSourceSubscription<T> {
    fn request(&self, n: u64) {
        self.state.requests.lock_sync().push(n);
        self.state.demand.add(n);
        self.state.deliver();
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }
}

impl<T: Send> SourceState<T> {
    /// Push queued items while demand lasts, then the terminal signal.
    /// Serialised by the subscriber lock.
    fn deliver(&self) {
        let mut subscriber = self.subscriber.lock_sync();
        let Some(subscriber) = subscriber.as_mut() else {
            return;
        };
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }
            if self.demand.get() == 0 {
                break;
            }
            let Some(item) = self.pending.lock_sync().pop_front() else {
                break;
            };
            self.demand.produced(1);
            subscriber.on_next(item);
        }
        if self.pending.lock_sync().is_empty() {
            match std::mem::replace(&mut *self.terminal.lock_sync(), Terminal::None) {
                Terminal::None => {}
                Terminal::Complete => subscriber.on_complete(),
                Terminal::Error(message) => subscriber.on_error(message.into()),
            }
        }
    }
}

impl<T: Send + 'static> SourceProbe<T> {
    pub(crate) fn emit(&self, item: T) {
        self.state.pending.lock_sync().push_back(item);
        self.state.deliver();
    }

    pub(crate) fn complete(&self) {
        *self.state.terminal.lock_sync() = Terminal::Complete;
        self.state.deliver();
    }

    pub(crate) fn requests(&self) -> Vec<u64> {
        self.state.requests.lock_sync().clone()
    }

    pub(crate) fn total_requested(&self) -> u64 {
        self.requests().iter().sum()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Spin briefly until the source has been cancelled.
    pub(crate) fn await_cancelled(&self) {
        let deadline = std::time::Instant::now() + WAIT;
        while !self.is_cancelled() {
            if std::time::Instant::now() > deadline {
                panic!("upstream was never cancelled");
            }
            std::thread::yield_now();
        }
    }
}
