//! Deferred results shared by hardware-call adapters and the virtual filesystem.
//!
//! An [`AsyncResult`] is either pending or settled (fulfilled or rejected).
//! Interested parties register continuations with [`AsyncResult::on_settle`];
//! settling never runs those continuations inline. They are pushed onto the
//! [`SettleQueue`] they were registered with and run when the owner of that
//! queue (the scheduler) drains it.
//!
//! `AsyncResult` also implements [`Future`], so host-side async code can await
//! a hardware completion directly.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use thiserror::Error;

/// Failure side of an [`AsyncResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsyncError {
    /// The producer went away before settling the result.
    #[error("operation was cancelled before it settled")]
    Cancelled,
    /// The operation failed with a guest-visible error code.
    #[error("operation failed with code {code:#010x}: {message}")]
    Failed { code: i32, message: String },
    /// A host-side integration is incomplete. Never handed to guest code.
    #[error("backend defect: {0}")]
    Defect(String),
}

impl AsyncError {
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }
}

pub type AsyncOutcome<T> = Result<T, AsyncError>;

/// A continuation waiting on a [`SettleQueue`].
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// FIFO of continuations whose results have settled.
#[derive(Clone, Default)]
pub struct SettleQueue {
    inner: Arc<Mutex<VecDeque<Continuation>>>,
}

impl SettleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, continuation: Continuation) {
        self.inner.lock().push_back(continuation);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Runs queued continuations until the queue is empty, including ones
    /// queued by continuations that ran during this call.
    ///
    /// Returns the number of continuations that ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock must not be held while the continuation runs.
            let next = self.inner.lock().pop_front();
            let Some(continuation) = next else {
                break;
            };
            continuation();
            ran += 1;
        }
        ran
    }
}

impl fmt::Debug for SettleQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleQueue")
            .field("queued", &self.len())
            .finish()
    }
}

/// Observable state of an [`AsyncResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    Pending,
    Fulfilled,
    Rejected,
}

type Callback<T> = Box<dyn FnOnce(AsyncOutcome<T>) + Send + 'static>;

enum State<T> {
    Pending {
        continuations: Vec<(SettleQueue, Callback<T>)>,
        wakers: Vec<Waker>,
    },
    Settled(AsyncOutcome<T>),
}

/// A value that is either already known or will become known later.
pub struct AsyncResult<T> {
    shared: Arc<Mutex<State<T>>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> AsyncResult<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a pending result and the [`Resolver`] that settles it.
    pub fn pending() -> (Self, Resolver<T>) {
        let shared = Arc::new(Mutex::new(State::Pending {
            continuations: Vec::new(),
            wakers: Vec::new(),
        }));
        (
            Self {
                shared: shared.clone(),
            },
            Resolver {
                shared: Some(shared),
            },
        )
    }

    pub fn resolved(value: T) -> Self {
        Self::settled(Ok(value))
    }

    pub fn rejected(error: AsyncError) -> Self {
        Self::settled(Err(error))
    }

    pub fn settled(outcome: AsyncOutcome<T>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(State::Settled(outcome))),
        }
    }

    pub fn state(&self) -> AsyncState {
        match &*self.shared.lock() {
            State::Pending { .. } => AsyncState::Pending,
            State::Settled(Ok(_)) => AsyncState::Fulfilled,
            State::Settled(Err(_)) => AsyncState::Rejected,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state() != AsyncState::Pending
    }

    /// Returns the settled outcome, or `None` while pending.
    pub fn try_get(&self) -> Option<AsyncOutcome<T>> {
        match &*self.shared.lock() {
            State::Pending { .. } => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Registers `continuation` to run on `queue` once this result settles.
    ///
    /// An already settled result queues the continuation immediately. In
    /// both cases it only runs when the queue is drained.
    pub fn on_settle<F>(&self, queue: &SettleQueue, continuation: F)
    where
        F: FnOnce(AsyncOutcome<T>) + Send + 'static,
    {
        let mut state = self.shared.lock();
        match &mut *state {
            State::Pending { continuations, .. } => {
                continuations.push((queue.clone(), Box::new(continuation)));
            }
            State::Settled(outcome) => {
                let outcome = outcome.clone();
                drop(state);
                queue.push(Box::new(move || continuation(outcome)));
            }
        }
    }

    /// Derives a result that settles with `f` applied to this one's value.
    pub fn map<U, F>(&self, queue: &SettleQueue, f: F) -> AsyncResult<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (mapped, resolver) = AsyncResult::pending();
        self.on_settle(queue, move |outcome| resolver.settle(outcome.map(f)));
        mapped
    }
}

impl<T> Future for AsyncResult<T>
where
    T: Clone + Send + 'static,
{
    type Output = AsyncOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for AsyncResult<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.shared.lock() {
            State::Pending { continuations, .. } => f
                .debug_struct("AsyncResult::Pending")
                .field("continuations", &continuations.len())
                .finish(),
            State::Settled(outcome) => f.debug_tuple("AsyncResult").field(outcome).finish(),
        }
    }
}

/// Producer side of a pending [`AsyncResult`].
///
/// Dropping a resolver without settling it settles the result to
/// [`AsyncError::Cancelled`].
#[must_use = "dropping a resolver cancels its result"]
pub struct Resolver<T>
where
    T: Clone + Send + 'static,
{
    shared: Option<Arc<Mutex<State<T>>>>,
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(self, error: AsyncError) {
        self.settle(Err(error));
    }

    pub fn settle(mut self, outcome: AsyncOutcome<T>) {
        if let Some(shared) = self.shared.take() {
            settle(&shared, outcome);
        }
    }
}

impl<T> Drop for Resolver<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            tracing::trace!("resolver dropped before settling; cancelling result");
            settle(&shared, Err(AsyncError::Cancelled));
        }
    }
}

impl<T> fmt::Debug for Resolver<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.shared.is_none())
            .finish()
    }
}

fn settle<T>(shared: &Mutex<State<T>>, outcome: AsyncOutcome<T>)
where
    T: Clone + Send + 'static,
{
    let previous = {
        let mut state = shared.lock();
        if matches!(&*state, State::Settled(_)) {
            return;
        }
        std::mem::replace(&mut *state, State::Settled(outcome.clone()))
    };
    if let State::Pending {
        continuations,
        wakers,
    } = previous
    {
        for (queue, continuation) in continuations {
            let outcome = outcome.clone();
            queue.push(Box::new(move || continuation(outcome)));
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn continuations_run_only_when_the_queue_is_drained() {
        let queue = SettleQueue::new();
        let (result, resolver) = AsyncResult::<i32>::pending();
        let seen = Arc::new(Mutex::new(None));

        let sink = seen.clone();
        result.on_settle(&queue, move |outcome| *sink.lock() = Some(outcome));
        resolver.resolve(7);

        assert_eq!(result.state(), AsyncState::Fulfilled);
        assert_eq!(*seen.lock(), None);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*seen.lock(), Some(Ok(7)));
    }

    #[test]
    fn settled_results_still_go_through_the_queue() {
        let queue = SettleQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        AsyncResult::resolved(1u32).on_settle(&queue, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);
        queue.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_resolver_cancels() {
        let (result, resolver) = AsyncResult::<i32>::pending();
        drop(resolver);
        assert_eq!(result.state(), AsyncState::Rejected);
        assert_eq!(result.try_get(), Some(Err(AsyncError::Cancelled)));
    }

    #[test]
    fn nested_continuations_are_drained_in_one_call() {
        let queue = SettleQueue::new();
        let (first, resolve_first) = AsyncResult::<i32>::pending();
        let (second, resolve_second) = AsyncResult::<i32>::pending();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        first.on_settle(&queue, move |_| {
            log.lock().push("first");
            resolve_second.resolve(2);
        });
        let log = order.clone();
        second.on_settle(&queue, move |_| log.lock().push("second"));

        resolve_first.resolve(1);
        assert_eq!(queue.run_pending(), 2);
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn map_transforms_the_value() {
        let queue = SettleQueue::new();
        let (result, resolver) = AsyncResult::<i32>::pending();
        let mapped = result.map(&queue, |v| v * 2);
        resolver.resolve(21);
        assert_eq!(mapped.try_get(), None);
        queue.run_pending();
        assert_eq!(mapped.try_get(), Some(Ok(42)));
    }

    #[test]
    fn awaiting_a_result() {
        let (result, resolver) = AsyncResult::<u8>::pending();
        let waiter = std::thread::spawn(move || futures::executor::block_on(result));
        resolver.reject(AsyncError::failed(-1, "boom"));
        assert_eq!(
            waiter.join().unwrap(),
            Err(AsyncError::Failed {
                code: -1,
                message: "boom".to_string()
            })
        );
    }
}
