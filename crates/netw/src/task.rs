//! Single resumption futures used throughout the reactor.
//!
//! [`FnTask`] adapts a callback style operation into a future: the start
//! closure receives a [`Completer`] which may be moved to any thread and
//! resolves the task exactly once. [`Task`] is what the public APIs return, it
//! is either already resolved or waiting on an [`FnTask`].

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;

/// Locks `mutex`, recovering the guard if a panicking thread poisoned it.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Start<T> = Box<dyn FnOnce(Completer<T>) + Send>;

struct Shared<T> {
    resumed: AtomicBool,
    abandoned: AtomicBool,
    value: Mutex<Option<T>>,
    waker: AtomicWaker,
}

/// The resolving half of an [`FnTask`].
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completer<T> {
    /// Resolves the task with `value`.
    ///
    /// Only the first call on any clone wins, later calls drop their value and
    /// return `false`. So does a call after the task itself was dropped.
    pub fn complete(&self, value: T) -> bool {
        self.try_complete(value).is_ok()
    }

    /// Like [`Completer::complete`], but hands `value` back when the task was
    /// already resolved or nobody is waiting on it anymore.
    pub fn try_complete(&self, value: T) -> Result<(), T> {
        let mut slot = lock(&self.shared.value);
        if self.shared.abandoned.load(Ordering::Acquire) {
            return Err(value);
        }
        if self.shared.resumed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(value);
        }

        *slot = Some(value);
        drop(slot);
        self.shared.waker.wake();
        Ok(())
    }

    /// Whether the task was dropped before it resolved.
    pub fn is_abandoned(&self) -> bool {
        self.shared.abandoned.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.shared.resumed.load(Ordering::Acquire)
    }
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").field("completed", &self.is_completed()).finish()
    }
}

/// A future resolved through a [`Completer`].
pub struct FnTask<T> {
    start: Option<Start<T>>,
    shared: Arc<Shared<T>>,
    finished: bool,
}

impl<T> FnTask<T> {
    /// `start` runs on the first poll, with the waker already registered, so it
    /// may complete synchronously or hand the completer to someone else.
    pub fn new<F>(start: F) -> Self
    where
        F: FnOnce(Completer<T>) + Send + 'static,
    {
        let mut task = Self::shared();
        task.start = Some(Box::new(start));
        task
    }

    /// A task whose completer is handed out right away instead of on first poll.
    pub fn pending() -> (Self, Completer<T>) {
        let task = Self::shared();
        let completer = Completer { shared: Arc::clone(&task.shared) };
        (task, completer)
    }

    fn shared() -> Self {
        let shared = Shared {
            resumed: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            value: Mutex::new(None),
            waker: AtomicWaker::new(),
        };
        Self { start: None, shared: Arc::new(shared), finished: false }
    }
}

impl<T> Unpin for FnTask<T> {}

impl<T> Future for FnTask<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.finished, "FnTask polled after completion");

        this.shared.waker.register(cx.waker());

        if let Some(start) = this.start.take() {
            start(Completer { shared: Arc::clone(&this.shared) });
        }

        match lock(&this.shared.value).take() {
            Some(value) => {
                this.finished = true;
                Poll::Ready(value)
            }
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for FnTask<T> {
    fn drop(&mut self) {
        if !self.finished {
            // under the value lock: a racing completer either sees the flag or has already stored
            let _slot = lock(&self.shared.value);
            self.shared.abandoned.store(true, Ordering::Release);
        }
    }
}

impl<T> fmt::Debug for FnTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("started", &self.start.is_none())
            .field("completed", &self.shared.resumed.load(Ordering::Acquire))
            .finish()
    }
}

enum Inner<T> {
    Ready(Option<T>),
    Waiting(FnTask<T>),
}

/// An operation that may already be complete or will complete later.
pub struct Task<T> {
    inner: Inner<T>,
}

impl<T> Task<T> {
    pub fn ready(value: T) -> Self {
        Self { inner: Inner::Ready(Some(value)) }
    }

    pub fn from_fn<F>(start: F) -> Self
    where
        F: FnOnce(Completer<T>) + Send + 'static,
    {
        Self::from(FnTask::new(start))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Inner::Ready(Some(_)))
    }
}

impl<T> From<FnTask<T>> for Task<T> {
    fn from(task: FnTask<T>) -> Self {
        Self { inner: Inner::Waiting(task) }
    }
}

impl<T> Unpin for Task<T> {}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Ready(value) => match value.take() {
                Some(value) => Poll::Ready(value),
                None => panic!("Task polled after completion"),
            },
            Inner::Waiting(task) => Pin::new(task).poll(cx),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Ready(value) => f.debug_struct("Task").field("ready", &value.is_some()).finish(),
            Inner::Waiting(task) => f.debug_tuple("Task").field(task).finish(),
        }
    }
}
