//! Readiness multiplexing over a dynamic set of descriptors.
//!
//! [`Poller::poll`] does not block the caller. It queues the real `poll(2)`
//! call as a job and returns a [`Task`]; the job runs when the owning thread
//! calls [`Poller::runner`], which is the only place that ever blocks. Results
//! are published per descriptor before the task resolves.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{error, trace};

use crate::task::{Task, lock};

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLRDNORM | libc::POLLRDBAND | libc::POLLPRI;
const WRITE_EVENTS: libc::c_short = libc::POLLOUT | libc::POLLWRNORM | libc::POLLWRBAND;
const ERROR_REQUEST: libc::c_short = libc::POLLRDHUP;
const ERROR_EVENTS: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLRDHUP | libc::POLLNVAL;

/// Which conditions a descriptor is watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
    pub error: bool,
}

impl Interest {
    pub const READ: Interest = Interest { read: true, write: false, error: true };
    pub const READ_WRITE: Interest = Interest { read: true, write: true, error: true };

    fn events(self) -> libc::c_short {
        let mut events = 0;
        if self.read {
            events |= READ_EVENTS;
        }
        if self.write {
            events |= WRITE_EVENTS;
        }
        if self.error {
            events |= ERROR_REQUEST;
        }
        events
    }
}

/// What the last completed poll reported for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub read: bool,
    pub write: bool,
    pub error: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short) -> Self {
        Self {
            read: revents & READ_EVENTS != 0,
            write: revents & WRITE_EVENTS != 0,
            error: revents & ERROR_EVENTS != 0,
        }
    }

    pub fn is_empty(self) -> bool {
        !(self.read || self.write || self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerResult {
    Ready,
    Timeout,
    Error,
}

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct PollSet {
    pollfds: Vec<libc::pollfd>,
    results: HashMap<RawFd, Readiness>,
}

/// Counts queued jobs so that [`Poller::runner`] can sleep while there are none.
#[derive(Default)]
struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn release(&self) {
        *lock(&self.count) += 1;
        self.available.notify_one();
    }

    fn acquire(&self) {
        let mut count = lock(&self.count);
        while *count == 0 {
            count = self.available.wait(count).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *count -= 1;
    }
}

#[derive(Default)]
struct Inner {
    set: Mutex<PollSet>,
    queue: Mutex<Vec<Job>>,
    semaphore: Semaphore,
}

/// Cheap to clone, every clone drives the same descriptor set.
#[derive(Clone, Default)]
pub struct Poller {
    inner: Arc<Inner>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching `fd`. Adding a descriptor twice only updates its interest.
    pub fn add_fd(&self, fd: RawFd, interest: Interest) {
        let mut set = lock(&self.inner.set);
        if let Some(pollfd) = set.pollfds.iter_mut().find(|p| p.fd == fd) {
            pollfd.events = interest.events();
            return;
        }
        set.pollfds.push(libc::pollfd { fd, events: interest.events(), revents: 0 });
    }

    /// Changes the interest of a watched descriptor, unknown descriptors are ignored.
    pub fn update_fd(&self, fd: RawFd, interest: Interest) {
        let mut set = lock(&self.inner.set);
        if let Some(pollfd) = set.pollfds.iter_mut().find(|p| p.fd == fd) {
            pollfd.events = interest.events();
        }
    }

    pub fn remove_fd(&self, fd: RawFd) {
        let mut set = lock(&self.inner.set);
        set.pollfds.retain(|p| p.fd != fd);
        set.results.remove(&fd);
    }

    pub fn clear_fds(&self) {
        let mut set = lock(&self.inner.set);
        set.pollfds.clear();
        set.results.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.set).pollfds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Readiness of `fd` from the most recent poll; all false if it was not signaled.
    pub fn results(&self, fd: RawFd) -> Readiness {
        lock(&self.inner.set).results.get(&fd).copied().unwrap_or_default()
    }

    /// Queues one `poll(2)` round with the given timeout.
    ///
    /// The wait happens inside [`Poller::runner`]; the returned task resolves
    /// once the results of that round are visible through [`Poller::results`].
    pub fn poll(&self, timeout: Duration) -> Task<PollerResult> {
        let poller = self.clone();
        Task::from_fn(move |completer| {
            let job_poller = poller.clone();
            poller.enqueue(Box::new(move || {
                let result = job_poller.poll_now(timeout);
                completer.complete(result);
            }));
        })
    }

    /// Blocks until at least one job is queued, then runs every queued job.
    ///
    /// Must only ever be called from one thread.
    pub fn runner(&self) {
        self.inner.semaphore.acquire();

        let jobs = std::mem::take(&mut *lock(&self.inner.queue));
        trace!(jobs = jobs.len(), "running poller jobs");
        for job in jobs {
            job();
        }
    }

    /// Queues an arbitrary job for [`Poller::runner`].
    pub fn enqueue(&self, job: Box<dyn FnOnce() + Send>) {
        lock(&self.inner.queue).push(job);
        self.inner.semaphore.release();
    }

    fn poll_now(&self, timeout: Duration) -> PollerResult {
        let mut pollfds = lock(&self.inner.set).pollfds.clone();
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        let nfds = libc::nfds_t::try_from(pollfds.len()).unwrap_or(libc::nfds_t::MAX);
        // SAFETY: `pollfds` is a live, exclusively borrowed array of `nfds` pollfd entries
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, timeout_ms) };

        let mut set = lock(&self.inner.set);
        set.results.clear();

        if rc < 0 {
            let e = std::io::Error::last_os_error();
            if e.kind() == std::io::ErrorKind::Interrupted {
                trace!("poll interrupted");
                return PollerResult::Timeout;
            }
            error!(cause = %e, "poll failed");
            return PollerResult::Error;
        }
        if rc == 0 {
            return PollerResult::Timeout;
        }

        for pollfd in pollfds.iter().filter(|p| p.revents != 0) {
            set.results.insert(pollfd.fd, Readiness::from_revents(pollfd.revents));
        }
        PollerResult::Ready
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller").field("fds", &self.len()).finish()
    }
}
