//! Message bodies that arrive while the application may already be waiting.
//!
//! A [`PendingBody`] is created as soon as a head announcing a body is parsed.
//! The connection handler feeds it with [`PendingBody::recv`] and finishes it
//! once, either with [`PendingBody::complete`] or [`PendingBody::fail`]. Every
//! [`PendingBody::body`] call, before or after that point, resolves with the
//! same [`BodyResult`].

use std::mem;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use micro_netw::task::lock;
use micro_netw::{Completer, FnTask, Task};

/// The bytes of a finished body, and whether the body arrived in full.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyResult {
    content: Bytes,
    success: bool,
}

impl BodyResult {
    pub fn new(content: Bytes, success: bool) -> Self {
        Self { content, success }
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[derive(Debug)]
enum BodyState {
    Pending { data: BytesMut, waiters: Vec<Completer<BodyResult>> },
    Finished(BodyResult),
}

#[derive(Debug)]
pub struct PendingBody {
    state: Mutex<BodyState>,
}

impl PendingBody {
    pub fn new() -> Self {
        Self { state: Mutex::new(BodyState::Pending { data: BytesMut::new(), waiters: Vec::new() }) }
    }

    /// A body that is already complete, e.g. an empty one.
    pub fn completed(content: Bytes) -> Self {
        Self { state: Mutex::new(BodyState::Finished(BodyResult::new(content, true))) }
    }

    /// Appends body bytes; ignored once the body is finished.
    pub fn recv(&self, bytes: &[u8]) {
        if let BodyState::Pending { data, .. } = &mut *lock(&self.state) {
            data.extend_from_slice(bytes);
        }
    }

    pub fn complete(&self) -> bool {
        self.finish(true)
    }

    /// Ends the body unsuccessfully, keeping whatever bytes arrived so far.
    pub fn fail(&self) -> bool {
        self.finish(false)
    }

    pub fn is_finished(&self) -> bool {
        matches!(*lock(&self.state), BodyState::Finished(_))
    }

    /// Resolves with the body once it is finished.
    pub fn body(&self) -> Task<BodyResult> {
        let mut state = lock(&self.state);
        match &mut *state {
            BodyState::Finished(result) => Task::ready(result.clone()),
            BodyState::Pending { waiters, .. } => {
                let (task, completer) = FnTask::pending();
                waiters.push(completer);
                Task::from(task)
            }
        }
    }

    fn finish(&self, success: bool) -> bool {
        let (result, waiters) = {
            let mut state = lock(&self.state);
            let BodyState::Pending { data, waiters } = &mut *state else {
                return false;
            };
            let result = BodyResult::new(mem::take(data).freeze(), success);
            let waiters = mem::take(waiters);
            *state = BodyState::Finished(result.clone());
            (result, waiters)
        };

        for waiter in waiters {
            waiter.complete(result.clone());
        }
        true
    }
}

impl Default for PendingBody {
    fn default() -> Self {
        Self::new()
    }
}
