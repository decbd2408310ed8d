use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::error;

use crate::fd::Fd;
use crate::server::ConnectionId;
use crate::task::lock;

pub(crate) const WAKE_COMMAND: u8 = b'w';
pub(crate) const QUIT_COMMAND: u8 = b'q';

#[derive(Debug)]
pub(crate) enum MailboxItem {
    Output(Bytes),
    Close,
}

#[derive(Debug, Default)]
struct MailboxState {
    entries: Vec<(ConnectionId, MailboxItem)>,
    signal_pending: bool,
}

/// Hands output from any thread over to the reactor thread.
///
/// Pushing writes a wake byte to the command pipe only if no wake is already
/// on its way, so any number of pushes between two drains cost one byte.
#[derive(Debug)]
pub(crate) struct OutputMailbox {
    state: Mutex<MailboxState>,
    command: Arc<Fd>,
}

impl OutputMailbox {
    pub(crate) fn new(command: Arc<Fd>) -> Self {
        Self { state: Mutex::default(), command }
    }

    pub(crate) fn push(&self, id: ConnectionId, item: MailboxItem) {
        let signal = {
            let mut state = lock(&self.state);
            state.entries.push((id, item));
            !std::mem::replace(&mut state.signal_pending, true)
        };

        if signal {
            self.send_command(WAKE_COMMAND);
        }
    }

    /// Wakes the reactor without queuing anything, coalesced like [`OutputMailbox::push`].
    pub(crate) fn signal(&self) {
        let signal = !std::mem::replace(&mut lock(&self.state).signal_pending, true);
        if signal {
            self.send_command(WAKE_COMMAND);
        }
    }

    /// Takes every queued entry, in push order, and re-arms the wake byte.
    pub(crate) fn drain(&self) -> Vec<(ConnectionId, MailboxItem)> {
        let mut state = lock(&self.state);
        state.signal_pending = false;
        std::mem::take(&mut state.entries)
    }

    pub(crate) fn send_command(&self, command: u8) {
        match self.command.write(&[command]) {
            Ok(1) => {}
            Ok(_) => error!(command = %char::from(command), "command pipe is full"),
            Err(e) => error!(cause = %e, command = %char::from(command), "failed to write command"),
        }
    }
}
