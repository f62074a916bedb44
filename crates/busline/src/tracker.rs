//! Pending-call tracking and reply correlation.

use std::collections::HashMap;

use busline_core::{DBusError, Message, Sequence};
use parking_lot::Mutex;

use crate::Call;

const DEFAULT_MAX_PENDING: usize = 8192;

fn max_pending() -> usize {
    std::env::var("BUSLINE_MAX_PENDING")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_PENDING)
}

/// Maps outstanding serials to pending calls.
///
/// # Key invariant
///
/// A serial maps to at most one live call, and finalization removes the
/// entry under the lock *before* touching the call. Whichever of a reply,
/// an error, a cancellation, or a send failure removes the entry first
/// owns the call exclusively; every later attempt observes no entry and
/// does nothing. No completion flags, no capacity introspection.
#[derive(Debug, Default)]
pub struct CallTracker {
    calls: Mutex<HashMap<u32, Call>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live call under `serial`.
    ///
    /// Refuses (returning the call back) when the pending cap is reached,
    /// so one stalled peer cannot grow the map without bound.
    pub fn track(&self, serial: u32, call: Call) -> Result<(), Call> {
        let mut calls = self.calls.lock();
        let pending = calls.len();
        if pending >= max_pending() {
            tracing::warn!(
                serial,
                pending,
                max_pending = max_pending(),
                "too many pending calls; refusing new call"
            );
            return Err(call);
        }
        calls.insert(serial, call);
        tracing::trace!(serial, pending = pending + 1, "tracking call");
        Ok(())
    }

    /// Number of calls currently in flight.
    pub fn pending(&self) -> usize {
        self.calls.lock().len()
    }

    /// Route a method reply to its waiting call.
    ///
    /// Returns the serial of the call it finalized. A message with no
    /// reply-serial header cannot be routed, and an unknown serial leaves
    /// the tracker untouched; both are logged, dropped, and return `None`
    /// so the caller does not retire a serial that still belongs to
    /// someone.
    pub fn handle_reply(&self, sequence: Sequence, msg: Message) -> Option<u32> {
        let Some(serial) = msg.reply_serial() else {
            tracing::debug!(sequence = sequence.0, "reply without reply-serial; dropping");
            return None;
        };
        match self.take(serial) {
            Some(mut call) => {
                call.body = msg.body;
                call.sequence = sequence;
                tracing::debug!(serial, sequence = sequence.0, "reply delivered");
                call.done();
                Some(serial)
            }
            None => {
                tracing::debug!(serial, sequence = sequence.0, "unexpected reply; dropping");
                None
            }
        }
    }

    /// Route an error message to its waiting call. Symmetric with
    /// [`CallTracker::handle_reply`]; the error name header plus the body
    /// become the call's [`DBusError`].
    pub fn handle_dbus_error(&self, sequence: Sequence, msg: Message) -> Option<u32> {
        let Some(serial) = msg.reply_serial() else {
            tracing::debug!(sequence = sequence.0, "error without reply-serial; dropping");
            return None;
        };
        let name = msg.error_name().unwrap_or_default().to_string();
        match self.take(serial) {
            Some(mut call) => {
                call.err = Some(DBusError::new(name, msg.body));
                call.sequence = sequence;
                tracing::debug!(serial, sequence = sequence.0, "error delivered");
                call.done();
                Some(serial)
            }
            None => {
                tracing::debug!(serial, sequence = sequence.0, "unexpected error; dropping");
                None
            }
        }
    }

    /// Finalize `serial` with a locally synthesized error. Returns whether
    /// a call was actually finalized.
    pub fn fail(&self, serial: u32, sequence: Sequence, err: DBusError) -> bool {
        match self.take(serial) {
            Some(mut call) => {
                call.err = Some(err);
                call.sequence = sequence;
                call.done();
                true
            }
            None => false,
        }
    }

    /// Finalize `serial` with the cancellation error kind. A late peer
    /// reply to this serial is then safely ignored.
    pub fn cancel(&self, serial: u32) -> bool {
        let won = self.fail(serial, Sequence::NONE, DBusError::cancelled());
        if won {
            tracing::debug!(serial, "call cancelled");
        }
        won
    }

    /// Finalize every outstanding call with the disconnected error kind.
    /// Used by the close path so no caller hangs on a dead connection.
    pub fn fail_all(&self, err: DBusError) {
        let drained: Vec<(u32, Call)> = self.calls.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing all in-flight calls");
        }
        for (_, mut call) in drained {
            call.err = Some(err.clone());
            call.sequence = Sequence::NONE;
            call.done();
        }
    }

    /// Phase one of finalization: remove the entry under the lock. The
    /// caller then owns the call exclusively and completes it outside the
    /// lock.
    fn take(&self, serial: u32) -> Option<Call> {
        self.calls.lock().remove(&serial)
    }
}
