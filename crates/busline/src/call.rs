//! In-flight call handles.

use busline_core::{DBusError, Message, ObjectPath, Sequence, Value};
use tokio::sync::{mpsc, oneshot};

/// Channel half on which a completed [`Call`] is delivered. Must have
/// capacity for at least one message; tokio's bounded channels enforce
/// this at construction.
pub type CallSender = mpsc::Sender<Call>;

/// Receiving half for completed calls.
pub type CallReceiver = mpsc::Receiver<Call>;

/// A handle to one method invocation.
///
/// While in flight the call is owned by the tracker; once finalized it is
/// delivered on its completion channel and owned exclusively by the
/// caller. Outcome inspection has exactly one path: [`Call::result`] (or
/// the `err` field), whether the failure was remote or local.
#[derive(Debug)]
pub struct Call {
    pub destination: String,
    pub path: ObjectPath,
    /// Composed `interface.member` method name.
    pub method: String,
    pub args: Vec<Value>,
    /// Reply body, empty until completion (or on error).
    pub body: Vec<Value>,
    pub err: Option<DBusError>,
    /// Receive-order position of the response; `Sequence::NONE` for
    /// locally synthesized outcomes.
    pub sequence: Sequence,
    done_tx: Option<CallSender>,
    /// Dropped at completion to disarm the cancellation watcher.
    cancel_guard: Option<oneshot::Sender<()>>,
}

impl Call {
    /// Build a pending call from an outbound method-call message.
    pub(crate) fn from_message(msg: &Message, done_tx: CallSender) -> Self {
        Self {
            destination: msg.destination().unwrap_or_default().to_string(),
            path: msg.path().cloned().unwrap_or_else(ObjectPath::root),
            method: msg.method_name().unwrap_or_default(),
            args: msg.body.clone(),
            body: Vec::new(),
            err: None,
            sequence: Sequence::NONE,
            done_tx: Some(done_tx),
            cancel_guard: None,
        }
    }

    pub(crate) fn set_cancel_guard(&mut self, guard: oneshot::Sender<()>) {
        self.cancel_guard = Some(guard);
    }

    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }

    /// The reply body, or the error that ended the call.
    pub fn result(self) -> Result<Vec<Value>, DBusError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.body),
        }
    }

    /// Deliver the handle on its completion channel.
    ///
    /// Never blocks: delivery uses the channel's buffered slot. The single
    /// route here is removal from the tracker (or local synthesis before
    /// tracking), so a call is delivered at most once. If the caller's
    /// channel has no free slot the handle is dropped rather than blocking
    /// the dispatch path.
    pub(crate) fn done(mut self) {
        drop(self.cancel_guard.take());
        let Some(tx) = self.done_tx.take() else {
            return;
        };
        if let Err(e) = tx.try_send(self) {
            let call = match &e {
                mpsc::error::TrySendError::Full(call) => call,
                mpsc::error::TrySendError::Closed(call) => call,
            };
            tracing::warn!(
                destination = %call.destination,
                method = %call.method,
                "completion channel unavailable; dropping finished call"
            );
        }
    }
}
