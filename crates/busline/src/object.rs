//! Remote object proxies.

use std::sync::Arc;

use busline_core::{Error, Message, MessageFlags, ObjectPath, Value};
use tokio::sync::mpsc;

use crate::{Call, CallSender, CancelToken, Conn};

/// A proxy for one remote object: a destination name plus an object path.
///
/// Pure data; constructing one has no side effects and performs no I/O.
/// All submission goes through the owning connection.
#[derive(Debug, Clone)]
pub struct Object {
    conn: Arc<Conn>,
    destination: String,
    path: ObjectPath,
}

impl Object {
    pub(crate) fn new(conn: Arc<Conn>, destination: impl Into<String>, path: ObjectPath) -> Self {
        Self {
            conn,
            destination: destination.into(),
            path,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Invoke `method` and wait for the outcome.
    ///
    /// `method` is split on its last `.` into interface and member. A
    /// dot-free method produces a message with no interface header,
    /// matching the bus's own convention for ambiguous addressing.
    pub async fn call(
        &self,
        method: &str,
        flags: MessageFlags,
        args: Vec<Value>,
    ) -> Result<Call, Error> {
        self.call_with_context(self.conn.context().clone(), method, flags, args)
            .await
    }

    /// Like [`Object::call`] with a caller-supplied cancellation context.
    /// Cancelling the context finalizes the call with the cancellation
    /// error kind; the caller never hangs on a dead peer.
    pub async fn call_with_context(
        &self,
        ctx: CancelToken,
        method: &str,
        flags: MessageFlags,
        args: Vec<Value>,
    ) -> Result<Call, Error> {
        let (tx, mut rx) = mpsc::channel(1);
        self.go_call_with_context(ctx, method, flags, args, tx)
            .await?;
        rx.recv().await.ok_or(Error::Cancelled)
    }

    /// Submit `method` asynchronously. Returns as soon as the message is
    /// handed off; the completed [`Call`] arrives on `ch`. Blocking
    /// happens only when the caller waits on that channel.
    pub async fn go_call(
        &self,
        method: &str,
        flags: MessageFlags,
        args: Vec<Value>,
        ch: CallSender,
    ) -> Result<(), Error> {
        self.go_call_with_context(self.conn.context().clone(), method, flags, args, ch)
            .await
    }

    /// [`Object::go_call`] with a caller-supplied cancellation context.
    pub async fn go_call_with_context(
        &self,
        ctx: CancelToken,
        method: &str,
        flags: MessageFlags,
        args: Vec<Value>,
        ch: CallSender,
    ) -> Result<(), Error> {
        let msg = self.build_call(method, flags, args);
        self.conn.send_with_context(ctx, msg, ch).await
    }

    fn build_call(&self, method: &str, flags: MessageFlags, args: Vec<Value>) -> Message {
        let (interface, member) = match method.rfind('.') {
            Some(dot) => (Some(&method[..dot]), &method[dot + 1..]),
            None => (None, method),
        };
        let mut msg =
            Message::method_call(&self.destination, self.path.clone(), interface, member);
        msg.flags = flags;
        msg.set_body(args);
        msg
    }
}
