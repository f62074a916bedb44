//! The connection engine: outbound submission, the inbound dispatch loop,
//! and the close path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use busline_core::{
    AnyTransport, DBusError, Error, Message, MessageFlags, MessageType, ObjectPath, Sequence,
    Signal, Value, ERROR_FAILED,
};
use tokio::sync::oneshot;

use crate::{Call, CallSender, CallTracker, CancelToken, NameTracker, Object, SerialGenerator};

/// Bus interface emitting name ownership signals.
const BUS_INTERFACE: &str = "org.freedesktop.DBus";
const BUS_PATH: &str = "/org/freedesktop/DBus";
const SIGNAL_NAME_ACQUIRED: &str = "org.freedesktop.DBus.NameAcquired";
const SIGNAL_NAME_LOST: &str = "org.freedesktop.DBus.NameLost";

/// Serves inbound method calls addressed to this connection.
///
/// Invoked from the dispatch loop; implementations should return quickly
/// and push slow work onto their own tasks.
pub trait Handler: Send + Sync + 'static {
    fn handle_call(&self, msg: &Message) -> Result<Vec<Value>, DBusError>;
}

/// Receives inbound signal emissions.
pub trait SignalHandler: Send + Sync + 'static {
    fn handle_signal(&self, signal: Signal);
}

/// Configures a [`Conn`] before construction.
pub struct ConnBuilder {
    transport: AnyTransport,
    handler: Option<Arc<dyn Handler>>,
    signal_handler: Option<Arc<dyn SignalHandler>>,
    ctx: Option<CancelToken>,
}

impl ConnBuilder {
    /// Serve inbound method calls with `handler`.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Deliver inbound signals to `signal_handler`.
    pub fn signal_handler(mut self, signal_handler: Arc<dyn SignalHandler>) -> Self {
        self.signal_handler = Some(signal_handler);
        self
    }

    /// Tie the connection's lifetime to `ctx`. Cancelling it closes the
    /// connection.
    pub fn context(mut self, ctx: CancelToken) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn build(self) -> Arc<Conn> {
        Arc::new(Conn {
            transport: self.transport,
            serials: Arc::new(SerialGenerator::new()),
            names: NameTracker::new(),
            calls: Arc::new(CallTracker::new()),
            ctx: self.ctx.unwrap_or_default(),
            closed: AtomicBool::new(false),
            sequence: AtomicU64::new(1),
            handler: self.handler,
            signal_handler: self.signal_handler,
        })
    }
}

/// One client connection over a transport.
///
/// The connection owns call correlation, serial allocation, and name
/// bookkeeping; the transport owns bytes. All methods take `&self` and are
/// safe to call concurrently. Exactly one task should drive [`Conn::run`].
pub struct Conn {
    transport: AnyTransport,
    serials: Arc<SerialGenerator>,
    names: NameTracker,
    calls: Arc<CallTracker>,
    ctx: CancelToken,
    closed: AtomicBool,
    /// Next receive-order position. Starts at 1; zero is `Sequence::NONE`.
    sequence: AtomicU64,
    handler: Option<Arc<dyn Handler>>,
    signal_handler: Option<Arc<dyn SignalHandler>>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("connected", &self.connected())
            .field("pending", &self.calls.pending())
            .finish_non_exhaustive()
    }
}

impl Conn {
    /// Build a connection over `transport` with default options.
    pub fn new(transport: AnyTransport) -> Arc<Self> {
        Self::builder(transport).build()
    }

    pub fn builder(transport: AnyTransport) -> ConnBuilder {
        ConnBuilder {
            transport,
            handler: None,
            signal_handler: None,
            ctx: None,
        }
    }

    /// The connection-scoped cancellation context.
    pub fn context(&self) -> &CancelToken {
        &self.ctx
    }

    pub fn connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.ctx.is_cancelled()
    }

    /// Name bookkeeping for this connection.
    pub fn names(&self) -> &NameTracker {
        &self.names
    }

    /// Number of reply-expecting calls currently in flight.
    pub fn pending_calls(&self) -> usize {
        self.calls.pending()
    }

    /// A proxy for the remote object at `destination` / `path`.
    pub fn object(
        self: &Arc<Self>,
        destination: impl Into<String>,
        path: ObjectPath,
    ) -> Object {
        Object::new(Arc::clone(self), destination, path)
    }

    /// Submit an outbound method call; the outcome arrives on `ch`.
    pub async fn send(self: &Arc<Self>, msg: Message, ch: CallSender) -> Result<(), Error> {
        self.send_with_context(self.ctx.clone(), msg, ch).await
    }

    /// Submit an outbound method call under a caller-supplied context.
    ///
    /// Every submitted call is finalized exactly once, on `ch`:
    ///
    /// * no reply expected: finalized successfully before the message is
    ///   even sent, and a send failure is only logged;
    /// * reply expected: tracked under a fresh serial until a reply, an
    ///   error, a cancellation, or the close path finalizes it;
    /// * transport send failure: finalized with the local send-error kind,
    ///   never with a hang;
    /// * closed connection: finalized with the disconnected kind.
    ///
    /// The `Err` return is reserved for submission-time misuse, not for
    /// call outcomes.
    pub async fn send_with_context(
        self: &Arc<Self>,
        ctx: CancelToken,
        msg: Message,
        ch: CallSender,
    ) -> Result<(), Error> {
        if !self.connected() {
            let mut call = Call::from_message(&msg, ch);
            call.err = Some(DBusError::disconnected());
            call.done();
            return Ok(());
        }

        if !msg.expects_reply() {
            // Fire-and-forget: the caller's outcome does not depend on the
            // wire, so finalize first and send after.
            Call::from_message(&msg, ch).done();
            let mut msg = msg;
            let serial = self.serials.get_serial();
            msg.serial = serial;
            if let Err(e) = self.transport.send_message(msg).await {
                tracing::debug!(serial, error = %e, "fire-and-forget send failed");
            }
            self.serials.retire_serial(serial);
            return Ok(());
        }

        let serial = self.serials.get_serial();
        let mut msg = msg;
        msg.serial = serial;
        let mut call = Call::from_message(&msg, ch);

        let guard_rx = if ctx.same(&self.ctx) {
            None
        } else {
            let (guard_tx, guard_rx) = oneshot::channel::<()>();
            call.set_cancel_guard(guard_tx);
            Some(guard_rx)
        };

        if let Err(mut call) = self.calls.track(serial, call) {
            self.serials.retire_serial(serial);
            call.err = Some(DBusError::limits_exceeded());
            call.done();
            return Ok(());
        }

        if let Some(guard_rx) = guard_rx {
            // Per-call context: arm a watcher that races cancellation
            // against completion. The guard is dropped when the call
            // finalizes, which disarms the watcher. The watcher must not
            // start before the call is tracked: a token cancelled in that
            // window would find no entry and leak the call.
            let calls = Arc::clone(&self.calls);
            let serials = Arc::clone(&self.serials);
            let watch_ctx = ctx;
            tokio::spawn(async move {
                tokio::select! {
                    _ = watch_ctx.cancelled() => {
                        if calls.cancel(serial) {
                            serials.retire_serial(serial);
                        }
                    }
                    _ = guard_rx => {}
                }
            });
        }

        if let Err(e) = self.transport.send_message(msg).await {
            // The message never left; fail the call locally. The tracker
            // guarantees this races safely with a concurrent cancel.
            if self
                .calls
                .fail(serial, Sequence::NONE, DBusError::send_error(&e))
            {
                self.serials.retire_serial(serial);
            }
        }
        Ok(())
    }

    /// Drive the inbound side until the transport fails or the connection
    /// is closed. Runs dispatch inline; handlers must not block.
    pub async fn run(self: Arc<Self>) {
        loop {
            let msg = tokio::select! {
                _ = self.ctx.cancelled() => break,
                recv = self.transport.recv_message() => match recv {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!(error = %e, "receive failed; shutting down");
                        break;
                    }
                },
            };
            self.process_message(msg).await;
        }
        self.close();
    }

    /// Dispatch one inbound message.
    ///
    /// Stamps the message with the next receive-order sequence, then routes
    /// by type. Unroutable messages (unknown serials, malformed headers,
    /// invalid types) are logged and dropped; they never tear down the
    /// connection.
    pub async fn process_message(&self, msg: Message) {
        let sequence = Sequence(self.sequence.fetch_add(1, Ordering::SeqCst));
        match msg.message_type {
            MessageType::MethodReply => {
                // Retire only on finalization; an unknown serial may still
                // belong to a call mid-submission.
                if let Some(serial) = self.calls.handle_reply(sequence, msg) {
                    self.serials.retire_serial(serial);
                }
            }
            MessageType::Error => {
                if let Some(serial) = self.calls.handle_dbus_error(sequence, msg) {
                    self.serials.retire_serial(serial);
                }
            }
            MessageType::Signal => self.dispatch_signal(sequence, msg),
            MessageType::MethodCall => self.dispatch_call(msg).await,
            MessageType::Invalid => {
                tracing::debug!(sequence = sequence.0, "invalid message type; dropping");
            }
        }
    }

    fn dispatch_signal(&self, sequence: Sequence, msg: Message) {
        let (Some(path), Some(name)) = (msg.path(), msg.method_name()) else {
            tracing::debug!(sequence = sequence.0, "signal missing path or member; dropping");
            return;
        };
        let signal = Signal {
            sender: msg.sender().unwrap_or_default().to_string(),
            path: path.clone(),
            name,
            body: msg.body.clone(),
            sequence,
        };

        // Name ownership bookkeeping happens before user dispatch so a
        // handler observing the signal sees the updated tracker.
        match signal.name.as_str() {
            SIGNAL_NAME_ACQUIRED => {
                if let Some(name) = signal.body.first().and_then(Value::as_str) {
                    self.names.acquire_name(name);
                }
            }
            SIGNAL_NAME_LOST => {
                if let Some(name) = signal.body.first().and_then(Value::as_str) {
                    self.names.lose_name(name);
                }
            }
            _ => {}
        }

        if let Some(handler) = &self.signal_handler {
            handler.handle_signal(signal);
        }
    }

    async fn dispatch_call(&self, msg: Message) {
        let expects_reply = msg.expects_reply();
        let outcome = match &self.handler {
            Some(handler) => handler.handle_call(&msg),
            None => Err(DBusError::new(
                ERROR_FAILED,
                vec![Value::Str("no handler registered".into())],
            )),
        };

        if !expects_reply {
            return;
        }
        let mut reply = match outcome {
            Ok(body) => {
                let mut reply = Message::method_reply(&msg);
                reply.set_body(body);
                reply
            }
            Err(err) => {
                let mut reply = Message::error_reply(&msg, &err.name);
                reply.set_body(err.body);
                reply
            }
        };
        let serial = self.serials.get_serial();
        reply.serial = serial;
        if let Err(e) = self.transport.send_message(reply).await {
            tracing::debug!(serial, error = %e, "reply send failed");
        }
        // Replies are one-shot; nothing correlates back to this serial.
        self.serials.retire_serial(serial);
    }

    /// Register with the bus and record the assigned unique name.
    ///
    /// Must be the first call on a fresh bus connection.
    pub async fn hello(self: &Arc<Self>) -> Result<String, Error> {
        let bus = self.object(BUS_INTERFACE, ObjectPath::new(BUS_PATH)?);
        let call = bus
            .call("org.freedesktop.DBus.Hello", MessageFlags::empty(), vec![])
            .await?;
        let body = call.result().map_err(Error::DBus)?;
        let name = match body.first() {
            Some(Value::Str(name)) => name.clone(),
            other => {
                return Err(Error::InvalidType {
                    expected: "s".to_string(),
                    found: other
                        .map(|v| v.signature().to_string())
                        .unwrap_or_else(|| "empty body".to_string()),
                })
            }
        };
        self.names.acquire_unique_connection_name(&name);
        tracing::debug!(unique_name = %name, "registered with bus");
        Ok(name)
    }

    /// Close the connection. Idempotent.
    ///
    /// Cancels the connection context, closes the transport, and fails all
    /// in-flight calls with the disconnected kind so no caller hangs.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing connection");
        self.ctx.cancel();
        self.transport.close();
        self.calls.fail_all(DBusError::disconnected());
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_core::{HeaderField, Transport};
    use busline_transport_mem::MemTransport;
    use tokio::sync::mpsc;

    fn pair() -> (Arc<Conn>, MemTransport) {
        let (local, peer) = MemTransport::pair();
        (Conn::new(AnyTransport::new(local)), peer)
    }

    fn call_msg() -> Message {
        Message::method_call(
            "org.example.Peer",
            ObjectPath::root(),
            Some("org.example.Peer"),
            "M",
        )
    }

    #[tokio::test]
    async fn reply_expected_send_tracks_serial() {
        let (conn, peer) = pair();
        let (tx, _rx) = mpsc::channel(1);

        conn.send(call_msg(), tx).await.unwrap();
        assert_eq!(conn.pending_calls(), 1);

        let sent = peer.recv_message().await.unwrap();
        assert_ne!(sent.serial, 0);
    }

    #[tokio::test]
    async fn no_reply_finalizes_before_send() {
        let (conn, peer) = pair();
        let (tx, mut rx) = mpsc::channel(1);

        let mut msg = call_msg();
        msg.flags |= MessageFlags::NO_REPLY_EXPECTED;
        conn.send(msg, tx).await.unwrap();

        // Finalized immediately, nothing tracked.
        let call = rx.recv().await.unwrap();
        assert!(!call.is_err());
        assert_eq!(call.sequence, Sequence::NONE);
        assert_eq!(conn.pending_calls(), 0);

        // The message still went out.
        let sent = peer.recv_message().await.unwrap();
        assert!(!sent.expects_reply());
    }

    #[tokio::test]
    async fn send_failure_synthesizes_send_error() {
        let (conn, peer) = pair();
        drop(peer);

        let (tx, mut rx) = mpsc::channel(1);
        conn.send(call_msg(), tx).await.unwrap();

        let call = rx.recv().await.unwrap();
        assert_eq!(call.err.unwrap().name, busline_core::ERROR_SEND);
        assert_eq!(conn.pending_calls(), 0);
    }

    #[tokio::test]
    async fn send_on_closed_conn_synthesizes_disconnected() {
        let (conn, _peer) = pair();
        conn.close();

        let (tx, mut rx) = mpsc::channel(1);
        conn.send(call_msg(), tx).await.unwrap();

        let call = rx.recv().await.unwrap();
        assert_eq!(call.err.unwrap().name, busline_core::ERROR_DISCONNECTED);
    }

    #[tokio::test]
    async fn close_fails_in_flight_calls_and_is_idempotent() {
        let (conn, _peer) = pair();
        let (tx, mut rx) = mpsc::channel(1);
        conn.send(call_msg(), tx).await.unwrap();

        conn.close();
        conn.close();
        assert!(!conn.connected());

        let call = rx.recv().await.unwrap();
        assert_eq!(call.err.unwrap().name, busline_core::ERROR_DISCONNECTED);
    }

    #[tokio::test]
    async fn per_call_context_cancellation() {
        let (conn, _peer) = pair();
        let ctx = CancelToken::default();
        let (tx, mut rx) = mpsc::channel(1);

        conn.send_with_context(ctx.clone(), call_msg(), tx)
            .await
            .unwrap();
        assert_eq!(conn.pending_calls(), 1);

        ctx.cancel();
        let call = rx.recv().await.unwrap();
        assert_eq!(call.err.unwrap().name, busline_core::ERROR_CANCELLED);
        assert_eq!(conn.pending_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn already_cancelled_context_still_finalizes() {
        // The watcher must observe the tracked entry even when the token
        // was cancelled before submission; a lost race here would leak the
        // call and hang the caller.
        for _ in 0..200 {
            let (conn, _peer) = pair();
            let ctx = CancelToken::new();
            ctx.cancel();

            let (tx, mut rx) = mpsc::channel(1);
            conn.send_with_context(ctx, call_msg(), tx).await.unwrap();

            let call = rx.recv().await.unwrap();
            assert_eq!(call.err.unwrap().name, busline_core::ERROR_CANCELLED);
            assert_eq!(conn.pending_calls(), 0);
        }
    }

    #[tokio::test]
    async fn stray_reply_leaves_pending_call_intact() {
        let (conn, _peer) = pair();
        let (tx, mut rx) = mpsc::channel(1);
        conn.send(call_msg(), tx).await.unwrap();
        assert_eq!(conn.pending_calls(), 1);

        let mut ghost = Message::method_call("d", ObjectPath::root(), None, "M");
        ghost.serial = 99;
        conn.process_message(Message::method_reply(&ghost)).await;
        assert_eq!(conn.pending_calls(), 1);

        let mut tracked = Message::method_call("d", ObjectPath::root(), None, "M");
        tracked.serial = 1;
        let mut reply = Message::method_reply(&tracked);
        reply.set_body(vec![Value::Uint32(5)]);
        conn.process_message(reply).await;
        assert_eq!(
            rx.recv().await.unwrap().result().unwrap(),
            vec![Value::Uint32(5)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_close_drains_once() {
        let (conn, _peer) = pair();
        let (tx, mut rx) = mpsc::channel(2);
        conn.send(call_msg(), tx).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let conn = Arc::clone(&conn);
            tasks.push(tokio::spawn(async move { conn.close() }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(!conn.connected());
        assert_eq!(conn.pending_calls(), 0);
        let call = rx.recv().await.unwrap();
        assert_eq!(call.err.unwrap().name, busline_core::ERROR_DISCONNECTED);
        // Drained exactly once.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replies_are_stamped_with_receive_order() {
        let (conn, _peer) = pair();
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(1);
        conn.send(call_msg(), tx1).await.unwrap();
        conn.send(call_msg(), tx2).await.unwrap();

        // Complete in reverse submission order.
        let mut second = Message::method_call("d", ObjectPath::root(), None, "M");
        second.serial = 2;
        conn.process_message(Message::method_reply(&second)).await;
        let mut first = Message::method_call("d", ObjectPath::root(), None, "M");
        first.serial = 1;
        conn.process_message(Message::method_reply(&first)).await;

        assert_eq!(rx2.recv().await.unwrap().sequence, Sequence(1));
        assert_eq!(rx1.recv().await.unwrap().sequence, Sequence(2));
    }

    #[tokio::test]
    async fn name_signals_update_tracker() {
        let (conn, _peer) = pair();

        let mut acquired = Message::signal(
            ObjectPath::new(BUS_PATH).unwrap(),
            BUS_INTERFACE,
            "NameAcquired",
        );
        acquired.set_body(vec![Value::Str("org.example.Foo".into())]);
        conn.process_message(acquired).await;
        assert!(conn.names().is_known_name("org.example.Foo"));

        let mut lost = Message::signal(
            ObjectPath::new(BUS_PATH).unwrap(),
            BUS_INTERFACE,
            "NameLost",
        );
        lost.set_body(vec![Value::Str("org.example.Foo".into())]);
        conn.process_message(lost).await;
        assert!(!conn.names().is_known_name("org.example.Foo"));
    }

    #[tokio::test]
    async fn unhandled_inbound_call_gets_error_reply() {
        let (conn, peer) = pair();

        let mut inbound = Message::method_call(
            ":1.9",
            ObjectPath::root(),
            Some("org.example.Svc"),
            "Poke",
        );
        inbound.serial = 41;
        inbound.set_header(HeaderField::Sender, Value::Str(":1.2".into()));
        conn.process_message(inbound).await;

        let reply = peer.recv_message().await.unwrap();
        assert_eq!(reply.message_type, MessageType::Error);
        assert_eq!(reply.error_name(), Some(ERROR_FAILED));
        assert_eq!(reply.reply_serial(), Some(41));
        assert_eq!(reply.destination(), Some(":1.2"));
    }

    #[tokio::test]
    async fn inbound_call_with_handler_gets_reply() {
        struct Echo;
        impl Handler for Echo {
            fn handle_call(&self, msg: &Message) -> Result<Vec<Value>, DBusError> {
                Ok(msg.body.clone())
            }
        }

        let (local, peer) = MemTransport::pair();
        let conn = Conn::builder(AnyTransport::new(local))
            .handler(Arc::new(Echo))
            .build();

        let mut inbound =
            Message::method_call(":1.9", ObjectPath::root(), Some("org.example.Svc"), "Echo");
        inbound.serial = 7;
        inbound.set_body(vec![Value::Uint32(11)]);
        conn.process_message(inbound).await;

        let reply = peer.recv_message().await.unwrap();
        assert_eq!(reply.message_type, MessageType::MethodReply);
        assert_eq!(reply.reply_serial(), Some(7));
        assert_eq!(reply.body, vec![Value::Uint32(11)]);
    }

    #[tokio::test]
    async fn signal_handler_receives_signal() {
        struct Recorder(mpsc::Sender<Signal>);
        impl SignalHandler for Recorder {
            fn handle_signal(&self, signal: Signal) {
                let _ = self.0.try_send(signal);
            }
        }

        let (local, _peer) = MemTransport::pair();
        let (sig_tx, mut sig_rx) = mpsc::channel(4);
        let conn = Conn::builder(AnyTransport::new(local))
            .signal_handler(Arc::new(Recorder(sig_tx)))
            .build();

        let mut emission = Message::signal(
            ObjectPath::new("/org/example").unwrap(),
            "org.example.Iface",
            "Changed",
        );
        emission.set_header(HeaderField::Sender, Value::Str(":1.5".into()));
        emission.set_body(vec![Value::Uint32(3)]);
        conn.process_message(emission).await;

        let signal = sig_rx.recv().await.unwrap();
        assert_eq!(signal.name, "org.example.Iface.Changed");
        assert_eq!(signal.sender, ":1.5");
        assert_eq!(signal.sequence, Sequence(1));
        assert_eq!(signal.body, vec![Value::Uint32(3)]);
    }

    #[tokio::test]
    async fn run_loop_ends_on_peer_close() {
        let (conn, peer) = pair();
        let task = tokio::spawn(Arc::clone(&conn).run());

        let (tx, mut rx) = mpsc::channel(1);
        conn.send(call_msg(), tx).await.unwrap();
        drop(peer);

        task.await.unwrap();
        assert!(!conn.connected());
        assert!(rx.recv().await.unwrap().is_err());
    }
}
