//! busline-transport-mem: In-process transport for busline.
//!
//! This is the semantic reference implementation: messages pass through
//! async channels with no marshaling, no authentication, and no sockets,
//! so tests exercise connection semantics in isolation. Behavior here is
//! what every real transport must match.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use busline_core::{Message, Transport, TransportError};
use tokio::sync::mpsc;

/// Channel capacity for each direction of the pair.
const CHANNEL_CAPACITY: usize = 64;

/// In-process transport implementation.
///
/// Messages sent on one half of a [`MemTransport::pair`] are received on
/// the other. Closing either half fails subsequent sends and reads on it;
/// the peer observes `Closed` once the channel drains.
#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

struct MemInner {
    /// Messages to the peer.
    tx: mpsc::Sender<Message>,
    /// Messages from the peer. Locked with a tokio mutex because the lock
    /// is held across the recv await; the engine drives a single reader.
    rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    closed: AtomicBool,
}

impl MemTransport {
    /// Create a connected pair of in-process transports.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let inner_a = Arc::new(MemInner {
            tx: tx_b,
            rx: tokio::sync::Mutex::new(rx_a),
            closed: AtomicBool::new(false),
        });

        let inner_b = Arc::new(MemInner {
            tx: tx_a,
            rx: tokio::sync::Mutex::new(rx_b),
            closed: AtomicBool::new(false),
        });

        (Self { inner: inner_a }, Self { inner: inner_b })
    }
}

impl Transport for MemTransport {
    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner
            .tx
            .send(msg)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_message(&self) -> Result<Message, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
