//! Transport trait and type-erased wrapper.
//!
//! The [`Transport`] trait is the seam between the connection engine and
//! the byte-level world: authentication, marshaling, and socket handling
//! all live behind it. Implementations must accept concurrent
//! `send_message` calls and a single concurrent reader.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Message, TransportError};

/// Trait for transport implementations.
///
/// Uses RPITIT for async methods, so generic code pays no dynamic-dispatch
/// cost when the concrete transport type is known. Use [`AnyTransport`]
/// when you need type erasure.
pub trait Transport: Send + Sync + 'static {
    /// Send one complete message. Fails with [`TransportError`] on I/O
    /// failure or after close.
    fn send_message(
        &self,
        msg: Message,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + '_;

    /// Read one complete message, or fail.
    fn recv_message(&self) -> impl Future<Output = Result<Message, TransportError>> + Send + '_;

    /// Signal close. Non-blocking; subsequent sends and reads fail with
    /// [`TransportError::Closed`].
    fn close(&self);

    /// Check if this transport is closed.
    fn is_closed(&self) -> bool;

    /// Whether the underlying channel can carry unix file descriptors.
    fn supports_unix_fds(&self) -> bool {
        false
    }

    /// Negotiate unix-fd passing with the peer. No-op for transports that
    /// cannot carry descriptors; `supports_unix_fds` reports the result.
    fn enable_unix_fds(&self) {}
}

/// Object-safe version of [`Transport`] for dynamic dispatch.
pub trait DynTransport: Send + Sync + 'static {
    fn send_message_dyn(
        &self,
        msg: Message,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    fn recv_message_dyn(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Message, TransportError>> + Send + '_>>;

    fn close(&self);

    fn is_closed(&self) -> bool;

    fn supports_unix_fds(&self) -> bool;

    fn enable_unix_fds(&self);
}

impl<T: Transport> DynTransport for T {
    fn send_message_dyn(
        &self,
        msg: Message,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(self.send_message(msg))
    }

    fn recv_message_dyn(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Message, TransportError>> + Send + '_>> {
        Box::pin(self.recv_message())
    }

    fn close(&self) {
        Transport::close(self)
    }

    fn is_closed(&self) -> bool {
        Transport::is_closed(self)
    }

    fn supports_unix_fds(&self) -> bool {
        Transport::supports_unix_fds(self)
    }

    fn enable_unix_fds(&self) {
        Transport::enable_unix_fds(self)
    }
}

/// Type-erased transport wrapper.
///
/// Wraps any [`Transport`] in an `Arc<dyn DynTransport>`, giving the
/// connection one concrete type to own regardless of the backing
/// transport. Cheap to clone; adds one vtable lookup per call, which is
/// noise next to actual I/O.
#[derive(Clone)]
pub struct AnyTransport {
    inner: Arc<dyn DynTransport>,
}

impl std::fmt::Debug for AnyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyTransport")
            .field("is_closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl AnyTransport {
    /// Create a type-erased transport from any [`Transport`] implementation.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self {
            inner: Arc::new(transport),
        }
    }

    pub async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.inner.send_message_dyn(msg).await
    }

    pub async fn recv_message(&self) -> Result<Message, TransportError> {
        self.inner.recv_message_dyn().await
    }

    pub fn close(&self) {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn supports_unix_fds(&self) -> bool {
        self.inner.supports_unix_fds()
    }

    pub fn enable_unix_fds(&self) {
        self.inner.enable_unix_fds()
    }
}
