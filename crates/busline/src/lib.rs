//! busline: client-side message bus connection engine.
//!
//! The engine correlates concurrent method calls over one shared
//! transport: callers submit calls from any task, a single dispatch loop
//! routes replies, errors, signals, and inbound calls, and every call is
//! finalized exactly once whatever finishes it first.
//!
//! # Architecture
//!
//! - [`Conn`] owns submission, dispatch, and teardown over an
//!   [`AnyTransport`].
//! - [`Object`] is a proxy for one remote destination and path.
//! - [`Call`] is the handle a finished invocation is delivered on.
//! - [`ConnectionManager`] caches one shared connection per bus.
//!
//! Byte-level concerns (marshaling, authentication, sockets) live behind
//! the [`Transport`] trait; `busline-transport-mem` provides the
//! in-process reference implementation.
//!
//! # Quick start
//!
//! ```no_run
//! use busline::{AnyTransport, Conn, MessageFlags, ObjectPath};
//! use busline_transport_mem::MemTransport;
//!
//! # async fn demo() -> Result<(), busline::Error> {
//! let (local, _peer) = MemTransport::pair();
//! let conn = Conn::new(AnyTransport::new(local));
//! tokio::spawn(std::sync::Arc::clone(&conn).run());
//!
//! let obj = conn.object("org.example.Peer", ObjectPath::new("/org/example/Peer")?);
//! let call = obj
//!     .call("org.example.Peer.Ping", MessageFlags::empty(), vec![])
//!     .await?;
//! let _body = call.result()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod call;
mod cancel;
mod conn;
mod manager;
mod names;
mod object;
mod serial;
mod tracker;

pub use busline_core::*;

pub use call::{Call, CallReceiver, CallSender};
pub use cancel::CancelToken;
pub use conn::{Conn, ConnBuilder, Handler, SignalHandler};
pub use manager::{BusConnector, BusType, ConnectionManager};
pub use names::NameTracker;
pub use object::Object;
pub use serial::SerialGenerator;
pub use tracker::CallTracker;
