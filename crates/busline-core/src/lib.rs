//! busline-core: Core types for the busline message-bus client.
//!
//! This crate defines:
//! - The wire data model ([`Message`], [`MessageType`], [`HeaderField`], [`MessageFlags`])
//! - Typed values ([`Value`], [`Variant`], [`Signature`], [`ObjectPath`])
//! - Error types ([`Error`], [`DBusError`], [`TransportError`])
//! - Transport traits ([`Transport`], [`DynTransport`], [`AnyTransport`])
//! - Bus address resolution ([`session_bus_address`], [`system_bus_address`])
//!
//! Byte-level marshaling and the authentication handshake live in transport
//! implementations, not here. This crate only fixes the wire constants and
//! the in-memory shape of messages.

#![forbid(unsafe_code)]

mod address;
mod error;
mod flags;
mod message;
mod path;
mod transport;
mod value;

pub use address::*;
pub use error::*;
pub use flags::*;
pub use message::*;
pub use path::*;
pub use transport::*;
pub use value::*;
