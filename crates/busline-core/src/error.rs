//! Error types.

use std::fmt;

use crate::Value;

/// Well-known error name for a generic peer failure.
pub const ERROR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";

/// Error name synthesized when a transport send fails for a reply-expecting
/// call. Local-only, never seen on the wire.
pub const ERROR_SEND: &str = "org.freedesktop.DBus.Local.SendError";

/// Error name synthesized when a call is cancelled before completion.
pub const ERROR_CANCELLED: &str = "org.freedesktop.DBus.Local.Cancelled";

/// Error name synthesized when the connection closes with calls in flight.
pub const ERROR_DISCONNECTED: &str = "org.freedesktop.DBus.Local.Disconnected";

/// Error name synthesized when the pending-call cap is reached.
pub const ERROR_LIMITS_EXCEEDED: &str = "org.freedesktop.DBus.Local.LimitsExceeded";

/// A named bus error plus its body.
///
/// Remote errors carry the peer-reported name; locally synthesized errors
/// use the `org.freedesktop.DBus.Local.*` names above so callers have one
/// uniform error path regardless of where the failure originated.
#[derive(Debug, Clone, PartialEq)]
pub struct DBusError {
    pub name: String,
    pub body: Vec<Value>,
}

impl DBusError {
    pub fn new(name: impl Into<String>, body: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Wrap a transport failure in the local send-error kind.
    pub fn send_error(cause: &TransportError) -> Self {
        Self::new(ERROR_SEND, vec![Value::Str(cause.to_string())])
    }

    pub fn cancelled() -> Self {
        Self::new(ERROR_CANCELLED, vec![])
    }

    pub fn disconnected() -> Self {
        Self::new(ERROR_DISCONNECTED, vec![])
    }

    pub fn limits_exceeded() -> Self {
        Self::new(ERROR_LIMITS_EXCEEDED, vec![])
    }

    /// Display text: the first body value if string-typed, else the name.
    pub fn message(&self) -> &str {
        self.body
            .first()
            .and_then(Value::as_str)
            .unwrap_or(&self.name)
    }
}

impl fmt::Display for DBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for DBusError {}

/// Transport-level errors.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    Io(std::io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Top-level library errors.
#[derive(Debug)]
pub enum Error {
    /// The transport failed.
    Transport(TransportError),
    /// The peer (or the engine, locally) reported a named error.
    DBus(DBusError),
    /// A string failed object path validation.
    InvalidObjectPath(String),
    /// A string failed signature validation.
    InvalidSignature(String),
    /// A value cannot be represented on the wire as requested.
    InvalidType { expected: String, found: String },
    /// The operation was cancelled.
    Cancelled,
    /// The connection is closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::DBus(e) => write!(f, "{}: {}", e.name, e.message()),
            Self::InvalidObjectPath(p) => write!(f, "invalid object path: {p:?}"),
            Self::InvalidSignature(s) => write!(f, "invalid signature: {s:?}"),
            Self::InvalidType { expected, found } => {
                write!(f, "invalid type: expected {expected}, found {found}")
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::DBus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<DBusError> for Error {
    fn from(e: DBusError) -> Self {
        Self::DBus(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbus_error_message_prefers_string_body() {
        let err = DBusError::new(ERROR_FAILED, vec![Value::Str("boom".into())]);
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn dbus_error_message_falls_back_to_name() {
        let err = DBusError::new(ERROR_FAILED, vec![]);
        assert_eq!(err.message(), ERROR_FAILED);

        let err = DBusError::new(ERROR_FAILED, vec![Value::Uint32(4)]);
        assert_eq!(err.message(), ERROR_FAILED);
    }

    #[test]
    fn send_error_wraps_cause() {
        let err = DBusError::send_error(&TransportError::Closed);
        assert_eq!(err.name, ERROR_SEND);
        assert_eq!(err.message(), "transport closed");
    }
}
