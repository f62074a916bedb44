//! Bus messages and their header fields.

use std::collections::HashMap;

use crate::{MessageFlags, ObjectPath, Signature, Value, Variant};

/// Protocol major version stamped on every message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Position of a processed inbound message in the connection's receive
/// order. `Sequence::NONE` (zero) is reserved and never assigned to a real
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sequence(pub u64);

impl Sequence {
    pub const NONE: Sequence = Sequence(0);
}

/// Message type ids, fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0,
    MethodCall = 1,
    MethodReply = 2,
    Error = 3,
    Signal = 4,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::MethodCall,
            2 => Self::MethodReply,
            3 => Self::Error,
            4 => Self::Signal,
            _ => Self::Invalid,
        }
    }
}

/// Header field ids, fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeaderField {
    Invalid = 0,
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

impl HeaderField {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Path,
            2 => Self::Interface,
            3 => Self::Member,
            4 => Self::ErrorName,
            5 => Self::ReplySerial,
            6 => Self::Destination,
            7 => Self::Sender,
            8 => Self::Signature,
            9 => Self::UnixFds,
            _ => Self::Invalid,
        }
    }
}

/// One bus message: fixed header, variable header fields, ordered body.
///
/// Built by the object proxy and the connection for sending; produced by
/// the transport when receiving. Header keys are unique; inserting a field
/// twice keeps the last value.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub flags: MessageFlags,
    pub version: u8,
    pub serial: u32,
    pub headers: HashMap<HeaderField, Variant>,
    pub body: Vec<Value>,
}

impl Message {
    fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            flags: MessageFlags::empty(),
            version: PROTOCOL_VERSION,
            serial: 0,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Build a method call. The interface header is omitted when
    /// `interface` is `None`, matching the bus convention for ambiguous
    /// addressing.
    pub fn method_call(
        destination: &str,
        path: ObjectPath,
        interface: Option<&str>,
        member: &str,
    ) -> Self {
        let mut msg = Self::new(MessageType::MethodCall);
        msg.set_header(HeaderField::Destination, Value::Str(destination.into()));
        msg.set_header(HeaderField::Path, Value::ObjectPath(path));
        if let Some(interface) = interface {
            msg.set_header(HeaderField::Interface, Value::Str(interface.into()));
        }
        msg.set_header(HeaderField::Member, Value::Str(member.into()));
        msg
    }

    /// Build a reply to `call`, addressed back to its sender.
    pub fn method_reply(call: &Message) -> Self {
        let mut msg = Self::new(MessageType::MethodReply);
        msg.set_header(HeaderField::ReplySerial, Value::Uint32(call.serial));
        if let Some(sender) = call.sender() {
            msg.set_header(HeaderField::Destination, Value::Str(sender.into()));
        }
        msg
    }

    /// Build an error reply to `call`.
    pub fn error_reply(call: &Message, name: &str) -> Self {
        let mut msg = Self::new(MessageType::Error);
        msg.set_header(HeaderField::ErrorName, Value::Str(name.into()));
        msg.set_header(HeaderField::ReplySerial, Value::Uint32(call.serial));
        if let Some(sender) = call.sender() {
            msg.set_header(HeaderField::Destination, Value::Str(sender.into()));
        }
        msg
    }

    /// Build a signal emission.
    pub fn signal(path: ObjectPath, interface: &str, member: &str) -> Self {
        let mut msg = Self::new(MessageType::Signal);
        msg.flags = MessageFlags::NO_REPLY_EXPECTED;
        msg.set_header(HeaderField::Path, Value::ObjectPath(path));
        msg.set_header(HeaderField::Interface, Value::Str(interface.into()));
        msg.set_header(HeaderField::Member, Value::Str(member.into()));
        msg
    }

    /// Set the body and its signature header in one step.
    pub fn set_body(&mut self, body: Vec<Value>) {
        if !body.is_empty() {
            let sig = Signature::of_values(&body);
            self.set_header(HeaderField::Signature, Value::Signature(sig));
        }
        self.body = body;
    }

    pub fn set_header(&mut self, field: HeaderField, value: Value) {
        self.headers.insert(field, Variant::new(value));
    }

    pub fn header(&self, field: HeaderField) -> Option<&Variant> {
        self.headers.get(&field)
    }

    // Checked header accessors. A header that is absent or carries the
    // wrong type reads as None; the caller treats the message as
    // unroutable rather than failing.

    pub fn reply_serial(&self) -> Option<u32> {
        self.header(HeaderField::ReplySerial)?.as_u32()
    }

    pub fn destination(&self) -> Option<&str> {
        self.header(HeaderField::Destination)?.as_str()
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.header(HeaderField::Path)?.as_object_path()
    }

    pub fn interface(&self) -> Option<&str> {
        self.header(HeaderField::Interface)?.as_str()
    }

    pub fn member(&self) -> Option<&str> {
        self.header(HeaderField::Member)?.as_str()
    }

    pub fn error_name(&self) -> Option<&str> {
        self.header(HeaderField::ErrorName)?.as_str()
    }

    pub fn sender(&self) -> Option<&str> {
        self.header(HeaderField::Sender)?.as_str()
    }

    /// Composed `interface.member` name, or just the member when the
    /// interface header is absent. `None` when there is no member at all.
    pub fn method_name(&self) -> Option<String> {
        let member = self.member()?;
        match self.interface() {
            Some(interface) => Some(format!("{interface}.{member}")),
            None => Some(member.to_string()),
        }
    }

    /// Whether the sender expects a reply correlated by serial.
    pub fn expects_reply(&self) -> bool {
        self.message_type == MessageType::MethodCall
            && !self.flags.contains(MessageFlags::NO_REPLY_EXPECTED)
    }
}

/// A received signal emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub sender: String,
    pub path: ObjectPath,
    /// Composed `interface.member` name.
    pub name: String,
    pub body: Vec<Value>,
    pub sequence: Sequence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids() {
        assert_eq!(MessageType::Invalid as u8, 0);
        assert_eq!(MessageType::MethodCall as u8, 1);
        assert_eq!(MessageType::MethodReply as u8, 2);
        assert_eq!(MessageType::Error as u8, 3);
        assert_eq!(MessageType::Signal as u8, 4);

        assert_eq!(HeaderField::Invalid as u8, 0);
        assert_eq!(HeaderField::Path as u8, 1);
        assert_eq!(HeaderField::Interface as u8, 2);
        assert_eq!(HeaderField::Member as u8, 3);
        assert_eq!(HeaderField::ErrorName as u8, 4);
        assert_eq!(HeaderField::ReplySerial as u8, 5);
        assert_eq!(HeaderField::Destination as u8, 6);
        assert_eq!(HeaderField::Sender as u8, 7);
        assert_eq!(HeaderField::Signature as u8, 8);
        assert_eq!(HeaderField::UnixFds as u8, 9);

        assert_eq!(HeaderField::from_u8(5), HeaderField::ReplySerial);
        assert_eq!(HeaderField::from_u8(42), HeaderField::Invalid);
        assert_eq!(MessageType::from_u8(4), MessageType::Signal);
        assert_eq!(MessageType::from_u8(9), MessageType::Invalid);
    }

    #[test]
    fn method_call_headers() {
        let msg = Message::method_call(
            "org.example.Foo",
            ObjectPath::new("/org/example/Foo").unwrap(),
            Some("org.example.Foo"),
            "Frobnicate",
        );
        assert_eq!(msg.message_type, MessageType::MethodCall);
        assert_eq!(msg.destination(), Some("org.example.Foo"));
        assert_eq!(msg.member(), Some("Frobnicate"));
        assert_eq!(msg.interface(), Some("org.example.Foo"));
        assert_eq!(msg.version, PROTOCOL_VERSION);
        assert!(msg.expects_reply());
    }

    #[test]
    fn method_call_without_interface() {
        let msg = Message::method_call("dest", ObjectPath::root(), None, "Ping");
        assert_eq!(msg.interface(), None);
        assert_eq!(msg.method_name().as_deref(), Some("Ping"));
    }

    #[test]
    fn set_body_adds_signature_header() {
        let mut msg = Message::method_call("dest", ObjectPath::root(), None, "M");
        msg.set_body(vec![Value::Int32(1), Value::Str("x".into())]);
        let sig = msg.header(HeaderField::Signature).unwrap();
        assert_eq!(sig.value(), &Value::Signature(Signature::new("is").unwrap()));

        let mut empty = Message::method_call("dest", ObjectPath::root(), None, "M");
        empty.set_body(vec![]);
        assert!(empty.header(HeaderField::Signature).is_none());
    }

    #[test]
    fn checked_accessors_reject_wrong_types() {
        let mut msg = Message::method_call("dest", ObjectPath::root(), None, "M");
        msg.set_header(HeaderField::ReplySerial, Value::Str("nope".into()));
        assert_eq!(msg.reply_serial(), None);
    }

    #[test]
    fn no_reply_flag_suppresses_reply_expectation() {
        let mut msg = Message::method_call("dest", ObjectPath::root(), None, "M");
        msg.flags |= MessageFlags::NO_REPLY_EXPECTED;
        assert!(!msg.expects_reply());
    }
}
