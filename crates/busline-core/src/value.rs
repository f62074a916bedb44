//! Typed wire values.
//!
//! The bus wire format is typed; every value that travels in a message body
//! or header carries a signature describing its wire type. [`Value`] is a
//! closed tagged enum over the wire's primitive and container kinds, so
//! extraction is a checked pattern match rather than a reinterpretation.

use std::fmt;

use crate::{Error, ObjectPath};

/// Maximum length of a serialized signature string.
const MAX_SIGNATURE_LEN: usize = 255;

/// A wire type descriptor for a value or value sequence.
///
/// The string form (`"a{sv}"`, `"ii"`, ...) is part of the wire contract;
/// parsing it into a type tree is the marshaling subsystem's job, not ours.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Validate `sig` and wrap it.
    ///
    /// Validation is shallow: allowed type codes, balanced `()` and `{}`,
    /// and the wire length limit. Full grammar checks belong to the
    /// marshaling subsystem.
    pub fn new(sig: impl Into<String>) -> Result<Self, Error> {
        let sig = sig.into();
        if sig.len() > MAX_SIGNATURE_LEN {
            return Err(Error::InvalidSignature(sig));
        }
        let mut parens = 0i32;
        let mut braces = 0i32;
        for b in sig.bytes() {
            match b {
                b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o'
                | b'g' | b'v' | b'h' | b'a' => {}
                b'(' => parens += 1,
                b')' => {
                    parens -= 1;
                    if parens < 0 {
                        return Err(Error::InvalidSignature(sig));
                    }
                }
                b'{' => braces += 1,
                b'}' => {
                    braces -= 1;
                    if braces < 0 {
                        return Err(Error::InvalidSignature(sig));
                    }
                }
                _ => return Err(Error::InvalidSignature(sig)),
            }
        }
        if parens != 0 || braces != 0 {
            return Err(Error::InvalidSignature(sig));
        }
        Ok(Self(sig))
    }

    /// Signature of a value sequence: the concatenation of each value's
    /// signature. An empty slice yields the empty signature.
    pub fn of_values(values: &[Value]) -> Self {
        let mut out = String::new();
        for value in values {
            out.push_str(value.signature().as_str());
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Internal constructor for signatures derived from a [`Value`], which
    /// are well-formed by construction.
    pub(crate) fn from_derived(sig: String) -> Self {
        Self(sig)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A self-describing value: payload plus its derived signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    signature: Signature,
    value: Value,
}

impl Variant {
    pub fn new(value: Value) -> Self {
        Self {
            signature: value.signature(),
            value,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.value.as_u32()
    }

    pub fn as_object_path(&self) -> Option<&ObjectPath> {
        self.value.as_object_path()
    }
}

/// A single typed wire value.
///
/// The enum is closed over the wire's kinds; a value that exists cannot
/// fail to have a signature. Container constructors that could produce an
/// unrepresentable shape (heterogeneous arrays, empty structs) return
/// [`Error::InvalidType`] before any bytes could reach the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Str(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    /// Array of values sharing one element signature. The signature is kept
    /// explicitly so empty arrays stay typed.
    Array {
        element: Signature,
        items: Vec<Value>,
    },
    Struct(Vec<Value>),
    /// Key/value pair; only meaningful as the element of an array.
    DictEntry(Box<Value>, Box<Value>),
    Variant(Box<Variant>),
    UnixFd(u32),
}

impl Value {
    /// Build an array, checking every item against the element signature.
    pub fn array(element: Signature, items: Vec<Value>) -> Result<Self, Error> {
        for item in &items {
            let got = item.signature();
            if got != element {
                return Err(Error::InvalidType {
                    expected: element.as_str().to_string(),
                    found: got.as_str().to_string(),
                });
            }
        }
        Ok(Self::Array { element, items })
    }

    /// Build a struct; empty structs have no wire representation.
    pub fn structure(fields: Vec<Value>) -> Result<Self, Error> {
        if fields.is_empty() {
            return Err(Error::InvalidType {
                expected: "non-empty struct".to_string(),
                found: "()".to_string(),
            });
        }
        Ok(Self::Struct(fields))
    }

    pub fn variant(value: Value) -> Self {
        Self::Variant(Box::new(Variant::new(value)))
    }

    /// Derive the wire signature of this value.
    pub fn signature(&self) -> Signature {
        let mut out = String::new();
        self.write_signature(&mut out);
        Signature::from_derived(out)
    }

    fn write_signature(&self, out: &mut String) {
        match self {
            Value::Bool(_) => out.push('b'),
            Value::Byte(_) => out.push('y'),
            Value::Int16(_) => out.push('n'),
            Value::Uint16(_) => out.push('q'),
            Value::Int32(_) => out.push('i'),
            Value::Uint32(_) => out.push('u'),
            Value::Int64(_) => out.push('x'),
            Value::Uint64(_) => out.push('t'),
            Value::Double(_) => out.push('d'),
            Value::Str(_) => out.push('s'),
            Value::ObjectPath(_) => out.push('o'),
            Value::Signature(_) => out.push('g'),
            Value::Array { element, .. } => {
                out.push('a');
                out.push_str(element.as_str());
            }
            Value::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write_signature(out);
                }
                out.push(')');
            }
            Value::DictEntry(key, value) => {
                out.push('{');
                key.write_signature(out);
                value.write_signature(out);
                out.push('}');
            }
            Value::Variant(_) => out.push('v'),
            Value::UnixFd(_) => out.push('h'),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object_path(&self) -> Option<&ObjectPath> {
        match self {
            Value::ObjectPath(p) => Some(p),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Uint32(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_signatures() {
        assert_eq!(Value::Bool(true).signature().as_str(), "b");
        assert_eq!(Value::Str("x".into()).signature().as_str(), "s");
        assert_eq!(Value::Uint32(1).signature().as_str(), "u");
        assert_eq!(Value::Double(0.5).signature().as_str(), "d");
        assert_eq!(
            Value::ObjectPath(ObjectPath::root()).signature().as_str(),
            "o"
        );
    }

    #[test]
    fn container_signatures() {
        let dict = Value::array(
            Signature::new("{sv}").unwrap(),
            vec![Value::DictEntry(
                Box::new(Value::Str("k".into())),
                Box::new(Value::variant(Value::Uint32(7))),
            )],
        )
        .unwrap();
        assert_eq!(dict.signature().as_str(), "a{sv}");

        let st = Value::structure(vec![Value::Int32(1), Value::Str("x".into())]).unwrap();
        assert_eq!(st.signature().as_str(), "(is)");
    }

    #[test]
    fn empty_array_keeps_element_signature() {
        let arr = Value::array(Signature::new("s").unwrap(), vec![]).unwrap();
        assert_eq!(arr.signature().as_str(), "as");
    }

    #[test]
    fn heterogeneous_array_rejected() {
        let err = Value::array(
            Signature::new("s").unwrap(),
            vec![Value::Str("ok".into()), Value::Uint32(1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidType { .. }));
    }

    #[test]
    fn empty_struct_rejected() {
        assert!(matches!(
            Value::structure(vec![]),
            Err(Error::InvalidType { .. })
        ));
    }

    #[test]
    fn signature_of_values_concatenates() {
        let sig = Signature::of_values(&[Value::Int32(1), Value::Str("x".into())]);
        assert_eq!(sig.as_str(), "is");
        assert!(Signature::of_values(&[]).is_empty());
    }

    #[test]
    fn signature_validation() {
        assert!(Signature::new("a{sv}").is_ok());
        assert!(Signature::new("(ii)").is_ok());
        assert!(Signature::new("a{sv").is_err());
        assert!(Signature::new("z").is_err());
        assert!(Signature::new(")(").is_err());
    }

    #[test]
    fn variant_derives_signature() {
        let v = Variant::new(Value::Str("hi".into()));
        assert_eq!(v.signature().as_str(), "s");
        assert_eq!(v.as_str(), Some("hi"));
        assert_eq!(v.as_u32(), None);
    }
}
