//! Typed values and their one-byte type tags.
//!
//! Encoded form: `[tag: u8][payload]`. Fixed-width payloads are big-endian;
//! STRING and BLOB payloads are all remaining bytes.
//!
//! ```text
//! Tag  Type      Payload
//! 0    NULL      (none)
//! 1    BOOLEAN   u8 0|1
//! 2    BYTE      i8
//! 3    SHORT     i16
//! 4    INT       i32
//! 5    LONG      i64
//! 6    FLOAT     f32
//! 7    DOUBLE    f64
//! 8    DATE      i64 epoch millis
//! 9    STRING    utf8 (rest of buffer)
//! 10   BLOB      bytes (rest of buffer)
//! ```

use std::fmt;

use crate::codec::cursor::ByteCursor;
use crate::codec::primitive::{decode_str, FixedWidth};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Null = 0,
    Boolean = 1,
    Byte = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    Date = 8,
    String = 9,
    Blob = 10,
}

impl TypeTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Null,
            1 => Self::Boolean,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Int,
            5 => Self::Long,
            6 => Self::Float,
            7 => Self::Double,
            8 => Self::Date,
            9 => Self::String,
            10 => Self::Blob,
            _ => return None,
        })
    }

    /// Unknown tags mean a format mismatch or a damaged store.
    pub fn parse(v: u8) -> Result<Self> {
        Self::from_u8(v).ok_or_else(|| StoreError::corruption(format!("unknown type tag {}", v)))
    }

    /// Payload width for fixed-width types, None for variable-length ones.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Boolean => Some(bool::WIDTH),
            Self::Byte => Some(i8::WIDTH),
            Self::Short => Some(i16::WIDTH),
            Self::Int => Some(i32::WIDTH),
            Self::Long | Self::Date => Some(i64::WIDTH),
            Self::Float => Some(f32::WIDTH),
            Self::Double => Some(f64::WIDTH),
            Self::String | Self::Blob => None,
        }
    }
}

/// A value as stored in the value store or used as a key component.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    String(String),
    Blob(Vec<u8>),
}

impl TypedValue {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            TypedValue::Null => TypeTag::Null,
            TypedValue::Boolean(_) => TypeTag::Boolean,
            TypedValue::Byte(_) => TypeTag::Byte,
            TypedValue::Short(_) => TypeTag::Short,
            TypedValue::Int(_) => TypeTag::Int,
            TypedValue::Long(_) => TypeTag::Long,
            TypedValue::Float(_) => TypeTag::Float,
            TypedValue::Double(_) => TypeTag::Double,
            TypedValue::Date(_) => TypeTag::Date,
            TypedValue::String(_) => TypeTag::String,
            TypedValue::Blob(_) => TypeTag::Blob,
        }
    }

    /// Append the payload only (no tag).
    pub fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            TypedValue::Null => {}
            TypedValue::Boolean(v) => v.put(out),
            TypedValue::Byte(v) => v.put(out),
            TypedValue::Short(v) => v.put(out),
            TypedValue::Int(v) => v.put(out),
            TypedValue::Long(v) | TypedValue::Date(v) => v.put(out),
            TypedValue::Float(v) => v.put(out),
            TypedValue::Double(v) => v.put(out),
            TypedValue::String(s) => out.extend_from_slice(s.as_bytes()),
            TypedValue::Blob(b) => out.extend_from_slice(b),
        }
    }

    /// Append `[tag][payload]`.
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        out.push(self.type_tag() as u8);
        self.encode_payload(out);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.type_tag().fixed_width().unwrap_or(16));
        self.encode_to(&mut out);
        out
    }

    /// Decode `[tag][payload]`, consuming the whole buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let tag = TypeTag::parse(cursor.read_u8()?)?;
        Self::decode_payload(tag, cursor.read_rest())
    }

    /// Decode a payload whose tag was stored elsewhere (e.g. a record header).
    pub fn decode_payload(tag: TypeTag, payload: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        let value = match tag {
            TypeTag::Null => TypedValue::Null,
            TypeTag::Boolean => TypedValue::Boolean(bool::get(&mut cursor)?),
            TypeTag::Byte => TypedValue::Byte(i8::get(&mut cursor)?),
            TypeTag::Short => TypedValue::Short(i16::get(&mut cursor)?),
            TypeTag::Int => TypedValue::Int(i32::get(&mut cursor)?),
            TypeTag::Long => TypedValue::Long(i64::get(&mut cursor)?),
            TypeTag::Float => TypedValue::Float(f32::get(&mut cursor)?),
            TypeTag::Double => TypedValue::Double(f64::get(&mut cursor)?),
            TypeTag::Date => TypedValue::Date(i64::get(&mut cursor)?),
            TypeTag::String => TypedValue::String(decode_str(cursor.read_rest())?.to_string()),
            TypeTag::Blob => TypedValue::Blob(cursor.read_rest().to_vec()),
        };
        cursor.expect_end("typed value payload")?;
        Ok(value)
    }

    /// Integer view used for range lookups. Strings holding an integer count.
    pub fn as_range_point(&self) -> Option<i64> {
        match self {
            TypedValue::Byte(v) => Some(i64::from(*v)),
            TypedValue::Short(v) => Some(i64::from(*v)),
            TypedValue::Int(v) => Some(i64::from(*v)),
            TypedValue::Long(v) | TypedValue::Date(v) => Some(*v),
            TypedValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for TypedValue {
    fn from(s: &str) -> Self {
        TypedValue::String(s.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(s: String) -> Self {
        TypedValue::String(s)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Long(v)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(v: Vec<u8>) -> Self {
        TypedValue::Blob(v)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => write!(f, "null"),
            TypedValue::Boolean(v) => write!(f, "{}", v),
            TypedValue::Byte(v) => write!(f, "{}", v),
            TypedValue::Short(v) => write!(f, "{}", v),
            TypedValue::Int(v) => write!(f, "{}", v),
            TypedValue::Long(v) | TypedValue::Date(v) => write!(f, "{}", v),
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Double(v) => write!(f, "{}", v),
            TypedValue::String(s) => write!(f, "{}", s),
            TypedValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Payload bytes read before their type is known.
///
/// The value store keeps the tag in the record header; readers that only
/// copy values around never need to decode the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub type_tag: TypeTag,
    pub payload: Vec<u8>,
}

impl RawValue {
    pub fn resolve(&self) -> Result<TypedValue> {
        TypedValue::decode_payload(self.type_tag, &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_samples() -> Vec<TypedValue> {
        vec![
            TypedValue::Null,
            TypedValue::Boolean(true),
            TypedValue::Byte(i8::MIN),
            TypedValue::Short(i16::MAX),
            TypedValue::Int(0),
            TypedValue::Long(i64::MIN),
            TypedValue::Float(-1.5),
            TypedValue::Double(f64::MAX),
            TypedValue::Date(1_700_000_000_000),
            TypedValue::String(String::new()),
            TypedValue::String("reference".into()),
            TypedValue::Blob(vec![]),
            TypedValue::Blob(vec![0, 255, 7]),
        ]
    }

    #[test]
    fn test_tag_is_first_byte() {
        for value in all_samples() {
            let bytes = value.encode();
            assert_eq!(bytes[0], value.type_tag() as u8);
            if let Some(width) = value.type_tag().fixed_width() {
                assert_eq!(bytes.len(), 1 + width, "{:?}", value);
            }
            assert_eq!(TypedValue::decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_tag_values_are_stable() {
        assert_eq!(TypedValue::Null.encode(), vec![0]);
        assert_eq!(TypedValue::Int(1).encode(), vec![4, 0, 0, 0, 1]);
        assert_eq!(TypedValue::from("ab").encode(), vec![9, b'a', b'b']);
        assert_eq!(TypedValue::Blob(vec![1]).encode(), vec![10, 1]);
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let err = TypedValue::decode(&[42, 1, 2]).unwrap_err();
        assert_eq!(err.code(), "CORRUPTION");
        assert!(err.to_string().contains("unknown type tag 42"));
    }

    #[test]
    fn test_wrong_payload_width_is_corruption() {
        assert!(TypedValue::decode(&[TypeTag::Int as u8, 0, 0]).is_err());
        assert!(TypedValue::decode(&[TypeTag::Short as u8, 0, 0, 0]).is_err());
        assert!(TypedValue::decode(&[]).is_err());
    }

    #[test]
    fn test_raw_value_resolves_later() {
        let value = TypedValue::Double(2.25);
        let mut payload = Vec::new();
        value.encode_payload(&mut payload);
        let raw = RawValue {
            type_tag: TypeTag::Double,
            payload,
        };
        assert_eq!(raw.resolve().unwrap(), value);
    }

    #[test]
    fn test_range_point() {
        assert_eq!(TypedValue::Int(-4).as_range_point(), Some(-4));
        assert_eq!(TypedValue::from(" 17 ").as_range_point(), Some(17));
        assert_eq!(TypedValue::from("x").as_range_point(), None);
        assert_eq!(TypedValue::Double(1.0).as_range_point(), None);
    }
}
