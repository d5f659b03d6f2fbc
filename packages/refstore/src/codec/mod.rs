//! Byte-level codecs for scalars and typed values.

pub mod cursor;
pub mod primitive;
pub mod value;

pub use cursor::ByteCursor;
pub use primitive::FixedWidth;
pub use value::{RawValue, TypeTag, TypedValue};
