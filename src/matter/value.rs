//! Typed attribute values and min/max bounds.
//!
//! Every value carries its [`ValueType`] (kind plus nullability) next to the
//! payload, so type checks on write are a plain comparison of the two types.
//! Nullable integer kinds also treat the reserved sentinel of their width as
//! NULL (unsigned `MAX`, signed `MIN`), and nullable floats treat NaN as NULL.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{DataModelError, Result};

/// Longest payload of a short (one byte length prefix) string.
pub const SHORT_STRING_MAX_LENGTH: usize = 254;

/// Longest payload of a long (two byte length prefix) string or array.
pub const LONG_STRING_MAX_LENGTH: usize = 65534;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Enum8,
    Enum16,
    Bitmap8,
    Bitmap16,
    Bitmap32,
    Float,
    #[strum(serialize = "char_string")]
    CharString,
    #[strum(serialize = "long_char_string")]
    LongCharString,
    #[strum(serialize = "octet_string")]
    OctetString,
    #[strum(serialize = "long_octet_string")]
    LongOctetString,
    Array,
}

impl ValueKind {
    /// Strings and arrays: values whose size is bounded by a per-attribute
    /// `max_size` instead of their type.
    pub fn is_variable_length(self) -> bool {
        self.is_string() || self == Self::Array
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            Self::CharString | Self::LongCharString | Self::OctetString | Self::LongOctetString
        )
    }

    /// Whether min/max bounds may be attached to attributes of this kind.
    pub fn supports_bounds(self) -> bool {
        !self.is_variable_length() && self != Self::Boolean
    }

    /// Largest payload the encoding of this kind can carry.
    pub fn max_length(self) -> Option<usize> {
        match self {
            Self::CharString | Self::OctetString => Some(SHORT_STRING_MAX_LENGTH),
            Self::LongCharString | Self::LongOctetString | Self::Array => {
                Some(LONG_STRING_MAX_LENGTH)
            }
            _ => None,
        }
    }

    fn accepts(self, data: &ValueData) -> bool {
        use ValueData as D;
        matches!(
            (self, data),
            (Self::Boolean, D::Bool(_))
                | (Self::Int8, D::I8(_))
                | (Self::UInt8 | Self::Enum8 | Self::Bitmap8, D::U8(_))
                | (Self::Int16, D::I16(_))
                | (Self::UInt16 | Self::Enum16 | Self::Bitmap16, D::U16(_))
                | (Self::Int32, D::I32(_))
                | (Self::UInt32 | Self::Bitmap32, D::U32(_))
                | (Self::Int64, D::I64(_))
                | (Self::UInt64, D::U64(_))
                | (Self::Float, D::F32(_))
                | (Self::CharString | Self::LongCharString, D::Str(_))
                | (
                    Self::OctetString | Self::LongOctetString | Self::Array,
                    D::Bytes(_)
                )
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    pub kind: ValueKind,
    pub nullable: bool,
}

impl ValueType {
    pub const fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    pub const fn nullable(kind: ValueKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "nullable {}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Raw payload of an [`AttrValue`]. Arrays are kept as their encoded bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueData {
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    Str(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrValue {
    ty: ValueType,
    data: ValueData,
}

macro_rules! scalar_constructors {
    ($($name:ident, $nullable_name:ident, $kind:ident, $arm:ident, $ty:ty;)*) => {
        impl AttrValue {
            $(
                pub fn $name(value: $ty) -> Self {
                    Self {
                        ty: ValueType::new(ValueKind::$kind),
                        data: ValueData::$arm(value),
                    }
                }

                pub fn $nullable_name(value: Option<$ty>) -> Self {
                    Self {
                        ty: ValueType::nullable(ValueKind::$kind),
                        data: value.map_or(ValueData::Null, ValueData::$arm),
                    }
                }
            )*
        }
    };
}

scalar_constructors! {
    boolean, nullable_boolean, Boolean, Bool, bool;
    int8, nullable_int8, Int8, I8, i8;
    uint8, nullable_uint8, UInt8, U8, u8;
    int16, nullable_int16, Int16, I16, i16;
    uint16, nullable_uint16, UInt16, U16, u16;
    int32, nullable_int32, Int32, I32, i32;
    uint32, nullable_uint32, UInt32, U32, u32;
    int64, nullable_int64, Int64, I64, i64;
    uint64, nullable_uint64, UInt64, U64, u64;
    enum8, nullable_enum8, Enum8, U8, u8;
    enum16, nullable_enum16, Enum16, U16, u16;
    bitmap8, nullable_bitmap8, Bitmap8, U8, u8;
    bitmap16, nullable_bitmap16, Bitmap16, U16, u16;
    bitmap32, nullable_bitmap32, Bitmap32, U32, u32;
    float, nullable_float, Float, F32, f32;
}

impl AttrValue {
    /// Build a value from parts, checking that the payload fits the type.
    pub fn new(ty: ValueType, data: ValueData) -> Result<Self> {
        let fits = match data {
            ValueData::Null => ty.nullable,
            ref other => ty.kind.accepts(other),
        };
        if !fits {
            return Err(DataModelError::InvalidArgument(format!(
                "payload {:?} does not fit type {}",
                data, ty
            )));
        }
        Ok(Self { ty, data })
    }

    /// The NULL value of a nullable type.
    pub fn null(ty: ValueType) -> Result<Self> {
        Self::new(ty, ValueData::Null)
    }

    pub fn char_str(value: &str) -> Self {
        Self::string(ValueKind::CharString, false, Some(value))
    }

    pub fn long_char_str(value: &str) -> Self {
        Self::string(ValueKind::LongCharString, false, Some(value))
    }

    pub fn nullable_char_str(value: Option<&str>) -> Self {
        Self::string(ValueKind::CharString, true, value)
    }

    pub fn octet_str(value: &[u8]) -> Self {
        Self::bytes(ValueKind::OctetString, false, Some(value))
    }

    pub fn long_octet_str(value: &[u8]) -> Self {
        Self::bytes(ValueKind::LongOctetString, false, Some(value))
    }

    pub fn nullable_octet_str(value: Option<&[u8]>) -> Self {
        Self::bytes(ValueKind::OctetString, true, value)
    }

    /// An array value, kept as its encoded element bytes.
    pub fn array(encoded: Vec<u8>) -> Self {
        Self {
            ty: ValueType::new(ValueKind::Array),
            data: ValueData::Bytes(encoded),
        }
    }

    fn string(kind: ValueKind, nullable: bool, value: Option<&str>) -> Self {
        Self {
            ty: ValueType { kind, nullable },
            data: value.map_or(ValueData::Null, |s| ValueData::Str(s.to_string())),
        }
    }

    fn bytes(kind: ValueKind, nullable: bool, value: Option<&[u8]>) -> Self {
        Self {
            ty: ValueType { kind, nullable },
            data: value.map_or(ValueData::Null, |b| ValueData::Bytes(b.to_vec())),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn kind(&self) -> ValueKind {
        self.ty.kind
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn into_data(self) -> ValueData {
        self.data
    }

    pub fn is_null(&self) -> bool {
        if !self.ty.nullable {
            return false;
        }
        match self.data {
            ValueData::Null => true,
            ValueData::I8(v) => v == i8::MIN,
            ValueData::U8(v) => v == u8::MAX,
            ValueData::I16(v) => v == i16::MIN,
            ValueData::U16(v) => v == u16::MAX,
            ValueData::I32(v) => v == i32::MIN,
            ValueData::U32(v) => v == u32::MAX,
            ValueData::I64(v) => v == i64::MIN,
            ValueData::U64(v) => v == u64::MAX,
            ValueData::F32(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Payload length in bytes for strings and arrays.
    pub fn len(&self) -> Option<usize> {
        match &self.data {
            ValueData::Str(s) => Some(s.len()),
            ValueData::Bytes(b) => Some(b.len()),
            ValueData::Null if self.ty.kind.is_variable_length() => Some(0),
            _ => None,
        }
    }

    /// Value equality as seen by the data model: two NULLs are equal whatever
    /// their encoding.
    pub fn same_as(&self, other: &AttrValue) -> bool {
        if self.ty != other.ty {
            return false;
        }
        match (self.is_null(), other.is_null()) {
            (true, true) => true,
            (false, false) => self.data == other.data,
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data {
            ValueData::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Integer payload widened to `i64` (unsigned 64-bit values above
    /// `i64::MAX` are not representable and yield `None`).
    pub fn as_i64(&self) -> Option<i64> {
        if self.is_null() {
            return None;
        }
        match self.data {
            ValueData::I8(v) => Some(v.into()),
            ValueData::U8(v) => Some(v.into()),
            ValueData::I16(v) => Some(v.into()),
            ValueData::U16(v) => Some(v.into()),
            ValueData::I32(v) => Some(v.into()),
            ValueData::U32(v) => Some(v.into()),
            ValueData::I64(v) => Some(v),
            ValueData::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self.data {
            ValueData::F32(v) if !v.is_nan() => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            ValueData::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            ValueData::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "null");
        }
        match &self.data {
            ValueData::Null => write!(f, "null"),
            ValueData::Bool(v) => write!(f, "{}", v),
            ValueData::I8(v) => write!(f, "{}", v),
            ValueData::U8(v) => write!(f, "{}", v),
            ValueData::I16(v) => write!(f, "{}", v),
            ValueData::U16(v) => write!(f, "{}", v),
            ValueData::I32(v) => write!(f, "{}", v),
            ValueData::U32(v) => write!(f, "{}", v),
            ValueData::I64(v) => write!(f, "{}", v),
            ValueData::U64(v) => write!(f, "{}", v),
            ValueData::F32(v) => write!(f, "{}", v),
            ValueData::Str(s) => write!(f, "\"{}\"", s),
            ValueData::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Inclusive min/max pair attached to a numeric attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: AttrValue,
    pub max: AttrValue,
}

impl Bounds {
    pub fn new(min: AttrValue, max: AttrValue) -> Result<Self> {
        if min.kind() != max.kind() {
            return Err(DataModelError::TypeMismatch {
                expected: min.value_type(),
                actual: max.value_type(),
            });
        }
        if !min.kind().supports_bounds() {
            return Err(DataModelError::InvalidArgument(format!(
                "bounds are not allowed for {} values",
                min.kind()
            )));
        }
        if min.is_null() || max.is_null() {
            return Err(DataModelError::InvalidArgument(
                "bounds cannot be null".to_string(),
            ));
        }
        Ok(Self { min, max })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheck {
    Below,
    Within,
    Above,
    TypeMismatch,
}

fn order<T: PartialOrd>(value: &T, min: &T, max: &T) -> BoundsCheck {
    if value.partial_cmp(min) == Some(Ordering::Less) {
        BoundsCheck::Below
    } else if value.partial_cmp(max) == Some(Ordering::Greater) {
        BoundsCheck::Above
    } else {
        BoundsCheck::Within
    }
}

/// Place `value` relative to `bounds`. NULL is always within bounds.
pub fn compare(value: &AttrValue, bounds: &Bounds) -> BoundsCheck {
    if value.is_null() {
        return BoundsCheck::Within;
    }
    if value.kind() != bounds.min.kind() || value.kind() != bounds.max.kind() {
        return BoundsCheck::TypeMismatch;
    }
    use ValueData as D;
    match (&value.data, &bounds.min.data, &bounds.max.data) {
        (D::I8(v), D::I8(lo), D::I8(hi)) => order(v, lo, hi),
        (D::U8(v), D::U8(lo), D::U8(hi)) => order(v, lo, hi),
        (D::I16(v), D::I16(lo), D::I16(hi)) => order(v, lo, hi),
        (D::U16(v), D::U16(lo), D::U16(hi)) => order(v, lo, hi),
        (D::I32(v), D::I32(lo), D::I32(hi)) => order(v, lo, hi),
        (D::U32(v), D::U32(lo), D::U32(hi)) => order(v, lo, hi),
        (D::I64(v), D::I64(lo), D::I64(hi)) => order(v, lo, hi),
        (D::U64(v), D::U64(lo), D::U64(hi)) => order(v, lo, hi),
        (D::F32(v), D::F32(lo), D::F32(hi)) => order(v, lo, hi),
        _ => BoundsCheck::TypeMismatch,
    }
}

/// Snap `value` to the nearest bound when it lies outside `bounds`.
pub fn clamp_to_bounds(value: &mut AttrValue, bounds: &Bounds) -> Result<()> {
    match compare(value, bounds) {
        BoundsCheck::Within => Ok(()),
        BoundsCheck::Below => {
            value.data = bounds.min.data.clone();
            Ok(())
        }
        BoundsCheck::Above => {
            value.data = bounds.max.data.clone();
            Ok(())
        }
        BoundsCheck::TypeMismatch => Err(DataModelError::TypeMismatch {
            expected: value.value_type(),
            actual: bounds.min.value_type(),
        }),
    }
}
