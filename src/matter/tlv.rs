//! Report and write containers exchanged with the protocol provider.
//!
//! Element encoding is rs-matter's; this module only knows where the value
//! sits inside each container and how to map it onto an [`AttrValue`].
//!
//! ## Containers
//!
//! Read report, as produced by the provider's read path:
//!
//! ```text
//! Array(anon) {
//!   Struct(anon) {                     // AttributeReportIB
//!     Struct(ctx 1) {                  // AttributeDataIB
//!       ctx 0: data version (u32)
//!       ctx 1: List { ctx 2: endpoint, ctx 3: cluster, ctx 4: attribute }
//!       ctx 2: value
//!     }
//!   }
//! }
//! ```
//!
//! Write request, as consumed by the provider's write path:
//!
//! ```text
//! Struct(anon) { ctx 1: value }
//! ```

use rs_matter::error::{Error, ErrorCode};
use rs_matter::tlv::{TLVElement, TLVTag, TLVWrite};
use rs_matter::utils::storage::WriteBuf;

use crate::error::{DataModelError, Result};
use crate::matter::attribute::AttributePath;
use crate::matter::value::{AttrValue, ValueData, ValueKind, ValueType};

/// Context tags of the report and write containers.
pub mod tags {
    /// AttributeReportIB: AttributeDataIB field
    pub const REPORT_ATTRIBUTE_DATA: u8 = 1;
    /// AttributeDataIB fields
    pub const DATA_VERSION: u8 = 0;
    pub const PATH: u8 = 1;
    pub const DATA: u8 = 2;
    /// AttributePathIB fields
    pub const PATH_ENDPOINT: u8 = 2;
    pub const PATH_CLUSTER: u8 = 3;
    pub const PATH_ATTRIBUTE: u8 = 4;
    /// Write request value field
    pub const WRITE_DATA: u8 = 1;
}

fn malformed(what: &str) -> DataModelError {
    DataModelError::Failed(format!("malformed TLV: {}", what))
}

fn read_error(e: Error) -> DataModelError {
    malformed(&format!("{:?}", e))
}

fn write_error(e: Error) -> DataModelError {
    if matches!(e.code(), ErrorCode::NoSpace) {
        DataModelError::NoMemory("TLV buffer too small".to_string())
    } else {
        DataModelError::Failed(format!("TLV encoding failed: {:?}", e))
    }
}

/// Encode into a buffer of `limit` bytes and return the written part.
fn encode<F>(value: &AttrValue, limit: usize, build: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut WriteBuf<'_>) -> core::result::Result<(), Error>,
{
    if value.kind() == ValueKind::Array {
        return Err(DataModelError::NotSupported(
            "array values cannot be encoded as a single TLV element".to_string(),
        ));
    }
    let mut buf = vec![0u8; limit];
    let mut wb = WriteBuf::new(&mut buf);
    build(&mut wb).map_err(write_error)?;
    Ok(wb.as_slice().to_vec())
}

fn write_value<W: TLVWrite>(
    tw: &mut W,
    tag: &TLVTag,
    value: &AttrValue,
) -> core::result::Result<(), Error> {
    if value.is_null() {
        return tw.null(tag);
    }
    match value.data() {
        ValueData::Null => tw.null(tag),
        ValueData::Bool(v) => tw.bool(tag, *v),
        ValueData::I8(v) => tw.i8(tag, *v),
        ValueData::I16(v) => tw.i16(tag, *v),
        ValueData::I32(v) => tw.i32(tag, *v),
        ValueData::I64(v) => tw.i64(tag, *v),
        ValueData::U8(v) => tw.u8(tag, *v),
        ValueData::U16(v) => tw.u16(tag, *v),
        ValueData::U32(v) => tw.u32(tag, *v),
        ValueData::U64(v) => tw.u64(tag, *v),
        ValueData::F32(v) => tw.f32(tag, *v),
        ValueData::Str(s) => tw.utf8(tag, s),
        ValueData::Bytes(b) => tw.str(tag, b),
    }
}

fn narrow<T, V>(wide: V, ty: ValueType) -> Result<T>
where
    T: TryFrom<V>,
    V: Copy + std::fmt::Display,
{
    T::try_from(wide).map_err(|_| malformed(&format!("{} does not fit {}", wide, ty)))
}

/// Convert a decoded element into a value of the attribute's type.
pub fn element_to_value(element: &TLVElement<'_>, ty: ValueType) -> Result<AttrValue> {
    if element.null().is_ok() {
        return AttrValue::null(ty);
    }
    let signed = || element.i64().map_err(read_error);
    let unsigned = || element.u64().map_err(read_error);
    let data = match ty.kind {
        ValueKind::Boolean => ValueData::Bool(element.bool().map_err(read_error)?),
        ValueKind::Int8 => ValueData::I8(narrow(signed()?, ty)?),
        ValueKind::Int16 => ValueData::I16(narrow(signed()?, ty)?),
        ValueKind::Int32 => ValueData::I32(narrow(signed()?, ty)?),
        ValueKind::Int64 => ValueData::I64(signed()?),
        ValueKind::UInt8 | ValueKind::Enum8 | ValueKind::Bitmap8 => {
            ValueData::U8(narrow(unsigned()?, ty)?)
        }
        ValueKind::UInt16 | ValueKind::Enum16 | ValueKind::Bitmap16 => {
            ValueData::U16(narrow(unsigned()?, ty)?)
        }
        ValueKind::UInt32 | ValueKind::Bitmap32 => {
            ValueData::U32(narrow(unsigned()?, ty)?)
        }
        ValueKind::UInt64 => ValueData::U64(unsigned()?),
        ValueKind::Float => ValueData::F32(element.f32().map_err(read_error)?),
        ValueKind::CharString | ValueKind::LongCharString => {
            ValueData::Str(element.utf8().map_err(read_error)?.to_string())
        }
        ValueKind::OctetString | ValueKind::LongOctetString => {
            ValueData::Bytes(element.str().map_err(read_error)?.to_vec())
        }
        ValueKind::Array => {
            return Err(DataModelError::NotSupported(
                "array values cannot be decoded from a single TLV element".to_string(),
            ));
        }
    };
    AttrValue::new(ty, data)
}

/// Build the read report container for one attribute value.
pub fn encode_attribute_report(
    path: &AttributePath,
    data_version: u32,
    value: &AttrValue,
    limit: usize,
) -> Result<Vec<u8>> {
    encode(value, limit, |tw| {
        tw.start_array(&TLVTag::Anonymous)?;
        tw.start_struct(&TLVTag::Anonymous)?;
        tw.start_struct(&TLVTag::Context(tags::REPORT_ATTRIBUTE_DATA))?;
        tw.u32(&TLVTag::Context(tags::DATA_VERSION), data_version)?;
        tw.start_list(&TLVTag::Context(tags::PATH))?;
        tw.u16(&TLVTag::Context(tags::PATH_ENDPOINT), path.endpoint_id)?;
        tw.u32(&TLVTag::Context(tags::PATH_CLUSTER), path.cluster_id)?;
        tw.u32(&TLVTag::Context(tags::PATH_ATTRIBUTE), path.attribute_id)?;
        tw.end_container()?;
        write_value(tw, &TLVTag::Context(tags::DATA), value)?;
        tw.end_container()?;
        tw.end_container()?;
        tw.end_container()
    })
}

/// Extract the value from a read report container.
pub fn decode_attribute_report(bytes: &[u8], ty: ValueType) -> Result<AttrValue> {
    let reports = TLVElement::new(bytes).array().map_err(read_error)?;
    let report = reports
        .iter()
        .next()
        .ok_or_else(|| malformed("empty attribute report"))?
        .map_err(read_error)?;

    let mut seq = report.structure().map_err(read_error)?;
    let data = seq
        .scan_ctx(tags::REPORT_ATTRIBUTE_DATA)
        .map_err(read_error)?;
    let mut seq = data.structure().map_err(read_error)?;
    let value = seq.scan_ctx(tags::DATA).map_err(read_error)?;
    element_to_value(&value, ty)
}

/// Build the write request container for one attribute value.
pub fn encode_write_payload(value: &AttrValue, limit: usize) -> Result<Vec<u8>> {
    encode(value, limit, |tw| {
        tw.start_struct(&TLVTag::Anonymous)?;
        write_value(tw, &TLVTag::Context(tags::WRITE_DATA), value)?;
        tw.end_container()
    })
}

/// Extract the value from a write request container.
pub fn decode_write_payload(bytes: &[u8], ty: ValueType) -> Result<AttrValue> {
    let mut seq = TLVElement::new(bytes).structure().map_err(read_error)?;
    let value = seq.scan_ctx(tags::WRITE_DATA).map_err(read_error)?;
    element_to_value(&value, ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const LIMIT: usize = 512;

    fn path() -> AttributePath {
        AttributePath::new(1, 0x0006, 0x0000)
    }

    fn build<F>(f: F) -> Vec<u8>
    where
        F: FnOnce(&mut WriteBuf<'_>) -> core::result::Result<(), Error>,
    {
        let mut buf = vec![0u8; LIMIT];
        let mut wb = WriteBuf::new(&mut buf);
        f(&mut wb).unwrap();
        wb.as_slice().to_vec()
    }

    #[test]
    fn test_write_payload_layout() {
        let bytes = encode_write_payload(&AttrValue::boolean(true), LIMIT).unwrap();
        // Struct(anon), ctx1 true, end
        assert_eq!(bytes, vec![0x15, 0x29, 0x01, 0x18]);
    }

    #[test]
    fn test_report_carries_value() {
        let value = AttrValue::nullable_uint8(Some(42));
        let bytes = encode_attribute_report(&path(), 0xDEADBEEF, &value, LIMIT).unwrap();
        let decoded = decode_attribute_report(&bytes, value.value_type()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_report_null_and_strings() {
        let ty = ValueType::nullable(ValueKind::Int16);
        let bytes =
            encode_attribute_report(&path(), 1, &AttrValue::nullable_int16(None), LIMIT).unwrap();
        assert!(decode_attribute_report(&bytes, ty).unwrap().is_null());

        let value = AttrValue::long_char_str(&"x".repeat(300));
        let bytes = encode_attribute_report(&path(), 1, &value, LIMIT).unwrap();
        assert_eq!(decode_attribute_report(&bytes, value.value_type()).unwrap(), value);

        let value = AttrValue::octet_str(&[0xDE, 0xAD]);
        let bytes = encode_write_payload(&value, LIMIT).unwrap();
        assert_eq!(decode_write_payload(&bytes, value.value_type()).unwrap(), value);
    }

    #[test]
    fn test_report_without_data_field_fails() {
        let bytes = build(|tw| {
            tw.start_array(&TLVTag::Anonymous)?;
            tw.start_struct(&TLVTag::Anonymous)?;
            tw.start_struct(&TLVTag::Context(tags::REPORT_ATTRIBUTE_DATA))?;
            tw.u32(&TLVTag::Context(tags::DATA_VERSION), 7)?;
            tw.end_container()?;
            tw.end_container()?;
            tw.end_container()
        });
        let err = decode_attribute_report(&bytes, ValueType::new(ValueKind::UInt8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_decode_rejects_out_of_range_value() {
        let bytes = encode_write_payload(&AttrValue::uint16(300), LIMIT).unwrap();
        assert!(decode_write_payload(&bytes, ValueType::new(ValueKind::UInt8)).is_err());
        let decoded = decode_write_payload(&bytes, ValueType::new(ValueKind::Enum16)).unwrap();
        assert_eq!(decoded.as_i64(), Some(300));
    }

    #[test]
    fn test_decode_rejects_wrong_element_type() {
        let bytes = encode_write_payload(&AttrValue::char_str("on"), LIMIT).unwrap();
        let err = decode_write_payload(&bytes, ValueType::new(ValueKind::Boolean)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_buffer_limit() {
        let value = AttrValue::char_str(&"y".repeat(40));
        let err = encode_write_payload(&value, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);
    }

    #[test]
    fn test_arrays_not_supported() {
        let err = encode_write_payload(&AttrValue::array(vec![1, 2]), LIMIT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_value_after_nested_container() {
        let bytes = build(|tw| {
            tw.start_struct(&TLVTag::Anonymous)?;
            tw.start_list(&TLVTag::Context(0))?;
            tw.start_array(&TLVTag::Context(1))?;
            tw.bool(&TLVTag::Anonymous, true)?;
            tw.end_container()?;
            tw.end_container()?;
            tw.f32(&TLVTag::Context(tags::WRITE_DATA), 2.5)?;
            tw.end_container()
        });

        let decoded = decode_write_payload(&bytes, ValueType::new(ValueKind::Float)).unwrap();
        assert_eq!(decoded.as_f32(), Some(2.5));
    }
}
