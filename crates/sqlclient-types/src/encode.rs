//! Writing typed values back into row payloads.
//!
//! The inverse of [`crate::decode`]: produces the length-stripped payload a
//! [`RawRow`] carries for a column. Used to script server responses.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use tds_protocol::token::{ColMetaData, ColumnMetadata, RawRow, time_len};
use tds_protocol::types::TypeId;

use crate::decode::{DAYS_TO_1900, ValueFamily, days_since_ce, reorder_guid, time_intervals};
use crate::error::TypeError;
use crate::value::TypedValue;

/// Encode one value for `column`. NULL yields `None`.
pub fn encode_value(value: &TypedValue, column: &ColumnMetadata) -> Result<Option<Bytes>, TypeError> {
    if value.is_null() {
        return Ok(None);
    }

    let family = ValueFamily::for_type(column.type_id);
    let mismatch = || TypeError::TypeMismatch {
        value: value.type_name(),
        column: family.name(),
    };
    let width = column
        .type_id
        .fixed_size()
        .unwrap_or(column.type_info.max_length as usize);
    let scale = column.type_info.scale;
    let mut out = BytesMut::new();

    match (family, value) {
        (ValueFamily::Integer, _) => {
            let v = value.as_i64().ok_or_else(mismatch)?;
            match width {
                1 => out.put_u8(u8::try_from(v).map_err(|_| mismatch())?),
                2 => out.put_i16_le(i16::try_from(v).map_err(|_| mismatch())?),
                4 => out.put_i32_le(i32::try_from(v).map_err(|_| mismatch())?),
                _ => out.put_i64_le(v),
            }
        }
        (ValueFamily::Bit, TypedValue::Bool(v)) => out.put_u8(u8::from(*v)),
        (ValueFamily::Float, _) => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            if width == 4 {
                out.put_f32_le(v as f32);
            } else {
                out.put_f64_le(v);
            }
        }
        (ValueFamily::Money, TypedValue::Decimal(v)) => {
            let units = i64::try_from(rescaled(*v, 4)).map_err(|_| mismatch())?;
            if width == 4 {
                out.put_i32_le(i32::try_from(units).map_err(|_| mismatch())?);
            } else {
                out.put_i32_le((units >> 32) as i32);
                out.put_u32_le(units as u32);
            }
        }
        (ValueFamily::Decimal, TypedValue::Decimal(v)) => {
            put_decimal(&mut out, rescaled(*v, u32::from(scale)), column.type_info.precision);
        }
        (ValueFamily::Decimal, TypedValue::Numeric { mantissa, scale: digits }) => {
            let mantissa = scale
                .checked_sub(*digits)
                .and_then(|shift| 10i128.checked_pow(u32::from(shift)))
                .and_then(|factor| mantissa.checked_mul(factor))
                .ok_or_else(mismatch)?;
            put_decimal(&mut out, mantissa, column.type_info.precision);
        }
        (ValueFamily::AnsiText, TypedValue::String(v)) => {
            let encoding = column
                .type_info
                .collation
                .and_then(|collation| collation.encoding())
                .unwrap_or(encoding_rs::WINDOWS_1252);
            out.put_slice(&encoding.encode(v).0);
        }
        (ValueFamily::UnicodeText, TypedValue::String(v)) | (ValueFamily::Xml, TypedValue::Xml(v)) => {
            v.encode_utf16().for_each(|unit| out.put_u16_le(unit));
        }
        (ValueFamily::Binary | ValueFamily::Opaque, TypedValue::Binary(v)) => {
            return Ok(Some(v.clone()));
        }
        (ValueFamily::Date, TypedValue::Date(v)) => put_date(&mut out, *v),
        (ValueFamily::Time, TypedValue::Time(v)) => put_time(&mut out, *v, scale),
        (ValueFamily::DateTime2, TypedValue::DateTime(v)) => {
            put_time(&mut out, v.time(), scale);
            put_date(&mut out, v.date());
        }
        (ValueFamily::DateTimeOffset, TypedValue::DateTimeOffset(v)) => {
            let utc = v.naive_utc();
            put_time(&mut out, utc.time(), scale);
            put_date(&mut out, utc.date());
            out.put_i16_le((v.offset().local_minus_utc() / 60) as i16);
        }
        (ValueFamily::DateTime, TypedValue::DateTime(v)) => put_datetime(&mut out, *v)?,
        (ValueFamily::SmallDateTime, TypedValue::DateTime(v)) => put_smalldatetime(&mut out, *v)?,
        (ValueFamily::DateTimeN, TypedValue::DateTime(v)) => {
            if width == 4 {
                put_smalldatetime(&mut out, *v)?;
            } else {
                put_datetime(&mut out, *v)?;
            }
        }
        (ValueFamily::Guid, TypedValue::Uuid(v)) => out.put_slice(&reorder_guid(*v.as_bytes())),
        _ => return Err(mismatch()),
    }

    Ok(Some(out.freeze()))
}

/// Encode a full row against its metadata.
pub fn encode_row(values: &[TypedValue], metadata: &ColMetaData) -> Result<RawRow, TypeError> {
    let values = metadata
        .columns
        .iter()
        .zip(values)
        .map(|(column, value)| encode_value(value, column))
        .collect::<Result<_, _>>()?;
    Ok(RawRow::new(values))
}

/// Metadata for a column able to hold `value`, used when scripting results.
#[must_use]
pub fn column_for(name: &str, value: &TypedValue) -> ColumnMetadata {
    use tds_protocol::collation::Collation;
    use tds_protocol::token::TypeInfo;
    use tds_protocol::types::MAX_LENGTH_PLP;

    let (type_id, info) = match value {
        TypedValue::Null | TypedValue::String(_) => (
            TypeId::NVarChar,
            TypeInfo::text(MAX_LENGTH_PLP, Collation::LATIN1_GENERAL),
        ),
        TypedValue::Bool(_) => (TypeId::BitN, TypeInfo::with_length(1)),
        TypedValue::TinyInt(_) => (TypeId::IntN, TypeInfo::with_length(1)),
        TypedValue::SmallInt(_) => (TypeId::IntN, TypeInfo::with_length(2)),
        TypedValue::Int(_) => (TypeId::IntN, TypeInfo::with_length(4)),
        TypedValue::BigInt(_) => (TypeId::IntN, TypeInfo::with_length(8)),
        TypedValue::Real(_) => (TypeId::FloatN, TypeInfo::with_length(4)),
        TypedValue::Float(_) => (TypeId::FloatN, TypeInfo::with_length(8)),
        TypedValue::Decimal(d) => (TypeId::DecimalN, TypeInfo::decimal(38, d.scale() as u8)),
        TypedValue::Numeric { scale, .. } => (TypeId::DecimalN, TypeInfo::decimal(38, *scale)),
        TypedValue::Xml(_) => (TypeId::Xml, TypeInfo::with_length(0)),
        TypedValue::Binary(_) => (TypeId::BigVarBinary, TypeInfo::with_length(MAX_LENGTH_PLP)),
        TypedValue::Date(_) => (TypeId::Date, TypeInfo::with_length(3)),
        TypedValue::Time(_) => (TypeId::Time, TypeInfo::scaled(7)),
        TypedValue::DateTime(_) => (TypeId::DateTime2, TypeInfo::scaled(7)),
        TypedValue::DateTimeOffset(_) => (TypeId::DateTimeOffset, TypeInfo::scaled(7)),
        TypedValue::Uuid(_) => (TypeId::Guid, TypeInfo::with_length(16)),
    };
    ColumnMetadata::new(name, type_id, info)
}

fn rescaled(mut value: Decimal, scale: u32) -> i128 {
    value.rescale(scale);
    value.mantissa()
}

fn put_decimal(out: &mut BytesMut, mantissa: i128, precision: u8) {
    out.put_u8(u8::from(mantissa >= 0));
    let bytes = mantissa.unsigned_abs().to_le_bytes();
    out.put_slice(&bytes[..decimal_mantissa_len(precision)]);
}

fn decimal_mantissa_len(precision: u8) -> usize {
    match precision {
        0..=9 => 4,
        10..=19 => 8,
        20..=28 => 12,
        _ => 16,
    }
}

fn put_date(out: &mut BytesMut, date: NaiveDate) {
    out.put_slice(&days_since_ce(date).to_le_bytes()[..3]);
}

fn put_time(out: &mut BytesMut, time: NaiveTime, scale: u8) {
    let intervals = time_intervals(time, scale);
    out.put_slice(&intervals.to_le_bytes()[..time_len(scale)]);
}

fn days_since_1900(value: NaiveDateTime) -> i32 {
    days_since_ce(value.date()) + 1 - DAYS_TO_1900
}

fn put_datetime(out: &mut BytesMut, value: NaiveDateTime) -> Result<(), TypeError> {
    let millis = u64::from(value.num_seconds_from_midnight()) * 1000
        + u64::from(value.nanosecond().min(999_999_999)) / 1_000_000;
    // nearest 1/300 s tick
    let ticks = (millis * 3 + 5) / 10;
    out.put_i32_le(days_since_1900(value));
    out.put_u32_le(
        u32::try_from(ticks).map_err(|_| TypeError::InvalidDateTime(value.to_string()))?,
    );
    Ok(())
}

fn put_smalldatetime(out: &mut BytesMut, value: NaiveDateTime) -> Result<(), TypeError> {
    let days = u16::try_from(days_since_1900(value))
        .map_err(|_| TypeError::InvalidDateTime(value.to_string()))?;
    out.put_u16_le(days);
    out.put_u16_le((value.num_seconds_from_midnight() / 60) as u16);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::token::TypeInfo;

    #[test]
    fn test_encode_null_is_none() {
        let column = ColumnMetadata::new("a", TypeId::IntN, TypeInfo::with_length(4));
        assert_eq!(encode_value(&TypedValue::Null, &column).unwrap(), None);
    }

    #[test]
    fn test_encode_int_width_follows_column() {
        let column = ColumnMetadata::new("a", TypeId::IntN, TypeInfo::with_length(2));
        assert_eq!(
            encode_value(&TypedValue::Int(-2), &column).unwrap().unwrap().as_ref(),
            &[0xFE, 0xFF]
        );
        assert!(encode_value(&TypedValue::Int(70_000), &column).is_err());
    }

    #[test]
    fn test_encode_mismatch() {
        let column = ColumnMetadata::new("a", TypeId::Guid, TypeInfo::with_length(16));
        assert_eq!(
            encode_value(&TypedValue::Bool(true), &column).unwrap_err(),
            TypeError::TypeMismatch {
                value: "BIT",
                column: "uniqueidentifier"
            }
        );
    }

    #[test]
    fn test_encode_decimal_layout() {
        let column = ColumnMetadata::new("a", TypeId::DecimalN, TypeInfo::decimal(10, 2));
        let value = TypedValue::Decimal(Decimal::new(-12_345, 2));
        let raw = encode_value(&value, &column).unwrap().unwrap();
        assert_eq!(raw.len(), 9);
        assert_eq!(raw[0], 0);
        assert_eq!(&raw[1..5], &12_345u32.to_le_bytes());
    }

    #[test]
    fn test_encode_wide_numeric() {
        let value = TypedValue::Numeric {
            mantissa: -(10i128.pow(30)),
            scale: 30,
        };
        let column = column_for("n", &value);
        assert_eq!(column.type_info.precision, 38);
        assert_eq!(column.type_info.scale, 30);
        let raw = encode_value(&value, &column).unwrap().unwrap();
        assert_eq!(raw.len(), 17);
        assert_eq!(raw[0], 0);
        assert_eq!(&raw[1..], &10u128.pow(30).to_le_bytes());

        let narrower = ColumnMetadata::new("n", TypeId::DecimalN, TypeInfo::decimal(38, 10));
        assert!(encode_value(&value, &narrower).is_err());
    }

    #[test]
    fn test_column_for_int() {
        let column = column_for("n", &TypedValue::Int(1));
        assert_eq!(column.type_id, TypeId::IntN);
        assert_eq!(column.type_info.max_length, 4);
    }
}
