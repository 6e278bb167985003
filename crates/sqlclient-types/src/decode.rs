//! Column value decoding.
//!
//! Every wire type code maps to one [`ValueFamily`] through an explicit
//! lookup table, and each family has one decode function. Payloads arrive
//! with their length prefix already stripped by the row reader, so NULL is
//! settled before a family decoder runs.

use bytes::Bytes;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use rust_decimal::Decimal;
use tds_protocol::codec::decode_utf16_lossy;
use tds_protocol::token::{ColMetaData, ColumnMetadata, RawRow};
use tds_protocol::types::{Framing, TypeId};
use uuid::Uuid;

use crate::charset::Charset;
use crate::error::TypeError;
use crate::value::TypedValue;

/// Default bound on large-value payloads.
pub const DEFAULT_MAX_TEXT_SIZE: usize = 4096;

/// Day number of 1900-01-01 counted from 0001-01-01 as day 1.
pub(crate) const DAYS_TO_1900: i32 = 693_596;

/// Decoder family for a wire type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueFamily {
    /// The NULL type; every value is NULL.
    Null,
    /// TINYINT, SMALLINT, INT, BIGINT and INTN.
    Integer,
    /// BIT and BITN.
    Bit,
    /// REAL, FLOAT and FLOATN.
    Float,
    /// MONEY, SMALLMONEY and MONEYN.
    Money,
    /// DECIMAL and NUMERIC.
    Decimal,
    /// Single-byte character data read through the collation's code page.
    AnsiText,
    /// UTF-16LE character data.
    UnicodeText,
    /// XML, UTF-16LE.
    Xml,
    /// Opaque bytes.
    Binary,
    /// DATE.
    Date,
    /// TIME(n).
    Time,
    /// DATETIME2(n).
    DateTime2,
    /// DATETIMEOFFSET(n).
    DateTimeOffset,
    /// DATETIME.
    DateTime,
    /// SMALLDATETIME.
    SmallDateTime,
    /// DATETIMN: DATETIME or SMALLDATETIME by payload width.
    DateTimeN,
    /// UNIQUEIDENTIFIER.
    Guid,
    /// Types whose framing is known but whose contents are not decoded
    /// (SQL_VARIANT, CLR UDT).
    Opaque,
    /// No decoder exists for the type code.
    Unrecognized,
}

impl ValueFamily {
    /// Look up the family for a raw type code.
    #[must_use]
    pub fn for_type_code(code: u8) -> Self {
        TypeId::from_u8(code).map_or(Self::Unrecognized, Self::for_type)
    }

    /// Look up the family for a known type.
    #[must_use]
    pub const fn for_type(type_id: TypeId) -> Self {
        match type_id {
            TypeId::Null => Self::Null,
            TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
                Self::Integer
            }
            TypeId::Bit | TypeId::BitN => Self::Bit,
            TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => Self::Float,
            TypeId::Money | TypeId::Money4 | TypeId::MoneyN => Self::Money,
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                Self::Decimal
            }
            TypeId::Char
            | TypeId::VarChar
            | TypeId::BigChar
            | TypeId::BigVarChar
            | TypeId::Text => Self::AnsiText,
            TypeId::NChar | TypeId::NVarChar | TypeId::NText => Self::UnicodeText,
            TypeId::Xml => Self::Xml,
            TypeId::Binary
            | TypeId::VarBinary
            | TypeId::BigBinary
            | TypeId::BigVarBinary
            | TypeId::Image => Self::Binary,
            TypeId::Date => Self::Date,
            TypeId::Time => Self::Time,
            TypeId::DateTime2 => Self::DateTime2,
            TypeId::DateTimeOffset => Self::DateTimeOffset,
            TypeId::DateTime => Self::DateTime,
            TypeId::DateTime4 => Self::SmallDateTime,
            TypeId::DateTimeN => Self::DateTimeN,
            TypeId::Guid => Self::Guid,
            TypeId::Variant | TypeId::Udt => Self::Opaque,
        }
    }

    /// Short name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Bit => "bit",
            Self::Float => "float",
            Self::Money => "money",
            Self::Decimal => "decimal",
            Self::AnsiText => "varchar",
            Self::UnicodeText => "nvarchar",
            Self::Xml => "xml",
            Self::Binary => "binary",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::DateTime => "datetime",
            Self::SmallDateTime => "smalldatetime",
            Self::DateTimeN => "datetimn",
            Self::Guid => "uniqueidentifier",
            Self::Opaque => "opaque",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// What to do with values whose type has no decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTypePolicy {
    /// Fail with [`TypeError::UnknownType`].
    #[default]
    Fail,
    /// Return the payload as [`TypedValue::Binary`].
    RawBytes,
}

/// Decoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Upper bound, in bytes, on large-value payloads.
    pub max_text_size: usize,
    /// Handling of undecodable types.
    pub unknown_type_policy: UnknownTypePolicy,
    /// Charset text values are delivered in.
    pub charset: Charset,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_text_size: DEFAULT_MAX_TEXT_SIZE,
            unknown_type_policy: UnknownTypePolicy::Fail,
            charset: Charset::UTF_8,
        }
    }
}

impl DecodeOptions {
    /// Set the large-value bound.
    #[must_use]
    pub fn max_text_size(mut self, size: usize) -> Self {
        self.max_text_size = size;
        self
    }

    /// Set the unknown-type policy.
    #[must_use]
    pub fn unknown_type_policy(mut self, policy: UnknownTypePolicy) -> Self {
        self.unknown_type_policy = policy;
        self
    }

    /// Set the output charset.
    #[must_use]
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }
}

/// Decode one column payload.
///
/// `raw` is the payload with its length prefix removed, or `None` when the
/// row carried the column's NULL sentinel.
pub fn decode_value(
    raw: Option<&Bytes>,
    column: &ColumnMetadata,
    options: &DecodeOptions,
) -> Result<TypedValue, TypeError> {
    let family = ValueFamily::for_type(column.type_id);
    let Some(raw) = raw else {
        return Ok(TypedValue::Null);
    };

    let large = matches!(column.framing(), Framing::Plp | Framing::TextPtr);
    let info = &column.type_info;
    let data = raw.as_ref();

    match family {
        ValueFamily::Null => Ok(TypedValue::Null),
        ValueFamily::Integer => decode_integer(data),
        ValueFamily::Bit => decode_bit(data),
        ValueFamily::Float => decode_float(data),
        ValueFamily::Money => decode_money(data),
        ValueFamily::Decimal => decode_decimal(data, info.scale),
        ValueFamily::AnsiText => {
            let data = bounded(data, large, options.max_text_size, 1);
            Ok(TypedValue::String(decode_ansi(data, column)))
        }
        ValueFamily::UnicodeText => {
            let data = bounded(data, large, options.max_text_size, 2);
            Ok(TypedValue::String(decode_utf16_lossy(data)))
        }
        ValueFamily::Xml => {
            let data = bounded(data, large, options.max_text_size, 2);
            Ok(TypedValue::Xml(decode_utf16_lossy(data)))
        }
        ValueFamily::Binary => {
            let len = if large {
                raw.len().min(options.max_text_size)
            } else {
                raw.len()
            };
            Ok(TypedValue::Binary(raw.slice(..len)))
        }
        ValueFamily::Date => decode_date(data).map(TypedValue::Date),
        ValueFamily::Time => decode_time(data, info.scale).map(TypedValue::Time),
        ValueFamily::DateTime2 => decode_datetime2(data, info.scale).map(TypedValue::DateTime),
        ValueFamily::DateTimeOffset => {
            decode_datetimeoffset(data, info.scale).map(TypedValue::DateTimeOffset)
        }
        ValueFamily::DateTime => decode_datetime(data).map(TypedValue::DateTime),
        ValueFamily::SmallDateTime => decode_smalldatetime(data).map(TypedValue::DateTime),
        ValueFamily::DateTimeN => match data.len() {
            4 => decode_smalldatetime(data).map(TypedValue::DateTime),
            _ => decode_datetime(data).map(TypedValue::DateTime),
        },
        ValueFamily::Guid => decode_guid(data).map(TypedValue::Uuid),
        ValueFamily::Opaque | ValueFamily::Unrecognized => match options.unknown_type_policy {
            UnknownTypePolicy::RawBytes if family == ValueFamily::Opaque => {
                Ok(TypedValue::Binary(raw.clone()))
            }
            _ => Err(TypeError::UnknownType {
                type_code: column.type_id as u8,
            }),
        },
    }
}

/// Decode every value of a raw row.
pub fn decode_row(
    row: &RawRow,
    metadata: &ColMetaData,
    options: &DecodeOptions,
) -> Result<Vec<TypedValue>, TypeError> {
    metadata
        .columns
        .iter()
        .zip(&row.values)
        .map(|(column, raw)| decode_value(raw.as_ref(), column, options))
        .collect()
}

fn bounded(data: &[u8], large: bool, max: usize, unit: usize) -> &[u8] {
    if !large || data.len() <= max {
        return data;
    }
    &data[..max - max % unit]
}

fn invalid_length(family: ValueFamily, length: usize) -> TypeError {
    TypeError::InvalidLength {
        type_name: family.name(),
        length,
    }
}

fn fixed<const N: usize>(data: &[u8], family: ValueFamily) -> Result<[u8; N], TypeError> {
    data.try_into()
        .map_err(|_| invalid_length(family, data.len()))
}

fn decode_integer(data: &[u8]) -> Result<TypedValue, TypeError> {
    Ok(match data.len() {
        1 => TypedValue::TinyInt(data[0]),
        2 => TypedValue::SmallInt(i16::from_le_bytes(fixed(data, ValueFamily::Integer)?)),
        4 => TypedValue::Int(i32::from_le_bytes(fixed(data, ValueFamily::Integer)?)),
        8 => TypedValue::BigInt(i64::from_le_bytes(fixed(data, ValueFamily::Integer)?)),
        len => return Err(invalid_length(ValueFamily::Integer, len)),
    })
}

fn decode_bit(data: &[u8]) -> Result<TypedValue, TypeError> {
    match data {
        [b] => Ok(TypedValue::Bool(*b != 0)),
        _ => Err(invalid_length(ValueFamily::Bit, data.len())),
    }
}

fn decode_float(data: &[u8]) -> Result<TypedValue, TypeError> {
    Ok(match data.len() {
        4 => TypedValue::Real(f32::from_le_bytes(fixed(data, ValueFamily::Float)?)),
        8 => TypedValue::Float(f64::from_le_bytes(fixed(data, ValueFamily::Float)?)),
        len => return Err(invalid_length(ValueFamily::Float, len)),
    })
}

fn decode_money(data: &[u8]) -> Result<TypedValue, TypeError> {
    let units = match data.len() {
        4 => i64::from(i32::from_le_bytes(fixed(data, ValueFamily::Money)?)),
        8 => {
            // high half first
            let high = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let low = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            (i64::from(high) << 32) | i64::from(low)
        }
        len => return Err(invalid_length(ValueFamily::Money, len)),
    };
    Ok(TypedValue::Decimal(Decimal::new(units, 4)))
}

fn decode_decimal(data: &[u8], scale: u8) -> Result<TypedValue, TypeError> {
    let Some((&sign, mantissa)) = data.split_first() else {
        return Err(invalid_length(ValueFamily::Decimal, 0));
    };
    if !matches!(mantissa.len(), 4 | 8 | 12 | 16) {
        return Err(invalid_length(ValueFamily::Decimal, data.len()));
    }

    let mut bytes = [0u8; 16];
    bytes[..mantissa.len()].copy_from_slice(mantissa);
    let mantissa = i128::try_from(u128::from_le_bytes(bytes))
        .map_err(|_| TypeError::InvalidDecimal("mantissa out of range".into()))?;
    let signed = if sign == 0 { -mantissa } else { mantissa };

    Ok(Decimal::try_from_i128_with_scale(signed, u32::from(scale)).map_or(
        TypedValue::Numeric {
            mantissa: signed,
            scale,
        },
        TypedValue::Decimal,
    ))
}

fn decode_ansi(data: &[u8], column: &ColumnMetadata) -> String {
    let encoding = column
        .type_info
        .collation
        .and_then(|collation| collation.encoding())
        .unwrap_or(encoding_rs::WINDOWS_1252);
    encoding.decode_without_bom_handling(data).0.into_owned()
}

pub(crate) fn date_from_days(days: i32, epoch: i32) -> Result<NaiveDate, TypeError> {
    days.checked_add(epoch)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("day {days} out of range")))
}

fn decode_date(data: &[u8]) -> Result<NaiveDate, TypeError> {
    let [a, b, c] = fixed::<3>(data, ValueFamily::Date)?;
    date_from_days(i32::from_le_bytes([a, b, c, 0]), 1)
}

fn decode_time(data: &[u8], scale: u8) -> Result<NaiveTime, TypeError> {
    if data.len() > 8 {
        return Err(invalid_length(ValueFamily::Time, data.len()));
    }
    let mut bytes = [0u8; 8];
    bytes[..data.len()].copy_from_slice(data);
    let intervals = u64::from_le_bytes(bytes);

    let nanos = intervals
        .checked_mul(10u64.pow(9 - u32::from(scale.min(7))))
        .ok_or_else(|| TypeError::InvalidDateTime("time out of range".into()))?;
    let secs = u32::try_from(nanos / 1_000_000_000)
        .map_err(|_| TypeError::InvalidDateTime("time out of range".into()))?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, (nanos % 1_000_000_000) as u32)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{intervals} intervals past midnight")))
}

fn split_time_date(data: &[u8], family: ValueFamily, trailer: usize) -> Result<(&[u8], &[u8]), TypeError> {
    if data.len() < 3 + trailer + 3 || data.len() > 3 + trailer + 5 {
        return Err(invalid_length(family, data.len()));
    }
    let time_len = data.len() - 3 - trailer;
    Ok((&data[..time_len], &data[time_len..]))
}

fn decode_datetime2(data: &[u8], scale: u8) -> Result<NaiveDateTime, TypeError> {
    let (time, date) = split_time_date(data, ValueFamily::DateTime2, 0)?;
    Ok(decode_date(date)?.and_time(decode_time(time, scale)?))
}

fn decode_datetimeoffset(data: &[u8], scale: u8) -> Result<DateTime<FixedOffset>, TypeError> {
    let (time, rest) = split_time_date(data, ValueFamily::DateTimeOffset, 2)?;
    let utc = decode_date(&rest[..3])?.and_time(decode_time(time, scale)?);
    let minutes = i16::from_le_bytes([rest[3], rest[4]]);
    let offset = FixedOffset::east_opt(i32::from(minutes) * 60)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("offset {minutes} minutes")))?;
    Ok(offset.from_utc_datetime(&utc))
}

fn decode_datetime(data: &[u8]) -> Result<NaiveDateTime, TypeError> {
    let bytes = fixed::<8>(data, ValueFamily::DateTime)?;
    let days = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let ticks = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

    // 1/300 s ticks, rounded to the millisecond
    let millis = (u64::from(ticks) * 10 + 1) / 3;
    let secs = u32::try_from(millis / 1000)
        .map_err(|_| TypeError::InvalidDateTime("datetime ticks out of range".into()))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, (millis % 1000) as u32 * 1_000_000)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{ticks} ticks past midnight")))?;
    Ok(date_from_days(days, DAYS_TO_1900)?.and_time(time))
}

fn decode_smalldatetime(data: &[u8]) -> Result<NaiveDateTime, TypeError> {
    let [a, b, c, d] = fixed::<4>(data, ValueFamily::SmallDateTime)?;
    let days = u16::from_le_bytes([a, b]);
    let minutes = u16::from_le_bytes([c, d]);
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("{minutes} minutes past midnight")))?;
    Ok(date_from_days(i32::from(days), DAYS_TO_1900)?.and_time(time))
}

/// Swap between the wire GUID layout and RFC 4122 byte order.
///
/// The first three groups are little-endian on the wire; the last eight
/// bytes are kept as-is. Applying it twice yields the input.
#[must_use]
pub fn reorder_guid(bytes: [u8; 16]) -> [u8; 16] {
    let mut out = bytes;
    out[..4].reverse();
    out[4..6].reverse();
    out[6..8].reverse();
    out
}

fn decode_guid(data: &[u8]) -> Result<Uuid, TypeError> {
    let bytes = fixed::<16>(data, ValueFamily::Guid)?;
    Ok(Uuid::from_bytes(reorder_guid(bytes)))
}

/// Whole seconds and fractional intervals at `scale`, as stored in TIME.
pub(crate) fn time_intervals(time: NaiveTime, scale: u8) -> u64 {
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(time.nanosecond().min(999_999_999));
    nanos / 10u64.pow(9 - u32::from(scale.min(7)))
}

/// Days since 0001-01-01.
pub(crate) fn days_since_ce(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - 1
}
