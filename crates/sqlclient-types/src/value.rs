//! Decoded column values.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::hint::BinaryHint;

/// A decoded column value.
///
/// The variant always agrees with the owning column's declared type, and
/// every column type can produce [`TypedValue::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypedValue {
    /// NULL value.
    #[default]
    Null,
    /// BIT.
    Bool(bool),
    /// TINYINT.
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Real(f32),
    /// FLOAT.
    Float(f64),
    /// DECIMAL, NUMERIC, MONEY and SMALLMONEY.
    Decimal(Decimal),
    /// DECIMAL or NUMERIC outside the range of [`Decimal`].
    ///
    /// Holds the exact value `mantissa * 10^-scale`; produced when the
    /// column scale exceeds 28 or the digits do not fit 96 bits.
    Numeric {
        /// Signed unscaled digits.
        mantissa: i128,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Character data of any width, as Unicode.
    String(String),
    /// XML, as Unicode.
    Xml(String),
    /// BINARY, VARBINARY and IMAGE.
    Binary(Bytes),
    /// DATE.
    Date(NaiveDate),
    /// TIME.
    Time(NaiveTime),
    /// DATETIME, SMALLDATETIME and DATETIME2.
    DateTime(NaiveDateTime),
    /// DATETIMEOFFSET.
    DateTimeOffset(DateTime<FixedOffset>),
    /// UNIQUEIDENTIFIER.
    Uuid(Uuid),
}

impl TypedValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as a bool, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an i32, widening smaller integers.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::SmallInt(v) => Some(i32::from(*v)),
            Self::TinyInt(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    /// Get the value as an i64, widening smaller integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            _ => self.as_i32().map(i64::from),
        }
    }

    /// Get the value as an f64, widening REAL.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Real(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a decimal.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    /// Get an exact decimal as `(mantissa, scale)`, for either decimal form.
    #[must_use]
    pub fn as_numeric(&self) -> Option<(i128, u8)> {
        match self {
            Self::Decimal(v) => Some((v.mantissa(), u8::try_from(v.scale()).ok()?)),
            Self::Numeric { mantissa, scale } => Some((*mantissa, *scale)),
            _ => None,
        }
    }

    /// Render an exact decimal in plain notation, keeping every scale digit.
    #[must_use]
    pub fn numeric_string(&self) -> Option<String> {
        let (mantissa, scale) = self.as_numeric()?;
        let scale = usize::from(scale);
        let digits = format!("{:0>width$}", mantissa.unsigned_abs(), width = scale + 1);
        let (whole, fraction) = digits.split_at(digits.len() - scale);
        let sign = if mantissa < 0 { "-" } else { "" };
        Some(if fraction.is_empty() {
            format!("{sign}{whole}")
        } else {
            format!("{sign}{whole}.{fraction}")
        })
    }

    /// Get the value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Xml(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as bytes, if it is binary.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as a UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a date.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a timezone-naive timestamp.
    #[must_use]
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Guess the file format of a binary value from its leading bytes.
    #[must_use]
    pub fn binary_hint(&self) -> Option<BinaryHint> {
        self.as_bytes().and_then(BinaryHint::detect)
    }

    /// Get the type name as a string.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::TinyInt(_) => "TINYINT",
            Self::SmallInt(_) => "SMALLINT",
            Self::Int(_) => "INT",
            Self::BigInt(_) => "BIGINT",
            Self::Real(_) => "REAL",
            Self::Float(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::Numeric { .. } => "NUMERIC",
            Self::String(_) => "NVARCHAR",
            Self::Xml(_) => "XML",
            Self::Binary(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeOffset(_) => "DATETIMEOFFSET",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
        }
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Decimal> for TypedValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<Uuid> for TypedValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T> From<Option<T>> for TypedValue
where
    T: Into<TypedValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening() {
        assert_eq!(TypedValue::TinyInt(200).as_i64(), Some(200));
        assert_eq!(TypedValue::SmallInt(-5).as_i32(), Some(-5));
        assert_eq!(TypedValue::BigInt(1).as_i32(), None);
    }

    #[test]
    fn test_option_into_null() {
        assert!(TypedValue::from(None::<i32>).is_null());
        assert_eq!(TypedValue::from(Some("x")), TypedValue::String("x".into()));
    }

    #[test]
    fn test_binary_hint_on_value() {
        let png = TypedValue::Binary(Bytes::from_static(b"\x89PNG\r\n\x1a\nrest"));
        assert_eq!(png.binary_hint(), Some(BinaryHint::Png));
        assert_eq!(TypedValue::Int(1).binary_hint(), None);
    }

    #[test]
    fn test_numeric_string_keeps_scale() {
        let one = TypedValue::Numeric {
            mantissa: 10i128.pow(30),
            scale: 30,
        };
        assert_eq!(
            one.numeric_string().unwrap(),
            "1.000000000000000000000000000000"
        );
        let small = TypedValue::Numeric {
            mantissa: -5,
            scale: 30,
        };
        assert_eq!(
            small.numeric_string().unwrap(),
            "-0.000000000000000000000000000005"
        );
        let decimal = TypedValue::Decimal(Decimal::new(-12_345, 2));
        assert_eq!(decimal.numeric_string().unwrap(), "-123.45");
        assert_eq!(decimal.as_numeric(), Some((-12_345, 2)));
        assert_eq!(TypedValue::Int(1).numeric_string(), None);
    }
}
