//! Column type codes as they appear in COLMETADATA.
//!
//! Each code maps to a [`Framing`], which tells the row reader how a value
//! of that type is delimited on the wire. Decoding the bytes into a typed
//! value is left to the consumer.

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// Nullable datetime (4 or 8 bytes).
    DateTimeN = 0x6F,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,
    /// Uniqueidentifier.
    Guid = 0x24,
    /// Nullable integer (1, 2, 4 or 8 bytes).
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float (4 or 8 bytes).
    FloatN = 0x6D,
    /// Nullable money (4 or 8 bytes).
    MoneyN = 0x6E,
    /// Legacy fixed-length character.
    Char = 0x2F,
    /// Legacy variable-length character.
    VarChar = 0x27,
    /// Legacy fixed-length binary.
    Binary = 0x2D,
    /// Legacy variable-length binary.
    VarBinary = 0x25,
    /// Variable-length character.
    BigVarChar = 0xA7,
    /// Variable-length binary.
    BigVarBinary = 0xA5,
    /// Fixed-length character.
    BigChar = 0xAF,
    /// Fixed-length binary.
    BigBinary = 0xAD,
    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,
    /// Text.
    Text = 0x23,
    /// Image.
    Image = 0x22,
    /// NText.
    NText = 0x63,
    /// Date (3 bytes).
    Date = 0x28,
    /// Time with fractional-second scale.
    Time = 0x29,
    /// DateTime2 with fractional-second scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with fractional-second scale.
    DateTimeOffset = 0x2B,
    /// SQL Variant.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
}

/// How a value of a given type is delimited inside a ROW token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Fixed number of bytes, never NULL.
    Fixed(usize),
    /// One-byte length prefix. Zero means NULL.
    ByteLen,
    /// One-byte length prefix. `0xFF` means NULL, zero is an empty value.
    LegacyByteLen,
    /// Two-byte length prefix. `0xFFFF` means NULL.
    UShortLen,
    /// Partially length-prefixed chunks.
    Plp,
    /// Text pointer followed by a four-byte length.
    TextPtr,
    /// Four-byte length prefix. Zero means NULL.
    LongLen,
}

/// Length value marking a `(max)` column, whose values use PLP framing.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

impl TypeId {
    /// Create a type ID from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x6F => Self::DateTimeN,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            _ => return None,
        })
    }

    /// Fixed size in bytes for types without a length prefix.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Value framing for a column of this type with the declared max length.
    #[must_use]
    pub const fn framing(self, max_length: u32) -> Framing {
        if let Some(size) = self.fixed_size() {
            return Framing::Fixed(size);
        }
        match self {
            Self::Char | Self::VarChar | Self::Binary | Self::VarBinary => Framing::LegacyByteLen,
            Self::BigVarChar
            | Self::BigVarBinary
            | Self::BigChar
            | Self::BigBinary
            | Self::NChar
            | Self::NVarChar => {
                if max_length == MAX_LENGTH_PLP {
                    Framing::Plp
                } else {
                    Framing::UShortLen
                }
            }
            Self::Xml | Self::Udt => Framing::Plp,
            Self::Text | Self::NText | Self::Image => Framing::TextPtr,
            Self::Variant => Framing::LongLen,
            _ => Framing::ByteLen,
        }
    }

    /// Whether the type carries a collation in its type info.
    #[must_use]
    pub const fn has_collation(self) -> bool {
        matches!(
            self,
            Self::BigVarChar
                | Self::BigChar
                | Self::NChar
                | Self::NVarChar
                | Self::Text
                | Self::NText
        )
    }

    /// Whether values of this type are UTF-16LE text.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }
}

/// Column flags from COLMETADATA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Column is nullable.
    pub nullable: bool,
    /// Column compares case-sensitively.
    pub case_sensitive: bool,
    /// Column is an identity column.
    pub identity: bool,
    /// Column is computed.
    pub computed: bool,
    /// Column is hidden.
    pub hidden: bool,
    /// Column is a key column.
    pub key: bool,
}

impl ColumnFlags {
    /// Parse the 2-byte flags field.
    #[must_use]
    pub const fn from_bits(flags: u16) -> Self {
        Self {
            nullable: flags & 0x0001 != 0,
            case_sensitive: flags & 0x0002 != 0,
            identity: flags & 0x0010 != 0,
            computed: flags & 0x0020 != 0,
            hidden: flags & 0x2000 != 0,
            key: flags & 0x4000 != 0,
        }
    }

    /// Convert back to the wire representation.
    #[must_use]
    pub const fn to_bits(self) -> u16 {
        (self.nullable as u16)
            | (self.case_sensitive as u16) << 1
            | (self.identity as u16) << 4
            | (self.computed as u16) << 5
            | (self.hidden as u16) << 13
            | (self.key as u16) << 14
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(0x38), Some(TypeId::Int4));
        assert_eq!(TypeId::from_u8(0xE7), Some(TypeId::NVarChar));
        assert_eq!(TypeId::from_u8(0x99), None);
    }

    #[test]
    fn test_framing() {
        assert_eq!(TypeId::Int4.framing(4), Framing::Fixed(4));
        assert_eq!(TypeId::IntN.framing(4), Framing::ByteLen);
        assert_eq!(TypeId::VarChar.framing(50), Framing::LegacyByteLen);
        assert_eq!(TypeId::NVarChar.framing(100), Framing::UShortLen);
        assert_eq!(TypeId::NVarChar.framing(MAX_LENGTH_PLP), Framing::Plp);
        assert_eq!(TypeId::Xml.framing(0), Framing::Plp);
        assert_eq!(TypeId::Image.framing(0), Framing::TextPtr);
        assert_eq!(TypeId::Variant.framing(8016), Framing::LongLen);
    }

    #[test]
    fn test_column_flags_roundtrip() {
        let flags = ColumnFlags {
            nullable: true,
            identity: true,
            key: true,
            ..Default::default()
        };
        assert_eq!(ColumnFlags::from_bits(flags.to_bits()), flags);
        assert_eq!(ColumnFlags::from_bits(0x0001).to_bits(), 0x0001);
    }
}
