//! Response token stream.
//!
//! A TABULAR_RESULT message is a sequence of tokens, each introduced by a
//! one-byte tag. Most tokens carry their own length; ROW and NBCROW do not
//! and can only be delimited with the COLMETADATA that precedes them.
//!
//! [`TokenParser`] is deliberately stateless about result sets: the caller
//! supplies the column metadata in effect when asking for the next token.
//!
//! ```rust,ignore
//! let mut parser = TokenParser::new(payload);
//! let mut metadata = None;
//! while let Some(token) = parser.next_token_with_metadata(metadata.as_ref())? {
//!     match token {
//!         Token::ColMetaData(meta) => metadata = Some(meta),
//!         Token::Row(row) => handle(row),
//!         _ => {}
//!     }
//! }
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    ensure_remaining, read_b_varchar, read_us_varchar, utf16_byte_len, write_b_varchar,
    write_us_varchar,
};
use crate::collation::{COLLATION_LEN, Collation};
use crate::error::ProtocolError;
use crate::types::{ColumnFlags, Framing, TypeId};
use crate::version::{SqlServerVersion, TdsVersion};

/// Token tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Stored procedure return status.
    ReturnStatus = 0x79,
    /// Result set schema.
    ColMetaData = 0x81,
    /// Table names for browse mode.
    TabName = 0xA4,
    /// Column info for browse mode.
    ColInfo = 0xA5,
    /// ORDER BY columns.
    Order = 0xA9,
    /// Server error.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Feature extension acknowledgment.
    FeatureExtAck = 0xAE,
    /// Data row.
    Row = 0xD1,
    /// Data row with a null bitmap.
    NbcRow = 0xD2,
    /// Session environment change.
    EnvChange = 0xE3,
    /// SSPI handshake data.
    Sspi = 0xED,
    /// End of a statement.
    Done = 0xFD,
    /// End of a stored procedure.
    DoneProc = 0xFE,
    /// End of a statement inside a stored procedure.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Map a raw tag byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xED => Self::Sspi,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return None,
        })
    }
}

/// A decoded token.
///
/// Browse-mode, SSPI and feature-ack tokens are consumed by the parser and
/// never surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Result set schema.
    ColMetaData(ColMetaData),
    /// Data row (ROW or NBCROW).
    Row(RawRow),
    /// DONE.
    Done(Done),
    /// DONEPROC.
    DoneProc(Done),
    /// DONEINPROC.
    DoneInProc(Done),
    /// ERROR.
    Error(MessageToken),
    /// INFO.
    Info(MessageToken),
    /// LOGINACK.
    LoginAck(LoginAck),
    /// ENVCHANGE.
    EnvChange(EnvChange),
    /// RETURNSTATUS.
    ReturnStatus(i32),
    /// ORDER.
    Order(Vec<u16>),
}

impl Token {
    /// Tag of this token.
    #[must_use]
    pub const fn token_type(&self) -> TokenType {
        match self {
            Self::ColMetaData(_) => TokenType::ColMetaData,
            Self::Row(_) => TokenType::Row,
            Self::Done(_) => TokenType::Done,
            Self::DoneProc(_) => TokenType::DoneProc,
            Self::DoneInProc(_) => TokenType::DoneInProc,
            Self::Error(_) => TokenType::Error,
            Self::Info(_) => TokenType::Info,
            Self::LoginAck(_) => TokenType::LoginAck,
            Self::EnvChange(_) => TokenType::EnvChange,
            Self::ReturnStatus(_) => TokenType::ReturnStatus,
            Self::Order(_) => TokenType::Order,
        }
    }
}

/// Read a two-byte length and split off that many bytes.
fn take_u16_prefixed(src: &mut impl Buf, token: &'static str) -> Result<Bytes, ProtocolError> {
    ensure_remaining(src, 2, token)?;
    let len = src.get_u16_le() as usize;
    ensure_remaining(src, len, token)?;
    Ok(src.copy_to_bytes(len))
}

// =============================================================================
// COLMETADATA
// =============================================================================

/// Type-specific metadata following the type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeInfo {
    /// Declared maximum length in bytes; `0xFFFF` for `(max)` columns.
    pub max_length: u32,
    /// Decimal precision.
    pub precision: u8,
    /// Decimal scale or fractional-second scale.
    pub scale: u8,
    /// Collation for character types.
    pub collation: Option<Collation>,
}

/// Byte length of a TIME value at the given scale.
#[must_use]
pub const fn time_len(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

impl TypeInfo {
    /// Metadata for a fixed-length or byte-length type of `len` bytes.
    #[must_use]
    pub const fn with_length(max_length: u32) -> Self {
        Self {
            max_length,
            precision: 0,
            scale: 0,
            collation: None,
        }
    }

    /// Metadata for a decimal column.
    #[must_use]
    pub const fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            max_length: 17,
            precision,
            scale,
            collation: None,
        }
    }

    /// Metadata for a character column.
    #[must_use]
    pub const fn text(max_length: u32, collation: Collation) -> Self {
        Self {
            max_length,
            precision: 0,
            scale: 0,
            collation: Some(collation),
        }
    }

    /// Metadata for TIME, DATETIME2 and DATETIMEOFFSET.
    #[must_use]
    pub const fn scaled(scale: u8) -> Self {
        Self {
            max_length: 0,
            precision: 0,
            scale,
            collation: None,
        }
    }

    /// Read the type info for `type_id`.
    pub fn decode(type_id: TypeId, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        const WHAT: &str = "type info";
        let mut info = Self::default();

        if let Some(size) = type_id.fixed_size() {
            info.max_length = size as u32;
            return Ok(info);
        }

        match type_id {
            TypeId::Date => info.max_length = 3,
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                ensure_remaining(src, 1, WHAT)?;
                info.scale = src.get_u8();
                if info.scale > 7 {
                    return Err(ProtocolError::InvalidField {
                        token: "COLMETADATA",
                        field: "scale",
                    });
                }
            }
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                ensure_remaining(src, 3, WHAT)?;
                info.max_length = src.get_u8() as u32;
                info.precision = src.get_u8();
                info.scale = src.get_u8();
            }
            TypeId::BigVarChar
            | TypeId::BigChar
            | TypeId::NChar
            | TypeId::NVarChar
            | TypeId::BigVarBinary
            | TypeId::BigBinary => {
                ensure_remaining(src, 2, WHAT)?;
                info.max_length = src.get_u16_le() as u32;
                if type_id.has_collation() {
                    info.collation = Some(Collation::decode(src)?);
                }
            }
            TypeId::Text | TypeId::NText | TypeId::Image => {
                ensure_remaining(src, 4, WHAT)?;
                info.max_length = src.get_u32_le();
                if type_id.has_collation() {
                    info.collation = Some(Collation::decode(src)?);
                }
                ensure_remaining(src, 1, WHAT)?;
                let parts = src.get_u8();
                for _ in 0..parts {
                    read_us_varchar(src, "table name")?;
                }
            }
            TypeId::Xml => {
                ensure_remaining(src, 1, WHAT)?;
                if src.get_u8() != 0 {
                    read_b_varchar(src, "xml schema")?;
                    read_b_varchar(src, "xml schema")?;
                    read_us_varchar(src, "xml schema")?;
                }
            }
            TypeId::Udt => {
                ensure_remaining(src, 2, WHAT)?;
                info.max_length = src.get_u16_le() as u32;
                read_b_varchar(src, "udt info")?;
                read_b_varchar(src, "udt info")?;
                read_b_varchar(src, "udt info")?;
                read_us_varchar(src, "udt info")?;
            }
            TypeId::Variant => {
                ensure_remaining(src, 4, WHAT)?;
                info.max_length = src.get_u32_le();
            }
            _ => {
                ensure_remaining(src, 1, WHAT)?;
                info.max_length = src.get_u8() as u32;
            }
        }

        Ok(info)
    }

    /// Write the type info for `type_id`.
    pub fn encode(&self, type_id: TypeId, dst: &mut impl BufMut) {
        if type_id.fixed_size().is_some() {
            return;
        }
        let collation = self.collation.unwrap_or(Collation::LATIN1_GENERAL);
        match type_id {
            TypeId::Date => {}
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => dst.put_u8(self.scale),
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.max_length as u8);
                dst.put_u8(self.precision);
                dst.put_u8(self.scale);
            }
            TypeId::BigVarChar
            | TypeId::BigChar
            | TypeId::NChar
            | TypeId::NVarChar
            | TypeId::BigVarBinary
            | TypeId::BigBinary => {
                dst.put_u16_le(self.max_length as u16);
                if type_id.has_collation() {
                    collation.encode(dst);
                }
            }
            TypeId::Text | TypeId::NText | TypeId::Image => {
                dst.put_u32_le(self.max_length);
                if type_id.has_collation() {
                    collation.encode(dst);
                }
                dst.put_u8(0);
            }
            TypeId::Xml => dst.put_u8(0),
            TypeId::Udt => {
                dst.put_u16_le(self.max_length as u16);
                dst.put_u8(0);
                dst.put_u8(0);
                dst.put_u8(0);
                dst.put_u16_le(0);
            }
            TypeId::Variant => dst.put_u32_le(self.max_length),
            _ => dst.put_u8(self.max_length as u8),
        }
    }
}

/// One column of a COLMETADATA token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name, possibly empty.
    pub name: String,
    /// Wire type.
    pub type_id: TypeId,
    /// User type ID.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
}

impl ColumnMetadata {
    /// A nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, type_id: TypeId, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_id,
            user_type: 0,
            flags: ColumnFlags {
                nullable: true,
                ..ColumnFlags::default()
            },
            type_info,
        }
    }

    /// How values of this column are delimited in a row.
    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.type_id.framing(self.type_info.max_length)
    }

    /// Whether the column accepts NULL.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.flags.nullable
    }
}

/// COLMETADATA token body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColMetaData {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnMetadata>,
}

/// Column count announcing that no metadata follows.
const NO_METADATA: u16 = 0xFFFF;

impl ColMetaData {
    /// Wrap a column list.
    #[must_use]
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self { columns }
    }

    /// Decode a COLMETADATA body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure_remaining(src, 2, "COLMETADATA")?;
        let count = src.get_u16_le();
        if count == NO_METADATA {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ensure_remaining(src, 7, "COLMETADATA column")?;
            let user_type = src.get_u32_le();
            let flags = ColumnFlags::from_bits(src.get_u16_le());
            let code = src.get_u8();
            let type_id = TypeId::from_u8(code).ok_or(ProtocolError::UnknownDataType(code))?;
            let type_info = TypeInfo::decode(type_id, src)?;
            let name = read_b_varchar(src, "column name")?;
            columns.push(ColumnMetadata {
                name,
                type_id,
                user_type,
                flags,
                type_info,
            });
        }

        Ok(Self { columns })
    }

    /// Encode as a COLMETADATA token, tag included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::ColMetaData as u8);
        if self.columns.is_empty() {
            dst.put_u16_le(NO_METADATA);
            return;
        }
        dst.put_u16_le(self.columns.len() as u16);
        for column in &self.columns {
            dst.put_u32_le(column.user_type);
            dst.put_u16_le(column.flags.to_bits());
            dst.put_u8(column.type_id as u8);
            column.type_info.encode(column.type_id, dst);
            write_b_varchar(dst, &column.name);
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether the token described no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// =============================================================================
// ROW / NBCROW
// =============================================================================

/// PLP total length marking NULL.
const PLP_NULL: u64 = u64::MAX;

/// PLP total length marking an unknown-length value.
const PLP_UNKNOWN_LEN: u64 = u64::MAX - 1;

/// A row whose values are still raw wire bytes.
///
/// Each entry holds the value payload with its length prefix removed, or
/// `None` for NULL. PLP chunks are concatenated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    /// Per-column payloads.
    pub values: Vec<Option<Bytes>>,
}

impl RawRow {
    /// Wrap a list of payloads.
    #[must_use]
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        Self { values }
    }

    /// Decode a ROW body.
    pub fn decode(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let values = metadata
            .columns
            .iter()
            .map(|column| read_value(src, column))
            .collect::<Result<_, _>>()?;
        Ok(Self { values })
    }

    /// Decode an NBCROW body: a null bitmap, then the non-null values.
    pub fn decode_nbc(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let bitmap_len = metadata.columns.len().div_ceil(8);
        ensure_remaining(src, bitmap_len, "NBCROW null bitmap")?;
        let bitmap = src.copy_to_bytes(bitmap_len);

        let mut values = Vec::with_capacity(metadata.columns.len());
        for (index, column) in metadata.columns.iter().enumerate() {
            if bitmap[index / 8] & (1 << (index % 8)) != 0 {
                values.push(None);
            } else {
                values.push(read_value(src, column)?);
            }
        }
        Ok(Self { values })
    }

    /// Encode as a ROW token, tag included.
    pub fn encode(&self, metadata: &ColMetaData, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Row as u8);
        for (column, value) in metadata.columns.iter().zip(&self.values) {
            write_value(dst, column, value.as_deref());
        }
    }

    /// Encode as an NBCROW token, tag included.
    pub fn encode_nbc(&self, metadata: &ColMetaData, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::NbcRow as u8);
        let mut bitmap = vec![0u8; metadata.columns.len().div_ceil(8)];
        for (index, value) in self.values.iter().enumerate() {
            if value.is_none() {
                bitmap[index / 8] |= 1 << (index % 8);
            }
        }
        dst.put_slice(&bitmap);
        for (column, value) in metadata.columns.iter().zip(&self.values) {
            if let Some(value) = value {
                write_value(dst, column, Some(value));
            }
        }
    }
}

fn take_value(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    ensure_remaining(src, len, "column value")?;
    Ok(src.copy_to_bytes(len))
}

fn read_value(src: &mut impl Buf, column: &ColumnMetadata) -> Result<Option<Bytes>, ProtocolError> {
    const WHAT: &str = "column value";
    match column.framing() {
        Framing::Fixed(0) => Ok(None),
        Framing::Fixed(size) => take_value(src, size).map(Some),
        Framing::ByteLen => {
            ensure_remaining(src, 1, WHAT)?;
            match src.get_u8() as usize {
                0 => Ok(None),
                len => take_value(src, len).map(Some),
            }
        }
        Framing::LegacyByteLen => {
            ensure_remaining(src, 1, WHAT)?;
            match src.get_u8() {
                0xFF => Ok(None),
                len => take_value(src, len as usize).map(Some),
            }
        }
        Framing::UShortLen => {
            ensure_remaining(src, 2, WHAT)?;
            match src.get_u16_le() {
                0xFFFF => Ok(None),
                len => take_value(src, len as usize).map(Some),
            }
        }
        Framing::LongLen => {
            ensure_remaining(src, 4, WHAT)?;
            match src.get_u32_le() as usize {
                0 => Ok(None),
                len => take_value(src, len).map(Some),
            }
        }
        Framing::TextPtr => {
            ensure_remaining(src, 1, WHAT)?;
            let pointer_len = src.get_u8() as usize;
            if pointer_len == 0 {
                return Ok(None);
            }
            // text pointer, then an 8-byte timestamp
            ensure_remaining(src, pointer_len + 8 + 4, WHAT)?;
            src.advance(pointer_len + 8);
            let len = src.get_u32_le() as usize;
            take_value(src, len).map(Some)
        }
        Framing::Plp => read_plp(src, column.type_id),
    }
}

fn read_plp(src: &mut impl Buf, type_id: TypeId) -> Result<Option<Bytes>, ProtocolError> {
    ensure_remaining(src, 8, "PLP length")?;
    let total = src.get_u64_le();
    if total == PLP_NULL {
        return Ok(None);
    }

    let hint = if total == PLP_UNKNOWN_LEN {
        0
    } else {
        (total as usize).min(src.remaining())
    };
    let mut out = BytesMut::with_capacity(hint);
    loop {
        ensure_remaining(src, 4, "PLP chunk")?;
        let chunk = src.get_u32_le() as usize;
        if chunk == 0 {
            break;
        }
        ensure_remaining(src, chunk, "PLP chunk")?;
        out.extend_from_slice(&src.copy_to_bytes(chunk));
    }

    if total != PLP_UNKNOWN_LEN && out.len() as u64 != total {
        return Err(ProtocolError::InvalidValueLength {
            type_code: type_id as u8,
            length: out.len(),
        });
    }
    Ok(Some(out.freeze()))
}

fn write_value(dst: &mut impl BufMut, column: &ColumnMetadata, value: Option<&[u8]>) {
    match (column.framing(), value) {
        (Framing::Fixed(size), None) => dst.put_bytes(0, size),
        (Framing::Fixed(_), Some(v)) => dst.put_slice(v),
        (Framing::ByteLen, None) => dst.put_u8(0),
        (Framing::LegacyByteLen, None) => dst.put_u8(0xFF),
        (Framing::ByteLen | Framing::LegacyByteLen, Some(v)) => {
            dst.put_u8(v.len() as u8);
            dst.put_slice(v);
        }
        (Framing::UShortLen, None) => dst.put_u16_le(0xFFFF),
        (Framing::UShortLen, Some(v)) => {
            dst.put_u16_le(v.len() as u16);
            dst.put_slice(v);
        }
        (Framing::LongLen, None) => dst.put_u32_le(0),
        (Framing::LongLen, Some(v)) => {
            dst.put_u32_le(v.len() as u32);
            dst.put_slice(v);
        }
        (Framing::TextPtr, None) => dst.put_u8(0),
        (Framing::TextPtr, Some(v)) => {
            dst.put_u8(16);
            dst.put_bytes(0, 16 + 8);
            dst.put_u32_le(v.len() as u32);
            dst.put_slice(v);
        }
        (Framing::Plp, None) => dst.put_u64_le(PLP_NULL),
        (Framing::Plp, Some(v)) => {
            dst.put_u64_le(v.len() as u64);
            if !v.is_empty() {
                dst.put_u32_le(v.len() as u32);
                dst.put_slice(v);
            }
            dst.put_u32_le(0);
        }
    }
}

// =============================================================================
// DONE / DONEPROC / DONEINPROC
// =============================================================================

bitflags! {
    /// DONE status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention.
        const ATTN = 0x0020;
        /// A server error discarded the result set.
        const SRVERROR = 0x0100;
    }
}

/// Body of DONE, DONEPROC and DONEINPROC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Token of the completed command.
    pub cur_cmd: u16,
    /// Rows affected, valid when [`DoneStatus::COUNT`] is set.
    pub row_count: u64,
}

impl Done {
    /// Body size.
    pub const SIZE: usize = 12;

    /// Final DONE with no row count.
    #[must_use]
    pub const fn final_done() -> Self {
        Self {
            status: DoneStatus::empty(),
            cur_cmd: 0,
            row_count: 0,
        }
    }

    /// DONE reporting `rows` affected rows.
    #[must_use]
    pub const fn with_count(rows: u64) -> Self {
        Self {
            status: DoneStatus::COUNT,
            cur_cmd: 0xC1,
            row_count: rows,
        }
    }

    /// Decode the body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure_remaining(src, Self::SIZE, "DONE")?;
        Ok(Self {
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode with the given tag.
    pub fn encode(&self, token: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Whether more results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether the statement reported an error.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.intersects(DoneStatus::ERROR.union(DoneStatus::SRVERROR))
    }

    /// Rows affected, when the server supplied a count.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        if self.status.contains(DoneStatus::COUNT) {
            Some(self.row_count)
        } else {
            None
        }
    }
}

// =============================================================================
// ERROR / INFO
// =============================================================================

/// Body of ERROR and INFO.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageToken {
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number in the batch.
    pub line: i32,
}

impl MessageToken {
    /// Decode the body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = take_u16_prefixed(src, "ERROR/INFO")?;
        ensure_remaining(&body, 6, "ERROR/INFO")?;
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();
        let message = read_us_varchar(&mut body, "message text")?;
        let server = read_b_varchar(&mut body, "server name")?;
        let procedure = read_b_varchar(&mut body, "procedure name")?;
        ensure_remaining(&body, 4, "line number")?;
        let line = body.get_i32_le();
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode with the given tag (ERROR or INFO).
    pub fn encode(&self, token: TokenType, dst: &mut impl BufMut) {
        let body_len = 4
            + 1
            + 1
            + 2
            + utf16_byte_len(&self.message)
            + 1
            + utf16_byte_len(&self.server)
            + 1
            + utf16_byte_len(&self.procedure)
            + 4;
        dst.put_u8(token as u8);
        dst.put_u16_le(body_len as u16);
        dst.put_i32_le(self.number);
        dst.put_u8(self.state);
        dst.put_u8(self.class);
        write_us_varchar(dst, &self.message);
        write_b_varchar(dst, &self.server);
        write_b_varchar(dst, &self.procedure);
        dst.put_i32_le(self.line);
    }
}

// =============================================================================
// LOGINACK
// =============================================================================

/// Body of LOGINACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface type (1 = T-SQL).
    pub interface: u8,
    /// TDS version the server accepted.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server product version.
    pub prog_version: SqlServerVersion,
}

impl LoginAck {
    /// Decode the body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = take_u16_prefixed(src, "LOGINACK")?;
        ensure_remaining(&body, 5, "LOGINACK")?;
        let interface = body.get_u8();
        let tds_version = TdsVersion::new(body.get_u32());
        let prog_name = read_b_varchar(&mut body, "program name")?;
        ensure_remaining(&body, 4, "program version")?;
        let prog_version = SqlServerVersion::from_packed(body.get_u32());
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Encode as a LOGINACK token, tag included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let body_len = 1 + 4 + 1 + utf16_byte_len(&self.prog_name) + 4;
        dst.put_u8(TokenType::LoginAck as u8);
        dst.put_u16_le(body_len as u16);
        dst.put_u8(self.interface);
        dst.put_u32(self.tds_version.raw());
        write_b_varchar(dst, &self.prog_name);
        dst.put_u8(self.prog_version.major);
        dst.put_u8(self.prog_version.minor);
        dst.put_u16(self.prog_version.build);
    }
}

// =============================================================================
// ENVCHANGE
// =============================================================================

/// Body of ENVCHANGE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
        /// Previous language.
        old: String,
    },
    /// Legacy character set changed.
    Charset {
        /// New character set.
        new: String,
        /// Previous character set.
        old: String,
    },
    /// Packet size renegotiated.
    PacketSize {
        /// New packet size.
        new: u32,
        /// Previous packet size.
        old: u32,
    },
    /// Default collation changed.
    SqlCollation {
        /// New collation.
        new: Option<Collation>,
        /// Previous collation.
        old: Option<Collation>,
    },
    /// Any other change; the body is kept raw.
    Other {
        /// Change type byte.
        kind: u8,
        /// Remaining body.
        data: Bytes,
    },
}

impl EnvChange {
    const DATABASE: u8 = 1;
    const LANGUAGE: u8 = 2;
    const CHARSET: u8 = 3;
    const PACKET_SIZE: u8 = 4;
    const SQL_COLLATION: u8 = 7;

    /// Decode the body (after the tag).
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = take_u16_prefixed(src, "ENVCHANGE")?;
        ensure_remaining(&body, 1, "ENVCHANGE")?;
        let kind = body.get_u8();

        let change = match kind {
            Self::DATABASE | Self::LANGUAGE | Self::CHARSET | Self::PACKET_SIZE => {
                let new = read_b_varchar(&mut body, "ENVCHANGE value")?;
                let old = read_b_varchar(&mut body, "ENVCHANGE value")?;
                match kind {
                    Self::DATABASE => Self::Database { new, old },
                    Self::LANGUAGE => Self::Language { new, old },
                    Self::CHARSET => Self::Charset { new, old },
                    _ => Self::PacketSize {
                        new: new.trim().parse().map_err(|_| ProtocolError::InvalidField {
                            token: "ENVCHANGE",
                            field: "packet size",
                        })?,
                        old: old.trim().parse().unwrap_or_default(),
                    },
                }
            }
            Self::SQL_COLLATION => {
                let new = read_collation_value(&mut body)?;
                let old = read_collation_value(&mut body)?;
                Self::SqlCollation { new, old }
            }
            _ => Self::Other { kind, data: body },
        };

        Ok(change)
    }

    /// Encode as an ENVCHANGE token, tag included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        match self {
            Self::Database { new, old }
            | Self::Language { new, old }
            | Self::Charset { new, old } => {
                body.put_u8(match self {
                    Self::Database { .. } => Self::DATABASE,
                    Self::Language { .. } => Self::LANGUAGE,
                    _ => Self::CHARSET,
                });
                write_b_varchar(&mut body, new);
                write_b_varchar(&mut body, old);
            }
            Self::PacketSize { new, old } => {
                body.put_u8(Self::PACKET_SIZE);
                write_b_varchar(&mut body, &new.to_string());
                write_b_varchar(&mut body, &old.to_string());
            }
            Self::SqlCollation { new, old } => {
                body.put_u8(Self::SQL_COLLATION);
                for value in [new, old] {
                    match value {
                        Some(collation) => {
                            body.put_u8(COLLATION_LEN as u8);
                            collation.encode(&mut body);
                        }
                        None => body.put_u8(0),
                    }
                }
            }
            Self::Other { kind, data } => {
                body.put_u8(*kind);
                body.put_slice(data);
            }
        }
        dst.put_u8(TokenType::EnvChange as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }
}

fn read_collation_value(src: &mut impl Buf) -> Result<Option<Collation>, ProtocolError> {
    ensure_remaining(src, 1, "ENVCHANGE collation")?;
    let len = src.get_u8() as usize;
    ensure_remaining(src, len, "ENVCHANGE collation")?;
    if len == COLLATION_LEN {
        Collation::decode(src).map(Some)
    } else {
        src.advance(len);
        Ok(None)
    }
}

/// Encode a RETURNSTATUS token, tag included.
pub fn encode_return_status(status: i32, dst: &mut impl BufMut) {
    dst.put_u8(TokenType::ReturnStatus as u8);
    dst.put_i32_le(status);
}

// =============================================================================
// Parser
// =============================================================================

/// Pulls tokens out of a complete TABULAR_RESULT payload.
///
/// On error the parser does not advance, so [`position`](Self::position)
/// points at the start of the offending token.
#[derive(Debug, Clone)]
pub struct TokenParser {
    data: Bytes,
    position: usize,
}

impl TokenParser {
    /// Parse `data` from the start.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Whether any bytes remain.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Offset of the next token.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Tag of the next token without consuming it.
    #[must_use]
    pub fn peek_token_type(&self) -> Option<TokenType> {
        self.data
            .get(self.position)
            .copied()
            .and_then(TokenType::from_u8)
    }

    /// Next token that does not need column metadata.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        self.next_token_with_metadata(None)
    }

    /// Next token, using `metadata` to delimit rows.
    ///
    /// Returns `Ok(None)` at the end of the payload.
    pub fn next_token_with_metadata(
        &mut self,
        metadata: Option<&ColMetaData>,
    ) -> Result<Option<Token>, ProtocolError> {
        loop {
            if !self.has_remaining() {
                return Ok(None);
            }

            let mut buf = self.data.slice(self.position..);
            let start_len = buf.len();
            let tag = buf.get_u8();
            let token_type = TokenType::from_u8(tag).ok_or(ProtocolError::InvalidTokenType(tag))?;

            let token = match token_type {
                TokenType::ColMetaData => Some(Token::ColMetaData(ColMetaData::decode(&mut buf)?)),
                TokenType::Row | TokenType::NbcRow => {
                    let meta = metadata
                        .filter(|m| !m.is_empty())
                        .ok_or(ProtocolError::RowWithoutMetadata)?;
                    let row = if token_type == TokenType::Row {
                        RawRow::decode(&mut buf, meta)?
                    } else {
                        RawRow::decode_nbc(&mut buf, meta)?
                    };
                    Some(Token::Row(row))
                }
                TokenType::Done => Some(Token::Done(Done::decode(&mut buf)?)),
                TokenType::DoneProc => Some(Token::DoneProc(Done::decode(&mut buf)?)),
                TokenType::DoneInProc => Some(Token::DoneInProc(Done::decode(&mut buf)?)),
                TokenType::Error => Some(Token::Error(MessageToken::decode(&mut buf)?)),
                TokenType::Info => Some(Token::Info(MessageToken::decode(&mut buf)?)),
                TokenType::LoginAck => Some(Token::LoginAck(LoginAck::decode(&mut buf)?)),
                TokenType::EnvChange => Some(Token::EnvChange(EnvChange::decode(&mut buf)?)),
                TokenType::ReturnStatus => {
                    ensure_remaining(&buf, 4, "RETURNSTATUS")?;
                    Some(Token::ReturnStatus(buf.get_i32_le()))
                }
                TokenType::Order => {
                    let mut body = take_u16_prefixed(&mut buf, "ORDER")?;
                    let mut columns = Vec::with_capacity(body.len() / 2);
                    while body.remaining() >= 2 {
                        columns.push(body.get_u16_le());
                    }
                    Some(Token::Order(columns))
                }
                TokenType::TabName | TokenType::ColInfo | TokenType::Sspi => {
                    take_u16_prefixed(&mut buf, "browse token")?;
                    None
                }
                TokenType::FeatureExtAck => {
                    skip_feature_ext_ack(&mut buf)?;
                    None
                }
            };

            self.position += start_len - buf.len();
            if let Some(token) = token {
                return Ok(Some(token));
            }
        }
    }
}

fn skip_feature_ext_ack(src: &mut impl Buf) -> Result<(), ProtocolError> {
    loop {
        ensure_remaining(src, 1, "FEATUREEXTACK")?;
        if src.get_u8() == 0xFF {
            return Ok(());
        }
        ensure_remaining(src, 4, "FEATUREEXTACK")?;
        let len = src.get_u32_le() as usize;
        ensure_remaining(src, len, "FEATUREEXTACK")?;
        src.advance(len);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::write_utf16_string;

    fn int_column(name: &str) -> ColumnMetadata {
        ColumnMetadata::new(name, TypeId::IntN, TypeInfo::with_length(4))
    }

    fn nvarchar_column(name: &str, max_length: u32) -> ColumnMetadata {
        ColumnMetadata::new(
            name,
            TypeId::NVarChar,
            TypeInfo::text(max_length, Collation::LATIN1_GENERAL),
        )
    }

    fn utf16(s: &str) -> Bytes {
        let mut buf = BytesMut::new();
        write_utf16_string(&mut buf, s);
        buf.freeze()
    }

    #[test]
    fn test_done_roundtrip() {
        let done = Done::with_count(42);
        let mut buf = BytesMut::new();
        done.encode(TokenType::Done, &mut buf);
        assert_eq!(buf.len(), 1 + Done::SIZE);

        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(parser.next_token().unwrap(), Some(Token::Done(done)));
        assert!(parser.next_token().unwrap().is_none());
    }

    #[test]
    fn test_done_status() {
        let raw = Bytes::from_static(&[
            0xFD, 0x03, 0x01, 0xC1, 0x00, 0x05, 0, 0, 0, 0, 0, 0, 0,
        ]);
        let Some(Token::Done(done)) = TokenParser::new(raw).next_token().unwrap() else {
            panic!("expected DONE");
        };
        assert!(done.has_more());
        assert!(done.has_error());
        assert_eq!(done.rows_affected(), None);
        assert_eq!(done.row_count, 5);
    }

    #[test]
    fn test_colmetadata_no_metadata_marker() {
        let meta = ColMetaData::decode(&mut &[0xFF, 0xFF][..]).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_colmetadata_int_column() {
        let raw = [
            0x01, 0x00, // one column
            0x00, 0x00, 0x00, 0x00, // user type
            0x01, 0x00, // nullable
            0x38, // INT
            0x02, b'i', 0x00, b'd', 0x00,
        ];
        let meta = ColMetaData::decode(&mut &raw[..]).unwrap();
        assert_eq!(meta.column_count(), 1);
        assert_eq!(meta.columns[0].name, "id");
        assert_eq!(meta.columns[0].type_id, TypeId::Int4);
        assert_eq!(meta.columns[0].framing(), Framing::Fixed(4));
        assert!(meta.columns[0].is_nullable());
    }

    #[test]
    fn test_colmetadata_nvarchar_column() {
        let raw = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0xE7, // NVARCHAR
            0x64, 0x00, // max length 100
            0x09, 0x04, 0xD0, 0x00, 0x34, // collation
            0x04, b'n', 0x00, b'a', 0x00, b'm', 0x00, b'e', 0x00,
        ];
        let meta = ColMetaData::decode(&mut &raw[..]).unwrap();
        let column = &meta.columns[0];
        assert_eq!(column.name, "name");
        assert_eq!(column.type_info.max_length, 100);
        assert_eq!(column.type_info.collation.unwrap().sort_id, 0x34);
    }

    #[test]
    fn test_colmetadata_unknown_type() {
        let raw = [0x01, 0x00, 0, 0, 0, 0, 0x00, 0x00, 0x99, 0x00];
        assert_eq!(
            ColMetaData::decode(&mut &raw[..]).unwrap_err(),
            ProtocolError::UnknownDataType(0x99)
        );
    }

    #[test]
    fn test_colmetadata_roundtrip() {
        let meta = ColMetaData::new(vec![
            int_column("id"),
            nvarchar_column("name", 100),
            ColumnMetadata::new("amount", TypeId::DecimalN, TypeInfo::decimal(18, 2)),
            ColumnMetadata::new("at", TypeId::DateTime2, TypeInfo::scaled(7)),
            ColumnMetadata::new("doc", TypeId::Xml, TypeInfo::default()),
            ColumnMetadata::new("notes", TypeId::Text, TypeInfo::text(0x7FFF_FFFF, Collation::LATIN1_GENERAL)),
        ]);
        let mut buf = BytesMut::new();
        meta.encode(&mut buf);
        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(parser.next_token().unwrap(), Some(Token::ColMetaData(meta)));
    }

    #[test]
    fn test_row_with_null_and_text() {
        let meta = ColMetaData::new(vec![int_column("id"), nvarchar_column("name", 100)]);
        let row = RawRow::new(vec![None, Some(utf16("Ann"))]);
        let mut buf = BytesMut::new();
        row.encode(&meta, &mut buf);
        assert_eq!(&buf[..2], &[0xD1, 0x00]);

        let mut parser = TokenParser::new(buf.freeze());
        let token = parser.next_token_with_metadata(Some(&meta)).unwrap();
        assert_eq!(token, Some(Token::Row(row)));
    }

    #[test]
    fn test_nbcrow_null_bitmap() {
        let meta = ColMetaData::new((0..9).map(|i| int_column(&format!("c{i}"))).collect());
        let mut values: Vec<Option<Bytes>> = vec![None; 9];
        values[3] = Some(Bytes::copy_from_slice(&7i32.to_le_bytes()));
        let row = RawRow::new(values);

        let mut buf = BytesMut::new();
        row.encode_nbc(&meta, &mut buf);
        // tag + two bitmap bytes + one IntN value
        assert_eq!(buf.len(), 1 + 2 + 5);
        assert_eq!(&buf[1..3], &[0xF7, 0x01]);

        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(
            parser.next_token_with_metadata(Some(&meta)).unwrap(),
            Some(Token::Row(row))
        );
    }

    #[test]
    fn test_plp_chunks_concatenated() {
        let meta = ColMetaData::new(vec![nvarchar_column("body", 0xFFFF)]);
        let mut raw = BytesMut::new();
        raw.put_u8(0xD1);
        raw.put_u64_le(6);
        raw.put_u32_le(4);
        raw.put_slice(&[b'a', 0, b'b', 0]);
        raw.put_u32_le(2);
        raw.put_slice(&[b'c', 0]);
        raw.put_u32_le(0);

        let mut parser = TokenParser::new(raw.freeze());
        let Some(Token::Row(row)) = parser.next_token_with_metadata(Some(&meta)).unwrap() else {
            panic!("expected ROW");
        };
        assert_eq!(row.values[0].as_deref(), Some(&utf16("abc")[..]));
    }

    #[test]
    fn test_plp_length_mismatch() {
        let meta = ColMetaData::new(vec![nvarchar_column("body", 0xFFFF)]);
        let mut raw = BytesMut::new();
        raw.put_u8(0xD1);
        raw.put_u64_le(10);
        raw.put_u32_le(2);
        raw.put_slice(&[b'a', 0]);
        raw.put_u32_le(0);
        let err = TokenParser::new(raw.freeze())
            .next_token_with_metadata(Some(&meta))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValueLength { .. }));
    }

    #[test]
    fn test_text_pointer_value() {
        let meta = ColMetaData::new(vec![ColumnMetadata::new(
            "img",
            TypeId::Image,
            TypeInfo::with_length(0x7FFF_FFFF),
        )]);
        let row = RawRow::new(vec![Some(Bytes::from_static(b"\x89PNG"))]);
        let mut buf = BytesMut::new();
        row.encode(&meta, &mut buf);
        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(
            parser.next_token_with_metadata(Some(&meta)).unwrap(),
            Some(Token::Row(row))
        );
    }

    #[test]
    fn test_truncated_row_does_not_advance() {
        let meta = ColMetaData::new(vec![int_column("id")]);
        let raw = Bytes::from_static(&[0xD1, 0x04, 0x01, 0x00]);
        let mut parser = TokenParser::new(raw);
        assert_eq!(
            parser.next_token_with_metadata(Some(&meta)).unwrap_err(),
            ProtocolError::UnexpectedEof("column value")
        );
        assert_eq!(parser.position(), 0);
    }

    #[test]
    fn test_row_without_metadata() {
        let raw = Bytes::from_static(&[0xD1, 0x00]);
        assert_eq!(
            TokenParser::new(raw).next_token().unwrap_err(),
            ProtocolError::RowWithoutMetadata
        );
    }

    #[test]
    fn test_error_token_roundtrip() {
        let error = MessageToken {
            number: 208,
            state: 1,
            class: 16,
            message: "Invalid object name 'missing'.".into(),
            server: "srv".into(),
            procedure: String::new(),
            line: 1,
        };
        let mut buf = BytesMut::new();
        error.encode(TokenType::Error, &mut buf);
        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(parser.next_token().unwrap(), Some(Token::Error(error)));
    }

    #[test]
    fn test_error_token_length_past_end() {
        let raw = Bytes::from_static(&[0xAA, 0x40, 0x00, 0xD0, 0x00]);
        assert!(matches!(
            TokenParser::new(raw).next_token(),
            Err(ProtocolError::UnexpectedEof("ERROR/INFO"))
        ));
    }

    #[test]
    fn test_login_ack_roundtrip() {
        let ack = LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: "Microsoft SQL Server".into(),
            prog_version: SqlServerVersion {
                major: 16,
                minor: 0,
                build: 4100,
            },
        };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf);
        // TDS version is big-endian on the wire
        assert_eq!(&buf[4..8], &[0x74, 0x00, 0x00, 0x04]);
        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(parser.next_token().unwrap(), Some(Token::LoginAck(ack)));
    }

    #[test]
    fn test_env_change_variants() {
        let changes = [
            EnvChange::Database {
                new: "master".into(),
                old: String::new(),
            },
            EnvChange::PacketSize { new: 8000, old: 4096 },
            EnvChange::SqlCollation {
                new: Some(Collation::LATIN1_GENERAL),
                old: None,
            },
            EnvChange::Other {
                kind: 8,
                data: Bytes::from_static(&[8, 1, 2, 3, 4, 5, 6, 7, 8, 0]),
            },
        ];
        let mut buf = BytesMut::new();
        for change in &changes {
            change.encode(&mut buf);
        }
        let mut parser = TokenParser::new(buf.freeze());
        for change in changes {
            assert_eq!(parser.next_token().unwrap(), Some(Token::EnvChange(change)));
        }
    }

    #[test]
    fn test_env_change_bad_packet_size() {
        let mut buf = BytesMut::new();
        EnvChange::Language {
            new: "x".into(),
            old: "y".into(),
        }
        .encode(&mut buf);
        // retag as PACKET_SIZE
        buf[3] = 4;
        assert_eq!(
            TokenParser::new(buf.freeze()).next_token().unwrap_err(),
            ProtocolError::InvalidField {
                token: "ENVCHANGE",
                field: "packet size"
            }
        );
    }

    #[test]
    fn test_browse_tokens_skipped() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0xA4, 0x02, 0x00, 0xAA, 0xBB]);
        buf.put_slice(&[0xAE, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0xFF]);
        encode_return_status(-6, &mut buf);
        let mut parser = TokenParser::new(buf.freeze());
        assert_eq!(parser.next_token().unwrap(), Some(Token::ReturnStatus(-6)));
    }

    #[test]
    fn test_order_token() {
        let raw = Bytes::from_static(&[0xA9, 0x04, 0x00, 0x01, 0x00, 0x03, 0x00]);
        assert_eq!(
            TokenParser::new(raw).next_token().unwrap(),
            Some(Token::Order(vec![1, 3]))
        );
    }

    #[test]
    fn test_invalid_token_type() {
        let raw = Bytes::from_static(&[0x42]);
        let mut parser = TokenParser::new(raw);
        assert_eq!(parser.peek_token_type(), None);
        assert_eq!(
            parser.next_token().unwrap_err(),
            ProtocolError::InvalidTokenType(0x42)
        );
    }
}
