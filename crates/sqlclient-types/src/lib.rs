//! # sqlclient-types
//!
//! Typed column values and the decoder that produces them from raw row
//! payloads.
//!
//! ## Type Mappings
//!
//! | SQL type | [`TypedValue`] variant |
//! |----------|------------------------|
//! | `BIT` | `Bool` |
//! | `TINYINT` / `SMALLINT` / `INT` / `BIGINT` | `TinyInt` / `SmallInt` / `Int` / `BigInt` |
//! | `REAL` / `FLOAT` | `Real` / `Float` |
//! | `DECIMAL` / `NUMERIC` / `MONEY` / `SMALLMONEY` | `Decimal` (`rust_decimal`) |
//! | `CHAR` / `VARCHAR` / `TEXT` / `NCHAR` / `NVARCHAR` / `NTEXT` | `String` |
//! | `XML` | `Xml` |
//! | `BINARY` / `VARBINARY` / `IMAGE` | `Binary` |
//! | `DATE` / `TIME` | `Date` / `Time` (`chrono`) |
//! | `DATETIME` / `SMALLDATETIME` / `DATETIME2` | `DateTime` |
//! | `DATETIMEOFFSET` | `DateTimeOffset` |
//! | `UNIQUEIDENTIFIER` | `Uuid` |
//!
//! Single-byte character data is decoded through the column collation's
//! code page. [`charset::transcode`] converts Unicode text into an output
//! charset named by WHATWG label.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod charset;
pub mod decode;
pub mod encode;
pub mod error;
pub mod hint;
pub mod value;

pub use charset::{Charset, transcode};
pub use decode::{
    DEFAULT_MAX_TEXT_SIZE, DecodeOptions, UnknownTypePolicy, ValueFamily, decode_row, decode_value,
    reorder_guid,
};
pub use encode::{column_for, encode_row, encode_value};
pub use error::TypeError;
pub use hint::BinaryHint;
pub use value::TypedValue;
