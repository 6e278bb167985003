//! LOGIN7 message.
//!
//! A 94-byte fixed header followed by UTF-16LE variable data. The header
//! carries an (offset, character count) pair for each variable field, with
//! offsets measured from the start of the message. The password is
//! obfuscated, not encrypted.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{decode_utf16_lossy, write_utf16_string};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed LOGIN7 header.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Header position of the first (offset, length) pair.
const VARIABLE_TABLE_START: usize = 36;

bitflags! {
    /// OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB_NOTIFY = 0x20;
        /// Fail the login if the initial database cannot be used.
        const DATABASE_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_WARN = 0x80;
    }
}

bitflags! {
    /// OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Fail the login if the initial language cannot be used.
        const LANGUAGE_FATAL = 0x01;
        /// ODBC-style session defaults.
        const ODBC = 0x02;
        /// Windows integrated security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Password change requested.
        const CHANGE_PASSWORD = 0x01;
        /// Server may send collations it does not recognise.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// A feature extension block follows.
        const EXTENSION = 0x10;
    }
}

/// LOGIN7 builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// OptionFlags1.
    pub option_flags1: OptionFlags1,
    /// OptionFlags2.
    pub option_flags2: OptionFlags2,
    /// OptionFlags3.
    pub option_flags3: OptionFlags3,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_pid: std::process::id(),
            option_flags1: OptionFlags1::USE_DB_NOTIFY | OptionFlags1::DATABASE_FATAL,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("sqlclient"),
            server_name: String::new(),
            library_name: String::from("sqlclient"),
            language: String::new(),
            database: String::new(),
        }
    }
}

/// Order of the variable fields in the offset table, excluding the
/// client ID and SSPI slots which this client leaves empty.
#[derive(Clone, Copy)]
enum Field {
    Hostname,
    Username,
    Password,
    AppName,
    ServerName,
    Extension,
    LibraryName,
    Language,
    Database,
}

const FIELDS: [Field; 9] = [
    Field::Hostname,
    Field::Username,
    Field::Password,
    Field::AppName,
    Field::ServerName,
    Field::Extension,
    Field::LibraryName,
    Field::Language,
    Field::Database,
];

impl Login7 {
    /// Login with client defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    fn field(&self, field: Field) -> &str {
        match field {
            Field::Hostname => &self.hostname,
            Field::Username => &self.username,
            Field::Password => &self.password,
            Field::AppName => &self.app_name,
            Field::ServerName => &self.server_name,
            Field::Extension => "",
            Field::LibraryName => &self.library_name,
            Field::Language => &self.language,
            Field::Database => &self.database,
        }
    }

    fn field_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Hostname => Some(&mut self.hostname),
            Field::Username => Some(&mut self.username),
            Field::Password => Some(&mut self.password),
            Field::AppName => Some(&mut self.app_name),
            Field::ServerName => Some(&mut self.server_name),
            Field::Extension => None,
            Field::LibraryName => Some(&mut self.library_name),
            Field::Language => Some(&mut self.language),
            Field::Database => Some(&mut self.database),
        }
    }

    /// Encode as a LOGIN7 payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut var_data = BytesMut::with_capacity(256);
        let mut table = BytesMut::with_capacity(58);
        let mut offset = LOGIN7_HEADER_SIZE;

        for field in FIELDS {
            let value = self.field(field);
            let chars = value.encode_utf16().count();
            table.put_u16_le(offset as u16);
            table.put_u16_le(chars as u16);
            if matches!(field, Field::Password) {
                write_obfuscated_password(&mut var_data, value);
            } else {
                write_utf16_string(&mut var_data, value);
            }
            offset += chars * 2;
        }

        // client id
        table.put_slice(&[0u8; 6]);
        // SSPI, attach db file, change password: all empty
        for _ in 0..3 {
            table.put_u16_le(offset as u16);
            table.put_u16_le(0);
        }
        // SSPI long
        table.put_u32_le(0);

        let total_length = LOGIN7_HEADER_SIZE + var_data.len();
        let mut buf = BytesMut::with_capacity(total_length);
        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        // client program version
        buf.put_u32_le(0);
        buf.put_u32_le(self.client_pid);
        // connection id
        buf.put_u32_le(0);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        // type flags
        buf.put_u8(0);
        buf.put_u8(self.option_flags3.bits());
        // client timezone
        buf.put_i32_le(0);
        buf.put_u32_le(self.client_lcid);
        buf.put_slice(&table);
        buf.put_slice(&var_data);

        buf.freeze()
    }

    /// Decode a LOGIN7 payload.
    ///
    /// Only the fields this builder writes are recovered; the password is
    /// de-obfuscated.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < LOGIN7_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: LOGIN7_HEADER_SIZE,
                actual: payload.len(),
            });
        }

        let mut header = &payload[4..];
        let mut login = Self {
            tds_version: TdsVersion::new(header.get_u32_le()),
            packet_size: header.get_u32_le(),
            ..Self::default()
        };
        header.advance(4);
        login.client_pid = header.get_u32_le();
        header.advance(4);
        login.option_flags1 = OptionFlags1::from_bits_retain(header.get_u8());
        login.option_flags2 = OptionFlags2::from_bits_retain(header.get_u8());
        header.advance(1);
        login.option_flags3 = OptionFlags3::from_bits_retain(header.get_u8());
        header.advance(4);
        login.client_lcid = header.get_u32_le();

        let mut table = &payload[VARIABLE_TABLE_START..];
        for field in FIELDS {
            let offset = table.get_u16_le() as usize;
            let chars = table.get_u16_le() as usize;
            let Some(target) = login.field_mut(field) else {
                continue;
            };
            let raw = payload
                .get(offset..offset + chars * 2)
                .ok_or(ProtocolError::UnexpectedEof("LOGIN7 variable data"))?;
            *target = if matches!(field, Field::Password) {
                let plain: Vec<u8> = raw.iter().map(|b| (b ^ 0xA5).rotate_left(4)).collect();
                decode_utf16_lossy(&plain)
            } else {
                decode_utf16_lossy(raw)
            };
        }

        Ok(login)
    }
}

/// Write a password with the LOGIN7 obfuscation: each byte has its nibbles
/// swapped and is then XORed with `0xA5`.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        for byte in unit.to_le_bytes() {
            dst.put_u8(byte.rotate_right(4) ^ 0xA5);
        }
    }
}
