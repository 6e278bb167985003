//! PRELOGIN message.
//!
//! PRELOGIN is the first exchange on a connection. The payload is a table of
//! option headers (type, big-endian offset, big-endian length) closed by
//! `0xFF`, followed by the option data the offsets point into. Offsets are
//! absolute from the start of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::version::{SqlServerVersion, TdsVersion};

/// PRELOGIN option tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name.
    Instance = 0x02,
    /// Client thread ID.
    ThreadId = 0x03,
    /// MARS support.
    Mars = 0x04,
    /// End of the option table.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Map a raw tag, returning `None` for options this client ignores.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Version),
            0x01 => Some(Self::Encryption),
            0x02 => Some(Self::Instance),
            0x03 => Some(Self::ThreadId),
            0x04 => Some(Self::Mars),
            0xFF => Some(Self::Terminator),
            _ => None,
        }
    }
}

/// Encryption negotiation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login packet only.
    Off = 0x00,
    /// Encryption is on.
    On = 0x01,
    /// Encryption is not available.
    #[default]
    NotSupported = 0x02,
    /// Encryption is required.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Map a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }

    /// Whether the peer insists on TLS.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// PRELOGIN request or response.
///
/// The VERSION option means different things per direction: the client sends
/// the TDS version it wants, the server answers with its product version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLogin {
    /// TDS version requested by the client.
    pub version: TdsVersion,
    /// Product version reported by the server.
    pub server_version: Option<SqlServerVersion>,
    /// Encryption negotiation value.
    pub encryption: EncryptionLevel,
    /// Named instance to validate against.
    pub instance: Option<String>,
    /// Client thread ID.
    pub thread_id: Option<u32>,
    /// MARS requested or granted.
    pub mars: bool,
}

impl PreLogin {
    /// Client request with TDS 7.4 and no encryption.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn with_version(mut self, version: TdsVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the encryption value.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the client thread ID.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Encode as a PRELOGIN payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, Vec<u8>)> = Vec::with_capacity(5);

        let mut version = self.version.raw().to_be_bytes().to_vec();
        version.extend_from_slice(&[0, 0]);
        options.push((PreLoginOption::Version, version));
        options.push((PreLoginOption::Encryption, vec![self.encryption as u8]));
        if let Some(instance) = &self.instance {
            let mut data = instance.as_bytes().to_vec();
            data.push(0);
            options.push((PreLoginOption::Instance, data));
        }
        if let Some(thread_id) = self.thread_id {
            options.push((PreLoginOption::ThreadId, thread_id.to_be_bytes().to_vec()));
        }
        options.push((PreLoginOption::Mars, vec![u8::from(self.mars)]));

        let header_size = options.len() * 5 + 1;
        let data_size: usize = options.iter().map(|(_, d)| d.len()).sum();
        let mut buf = BytesMut::with_capacity(header_size + data_size);

        let mut offset = header_size;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in &options {
            buf.put_slice(data);
        }

        buf.freeze()
    }

    /// Decode a PRELOGIN payload.
    ///
    /// Unknown option tags are skipped. An option whose data falls outside
    /// the payload is an error.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = payload;
        let mut headers = Vec::new();
        loop {
            if !src.has_remaining() {
                return Err(ProtocolError::UnexpectedEof("PRELOGIN option table"));
            }
            let tag = src.get_u8();
            if tag == PreLoginOption::Terminator as u8 {
                break;
            }
            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof("PRELOGIN option header"));
            }
            let offset = src.get_u16() as usize;
            let length = src.get_u16() as usize;
            headers.push((tag, offset, length));
        }

        let mut prelogin = Self::default();
        for (tag, offset, length) in headers {
            let data = payload
                .get(offset..offset + length)
                .ok_or(ProtocolError::InvalidPreloginOption(tag))?;

            match PreLoginOption::from_u8(tag) {
                Some(PreLoginOption::Version) if length >= 4 => {
                    let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                    prelogin.version = TdsVersion::new(raw);
                    prelogin.server_version = Some(SqlServerVersion::from_packed(raw));
                }
                Some(PreLoginOption::Encryption) if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(data[0])?;
                }
                Some(PreLoginOption::Instance) => {
                    let name = data.split(|&b| b == 0).next().unwrap_or_default();
                    if !name.is_empty() {
                        prelogin.instance = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
                Some(PreLoginOption::ThreadId) if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                }
                Some(PreLoginOption::Mars) if length >= 1 => {
                    prelogin.mars = data[0] != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = PreLogin::new()
            .with_encryption(EncryptionLevel::NotSupported)
            .encode();

        // VERSION, ENCRYPTION, MARS headers + terminator
        assert_eq!(encoded[0], PreLoginOption::Version as u8);
        assert_eq!(&encoded[1..5], &[0x00, 0x10, 0x00, 0x06]);
        assert_eq!(encoded[5], PreLoginOption::Encryption as u8);
        assert_eq!(encoded[15], 0xFF);
        assert_eq!(&encoded[16..20], &[0x74, 0x00, 0x00, 0x04]);
        assert_eq!(encoded[22], EncryptionLevel::NotSupported as u8);
        assert_eq!(encoded.len(), 16 + 6 + 1 + 1);
    }

    #[test]
    fn test_decode_roundtrip() {
        let original = PreLogin::new()
            .with_encryption(EncryptionLevel::Off)
            .with_instance("SQLEXPRESS")
            .with_thread_id(42);
        let decoded = PreLogin::decode(&original.encode()).unwrap();
        assert_eq!(decoded.version, original.version);
        assert_eq!(decoded.encryption, EncryptionLevel::Off);
        assert_eq!(decoded.instance.as_deref(), Some("SQLEXPRESS"));
        assert_eq!(decoded.thread_id, Some(42));
    }

    #[test]
    fn test_decode_options_out_of_order() {
        let payload = [
            0x01, 0x00, 0x0B, 0x00, 0x01, // ENCRYPTION at 11
            0x00, 0x00, 0x0C, 0x00, 0x06, // VERSION at 12
            0xFF, //
            0x00, // ENCRYPT_OFF
            0x10, 0x00, 0x07, 0xD0, 0x00, 0x00,
        ];
        let decoded = PreLogin::decode(&payload).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Off);
        let server = decoded.server_version.unwrap();
        assert_eq!((server.major, server.build), (16, 2000));
    }

    #[test]
    fn test_decode_skips_unknown_option() {
        let payload = [0x07, 0x00, 0x06, 0x00, 0x01, 0xFF, 0xAA];
        let decoded = PreLogin::decode(&payload).unwrap();
        assert_eq!(decoded, PreLogin::default());
    }

    #[test]
    fn test_decode_rejects_offset_past_end() {
        let payload = [0x01, 0x00, 0x40, 0x00, 0x01, 0xFF];
        assert_eq!(
            PreLogin::decode(&payload).unwrap_err(),
            ProtocolError::InvalidPreloginOption(0x01)
        );
    }

    #[test]
    fn test_decode_missing_terminator() {
        let payload = [0x00, 0x00, 0x06];
        assert!(matches!(
            PreLogin::decode(&payload),
            Err(ProtocolError::UnexpectedEof(_))
        ));
    }
}
