//! Output charsets and UCS-2 transcoding.
//!
//! Charsets are addressed by WHATWG label (`utf-8`, `windows-1252`,
//! `iso-8859-1`, `shift_jis`, ...). Labels that name encodings which cannot
//! be produced as output, such as UTF-16 or `replacement`, are rejected.

use std::borrow::Cow;

use encoding_rs::Encoding;
use tds_protocol::codec::decode_utf16_lossy;

use crate::error::TypeError;

/// A validated output charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    encoding: &'static Encoding,
}

impl Charset {
    /// UTF-8.
    pub const UTF_8: Self = Self {
        encoding: encoding_rs::UTF_8,
    };

    /// Look up a charset by label.
    pub fn for_label(label: &str) -> Result<Self, TypeError> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .filter(|encoding| encoding.output_encoding() == *encoding)
            .ok_or_else(|| TypeError::UnsupportedCharset(label.to_owned()))?;
        Ok(Self { encoding })
    }

    /// Canonical name of the charset.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Underlying `encoding_rs` encoding.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Encode `text` in this charset.
    ///
    /// Characters the charset cannot represent become HTML numeric
    /// character references.
    #[must_use]
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        self.encoding.encode(text).0
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::UTF_8
    }
}

/// Convert UCS-2/UTF-16LE bytes into the charset named by `label`.
pub fn transcode(ucs2: &[u8], label: &str) -> Result<Vec<u8>, TypeError> {
    let charset = Charset::for_label(label)?;
    let text = decode_utf16_lossy(ucs2);
    Ok(charset.encode(&text).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ucs2(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn test_labels() {
        assert_eq!(Charset::for_label("UTF-8").unwrap().name(), "UTF-8");
        assert_eq!(Charset::for_label("latin1").unwrap().name(), "windows-1252");
        assert_eq!(Charset::for_label(" shift_jis ").unwrap().name(), "Shift_JIS");
        assert_eq!(Charset::default(), Charset::UTF_8);
    }

    #[test]
    fn test_rejected_labels() {
        assert!(matches!(
            Charset::for_label("klingon"),
            Err(TypeError::UnsupportedCharset(_))
        ));
        assert!(Charset::for_label("utf-16le").is_err());
        assert!(Charset::for_label("replacement").is_err());
    }

    #[test]
    fn test_transcode() {
        assert_eq!(transcode(&ucs2("café"), "utf-8").unwrap(), "café".as_bytes());
        assert_eq!(transcode(&ucs2("café"), "iso-8859-1").unwrap(), b"caf\xE9");
        assert_eq!(transcode(&ucs2("日本"), "shift_jis").unwrap(), b"\x93\xFA\x96\x7B");
    }

    #[test]
    fn test_unmappable_character() {
        assert_eq!(transcode(&ucs2("€"), "windows-1251").unwrap(), b"\x88");
        assert_eq!(transcode(&ucs2("日"), "windows-1252").unwrap(), b"&#26085;");
    }
}
